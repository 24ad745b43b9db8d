//! history.rs: bounded in-memory record of recent runs, served by `/runs/recent`.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::pipeline::RunResult;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RunSummary {
    pub timestamp: DateTime<Utc>,
    pub election_type: String,
    pub country: String,
    pub news_items: usize,
    pub social_items: usize,
    pub failed_items: usize,
    pub method: String,
    pub confidence: f64,
    /// Most likely candidate, if any.
    pub leader: Option<String>,
}

impl From<&RunResult> for RunSummary {
    fn from(r: &RunResult) -> Self {
        Self {
            timestamp: r.timestamp,
            election_type: r.query_parameters.election_type.clone(),
            country: r.query_parameters.country.clone(),
            news_items: r.news_aggregate.item_count,
            social_items: r.social_aggregate.item_count,
            failed_items: r.news_aggregate.error_count + r.social_aggregate.error_count,
            method: r.prediction_result.method.clone(),
            confidence: r.prediction_result.confidence,
            leader: r.prediction_result.leader().map(|(c, _)| c.to_string()),
        }
    }
}

#[derive(Debug)]
pub struct RunHistory {
    inner: Mutex<Vec<RunSummary>>,
    cap: usize,
}

impl RunHistory {
    pub fn with_capacity(cap: usize) -> Self {
        Self {
            inner: Mutex::new(Vec::with_capacity(cap.min(10_000))),
            cap: cap.clamp(1, 10_000),
        }
    }

    pub fn push(&self, r: &RunResult) {
        let mut v = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        v.push(RunSummary::from(r));
        if v.len() > self.cap {
            let excess = v.len() - self.cap;
            v.drain(0..excess);
        }
    }

    /// Newest last.
    pub fn snapshot_last_n(&self, n: usize) -> Vec<RunSummary> {
        let v = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let start = v.len().saturating_sub(n);
        v[start..].to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::SourceAggregate;
    use crate::ingest::types::SourceKind;
    use crate::predict::PredictionResult;
    use crate::query::QueryParameters;

    fn empty(kind: SourceKind) -> SourceAggregate {
        SourceAggregate {
            kind,
            item_count: 0,
            error_count: 0,
            time_range: None,
            meta_analysis: String::new(),
            meta_error: None,
            analyses: Vec::new(),
        }
    }

    fn run(country: &str) -> RunResult {
        let params = QueryParameters::new("presidential", country, vec!["A".into(), "B".into()]);
        let mut prediction = PredictionResult::degenerate(&params.candidates, "model");
        prediction.predictions.insert("B".into(), 0.7);
        RunResult {
            timestamp: Utc::now(),
            query_parameters: params,
            news_aggregate: empty(SourceKind::News),
            social_aggregate: empty(SourceKind::Social),
            prediction_result: prediction,
        }
    }

    #[test]
    fn keeps_only_the_newest_runs() {
        let h = RunHistory::with_capacity(2);
        for c in ["X", "Y", "Z"] {
            h.push(&run(c));
        }
        let all = h.snapshot_last_n(10);
        let countries: Vec<&str> = all.iter().map(|s| s.country.as_str()).collect();
        assert_eq!(countries, vec!["Y", "Z"]);
        assert_eq!(all[1].leader.as_deref(), Some("B"));
        assert_eq!(h.snapshot_last_n(1).len(), 1);
    }
}
