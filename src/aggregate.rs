// src/aggregate.rs
//! Merge per-item analyses of one source kind into a single view with a meta-analysis.
//!
//! Combined text is kept under the model input limit: oversized input is split into chunks,
//! each chunk is condensed, and the meta-analysis runs over the condensed text.

use std::time::Instant;

use chrono::{DateTime, Utc};
use metrics::{counter, describe_counter, describe_histogram, histogram};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

use crate::analyze::ai_adapter::{truncate_chars, DynTextService};
use crate::analyze::record::ItemAnalysis;
use crate::error::AggregationError;
use crate::ingest::types::SourceKind;

pub const NEWS_META_ROLE: &str =
    "You are an expert political analyst. Provide a meta-analysis of these news analyses.";

pub const SOCIAL_META_ROLE: &str = "You are an expert in social media analysis and political \
sentiment. Provide a meta-analysis of these social media post analyses, focusing on \
election-related patterns and sentiment.";

pub const CHUNK_ROLE: &str = "You are an expert political analyst. Condense these analyses into a \
short summary that keeps every candidate-relevant finding.";

const SEPARATOR: &str = "\n\n";

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("aggregate_chunked_total", "Aggregations that needed chunked summarization.");
        describe_counter!("aggregate_meta_failures_total", "Meta-analysis calls that failed.");
        describe_histogram!("aggregate_ms", "Aggregation time in milliseconds.");
    });
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceAggregate {
    pub kind: SourceKind,
    /// All input records, failed ones included.
    pub item_count: usize,
    pub error_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_range: Option<TimeRange>,
    pub meta_analysis: String,
    /// Set when the meta-analysis call failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta_error: Option<String>,
    pub analyses: Vec<ItemAnalysis>,
}

impl SourceAggregate {
    pub fn valid_count(&self) -> usize {
        self.item_count - self.error_count
    }
}

fn time_range(analyses: &[ItemAnalysis]) -> Option<TimeRange> {
    let mut stamps = analyses.iter().filter_map(ItemAnalysis::timestamp);
    let first = stamps.next()?;
    let (start, end) = stamps.fold((first, first), |(lo, hi), t| (lo.min(t), hi.max(t)));
    Some(TimeRange { start, end })
}

/// Greedy packing of texts into chunks of at most `max_chars` characters (separators included).
/// A single text longer than the limit becomes its own truncated chunk.
pub(crate) fn pack_chunks(texts: &[&str], max_chars: usize) -> Vec<String> {
    let sep = SEPARATOR.chars().count();
    let mut chunks: Vec<String> = Vec::new();
    let mut cur = String::new();
    let mut cur_len = 0usize;
    for t in texts {
        let t = truncate_chars(t, max_chars);
        let len = t.chars().count();
        let extra = if cur.is_empty() { len } else { sep + len };
        if !cur.is_empty() && cur_len + extra > max_chars {
            chunks.push(std::mem::take(&mut cur));
            cur_len = 0;
        }
        if !cur.is_empty() {
            cur.push_str(SEPARATOR);
            cur_len += sep;
        }
        cur.push_str(t);
        cur_len += len;
    }
    if !cur.is_empty() {
        chunks.push(cur);
    }
    chunks
}

pub struct Aggregator {
    service: DynTextService,
    max_input_chars: usize,
    max_chunks: usize,
}

impl Aggregator {
    pub fn new(service: DynTextService, max_input_chars: usize, max_chunks: usize) -> Self {
        Self {
            service,
            max_input_chars: max_input_chars.max(1),
            max_chunks: max_chunks.max(1),
        }
    }

    fn validate(kind: SourceKind, analyses: &[ItemAnalysis]) -> Result<(), AggregationError> {
        for (index, a) in analyses.iter().enumerate() {
            if a.kind != kind {
                return Err(AggregationError::WrongSource {
                    index,
                    id: a.source_id.clone(),
                    expected: kind.as_str(),
                    found: a.kind.as_str(),
                });
            }
            if a.analysis.is_none() && a.error.is_none() {
                return Err(AggregationError::EmptyRecord {
                    index,
                    id: a.source_id.clone(),
                });
            }
        }
        Ok(())
    }

    pub async fn aggregate(
        &self,
        kind: SourceKind,
        analyses: Vec<ItemAnalysis>,
    ) -> Result<SourceAggregate, AggregationError> {
        ensure_metrics_described();
        Self::validate(kind, &analyses)?;
        let t0 = Instant::now();

        let item_count = analyses.len();
        let error_count = analyses.iter().filter(|a| a.is_error()).count();
        let texts: Vec<&str> = analyses
            .iter()
            .filter(|a| !a.is_error())
            .filter_map(|a| a.analysis.as_deref())
            .filter(|t| !t.trim().is_empty())
            .collect();

        let (meta_analysis, meta_error) = if texts.is_empty() {
            tracing::info!(target: "aggregate", kind = %kind, item_count, error_count, "no usable analyses");
            (no_data_text(kind, item_count, error_count), None)
        } else {
            match self.synthesize(kind, &texts).await {
                Ok(text) => (text, None),
                Err(e) => {
                    counter!("aggregate_meta_failures_total", "kind" => kind.as_str()).increment(1);
                    tracing::warn!(target: "aggregate", kind = %kind, error = %e, "meta-analysis failed");
                    (format!("Meta-analysis unavailable: {e}"), Some(e))
                }
            }
        };

        histogram!("aggregate_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
        Ok(SourceAggregate {
            kind,
            item_count,
            error_count,
            time_range: time_range(&analyses),
            meta_analysis,
            meta_error,
            analyses,
        })
    }

    async fn synthesize(&self, kind: SourceKind, texts: &[&str]) -> Result<String, String> {
        let role = match kind {
            SourceKind::News => NEWS_META_ROLE,
            SourceKind::Social => SOCIAL_META_ROLE,
        };
        let combined = texts.join(SEPARATOR);
        if combined.chars().count() <= self.max_input_chars {
            return self
                .service
                .invoke(role, &combined)
                .await
                .map_err(|e| e.to_string());
        }

        counter!("aggregate_chunked_total", "kind" => kind.as_str()).increment(1);
        let mut chunks = pack_chunks(texts, self.max_input_chars);
        if chunks.len() > self.max_chunks {
            tracing::warn!(
                target: "aggregate",
                kind = %kind,
                chunks = chunks.len(),
                cap = self.max_chunks,
                "too many chunks, dropping the tail"
            );
            chunks.truncate(self.max_chunks);
        }

        let mut summaries: Vec<String> = Vec::with_capacity(chunks.len());
        let mut last_err = None;
        for (i, chunk) in chunks.iter().enumerate() {
            match self.service.invoke(CHUNK_ROLE, chunk).await {
                Ok(s) => summaries.push(s),
                Err(e) => {
                    tracing::warn!(target: "aggregate", kind = %kind, chunk = i, error = %e, "chunk summary failed");
                    last_err = Some(e);
                }
            }
        }
        if summaries.is_empty() {
            return Err(last_err
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no chunk summaries".to_string()));
        }
        tracing::debug!(target: "aggregate", kind = %kind, chunks = summaries.len(), "chunk summaries ready");

        let condensed = summaries.join(SEPARATOR);
        let condensed = truncate_chars(&condensed, self.max_input_chars);
        self.service
            .invoke(role, condensed)
            .await
            .map_err(|e| e.to_string())
    }
}

fn no_data_text(kind: SourceKind, item_count: usize, error_count: usize) -> String {
    if item_count == 0 {
        format!("No {kind} data available for analysis.")
    } else {
        format!(
            "No {kind} data available for analysis: {error_count} of {item_count} item analyses failed."
        )
    }
}
