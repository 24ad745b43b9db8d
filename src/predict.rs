// src/predict.rs
//! Prediction over candidates from aggregated analysis texts.
//!
//! Every predictor returns a result; failures collapse to the degenerate
//! distribution (uniform, confidence 0) instead of surfacing an error.

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use metrics::{counter, describe_counter};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use strsim::normalized_levenshtein;

use crate::analyze::ai_adapter::{extract_json_object, truncate_chars, DynTextService};
use crate::query::dedup_case_insensitive;

/// Minimum similarity for a returned name to be taken as a requested candidate.
const NAME_SIMILARITY: f64 = 0.8;

pub const PREDICTOR_ROLE: &str = "You are an expert political analyst and election forecaster. \
Based on the analyses provided, estimate each listed candidate's probability of winning. Reply \
with ONE JSON object and nothing else: {\"confidence\": <0..1>, \"predictions\": \
{\"<candidate name>\": <0..1>, ...}}.";

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("prediction_runs_total", "Predictions produced, by method.");
        describe_counter!(
            "prediction_fallbacks_total",
            "Predictions that fell back to the uniform distribution."
        );
    });
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PredictionResult {
    pub confidence: f64,
    pub predictions: BTreeMap<String, f64>,
    pub method: String,
}

impl PredictionResult {
    /// Uniform 1/N per candidate with zero confidence; empty when there are no candidates.
    pub fn degenerate(candidates: &[String], method: &str) -> Self {
        let distinct = dedup_case_insensitive(candidates.to_vec());
        let p = if distinct.is_empty() {
            0.0
        } else {
            1.0 / distinct.len() as f64
        };
        Self {
            confidence: 0.0,
            predictions: distinct.into_iter().map(|c| (c, p)).collect(),
            method: method.to_string(),
        }
    }

    /// Candidate with the highest probability (first by name on ties).
    pub fn leader(&self) -> Option<(&str, f64)> {
        let mut best: Option<(&str, f64)> = None;
        for (name, &p) in &self.predictions {
            if best.map_or(true, |(_, bp)| p > bp) {
                best = Some((name.as_str(), p));
            }
        }
        best
    }
}

/// Clamp every value into [0,1] and rescale to sum 1 when the sum is positive.
pub(crate) fn normalize(mut predictions: BTreeMap<String, f64>) -> BTreeMap<String, f64> {
    for v in predictions.values_mut() {
        *v = if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.0 };
    }
    let sum: f64 = predictions.values().sum();
    if sum > 0.0 {
        for v in predictions.values_mut() {
            *v /= sum;
        }
    }
    predictions
}

#[async_trait]
pub trait Predictor: Send + Sync {
    async fn predict(&self, analyses: &[String], candidates: &[String]) -> PredictionResult;
    fn name(&self) -> &'static str;
}

fn surname(name: &str) -> String {
    name.split_whitespace()
        .last()
        .unwrap_or_default()
        .to_lowercase()
}

/// Escaped pattern for `name`, anchored with `\b` only on edges that are word characters,
/// so names like "J.D." still match.
fn word_bounded(name: &str) -> String {
    let is_word = |c: Option<char>| c.is_some_and(|c| c.is_alphanumeric() || c == '_');
    let lead = if is_word(name.chars().next()) { r"\b" } else { "" };
    let trail = if is_word(name.chars().last()) { r"\b" } else { "" };
    format!("{lead}{}{trail}", regex::escape(name))
}

/// Map a name from the model reply onto one of the requested candidates.
fn match_candidate<'c>(returned: &str, candidates: &'c [String]) -> Option<&'c String> {
    let r = returned.trim().to_lowercase();
    if r.is_empty() {
        return None;
    }
    if let Some(c) = candidates.iter().find(|c| c.to_lowercase() == r) {
        return Some(c);
    }
    let r_last = surname(&r);
    let by_surname: Vec<&String> = candidates
        .iter()
        .filter(|c| surname(c) == r_last || c.to_lowercase() == r_last)
        .collect();
    if by_surname.len() == 1 {
        return Some(by_surname[0]);
    }
    candidates
        .iter()
        .map(|c| (c, normalized_levenshtein(&c.to_lowercase(), &r)))
        .filter(|(_, s)| *s >= NAME_SIMILARITY)
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(c, _)| c)
}

/// Accepts 0..1 fractions, 0..100 percentages and numeric strings ("42%").
fn as_probability(v: &serde_json::Value) -> Option<f64> {
    let x = match v {
        serde_json::Value::Number(n) => n.as_f64()?,
        serde_json::Value::String(s) => s.trim().trim_end_matches('%').trim().parse().ok()?,
        _ => return None,
    };
    Some(if x > 1.0 && x <= 100.0 { x / 100.0 } else { x })
}

/// Asks the text-understanding service for a distribution over the candidates.
pub struct ModelPredictor {
    service: DynTextService,
    max_input_chars: usize,
}

impl ModelPredictor {
    pub fn new(service: DynTextService, max_input_chars: usize) -> Self {
        Self {
            service,
            max_input_chars: max_input_chars.max(1),
        }
    }

    fn interpret(&self, reply: &str, candidates: &[String]) -> Option<PredictionResult> {
        let value = extract_json_object(reply)?;
        let preds = value.get("predictions")?.as_object()?;

        let mut mapped: BTreeMap<String, f64> = candidates.iter().map(|c| (c.clone(), 0.0)).collect();
        let mut matched: HashSet<&String> = HashSet::new();
        for (name, v) in preds {
            let (Some(c), Some(p)) = (match_candidate(name, candidates), as_probability(v)) else {
                tracing::debug!(target: "predict", name = %name, "unmatched prediction entry");
                continue;
            };
            if matched.insert(c) {
                mapped.insert(c.clone(), p);
            }
        }
        if matched.is_empty() {
            return None;
        }

        let coverage = matched.len() as f64 / candidates.len() as f64;
        let raw_conf = value.get("confidence").and_then(as_probability).unwrap_or(0.5);
        let confidence = if raw_conf.is_finite() {
            raw_conf.clamp(0.0, 1.0) * coverage
        } else {
            0.0
        };
        Some(PredictionResult {
            confidence,
            predictions: normalize(mapped),
            method: self.name().to_string(),
        })
    }
}

#[async_trait]
impl Predictor for ModelPredictor {
    async fn predict(&self, analyses: &[String], candidates: &[String]) -> PredictionResult {
        ensure_metrics_described();
        let candidates = dedup_case_insensitive(candidates.to_vec());
        if candidates.is_empty() {
            return PredictionResult::degenerate(&candidates, self.name());
        }
        if analyses.iter().all(|a| a.trim().is_empty()) {
            tracing::info!(target: "predict", "no evidence to predict from");
            counter!("prediction_runs_total", "method" => self.name()).increment(1);
            counter!("prediction_fallbacks_total", "method" => self.name()).increment(1);
            return PredictionResult::degenerate(&candidates, self.name());
        }

        let content = format!(
            "Candidates: {}\n\nAnalyses:\n\n{}",
            candidates.join(", "),
            analyses.join("\n\n")
        );
        let content = truncate_chars(&content, self.max_input_chars);

        let result = match self.service.invoke(PREDICTOR_ROLE, content).await {
            Ok(reply) => self.interpret(&reply, &candidates).or_else(|| {
                tracing::warn!(target: "predict", reply_len = reply.len(), "prediction reply unusable");
                None
            }),
            Err(e) => {
                tracing::warn!(target: "predict", error = %e, "prediction call failed");
                None
            }
        };

        counter!("prediction_runs_total", "method" => self.name()).increment(1);
        result.unwrap_or_else(|| {
            counter!("prediction_fallbacks_total", "method" => self.name()).increment(1);
            PredictionResult::degenerate(&candidates, self.name())
        })
    }

    fn name(&self) -> &'static str {
        "model"
    }
}

/// Offline predictor: smoothed share of candidate mentions across the analyses.
pub struct MentionSharePredictor {
    /// Additive smoothing per candidate.
    pub smoothing: f64,
    /// Mentions at which confidence reaches one half.
    pub half_confidence_mentions: f64,
}

impl Default for MentionSharePredictor {
    fn default() -> Self {
        Self {
            smoothing: 1.0,
            half_confidence_mentions: 20.0,
        }
    }
}

impl MentionSharePredictor {
    fn mentions(texts: &[String], candidate: &str) -> usize {
        let full = candidate.trim().to_lowercase();
        let last = surname(candidate);
        if full.is_empty() {
            return 0;
        }
        let pattern = if full == last {
            format!("(?i){}", word_bounded(&full))
        } else {
            format!("(?i)(?:{}|{})", word_bounded(&full), word_bounded(&last))
        };
        match regex::Regex::new(&pattern) {
            Ok(re) => texts.iter().map(|t| re.find_iter(t).count()).sum(),
            Err(_) => 0,
        }
    }
}

#[async_trait]
impl Predictor for MentionSharePredictor {
    async fn predict(&self, analyses: &[String], candidates: &[String]) -> PredictionResult {
        ensure_metrics_described();
        counter!("prediction_runs_total", "method" => self.name()).increment(1);
        let candidates = dedup_case_insensitive(candidates.to_vec());
        if candidates.is_empty() {
            return PredictionResult::degenerate(&candidates, self.name());
        }

        let counts: Vec<(String, usize)> = candidates
            .iter()
            .map(|c| (c.clone(), Self::mentions(analyses, c)))
            .collect();
        let total: usize = counts.iter().map(|(_, n)| n).sum();
        if total == 0 {
            return PredictionResult::degenerate(&candidates, self.name());
        }

        let a = self.smoothing.max(0.0);
        let denom = total as f64 + a * candidates.len() as f64;
        let predictions = counts
            .into_iter()
            .map(|(c, n)| (c, (n as f64 + a) / denom))
            .collect();
        let k = self.half_confidence_mentions.max(1.0);
        let confidence = (total as f64 / (total as f64 + k)).clamp(0.0, 1.0);

        tracing::debug!(target: "predict", total_mentions = total, confidence, "mention share computed");
        PredictionResult {
            confidence,
            predictions: normalize(predictions),
            method: self.name().to_string(),
        }
    }

    fn name(&self) -> &'static str {
        "mention_share"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyze::ai_adapter::{CannedService, DisabledService};
    use std::sync::Arc;

    fn names(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn degenerate_is_uniform() {
        let r = PredictionResult::degenerate(&names(&["A", "B", "a"]), "x");
        assert_eq!(r.predictions.len(), 2);
        assert_eq!(r.predictions["A"], 0.5);
        assert_eq!(r.confidence, 0.0);
        assert!(PredictionResult::degenerate(&[], "x").predictions.is_empty());
    }

    #[test]
    fn names_match_by_case_surname_and_similarity() {
        let c = names(&["Ann Lee", "Bo Park"]);
        assert_eq!(match_candidate("ANN LEE", &c), Some(&c[0]));
        assert_eq!(match_candidate("Senator Park", &c), Some(&c[1]));
        assert_eq!(match_candidate("Ann Leee", &c), Some(&c[0]));
        assert_eq!(match_candidate("Someone Else", &c), None);
    }

    #[tokio::test]
    async fn model_reply_is_mapped_and_normalized() {
        let reply = r#"Here you go: {"confidence": 0.8, "predictions": {"ann lee": 60, "Park": "40%", "Zed": 0.9}}"#;
        let p = ModelPredictor::new(Arc::new(CannedService::new(reply)), 1000);
        let r = p.predict(&["x".into()], &names(&["Ann Lee", "Bo Park"])).await;
        assert!((r.predictions["Ann Lee"] - 0.6).abs() < 1e-9);
        assert!((r.predictions["Bo Park"] - 0.4).abs() < 1e-9);
        assert!((r.confidence - 0.8).abs() < 1e-9);
        assert_eq!(r.method, "model");
    }

    #[tokio::test]
    async fn partial_coverage_scales_confidence() {
        let reply = r#"{"confidence": 1.0, "predictions": {"Ann Lee": 0.7}}"#;
        let p = ModelPredictor::new(Arc::new(CannedService::new(reply)), 1000);
        let r = p.predict(&["x".into()], &names(&["Ann Lee", "Bo Park"])).await;
        assert_eq!(r.predictions["Bo Park"], 0.0);
        assert_eq!(r.predictions["Ann Lee"], 1.0);
        assert!((r.confidence - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn failures_fall_back_to_degenerate() {
        let c = names(&["A", "B"]);
        let disabled = ModelPredictor::new(Arc::new(DisabledService), 1000);
        assert_eq!(
            disabled.predict(&[], &c).await,
            PredictionResult::degenerate(&c, "model")
        );
        let junk = ModelPredictor::new(Arc::new(CannedService::new("no idea")), 1000);
        assert_eq!(junk.predict(&["x".into()], &c).await.confidence, 0.0);
    }

    #[tokio::test]
    async fn no_evidence_means_no_confidence() {
        let c = names(&["A", "B"]);
        let reply = r#"{"confidence": 0.9, "predictions": {"A": 0.8, "B": 0.2}}"#;
        let p = ModelPredictor::new(Arc::new(CannedService::new(reply)), 1000);
        assert_eq!(p.predict(&[], &c).await, PredictionResult::degenerate(&c, "model"));
        assert_eq!(
            p.predict(&["  ".into(), String::new()], &c).await,
            PredictionResult::degenerate(&c, "model")
        );
    }

    #[test]
    fn mentions_count_names_with_punctuated_edges() {
        let texts = vec!["J.D. spoke first; later J.D. answered.".to_string()];
        assert_eq!(MentionSharePredictor::mentions(&texts, "J.D."), 2);
        let texts = vec!["Leeds voted. Lee won, Lee!".to_string()];
        assert_eq!(MentionSharePredictor::mentions(&texts, "Lee"), 2);
    }

    #[tokio::test]
    async fn mention_share_prefers_the_most_discussed() {
        let p = MentionSharePredictor::default();
        let texts = vec![
            "Lee gained ground; Ann Lee leads.".to_string(),
            "Park trails Lee.".to_string(),
        ];
        let r = p.predict(&texts, &names(&["Ann Lee", "Bo Park"])).await;
        assert!(r.predictions["Ann Lee"] > r.predictions["Bo Park"]);
        assert!((r.predictions.values().sum::<f64>() - 1.0).abs() < 1e-9);
        assert!(r.confidence > 0.0 && r.confidence < 1.0);

        let none = p.predict(&texts, &[]).await;
        assert!(none.predictions.is_empty());
        assert_eq!(none.confidence, 0.0);
    }
}
