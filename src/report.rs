// src/report.rs
//! Markdown report plus a raw JSON snapshot of a run.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::aggregate::SourceAggregate;
use crate::pipeline::RunResult;
use crate::predict::PredictionResult;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportPaths {
    pub markdown: PathBuf,
    pub raw_data: PathBuf,
}

pub struct ReportRenderer {
    dir: PathBuf,
}

impl ReportRenderer {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Write `election_analysis_<stamp>.md` and `raw_data_<stamp>.json`; the stamp is the run time.
    pub fn render(&self, result: &RunResult) -> Result<ReportPaths> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating reports dir {}", self.dir.display()))?;
        let stamp = result.timestamp.format("%Y%m%d_%H%M%S").to_string();

        let markdown = self.dir.join(format!("election_analysis_{stamp}.md"));
        write_atomic(&markdown, render_markdown(result).as_bytes())?;

        let raw_data = self.dir.join(format!("raw_data_{stamp}.json"));
        let json = serde_json::to_vec_pretty(result).context("serializing run result")?;
        write_atomic(&raw_data, &json)?;

        tracing::info!(target: "report", path = %markdown.display(), "report written");
        Ok(ReportPaths { markdown, raw_data })
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes).with_context(|| format!("writing {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("renaming into {}", path.display()))?;
    Ok(())
}

fn pct(p: f64) -> String {
    format!("{:.1}%", p * 100.0)
}

fn outcome_lines(pred: &PredictionResult) -> Vec<String> {
    if pred.predictions.is_empty() {
        return vec!["- No candidates to predict.".to_string()];
    }
    pred.predictions
        .iter()
        .map(|(c, p)| format!("- {c}: {}", pct(*p)))
        .collect()
}

fn source_section(agg: &SourceAggregate, noun: &str) -> String {
    let mut lines = vec![
        "### Overview".to_string(),
        format!("- Number of {noun} analyzed: {}", agg.item_count),
        format!("- Failed analyses: {}", agg.error_count),
    ];
    if let Some(r) = &agg.time_range {
        lines.push(format!(
            "- Time range: {} to {}",
            r.start.format("%Y-%m-%d %H:%M UTC"),
            r.end.format("%Y-%m-%d %H:%M UTC")
        ));
    }
    lines.push(String::new());
    lines.push("### Key Findings".to_string());
    lines.push(agg.meta_analysis.trim().to_string());
    lines.join("\n")
}

pub fn render_markdown(result: &RunResult) -> String {
    let pred = &result.prediction_result;
    let q = &result.query_parameters;

    let mut summary = vec![
        format!(
            "Query: {} election, {}{}, candidates: {}.",
            q.election_type,
            q.country,
            q.region.as_deref().map(|r| format!(" ({r})")).unwrap_or_default(),
            q.candidates.join(", ")
        ),
        String::new(),
        "Based on our analysis of news and social media data,".to_string(),
        format!(
            "we predict the following election outcomes with {} confidence:",
            pct(pred.confidence)
        ),
    ];
    summary.extend(outcome_lines(pred));

    let mut predictions = vec![
        format!("### Prediction Confidence: {}", pct(pred.confidence)),
        String::new(),
        "### Predicted Outcomes".to_string(),
    ];
    predictions.extend(outcome_lines(pred));

    let methodology = format!(
        "1. **Data Collection**\n   \
         - News articles and social media posts from the last collection window\n   \
         - Engagement metrics for posts\n\n\
         2. **Analysis**\n   \
         - Per-item language-model analysis, failures recorded per item\n   \
         - Per-source meta-analysis of the item analyses\n\n\
         3. **Prediction**\n   \
         - Method: `{}`\n   \
         - Confidence reflects data coverage and model certainty",
        pred.method
    );

    [
        "# Election Analysis Report".to_string(),
        format!(
            "Generated on: {}",
            result.timestamp.format("%Y-%m-%d %H:%M:%S UTC")
        ),
        "## Executive Summary".to_string(),
        summary.join("\n"),
        "## News Analysis".to_string(),
        source_section(&result.news_aggregate, "articles"),
        "## Social Media Analysis".to_string(),
        source_section(&result.social_aggregate, "posts"),
        "## Predictions".to_string(),
        predictions.join("\n"),
        "## Methodology".to_string(),
        methodology,
    ]
    .join("\n\n")
}
