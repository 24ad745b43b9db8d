// src/pipeline.rs
//! # Run orchestrator
//! Sequences one run: parse → collect → analyze → aggregate → predict → assemble.
//!
//! Only parse failures, a collection that yields nothing, and structurally bad
//! aggregator input end a run early. Per-item failures are carried in the records.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use metrics::{counter, describe_counter, describe_histogram, histogram};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::aggregate::{Aggregator, SourceAggregate};
use crate::analyze::ai_adapter::{build_service_from_config, DynTextService};
use crate::analyze::ItemAnalyzer;
use crate::config::{AiConfig, PipelineConfig};
use crate::error::{ParseError, RunError, ServiceError};
use crate::ingest::types::{SourceAdapter, SourceKind};
use crate::ingest::{providers, Collector};
use crate::predict::{MentionSharePredictor, ModelPredictor, PredictionResult, Predictor};
use crate::query::{ModelQueryParser, QueryParameters, QueryParser};

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("pipeline_runs_total", "Runs started.");
        describe_counter!("pipeline_run_failures_total", "Runs that ended with an error, by kind.");
        describe_histogram!("pipeline_stage_ms", "Time spent per run stage in milliseconds.");
        describe_histogram!("pipeline_run_ms", "Whole-run time in milliseconds.");
    });
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStage {
    Parsed,
    Collected,
    Analyzed,
    Aggregated,
    Predicted,
    Assembled,
}

impl RunStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStage::Parsed => "parsed",
            RunStage::Collected => "collected",
            RunStage::Analyzed => "analyzed",
            RunStage::Aggregated => "aggregated",
            RunStage::Predicted => "predicted",
            RunStage::Assembled => "assembled",
        }
    }
}

fn stage_done(stage: RunStage, since: Instant) {
    let ms = since.elapsed().as_secs_f64() * 1_000.0;
    histogram!("pipeline_stage_ms", "stage" => stage.as_str()).record(ms);
    tracing::info!(target: "pipeline", stage = stage.as_str(), elapsed_ms = ms as u64, "stage complete");
}

/// Terminal output of a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunResult {
    pub timestamp: DateTime<Utc>,
    pub query_parameters: QueryParameters,
    pub news_aggregate: SourceAggregate,
    pub social_aggregate: SourceAggregate,
    pub prediction_result: PredictionResult,
}

/// Cancels every run it was handed to. Cloning shares the signal.
#[derive(Clone, Debug)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelHandle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once `cancel` has been called.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // `self` owns the sender, so the channel stays open while we wait.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

pub struct Pipeline {
    parser: Option<Arc<dyn QueryParser>>,
    collector: Collector,
    analyzer: ItemAnalyzer,
    aggregator: Aggregator,
    predictor: Arc<dyn Predictor>,
    analysis_concurrency: usize,
    run_timeout: Option<Duration>,
}

impl Pipeline {
    pub fn new(
        collector: Collector,
        analyzer: ItemAnalyzer,
        aggregator: Aggregator,
        predictor: Arc<dyn Predictor>,
    ) -> Self {
        Self {
            parser: None,
            collector,
            analyzer,
            aggregator,
            predictor,
            analysis_concurrency: 8,
            run_timeout: None,
        }
    }

    pub fn with_parser(mut self, parser: Arc<dyn QueryParser>) -> Self {
        self.parser = Some(parser);
        self
    }

    pub fn with_analysis_concurrency(mut self, n: usize) -> Self {
        self.analysis_concurrency = n.max(1);
        self
    }

    pub fn with_run_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.run_timeout = timeout;
        self
    }

    /// Wire every stage around one text service and the given adapters.
    pub fn from_parts(
        service: DynTextService,
        adapters: Vec<Arc<dyn SourceAdapter>>,
        ai: &AiConfig,
        cfg: &PipelineConfig,
    ) -> Self {
        // Without a model the only prediction we can make offline is mention share.
        let predictor: Arc<dyn Predictor> = if service.provider_name() == "disabled" {
            Arc::new(MentionSharePredictor::default())
        } else {
            Arc::new(ModelPredictor::new(service.clone(), ai.max_input_chars))
        };
        Self::new(
            Collector::new(adapters, cfg),
            ItemAnalyzer::new(service.clone(), ai.max_input_chars),
            Aggregator::new(service.clone(), ai.max_input_chars, cfg.max_summary_chunks),
            predictor,
        )
        .with_parser(Arc::new(ModelQueryParser::new(service)))
        .with_analysis_concurrency(cfg.analysis_concurrency)
        .with_run_timeout(cfg.run_timeout())
    }

    /// Build the service stack and adapters from configuration.
    pub fn from_config(ai: &AiConfig, cfg: &PipelineConfig) -> anyhow::Result<Self> {
        let service = build_service_from_config(ai)?;
        let adapters = providers::build_enabled(cfg)?;
        tracing::info!(
            target: "pipeline",
            provider = service.provider_name(),
            adapters = adapters.len(),
            "pipeline configured"
        );
        Ok(Self::from_parts(service, adapters, ai, cfg))
    }

    pub fn adapter_names(&self) -> Vec<&'static str> {
        self.collector.adapter_names()
    }

    pub fn predictor_name(&self) -> &'static str {
        self.predictor.name()
    }

    pub async fn run(&self, query: &str) -> Result<RunResult, RunError> {
        self.run_cancellable(query, &CancelHandle::new()).await
    }

    pub async fn run_cancellable(&self, query: &str, cancel: &CancelHandle) -> Result<RunResult, RunError> {
        self.guarded(cancel, async {
            let t0 = Instant::now();
            let params = self.parse(query).await?;
            stage_done(RunStage::Parsed, t0);
            self.execute(params).await
        })
        .await
    }

    pub async fn run_with_parameters(&self, params: QueryParameters) -> Result<RunResult, RunError> {
        self.run_with_parameters_cancellable(params, &CancelHandle::new())
            .await
    }

    pub async fn run_with_parameters_cancellable(
        &self,
        params: QueryParameters,
        cancel: &CancelHandle,
    ) -> Result<RunResult, RunError> {
        self.guarded(cancel, async {
            let t0 = Instant::now();
            let params = params.validate()?;
            stage_done(RunStage::Parsed, t0);
            self.execute(params).await
        })
        .await
    }

    async fn parse(&self, query: &str) -> Result<QueryParameters, RunError> {
        let parser = self
            .parser
            .as_ref()
            .ok_or(ParseError::Service(ServiceError::Disabled))?;
        Ok(parser.parse(query).await?)
    }

    /// Apply cancellation and the optional deadline, and account for the outcome.
    async fn guarded<F>(&self, cancel: &CancelHandle, fut: F) -> Result<RunResult, RunError>
    where
        F: Future<Output = Result<RunResult, RunError>>,
    {
        ensure_metrics_described();
        counter!("pipeline_runs_total").increment(1);
        let t0 = Instant::now();

        let work = async {
            match self.run_timeout {
                Some(limit) => tokio::time::timeout(limit, fut)
                    .await
                    .unwrap_or(Err(RunError::TimedOut(limit))),
                None => fut.await,
            }
        };
        let res = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(RunError::Cancelled),
            r = work => r,
        };

        histogram!("pipeline_run_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
        if let Err(e) = &res {
            counter!("pipeline_run_failures_total", "kind" => e.kind()).increment(1);
            tracing::warn!(target: "pipeline", kind = e.kind(), error = %e, "run failed");
        }
        res
    }

    async fn execute(&self, params: QueryParameters) -> Result<RunResult, RunError> {
        tracing::info!(
            target: "pipeline",
            election_type = %params.election_type,
            country = %params.country,
            candidates = params.candidates.len(),
            "run started"
        );

        let t = Instant::now();
        let (news, social) = tokio::join!(
            self.collector.fetch(&params, SourceKind::News),
            self.collector.fetch(&params, SourceKind::Social)
        );
        if news.items.is_empty() && social.items.is_empty() {
            return Err(RunError::TotalCollectionFailure {
                adapter_errors: news.adapter_errors + social.adapter_errors,
            });
        }
        tracing::info!(target: "pipeline", news = news.items.len(), social = social.items.len(), "collected");
        stage_done(RunStage::Collected, t);

        let t = Instant::now();
        let (news_analyses, social_analyses) = tokio::join!(
            self.analyzer.analyze_batch(news.items, self.analysis_concurrency),
            self.analyzer.analyze_batch(social.items, self.analysis_concurrency)
        );
        stage_done(RunStage::Analyzed, t);

        let t = Instant::now();
        let (news_aggregate, social_aggregate) = tokio::join!(
            self.aggregator.aggregate(SourceKind::News, news_analyses),
            self.aggregator.aggregate(SourceKind::Social, social_analyses)
        );
        let (news_aggregate, social_aggregate) = (news_aggregate?, social_aggregate?);
        stage_done(RunStage::Aggregated, t);

        let t = Instant::now();
        let evidence: Vec<String> = [&news_aggregate, &social_aggregate]
            .into_iter()
            .flat_map(prediction_evidence)
            .collect();
        let prediction_result = self.predictor.predict(&evidence, &params.candidates).await;
        tracing::info!(
            target: "pipeline",
            method = %prediction_result.method,
            confidence = prediction_result.confidence,
            "predicted"
        );
        stage_done(RunStage::Predicted, t);

        let t = Instant::now();
        let result = RunResult {
            timestamp: Utc::now(),
            query_parameters: params,
            news_aggregate,
            social_aggregate,
            prediction_result,
        };
        stage_done(RunStage::Assembled, t);
        Ok(result)
    }
}

/// The meta-analysis when it succeeded, otherwise the individual analyses it would have covered.
fn prediction_evidence(agg: &SourceAggregate) -> Vec<String> {
    if agg.valid_count() == 0 {
        return Vec::new();
    }
    if agg.meta_error.is_none() {
        return vec![agg.meta_analysis.clone()];
    }
    agg.analyses
        .iter()
        .filter_map(|a| a.analysis.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancel_handle_wakes_waiters() {
        let h = CancelHandle::new();
        assert!(!h.is_cancelled());
        let waiter = {
            let h = h.clone();
            tokio::spawn(async move { h.cancelled().await })
        };
        h.cancel();
        waiter.await.unwrap();
        assert!(h.is_cancelled());
        // already-cancelled handles resolve immediately
        h.cancelled().await;
    }

    #[test]
    fn stages_have_stable_labels() {
        assert_eq!(RunStage::Parsed.as_str(), "parsed");
        assert_eq!(
            serde_json::to_string(&RunStage::Assembled).unwrap(),
            "\"assembled\""
        );
    }
}
