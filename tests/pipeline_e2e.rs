// tests/pipeline_e2e.rs
//
// End-to-end runs of the orchestrator with stub sources and an echoing text service.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{params, pipeline_with, DownAdapter, EchoService, HangingAdapter, StubAdapter};
use election_research_agent::ai_adapter::{CannedService, DisabledService};
use election_research_agent::error::{ParseError, RunError};
use election_research_agent::ingest::types::SourceAdapter;
use election_research_agent::query::ModelQueryParser;
use election_research_agent::{CancelHandle, RunResult};

#[tokio::test]
async fn three_news_two_social_yields_counts_and_candidate_keys() {
    let p = pipeline_with(vec![Arc::new(StubAdapter::new(3, 2))], Arc::new(EchoService::new()));
    let r = p.run_with_parameters(params()).await.expect("run should succeed");

    assert_eq!(r.news_aggregate.item_count, 3);
    assert_eq!(r.social_aggregate.item_count, 2);
    assert_eq!(r.news_aggregate.error_count, 0);
    let keys: Vec<&str> = r.prediction_result.predictions.keys().map(String::as_str).collect();
    assert_eq!(keys, vec!["A", "B"]);
    for v in r.prediction_result.predictions.values() {
        assert!((0.0..=1.0).contains(v));
    }
    assert!((0.0..=1.0).contains(&r.prediction_result.confidence));
    assert!(r.news_aggregate.time_range.is_some());
}

#[tokio::test]
async fn identical_runs_differ_only_in_timestamp() {
    let p = pipeline_with(vec![Arc::new(StubAdapter::new(3, 2))], Arc::new(EchoService::new()));
    let mut a: RunResult = p.run_with_parameters(params()).await.unwrap();
    let b: RunResult = p.run_with_parameters(params()).await.unwrap();

    a.timestamp = b.timestamp;
    assert_eq!(a, b);
    assert_eq!(
        serde_json::to_string(&a).unwrap(),
        serde_json::to_string(&b).unwrap()
    );
}

#[tokio::test]
async fn nothing_collected_is_a_total_collection_failure() {
    let p = pipeline_with(vec![Arc::new(DownAdapter)], Arc::new(EchoService::new()));
    let err = p.run_with_parameters(params()).await.unwrap_err();
    assert_eq!(err, RunError::TotalCollectionFailure { adapter_errors: 2 });
    assert_eq!(err.kind(), "total_collection_failure");

    let empty = pipeline_with(vec![Arc::new(StubAdapter::new(0, 0))], Arc::new(EchoService::new()));
    assert!(matches!(
        empty.run_with_parameters(params()).await,
        Err(RunError::TotalCollectionFailure { adapter_errors: 0 })
    ));
}

#[tokio::test]
async fn one_empty_source_still_runs() {
    let p = pipeline_with(vec![Arc::new(StubAdapter::new(2, 0))], Arc::new(EchoService::new()));
    let r = p.run_with_parameters(params()).await.unwrap();
    assert_eq!(r.news_aggregate.item_count, 2);
    assert_eq!(r.social_aggregate.item_count, 0);
    assert!(r.social_aggregate.meta_analysis.starts_with("No social data"));
}

#[tokio::test]
async fn parser_failures_are_parse_errors() {
    let stub = Arc::new(StubAdapter::new(1, 1));
    let adapter: Arc<dyn SourceAdapter> = stub.clone();
    let svc = Arc::new(EchoService::new());

    // No parser configured.
    let p = pipeline_with(vec![adapter.clone()], svc.clone());
    assert!(matches!(p.run("who wins?").await, Err(RunError::Parse(_))));

    // Model is down.
    let p = pipeline_with(vec![adapter.clone()], svc.clone())
        .with_parser(Arc::new(ModelQueryParser::new(Arc::new(DisabledService))));
    assert!(matches!(p.run("who wins?").await, Err(RunError::Parse(ParseError::Service(_)))));

    // Reply lacks candidates.
    let p = pipeline_with(vec![adapter.clone()], svc.clone()).with_parser(Arc::new(ModelQueryParser::new(
        Arc::new(CannedService::new(r#"{"election_type":"presidential","country":"USA"}"#)),
    )));
    assert_eq!(
        p.run("who wins?").await.unwrap_err(),
        RunError::Parse(ParseError::MissingField("candidates"))
    );

    // Invalid parameters submitted directly.
    let p = pipeline_with(vec![adapter.clone()], svc);
    let mut bad = params();
    bad.country = "  ".into();
    assert!(matches!(p.run_with_parameters(bad).await, Err(RunError::Parse(_))));
    // parse failures never reach the sources
    assert_eq!(*stub.calls.lock(), 0);
}

#[tokio::test]
async fn parsed_query_flows_through() {
    let reply = r#"{"election_type":"presidential","country":"USA","region":null,
        "candidates":["A","B"],"keywords":[],"hashtags":["vote"]}"#;
    let p = pipeline_with(vec![Arc::new(StubAdapter::new(1, 1))], Arc::new(EchoService::new()))
        .with_parser(Arc::new(ModelQueryParser::new(Arc::new(CannedService::new(reply)))));
    let r = p.run("Who will win between A and B?").await.unwrap();
    assert_eq!(r.query_parameters.hashtags, vec!["#vote".to_string()]);
    assert_eq!(r.prediction_result.predictions.len(), 2);
}

#[tokio::test]
async fn cancel_stops_a_stuck_run() {
    let p = pipeline_with(vec![Arc::new(HangingAdapter)], Arc::new(EchoService::new()));
    let cancel = CancelHandle::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });
    let res = p.run_with_parameters_cancellable(params(), &cancel).await;
    assert_eq!(res.unwrap_err(), RunError::Cancelled);
}

#[tokio::test]
async fn deadline_expires_into_timed_out() {
    let p = pipeline_with(vec![Arc::new(HangingAdapter)], Arc::new(EchoService::new()))
        .with_run_timeout(Some(Duration::from_millis(30)));
    let res = p.run_with_parameters(params()).await;
    assert_eq!(res.unwrap_err(), RunError::TimedOut(Duration::from_millis(30)));
}
