// tests/common/mod.rs
//
// Stub collaborators shared by the integration tests. They implement the public
// traits so the real collector, analyzer, aggregator and orchestrator run unchanged.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;

use election_research_agent::aggregate::Aggregator;
use election_research_agent::ai_adapter::{DynTextService, ServiceFuture, TextService};
use election_research_agent::analyze::ItemAnalyzer;
use election_research_agent::error::{FetchError, ServiceError};
use election_research_agent::ingest::types::{
    Engagement, FetchLimits, NewsArticle, RawItem, SocialPost, SourceAdapter, SourceKind,
};
use election_research_agent::ingest::Collector;
use election_research_agent::predict::{ModelPredictor, Predictor};
use election_research_agent::query::QueryParameters;
use election_research_agent::Pipeline;

pub fn params() -> QueryParameters {
    QueryParameters::new("presidential", "USA", vec!["A".into(), "B".into()])
}

pub fn news_item(i: usize) -> RawItem {
    RawItem::News(NewsArticle {
        url: format!("https://news.test/{i}"),
        title: format!("Article {i}"),
        text: format!("Candidate A and candidate B campaign update number {i}."),
        published_at: Some(Utc::now() - chrono::Duration::hours(i as i64 + 1)),
        outlet: Some("Test Daily".into()),
    })
}

pub fn social_item(i: usize) -> RawItem {
    RawItem::Social(SocialPost {
        id: format!("post-{i}"),
        text: format!("Rally for A tonight, post {i}"),
        author: Some(format!("user{i}")),
        created_at: Some(Utc::now() - chrono::Duration::minutes(i as i64 + 1)),
        engagement: Engagement {
            reposts: i as u64,
            likes: 10 * i as u64,
            replies: 1,
        },
    })
}

/// Serves fixed items for both kinds and counts fetches.
pub struct StubAdapter {
    pub items: Vec<RawItem>,
    pub calls: Mutex<usize>,
}

impl StubAdapter {
    pub fn new(news: usize, social: usize) -> Self {
        let mut items: Vec<RawItem> = (1..=news).map(news_item).collect();
        items.extend((1..=social).map(social_item));
        Self {
            items,
            calls: Mutex::new(0),
        }
    }

    pub fn from_items(items: Vec<RawItem>) -> Self {
        Self {
            items,
            calls: Mutex::new(0),
        }
    }
}

#[async_trait::async_trait]
impl SourceAdapter for StubAdapter {
    async fn fetch(
        &self,
        _params: &QueryParameters,
        kind: SourceKind,
        _limits: FetchLimits,
    ) -> Result<Vec<RawItem>, FetchError> {
        *self.calls.lock() += 1;
        Ok(self.items.iter().filter(|i| i.kind() == kind).cloned().collect())
    }
    fn kinds(&self) -> &'static [SourceKind] {
        &[SourceKind::News, SourceKind::Social]
    }
    fn name(&self) -> &'static str {
        "stub"
    }
}

/// Always fails the whole fetch.
pub struct DownAdapter;

#[async_trait::async_trait]
impl SourceAdapter for DownAdapter {
    async fn fetch(
        &self,
        _params: &QueryParameters,
        _kind: SourceKind,
        _limits: FetchLimits,
    ) -> Result<Vec<RawItem>, FetchError> {
        Err(FetchError::Status(503))
    }
    fn kinds(&self) -> &'static [SourceKind] {
        &[SourceKind::News, SourceKind::Social]
    }
    fn name(&self) -> &'static str {
        "down"
    }
}

/// Never returns within a test's lifetime.
pub struct HangingAdapter;

#[async_trait::async_trait]
impl SourceAdapter for HangingAdapter {
    async fn fetch(
        &self,
        _params: &QueryParameters,
        _kind: SourceKind,
        _limits: FetchLimits,
    ) -> Result<Vec<RawItem>, FetchError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(Vec::new())
    }
    fn kinds(&self) -> &'static [SourceKind] {
        &[SourceKind::News]
    }
    fn name(&self) -> &'static str {
        "hanging"
    }
}

/// Replies with a deterministic echo of the content; fails when content contains `fail_on`.
/// Records the length of every request it sees.
pub struct EchoService {
    pub fail_on: Option<String>,
    pub seen: Mutex<Vec<(String, usize)>>,
}

impl EchoService {
    pub fn new() -> Self {
        Self {
            fail_on: None,
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_on(marker: &str) -> Self {
        Self {
            fail_on: Some(marker.to_string()),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn max_content_len(&self) -> usize {
        self.seen.lock().iter().map(|(_, n)| *n).max().unwrap_or(0)
    }

    pub fn calls_with_role(&self, role: &str) -> usize {
        self.seen.lock().iter().filter(|(r, _)| r == role).count()
    }
}

impl TextService for EchoService {
    fn invoke<'a>(&'a self, system_role: &'a str, content: &'a str) -> ServiceFuture<'a> {
        self.seen
            .lock()
            .push((system_role.to_string(), content.chars().count()));
        let fail = self
            .fail_on
            .as_deref()
            .is_some_and(|m| content.contains(m));
        let head: String = content.chars().take(40).collect();
        Box::pin(async move {
            if fail {
                Err(ServiceError::Transport("stub failure".into()))
            } else {
                Ok(format!("echo: {head}"))
            }
        })
    }
    fn provider_name(&self) -> &'static str {
        "echo"
    }
}

pub fn pipeline_with(adapters: Vec<Arc<dyn SourceAdapter>>, service: DynTextService) -> Pipeline {
    let predictor: Arc<dyn Predictor> = Arc::new(ModelPredictor::new(service.clone(), 4_000));
    Pipeline::new(
        Collector::with_limits(adapters, 7, 1000),
        ItemAnalyzer::new(service.clone(), 4_000),
        Aggregator::new(service, 4_000, 4),
        predictor,
    )
    .with_analysis_concurrency(4)
}
