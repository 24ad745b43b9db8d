// src/analyze/mod.rs
//! Per-item analysis: one model call per raw item, failures folded into the record.

pub mod ai_adapter;
pub mod keywords;
pub mod record;

use std::time::Instant;

use futures::stream::{self, StreamExt};
use metrics::{counter, describe_counter, describe_histogram, histogram};
use once_cell::sync::OnceCell;

use crate::analyze::ai_adapter::{truncate_chars, DynTextService};
use crate::error::AnalysisError;
use crate::ingest::types::{NewsArticle, RawItem, SocialPost};

pub use crate::analyze::record::{ItemAnalysis, ItemDetails};

pub const NEWS_ROLE: &str = "You are an expert political analyst. Analyze this news article for \
election-related information.";

pub const SOCIAL_ROLE: &str = "You are an expert social media analyst. Analyze this social media \
post for election-related sentiment and information.";

const SUMMARY_SENTENCES: usize = 3;
const KEYWORDS_PER_ARTICLE: usize = 8;

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("analysis_items_total", "Items sent through the analyzer, by kind.");
        describe_counter!("analysis_failures_total", "Items whose analysis failed, by kind.");
        describe_histogram!("analysis_item_ms", "Per-item analysis time in milliseconds.");
    });
}

/// Turns raw items into analysis records. Never fails; failures become error records.
#[derive(Clone)]
pub struct ItemAnalyzer {
    service: DynTextService,
    max_input_chars: usize,
}

impl ItemAnalyzer {
    pub fn new(service: DynTextService, max_input_chars: usize) -> Self {
        Self {
            service,
            max_input_chars: max_input_chars.max(1),
        }
    }

    pub async fn analyze(&self, item: RawItem) -> ItemAnalysis {
        ensure_metrics_described();
        let kind = item.kind();
        let t0 = Instant::now();
        counter!("analysis_items_total", "kind" => kind.as_str()).increment(1);

        let rec = match item {
            RawItem::News(a) => self.analyze_news(a).await,
            RawItem::Social(p) => self.analyze_social(p).await,
        };

        histogram!("analysis_item_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
        if let Some(err) = &rec.error {
            counter!("analysis_failures_total", "kind" => kind.as_str()).increment(1);
            tracing::warn!(target: "analyze", id = %rec.source_id, kind = %kind, error = %err, "item analysis failed");
        }
        rec
    }

    /// Analyze with at most `concurrency` calls in flight; output order follows input order.
    pub async fn analyze_batch(&self, items: Vec<RawItem>, concurrency: usize) -> Vec<ItemAnalysis> {
        let n = items.len();
        let out: Vec<ItemAnalysis> = stream::iter(items.into_iter().map(|it| self.analyze(it)))
            .buffered(concurrency.max(1))
            .collect()
            .await;
        tracing::debug!(
            target: "analyze",
            items = n,
            failed = out.iter().filter(|r| r.is_error()).count(),
            "batch analyzed"
        );
        out
    }

    async fn analyze_news(&self, a: NewsArticle) -> ItemAnalysis {
        let kind = crate::ingest::types::SourceKind::News;
        if a.text.trim().is_empty() && a.title.trim().is_empty() {
            return ItemAnalysis::failure(a.url, kind, AnalysisError::EmptyContent)
                .with_item_time(a.published_at);
        }
        let content = format!(
            "Title: {}\n\nContent: {}",
            a.title,
            truncate_chars(&a.text, self.max_input_chars)
        );
        let content = truncate_chars(&content, self.max_input_chars);

        match self.service.invoke(NEWS_ROLE, content).await {
            Ok(analysis) => {
                let details = ItemDetails::News {
                    summary: keywords::extractive_summary(&a.text, SUMMARY_SENTENCES),
                    keywords: keywords::top_keywords(&format!("{} {}", a.title, a.text), KEYWORDS_PER_ARTICLE),
                    title: a.title,
                    published_at: a.published_at,
                };
                ItemAnalysis::success(a.url, kind, details, analysis)
            }
            Err(e) => ItemAnalysis::failure(a.url, kind, AnalysisError::from(e))
                .with_item_time(a.published_at),
        }
    }

    async fn analyze_social(&self, p: SocialPost) -> ItemAnalysis {
        let kind = crate::ingest::types::SourceKind::Social;
        if p.text.trim().is_empty() {
            return ItemAnalysis::failure(p.id, kind, AnalysisError::EmptyContent)
                .with_item_time(p.created_at);
        }
        let content = format!(
            "Author: {}\nEngagement: {} reposts, {} likes, {} replies\n\nPost: {}",
            p.author.as_deref().unwrap_or("unknown"),
            p.engagement.reposts,
            p.engagement.likes,
            p.engagement.replies,
            p.text
        );
        let content = truncate_chars(&content, self.max_input_chars);

        match self.service.invoke(SOCIAL_ROLE, content).await {
            Ok(analysis) => ItemAnalysis::success(
                p.id,
                kind,
                ItemDetails::Social {
                    author: p.author,
                    engagement: p.engagement,
                    created_at: p.created_at,
                },
                analysis,
            ),
            Err(e) => ItemAnalysis::failure(p.id, kind, AnalysisError::from(e))
                .with_item_time(p.created_at),
        }
    }
}
