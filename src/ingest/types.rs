// src/ingest/types.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::FetchError;
use crate::query::QueryParameters;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    News,
    Social,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::News => "news",
            SourceKind::Social => "social",
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewsArticle {
    pub url: String,
    pub title: String,
    pub text: String,
    pub published_at: Option<DateTime<Utc>>,
    pub outlet: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Engagement {
    pub reposts: u64,
    pub likes: u64,
    pub replies: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SocialPost {
    pub id: String,
    pub text: String,
    pub author: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub engagement: Engagement,
}

/// One collected unit of content, consumed by the item analyzer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RawItem {
    News(NewsArticle),
    Social(SocialPost),
}

impl RawItem {
    pub fn kind(&self) -> SourceKind {
        match self {
            RawItem::News(_) => SourceKind::News,
            RawItem::Social(_) => SourceKind::Social,
        }
    }

    /// URL for news, post id for social posts.
    pub fn identifier(&self) -> &str {
        match self {
            RawItem::News(a) => &a.url,
            RawItem::Social(p) => &p.id,
        }
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            RawItem::News(a) => a.published_at,
            RawItem::Social(p) => p.created_at,
        }
    }
}

/// Bounds handed to adapters for one fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchLimits {
    pub since: DateTime<Utc>,
    pub max_items: usize,
}

#[async_trait::async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Fetch items of `kind`. Per-item failures are skipped inside; an `Err` means the
    /// whole adapter failed for this run.
    async fn fetch(
        &self,
        params: &QueryParameters,
        kind: SourceKind,
        limits: FetchLimits,
    ) -> Result<Vec<RawItem>, FetchError>;
    /// Kinds this adapter can serve.
    fn kinds(&self) -> &'static [SourceKind];
    fn name(&self) -> &'static str;
}
