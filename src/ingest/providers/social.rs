// src/ingest/providers/social.rs
//! Recent-search over a v2 social API (tweets/search/recent shape).

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::config::pipeline::{RetryPolicy, SocialSettings};
use crate::error::FetchError;
use crate::ingest::types::{Engagement, FetchLimits, RawItem, SocialPost, SourceAdapter, SourceKind};
use crate::ingest::{build_search_expression, normalize_text, with_retry};
use crate::query::QueryParameters;

/// Recent search only reaches back this far.
const MAX_LOOKBACK_DAYS: i64 = 7;

#[derive(Debug, Default, Deserialize)]
struct SearchPage {
    #[serde(default)]
    data: Vec<ApiPost>,
    #[serde(default)]
    includes: Includes,
    #[serde(default)]
    meta: Meta,
}

#[derive(Debug, Deserialize)]
struct ApiPost {
    id: String,
    #[serde(default)]
    text: String,
    author_id: Option<String>,
    created_at: Option<String>,
    public_metrics: Option<PublicMetrics>,
}

#[derive(Debug, Default, Deserialize)]
struct PublicMetrics {
    #[serde(default)]
    retweet_count: u64,
    #[serde(default)]
    like_count: u64,
    #[serde(default)]
    reply_count: u64,
}

#[derive(Debug, Default, Deserialize)]
struct Includes {
    #[serde(default)]
    users: Vec<ApiUser>,
}

#[derive(Debug, Deserialize)]
struct ApiUser {
    id: String,
    username: String,
}

#[derive(Debug, Default, Deserialize)]
struct Meta {
    next_token: Option<String>,
}

/// Turn one page of search results into posts, resolving author ids to usernames.
fn posts_from_page(page: SearchPage) -> Vec<SocialPost> {
    let users: HashMap<String, String> = page
        .includes
        .users
        .into_iter()
        .map(|u| (u.id, u.username))
        .collect();

    page.data
        .into_iter()
        .filter_map(|p| {
            let text = normalize_text(&p.text);
            if p.id.trim().is_empty() || text.is_empty() {
                return None;
            }
            let m = p.public_metrics.unwrap_or_default();
            Some(SocialPost {
                author: p
                    .author_id
                    .as_ref()
                    .map(|id| users.get(id).cloned().unwrap_or_else(|| id.clone())),
                created_at: p
                    .created_at
                    .as_deref()
                    .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                    .map(|d| d.with_timezone(&Utc)),
                engagement: Engagement {
                    reposts: m.retweet_count,
                    likes: m.like_count,
                    replies: m.reply_count,
                },
                id: p.id,
                text,
            })
        })
        .collect()
}

pub struct SocialSearchAdapter {
    http: reqwest::Client,
    settings: SocialSettings,
    retry: RetryPolicy,
}

impl SocialSearchAdapter {
    pub fn new(settings: SocialSettings, timeout: Duration, retry: RetryPolicy) -> anyhow::Result<Self> {
        Ok(Self {
            http: super::http_client(timeout)?,
            settings,
            retry,
        })
    }

    async fn page(
        &self,
        query: &str,
        start_time: &str,
        page_size: usize,
        next_token: Option<&str>,
    ) -> Result<SearchPage, FetchError> {
        let size = page_size.to_string();
        with_retry(self.retry, "social search", || {
            let mut q: Vec<(&str, &str)> = vec![
                ("query", query),
                ("max_results", size.as_str()),
                ("start_time", start_time),
                ("tweet.fields", "created_at,author_id,public_metrics,lang"),
                ("expansions", "author_id"),
                ("user.fields", "username"),
            ];
            if let Some(t) = next_token {
                q.push(("next_token", t));
            }
            let req = self
                .http
                .get(&self.settings.endpoint)
                .bearer_auth(&self.settings.bearer_token)
                .query(&q);
            async move {
                let resp = req.send().await?.error_for_status()?;
                resp.json::<SearchPage>()
                    .await
                    .map_err(|e| FetchError::Parse(e.to_string()))
            }
        })
        .await
    }
}

#[async_trait]
impl SourceAdapter for SocialSearchAdapter {
    async fn fetch(
        &self,
        params: &QueryParameters,
        kind: SourceKind,
        limits: FetchLimits,
    ) -> Result<Vec<RawItem>, FetchError> {
        if kind != SourceKind::Social {
            return Ok(Vec::new());
        }
        if self.settings.bearer_token.is_empty() {
            return Err(FetchError::NotConfigured("SOCIAL_BEARER_TOKEN"));
        }

        let mut query = build_search_expression(params, kind);
        if !self.settings.language.is_empty() {
            query.push_str(&format!(" lang:{}", self.settings.language));
        }
        // The endpoint rejects a start_time older than its window; stay a minute inside it.
        let floor = Utc::now() - chrono::Duration::days(MAX_LOOKBACK_DAYS) + chrono::Duration::minutes(1);
        let start_time = limits
            .since
            .max(floor)
            .to_rfc3339_opts(chrono::SecondsFormat::Secs, true);

        let mut out: Vec<RawItem> = Vec::new();
        let mut next: Option<String> = None;
        loop {
            let remaining = limits.max_items.saturating_sub(out.len());
            let page_size = self.settings.page_size.min(remaining).clamp(10, 100);
            let page = match self.page(&query, &start_time, page_size, next.as_deref()).await {
                Ok(p) => p,
                Err(e) if !out.is_empty() => {
                    tracing::warn!(target: "ingest", adapter = "social", error = %e, kept = out.len(), "pagination stopped early");
                    break;
                }
                Err(e) => return Err(e),
            };
            next = page.meta.next_token.clone();
            let got = page.data.len();
            out.extend(posts_from_page(page).into_iter().map(RawItem::Social));
            if got == 0 || out.len() >= limits.max_items || next.is_none() {
                break;
            }
        }
        out.truncate(limits.max_items);
        tracing::debug!(target: "ingest", adapter = "social", posts = out.len(), "search done");
        Ok(out)
    }

    fn kinds(&self) -> &'static [SourceKind] {
        &[SourceKind::Social]
    }

    fn name(&self) -> &'static str {
        "social"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"{
      "data": [
        {"id": "1", "text": "Lee   is &amp; winning", "author_id": "u1",
         "created_at": "2024-10-01T10:00:00.000Z",
         "public_metrics": {"retweet_count": 3, "reply_count": 1, "like_count": 10, "quote_count": 0}},
        {"id": "2", "text": "   ", "author_id": "u2"},
        {"id": "3", "text": "Park rally tonight", "author_id": "u9"}
      ],
      "includes": {"users": [{"id": "u1", "username": "ann", "name": "Ann"}]},
      "meta": {"result_count": 3, "next_token": "abc"}
    }"#;

    #[test]
    fn page_parsing_resolves_authors_and_metrics() {
        let page: SearchPage = serde_json::from_str(PAGE).unwrap();
        assert_eq!(page.meta.next_token.as_deref(), Some("abc"));
        let posts = posts_from_page(page);
        assert_eq!(posts.len(), 2);
        assert_eq!(posts[0].text, "Lee is & winning");
        assert_eq!(posts[0].author.as_deref(), Some("ann"));
        assert_eq!(
            posts[0].engagement,
            Engagement {
                reposts: 3,
                likes: 10,
                replies: 1
            }
        );
        assert!(posts[0].created_at.is_some());
        // unknown author falls back to the id
        assert_eq!(posts[1].author.as_deref(), Some("u9"));
        assert_eq!(posts[1].engagement, Engagement::default());
    }

    #[test]
    fn empty_page_is_fine() {
        let page: SearchPage = serde_json::from_str(r#"{"meta":{"result_count":0}}"#).unwrap();
        assert!(posts_from_page(page).is_empty());
    }

    #[tokio::test]
    async fn missing_token_is_an_adapter_error() {
        let adapter = SocialSearchAdapter::new(
            SocialSettings {
                bearer_token: String::new(),
                ..Default::default()
            },
            Duration::from_secs(1),
            RetryPolicy::none(),
        )
        .unwrap();
        let p = QueryParameters::new("presidential", "USA", vec!["A".into()]);
        let limits = FetchLimits {
            since: Utc::now(),
            max_items: 10,
        };
        assert_eq!(
            adapter.fetch(&p, SourceKind::Social, limits).await,
            Err(FetchError::NotConfigured("SOCIAL_BEARER_TOKEN"))
        );
    }
}
