// src/ingest/providers/news_api.rs
//! NewsAPI `everything` search followed by a download of each article page.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use metrics::counter;
use serde::Deserialize;

use crate::config::pipeline::{NewsApiSettings, RetryPolicy};
use crate::error::FetchError;
use crate::ingest::types::{FetchLimits, NewsArticle, RawItem, SourceAdapter, SourceKind};
use crate::ingest::{build_search_expression, html_to_text, normalize_text, with_retry};
use crate::query::QueryParameters;

/// NewsAPI caps a page at 100 results.
const MAX_PAGE_SIZE: usize = 100;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchResponse {
    #[serde(default)]
    total_results: usize,
    #[serde(default)]
    articles: Vec<ApiArticle>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiArticle {
    url: Option<String>,
    title: Option<String>,
    description: Option<String>,
    published_at: Option<String>,
    source: Option<ApiSource>,
}

#[derive(Debug, Clone, Deserialize)]
struct ApiSource {
    name: Option<String>,
}

pub struct NewsApiAdapter {
    http: reqwest::Client,
    settings: NewsApiSettings,
    retry: RetryPolicy,
}

impl NewsApiAdapter {
    pub fn new(settings: NewsApiSettings, timeout: Duration, retry: RetryPolicy) -> anyhow::Result<Self> {
        Ok(Self {
            http: super::http_client(timeout)?,
            settings,
            retry,
        })
    }

    async fn search_page(
        &self,
        query: &str,
        since: DateTime<Utc>,
        page: usize,
        page_size: usize,
    ) -> Result<SearchResponse, FetchError> {
        let from = since.format("%Y-%m-%d").to_string();
        let page_s = page.to_string();
        let size_s = page_size.to_string();
        with_retry(self.retry, "news_api search", || {
            let req = self
                .http
                .get(&self.settings.endpoint)
                .header("X-Api-Key", &self.settings.api_key)
                .query(&[
                    ("q", query),
                    ("from", from.as_str()),
                    ("sortBy", "relevancy"),
                    ("language", self.settings.language.as_str()),
                    ("pageSize", size_s.as_str()),
                    ("page", page_s.as_str()),
                ]);
            async move {
                let resp = req.send().await?.error_for_status()?;
                resp.json::<SearchResponse>()
                    .await
                    .map_err(|e| FetchError::Parse(e.to_string()))
            }
        })
        .await
    }

    /// Download one article page and turn it into a raw item; `Err` skips the article.
    async fn download(&self, a: ApiArticle) -> Result<RawItem, (String, FetchError)> {
        let url = a
            .url
            .clone()
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| ("<missing url>".to_string(), FetchError::Parse("article without url".into())))?;

        let html = with_retry(self.retry, "news_api article", || {
            let req = self.http.get(&url);
            async move {
                let resp = req.send().await?.error_for_status()?;
                Ok::<_, FetchError>(resp.text().await?)
            }
        })
        .await
        .map_err(|e| (url.clone(), e))?;

        let mut text = html_to_text(&html);
        if text.is_empty() {
            // Fall back to the search snippet rather than dropping the article.
            text = normalize_text(a.description.as_deref().unwrap_or_default());
        }
        if text.is_empty() {
            return Err((url, FetchError::Parse("article page has no text".into())));
        }

        Ok(RawItem::News(NewsArticle {
            url,
            title: normalize_text(a.title.as_deref().unwrap_or_default()),
            text,
            published_at: a
                .published_at
                .as_deref()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|d| d.with_timezone(&Utc)),
            outlet: a.source.and_then(|s| s.name),
        }))
    }
}

#[async_trait]
impl SourceAdapter for NewsApiAdapter {
    async fn fetch(
        &self,
        params: &QueryParameters,
        kind: SourceKind,
        limits: FetchLimits,
    ) -> Result<Vec<RawItem>, FetchError> {
        if kind != SourceKind::News {
            return Ok(Vec::new());
        }
        if self.settings.api_key.is_empty() {
            return Err(FetchError::NotConfigured("NEWS_API_KEY"));
        }

        let query = build_search_expression(params, kind);
        let page_size = limits.max_items.min(MAX_PAGE_SIZE);
        let mut listed: Vec<ApiArticle> = Vec::new();
        let mut page = 1usize;
        loop {
            let resp = match self.search_page(&query, limits.since, page, page_size).await {
                Ok(r) => r,
                // Later pages failing still leave a usable first batch.
                Err(e) if page > 1 => {
                    tracing::warn!(target: "ingest", adapter = "news_api", page, error = %e, "search page failed");
                    break;
                }
                Err(e) => return Err(e),
            };
            let got = resp.articles.len();
            listed.extend(resp.articles);
            if got == 0 || listed.len() >= limits.max_items || page * page_size >= resp.total_results {
                break;
            }
            page += 1;
        }
        listed.truncate(limits.max_items);

        let results: Vec<_> = stream::iter(listed.into_iter().map(|a| self.download(a)))
            .buffered(self.settings.article_concurrency.max(1))
            .collect()
            .await;

        let mut out = Vec::with_capacity(results.len());
        for r in results {
            match r {
                Ok(item) => out.push(item),
                Err((url, e)) => {
                    tracing::warn!(target: "ingest", adapter = "news_api", %url, error = %e, "article skipped");
                    counter!("ingest_item_errors_total", "adapter" => "news_api").increment(1);
                }
            }
        }
        Ok(out)
    }

    fn kinds(&self) -> &'static [SourceKind] {
        &[SourceKind::News]
    }

    fn name(&self) -> &'static str {
        "news_api"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_response_tolerates_missing_fields() {
        let body = r#"{"status":"ok","totalResults":2,"articles":[
            {"source":{"id":null,"name":"Outlet"},"title":"Lee surges","url":"https://n.test/1",
             "publishedAt":"2024-10-01T12:00:00Z","description":"Snippet"},
            {"title":"No url"}]}"#;
        let r: SearchResponse = serde_json::from_str(body).unwrap();
        assert_eq!(r.total_results, 2);
        assert_eq!(r.articles.len(), 2);
        assert_eq!(
            r.articles[0].source.as_ref().and_then(|s| s.name.as_deref()),
            Some("Outlet")
        );
        assert!(r.articles[1].url.is_none());
    }

    #[tokio::test]
    async fn missing_key_is_an_adapter_error() {
        let adapter = NewsApiAdapter::new(
            NewsApiSettings {
                api_key: String::new(),
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
            adapter.fetch(&p, SourceKind::News, limits).await,
            Err(FetchError::NotConfigured("NEWS_API_KEY"))
        );
        assert_eq!(adapter.fetch(&p, SourceKind::Social, limits).await, Ok(Vec::new()));
    }

    #[tokio::test]
    async fn article_without_url_is_skipped_not_fatal() {
        let adapter = NewsApiAdapter::new(
            NewsApiSettings::default(),
            Duration::from_secs(1),
            RetryPolicy::none(),
        )
        .unwrap();
        let res = adapter
            .download(ApiArticle {
                url: None,
                title: Some("t".into()),
                description: None,
                published_at: None,
                source: None,
            })
            .await;
        assert!(matches!(res, Err((_, FetchError::Parse(_)))));
    }
}
