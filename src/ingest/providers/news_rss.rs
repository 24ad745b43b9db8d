// src/ingest/providers/news_rss.rs
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use metrics::{counter, histogram};
use quick_xml::de::from_str;
use serde::Deserialize;
use time::{format_description::well_known::Rfc2822, OffsetDateTime};

use crate::config::pipeline::RetryPolicy;
use crate::error::FetchError;
use crate::ingest::types::{FetchLimits, NewsArticle, RawItem, SourceAdapter, SourceKind};
use crate::ingest::{build_search_expression, normalize_text, with_retry};
use crate::query::QueryParameters;

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    item: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    description: Option<String>,
    source: Option<ItemSource>,
}

#[derive(Debug, Deserialize)]
struct ItemSource {
    #[serde(rename = "$text", default)]
    name: String,
}

fn parse_rfc2822(ts: &str) -> Option<DateTime<Utc>> {
    let dt = OffsetDateTime::parse(ts.trim(), &Rfc2822).ok()?;
    Utc.timestamp_opt(dt.unix_timestamp(), 0).single()
}

/// Some feeds ship HTML entities that are not valid XML.
fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
}

enum Mode {
    Fixture(String),
    Http {
        url: reqwest::Url,
        client: reqwest::Client,
        retry: RetryPolicy,
    },
}

/// News search over an RSS feed. The item description stands in for the article body.
pub struct NewsRssAdapter {
    mode: Mode,
}

impl NewsRssAdapter {
    /// Serve a fixed RSS document regardless of the query (tests, offline runs).
    pub fn from_fixture(content: &str) -> Self {
        Self {
            mode: Mode::Fixture(content.to_string()),
        }
    }

    pub fn from_url(url: &str, timeout: Duration, retry: RetryPolicy) -> anyhow::Result<Self> {
        let url = reqwest::Url::parse(url)?;
        let client = super::http_client(timeout)?;
        Ok(Self {
            mode: Mode::Http { url, client, retry },
        })
    }

    /// Parse an RSS document; items without a link or text are skipped.
    pub fn parse_items(xml: &str, limits: FetchLimits) -> Result<Vec<RawItem>, FetchError> {
        let t0 = std::time::Instant::now();
        let rss: Rss = from_str(&scrub_html_entities_for_xml(xml))
            .map_err(|e| FetchError::Parse(format!("rss xml: {e}")))?;

        let mut out = Vec::with_capacity(rss.channel.item.len().min(limits.max_items));
        for it in rss.channel.item {
            if out.len() >= limits.max_items {
                break;
            }
            let Some(url) = it.link.map(|l| l.trim().to_string()).filter(|l| !l.is_empty()) else {
                tracing::warn!(target: "ingest", adapter = "news_rss", "item without link skipped");
                counter!("ingest_item_errors_total", "adapter" => "news_rss").increment(1);
                continue;
            };
            let title = normalize_text(it.title.as_deref().unwrap_or_default());
            let text = normalize_text(it.description.as_deref().unwrap_or_default());
            if title.is_empty() && text.is_empty() {
                tracing::warn!(target: "ingest", adapter = "news_rss", %url, "empty item skipped");
                counter!("ingest_item_errors_total", "adapter" => "news_rss").increment(1);
                continue;
            }
            out.push(RawItem::News(NewsArticle {
                url,
                title,
                text,
                published_at: it.pub_date.as_deref().and_then(parse_rfc2822),
                outlet: it.source.map(|s| s.name.trim().to_string()).filter(|s| !s.is_empty()),
            }));
        }

        histogram!("ingest_parse_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
        Ok(out)
    }
}

#[async_trait]
impl SourceAdapter for NewsRssAdapter {
    async fn fetch(
        &self,
        params: &QueryParameters,
        kind: SourceKind,
        limits: FetchLimits,
    ) -> Result<Vec<RawItem>, FetchError> {
        if kind != SourceKind::News {
            return Ok(Vec::new());
        }
        match &self.mode {
            Mode::Fixture(s) => Self::parse_items(s, limits),
            Mode::Http { url, client, retry } => {
                let mut url = url.clone();
                url.query_pairs_mut()
                    .append_pair("q", &build_search_expression(params, kind));
                let body = with_retry(*retry, "news_rss", || {
                    let req = client.get(url.clone());
                    async move {
                        let resp = req.send().await?.error_for_status()?;
                        Ok::<_, FetchError>(resp.text().await?)
                    }
                })
                .await?;
                Self::parse_items(&body, limits)
            }
        }
    }

    fn kinds(&self) -> &'static [SourceKind] {
        &[SourceKind::News]
    }

    fn name(&self) -> &'static str {
        "news_rss"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEED: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>search</title>
<item><title>Lee leads in Ohio poll</title><link>https://news.test/a</link>
<pubDate>Tue, 01 Oct 2024 10:00:00 +0000</pubDate>
<description>&lt;p&gt;New polling shows Lee ahead&amp;nbsp;by 3 points.&lt;/p&gt;</description>
<source url="https://outlet.test">Outlet Daily</source></item>
<item><title>No link here</title></item>
<item><title>Park rallies voters</title><link>https://news.test/b</link>
<description>Crowds gather &ldquo;early&rdquo;.</description></item>
</channel></rss>"#;

    fn limits(max: usize) -> FetchLimits {
        FetchLimits {
            since: Utc::now() - chrono::Duration::days(7),
            max_items: max,
        }
    }

    #[test]
    fn parses_items_and_skips_broken_ones() {
        let items = NewsRssAdapter::parse_items(FEED, limits(10)).unwrap();
        assert_eq!(items.len(), 2);
        let RawItem::News(a) = &items[0] else {
            panic!("expected news item")
        };
        assert_eq!(a.url, "https://news.test/a");
        assert_eq!(a.text, "New polling shows Lee ahead by 3 points.");
        assert_eq!(a.outlet.as_deref(), Some("Outlet Daily"));
        assert_eq!(
            a.published_at.map(|d| d.to_rfc3339()),
            Some("2024-10-01T10:00:00+00:00".to_string())
        );
        let RawItem::News(b) = &items[1] else {
            panic!("expected news item")
        };
        assert_eq!(b.text, "Crowds gather \"early\".");
        assert!(b.published_at.is_none());
    }

    #[test]
    fn respects_item_cap_and_reports_bad_xml() {
        assert_eq!(NewsRssAdapter::parse_items(FEED, limits(1)).unwrap().len(), 1);
        assert!(matches!(
            NewsRssAdapter::parse_items("<rss><channel>", limits(5)),
            Err(FetchError::Parse(_))
        ));
    }

    #[tokio::test]
    async fn fixture_serves_news_only() {
        let adapter = NewsRssAdapter::from_fixture(FEED);
        let p = QueryParameters::new("presidential", "USA", vec!["Lee".into()]);
        assert_eq!(adapter.fetch(&p, SourceKind::News, limits(10)).await.unwrap().len(), 2);
        assert!(adapter.fetch(&p, SourceKind::Social, limits(10)).await.unwrap().is_empty());
    }
}
