// src/ingest/mod.rs
pub mod providers;
pub mod types;

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::future::join_all;
use metrics::{counter, describe_counter, describe_histogram, histogram};
use once_cell::sync::OnceCell;

use crate::config::pipeline::{PipelineConfig, RetryPolicy};
use crate::error::FetchError;
use crate::ingest::types::{FetchLimits, RawItem, SourceAdapter, SourceKind};
use crate::query::QueryParameters;

/// One-time metrics registration (so series show up on /metrics).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("ingest_items_total", "Items kept after collection, by source kind.");
        describe_counter!(
            "ingest_item_errors_total",
            "Individual items skipped because they could not be fetched or parsed."
        );
        describe_counter!(
            "ingest_adapter_errors_total",
            "Whole-adapter fetch failures."
        );
        describe_counter!(
            "ingest_dropped_total",
            "Items dropped as stale, duplicate or over the cap."
        );
        describe_histogram!("ingest_fetch_ms", "Adapter fetch time in milliseconds.");
    });
}

/// Normalize text: decode entities, strip tags, ASCII quotes, collapse whitespace.
pub fn normalize_text(s: &str) -> String {
    // 1) HTML entity decode
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags
    static RE_TAGS: OnceCell<regex::Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").unwrap());
    out = re_tags.replace_all(&out, " ").to_string();

    // 3) Normalize “ ” ‘ ’ « » to ASCII quotes
    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    // 4) Collapse whitespace
    static RE_WS: OnceCell<regex::Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").unwrap());
    re_ws.replace_all(&out, " ").trim().to_string()
}

/// Extract readable article text from an HTML page: paragraph contents, scripts/styles removed.
pub fn html_to_text(html: &str) -> String {
    static RE_DROP: OnceCell<regex::Regex> = OnceCell::new();
    static RE_PARA: OnceCell<regex::Regex> = OnceCell::new();
    let re_drop = RE_DROP.get_or_init(|| {
        regex::Regex::new(r"(?is)<(script|style|noscript|nav|header|footer|aside)\b.*?</\s*(script|style|noscript|nav|header|footer|aside)\s*>").unwrap()
    });
    let re_para = RE_PARA.get_or_init(|| regex::Regex::new(r"(?is)<p\b[^>]*>(.*?)</p\s*>").unwrap());

    let cleaned = re_drop.replace_all(html, " ");
    let paragraphs: Vec<String> = re_para
        .captures_iter(&cleaned)
        .filter_map(|c| c.get(1))
        .map(|m| normalize_text(m.as_str()))
        .filter(|p| p.split_whitespace().count() >= 5)
        .collect();

    if paragraphs.is_empty() {
        normalize_text(&cleaned)
    } else {
        paragraphs.join("\n\n")
    }
}

/// Conjunction of election_type, country, region, quoted candidates and the
/// kind-specific terms (keywords for news, hashtags for social).
pub fn build_search_expression(params: &QueryParameters, kind: SourceKind) -> String {
    let mut terms: Vec<String> = Vec::new();
    for t in [Some(&params.election_type), Some(&params.country), params.region.as_ref()]
        .into_iter()
        .flatten()
    {
        if !t.trim().is_empty() {
            terms.push(t.trim().to_string());
        }
    }
    terms.extend(params.candidates.iter().map(|c| format!("\"{}\"", c.trim())));

    match kind {
        SourceKind::News => {
            terms.extend(params.keywords.iter().map(|k| k.trim().to_string()));
            terms.join(" AND ")
        }
        SourceKind::Social => {
            terms.extend(params.hashtags.iter().map(|h| h.trim().to_string()));
            let mut q = terms.join(" ");
            q.push_str(" -is:retweet");
            q
        }
    }
}

/// Retry a transport operation on transient errors with linear backoff.
pub(crate) async fn with_retry<T, F, Fut>(policy: RetryPolicy, what: &str, mut op: F) -> Result<T, FetchError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_retryable() && attempt < policy.max_retries => {
                attempt += 1;
                tracing::debug!(target: "ingest", what, attempt, error = %e, "retrying fetch");
                tokio::time::sleep(policy.delay_for(attempt)).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Items of one kind gathered from every adapter that serves it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Collected {
    pub items: Vec<RawItem>,
    pub adapter_errors: usize,
}

/// Dispatches a fetch to the registered adapters and enforces the recency window and item cap.
#[derive(Clone)]
pub struct Collector {
    adapters: Vec<Arc<dyn SourceAdapter>>,
    recency: chrono::Duration,
    max_items: usize,
}

impl Collector {
    pub fn new(adapters: Vec<Arc<dyn SourceAdapter>>, cfg: &PipelineConfig) -> Self {
        Self::with_limits(adapters, cfg.recency_days, cfg.max_items_per_source)
    }

    pub fn with_limits(
        adapters: Vec<Arc<dyn SourceAdapter>>,
        recency_days: i64,
        max_items: usize,
    ) -> Self {
        Self {
            adapters,
            recency: chrono::Duration::days(recency_days.max(1)),
            max_items: max_items.max(1),
        }
    }

    pub fn adapter_names(&self) -> Vec<&'static str> {
        self.adapters.iter().map(|a| a.name()).collect()
    }

    pub async fn fetch(&self, params: &QueryParameters, kind: SourceKind) -> Collected {
        ensure_metrics_described();

        let limits = FetchLimits {
            since: Utc::now() - self.recency,
            max_items: self.max_items,
        };

        let serving: Vec<&Arc<dyn SourceAdapter>> = self
            .adapters
            .iter()
            .filter(|a| a.kinds().contains(&kind))
            .collect();

        let results = join_all(serving.iter().map(|a| async move {
            let t0 = Instant::now();
            let res = a.fetch(params, kind, limits).await;
            histogram!("ingest_fetch_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
            (a.name(), res)
        }))
        .await;

        let mut out = Collected::default();
        let mut seen: HashSet<String> = HashSet::new();
        let mut dropped = 0usize;
        for (name, res) in results {
            match res {
                Ok(items) => {
                    for it in items {
                        let stale = it.timestamp().is_some_and(|ts| ts < limits.since);
                        if it.kind() != kind
                            || stale
                            || out.items.len() >= self.max_items
                            || !seen.insert(it.identifier().to_string())
                        {
                            dropped += 1;
                            continue;
                        }
                        out.items.push(it);
                    }
                }
                Err(e) => {
                    tracing::warn!(target: "ingest", error = %e, adapter = name, kind = %kind, "adapter error");
                    counter!("ingest_adapter_errors_total", "adapter" => name).increment(1);
                    out.adapter_errors += 1;
                }
            }
        }

        counter!("ingest_items_total", "kind" => kind.as_str()).increment(out.items.len() as u64);
        counter!("ingest_dropped_total").increment(dropped as u64);
        tracing::info!(
            target: "ingest",
            kind = %kind,
            adapters = serving.len(),
            kept = out.items.len(),
            dropped,
            errors = out.adapter_errors,
            "collection finished"
        );
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::types::{NewsArticle, SocialPost};

    fn params() -> QueryParameters {
        QueryParameters::new("presidential", "USA", vec!["Ann Lee".into(), "Bo Park".into()])
            .with_region("Ohio")
            .with_keywords(vec!["polls".into()])
            .with_hashtags(vec!["#vote".into()])
    }

    #[test]
    fn normalize_text_decodes_and_collapses() {
        let s = "  <b>Hello</b>,&nbsp;&nbsp; “world”  ";
        assert_eq!(normalize_text(s), "Hello , \"world\"");
    }

    #[test]
    fn html_to_text_prefers_paragraphs() {
        let html = r#"<html><script>var x = "<p>not this</p>";</script>
            <p>The first paragraph has enough words to count.</p>
            <p>Short.</p>
            <p>Second   real paragraph &amp; it also has words.</p></html>"#;
        let text = html_to_text(html);
        assert_eq!(
            text,
            "The first paragraph has enough words to count.\n\nSecond real paragraph & it also has words."
        );
    }

    #[test]
    fn search_expression_per_kind() {
        let p = params();
        assert_eq!(
            build_search_expression(&p, SourceKind::News),
            r#"presidential AND USA AND Ohio AND "Ann Lee" AND "Bo Park" AND polls"#
        );
        assert_eq!(
            build_search_expression(&p, SourceKind::Social),
            r#"presidential USA Ohio "Ann Lee" "Bo Park" #vote -is:retweet"#
        );
    }

    struct Fixed {
        items: Vec<RawItem>,
    }

    #[async_trait::async_trait]
    impl SourceAdapter for Fixed {
        async fn fetch(
            &self,
            _p: &QueryParameters,
            kind: SourceKind,
            _l: FetchLimits,
        ) -> Result<Vec<RawItem>, FetchError> {
            Ok(self.items.iter().filter(|i| i.kind() == kind).cloned().collect())
        }
        fn kinds(&self) -> &'static [SourceKind] {
            &[SourceKind::News, SourceKind::Social]
        }
        fn name(&self) -> &'static str {
            "fixed"
        }
    }

    struct Broken;

    #[async_trait::async_trait]
    impl SourceAdapter for Broken {
        async fn fetch(
            &self,
            _p: &QueryParameters,
            _k: SourceKind,
            _l: FetchLimits,
        ) -> Result<Vec<RawItem>, FetchError> {
            Err(FetchError::Status(500))
        }
        fn kinds(&self) -> &'static [SourceKind] {
            &[SourceKind::News]
        }
        fn name(&self) -> &'static str {
            "broken"
        }
    }

    fn article(url: &str, days_old: i64) -> RawItem {
        RawItem::News(NewsArticle {
            url: url.into(),
            title: "t".into(),
            text: "body".into(),
            published_at: Some(Utc::now() - chrono::Duration::days(days_old)),
            outlet: None,
        })
    }

    #[tokio::test]
    async fn collector_enforces_window_dedup_and_cap() {
        let items = vec![
            article("u1", 1),
            article("u1", 1),
            article("old", 30),
            article("u2", 2),
            article("u3", 3),
            RawItem::Social(SocialPost {
                id: "p1".into(),
                text: "post".into(),
                author: None,
                created_at: None,
                engagement: Default::default(),
            }),
        ];
        let collector = Collector::with_limits(
            vec![Arc::new(Fixed { items }), Arc::new(Broken)],
            7,
            2,
        );
        let news = collector.fetch(&params(), SourceKind::News).await;
        let ids: Vec<&str> = news.items.iter().map(|i| i.identifier()).collect();
        assert_eq!(ids, vec!["u1", "u2"]);
        assert_eq!(news.adapter_errors, 1);

        let social = collector.fetch(&params(), SourceKind::Social).await;
        assert_eq!(social.items.len(), 1);
        assert_eq!(social.adapter_errors, 0);
    }

    #[tokio::test]
    async fn with_retry_stops_on_permanent_errors() {
        let mut calls = 0;
        let res: Result<(), FetchError> = with_retry(
            RetryPolicy {
                max_retries: 3,
                backoff_ms: 1,
            },
            "test",
            || {
                calls += 1;
                let n = calls;
                async move {
                    if n < 3 {
                        Err(FetchError::Transport("reset".into()))
                    } else {
                        Err(FetchError::Status(404))
                    }
                }
            },
        )
        .await;
        assert_eq!(res, Err(FetchError::Status(404)));
        assert_eq!(calls, 3);
    }
}
