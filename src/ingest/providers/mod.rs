// src/ingest/providers/mod.rs
pub mod news_api;
pub mod news_rss;
pub mod social;

use std::sync::Arc;

use crate::config::pipeline::PipelineConfig;
use crate::ingest::types::SourceAdapter;

/// Build every adapter enabled in the sources section of the pipeline config.
pub fn build_enabled(cfg: &PipelineConfig) -> anyhow::Result<Vec<Arc<dyn SourceAdapter>>> {
    let mut out: Vec<Arc<dyn SourceAdapter>> = Vec::new();
    let s = &cfg.sources;
    if s.news_api.enabled {
        out.push(Arc::new(news_api::NewsApiAdapter::new(
            s.news_api.clone(),
            cfg.fetch_timeout(),
            cfg.retry,
        )?));
    }
    if s.news_rss.enabled {
        out.push(Arc::new(news_rss::NewsRssAdapter::from_url(
            &s.news_rss.url,
            cfg.fetch_timeout(),
            cfg.retry,
        )?));
    }
    if s.social.enabled {
        out.push(Arc::new(social::SocialSearchAdapter::new(
            s.social.clone(),
            cfg.fetch_timeout(),
            cfg.retry,
        )?));
    }
    tracing::info!(target: "ingest", adapters = out.len(), "source adapters ready");
    Ok(out)
}

/// Shared HTTP client settings for adapters.
pub(crate) fn http_client(timeout: std::time::Duration) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent("election-research-agent/0.1")
        .connect_timeout(std::time::Duration::from_secs(4))
        .timeout(timeout)
        .build()
}
