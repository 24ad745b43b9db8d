// src/config/pipeline.rs
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_PIPELINE_CONFIG_PATH: &str = "PIPELINE_CONFIG_PATH";
pub const DEFAULT_PIPELINE_CONFIG_PATH: &str = "config/pipeline.toml";

const ENV_NEWS_API_KEY: &str = "NEWS_API_KEY";
const ENV_SOCIAL_BEARER_TOKEN: &str = "SOCIAL_BEARER_TOKEN";

/// Transport retry policy shared by source adapters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff_ms: 400,
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            backoff_ms: 0,
        }
    }

    /// Linear backoff: attempt 1 waits `backoff_ms`, attempt 2 waits twice that, ...
    pub fn delay_for(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.backoff_ms.saturating_mul(attempt as u64))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct NewsApiSettings {
    pub enabled: bool,
    pub endpoint: String,
    pub language: String,
    /// "ENV" resolves from NEWS_API_KEY.
    pub api_key: String,
    /// Concurrent article page downloads.
    pub article_concurrency: usize,
}

impl Default for NewsApiSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: "https://newsapi.org/v2/everything".to_string(),
            language: "en".to_string(),
            api_key: "ENV".to_string(),
            article_concurrency: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct NewsRssSettings {
    pub enabled: bool,
    /// Search feed URL; the search expression is appended as the `q` parameter.
    pub url: String,
}

impl Default for NewsRssSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            url: "https://news.google.com/rss/search?hl=en-US&gl=US&ceid=US:en".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SocialSettings {
    pub enabled: bool,
    pub endpoint: String,
    /// "ENV" resolves from SOCIAL_BEARER_TOKEN.
    pub bearer_token: String,
    pub page_size: usize,
    pub language: String,
}

impl Default for SocialSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: "https://api.twitter.com/2/tweets/search/recent".to_string(),
            bearer_token: "ENV".to_string(),
            page_size: 100,
            language: "en".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SourcesConfig {
    pub news_api: NewsApiSettings,
    pub news_rss: NewsRssSettings,
    pub social: SocialSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Only items published within this many days are kept.
    pub recency_days: i64,
    /// Hard cap on items per source kind per run.
    pub max_items_per_source: usize,
    pub analysis_concurrency: usize,
    pub fetch_timeout_secs: u64,
    pub retry: RetryPolicy,
    /// Upper bound on chunk summaries the aggregator requests before giving up and truncating.
    pub max_summary_chunks: usize,
    /// Optional deadline for a whole run.
    pub run_timeout_secs: Option<u64>,
    pub reports_dir: PathBuf,
    pub sources: SourcesConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            recency_days: 7,
            max_items_per_source: 1000,
            analysis_concurrency: 8,
            fetch_timeout_secs: 15,
            retry: RetryPolicy::default(),
            max_summary_chunks: 8,
            run_timeout_secs: None,
            reports_dir: PathBuf::from("reports"),
            sources: SourcesConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Load from an explicit TOML path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading pipeline config from {}", path.display()))?;
        Self::parse(&content)
    }

    /// Load using env var + fallbacks:
    /// 1) $PIPELINE_CONFIG_PATH
    /// 2) config/pipeline.toml
    /// 3) built-in defaults
    pub fn load_default() -> Result<Self> {
        if let Ok(p) = std::env::var(ENV_PIPELINE_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if pb.exists() {
                return Self::load_from(&pb);
            }
            return Err(anyhow!(
                "PIPELINE_CONFIG_PATH points to non-existent path"
            ));
        }
        let p = PathBuf::from(DEFAULT_PIPELINE_CONFIG_PATH);
        if p.exists() {
            return Self::load_from(&p);
        }
        Ok(Self::default().sanitized())
    }

    pub fn parse(s: &str) -> Result<Self> {
        let cfg: PipelineConfig = toml::from_str(s).context("parsing pipeline toml")?;
        Ok(cfg.sanitized())
    }

    /// Keep every knob in a usable range.
    pub fn sanitized(mut self) -> Self {
        self.recency_days = self.recency_days.clamp(1, 365);
        self.max_items_per_source = self.max_items_per_source.max(1);
        self.analysis_concurrency = self.analysis_concurrency.clamp(1, 64);
        self.fetch_timeout_secs = self.fetch_timeout_secs.max(1);
        self.max_summary_chunks = self.max_summary_chunks.max(1);
        self.sources.news_api.article_concurrency =
            self.sources.news_api.article_concurrency.clamp(1, 32);
        self.sources.social.page_size = self.sources.social.page_size.clamp(10, 100);
        if self.run_timeout_secs == Some(0) {
            self.run_timeout_secs = None;
        }
        self
    }

    /// Replace "ENV" placeholders with values from the environment (empty when unset).
    pub fn with_env_secrets(mut self) -> Self {
        if self.sources.news_api.api_key.trim().eq_ignore_ascii_case("env") {
            self.sources.news_api.api_key = std::env::var(ENV_NEWS_API_KEY).unwrap_or_default();
        }
        if self.sources.social.bearer_token.trim().eq_ignore_ascii_case("env") {
            self.sources.social.bearer_token =
                std::env::var(ENV_SOCIAL_BEARER_TOKEN).unwrap_or_default();
        }
        self
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout_secs.map(Duration::from_secs)
    }
}
