//! Text-understanding adapter: service abstraction, providers, file cache + daily limit,
//! and a timeout/retry wrapper.

use std::fs;
use std::future::Future;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::ai::AiConfig;
use crate::error::ServiceError;

// ------------------------------------------------------------
// Public surface
// ------------------------------------------------------------

pub type ServiceFuture<'a> = Pin<Box<dyn Future<Output = Result<String, ServiceError>> + Send + 'a>>;

/// A model invocation: fixed system role plus user content in, free text out.
pub trait TextService: Send + Sync {
    fn invoke<'a>(&'a self, system_role: &'a str, content: &'a str) -> ServiceFuture<'a>;
    /// Provider name for diagnostics.
    fn provider_name(&self) -> &'static str;
}

/// Convenient alias used by callers.
pub type DynTextService = Arc<dyn TextService>;

/// Factory: build a service according to config and environment variables.
///
/// * If `AI_TEST_MODE=mock`, returns a deterministic mock provider.
/// * Else if `config.enabled==false`, returns a disabled service.
/// * Else builds the real provider wrapped with caching + daily limit + timeout/retry.
pub fn build_service_from_config(config: &AiConfig) -> anyhow::Result<DynTextService> {
    let test_mock = std::env::var("AI_TEST_MODE")
        .map(|v| v == "mock")
        .unwrap_or(false);

    if test_mock || (config.enabled && config.provider == "mock") {
        let mock = MockProvider {
            fixed: "Neutral analysis (mock).".to_string(),
        };
        return Ok(Arc::new(wrap(mock, config)));
    }

    if !config.enabled {
        return Ok(Arc::new(DisabledService));
    }

    match config.provider.as_str() {
        "openai" | "local" => {
            let provider = OpenAiProvider::new(config)?;
            Ok(Arc::new(wrap(provider, config)))
        }
        other => anyhow::bail!("Unsupported provider in config: {other}"),
    }
}

fn wrap<P: Provider>(provider: P, config: &AiConfig) -> ResilientService<CachingService<P>> {
    let cached = CachingService::new(
        provider,
        config.cache_dir.clone(),
        config.daily_limit,
        config.max_output_chars,
    );
    ResilientService::new(
        cached,
        Duration::from_secs(config.timeout_secs),
        config.max_retries,
        Duration::from_millis(config.retry_backoff_ms),
    )
}

// ------------------------------------------------------------
// Provider abstraction + concrete providers
// ------------------------------------------------------------

/// Low-level provider: does a *real* remote call. Separated so we can reuse the same
/// caching wrapper for production and tests.
pub trait Provider: Send + Sync + 'static {
    fn fetch<'a>(&'a self, system_role: &'a str, content: &'a str) -> ServiceFuture<'a>;
    fn name(&self) -> &'static str;
}

/// Chat Completions provider. Works against the hosted API or an OpenAI-compatible local server.
pub struct OpenAiProvider {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    timeout: Duration,
    local: bool,
}

impl OpenAiProvider {
    pub fn new(config: &AiConfig) -> anyhow::Result<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let http = reqwest::Client::builder()
            .user_agent("election-research-agent/0.1")
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            timeout,
            local: config.provider == "local",
        })
    }
}

impl Provider for OpenAiProvider {
    fn fetch<'a>(&'a self, system_role: &'a str, content: &'a str) -> ServiceFuture<'a> {
        Box::pin(async move {
            #[derive(Serialize)]
            struct Msg<'a> {
                role: &'a str,
                content: &'a str,
            }
            #[derive(Serialize)]
            struct Req<'a> {
                model: &'a str,
                messages: Vec<Msg<'a>>,
                temperature: f32,
                max_tokens: u32,
            }
            #[derive(Deserialize)]
            struct Resp {
                choices: Vec<Choice>,
            }
            #[derive(Deserialize)]
            struct Choice {
                message: ChoiceMsg,
            }
            #[derive(Deserialize)]
            struct ChoiceMsg {
                content: Option<String>,
            }

            let req = Req {
                model: &self.model,
                messages: vec![
                    Msg {
                        role: "system",
                        content: system_role,
                    },
                    Msg {
                        role: "user",
                        content,
                    },
                ],
                temperature: self.temperature,
                max_tokens: self.max_tokens,
            };

            let mut builder = self.http.post(&self.endpoint).json(&req);
            if !self.api_key.is_empty() {
                builder = builder.bearer_auth(&self.api_key);
            }
            let resp = builder.send().await.map_err(|e| {
                if e.is_timeout() {
                    ServiceError::Timeout(self.timeout)
                } else {
                    ServiceError::Transport(e.to_string())
                }
            })?;

            let status = resp.status();
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                return Err(ServiceError::Status {
                    status: status.as_u16(),
                    body: body.chars().take(200).collect(),
                });
            }
            let body: Resp = resp
                .json()
                .await
                .map_err(|e| ServiceError::Malformed(e.to_string()))?;
            body.choices
                .into_iter()
                .next()
                .and_then(|c| c.message.content)
                .filter(|c| !c.trim().is_empty())
                .ok_or_else(|| ServiceError::Malformed("empty completion".to_string()))
        })
    }
    fn name(&self) -> &'static str {
        if self.local {
            "local"
        } else {
            "openai"
        }
    }
}

/// Fails every call; used when the model is disabled.
pub struct DisabledService;

impl TextService for DisabledService {
    fn invoke<'a>(&'a self, _system_role: &'a str, _content: &'a str) -> ServiceFuture<'a> {
        Box::pin(async { Err(ServiceError::Disabled) })
    }
    fn provider_name(&self) -> &'static str {
        "disabled"
    }
}

/// Simple mock provider for local runs behind the caching wrapper.
#[derive(Clone)]
pub struct MockProvider {
    pub fixed: String,
}

impl Provider for MockProvider {
    fn fetch<'a>(&'a self, _system_role: &'a str, _content: &'a str) -> ServiceFuture<'a> {
        let out = self.fixed.clone();
        Box::pin(async move { Ok(out) })
    }
    fn name(&self) -> &'static str {
        "mock"
    }
}

/// Returns the same reply for every call, without cache or quota. Handy in tests and demos.
#[derive(Clone, Debug)]
pub struct CannedService {
    reply: String,
}

impl CannedService {
    pub fn new(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
        }
    }
}

impl TextService for CannedService {
    fn invoke<'a>(&'a self, _system_role: &'a str, _content: &'a str) -> ServiceFuture<'a> {
        let out = self.reply.clone();
        Box::pin(async move { Ok(out) })
    }
    fn provider_name(&self) -> &'static str {
        "canned"
    }
}

// ------------------------------------------------------------
// Caching wrapper (file cache + daily limit)
// ------------------------------------------------------------

/// Counter state is guarded by a `Mutex`; cache files are written via temp file + rename.
pub struct CachingService<P: Provider> {
    inner: P,
    cache_dir: PathBuf,
    daily_limit_max: u32,
    max_output_chars: usize,
    counter: Mutex<DailyCounter>,
}

impl<P: Provider> CachingService<P> {
    pub fn new(inner: P, cache_dir: PathBuf, daily_limit_max: u32, max_output_chars: usize) -> Self {
        let _ = fs::create_dir_all(&cache_dir); // best-effort
        let counter = Mutex::new(load_daily_counter(&cache_dir).unwrap_or_default());
        Self {
            inner,
            cache_dir,
            daily_limit_max,
            max_output_chars,
            counter,
        }
    }

    fn reserve_slot(&self) -> Result<(), ServiceError> {
        let mut g = self.counter.lock().unwrap_or_else(|e| e.into_inner());
        if g.is_expired() {
            g.reset_to_today();
        }
        if g.count >= self.daily_limit_max {
            return Err(ServiceError::Quota(format!(
                "daily limit of {} calls reached",
                self.daily_limit_max
            )));
        }
        g.count += 1;
        let _ = save_daily_counter(&self.cache_dir, &g);
        Ok(())
    }

    fn release_slot(&self) {
        let mut g = self.counter.lock().unwrap_or_else(|e| e.into_inner());
        g.count = g.count.saturating_sub(1);
        let _ = save_daily_counter(&self.cache_dir, &g);
    }

    async fn invoke_impl(&self, system_role: &str, content: &str) -> Result<String, ServiceError> {
        // 1) Cache lookup; hits never count against the limit.
        let key = cache_key(system_role, content);
        if let Some(hit) = read_cache_file(&self.cache_dir, &key) {
            counter!("llm_cache_hits_total").increment(1);
            return Ok(hit.reply);
        }

        // 2) Daily limit. The slot is reserved before the call so concurrent callers
        // cannot all pass the check; it is handed back if the call fails.
        self.reserve_slot()?;

        // 3) Real call.
        let reply = match self.inner.fetch(system_role, content).await {
            Ok(raw) => clean_reply(&raw, self.max_output_chars),
            Err(e) => {
                self.release_slot();
                return Err(e);
            }
        };
        if reply.is_empty() {
            self.release_slot();
            return Err(ServiceError::Malformed("reply was empty after cleanup".to_string()));
        }
        let _ = write_cache_file(
            &self.cache_dir,
            &key,
            &CacheEntry {
                reply: reply.clone(),
            },
        );
        Ok(reply)
    }
}

impl<P: Provider> TextService for CachingService<P> {
    fn invoke<'a>(&'a self, system_role: &'a str, content: &'a str) -> ServiceFuture<'a> {
        Box::pin(self.invoke_impl(system_role, content))
    }
    fn provider_name(&self) -> &'static str {
        self.inner.name()
    }
}

// ------------------------------------------------------------
// Timeout + retry wrapper
// ------------------------------------------------------------

pub struct ResilientService<S: TextService> {
    inner: S,
    timeout: Duration,
    max_retries: u32,
    backoff: Duration,
}

impl<S: TextService> ResilientService<S> {
    pub fn new(inner: S, timeout: Duration, max_retries: u32, backoff: Duration) -> Self {
        Self {
            inner,
            timeout,
            max_retries,
            backoff,
        }
    }

    async fn invoke_impl(&self, system_role: &str, content: &str) -> Result<String, ServiceError> {
        let provider = self.inner.provider_name();
        let mut attempt = 0u32;
        loop {
            let t0 = Instant::now();
            let res = match tokio::time::timeout(self.timeout, self.inner.invoke(system_role, content))
                .await
            {
                Ok(r) => r,
                Err(_) => Err(ServiceError::Timeout(self.timeout)),
            };
            histogram!("llm_call_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
            counter!("llm_calls_total", "provider" => provider).increment(1);

            match res {
                Ok(reply) => return Ok(reply),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    tracing::warn!(target: "llm", provider, attempt, error = %e, "retrying model call");
                    tokio::time::sleep(self.backoff * attempt).await;
                }
                Err(e) => {
                    counter!("llm_call_errors_total", "provider" => provider).increment(1);
                    return Err(e);
                }
            }
        }
    }
}

impl<S: TextService> TextService for ResilientService<S> {
    fn invoke<'a>(&'a self, system_role: &'a str, content: &'a str) -> ServiceFuture<'a> {
        Box::pin(self.invoke_impl(system_role, content))
    }
    fn provider_name(&self) -> &'static str {
        self.inner.provider_name()
    }
}

// ------------------------------------------------------------
// File cache helpers
// ------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    reply: String,
}

fn cache_key(system_role: &str, content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(system_role.as_bytes());
    hasher.update([0u8]);
    hasher.update(content.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(32);
    for b in digest.iter().take(16) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

fn cache_path(dir: &Path, key: &str) -> PathBuf {
    dir.join(format!("{key}.json"))
}

fn read_cache_file(dir: &Path, key: &str) -> Option<CacheEntry> {
    let path = cache_path(dir, key);
    let mut file = fs::File::open(path).ok()?;
    let mut buf = String::new();
    file.read_to_string(&mut buf).ok()?;
    serde_json::from_str(&buf).ok()
}

fn write_cache_file(dir: &Path, key: &str, value: &CacheEntry) -> io::Result<()> {
    let path = cache_path(dir, key);
    let tmp = path.with_extension("json.tmp");
    let json = serde_json::to_string(value).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let mut f = fs::File::create(&tmp)?;
    f.write_all(json.as_bytes())?;
    fs::rename(tmp, path)?;
    Ok(())
}

// ------------------------------------------------------------
// Daily counter helpers
// ------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DailyCounter {
    date: String,
    count: u32,
}
impl Default for DailyCounter {
    fn default() -> Self {
        Self {
            date: today(),
            count: 0,
        }
    }
}
impl DailyCounter {
    fn is_expired(&self) -> bool {
        self.date != today()
    }
    fn reset_to_today(&mut self) {
        self.date = today();
        self.count = 0;
    }
}

fn today() -> String {
    chrono::Utc::now().format("%Y-%m-%d").to_string()
}

fn counter_path(dir: &Path) -> PathBuf {
    dir.join("daily_count.json")
}

fn load_daily_counter(dir: &Path) -> io::Result<DailyCounter> {
    let s = fs::read_to_string(counter_path(dir))?;
    serde_json::from_str(&s).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

fn save_daily_counter(dir: &Path, dc: &DailyCounter) -> io::Result<()> {
    let p = counter_path(dir);
    let tmp = p.with_extension("json.tmp");
    let s = serde_json::to_string(dc).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let mut f = fs::File::create(&tmp)?;
    f.write_all(s.as_bytes())?;
    fs::rename(tmp, p)?;
    Ok(())
}

// ------------------------------------------------------------
// Reply helpers
// ------------------------------------------------------------

/// Strip control characters (newlines kept), normalize line endings, cap length.
pub fn clean_reply(input: &str, max_chars: usize) -> String {
    let mut out = String::with_capacity(input.len().min(max_chars));
    for ch in input.replace("\r\n", "\n").chars() {
        let c = match ch {
            '\n' => '\n',
            '\t' => ' ',
            c if c.is_control() => continue,
            c => c,
        };
        out.push(c);
    }
    let trimmed = out.trim();
    if trimmed.chars().count() > max_chars {
        trimmed.chars().take(max_chars).collect::<String>().trim_end().to_string()
    } else {
        trimmed.to_string()
    }
}

/// Truncate to at most `max_chars` characters on a char boundary.
pub fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Pull the first balanced JSON object out of a model reply (code fences and prose tolerated).
pub fn extract_json_object(reply: &str) -> Option<serde_json::Value> {
    let bytes = reply.as_bytes();
    let mut start = 0usize;
    while let Some(rel) = reply[start..].find('{') {
        let open = start + rel;
        let mut depth = 0i32;
        let mut in_str = false;
        let mut escaped = false;
        for (i, &b) in bytes.iter().enumerate().skip(open) {
            if in_str {
                match b {
                    _ if escaped => escaped = false,
                    b'\\' => escaped = true,
                    b'"' => in_str = false,
                    _ => {}
                }
                continue;
            }
            match b {
                b'"' => in_str = true,
                b'{' => depth += 1,
                b'}' => {
                    depth -= 1;
                    if depth == 0 {
                        if let Ok(v) = serde_json::from_str::<serde_json::Value>(&reply[open..=i]) {
                            if v.is_object() {
                                return Some(v);
                            }
                        }
                        break;
                    }
                }
                _ => {}
            }
        }
        start = open + 1;
    }
    None
}
