//! Structured query parameters and the parser that derives them from natural language.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::analyze::ai_adapter::{extract_json_object, DynTextService};
use crate::error::ParseError;

/// Parameters of one election query. Immutable once a run starts.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueryParameters {
    pub election_type: String,
    pub country: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    /// Election date or timeframe, free-form ("2024-11-05", "autumn 2025").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default)]
    pub candidates: Vec<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub hashtags: Vec<String>,
}

impl QueryParameters {
    pub fn new<S: Into<String>>(election_type: S, country: S, candidates: Vec<String>) -> Self {
        Self {
            election_type: election_type.into(),
            country: country.into(),
            candidates,
            ..Default::default()
        }
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn with_date(mut self, date: impl Into<String>) -> Self {
        self.date = Some(date.into());
        self
    }

    pub fn with_keywords(mut self, keywords: Vec<String>) -> Self {
        self.keywords = keywords;
        self
    }

    pub fn with_hashtags(mut self, hashtags: Vec<String>) -> Self {
        self.hashtags = hashtags;
        self
    }

    /// Trim, de-duplicate and check the minimum fields (election_type, country, candidates).
    pub fn validate(mut self) -> Result<Self, ParseError> {
        self.election_type = self.election_type.trim().to_string();
        self.country = self.country.trim().to_string();
        self.region = non_empty(self.region);
        self.date = non_empty(self.date);
        self.candidates = dedup_case_insensitive(self.candidates);
        self.keywords = dedup_case_insensitive(self.keywords);
        self.hashtags = dedup_case_insensitive(
            self.hashtags
                .into_iter()
                .map(|h| {
                    let h = h.trim().trim_start_matches('#').to_string();
                    if h.is_empty() {
                        h
                    } else {
                        format!("#{h}")
                    }
                })
                .collect(),
        );

        if self.election_type.is_empty() {
            return Err(ParseError::MissingField("election_type"));
        }
        if self.country.is_empty() {
            return Err(ParseError::MissingField("country"));
        }
        if self.candidates.is_empty() {
            return Err(ParseError::MissingField("candidates"));
        }
        Ok(self)
    }
}

fn non_empty(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// Keeps the first spelling of each name, drops blanks.
pub(crate) fn dedup_case_insensitive(items: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::with_capacity(items.len());
    for it in items {
        let t = it.trim();
        if t.is_empty() {
            continue;
        }
        if seen.insert(t.to_lowercase()) {
            out.push(t.to_string());
        }
    }
    out
}

#[async_trait]
pub trait QueryParser: Send + Sync {
    async fn parse(&self, query: &str) -> Result<QueryParameters, ParseError>;
}

const PARSER_ROLE: &str = "You are an expert political analyst. Extract structured election \
parameters from the user's question. Reply with ONE JSON object and nothing else, using the keys: \
election_type, country, region, date, candidates (array of full names), keywords (array), \
hashtags (array). Use null for unknown scalar values and [] for unknown lists.";

/// Lenient mirror of the model's reply: nulls and missing lists are both accepted.
#[derive(Debug, Deserialize)]
struct ReplyParams {
    election_type: Option<String>,
    country: Option<String>,
    region: Option<String>,
    date: Option<String>,
    candidates: Option<Vec<String>>,
    keywords: Option<Vec<String>>,
    hashtags: Option<Vec<String>>,
}

/// Query parser backed by the text-understanding service.
pub struct ModelQueryParser {
    service: DynTextService,
}

impl ModelQueryParser {
    pub fn new(service: DynTextService) -> Self {
        Self { service }
    }
}

#[async_trait]
impl QueryParser for ModelQueryParser {
    async fn parse(&self, query: &str) -> Result<QueryParameters, ParseError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(ParseError::EmptyQuery);
        }
        info!(target: "query", chars = query.len(), "parsing query");

        let reply = self.service.invoke(PARSER_ROLE, query).await?;
        let value = extract_json_object(&reply)
            .ok_or_else(|| ParseError::Malformed("no JSON object in reply".to_string()))?;
        let raw: ReplyParams = serde_json::from_value(value).map_err(|e| {
            warn!(target: "query", error = %e, "parameter reply did not match schema");
            ParseError::Malformed(e.to_string())
        })?;

        let params = QueryParameters {
            election_type: raw.election_type.unwrap_or_default(),
            country: raw.country.unwrap_or_default(),
            region: raw.region,
            date: raw.date,
            candidates: raw.candidates.unwrap_or_default(),
            keywords: raw.keywords.unwrap_or_default(),
            hashtags: raw.hashtags.unwrap_or_default(),
        }
        .validate()?;

        info!(
            target: "query",
            election_type = %params.election_type,
            country = %params.country,
            candidates = params.candidates.len(),
            "extracted parameters"
        );
        Ok(params)
    }
}
