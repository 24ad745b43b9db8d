//! Error taxonomy for the analysis pipeline.
//!
//! Item-level failures (`FetchError`, `AnalysisError`, `ServiceError`) are absorbed close to
//! where they happen. Only `RunError` reaches the caller of a run.

use std::time::Duration;

/// Failures of the text-understanding service.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error("model call timed out after {0:?}")]
    Timeout(Duration),
    #[error("model quota exhausted: {0}")]
    Quota(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("model endpoint returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed model reply: {0}")]
    Malformed(String),
    #[error("text-understanding service is disabled")]
    Disabled,
}

impl ServiceError {
    /// Transient failures worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            ServiceError::Timeout(_) | ServiceError::Transport(_) => true,
            ServiceError::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// Failures while fetching raw items, either for one item or a whole adapter.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("source returned HTTP {0}")]
    Status(u16),
    #[error("could not parse source payload: {0}")]
    Parse(String),
    #[error("source is not configured: {0}")]
    NotConfigured(&'static str),
}

impl FetchError {
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Transport(_) => true,
            FetchError::Status(s) => *s == 429 || *s >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(s) => FetchError::Status(s.as_u16()),
            None if e.is_decode() => FetchError::Parse(e.to_string()),
            None => FetchError::Transport(e.to_string()),
        }
    }
}

/// Per-item analysis failure; stored as text on the item's record.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum AnalysisError {
    #[error("item has no text to analyze")]
    EmptyContent,
    #[error(transparent)]
    Service(#[from] ServiceError),
}

/// Query could not be turned into structured parameters.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("query is empty")]
    EmptyQuery,
    #[error("required field `{0}` is missing")]
    MissingField(&'static str),
    #[error("could not read parameters from model reply: {0}")]
    Malformed(String),
    #[error("query parser service failed: {0}")]
    Service(#[from] ServiceError),
}

/// Structurally invalid input to the aggregator.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum AggregationError {
    #[error("record {index} ({id}) belongs to {found} but aggregate is for {expected}")]
    WrongSource {
        index: usize,
        id: String,
        expected: &'static str,
        found: &'static str,
    },
    #[error("record {index} ({id}) carries neither an analysis nor an error")]
    EmptyRecord { index: usize, id: String },
}

/// Run-fatal failures surfaced to the caller of a pipeline run.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RunError {
    #[error("could not parse query: {0}")]
    Parse(#[from] ParseError),
    #[error("no items collected from any source ({adapter_errors} adapter errors)")]
    TotalCollectionFailure { adapter_errors: usize },
    #[error("aggregation failed: {0}")]
    Aggregation(#[from] AggregationError),
    #[error("run was cancelled")]
    Cancelled,
    #[error("run exceeded its deadline of {0:?}")]
    TimedOut(Duration),
}

impl RunError {
    /// Short, stable label used in metrics and API responses.
    pub fn kind(&self) -> &'static str {
        match self {
            RunError::Parse(_) => "parse_error",
            RunError::TotalCollectionFailure { .. } => "total_collection_failure",
            RunError::Aggregation(_) => "aggregation_error",
            RunError::Cancelled => "cancelled",
            RunError::TimedOut(_) => "timed_out",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(ServiceError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(ServiceError::Status {
            status: 503,
            body: String::new()
        }
        .is_retryable());
        assert!(!ServiceError::Status {
            status: 400,
            body: String::new()
        }
        .is_retryable());
        assert!(!ServiceError::Quota("daily".into()).is_retryable());
        assert!(FetchError::Status(429).is_retryable());
        assert!(!FetchError::Parse("x".into()).is_retryable());
    }

    #[test]
    fn run_error_kinds_are_distinct() {
        let parse = RunError::from(ParseError::MissingField("country"));
        let total = RunError::TotalCollectionFailure { adapter_errors: 2 };
        assert_eq!(parse.kind(), "parse_error");
        assert_eq!(total.kind(), "total_collection_failure");
        assert!(total.to_string().contains("2 adapter errors"));
    }
}
