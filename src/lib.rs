// src/lib.rs
// Public library surface for the service binary, the one-shot runner and integration tests.

pub mod aggregate;
pub mod analyze;
pub mod api;
pub mod config;
pub mod error;
pub mod history;
pub mod ingest;
pub mod metrics;
pub mod model_asset;
pub mod pipeline;
pub mod predict;
pub mod query;
pub mod report;

// ---- Re-exports for stable public API ----
pub use analyze::ai_adapter;
pub use crate::api::router;
pub use crate::error::RunError;
pub use crate::pipeline::{CancelHandle, Pipeline, RunResult};

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

// Components log under short targets ("pipeline", "ingest", ...), not the crate path.
const DEFAULT_FILTER: &str = "warn,election_research_agent=info,pipeline=info,ingest=info,\
analyze=info,aggregate=info,predict=info,query=info,llm=info,api=info,report=info,model_asset=info";

/// Install the global tracing subscriber. `LOG_FORMAT=json` switches to JSON lines.
/// Safe to call more than once; later calls are no-ops.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let res = if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact())
            .try_init()
    };
    if res.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}
