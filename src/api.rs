use std::sync::Arc;

use serde::{Deserialize, Serialize};
use shuttle_axum::axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::CorsLayer;

use crate::error::RunError;
use crate::history::{RunHistory, RunSummary};
use crate::pipeline::{Pipeline, RunResult};
use crate::query::QueryParameters;

const RECENT_RUNS: usize = 10;

#[derive(Clone)]
pub struct AppState {
    pipeline: Arc<Pipeline>,
    history: Arc<RunHistory>,
}

impl AppState {
    pub fn new(pipeline: Pipeline) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            history: Arc::new(RunHistory::with_capacity(200)),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/run", post(run_query))
        .route("/run/parameters", post(run_parameters))
        .route("/runs/recent", get(recent_runs))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

#[derive(Deserialize)]
struct RunReq {
    query: String,
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

/// A run-fatal error as an HTTP response.
pub struct ApiError(pub RunError);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self.0 {
            RunError::Parse(_) => StatusCode::UNPROCESSABLE_ENTITY,
            RunError::TotalCollectionFailure { .. } => StatusCode::SERVICE_UNAVAILABLE,
            RunError::Aggregation(_) => StatusCode::INTERNAL_SERVER_ERROR,
            RunError::Cancelled | RunError::TimedOut(_) => StatusCode::GATEWAY_TIMEOUT,
        }
    }
}

impl From<RunError> for ApiError {
    fn from(e: RunError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.0.kind(),
            message: self.0.to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}

async fn run_query(
    State(state): State<AppState>,
    Json(body): Json<RunReq>,
) -> Result<Json<RunResult>, ApiError> {
    tracing::info!(target: "api", chars = body.query.len(), "POST /run");
    let result = state.pipeline.run(&body.query).await?;
    state.history.push(&result);
    Ok(Json(result))
}

async fn run_parameters(
    State(state): State<AppState>,
    Json(params): Json<QueryParameters>,
) -> Result<Json<RunResult>, ApiError> {
    tracing::info!(target: "api", candidates = params.candidates.len(), "POST /run/parameters");
    let result = state.pipeline.run_with_parameters(params).await?;
    state.history.push(&result);
    Ok(Json(result))
}

async fn recent_runs(State(state): State<AppState>) -> Json<Vec<RunSummary>> {
    Json(state.history.snapshot_last_n(RECENT_RUNS))
}
