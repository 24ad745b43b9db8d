//! Election Research Agent: service entrypoint.
//! Boots the Axum HTTP server with the run pipeline, recent-run history and `/metrics`.

use shuttle_axum::ShuttleAxum;

use election_research_agent::api::{self, AppState};
use election_research_agent::config::{AiConfig, PipelineConfig};
use election_research_agent::metrics::Metrics;
use election_research_agent::model_asset::ModelAsset;
use election_research_agent::{init_tracing, Pipeline};

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    let ai = AiConfig::load_default()
        .and_then(AiConfig::resolved)
        .map_err(shuttle_runtime::Error::Custom)?;
    let cfg = PipelineConfig::load_default()
        .map(PipelineConfig::with_env_secrets)
        .map_err(shuttle_runtime::Error::Custom)?;

    if let Some(asset) = ai.model_asset.as_ref().filter(|_| ai.provider == "local") {
        ModelAsset::from(asset)
            .ensure()
            .await
            .map_err(shuttle_runtime::Error::Custom)?;
    }

    let metrics = Metrics::init(cfg.max_items_per_source).map_err(shuttle_runtime::Error::Custom)?;
    let pipeline = Pipeline::from_config(&ai, &cfg).map_err(shuttle_runtime::Error::Custom)?;
    tracing::info!(
        adapters = ?pipeline.adapter_names(),
        predictor = pipeline.predictor_name(),
        "service ready"
    );

    let router = api::router(AppState::new(pipeline)).merge(metrics.router());
    Ok(router.into())
}
