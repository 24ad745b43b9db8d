//! One-shot run: parse the query given on the command line, run the pipeline once,
//! write the report and print its path.
//!
//! Usage: `run_query "Who will win the 2024 US presidential election between A and B?"`

use anyhow::Context;

use election_research_agent::config::{AiConfig, PipelineConfig};
use election_research_agent::model_asset::ModelAsset;
use election_research_agent::report::ReportRenderer;
use election_research_agent::{init_tracing, CancelHandle, Pipeline};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let query = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    if query.trim().is_empty() {
        anyhow::bail!("usage: run_query <election question>");
    }

    let ai = AiConfig::load_default()?.resolved()?;
    let cfg = PipelineConfig::load_default()?.with_env_secrets();
    if let Some(asset) = ai.model_asset.as_ref().filter(|_| ai.provider == "local") {
        ModelAsset::from(asset).ensure().await?;
    }

    let pipeline = Pipeline::from_config(&ai, &cfg)?;

    // Ctrl-C cancels the run instead of killing it mid-write.
    let cancel = CancelHandle::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }

    let result = pipeline
        .run_cancellable(&query, &cancel)
        .await
        .context("analysis run failed")?;
    let paths = ReportRenderer::new(&cfg.reports_dir).render(&result)?;

    println!("{}", paths.markdown.display());
    Ok(())
}
