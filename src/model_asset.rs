// src/model_asset.rs
//! Make sure a local model file is present, downloading it once if needed.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::io::AsyncWriteExt;

use crate::config::ai::ModelAssetConfig;

/// Log download progress roughly every this many bytes.
const PROGRESS_STEP: u64 = 64 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelAsset {
    pub url: String,
    pub path: PathBuf,
}

impl From<&ModelAssetConfig> for ModelAsset {
    fn from(c: &ModelAssetConfig) -> Self {
        Self {
            url: c.url.clone(),
            path: c.path.clone(),
        }
    }
}

impl ModelAsset {
    pub fn new(url: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            path: path.into(),
        }
    }

    fn part_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".part");
        PathBuf::from(name)
    }

    /// Idempotent: returns the path right away when the file already exists.
    pub async fn ensure(&self) -> Result<&Path> {
        if tokio::fs::try_exists(&self.path).await.unwrap_or(false) {
            tracing::info!(target: "model_asset", path = %self.path.display(), "model already present");
            return Ok(&self.path);
        }
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating {}", parent.display()))?;
        }

        tracing::info!(target: "model_asset", url = %self.url, "downloading model");
        let mut resp = reqwest::get(&self.url)
            .await
            .with_context(|| format!("requesting {}", self.url))?
            .error_for_status()
            .context("model download refused")?;
        let total = resp.content_length();

        let part = self.part_path();
        let mut file = tokio::fs::File::create(&part)
            .await
            .with_context(|| format!("creating {}", part.display()))?;
        let mut written: u64 = 0;
        let mut next_report = PROGRESS_STEP;
        while let Some(chunk) = resp.chunk().await.context("reading model body")? {
            file.write_all(&chunk).await.context("writing model chunk")?;
            written += chunk.len() as u64;
            if written >= next_report {
                tracing::info!(target: "model_asset", written, total = ?total, "download progress");
                next_report += PROGRESS_STEP;
            }
        }
        file.flush().await?;
        drop(file);

        tokio::fs::rename(&part, &self.path)
            .await
            .with_context(|| format!("moving download into {}", self.path.display()))?;
        tracing::info!(target: "model_asset", path = %self.path.display(), bytes = written, "download complete");
        Ok(&self.path)
    }
}
