//! Build command.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use sheetpack_bundle::{Builder, Mode};

use crate::config::load_pipeline;

/// Run the build command.
pub async fn run(config_path: &Path, mode: Mode) -> Result<()> {
    tracing::info!("Building in {} mode...", mode.as_str());

    let config = load_pipeline(config_path, mode)?;

    let result = Builder::new(Arc::new(config))
        .build()
        .await
        .context("Build failed")?;

    tracing::info!(
        "Bundled {} modules in {}ms",
        result.modules,
        result.duration_ms
    );
    for artifact in &result.artifacts {
        tracing::info!("  {}", artifact);
    }
    tracing::info!("Output: {}", result.output_dir.display());

    Ok(())
}
