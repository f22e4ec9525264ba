//! Development server command.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use sheetpack_bundle::Mode;
use sheetpack_server::DevServer;

use crate::config::load_pipeline;

/// Run the dev server.
pub async fn run(config_path: &Path, mode: Mode, port: Option<u16>, open: bool) -> Result<()> {
    let mut config = load_pipeline(config_path, mode)?;

    if mode.is_production() {
        tracing::warn!("NODE_ENV=production: serving without source maps or hot updates");
        config.dev_server.hot = false;
    }
    if let Some(port) = port {
        config.dev_server.port = port;
    }
    config.dev_server.open = config.dev_server.open && open;

    tracing::info!(
        "Starting development server on port {}",
        config.dev_server.port
    );

    DevServer::new(Arc::new(config))
        .start()
        .await
        .context("Development server failed")?;

    Ok(())
}
