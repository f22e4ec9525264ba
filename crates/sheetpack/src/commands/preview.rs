//! Preview server command.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use axum::Router;
use sheetpack_bundle::Mode;
use tower_http::compression::CompressionLayer;
use tower_http::services::ServeDir;

use crate::config::load_pipeline;

/// Run the preview command.
pub async fn run(config_path: &Path, mode: Mode, port: u16, dir: Option<PathBuf>) -> Result<()> {
    let dir = match dir {
        Some(dir) => dir,
        None => load_pipeline(config_path, mode)?.output.dir,
    };

    if !dir.exists() {
        anyhow::bail!(
            "Directory not found: {}. Run 'sheetpack build' first.",
            dir.display()
        );
    }

    let addr: SocketAddr = format!("127.0.0.1:{}", port)
        .parse()
        .context("Invalid address")?;

    tracing::info!("Serving {} at http://{}", dir.display(), addr);

    let app = Router::new()
        .fallback_service(ServeDir::new(&dir))
        .layer(CompressionLayer::new());

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Open browser
    let url = format!("http://{}", addr);
    if let Err(e) = open::that(&url) {
        tracing::warn!("Failed to open browser: {}", e);
    }

    axum::serve(listener, app).await?;

    Ok(())
}
