//! Kiln Node - self-hosted git server.

use anyhow::Context;
use clap::Parser;
use kiln_node::api::{create_router, AppState};
use kiln_node::config::{Cli, Config};
use kiln_node::observability::init_logging;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::load(&cli).context("Failed to load configuration")?;

    init_logging(&config.log);

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting Kiln node");
    tracing::info!(
        listen_addr = %config.listen_addr,
        storage = ?config.storage,
        data_dir = %config.data_dir.display(),
        decode_mode = ?config.git.decode_mode,
        tokens = config.auth.tokens.len(),
        "Node configuration"
    );

    let listen_addr = config.listen_addr;
    let state = AppState::from_config(config).context("Failed to open repository storage")?;
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", listen_addr))?;
    tracing::info!(addr = %listen_addr, "Node is ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    tracing::info!("Node stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
