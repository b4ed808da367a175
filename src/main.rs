use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use nsyte_gateway::config::CliArgs;
use nsyte_gateway::gateway::GatewayState;
use nsyte_gateway::{build_router, GatewayConfig};

fn main() -> Result<()> {
    let subscriber_result = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .try_init();
    if subscriber_result.is_err() {
        // tracing was already initialised; continue silently
    }

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    rt.block_on(run())
}

async fn run() -> Result<()> {
    let args = CliArgs::parse();
    let config = GatewayConfig::load(args).context("failed to load gateway configuration")?;
    let port = config.port;
    let no_open = config.no_open;

    let state = Arc::new(GatewayState::new(config));
    let app = build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    tracing::info!(%addr, "nsyte gateway listening");

    if !no_open {
        tracing::debug!("auto-open is handled by the CLI front-end, not the gateway binary");
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("gateway server error")?;

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
