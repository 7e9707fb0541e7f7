// ============================
// shopstatus-backend-bin/src/main.rs
// ============================
//! Tokio / Axum entry-point for the shop status server.
use anyhow::Context;
use backend_lib::{
    config::{LogSettings, Settings},
    hub::StatusHub,
    ws_router, AppState,
};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "shopstatus-server", about = "Online status and event channel for the repair shop")]
struct Cli {
    /// TOML settings file; missing files fall back to defaults
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Override the listen port
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut settings = Settings::load_from(&cli.config)
        .with_context(|| format!("failed to load settings from {}", cli.config.display()))?;
    if let Some(port) = cli.port {
        settings.server.port = port;
    }

    init_tracing(&settings.log);

    let addr = settings.bind_addr()?;
    let state = AppState::new(&settings);
    let sweeper = state.hub.spawn_sweeper();
    let app = ws_router::create_router(state.clone());

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, path = ws_router::WS_PATH, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state.hub.clone()))
        .await
        .context("server error")?;

    sweeper.abort();
    info!("server stopped");
    Ok(())
}

fn init_tracing(log: &LogSettings) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.level));
    let registry = tracing_subscriber::registry().with(filter);
    if log.json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}

/// Wait for Ctrl-C, then close every status socket so the server can drain
async fn shutdown_signal(hub: Arc<StatusHub>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
    hub.shutdown();
}
