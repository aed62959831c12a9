use anyhow::Result;
use argus_engine::Engine;
use argus_notify::channels::build_channel;
use argus_notify::set::ChannelSet;
use argus_platform::platforms::evm::EvmPlatform;
use argus_platform::platforms::http::HttpPlatform;
use argus_platform::registry::PlatformRegistry;
use argus_storage::StateStore;
use chrono::Utc;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::signal;
use tracing_subscriber::EnvFilter;

mod api;
mod config;

use api::AppState;
use config::ServerConfig;

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  argus-server [config.toml]    Start the monitoring daemon");
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    if matches!(args.get(1).map(String::as_str), Some("--help" | "-h")) {
        print_usage();
        return Ok(());
    }
    let config_path = args
        .get(1)
        .map(String::as_str)
        .unwrap_or("config/argus.toml");

    run_server(config_path).await
}

async fn run_server(config_path: &str) -> Result<()> {
    let config = ServerConfig::load(config_path)?;
    tracing::info!(config = config_path, "Configuration loaded");

    let store = Arc::new(StateStore::open(Path::new(&config.data_dir))?);

    let mut registry = PlatformRegistry::new();
    registry.register(Arc::new(HttpPlatform::new()))?;
    registry.register(Arc::new(EvmPlatform::new()))?;

    let mut channels = ChannelSet::new();
    for section in &config.channels {
        channels.register(build_channel(&section.channel_type, &section.config)?);
    }
    if channels.is_empty() {
        tracing::warn!("No delivery channels configured; alerts will only be recorded");
    }

    let engine = Arc::new(
        Engine::start(
            config.engine_config(),
            registry,
            store.clone(),
            channels,
        )
        .await?,
    );

    spawn_maintenance(store, config.retention_days);

    let state = AppState {
        engine: engine.clone(),
        start_time: Utc::now(),
    };
    let app = api::build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.http_port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "Admin API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    engine.stop().await;
    Ok(())
}

/// Daily retention sweep over run history and sent-alert records.
fn spawn_maintenance(store: Arc<StateStore>, retention_days: u32) {
    let horizon = chrono::Duration::days(retention_days as i64);
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(std::time::Duration::from_secs(24 * 3600));
        loop {
            tick.tick().await;
            match store.prune_run_history(horizon) {
                Ok(removed) if removed > 0 => {
                    tracing::info!(removed, "Pruned old run history");
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "Run history pruning failed"),
            }
            match store.prune_sent_alerts(horizon) {
                Ok(removed) if removed > 0 => {
                    tracing::info!(removed, "Pruned old alert records");
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "Alert record pruning failed"),
            }
        }
    });
}

async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        return;
    }
    tracing::info!("Shutdown signal received");
}
