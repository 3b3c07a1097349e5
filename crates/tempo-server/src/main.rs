//! Tempo game session server.

use std::sync::Arc;
use tempo_core::ChessEngine;
use tempo_server::{server, Gateway, RoomRegistry, ServerConfig};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::from_env()?;
    info!("Starting Tempo server...");

    let registry = RoomRegistry::new(Arc::new(ChessEngine::new()), config.max_rooms);
    let _sweeper = registry.spawn_sweeper(config.sweep_interval, config.idle_grace);

    let addr = config.addr;
    let gateway = Arc::new(Gateway::new(registry, config));

    server::run_server(addr, gateway).await
}
