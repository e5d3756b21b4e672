//! # MQ Gateway - Main Entry Point
//!
//! Provides a discovery and load balancing gateway between clients using
//! various messaging protocols and the available message brokers. The binary
//! loads the per-protocol configuration, activates the orchestrator, and
//! deactivates it on SIGTERM/SIGINT so listening sockets and in-flight
//! connections unwind cleanly.

use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

use mq_gateway::discovery::InMemoryDiscovery;
use mq_gateway::{GatewayOrchestrator, GatewayResult, MqGatewayConfig};

#[tokio::main]
async fn main() -> GatewayResult<()> {
    init_observability();

    info!("🚀 Starting MQ Gateway");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = load_config().await?;

    // The coordination-service client is deployment-specific; anything
    // implementing DiscoverySource slots in here. The in-memory source keeps
    // the standalone binary runnable and testable.
    let discovery = Arc::new(InMemoryDiscovery::new());
    let orchestrator = GatewayOrchestrator::new(config, discovery);

    if let Err(e) = orchestrator.activate().await {
        error!("Failed to activate gateway group: {}", e);
        return Err(e);
    }

    wait_for_shutdown_signal().await;

    info!("🛑 Shutdown signal received, deactivating gateway group...");
    orchestrator.deactivate().await;

    info!("✅ MQ Gateway shutdown complete");
    Ok(())
}

/// Initialize structured logging
fn init_observability() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mq_gateway=info".into()),
        )
        .init();
}

/// Load configuration from `MQ_GATEWAY_CONFIG_PATH`, falling back to defaults
async fn load_config() -> GatewayResult<MqGatewayConfig> {
    let config_path = std::env::var("MQ_GATEWAY_CONFIG_PATH")
        .unwrap_or_else(|_| "config/gateway.yaml".to_string());

    match MqGatewayConfig::load_from_file(&config_path).await {
        Ok(config) => {
            info!("📋 Configuration loaded from {}", config_path);
            Ok(config)
        }
        Err(e) if !std::path::Path::new(&config_path).exists() => {
            warn!(
                "No config file at {} ({}); using built-in defaults",
                config_path, e
            );
            let mut config = MqGatewayConfig::default();
            config.apply_env_overrides()?;
            config.validate()?;
            Ok(config)
        }
        Err(e) => {
            error!("Failed to load configuration from {}: {}", config_path, e);
            Err(e)
        }
    }
}

/// Block until SIGTERM or SIGINT arrives
async fn wait_for_shutdown_signal() {
    let sigterm = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = sigterm => info!("📡 Received SIGTERM"),
        _ = signal::ctrl_c() => info!("📡 Received SIGINT (Ctrl+C)"),
    }
}
