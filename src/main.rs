//! Stream Relay - Entry Point
//!
//! Starts the relay server and the egress health monitor with graceful
//! shutdown support.

use std::sync::Arc;

use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use stream_relay::api::RelayServer;
use stream_relay::config::{Config, LogConfig};
use stream_relay::proxy::{EgressPool, HealthMonitor, HealthMonitorHandle};

#[tokio::main]
async fn main() -> stream_relay::Result<()> {
    // Load configuration
    let config = Config::from_env()?;

    init_tracing(&config.log);

    info!("Starting Stream Relay");

    // Build the egress pool
    let pool = Arc::new(EgressPool::from_config(&config.egress, &config.fetch)?);
    if pool.is_direct_mode() {
        if pool.direct().is_some() {
            warn!("No proxies configured, fetching directly from origins (high ban risk)");
        } else {
            warn!("No proxies configured and direct egress is disabled; every fetch will fail");
        }
    } else {
        let labels: Vec<&str> = pool.paths().iter().map(|p| p.label()).collect();
        info!("Loaded {} egress proxies: {:?}", labels.len(), labels);
    }
    info!(
        "Strategy mode: {}, segment routing: {}",
        config.fetch.strategy_mode.as_str(),
        config.rewrite.segments.as_str()
    );

    // Create shutdown channel
    let (shutdown_tx, _) = watch::channel(false);

    // Start health monitor
    let (health_handle, health_shutdown) = HealthMonitorHandle::new();
    let health_monitor = HealthMonitor::new(pool.clone(), config.health.clone());
    let health_task = tokio::spawn(async move {
        health_monitor.run(health_shutdown).await;
    });

    // Start relay server
    let listen_addr = config.listen_addr();
    let relay_server = RelayServer::new(config, pool);
    let relay_shutdown = shutdown_tx.subscribe();
    let relay_task = tokio::spawn(async move {
        if let Err(e) = relay_server.run(relay_shutdown).await {
            error!("Relay server error: {}", e);
        }
    });

    info!("Relay started on {}", listen_addr);

    // Wait for shutdown signal
    shutdown_signal().await;
    info!("Shutdown signal received");

    let _ = shutdown_tx.send(true);
    health_handle.shutdown();

    let _ = tokio::join!(relay_task, health_task);

    info!("Stream Relay stopped");
    Ok(())
}

fn init_tracing(log: &LogConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("stream_relay={},tower_http={}", log.level, log.level).into()
    });

    let registry = tracing_subscriber::registry().with(filter);
    if log.format.eq_ignore_ascii_case("json") {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
