//! Relay HTTP server using Axum

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{info, instrument};

use crate::config::Config;
use crate::error::{RelayError, Result};
use crate::manifest::ManifestRewriter;
use crate::proxy::{EgressPool, Fetcher};

use super::middleware::{cors_layer, RequestLogging};
use super::routes;

/// Shared state for relay handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub pool: Arc<EgressPool>,
    pub fetcher: Arc<Fetcher>,
    pub rewriter: Arc<ManifestRewriter>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: Config, pool: Arc<EgressPool>) -> Self {
        let fetcher = Fetcher::with_default_strategies(pool.clone(), config.fetch.clone());
        let rewriter = ManifestRewriter::new(config.rewrite.clone());

        Self {
            config: Arc::new(config),
            pool,
            fetcher: Arc::new(fetcher),
            rewriter: Arc::new(rewriter),
            started_at: Instant::now(),
        }
    }
}

/// Relay server
pub struct RelayServer {
    state: AppState,
}

impl RelayServer {
    pub fn new(config: Config, pool: Arc<EgressPool>) -> Self {
        Self {
            state: AppState::new(config, pool),
        }
    }

    /// Build the router with every middleware layer
    pub fn router(&self) -> Router {
        build_router(self.state.clone())
    }

    /// Run the relay server until `shutdown` fires
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let addr: SocketAddr = self
            .state
            .config
            .listen_addr()
            .parse()
            .map_err(|e| RelayError::InvalidConfig(format!("invalid listen address: {}", e)))?;

        let router = self.router();

        info!("Relay listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.changed().await;
            })
            .await
            .map_err(|e| RelayError::Internal(e.to_string()))?;

        info!("Relay server shut down");
        Ok(())
    }
}

pub(crate) fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.server.cors_origins);

    routes::create_router(state)
        .layer(axum::middleware::from_fn(RequestLogging::log_request))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
