//! Control-Plane API Server
//!
//! Serves the REST API over the position registry until shut down.

use crate::error::{Error, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use super::rest::RestRouter;
use crate::config::DEFAULT_LISTEN_ADDRESS;
use crate::registry::{AddressBook, PositionRegistry};

// =============================================================================
// Server Configuration
// =============================================================================

/// Configuration for the API server
#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    /// REST API bind address
    pub rest_addr: SocketAddr,
    /// Allow cross-origin requests (browser dashboards)
    pub cors_enabled: bool,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            rest_addr: DEFAULT_LISTEN_ADDRESS
                .parse()
                .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], 8090))),
            cors_enabled: false,
        }
    }
}

// =============================================================================
// API Server
// =============================================================================

/// REST API server for control-plane callers
pub struct ApiServer {
    config: ApiServerConfig,
    registry: Arc<PositionRegistry>,
    addresses: Option<Arc<AddressBook>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl ApiServer {
    /// Create a new API server
    pub fn new(
        config: ApiServerConfig,
        registry: Arc<PositionRegistry>,
        addresses: Option<Arc<AddressBook>>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            registry,
            addresses,
            shutdown_tx,
        }
    }

    /// Run the API server until [`shutdown`](Self::shutdown) is called
    pub async fn run(&self) -> Result<()> {
        info!("Starting control-plane API server");
        info!("  REST API: {}", self.config.rest_addr);

        let handle = self.spawn_rest_server();
        handle
            .await
            .map_err(|e| Error::Internal(format!("REST server task failed: {}", e)))?
    }

    /// Spawn the REST server
    fn spawn_rest_server(&self) -> tokio::task::JoinHandle<Result<()>> {
        let addr = self.config.rest_addr;
        let cors_enabled = self.config.cors_enabled;
        let router = RestRouter::new(self.registry.clone(), self.addresses.clone());
        let shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move { run_rest_server(addr, router, cors_enabled, shutdown_rx).await })
    }

    /// Trigger graceful shutdown
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

/// Run the REST API server
async fn run_rest_server(
    addr: SocketAddr,
    router: RestRouter,
    cors_enabled: bool,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<()> {
    let mut app = router.build().layer(TraceLayer::new_for_http());
    if cors_enabled {
        app = app.layer(CorsLayer::permissive());
    }

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Internal(format!("Failed to bind REST server: {}", e)))?;

    info!("REST API listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
            info!("REST server shutting down");
        })
        .await
        .map_err(|e| Error::Internal(format!("REST server error: {}", e)))?;

    Ok(())
}
