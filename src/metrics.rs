//! Prometheus Metrics
//!
//! Exports the registry counters and membership gauges in the Prometheus
//! text format on `/metrics`.

use crate::error::{Error, Result};
use crate::registry::PositionRegistry;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use parking_lot::Mutex;
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

const PREFIX: &str = "position_registry";

// =============================================================================
// Registry Metrics
// =============================================================================

/// Prometheus view of a [`PositionRegistry`].
///
/// Counters are brought up to date with the registry's own statistics on
/// every scrape.
pub struct RegistryMetrics {
    source: Arc<PositionRegistry>,
    registry: Registry,

    position_updates: IntCounter,
    membership_changes: IntCounter,
    notifications_delivered: IntCounter,
    notifications_dropped: IntCounter,
    sinks_pruned: IntCounter,

    nodes_total: IntGauge,
    nodes_enabled: IntGauge,
    subscribers: IntGauge,

    /// Serializes scrapes so concurrent counter catch-up never double counts
    scrape: Mutex<()>,
}

impl RegistryMetrics {
    /// Register all registry metrics in a dedicated Prometheus registry
    pub fn new(source: Arc<PositionRegistry>) -> Result<Self> {
        let registry = Registry::new();

        Ok(Self {
            position_updates: counter(
                &registry,
                "position_updates_total",
                "Successful position writes",
            )?,
            membership_changes: counter(
                &registry,
                "membership_changes_total",
                "Enable and disable calls that took effect",
            )?,
            notifications_delivered: counter(
                &registry,
                "notifications_delivered_total",
                "Enabled-set updates accepted by a subscriber",
            )?,
            notifications_dropped: counter(
                &registry,
                "notifications_dropped_total",
                "Enabled-set updates discarded because a subscriber queue was full",
            )?,
            sinks_pruned: counter(
                &registry,
                "sinks_pruned_total",
                "Subscribers removed after their receiver went away",
            )?,
            nodes_total: gauge(&registry, "nodes_total", "Number of node slots")?,
            nodes_enabled: gauge(&registry, "nodes_enabled", "Number of enabled nodes")?,
            subscribers: gauge(
                &registry,
                "subscribers",
                "Number of registered enabled-set subscribers",
            )?,
            scrape: Mutex::new(()),
            registry,
            source,
        })
    }

    /// Refresh every metric and encode them in the text exposition format
    pub fn encode(&self) -> Result<Vec<u8>> {
        let _scrape = self.scrape.lock();

        let stats = self.source.stats();
        advance(&self.position_updates, stats.position_updates);
        advance(&self.membership_changes, stats.membership_changes);
        advance(&self.notifications_delivered, stats.notifications_delivered);
        advance(&self.notifications_dropped, stats.notifications_dropped);
        advance(&self.sinks_pruned, stats.sinks_pruned);

        self.nodes_total.set(as_gauge(self.source.capacity()));
        self.nodes_enabled.set(as_gauge(self.source.enabled().len()));
        self.subscribers.set(as_gauge(self.source.subscriber_count()));

        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(buffer)
    }
}

fn counter(registry: &Registry, name: &str, help: &str) -> Result<IntCounter> {
    let counter = IntCounter::new(format!("{}_{}", PREFIX, name), help)?;
    registry.register(Box::new(counter.clone()))?;
    Ok(counter)
}

fn gauge(registry: &Registry, name: &str, help: &str) -> Result<IntGauge> {
    let gauge = IntGauge::new(format!("{}_{}", PREFIX, name), help)?;
    registry.register(Box::new(gauge.clone()))?;
    Ok(gauge)
}

/// Move a monotonic counter forward to `total`
fn advance(counter: &IntCounter, total: u64) {
    let seen = counter.get();
    if total > seen {
        counter.inc_by(total - seen);
    }
}

fn as_gauge(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

// =============================================================================
// Metrics Server
// =============================================================================

/// Router serving `/metrics`
pub fn metrics_router(metrics: Arc<RegistryMetrics>) -> Router {
    Router::new()
        .route("/metrics", get(serve_metrics))
        .with_state(metrics)
}

async fn serve_metrics(State(metrics): State<Arc<RegistryMetrics>>) -> Response {
    match metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)],
            body,
        )
            .into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

/// Serve `/metrics` on `addr` until the task is dropped
pub async fn run_metrics_server(addr: SocketAddr, metrics: Arc<RegistryMetrics>) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Internal(format!("Failed to bind metrics server: {}", e)))?;

    info!("Metrics server listening on {}", listener.local_addr()?);

    axum::serve(listener, metrics_router(metrics))
        .await
        .map_err(|e| Error::Internal(format!("Metrics server error: {}", e)))?;

    Ok(())
}
