//! REST API Handlers
//!
//! Control-plane endpoints for moving nodes, changing membership, and
//! querying positions, distances and registry statistics.

use crate::error::Error;
use crate::registry::{
    AddressBook, Position, PositionRegistry, RegistryStatsSnapshot, UNREACHABLE_DISTANCE,
};
use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

// =============================================================================
// Request/Response Types
// =============================================================================

/// Membership overview
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodesResponse {
    pub capacity: usize,
    /// Sequence of the last membership change
    pub sequence: u64,
    pub enabled: Vec<usize>,
}

/// Single node info
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfoResponse {
    pub index: usize,
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    /// Present only while the node is enabled
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
}

/// Position of a node
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionResponse {
    pub index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    pub position: Position,
}

/// Distance query parameters
#[derive(Debug, Clone, Deserialize)]
pub struct DistanceQuery {
    pub from: usize,
    pub to: usize,
}

/// Distance between two nodes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DistanceResponse {
    pub from: usize,
    pub to: usize,
    pub distance: f64,
    /// False when either node is disabled or out of range
    pub reachable: bool,
}

/// Registry statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    pub capacity: usize,
    pub enabled_count: usize,
    pub subscribers: usize,
    #[serde(flatten)]
    pub counters: RegistryStatsSnapshot,
}

/// API error response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiErrorResponse {
    pub error: String,
    pub message: String,
}

// =============================================================================
// REST Router
// =============================================================================

/// REST API router builder
pub struct RestRouter {
    registry: Arc<PositionRegistry>,
    addresses: Option<Arc<AddressBook>>,
}

impl RestRouter {
    /// Create a new REST router
    pub fn new(registry: Arc<PositionRegistry>, addresses: Option<Arc<AddressBook>>) -> Self {
        Self {
            registry,
            addresses,
        }
    }

    /// Build the Axum router
    pub fn build(self) -> Router {
        let state = AppState {
            registry: self.registry,
            addresses: self.addresses,
        };

        Router::new()
            // Membership endpoints
            .route("/v1/nodes", get(list_nodes))
            .route("/v1/nodes/:index", get(get_node))
            .route("/v1/nodes/:index/enable", post(enable_node))
            .route("/v1/nodes/:index/disable", post(disable_node))
            // Position endpoints
            .route(
                "/v1/nodes/:index/position",
                get(get_position).put(set_position),
            )
            .route(
                "/v1/addresses/:address/position",
                get(get_position_by_address).put(set_position_by_address),
            )
            .route("/v1/distance", get(get_distance))
            // Stats endpoint
            .route("/v1/stats", get(get_stats))
            // Health endpoints
            .route("/health", get(health_check))
            .route("/ready", get(readiness_check))
            .with_state(state)
    }
}

/// Shared application state
#[derive(Clone)]
struct AppState {
    registry: Arc<PositionRegistry>,
    addresses: Option<Arc<AddressBook>>,
}

impl AppState {
    fn address_of(&self, index: usize) -> Option<String> {
        self.addresses
            .as_ref()
            .and_then(|book| book.address_of(index))
    }
}

// =============================================================================
// Error Mapping
// =============================================================================

fn status_for(err: &Error) -> StatusCode {
    match err {
        Error::IndexOutOfRange { .. } | Error::AddressNotFound { .. } => StatusCode::NOT_FOUND,
        Error::NodeDisabled { .. } => StatusCode::CONFLICT,
        Error::NonFinitePosition { .. } => StatusCode::BAD_REQUEST,
        Error::NoAddressResolver => StatusCode::NOT_IMPLEMENTED,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(err: Error) -> Response {
    (
        status_for(&err),
        Json(ApiErrorResponse {
            error: err.code().to_string(),
            message: err.to_string(),
        }),
    )
        .into_response()
}

// =============================================================================
// Handlers
// =============================================================================

/// List enabled nodes
async fn list_nodes(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.registry.snapshot();
    (
        StatusCode::OK,
        Json(NodesResponse {
            capacity: state.registry.capacity(),
            sequence: snapshot.sequence,
            enabled: snapshot.enabled,
        }),
    )
}

/// Get node info
async fn get_node(State(state): State<AppState>, Path(index): Path<usize>) -> Response {
    if index >= state.registry.capacity() {
        return error_response(Error::IndexOutOfRange {
            index,
            capacity: state.registry.capacity(),
        });
    }

    (
        StatusCode::OK,
        Json(NodeInfoResponse {
            index,
            enabled: state.registry.is_enabled(index),
            address: state.address_of(index),
            position: state.registry.get(index).ok(),
        }),
    )
        .into_response()
}

/// Enable a node
async fn enable_node(State(state): State<AppState>, Path(index): Path<usize>) -> Response {
    change_membership(&state, index, true)
}

/// Disable a node
async fn disable_node(State(state): State<AppState>, Path(index): Path<usize>) -> Response {
    change_membership(&state, index, false)
}

fn change_membership(state: &AppState, index: usize, enable: bool) -> Response {
    let result = if enable {
        state.registry.enable(index)
    } else {
        state.registry.disable(index)
    };

    match result {
        Ok(()) => {
            info!(index, enable, "Membership changed via API");
            let snapshot = state.registry.snapshot();
            (
                StatusCode::OK,
                Json(NodesResponse {
                    capacity: state.registry.capacity(),
                    sequence: snapshot.sequence,
                    enabled: snapshot.enabled,
                }),
            )
                .into_response()
        }
        Err(e) => error_response(e),
    }
}

/// Get a node's position
async fn get_position(State(state): State<AppState>, Path(index): Path<usize>) -> Response {
    match state.registry.get(index) {
        Ok(position) => (
            StatusCode::OK,
            Json(PositionResponse {
                index,
                address: state.address_of(index),
                position,
            }),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

/// Move a node
async fn set_position(
    State(state): State<AppState>,
    Path(index): Path<usize>,
    Json(position): Json<Position>,
) -> Response {
    match state.registry.set_position(index, &position) {
        Ok(()) => (
            StatusCode::OK,
            Json(PositionResponse {
                index,
                address: state.address_of(index),
                position,
            }),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

/// Get a node's position by address
async fn get_position_by_address(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Response {
    let result = state
        .registry
        .get_by_address(&address)
        .and_then(|position| Ok((state.registry.resolve(&address)?, position)));

    match result {
        Ok((index, position)) => (
            StatusCode::OK,
            Json(PositionResponse {
                index,
                address: Some(address),
                position,
            }),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

/// Move a node by address
async fn set_position_by_address(
    State(state): State<AppState>,
    Path(address): Path<String>,
    Json(position): Json<Position>,
) -> Response {
    let result = state
        .registry
        .set_position_by_address(&address, &position)
        .and_then(|()| state.registry.resolve(&address));

    match result {
        Ok(index) => (
            StatusCode::OK,
            Json(PositionResponse {
                index,
                address: Some(address),
                position,
            }),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

/// Distance between two nodes
async fn get_distance(
    State(state): State<AppState>,
    Query(query): Query<DistanceQuery>,
) -> impl IntoResponse {
    let distance = state.registry.distance(query.from, query.to);
    (
        StatusCode::OK,
        Json(DistanceResponse {
            from: query.from,
            to: query.to,
            distance,
            reachable: distance != UNREACHABLE_DISTANCE,
        }),
    )
}

/// Registry statistics
async fn get_stats(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(StatsResponse {
            capacity: state.registry.capacity(),
            enabled_count: state.registry.enabled().len(),
            subscribers: state.registry.subscriber_count(),
            counters: state.registry.stats(),
        }),
    )
}

/// Health check
async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Readiness check
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    if state.registry.capacity() > 0 {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "registry has no slots")
    }
}
