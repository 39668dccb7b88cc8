//! Position Registry - Node Positions & Membership
//!
//! The position/membership registry of a mobility-aware network simulation.
//! It tracks where every simulated node is, computes the distances used by
//! link-quality models, and tracks which nodes currently participate.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐   set / enable / disable   ┌──────────────────────┐
//! │  Mobility models &   │ ─────────────────────────▶ │                      │
//! │  control plane (API) │                            │  Position Registry   │
//! └──────────────────────┘                            │                      │
//!                                                     │  slot 0  RwLock<Pos> │
//! ┌──────────────────────┐    get / distance          │  slot 1  RwLock<Pos> │
//! │  Link-quality engine │ ◀───────────────────────── │  ...                 │
//! │  status reporters    │                            │  membership RwLock   │
//! └──────────┬───────────┘                            └──────────┬───────────┘
//!            │          enabled-set updates (bounded queues)      │
//!            └◀───────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`registry`]: position table, membership, address resolution, events
//! - [`config`]: configuration file loading and registry construction
//! - [`api`]: REST control-plane API
//! - [`metrics`]: Prometheus export of registry counters
//! - [`error`]: error types and handling

pub mod api;
pub mod config;
pub mod error;
pub mod metrics;
pub mod registry;

// Re-export commonly used types
pub use api::{ApiServer, ApiServerConfig, RestRouter};

pub use config::{NodeConfig, RegistryConfig};

pub use error::{Error, Result};

pub use metrics::RegistryMetrics;

pub use registry::{
    AddressBook, AddressResolver, Delivery, EnabledSink, EnabledUpdate, MembershipChange,
    MembershipSnapshot, Position, PositionRegistry, RegistryStatsSnapshot,
    MAX_NOTIFY_QUEUE_CAPACITY, MAX_REACHABLE_DISTANCE, UNREACHABLE_DISTANCE,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
