//! Position Registry Module
//!
//! Per-node positions with per-slot locking, node membership, and fan-out of
//! enabled-set updates to subscribers.

pub mod address;
pub mod events;
pub mod position;
pub mod position_registry;

pub use address::*;
pub use events::*;
pub use position::*;
pub use position_registry::*;
