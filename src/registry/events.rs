//! Membership Events
//!
//! Updates published by the position registry whenever a node is enabled or
//! disabled, and the sinks that receive them.
//!
//! Delivery never blocks the caller that changed membership. Every sink is
//! offered each update with a non-blocking hand-off; a bounded sink that is
//! full loses that update (drop-newest) and the subscriber can detect the gap
//! through [`EnabledUpdate::sequence`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};

/// The membership change that triggered an update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum MembershipChange {
    /// A node was enabled (possibly already enabled)
    Enabled { index: usize },
    /// A node was disabled (possibly already disabled)
    Disabled { index: usize },
}

impl MembershipChange {
    /// Index of the node the change applied to
    pub fn index(&self) -> usize {
        match self {
            MembershipChange::Enabled { index } | MembershipChange::Disabled { index } => *index,
        }
    }

    /// Flag value the node was set to
    pub fn is_enable(&self) -> bool {
        matches!(self, MembershipChange::Enabled { .. })
    }
}

impl std::fmt::Display for MembershipChange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MembershipChange::Enabled { index } => write!(f, "enabled({})", index),
            MembershipChange::Disabled { index } => write!(f, "disabled({})", index),
        }
    }
}

/// Enabled set published after a membership change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnabledUpdate {
    /// Position of this change in the registry's total order, starting at 1
    pub sequence: u64,
    /// What changed
    pub change: MembershipChange,
    /// Every enabled index at the moment of the change, ascending
    pub enabled: Arc<[usize]>,
    /// Wall-clock time of the change
    pub changed_at: DateTime<Utc>,
}

/// Enabled set at a point in the registry's change sequence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MembershipSnapshot {
    /// Sequence of the last change included, 0 if none happened yet
    pub sequence: u64,
    /// Enabled indices, ascending
    pub enabled: Vec<usize>,
}

// =============================================================================
// Sinks
// =============================================================================

/// Outcome of offering an update to a sink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The sink queued the update
    Accepted,
    /// The sink had no room; the update was discarded for this sink
    Dropped,
    /// The receiving side is gone; the sink will be unregistered
    Closed,
}

/// Receiver of enabled-set updates.
///
/// `deliver` is called with the registry's membership lock held and must not
/// block.
pub trait EnabledSink: Send + Sync {
    fn deliver(&self, update: &EnabledUpdate) -> Delivery;
}

impl EnabledSink for mpsc::Sender<EnabledUpdate> {
    fn deliver(&self, update: &EnabledUpdate) -> Delivery {
        match self.try_send(update.clone()) {
            Ok(()) => Delivery::Accepted,
            Err(mpsc::error::TrySendError::Full(_)) => Delivery::Dropped,
            Err(mpsc::error::TrySendError::Closed(_)) => Delivery::Closed,
        }
    }
}

impl EnabledSink for mpsc::UnboundedSender<EnabledUpdate> {
    fn deliver(&self, update: &EnabledUpdate) -> Delivery {
        match self.send(update.clone()) {
            Ok(()) => Delivery::Accepted,
            Err(_) => Delivery::Closed,
        }
    }
}

/// A broadcast sender with no live receivers still counts as accepted:
/// receivers can subscribe to it later. Lagging receivers are handled by the
/// broadcast channel itself.
impl EnabledSink for broadcast::Sender<EnabledUpdate> {
    fn deliver(&self, update: &EnabledUpdate) -> Delivery {
        let _ = self.send(update.clone());
        Delivery::Accepted
    }
}

impl EnabledSink for std::sync::mpsc::SyncSender<EnabledUpdate> {
    fn deliver(&self, update: &EnabledUpdate) -> Delivery {
        match self.try_send(update.clone()) {
            Ok(()) => Delivery::Accepted,
            Err(std::sync::mpsc::TrySendError::Full(_)) => Delivery::Dropped,
            Err(std::sync::mpsc::TrySendError::Disconnected(_)) => Delivery::Closed,
        }
    }
}
