//! Position Registry
//!
//! A fixed-capacity table of node positions with one reader/writer lock per
//! slot, plus the enabled/disabled membership of every node.
//!
//! Two locking domains never nest into each other:
//! - each slot's `RwLock<Position>` guards that slot's coordinates only;
//! - the membership lock guards the subscriber list and change sequence, and
//!   serializes every write of the per-slot enabled flags.
//!
//! Position reads and writes gate on the enabled flag with an atomic load, so
//! they never wait on membership changes and membership changes never wait on
//! them.

use super::address::AddressResolver;
use super::events::{
    Delivery, EnabledSink, EnabledUpdate, MembershipChange, MembershipSnapshot,
};
use super::position::{Position, UNREACHABLE_DISTANCE};
use crate::error::{Error, Result};
use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

// =============================================================================
// Constants
// =============================================================================

/// Default queue size for subscriptions created by the registry
pub const DEFAULT_NOTIFY_QUEUE_CAPACITY: usize = 1024;

/// Largest queue size a subscription can have; larger requests are clamped
pub const MAX_NOTIFY_QUEUE_CAPACITY: usize = tokio::sync::Semaphore::MAX_PERMITS;

/// Cache line size for alignment
const CACHE_LINE_SIZE: usize = 64;

// =============================================================================
// Position Slot
// =============================================================================

/// Storage for a single node.
/// Aligned to 64 bytes so writers of neighbouring slots don't false-share.
#[repr(C, align(64))]
#[derive(Debug)]
struct PositionSlot {
    position: RwLock<Position>,
    /// Written only while the membership lock is held exclusively
    enabled: AtomicBool,
}

impl PositionSlot {
    fn new() -> Self {
        Self {
            position: RwLock::new(Position::ORIGIN),
            enabled: AtomicBool::new(false),
        }
    }

    #[inline]
    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }
}

// =============================================================================
// Membership
// =============================================================================

struct Membership {
    subscribers: Vec<Box<dyn EnabledSink>>,
    /// Number of membership changes so far
    sequence: u64,
}

// =============================================================================
// Statistics
// =============================================================================

/// Registry-wide counters
#[derive(Debug, Default)]
pub struct RegistryStats {
    /// Successful position writes
    pub position_updates: AtomicU64,
    /// Enable/disable calls that took effect
    pub membership_changes: AtomicU64,
    /// Updates accepted by a sink
    pub notifications_delivered: AtomicU64,
    /// Updates discarded because a sink was full
    pub notifications_dropped: AtomicU64,
    /// Sinks removed because their receiver was gone
    pub sinks_pruned: AtomicU64,
}

impl RegistryStats {
    /// Create a snapshot of current stats
    pub fn snapshot(&self) -> RegistryStatsSnapshot {
        RegistryStatsSnapshot {
            position_updates: self.position_updates.load(Ordering::Relaxed),
            membership_changes: self.membership_changes.load(Ordering::Relaxed),
            notifications_delivered: self.notifications_delivered.load(Ordering::Relaxed),
            notifications_dropped: self.notifications_dropped.load(Ordering::Relaxed),
            sinks_pruned: self.sinks_pruned.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of registry statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryStatsSnapshot {
    pub position_updates: u64,
    pub membership_changes: u64,
    pub notifications_delivered: u64,
    pub notifications_dropped: u64,
    pub sinks_pruned: u64,
}

// =============================================================================
// Position Registry
// =============================================================================

/// Concurrent position and membership registry
pub struct PositionRegistry {
    slots: Box<[PositionSlot]>,
    membership: RwLock<Membership>,
    resolver: Option<Arc<dyn AddressResolver>>,
    stats: RegistryStats,
}

impl std::fmt::Debug for PositionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PositionRegistry")
            .field("capacity", &self.slots.len())
            .field("has_resolver", &self.resolver.is_some())
            .finish()
    }
}

impl PositionRegistry {
    /// Create a registry with `capacity` disabled slots at the origin
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self::build(capacity, None))
    }

    /// Create a registry that also accepts address-based operations
    pub fn with_resolver(capacity: usize, resolver: Arc<dyn AddressResolver>) -> Arc<Self> {
        Arc::new(Self::build(capacity, Some(resolver)))
    }

    fn build(capacity: usize, resolver: Option<Arc<dyn AddressResolver>>) -> Self {
        let slots: Box<[PositionSlot]> = (0..capacity).map(|_| PositionSlot::new()).collect();

        Self {
            slots,
            membership: RwLock::new(Membership {
                subscribers: Vec::new(),
                sequence: 0,
            }),
            resolver,
            stats: RegistryStats::default(),
        }
    }

    /// Number of slots, fixed for the registry's lifetime
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Whether address-based operations are available
    pub fn has_resolver(&self) -> bool {
        self.resolver.is_some()
    }

    #[inline]
    fn slot(&self, index: usize) -> Result<&PositionSlot> {
        self.slots.get(index).ok_or(Error::IndexOutOfRange {
            index,
            capacity: self.slots.len(),
        })
    }

    // -------------------------------------------------------------------------
    // Position table
    // -------------------------------------------------------------------------

    /// Copy of the position at `index`
    pub fn get(&self, index: usize) -> Result<Position> {
        let slot = self.slot(index)?;
        let position = slot.position.read();
        if !slot.is_enabled() {
            return Err(Error::NodeDisabled { index });
        }
        Ok(*position)
    }

    /// Replace all three coordinates of the node at `index`
    pub fn set(&self, index: usize, x: f64, y: f64, height: f64) -> Result<()> {
        self.set_position(index, &Position::new(x, y, height))
    }

    /// Replace the position of the node at `index`
    pub fn set_position(&self, index: usize, position: &Position) -> Result<()> {
        let slot = self.slot(index)?;
        let mut current = slot.position.write();
        if !slot.is_enabled() {
            return Err(Error::NodeDisabled { index });
        }
        if !position.is_finite() {
            return Err(Error::NonFinitePosition { index });
        }
        *current = *position;
        drop(current);

        self.stats.position_updates.fetch_add(1, Ordering::Relaxed);
        trace!(index, position = %position, "Position updated");
        Ok(())
    }

    /// Euclidean distance between two nodes.
    ///
    /// Returns [`UNREACHABLE_DISTANCE`] when either node is out of range or
    /// disabled.
    pub fn distance(&self, index1: usize, index2: usize) -> f64 {
        match (self.get(index1), self.get(index2)) {
            (Ok(a), Ok(b)) => a.distance_to(&b),
            _ => UNREACHABLE_DISTANCE,
        }
    }

    /// Write a position regardless of the enabled flag. Used to seed
    /// configured start positions before nodes join.
    pub(crate) fn seed_position(&self, index: usize, position: &Position) -> Result<()> {
        let slot = self.slot(index)?;
        if !position.is_finite() {
            return Err(Error::NonFinitePosition { index });
        }
        *slot.position.write() = *position;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Address indirection
    // -------------------------------------------------------------------------

    /// Index of the node with `address`
    pub fn resolve(&self, address: &str) -> Result<usize> {
        let resolver = self.resolver.as_ref().ok_or(Error::NoAddressResolver)?;
        resolver
            .resolve(address)
            .ok_or_else(|| Error::AddressNotFound {
                address: address.to_string(),
            })
    }

    /// Copy of the position of the node with `address`
    pub fn get_by_address(&self, address: &str) -> Result<Position> {
        let index = self.resolve(address)?;
        self.get(index)
    }

    pub fn set_by_address(&self, address: &str, x: f64, y: f64, height: f64) -> Result<()> {
        let index = self.resolve(address)?;
        self.set(index, x, y, height)
    }

    pub fn set_position_by_address(&self, address: &str, position: &Position) -> Result<()> {
        let index = self.resolve(address)?;
        self.set_position(index, position)
    }

    // -------------------------------------------------------------------------
    // Membership
    // -------------------------------------------------------------------------

    /// Mark a node enabled and notify every subscriber
    pub fn enable(&self, index: usize) -> Result<()> {
        self.change_membership(MembershipChange::Enabled { index })
    }

    /// Mark a node disabled and notify every subscriber
    pub fn disable(&self, index: usize) -> Result<()> {
        self.change_membership(MembershipChange::Disabled { index })
    }

    fn change_membership(&self, change: MembershipChange) -> Result<()> {
        let index = change.index();
        let slot = self.slot(index)?;

        let mut membership = self.membership.write();
        slot.enabled.store(change.is_enable(), Ordering::Release);
        membership.sequence += 1;

        let update = EnabledUpdate {
            sequence: membership.sequence,
            change,
            enabled: self.collect_enabled().into(),
            changed_at: Utc::now(),
        };
        self.stats.membership_changes.fetch_add(1, Ordering::Relaxed);

        debug!(
            index,
            enabled = change.is_enable(),
            sequence = update.sequence,
            enabled_count = update.enabled.len(),
            "Membership changed"
        );

        self.notify(&mut membership, &update);
        Ok(())
    }

    /// Offer `update` to every sink in registration order. Caller holds the
    /// membership lock exclusively.
    fn notify(&self, membership: &mut Membership, update: &EnabledUpdate) {
        let stats = &self.stats;
        membership.subscribers.retain(|sink| match sink.deliver(update) {
            Delivery::Accepted => {
                stats.notifications_delivered.fetch_add(1, Ordering::Relaxed);
                true
            }
            Delivery::Dropped => {
                stats.notifications_dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    sequence = update.sequence,
                    "Subscriber queue full, dropping enabled-set update"
                );
                true
            }
            Delivery::Closed => {
                stats.sinks_pruned.fetch_add(1, Ordering::Relaxed);
                debug!(sequence = update.sequence, "Pruning closed subscriber");
                false
            }
        });
    }

    /// Ascending enabled indices. Caller holds the membership lock.
    fn collect_enabled(&self) -> Vec<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_enabled())
            .map(|(index, _)| index)
            .collect()
    }

    /// Whether the node at `index` is enabled; `false` when out of range
    pub fn is_enabled(&self, index: usize) -> bool {
        let _membership = self.membership.read();
        self.slots.get(index).map_or(false, PositionSlot::is_enabled)
    }

    /// Ascending indices of all enabled nodes
    pub fn enabled(&self) -> Vec<usize> {
        let _membership = self.membership.read();
        self.collect_enabled()
    }

    /// Enabled set together with the sequence of the last change
    pub fn snapshot(&self) -> MembershipSnapshot {
        let membership = self.membership.read();
        MembershipSnapshot {
            sequence: membership.sequence,
            enabled: self.collect_enabled(),
        }
    }

    // -------------------------------------------------------------------------
    // Subscriptions
    // -------------------------------------------------------------------------

    /// Register a sink for enabled-set updates.
    ///
    /// The sink only receives updates for changes made after registration.
    pub fn register_enabled_changed<S>(&self, sink: S)
    where
        S: EnabledSink + 'static,
    {
        let mut membership = self.membership.write();
        membership.subscribers.push(Box::new(sink));
        debug!(
            subscribers = membership.subscribers.len(),
            "Registered enabled-set subscriber"
        );
    }

    /// Register a bounded channel and return its receiving end
    pub fn subscribe(&self, queue_capacity: usize) -> mpsc::Receiver<EnabledUpdate> {
        let (tx, rx) = bounded_channel(queue_capacity);
        self.register_enabled_changed(tx);
        rx
    }

    /// Like [`subscribe`](Self::subscribe), but also returns the enabled set
    /// as of registration. The first update received has sequence
    /// `snapshot.sequence + 1`.
    pub fn subscribe_with_snapshot(
        &self,
        queue_capacity: usize,
    ) -> (MembershipSnapshot, mpsc::Receiver<EnabledUpdate>) {
        let (tx, rx) = bounded_channel(queue_capacity);

        let mut membership = self.membership.write();
        membership.subscribers.push(Box::new(tx));
        let snapshot = MembershipSnapshot {
            sequence: membership.sequence,
            enabled: self.collect_enabled(),
        };
        (snapshot, rx)
    }

    /// Number of registered sinks
    pub fn subscriber_count(&self) -> usize {
        self.membership.read().subscribers.len()
    }

    /// Get registry statistics
    pub fn stats(&self) -> RegistryStatsSnapshot {
        self.stats.snapshot()
    }
}

/// Bounded channel with `queue_capacity` clamped to `1..=MAX_NOTIFY_QUEUE_CAPACITY`
fn bounded_channel(
    queue_capacity: usize,
) -> (mpsc::Sender<EnabledUpdate>, mpsc::Receiver<EnabledUpdate>) {
    mpsc::channel(queue_capacity.clamp(1, MAX_NOTIFY_QUEUE_CAPACITY))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::collections::HashMap;
    use std::thread;
    use std::time::Duration;

    fn enabled_of(update: &EnabledUpdate) -> Vec<usize> {
        update.enabled.to_vec()
    }

    #[test]
    fn test_slot_cache_line_alignment() {
        assert_eq!(std::mem::align_of::<PositionSlot>(), CACHE_LINE_SIZE);
        assert!(std::mem::size_of::<PositionSlot>() <= CACHE_LINE_SIZE);
    }

    #[test]
    fn test_fresh_registry_is_disabled() {
        let registry = PositionRegistry::new(4);
        assert_eq!(registry.capacity(), 4);
        assert!(registry.enabled().is_empty());

        for i in 0..4 {
            assert_matches!(registry.get(i), Err(Error::NodeDisabled { index }) if index == i);
            assert!(!registry.is_enabled(i));
        }

        registry.enable(2).unwrap();
        assert_eq!(registry.get(2).unwrap(), Position::ORIGIN);
        assert!(registry.is_enabled(2));
    }

    #[test]
    fn test_out_of_range_has_no_side_effect() {
        let registry = PositionRegistry::new(2);
        let mut rx = registry.subscribe(8);
        registry.enable(0).unwrap();
        registry.set(0, 1.0, 2.0, 3.0).unwrap();
        let _ = rx.try_recv().unwrap();

        assert_matches!(
            registry.get(2),
            Err(Error::IndexOutOfRange { index: 2, capacity: 2 })
        );
        assert_matches!(
            registry.set(5, 9.0, 9.0, 9.0),
            Err(Error::IndexOutOfRange { index: 5, capacity: 2 })
        );
        assert_matches!(registry.enable(2), Err(Error::IndexOutOfRange { .. }));
        assert_matches!(registry.disable(7), Err(Error::IndexOutOfRange { .. }));
        assert!(!registry.is_enabled(2));

        assert_eq!(registry.get(0).unwrap(), Position::new(1.0, 2.0, 3.0));
        assert_matches!(registry.get(1), Err(Error::NodeDisabled { index: 1 }));
        assert_eq!(registry.enabled(), vec![0]);
        assert!(rx.try_recv().is_err());
        assert_eq!(registry.stats().membership_changes, 1);
    }

    #[test]
    fn test_set_then_get_round_trip() {
        let registry = PositionRegistry::new(3);
        registry.enable(1).unwrap();
        registry.set(1, 12.5, -3.25, 40.0).unwrap();
        assert_eq!(registry.get(1).unwrap(), Position::new(12.5, -3.25, 40.0));

        registry
            .set_position(1, &Position::new(0.5, 0.25, 0.0))
            .unwrap();
        assert_eq!(registry.get(1).unwrap(), Position::new(0.5, 0.25, 0.0));
        assert_eq!(registry.stats().position_updates, 2);
    }

    #[test]
    fn test_disabled_node_keeps_position() {
        let registry = PositionRegistry::new(1);
        registry.enable(0).unwrap();
        registry.set(0, 7.0, 8.0, 9.0).unwrap();
        registry.disable(0).unwrap();

        assert_matches!(registry.get(0), Err(Error::NodeDisabled { index: 0 }));
        assert_matches!(
            registry.set(0, 1.0, 1.0, 1.0),
            Err(Error::NodeDisabled { index: 0 })
        );

        registry.enable(0).unwrap();
        assert_eq!(registry.get(0).unwrap(), Position::new(7.0, 8.0, 9.0));
    }

    #[test]
    fn test_non_finite_position_rejected() {
        let registry = PositionRegistry::new(1);
        registry.enable(0).unwrap();
        registry.set(0, 1.0, 1.0, 1.0).unwrap();

        assert_matches!(
            registry.set(0, f64::NAN, 0.0, 0.0),
            Err(Error::NonFinitePosition { index: 0 })
        );
        assert_eq!(registry.get(0).unwrap(), Position::new(1.0, 1.0, 1.0));
    }

    #[test]
    fn test_distance() {
        let registry = PositionRegistry::new(4);
        for i in 0..3 {
            registry.enable(i).unwrap();
        }
        registry.set(0, 0.0, 0.0, 0.0).unwrap();
        registry.set(1, 3.0, 4.0, 12.0).unwrap();
        registry.set(2, -1.0, 2.0, 0.5).unwrap();

        assert_eq!(registry.distance(0, 1), 13.0);
        assert_eq!(registry.distance(1, 1), 0.0);
        for (i, j) in [(0, 1), (0, 2), (1, 2)] {
            assert_eq!(registry.distance(i, j), registry.distance(j, i));
        }

        // Slot 3 is disabled, slot 9 does not exist
        assert_eq!(registry.distance(0, 3), UNREACHABLE_DISTANCE);
        assert_eq!(registry.distance(3, 0), UNREACHABLE_DISTANCE);
        assert_eq!(registry.distance(3, 3), UNREACHABLE_DISTANCE);
        assert_eq!(registry.distance(0, 9), UNREACHABLE_DISTANCE);
        assert_eq!(registry.distance(9, 9), UNREACHABLE_DISTANCE);
    }

    #[test]
    fn test_address_operations() {
        let mut addresses = HashMap::new();
        addresses.insert("02:00:00:00:00:01".to_string(), 0);
        addresses.insert("02:00:00:00:00:02".to_string(), 1);
        addresses.insert("02:00:00:00:00:09".to_string(), 9);
        let registry = PositionRegistry::with_resolver(2, Arc::new(addresses));
        assert!(registry.has_resolver());

        registry.enable(0).unwrap();
        registry
            .set_by_address("02:00:00:00:00:01", 5.0, 6.0, 7.0)
            .unwrap();
        assert_eq!(registry.get(0).unwrap(), Position::new(5.0, 6.0, 7.0));
        assert_eq!(
            registry.get_by_address("02:00:00:00:00:01").unwrap(),
            Position::new(5.0, 6.0, 7.0)
        );

        registry
            .set_position_by_address("02:00:00:00:00:01", &Position::new(1.0, 0.0, 0.0))
            .unwrap();
        assert_eq!(registry.get(0).unwrap(), Position::new(1.0, 0.0, 0.0));

        // Errors from the index operation are forwarded
        assert_matches!(
            registry.get_by_address("02:00:00:00:00:02"),
            Err(Error::NodeDisabled { index: 1 })
        );
        assert_matches!(
            registry.set_by_address("02:00:00:00:00:02", 1.0, 1.0, 1.0),
            Err(Error::NodeDisabled { index: 1 })
        );
        assert_matches!(
            registry.get_by_address("02:00:00:00:00:09"),
            Err(Error::IndexOutOfRange { index: 9, capacity: 2 })
        );

        assert_matches!(
            registry.get_by_address("02:00:00:00:00:03"),
            Err(Error::AddressNotFound { address }) if address == "02:00:00:00:00:03"
        );
    }

    #[test]
    fn test_address_operations_without_resolver() {
        let registry = PositionRegistry::new(2);
        registry.enable(0).unwrap();
        assert!(!registry.has_resolver());
        assert_matches!(registry.get_by_address("aa"), Err(Error::NoAddressResolver));
        assert_matches!(
            registry.set_by_address("aa", 0.0, 0.0, 0.0),
            Err(Error::NoAddressResolver)
        );
    }

    #[test]
    fn test_notifications_are_ascending_and_ordered() {
        let registry = PositionRegistry::new(4);
        let mut rx1 = registry.subscribe(8);
        let mut rx2 = registry.subscribe(8);

        registry.enable(3).unwrap();
        registry.enable(1).unwrap();

        for rx in [&mut rx1, &mut rx2] {
            let first = rx.try_recv().unwrap();
            assert_eq!(first.sequence, 1);
            assert_eq!(first.change, MembershipChange::Enabled { index: 3 });
            assert_eq!(enabled_of(&first), vec![3]);

            let second = rx.try_recv().unwrap();
            assert_eq!(second.sequence, 2);
            assert_eq!(enabled_of(&second), vec![1, 3]);

            assert!(rx.try_recv().is_err());
        }
    }

    #[test]
    fn test_redundant_disable_still_notifies() {
        let registry = PositionRegistry::new(4);
        registry.enable(2).unwrap();
        let mut rx = registry.subscribe(8);

        registry.disable(0).unwrap();

        let update = rx.try_recv().unwrap();
        assert_eq!(update.change, MembershipChange::Disabled { index: 0 });
        assert_eq!(enabled_of(&update), vec![2]);
    }

    #[test]
    fn test_late_subscriber_gets_no_backlog() {
        let registry = PositionRegistry::new(4);
        registry.enable(0).unwrap();
        registry.enable(1).unwrap();
        registry.disable(0).unwrap();

        let mut rx = registry.subscribe(8);
        assert!(rx.try_recv().is_err());

        registry.enable(3).unwrap();
        let update = rx.try_recv().unwrap();
        assert_eq!(update.sequence, 4);
        assert_eq!(enabled_of(&update), vec![1, 3]);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_subscribe_with_snapshot() {
        let registry = PositionRegistry::new(4);
        registry.enable(0).unwrap();
        registry.enable(2).unwrap();

        let (snapshot, mut rx) = registry.subscribe_with_snapshot(4);
        assert_eq!(snapshot.sequence, 2);
        assert_eq!(snapshot.enabled, vec![0, 2]);
        assert_eq!(registry.snapshot(), snapshot);

        registry.disable(0).unwrap();
        let update = rx.try_recv().unwrap();
        assert_eq!(update.sequence, snapshot.sequence + 1);
        assert_eq!(enabled_of(&update), vec![2]);
    }

    #[test]
    fn test_oversized_queue_capacity_is_clamped() {
        let registry = PositionRegistry::new(2);
        let mut rx = registry.subscribe(usize::MAX);
        let (_, mut rx_snapshot) = registry.subscribe_with_snapshot(4_000_000_000_000_000_000);
        let mut rx_zero = registry.subscribe(0);

        registry.enable(1).unwrap();
        registry.enable(0).unwrap();

        assert_eq!(rx.try_recv().unwrap().sequence, 1);
        assert_eq!(rx.try_recv().unwrap().sequence, 2);
        assert_eq!(rx_snapshot.try_recv().unwrap().sequence, 1);
        assert_eq!(rx_snapshot.try_recv().unwrap().sequence, 2);

        // Zero is raised to a single-slot queue
        assert_eq!(rx_zero.try_recv().unwrap().sequence, 1);
        assert!(rx_zero.try_recv().is_err());
        assert_eq!(registry.stats().notifications_dropped, 1);
    }

    #[test]
    fn test_full_subscriber_drops_without_blocking() {
        let registry = PositionRegistry::new(4);
        let mut slow = registry.subscribe(1);
        let mut fast = registry.subscribe(16);

        registry.enable(0).unwrap();
        registry.enable(1).unwrap();
        registry.enable(2).unwrap();

        assert_eq!(slow.try_recv().unwrap().sequence, 1);
        assert!(slow.try_recv().is_err());

        let sequences: Vec<u64> = std::iter::from_fn(|| fast.try_recv().ok())
            .map(|update| update.sequence)
            .collect();
        assert_eq!(sequences, vec![1, 2, 3]);

        let stats = registry.stats();
        assert_eq!(stats.notifications_delivered, 4);
        assert_eq!(stats.notifications_dropped, 2);
        assert_eq!(registry.subscriber_count(), 2);
    }

    #[test]
    fn test_closed_subscriber_is_pruned() {
        let registry = PositionRegistry::new(2);
        let rx = registry.subscribe(4);
        let (tx, mut kept) = mpsc::unbounded_channel::<EnabledUpdate>();
        registry.register_enabled_changed(tx);
        assert_eq!(registry.subscriber_count(), 2);

        drop(rx);
        registry.enable(1).unwrap();

        assert_eq!(registry.subscriber_count(), 1);
        assert_eq!(registry.stats().sinks_pruned, 1);
        assert_eq!(enabled_of(&kept.try_recv().unwrap()), vec![1]);
    }

    #[tokio::test]
    async fn test_async_subscriber_receives_updates() {
        let registry = PositionRegistry::new(8);
        let mut rx = registry.subscribe(DEFAULT_NOTIFY_QUEUE_CAPACITY);

        let writer = registry.clone();
        tokio::task::spawn_blocking(move || {
            writer.enable(5).unwrap();
            writer.disable(5).unwrap();
        })
        .await
        .unwrap();

        assert_eq!(enabled_of(&rx.recv().await.unwrap()), vec![5]);
        assert!(rx.recv().await.unwrap().enabled.is_empty());
    }

    #[test]
    fn test_writers_on_different_slots_do_not_contend() {
        let registry = PositionRegistry::new(2);
        registry.enable(0).unwrap();
        registry.enable(1).unwrap();

        // Hold slot 0 exclusively for the whole test
        let guard = registry.slots[0].position.write();

        let (done_tx, done_rx) = std::sync::mpsc::channel();
        let writer = registry.clone();
        let other = thread::spawn(move || {
            writer.set(1, 1.0, 1.0, 1.0).unwrap();
            done_tx.send(()).unwrap();
        });
        done_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("write to slot 1 blocked by a lock on slot 0");
        other.join().unwrap();

        let (same_tx, same_rx) = std::sync::mpsc::channel();
        let writer = registry.clone();
        let same = thread::spawn(move || {
            writer.set(0, 2.0, 2.0, 2.0).unwrap();
            same_tx.send(()).unwrap();
        });
        assert!(same_rx.recv_timeout(Duration::from_millis(100)).is_err());

        drop(guard);
        same_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        same.join().unwrap();
        assert_eq!(registry.get(0).unwrap(), Position::new(2.0, 2.0, 2.0));
    }

    #[test]
    fn test_membership_changes_do_not_wait_on_position_locks() {
        let registry = PositionRegistry::new(2);
        registry.enable(0).unwrap();
        let guard = registry.slots[0].position.write();

        let (done_tx, done_rx) = std::sync::mpsc::channel();
        let writer = registry.clone();
        let handle = thread::spawn(move || {
            writer.enable(1).unwrap();
            writer.disable(0).unwrap();
            done_tx.send(writer.enabled()).unwrap();
        });

        assert_eq!(
            done_rx.recv_timeout(Duration::from_secs(5)).unwrap(),
            vec![1]
        );
        handle.join().unwrap();
        drop(guard);
    }

    #[test]
    fn test_concurrent_writers_same_slot_never_tear() {
        let registry = PositionRegistry::new(1);
        registry.enable(0).unwrap();

        let writers: Vec<_> = (1..=8)
            .map(|w| {
                let registry = registry.clone();
                thread::spawn(move || {
                    for k in 0..1_000 {
                        let v = (w * 10_000 + k) as f64;
                        registry.set(0, v, v, v).unwrap();
                    }
                })
            })
            .collect();

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let registry = registry.clone();
                thread::spawn(move || {
                    for _ in 0..2_000 {
                        let p = registry.get(0).unwrap();
                        assert_eq!(p.x, p.y);
                        assert_eq!(p.y, p.height);
                    }
                })
            })
            .collect();

        for handle in writers.into_iter().chain(readers) {
            handle.join().unwrap();
        }

        let last = registry.get(0).unwrap();
        assert_eq!(last.x, last.y);
        assert_eq!(last.y, last.height);
        let writer = (last.x as u64) / 10_000;
        assert!((1..=8).contains(&writer));
        assert_eq!(registry.stats().position_updates, 8_000);
    }

    #[test]
    fn test_concurrent_enables_are_linearized() {
        let registry = PositionRegistry::new(64);
        let mut rx = registry.subscribe(128);

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let registry = registry.clone();
                thread::spawn(move || {
                    for i in 0..8 {
                        registry.enable(t * 8 + i).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let mut previous: Vec<usize> = Vec::new();
        for expected_sequence in 1..=64u64 {
            let update = rx.try_recv().unwrap();
            assert_eq!(update.sequence, expected_sequence);

            let current = enabled_of(&update);
            assert_eq!(current.len(), previous.len() + 1);
            assert!(current.windows(2).all(|w| w[0] < w[1]));
            assert!(previous.iter().all(|i| current.contains(i)));
            assert!(current.contains(&update.change.index()));
            previous = current;
        }
        assert_eq!(previous, (0..64).collect::<Vec<_>>());
    }

    #[test]
    fn test_seed_position_bypasses_enabled_gate() {
        let registry = PositionRegistry::new(1);
        registry
            .seed_position(0, &Position::new(4.0, 5.0, 6.0))
            .unwrap();
        assert_matches!(registry.get(0), Err(Error::NodeDisabled { index: 0 }));

        registry.enable(0).unwrap();
        assert_eq!(registry.get(0).unwrap(), Position::new(4.0, 5.0, 6.0));
        assert_eq!(registry.stats().position_updates, 0);
    }
}
