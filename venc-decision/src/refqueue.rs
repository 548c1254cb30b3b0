//! Reference dependency queue.
//!
//! A fixed-capacity, hash-indexed table of reference entries. Slots are
//! found by a linear probe with wraparound from `hash(coding_order)`; no
//! allocation happens after construction. Every slot is either `Vacant` or
//! `Live`, and all lifecycle transitions go through the checked operations
//! below: a slot recycles only when its dependency count has reached zero
//! and the structure builder has sealed it (no future picture can bind).

use crate::error::{DecisionError, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{trace, warn};
use venc_core::error::Error as CoreError;
use venc_core::picture::PixelBufferHandle;

/// Identifies a downstream consumer of a reference; in practice the coding
/// order of the decided picture doing the consuming.
pub type ConsumerId = u64;

/// Index of a slot in the queue table.
pub type SlotIndex = usize;

/// A live reference entry.
///
/// The entry tracks reference-eligibility bookkeeping and buffer ownership;
/// the picture descriptor itself lives with the decision stage.
#[derive(Debug)]
pub struct ReferenceEntry {
    pub coding_order: u64,
    pub display_order: u64,
    pub temporal_layer: u8,
    pub buffer: PixelBufferHandle,
    /// Consumers with an outstanding dependency on this entry; one edge
    /// per consumer, so the dependency count is the length.
    consumers: Vec<ConsumerId>,
    /// Set once the structure builder confirms no future picture will bind.
    sealed: bool,
}

impl ReferenceEntry {
    /// Create an entry with no consumers, not yet sealed.
    pub fn new(
        coding_order: u64,
        display_order: u64,
        temporal_layer: u8,
        buffer: PixelBufferHandle,
    ) -> Self {
        Self {
            coding_order,
            display_order,
            temporal_layer,
            buffer,
            consumers: Vec::new(),
            sealed: false,
        }
    }

    /// Number of not-yet-reported consumers.
    pub fn dependency_count(&self) -> usize {
        self.consumers.len()
    }

    /// Whether the end-of-window guarantee holds for this entry.
    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Whether `consumer` holds an outstanding dependency.
    pub fn is_bound_by(&self, consumer: ConsumerId) -> bool {
        self.consumers.contains(&consumer)
    }
}

/// A recycled entry handed back for buffer reclamation.
#[derive(Debug, PartialEq, Eq)]
pub struct ReleasedEntry {
    pub coding_order: u64,
    pub buffer: PixelBufferHandle,
}

#[derive(Debug)]
enum Slot {
    Vacant,
    Live(ReferenceEntry),
}

/// Fixed-capacity open-addressed reference table.
#[derive(Debug)]
pub struct ReferenceQueue {
    slots: Vec<Slot>,
    occupied: usize,
}

/// Fold a 64-bit coding order into the 32-bit probe seed.
fn fold_hash(coding_order: u64) -> u32 {
    let low32 = coding_order & 0xFFFF_FFFF;
    ((coding_order >> 32) + low32) as u32
}

impl ReferenceQueue {
    /// Create a queue with `capacity` slots. Capacity is fixed for the
    /// session; it is validated against the GOP structure at startup.
    pub fn with_capacity(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || Slot::Vacant);
        Self { slots, occupied: 0 }
    }

    fn probe_start(&self, coding_order: u64) -> usize {
        fold_hash(coding_order) as usize % self.slots.len()
    }

    /// Place `entry` in a free slot, probing from its hash.
    ///
    /// A full probe cycle without a vacancy means the window is mis-sized
    /// for the requested GOP structure; that is fatal, not recoverable.
    pub fn allocate(&mut self, entry: ReferenceEntry) -> Result<SlotIndex> {
        if self.lookup(entry.coding_order).is_some() {
            return Err(CoreError::consistency(format!(
                "reference entry {} allocated twice",
                entry.coding_order
            ))
            .into());
        }

        let start = self.probe_start(entry.coding_order);
        let len = self.slots.len();
        for step in 0..len {
            let i = (start + step) % len;
            if matches!(self.slots[i], Slot::Vacant) {
                trace!(
                    coding_order = entry.coding_order,
                    slot = i,
                    "reference entry allocated"
                );
                self.slots[i] = Slot::Live(entry);
                self.occupied += 1;
                return Ok(i);
            }
        }
        warn!(
            coding_order = entry.coding_order,
            occupied = self.occupied,
            capacity = len,
            "reference window exhausted"
        );
        Err(CoreError::CapacityExhausted {
            coding_order: entry.coding_order,
            occupied: self.occupied,
            capacity: len,
        }
        .into())
    }

    /// Find the live slot for `coding_order`, probing the full cycle.
    pub fn lookup(&self, coding_order: u64) -> Option<SlotIndex> {
        let start = self.probe_start(coding_order);
        let len = self.slots.len();
        (0..len)
            .map(|step| (start + step) % len)
            .find(|&i| matches!(&self.slots[i], Slot::Live(e) if e.coding_order == coding_order))
    }

    /// Record a (reference, consumer) dependency edge, incrementing the
    /// dependency count.
    ///
    /// One edge per distinct consumer: the caller dedupes a reference that
    /// appears in both of a consumer's lists, and a repeated bind across
    /// requests is a protocol violation.
    pub fn bind(&mut self, slot: SlotIndex, consumer: ConsumerId) -> Result<()> {
        let entry = self.live_mut(slot)?;
        if entry.is_bound_by(consumer) {
            return Err(CoreError::consistency(format!(
                "consumer {} already bound to reference {}",
                consumer, entry.coding_order
            ))
            .into());
        }
        if entry.sealed {
            return Err(CoreError::consistency(format!(
                "bind to sealed reference {}",
                entry.coding_order
            ))
            .into());
        }
        trace!(
            coding_order = entry.coding_order,
            consumer,
            count = entry.consumers.len() + 1,
            "dependency bound"
        );
        entry.consumers.push(consumer);
        Ok(())
    }

    /// Remove a (reference, consumer) edge, decrementing the dependency
    /// count.
    ///
    /// A report with no matching edge is rejected as a duplicate. Returns
    /// the recycled entry when the count reaches zero on a sealed slot.
    pub fn release(
        &mut self,
        slot: SlotIndex,
        consumer: ConsumerId,
    ) -> Result<Option<ReleasedEntry>> {
        let entry = self.live_mut(slot)?;
        let Some(pos) = entry.consumers.iter().position(|&c| c == consumer) else {
            let coding_order = entry.coding_order;
            warn!(coding_order, consumer, "duplicate consumption report");
            return Err(DecisionError::DuplicateReport {
                coding_order,
                consumer,
            });
        };
        entry.consumers.swap_remove(pos);
        trace!(
            coding_order = entry.coding_order,
            consumer,
            count = entry.consumers.len(),
            "dependency released"
        );
        Ok(self.try_recycle(slot))
    }

    /// End-of-window confirmation from the structure builder: no future
    /// picture will bind to this entry. Completes the release immediately
    /// if the count is already zero.
    pub fn seal(&mut self, slot: SlotIndex) -> Result<Option<ReleasedEntry>> {
        let entry = self.live_mut(slot)?;
        entry.sealed = true;
        trace!(coding_order = entry.coding_order, "reference sealed");
        Ok(self.try_recycle(slot))
    }

    fn try_recycle(&mut self, slot: SlotIndex) -> Option<ReleasedEntry> {
        let recycle = matches!(
            &self.slots[slot],
            Slot::Live(e) if e.sealed && e.consumers.is_empty()
        );
        if !recycle {
            return None;
        }
        let Slot::Live(entry) = std::mem::replace(&mut self.slots[slot], Slot::Vacant) else {
            return None;
        };
        self.occupied -= 1;
        trace!(
            coding_order = entry.coding_order,
            occupancy = self.occupied,
            "reference slot recycled"
        );
        Some(ReleasedEntry {
            coding_order: entry.coding_order,
            buffer: entry.buffer,
        })
    }

    /// Inspect the entry at `slot`, if live.
    pub fn entry(&self, slot: SlotIndex) -> Option<&ReferenceEntry> {
        match self.slots.get(slot) {
            Some(Slot::Live(entry)) => Some(entry),
            _ => None,
        }
    }

    /// Coding orders of every live entry, unordered.
    pub fn live_coding_orders(&self) -> Vec<u64> {
        self.slots
            .iter()
            .filter_map(|s| match s {
                Slot::Live(e) => Some(e.coding_order),
                Slot::Vacant => None,
            })
            .collect()
    }

    /// Number of live slots.
    pub fn occupancy(&self) -> usize {
        self.occupied
    }

    /// Table capacity.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Verify the cooperative drain completed: every slot free.
    ///
    /// Live slots here mean a consumer never reported or an entry was never
    /// sealed; that is protocol non-compliance, reported with the offending
    /// coding orders, never silently forced.
    pub fn assert_drained(&self) -> Result<()> {
        let live = self.live_coding_orders();
        if live.is_empty() {
            Ok(())
        } else {
            Err(DecisionError::NotDrained { live_slots: live })
        }
    }

    fn live_mut(&mut self, slot: SlotIndex) -> Result<&mut ReferenceEntry> {
        match self.slots.get_mut(slot) {
            Some(Slot::Live(entry)) => Ok(entry),
            _ => Err(CoreError::consistency(format!(
                "operation on vacant reference slot {slot}"
            ))
            .into()),
        }
    }
}

/// Thread-safe reference queue shared between the decision stage and
/// downstream completion-report callers.
///
/// All operations serialize on one mutex; they are O(1) amortized and off
/// the per-pixel hot path. The lock is never held across a blocking wait.
#[derive(Debug)]
pub struct SharedReferenceQueue {
    inner: Arc<Mutex<ReferenceQueue>>,
}

impl SharedReferenceQueue {
    /// Create a shared queue with `capacity` slots.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ReferenceQueue::with_capacity(capacity))),
        }
    }

    /// Place an entry in a free slot.
    pub fn allocate(&self, entry: ReferenceEntry) -> Result<SlotIndex> {
        self.inner.lock().allocate(entry)
    }

    /// Find the live slot for a coding order.
    pub fn lookup(&self, coding_order: u64) -> Option<SlotIndex> {
        self.inner.lock().lookup(coding_order)
    }

    /// Record a dependency edge.
    pub fn bind(&self, slot: SlotIndex, consumer: ConsumerId) -> Result<()> {
        self.inner.lock().bind(slot, consumer)
    }

    /// Remove a dependency edge.
    pub fn release(&self, slot: SlotIndex, consumer: ConsumerId) -> Result<Option<ReleasedEntry>> {
        self.inner.lock().release(slot, consumer)
    }

    /// Seal an entry against future binds.
    pub fn seal(&self, slot: SlotIndex) -> Result<Option<ReleasedEntry>> {
        self.inner.lock().seal(slot)
    }

    /// Dependency count of the entry owning `coding_order`, if live.
    pub fn dependency_count(&self, coding_order: u64) -> Option<usize> {
        let queue = self.inner.lock();
        queue
            .lookup(coding_order)
            .and_then(|slot| queue.entry(slot).map(|e| e.dependency_count()))
    }

    /// Coding orders of every live entry.
    pub fn live_coding_orders(&self) -> Vec<u64> {
        self.inner.lock().live_coding_orders()
    }

    /// Number of live slots.
    pub fn occupancy(&self) -> usize {
        self.inner.lock().occupancy()
    }

    /// Table capacity.
    pub fn capacity(&self) -> usize {
        self.inner.lock().capacity()
    }

    /// Verify the cooperative drain completed.
    pub fn assert_drained(&self) -> Result<()> {
        self.inner.lock().assert_drained()
    }
}

impl Clone for SharedReferenceQueue {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use venc_core::pool::PictureBufferPool;

    fn entry(pool: &mut PictureBufferPool, coding_order: u64) -> ReferenceEntry {
        ReferenceEntry::new(coding_order, coding_order, 0, pool.acquire())
    }

    #[test]
    fn test_allocate_and_lookup() {
        let mut pool = PictureBufferPool::new();
        let mut queue = ReferenceQueue::with_capacity(4);

        let s0 = queue.allocate(entry(&mut pool, 0)).unwrap();
        let s1 = queue.allocate(entry(&mut pool, 1)).unwrap();
        assert_ne!(s0, s1);
        assert_eq!(queue.lookup(0), Some(s0));
        assert_eq!(queue.lookup(1), Some(s1));
        assert_eq!(queue.lookup(2), None);
        assert_eq!(queue.occupancy(), 2);
    }

    #[test]
    fn test_probe_wraps_on_collision() {
        // Capacity 4: coding orders 0 and 4 hash to the same start slot.
        let mut pool = PictureBufferPool::new();
        let mut queue = ReferenceQueue::with_capacity(4);
        queue.allocate(entry(&mut pool, 0)).unwrap();
        let s = queue.allocate(entry(&mut pool, 4)).unwrap();
        assert_eq!(queue.lookup(4), Some(s));
    }

    #[test]
    fn test_capacity_error_when_full() {
        let mut pool = PictureBufferPool::new();
        let mut queue = ReferenceQueue::with_capacity(1);
        queue.allocate(entry(&mut pool, 0)).unwrap();

        let err = queue.allocate(entry(&mut pool, 1)).unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(
            err,
            DecisionError::Core(CoreError::CapacityExhausted {
                coding_order: 1,
                occupied: 1,
                capacity: 1,
            })
        ));
    }

    #[test]
    fn test_release_requires_seal_and_zero_count() {
        let mut pool = PictureBufferPool::new();
        let mut queue = ReferenceQueue::with_capacity(4);
        let slot = queue.allocate(entry(&mut pool, 0)).unwrap();

        queue.bind(slot, 10).unwrap();
        queue.bind(slot, 11).unwrap();
        assert_eq!(queue.entry(slot).unwrap().dependency_count(), 2);

        // Count reaches zero but the entry is unsealed: slot stays live.
        assert!(queue.release(slot, 10).unwrap().is_none());
        assert!(queue.release(slot, 11).unwrap().is_none());
        assert_eq!(queue.occupancy(), 1);

        let released = queue.seal(slot).unwrap().unwrap();
        assert_eq!(released.coding_order, 0);
        assert_eq!(queue.occupancy(), 0);
        assert_eq!(queue.lookup(0), None);
    }

    #[test]
    fn test_sealed_then_last_release_recycles() {
        let mut pool = PictureBufferPool::new();
        let mut queue = ReferenceQueue::with_capacity(4);
        let slot = queue.allocate(entry(&mut pool, 3)).unwrap();
        queue.bind(slot, 20).unwrap();
        assert!(queue.seal(slot).unwrap().is_none());

        let released = queue.release(slot, 20).unwrap().unwrap();
        assert_eq!(released.coding_order, 3);
    }

    #[test]
    fn test_duplicate_report_rejected() {
        let mut pool = PictureBufferPool::new();
        let mut queue = ReferenceQueue::with_capacity(4);
        let slot = queue.allocate(entry(&mut pool, 0)).unwrap();
        queue.bind(slot, 10).unwrap();
        queue.bind(slot, 11).unwrap();

        queue.release(slot, 10).unwrap();
        let err = queue.release(slot, 10).unwrap_err();
        assert!(matches!(
            err,
            DecisionError::DuplicateReport {
                coding_order: 0,
                consumer: 10,
            }
        ));
        // The second consumer's dependency is untouched.
        assert_eq!(queue.entry(slot).unwrap().dependency_count(), 1);
    }

    #[test]
    fn test_rebind_same_edge_rejected() {
        let mut pool = PictureBufferPool::new();
        let mut queue = ReferenceQueue::with_capacity(4);
        let slot = queue.allocate(entry(&mut pool, 0)).unwrap();
        queue.bind(slot, 10).unwrap();
        let err = queue.bind(slot, 10).unwrap_err();
        assert!(matches!(err, DecisionError::Core(CoreError::Consistency(_))));
    }

    #[test]
    fn test_bind_after_seal_rejected() {
        let mut pool = PictureBufferPool::new();
        let mut queue = ReferenceQueue::with_capacity(4);
        let slot = queue.allocate(entry(&mut pool, 0)).unwrap();
        queue.bind(slot, 1).unwrap();
        queue.seal(slot).unwrap();
        assert!(queue.bind(slot, 2).is_err());
    }

    #[test]
    fn test_slot_reuse_after_recycle() {
        let mut pool = PictureBufferPool::new();
        let mut queue = ReferenceQueue::with_capacity(2);
        let slot = queue.allocate(entry(&mut pool, 0)).unwrap();
        queue.seal(slot).unwrap();

        // The vacated slot accepts a new entry and lookups resolve the new
        // coding order only.
        queue.allocate(entry(&mut pool, 2)).unwrap();
        queue.allocate(entry(&mut pool, 5)).unwrap();
        assert_eq!(queue.lookup(0), None);
        assert!(queue.lookup(2).is_some());
        assert!(queue.lookup(5).is_some());
    }

    #[test]
    fn test_assert_drained_reports_live_slots() {
        let mut pool = PictureBufferPool::new();
        let mut queue = ReferenceQueue::with_capacity(4);
        queue.allocate(entry(&mut pool, 7)).unwrap();

        let err = queue.assert_drained().unwrap_err();
        assert!(matches!(
            err,
            DecisionError::NotDrained { ref live_slots } if live_slots == &vec![7]
        ));
    }

    #[test]
    fn test_shared_queue_serializes_operations() {
        let mut pool = PictureBufferPool::new();
        let queue = SharedReferenceQueue::with_capacity(4);
        let queue2 = queue.clone();

        let slot = queue.allocate(entry(&mut pool, 0)).unwrap();
        queue2.bind(slot, 1).unwrap();
        assert_eq!(queue.dependency_count(0), Some(1));
        queue.release(slot, 1).unwrap();
        queue2.seal(slot).unwrap();
        assert!(queue.assert_drained().is_ok());
    }
}
