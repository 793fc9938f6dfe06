//! Snapshot handoff between the tracking thread and the render loop.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// An immutable published value tagged with its publication number.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot<T> {
    /// Monotonic publication counter (0 = initial value)
    pub sequence: u64,

    /// The published value
    pub value: T,
}

/// Single-slot, whole-value handoff.
///
/// The producer replaces the entire value under the mutex; the consumer
/// clones an `Arc` to the current snapshot under the same mutex and works
/// from it after the lock is released. Related fields therefore always
/// change together.
///
/// ```text
/// tracking thread            slot                 render loop
///   |-- publish(v) ------> [Arc<Snapshot>] <------ snapshot() --|
///   |                       swap under lock       clone Arc     |
/// ```
pub struct SnapshotSlot<T> {
    inner: Arc<Mutex<Arc<Snapshot<T>>>>,
}

impl<T> SnapshotSlot<T> {
    /// Creates a slot holding `initial` at sequence 0.
    pub fn new(initial: T) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Arc::new(Snapshot {
                sequence: 0,
                value: initial,
            }))),
        }
    }

    /// Replaces the current value, returning its sequence number.
    pub fn publish(&self, value: T) -> u64 {
        let mut guard = self.lock();
        let sequence = guard.sequence + 1;
        *guard = Arc::new(Snapshot { sequence, value });
        sequence
    }

    /// Returns the current snapshot. The lock is held only for the Arc clone.
    pub fn snapshot(&self) -> Arc<Snapshot<T>> {
        Arc::clone(&*self.lock())
    }

    /// Returns the sequence number of the current snapshot.
    pub fn sequence(&self) -> u64 {
        self.lock().sequence
    }

    fn lock(&self) -> MutexGuard<'_, Arc<Snapshot<T>>> {
        // A panicking producer leaves a whole, valid Arc behind.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: Copy> SnapshotSlot<T> {
    /// Copies out the current value.
    pub fn latest(&self) -> T {
        self.lock().value
    }
}

impl<T> Clone for SnapshotSlot<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Default> Default for SnapshotSlot<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_initial_snapshot() {
        let slot = SnapshotSlot::new(7u32);
        let snap = slot.snapshot();
        assert_eq!(snap.sequence, 0);
        assert_eq!(snap.value, 7);
    }

    #[test]
    fn test_publish_increments_sequence() {
        let slot = SnapshotSlot::new(0u32);
        assert_eq!(slot.publish(1), 1);
        assert_eq!(slot.publish(2), 2);
        assert_eq!(slot.latest(), 2);
        assert_eq!(slot.sequence(), 2);
    }

    #[test]
    fn test_held_snapshot_survives_publish() {
        let slot = SnapshotSlot::new(1u32);
        let held = slot.snapshot();
        slot.publish(2);

        assert_eq!(held.value, 1);
        assert_eq!(slot.latest(), 2);
    }

    #[test]
    fn test_clone_shares_slot() {
        let producer = SnapshotSlot::new(0u32);
        let consumer = producer.clone();
        producer.publish(42);
        assert_eq!(consumer.latest(), 42);
    }

    #[test]
    fn test_no_tearing_across_threads() {
        // Producer always writes pairs with b == 2 * a
        let slot = SnapshotSlot::new((0u64, 0u64));
        let producer = slot.clone();

        let writer = thread::spawn(move || {
            for a in 1..5_000u64 {
                producer.publish((a, a * 2));
            }
        });

        for _ in 0..5_000 {
            let (a, b) = slot.latest();
            assert_eq!(b, a * 2);
        }

        writer.join().unwrap();
        assert_eq!(slot.latest(), (4_999, 9_998));
    }
}
