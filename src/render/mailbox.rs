use crate::{render::TerrainVertex, terrain_data::tile_tree::TerrainStats};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Mutex, PoisonError, TryLockError,
};

/// A complete copy of the geometry the refiner produced, ready to be uploaded.
#[derive(Clone, Debug, Default)]
pub struct GeometrySnapshot {
    /// The index block of the root tile, including its holes.
    pub root_indices: Vec<u32>,
    /// The used prefix of the high resolution vertex buffer.
    pub vertices: Vec<TerrainVertex>,
    /// The used prefix of the high resolution index buffer.
    pub indices: Vec<u32>,
    /// The number of active sub tiles.
    pub tile_count: usize,
    /// The refinement counters at the time of the snapshot.
    pub stats: TerrainStats,
}

/// Hands the latest value of a single producer over to a single consumer.
///
/// The producer writes into the slot while holding the short swap lock and raises the
/// fresh flag. The consumer never blocks: it only takes the value if the lock is free
/// and the flag is raised, by swapping its own box with the slot.
/// Values that are published twice before being taken are overwritten.
pub struct SnapshotMailbox<T> {
    latest: Mutex<Box<T>>,
    fresh: AtomicBool,
}

impl<T: Default> Default for SnapshotMailbox<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> SnapshotMailbox<T> {
    pub fn new(value: T) -> Self {
        Self {
            latest: Mutex::new(Box::new(value)),
            fresh: AtomicBool::new(false),
        }
    }

    /// Overwrites the slot in place and marks it as fresh.
    pub fn publish_with(&self, write: impl FnOnce(&mut T)) {
        let mut latest = self.latest.lock().unwrap_or_else(PoisonError::into_inner);

        write(&mut latest);
        self.fresh.store(true, Ordering::Release);
    }

    /// Swaps `target` with the slot if a fresh value is available and the lock is free.
    ///
    /// Returns whether `target` now holds a new value.
    pub fn try_take(&self, target: &mut Box<T>) -> bool {
        if !self.fresh.load(Ordering::Acquire) {
            return false;
        }

        let mut latest = match self.latest.try_lock() {
            Ok(latest) => latest,
            Err(TryLockError::Poisoned(error)) => error.into_inner(),
            Err(TryLockError::WouldBlock) => return false,
        };

        if self.fresh.swap(false, Ordering::AcqRel) {
            std::mem::swap(&mut *latest, target);
            true
        } else {
            false
        }
    }

    /// Whether a value was published that has not been taken yet.
    pub fn is_fresh(&self) -> bool {
        self.fresh.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{sync::Arc, thread};

    #[test]
    fn take_only_fresh_values() {
        let mailbox = SnapshotMailbox::new(0);
        let mut target = Box::new(0);

        assert!(!mailbox.try_take(&mut target));

        mailbox.publish_with(|value| *value = 7);
        assert!(mailbox.is_fresh());
        assert!(mailbox.try_take(&mut target));
        assert_eq!(*target, 7);

        assert!(!mailbox.try_take(&mut target));
        assert_eq!(*target, 7);
    }

    #[test]
    fn latest_value_wins() {
        let mailbox = SnapshotMailbox::<Vec<u32>>::default();
        let mut target = Box::default();

        mailbox.publish_with(|value| value.push(1));
        mailbox.publish_with(|value| value.push(2));

        assert!(mailbox.try_take(&mut target));
        assert_eq!(*target, vec![1, 2]);
    }

    #[test]
    fn locked_slot_does_not_block() {
        let mailbox = SnapshotMailbox::new(1);
        let mut target = Box::new(0);

        mailbox.publish_with(|value| *value = 2);

        let guard = mailbox.latest.lock().unwrap();
        assert!(!mailbox.try_take(&mut target));
        drop(guard);

        assert!(mailbox.try_take(&mut target));
        assert_eq!(*target, 2);
    }

    #[test]
    fn snapshots_are_complete() {
        let mailbox = Arc::new(SnapshotMailbox::<GeometrySnapshot>::default());

        let producer = {
            let mailbox = mailbox.clone();
            thread::spawn(move || {
                for count in 1..200 {
                    mailbox.publish_with(|snapshot| {
                        snapshot.tile_count = count;
                        snapshot.indices.clear();
                        snapshot.indices.resize(count, count as u32);
                    });
                }
            })
        };

        let mut target = Box::default();
        let mut last = 0;

        while !producer.is_finished() || mailbox.is_fresh() {
            if mailbox.try_take(&mut target) {
                assert_eq!(target.indices.len(), target.tile_count);
                assert!(target.indices.iter().all(|&index| index as usize == target.tile_count));
                assert!(target.tile_count > last);
                last = target.tile_count;
            }
        }

        producer.join().unwrap();
    }
}
