//! Shared result collection.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Append-only store for the records produced by work invocations.
///
/// A `Collector` is a cheap cloneable handle over one shared sequence: the
/// generator hands a clone to every worker, and all of them append into the
/// same store. Records land in **completion** order — workers race to drain
/// the token pool and take different amounts of time per invocation, so
/// completion order is not admission order.
///
/// Internally this is a mutex-guarded `Vec`, safe for concurrent multi-writer
/// append.
pub struct Collector<R> {
    records: Arc<Mutex<Vec<R>>>,
}

impl<R> Collector<R> {
    pub fn new() -> Self {
        Self {
            records: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Append one record. Never fails.
    pub fn append(&self, record: R) {
        self.lock().push(record);
    }

    /// Clear all collected records.
    ///
    /// An append racing a reset lands either before the clear (and is
    /// dropped) or after it (and is retained), depending on lock order.
    /// That race is part of the contract: resetting while workers are live
    /// gives a best-effort cut, not a consistent one.
    pub fn reset(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<R>> {
        // A worker that panicked mid-append leaves the Vec intact (push is
        // the only mutation), so a poisoned lock is still usable.
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<R: Clone> Collector<R> {
    /// Copy of the full record sequence, without clearing it.
    pub fn snapshot(&self) -> Vec<R> {
        self.lock().clone()
    }
}

impl<R> Clone for Collector<R> {
    fn clone(&self) -> Self {
        Self {
            records: Arc::clone(&self.records),
        }
    }
}

impl<R> Default for Collector<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> fmt::Debug for Collector<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collector").field("len", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_then_snapshot_preserves_order() {
        let collector = Collector::new();
        collector.append(1);
        collector.append(2);
        collector.append(3);

        assert_eq!(collector.snapshot(), vec![1, 2, 3]);
        // snapshot does not clear
        assert_eq!(collector.len(), 3);
    }

    #[test]
    fn reset_empties_the_store() {
        let collector = Collector::new();
        collector.append("a");
        collector.reset();

        assert!(collector.is_empty());
        assert_eq!(collector.snapshot(), Vec::<&str>::new());
    }

    #[test]
    fn clones_share_one_store() {
        let a = Collector::new();
        let b = a.clone();

        a.append(1);
        b.append(2);

        assert_eq!(a.len(), 2);
        assert_eq!(b.len(), 2);
    }

    #[test]
    fn concurrent_appends_all_land() {
        let collector = Collector::new();
        let threads = 8;
        let per_thread = 500;

        std::thread::scope(|s| {
            for t in 0..threads {
                let collector = collector.clone();
                s.spawn(move || {
                    for i in 0..per_thread {
                        collector.append(t * per_thread + i);
                    }
                });
            }
        });

        assert_eq!(collector.len(), threads * per_thread);
    }
}
