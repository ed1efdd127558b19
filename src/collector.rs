//! The collector registry: the set of every live tracked object, and the sweep that frees
//! objects whose sharded count has been observed stable at zero.
//!
//! Per object the lifecycle is `live -> pending collection -> freed`. An object becomes pending
//! as soon as its last handle is gone, but it is only freed by a pass whose bounded snapshot of
//! its count agreed twice on zero. An inconclusive snapshot leaves the object for a later pass.
//!
//! The registry mutex is held for one insert during `create()` and for the whole of a
//! collection pass. Handle traffic never takes it.


use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use scoped_pool::Pool;

use crate::constants::{DRAIN_BACKOFF_MS, DRAIN_PASSES};
use crate::error::CollectorError;
use crate::gcbox::{GcBox, ObjectPtr};
use crate::handle::GcRef;
use crate::identity::IdentityAllocator;


type ObjectSet = FxHashSet<ObjectPtr>;


/// Counters for one collection pass.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct CollectReport {
    /// objects tracked at the start of the pass
    pub examined: usize,
    /// objects freed and untracked by the pass
    pub freed: usize,
    /// objects whose two samples disagreed
    pub inconclusive: usize,
}


/// Owns every tracked object and the thread identity counter used to shard their counts.
///
/// Share it between threads behind an `Arc`. A pass removes dead objects from the registry
/// before running their destructors, outside the registry lock, so a destructor may drop
/// handles or create new objects on the same collector. A panicking destructor propagates out
/// of the pass; anything that pass had not yet freed is leaked.
///
/// Reference cycles are never reclaimed.
pub struct Collector {
    identities: IdentityAllocator,
    objects: Mutex<ObjectSet>,
}


impl Collector {
    pub fn new() -> Collector {
        Collector {
            identities: IdentityAllocator::new(),
            objects: Mutex::new(ObjectSet::default()),
        }
    }

    /// Give the calling thread its own identity so that its count updates land on a dedicated
    /// slot. Optional: unregistered threads share slot 0.
    pub fn register_thread(&self) -> usize {
        self.identities.allocate_for_current_thread()
    }

    pub fn identities(&self) -> &IdentityAllocator {
        &self.identities
    }

    /// Move `value` to the heap, track it, and return the first handle to it.
    pub fn create<T: Send + Sync + 'static>(&self, value: T) -> GcRef<T> {
        let ptr = NonNull::from(Box::leak(Box::new(GcBox::new(value))));

        // count the handle before the object becomes visible to a collection pass
        unsafe { ptr.as_ref() }.refcount().increment(1);
        let handle = GcRef::adopt(ptr);

        self.objects.lock().insert(ObjectPtr::from_box(ptr));

        handle
    }

    /// Number of tracked, not yet freed objects.
    pub fn count(&self) -> usize {
        self.objects.lock().len()
    }

    /// Run one collection pass. Returns the number of objects freed.
    pub fn collect(&self) -> usize {
        self.collect_report().freed
    }

    /// Run one collection pass, visiting every tracked object once.
    pub fn collect_report(&self) -> CollectReport {
        let mut objects = self.objects.lock();

        let mut report = CollectReport {
            examined: objects.len(),
            ..CollectReport::default()
        };

        tracing::debug!(tracked = report.examined, "collect_start");

        let mut dead = Vec::new();
        objects.retain(|object| {
            let snapshot = object.refcount().snapshot_total_bounded();

            if snapshot.is_stable_zero() {
                dead.push(*object);
                false
            } else {
                if !snapshot.stable {
                    report.inconclusive += 1;
                }
                true
            }
        });

        drop(objects);

        report.freed = dead.len();
        free_untracked(dead);

        tracing::debug!(freed = report.freed,
                        inconclusive = report.inconclusive,
                        "collect_end");

        report
    }

    /// A collection pass split into `num_shards` jobs on `pool`. Each job samples its own slice
    /// of the tracked set; the registry lock is held while sampling, exactly as for
    /// `collect_report()`.
    pub fn collect_parallel(&self, pool: &Pool, num_shards: usize) -> CollectReport {
        let mut objects = self.objects.lock();

        let entries: Vec<ObjectPtr> = objects.iter().copied().collect();
        let shard_size = entries.len().div_ceil(num_shards.max(1)).max(1);
        let shards: Vec<&[ObjectPtr]> = entries.chunks(shard_size).collect();

        tracing::debug!(tracked = entries.len(), shards = shards.len(), "collect_start");

        // one list of stable-zero objects per job
        let mut dead: Vec<Vec<ObjectPtr>> = vec![Vec::new(); shards.len()];
        let inconclusive = AtomicUsize::new(0);

        pool.scoped(|scope| {
            for (shard, dead) in shards.iter().zip(dead.iter_mut()) {
                let inconclusive = &inconclusive;

                scope.execute(move || {
                    for object in shard.iter() {
                        let snapshot = object.refcount().snapshot_total_bounded();

                        if snapshot.is_stable_zero() {
                            dead.push(*object);
                        } else if !snapshot.stable {
                            inconclusive.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                });
            }
        });

        let dead: Vec<ObjectPtr> = dead.into_iter().flatten().collect();
        for object in dead.iter() {
            objects.remove(object);
        }

        drop(objects);

        let report = CollectReport {
            examined: entries.len(),
            freed: dead.len(),
            inconclusive: inconclusive.load(Ordering::Relaxed),
        };

        free_untracked(dead);

        tracing::debug!(freed = report.freed,
                        inconclusive = report.inconclusive,
                        "collect_end");

        report
    }

    /// Collect until nothing is tracked, giving up after `max_passes`. Passes that free nothing
    /// are followed by a short sleep so that inconclusive samples are retaken later rather than
    /// immediately. Returns the total number of objects freed.
    ///
    /// Only meaningful once the application has stopped handing out new references.
    pub fn drain(&self, max_passes: usize) -> Result<usize, CollectorError> {
        let mut freed = 0;

        for _ in 0..max_passes {
            if self.count() == 0 {
                return Ok(freed);
            }

            let report = self.collect_report();
            freed += report.freed;

            if report.freed == 0 {
                thread::sleep(Duration::from_millis(DRAIN_BACKOFF_MS));
            }
        }

        match self.count() {
            0 => Ok(freed),
            remaining => Err(CollectorError::Undrained {
                remaining: remaining,
                passes: max_passes,
                freed: freed,
            }),
        }
    }
}


/// Free objects that a pass has already removed from the registry. If a destructor panics the
/// rest of the list is leaked, never left reachable from the set.
fn free_untracked(dead: Vec<ObjectPtr>) {
    for object in dead {
        unsafe { object.free() };
    }
}


impl Default for Collector {
    fn default() -> Collector {
        Collector::new()
    }
}


impl Drop for Collector {
    fn drop(&mut self) {
        if let Err(error) = self.drain(DRAIN_PASSES) {
            // still referenced somewhere, freeing would leave those handles dangling
            tracing::warn!(%error, "leaking objects still tracked by a dropped collector");
        }
    }
}


#[cfg(test)]
mod tests {
    use std::panic::{self, AssertUnwindSafe};
    use std::sync::Arc;

    use super::*;

    /// Counts how many times it was dropped.
    struct DropCounter(Arc<AtomicUsize>);

    impl Drop for DropCounter {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn create_tracks_with_one_reference() {
        let collector = Collector::new();
        let handle = collector.create(5u64);

        assert_eq!(collector.count(), 1);
        assert_eq!(unsafe { &*handle.as_ptr() }.refcount().snapshot_total_stable(), 1);
        assert_eq!(*handle, 5);
    }

    #[test]
    fn collect_on_empty_registry() {
        let collector = Collector::new();

        assert_eq!(collector.collect(), 0);
        assert_eq!(collector.collect_report(), CollectReport::default());
        assert_eq!(collector.count(), 0);
    }

    #[test]
    fn live_objects_survive_collection() {
        let drops = Arc::new(AtomicUsize::new(0));
        let collector = Collector::new();
        let handle = collector.create(DropCounter(drops.clone()));

        for _ in 0..10 {
            assert_eq!(collector.collect(), 0);
        }

        assert_eq!(collector.count(), 1);
        assert_eq!(drops.load(Ordering::SeqCst), 0);
        drop(handle);
    }

    #[test]
    fn unreferenced_object_is_freed_once() {
        let drops = Arc::new(AtomicUsize::new(0));
        let collector = Collector::new();

        let handle = collector.create(DropCounter(drops.clone()));
        let copies: Vec<_> = (0..16).map(|_| handle.clone()).collect();
        drop(copies);
        drop(handle);

        let report = collector.collect_report();
        assert_eq!(report,
                   CollectReport {
                       examined: 1,
                       freed: 1,
                       inconclusive: 0,
                   });
        assert_eq!(collector.count(), 0);

        assert_eq!(collector.collect(), 0);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn only_dead_objects_are_freed() {
        let collector = Collector::new();

        let keep: Vec<_> = (0..10u32).map(|i| collector.create(i)).collect();
        for i in 0..20u32 {
            drop(collector.create(i));
        }

        assert_eq!(collector.count(), 30);
        assert_eq!(collector.collect(), 20);
        assert_eq!(collector.count(), 10);

        let values: Vec<u32> = keep.iter().map(|h| **h).collect();
        assert_eq!(values, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn nested_handles_are_released_by_the_parent() {
        struct Parent {
            _child: GcRef<u32>,
        }

        let collector = Collector::new();
        let child = collector.create(1u32);
        let parent = collector.create(Parent {
            _child: child.clone(),
        });
        drop(child);

        // the child is still held by the parent
        assert_eq!(collector.collect(), 0);

        drop(parent);
        assert_eq!(collector.drain(DRAIN_PASSES).unwrap(), 2);
        assert_eq!(collector.count(), 0);
    }

    #[test]
    fn drain_reports_live_objects() {
        let collector = Collector::new();
        let handle = collector.create(0u8);

        drop(collector.create(1u8));

        match collector.drain(3) {
            Err(CollectorError::Undrained { remaining, passes, freed }) => {
                assert_eq!(remaining, 1);
                assert_eq!(passes, 3);
                assert_eq!(freed, 1);
            }
            other => panic!("unexpected drain result {:?}", other),
        }

        drop(handle);
        assert_eq!(collector.drain(3).unwrap(), 1);
    }

    #[test]
    fn panicking_destructor_leaves_registry_consistent() {
        struct PanicOnFirstDrop(Arc<AtomicUsize>);

        impl Drop for PanicOnFirstDrop {
            fn drop(&mut self) {
                if self.0.fetch_add(1, Ordering::SeqCst) == 0 {
                    panic!("destructor failed");
                }
            }
        }

        let drops = Arc::new(AtomicUsize::new(0));
        let collector = Collector::new();
        drop(collector.create(PanicOnFirstDrop(drops.clone())));

        let pass = panic::catch_unwind(AssertUnwindSafe(|| collector.collect()));
        assert!(pass.is_err());

        // the object left the registry before its destructor ran
        assert_eq!(collector.count(), 0);
        assert_eq!(collector.collect(), 0);
        assert_eq!(drops.load(Ordering::SeqCst), 1);

        // the lock was released by the unwinding pass
        drop(collector.create(0u8));
        assert_eq!(collector.collect(), 1);
    }

    #[test]
    fn destructor_may_use_the_collector() {
        struct CreatesOnDrop(Arc<Collector>);

        impl Drop for CreatesOnDrop {
            fn drop(&mut self) {
                drop(self.0.create(0u32));
            }
        }

        let collector = Arc::new(Collector::new());
        drop(collector.create(CreatesOnDrop(collector.clone())));

        assert_eq!(collector.collect(), 1);
        assert_eq!(collector.count(), 1);
        assert_eq!(collector.collect(), 1);
        assert_eq!(collector.count(), 0);
    }

    #[test]
    fn register_thread_draws_from_the_collector() {
        let collector = Collector::new();

        let first = collector.register_thread();
        let second = thread::spawn(|| Collector::new().register_thread()).join().unwrap();

        assert_eq!(first, 0);
        assert_eq!(second, 0);
        assert_eq!(collector.register_thread(), 1);
        assert_eq!(collector.identities().allocated(), 2);
    }

    #[test]
    fn parallel_pass_frees_dead_objects() {
        let drops = Arc::new(AtomicUsize::new(0));
        let collector = Collector::new();
        let pool = Pool::new(4);

        let keep: Vec<_> = (0..50).map(|_| collector.create(DropCounter(drops.clone()))).collect();
        for _ in 0..150 {
            drop(collector.create(DropCounter(drops.clone())));
        }

        let report = collector.collect_parallel(&pool, 4);
        assert_eq!(report.examined, 200);
        assert_eq!(report.freed, 150);
        assert_eq!(collector.count(), 50);
        assert_eq!(drops.load(Ordering::SeqCst), 150);

        drop(keep);
        assert_eq!(collector.collect_parallel(&pool, 4).freed, 50);
        assert_eq!(collector.collect_parallel(&pool, 4), CollectReport::default());

        pool.shutdown();
    }

    #[test]
    fn dropping_collector_frees_unreferenced_objects() {
        let drops = Arc::new(AtomicUsize::new(0));
        let collector = Collector::new();

        drop(collector.create(DropCounter(drops.clone())));
        drop(collector);

        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }
}
