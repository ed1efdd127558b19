//! Sharded reference counts.
//!
//! Each tracked object carries `REFCOUNT_SLOTS` independent atomic counters. A thread only ever
//! writes to the slot its identity maps to, so increments and decrements from different threads
//! do not contend on one cache line. The true reference count is the sum over all slots, which
//! is only read on the collection path.
//!
//! A single summing pass is not atomic with respect to concurrent updates. Its result is only
//! trusted as a final answer when two consecutive passes agree.


use std::mem::align_of;
use std::ptr::null_mut;
use std::sync::atomic::{AtomicI64, AtomicPtr, Ordering};

use crate::constants::{CACHE_LINE, REFCOUNT_SLOTS};
use crate::identity::current_identity;


/// One shard of a reference count, padded so that neighbouring shards never share a line.
#[repr(align(64))]
struct Slot {
    count: AtomicI64,
}


const _: () = assert!(align_of::<Slot>() == CACHE_LINE);


/// The result of sampling a sharded count twice.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Snapshot {
    /// The second of the two samples
    pub total: i64,
    /// Whether both samples agreed. If false, `total` must not be trusted as final.
    pub stable: bool,
}


/// A reference count split across lazily allocated, per-thread-bucket atomic slots.
pub struct ShardedRefCount {
    slots: [AtomicPtr<Slot>; REFCOUNT_SLOTS],
}


// All shared state is behind atomics.
unsafe impl Send for ShardedRefCount {}
unsafe impl Sync for ShardedRefCount {}


impl Snapshot {
    /// True if the count was observed stable at exactly zero.
    #[inline]
    pub fn is_stable_zero(&self) -> bool {
        self.stable && self.total == 0
    }
}


impl ShardedRefCount {
    /// A count of zero with no slots materialized.
    pub fn new() -> ShardedRefCount {
        ShardedRefCount {
            slots: std::array::from_fn(|_| AtomicPtr::new(null_mut())),
        }
    }

    /// Add `delta` to the slot owned by the calling thread, materializing it on first use.
    #[inline]
    pub fn increment(&self, delta: i64) {
        let index = current_identity() % REFCOUNT_SLOTS;

        let mut slot = self.slots[index].load(Ordering::Acquire);
        if slot.is_null() {
            // slow path
            slot = self.materialize(index);
        }

        unsafe { (*slot).count.fetch_add(delta, Ordering::SeqCst) };
    }

    /// Install a fresh zeroed slot at `index` unless another thread got there first. Returns
    /// whichever slot ended up installed.
    #[cold]
    fn materialize(&self, index: usize) -> *mut Slot {
        let fresh = Box::into_raw(Box::new(Slot {
            count: AtomicI64::new(0),
        }));

        // the expected value is local to this call, never shared between racing threads
        let unallocated: *mut Slot = null_mut();

        match self.slots[index].compare_exchange(unallocated,
                                                 fresh,
                                                 Ordering::AcqRel,
                                                 Ordering::Acquire) {
            Ok(_) => fresh,

            Err(installed) => {
                // lost the race, this cell was never visible to anyone else
                drop(unsafe { Box::from_raw(fresh) });
                tracing::trace!(slot = index, "lost slot materialization race");
                installed
            }
        }
    }

    /// Sum every materialized slot in index order. The result may mix values from before and
    /// after concurrent updates.
    pub fn snapshot_total_once(&self) -> i64 {
        let mut total = 0;

        for slot in self.slots.iter() {
            let ptr = slot.load(Ordering::Acquire);
            if !ptr.is_null() {
                total += unsafe { (*ptr).count.load(Ordering::SeqCst) };
            }
        }

        total
    }

    /// Sample until two consecutive samples agree. Lock-free but not wait-free: under sustained
    /// concurrent updates a single caller can loop indefinitely.
    pub fn snapshot_total_stable(&self) -> i64 {
        let mut last = self.snapshot_total_once();
        let mut current = self.snapshot_total_once();

        while last != current {
            last = current;
            current = self.snapshot_total_once();
        }

        current
    }

    /// Sample exactly twice. Wait-free; reports `stable == false` instead of retrying. Callers
    /// should retry on a later, independent invocation rather than in a tight loop.
    pub fn snapshot_total_bounded(&self) -> Snapshot {
        let first = self.snapshot_total_once();
        let second = self.snapshot_total_once();

        Snapshot {
            total: second,
            stable: first == second,
        }
    }

    /// Number of slots some thread has touched.
    pub fn materialized_slots(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| !slot.load(Ordering::Acquire).is_null())
            .count()
    }
}


impl Default for ShardedRefCount {
    fn default() -> ShardedRefCount {
        ShardedRefCount::new()
    }
}


impl Drop for ShardedRefCount {
    fn drop(&mut self) {
        for slot in self.slots.iter_mut() {
            let ptr = *slot.get_mut();
            if !ptr.is_null() {
                drop(unsafe { Box::from_raw(ptr) });
            }
        }
    }
}
