//! Thread identities used to pick a reference count slot.
//!
//! A thread that never registers keeps the default identity `0`, which shares a slot with
//! whichever registered thread drew `0` (or any multiple of `REFCOUNT_SLOTS`). That only costs
//! contention: every slot update is atomic no matter how many threads land on it.


use std::cell::Cell;
use std::sync::atomic::{AtomicUsize, Ordering};


thread_local!(
    static THREAD_IDENTITY: Cell<usize> = const { Cell::new(0) }
);


/// Hands out dense, never reused thread identities, starting at 0.
///
/// One allocator is owned by each `Collector`, so that tests and independent collectors do not
/// share a hidden global counter. The identity itself is cached thread-locally.
pub struct IdentityAllocator {
    next: AtomicUsize,
}


impl IdentityAllocator {
    pub fn new() -> IdentityAllocator {
        IdentityAllocator {
            next: AtomicUsize::new(0),
        }
    }

    /// Draw the next identity and cache it for the calling thread. Returns the new identity.
    pub fn allocate_for_current_thread(&self) -> usize {
        let identity = self.next.fetch_add(1, Ordering::Relaxed);
        THREAD_IDENTITY.with(|cell| cell.set(identity));
        identity
    }

    /// Number of identities handed out so far.
    pub fn allocated(&self) -> usize {
        self.next.load(Ordering::Relaxed)
    }
}


impl Default for IdentityAllocator {
    fn default() -> IdentityAllocator {
        IdentityAllocator::new()
    }
}


/// The calling thread's identity, or 0 if it never registered.
#[inline]
pub fn current_identity() -> usize {
    THREAD_IDENTITY.with(|cell| cell.get())
}


#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn unregistered_thread_defaults_to_zero() {
        let identity = thread::spawn(current_identity).join().unwrap();
        assert_eq!(identity, 0);
    }

    #[test]
    fn identities_are_dense_and_unique() {
        let allocator = Arc::new(IdentityAllocator::new());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let allocator = allocator.clone();
                thread::spawn(move || {
                    let drawn = allocator.allocate_for_current_thread();
                    assert_eq!(current_identity(), drawn);
                    drawn
                })
            })
            .collect();

        let mut drawn: Vec<usize> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        drawn.sort();

        assert_eq!(drawn, (0..8).collect::<Vec<_>>());
        assert_eq!(allocator.allocated(), 8);
    }

    #[test]
    fn reallocating_replaces_the_cached_identity() {
        thread::spawn(|| {
            let allocator = IdentityAllocator::new();
            assert_eq!(allocator.allocate_for_current_thread(), 0);
            assert_eq!(allocator.allocate_for_current_thread(), 1);
            assert_eq!(current_identity(), 1);
        })
        .join()
        .unwrap();
    }
}
