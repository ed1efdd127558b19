//! Tracked objects: a value boxed together with its sharded reference count


use std::hash::{Hash, Hasher};
use std::ptr::NonNull;

use crate::refcount::ShardedRefCount;


/// A collector-managed heap object.
///
/// Only the `Collector` allocates and frees these. Handles borrow them through raw pointers and
/// adjust `refcount`.
pub struct GcBox<T> {
    refcount: ShardedRefCount,
    value: T,
}


/// Type-erased view of a `GcBox<T>` so the registry can hold objects of any type.
pub trait Tracked: Send + Sync {
    fn refcount(&self) -> &ShardedRefCount;
}


/// Registry entry. Hashes and compares by object address only.
#[derive(Copy, Clone)]
pub(crate) struct ObjectPtr {
    ptr: NonNull<dyn Tracked>,
}


// The pointee is `Send + Sync` and the registry is the only owner.
unsafe impl Send for ObjectPtr {}
unsafe impl Sync for ObjectPtr {}


impl<T> GcBox<T> {
    pub(crate) fn new(value: T) -> GcBox<T> {
        GcBox {
            refcount: ShardedRefCount::new(),
            value: value,
        }
    }

    #[inline]
    pub fn value(&self) -> &T {
        &self.value
    }

    #[inline]
    pub fn refcount(&self) -> &ShardedRefCount {
        &self.refcount
    }
}


impl<T: Send + Sync> Tracked for GcBox<T> {
    #[inline]
    fn refcount(&self) -> &ShardedRefCount {
        &self.refcount
    }
}


impl ObjectPtr {
    pub(crate) fn from_box<T: Send + Sync + 'static>(ptr: NonNull<GcBox<T>>) -> ObjectPtr {
        ObjectPtr { ptr: ptr }
    }

    #[inline]
    fn addr(&self) -> usize {
        self.ptr.as_ptr() as *const () as usize
    }

    /// The object's count. Valid for as long as the object is registered.
    #[inline]
    pub(crate) fn refcount(&self) -> &ShardedRefCount {
        unsafe { self.ptr.as_ref().refcount() }
    }

    /// Drop the object and its value.
    ///
    /// Safety: the object must have been allocated by `Box`, be unreachable from any handle,
    /// and not be freed twice.
    pub(crate) unsafe fn free(self) {
        drop(Box::from_raw(self.ptr.as_ptr()));
    }
}


impl PartialEq for ObjectPtr {
    fn eq(&self, other: &ObjectPtr) -> bool {
        self.addr() == other.addr()
    }
}


impl Eq for ObjectPtr {}


impl Hash for ObjectPtr {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr().hash(state);
    }
}
