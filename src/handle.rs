//! Owning handles to tracked objects.


use std::fmt;
use std::ops::Deref;
use std::ptr::{null, NonNull};

use crate::gcbox::GcBox;


/// Shared ownership of a tracked object, or null.
///
/// Creating, cloning and dropping a `GcRef` adjusts the object's sharded reference count on the
/// calling thread's slot. A `GcRef` never frees anything: objects are reclaimed by
/// `Collector::collect()` once their count is observed stable at zero.
///
/// Handles can be sent between threads and dropped anywhere. A thread that registers with the
/// collector first spreads its updates to its own slot.
pub struct GcRef<T> {
    ptr: Option<NonNull<GcBox<T>>>,
}


unsafe impl<T: Send + Sync> Send for GcRef<T> {}
unsafe impl<T: Send + Sync> Sync for GcRef<T> {}


impl<T> GcRef<T> {
    /// A handle that references nothing.
    pub const fn null() -> GcRef<T> {
        GcRef { ptr: None }
    }

    /// Take a new counted reference to `ptr`, which may be null.
    ///
    /// Safety: a non-null `ptr` must point at a registered object that is kept alive by some
    /// other handle for the duration of this call.
    pub unsafe fn from_raw(ptr: *const GcBox<T>) -> GcRef<T> {
        let ptr = NonNull::new(ptr as *mut GcBox<T>);
        if let Some(object) = ptr {
            object.as_ref().refcount().increment(1);
        }

        GcRef { ptr: ptr }
    }

    /// Wrap an object whose count has already been incremented on behalf of this handle.
    pub(crate) fn adopt(ptr: NonNull<GcBox<T>>) -> GcRef<T> {
        GcRef { ptr: Some(ptr) }
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        self.ptr.is_none()
    }

    /// The referenced value, or `None` for a null handle.
    #[inline]
    pub fn get(&self) -> Option<&T> {
        self.ptr.map(|ptr| unsafe { &*ptr.as_ptr() }.value())
    }

    /// Raw object pointer, null for a null handle. Does not touch the count.
    #[inline]
    pub fn as_ptr(&self) -> *const GcBox<T> {
        match self.ptr {
            Some(ptr) => ptr.as_ptr(),
            None => null(),
        }
    }

    /// Pointer equality comparison.
    #[inline]
    pub fn ptr_eq(&self, other: &GcRef<T>) -> bool {
        self.ptr == other.ptr
    }

    /// Release the reference and become null.
    pub fn clear(&mut self) {
        if let Some(object) = self.ptr.take() {
            unsafe { object.as_ref() }.refcount().increment(-1);
        }
    }
}


impl<T> Clone for GcRef<T> {
    fn clone(&self) -> Self {
        if let Some(object) = self.ptr {
            unsafe { object.as_ref() }.refcount().increment(1);
        }

        GcRef { ptr: self.ptr }
    }

    /// Assignment: the new target is counted before the old one is released, and assigning a
    /// handle to the same object is a no-op.
    fn clone_from(&mut self, source: &Self) {
        if self.ptr == source.ptr {
            return;
        }

        if let Some(object) = source.ptr {
            unsafe { object.as_ref() }.refcount().increment(1);
        }

        if let Some(old) = self.ptr {
            unsafe { old.as_ref() }.refcount().increment(-1);
        }

        self.ptr = source.ptr;
    }
}


impl<T> Drop for GcRef<T> {
    fn drop(&mut self) {
        self.clear();
    }
}


impl<T> Deref for GcRef<T> {
    type Target = T;

    /// Panics if the handle is null.
    fn deref(&self) -> &T {
        match self.get() {
            Some(value) => value,
            None => panic!("dereferenced a null GcRef"),
        }
    }
}


impl<T> Default for GcRef<T> {
    fn default() -> GcRef<T> {
        GcRef::null()
    }
}


impl<T> PartialEq for GcRef<T> {
    fn eq(&self, other: &GcRef<T>) -> bool {
        self.ptr_eq(other)
    }
}


impl<T> Eq for GcRef<T> {}


impl<T> fmt::Debug for GcRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("GcRef").field(&self.as_ptr()).finish()
    }
}
