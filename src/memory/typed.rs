/*!
 * Typed Allocator
 * Element-typed facade over a byte resource
 */

use super::resource::default_resource;
use super::traits::MemoryResource;
use super::types::{MemoryError, MemoryResult};
use crate::core::limits::BLOCK_ALIGN;
use std::alloc::Layout;
use std::fmt;
use std::marker::PhantomData;
use std::mem;
use std::ptr::NonNull;
use std::sync::Arc;

/// Binds a [`MemoryResource`] to element type `T`
///
/// Translates element counts into layouts and forwards them to the resource.
/// Cloning or rebinding copies only the resource handle, so every facade
/// derived from one arena allocates from that same arena.
///
/// # Example
///
/// ```
/// use fit_arena::memory::{SortedListArena, TypedAllocator};
/// use std::sync::Arc;
///
/// let arena = Arc::new(SortedListArena::new(4096).unwrap());
/// let numbers: TypedAllocator<u64> = TypedAllocator::new(arena);
///
/// let ptr = numbers.new_object(42u64).unwrap();
/// assert_eq!(unsafe { *ptr.as_ptr() }, 42);
/// unsafe { numbers.delete_object(ptr).unwrap() };
/// ```
pub struct TypedAllocator<T> {
    resource: Arc<dyn MemoryResource>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> TypedAllocator<T> {
    pub fn new(resource: Arc<dyn MemoryResource>) -> Self {
        Self {
            resource,
            _marker: PhantomData,
        }
    }

    /// Facade over the process-wide default resource
    pub fn with_default() -> Self {
        Self::new(default_resource())
    }

    pub fn resource(&self) -> &Arc<dyn MemoryResource> {
        &self.resource
    }

    /// Same resource, different element type
    pub fn rebind<U>(&self) -> TypedAllocator<U> {
        TypedAllocator::new(Arc::clone(&self.resource))
    }

    /// Storage for `n` contiguous elements, uninitialized
    pub fn allocate(&self, n: usize) -> MemoryResult<NonNull<T>> {
        self.allocate_object::<T>(n)
    }

    /// # Safety
    ///
    /// `ptr` must come from `allocate(n)` on an equal facade and must not be
    /// used afterwards. Elements are not dropped.
    pub unsafe fn deallocate(&self, ptr: NonNull<T>, n: usize) -> MemoryResult<()> {
        self.deallocate_object::<T>(ptr, n)
    }

    /// Move `value` into uninitialized storage
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for writes and aligned for `U`.
    pub unsafe fn construct<U>(&self, ptr: NonNull<U>, value: U) {
        ptr.as_ptr().write(value);
    }

    /// Drop the value at `ptr` in place, leaving the storage allocated
    ///
    /// # Safety
    ///
    /// `ptr` must point to an initialized `U` that is not used afterwards.
    pub unsafe fn destroy<U>(&self, ptr: NonNull<U>) {
        std::ptr::drop_in_place(ptr.as_ptr());
    }

    /// Raw bytes with the given alignment
    pub fn allocate_bytes(&self, size: usize, align: usize) -> MemoryResult<NonNull<u8>> {
        let layout = byte_layout(size, align)?;
        self.resource.allocate(layout)
    }

    /// # Safety
    ///
    /// `ptr` must come from `allocate_bytes(size, align)` on an equal facade.
    pub unsafe fn deallocate_bytes(&self, ptr: NonNull<u8>, size: usize, align: usize) -> MemoryResult<()> {
        let layout = byte_layout(size, align)?;
        self.resource.deallocate(ptr, layout)
    }

    /// Uninitialized storage for `n` values of `U`
    pub fn allocate_object<U>(&self, n: usize) -> MemoryResult<NonNull<U>> {
        let layout = array_layout::<U>(n)?;
        self.resource.allocate(layout).map(NonNull::cast)
    }

    /// # Safety
    ///
    /// `ptr` must come from `allocate_object::<U>(n)` on an equal facade.
    pub unsafe fn deallocate_object<U>(&self, ptr: NonNull<U>, n: usize) -> MemoryResult<()> {
        let layout = array_layout::<U>(n)?;
        self.resource.deallocate(ptr.cast(), layout)
    }

    /// Allocate one `U` and move `value` into it
    pub fn new_object<U>(&self, value: U) -> MemoryResult<NonNull<U>> {
        let ptr = self.allocate_object::<U>(1)?;
        // SAFETY: fresh storage sized and aligned for one U
        unsafe { self.construct(ptr, value) };
        Ok(ptr)
    }

    /// Allocate one `U` and build it in place with `init`
    ///
    /// The allocation is released if `init` returns an error or panics, so a
    /// failed construction leaves nothing behind in the resource.
    pub fn try_new_object<U, E, F>(&self, init: F) -> Result<NonNull<U>, E>
    where
        E: From<MemoryError>,
        F: FnOnce() -> Result<U, E>,
    {
        let ptr = self.allocate_object::<U>(1)?;
        let guard = Rollback {
            resource: self.resource.as_ref(),
            ptr,
        };

        let value = init()?;
        mem::forget(guard);

        // SAFETY: fresh storage sized and aligned for one U
        unsafe { self.construct(ptr, value) };
        Ok(ptr)
    }

    /// Drop the value and release its storage
    ///
    /// # Safety
    ///
    /// `ptr` must come from `new_object`/`try_new_object` on an equal facade
    /// and must not be used afterwards.
    pub unsafe fn delete_object<U>(&self, ptr: NonNull<U>) -> MemoryResult<()> {
        self.destroy(ptr);
        self.deallocate_object(ptr, 1)
    }
}

/// Releases a one-element allocation unless forgotten
struct Rollback<'a, U> {
    resource: &'a dyn MemoryResource,
    ptr: NonNull<U>,
}

impl<'a, U> Drop for Rollback<'a, U> {
    fn drop(&mut self) {
        if let Ok(layout) = array_layout::<U>(1) {
            // SAFETY: allocated with this layout just before the guard was made
            if let Err(e) = unsafe { self.resource.deallocate(self.ptr.cast(), layout) } {
                log::error!("Failed to roll back allocation after construction failure: {}", e);
            }
        }
    }
}

fn array_layout<U>(n: usize) -> MemoryResult<Layout> {
    Layout::array::<U>(n).map_err(|_| MemoryError::LayoutOverflow {
        count: n,
        element_size: mem::size_of::<U>(),
    })
}

fn byte_layout(size: usize, align: usize) -> MemoryResult<Layout> {
    if !align.is_power_of_two() {
        return Err(MemoryError::AlignmentError {
            alignment: align,
            supported: BLOCK_ALIGN,
        });
    }
    Layout::from_size_align(size, align).map_err(|_| MemoryError::LayoutOverflow {
        count: size,
        element_size: 1,
    })
}

impl<T> Clone for TypedAllocator<T> {
    fn clone(&self) -> Self {
        self.rebind()
    }
}

impl<T, U> From<&TypedAllocator<U>> for TypedAllocator<T> {
    fn from(other: &TypedAllocator<U>) -> Self {
        other.rebind()
    }
}

impl<T, U> PartialEq<TypedAllocator<U>> for TypedAllocator<T> {
    fn eq(&self, other: &TypedAllocator<U>) -> bool {
        self.resource.is_equal(other.resource.as_ref())
    }
}

impl<T> Eq for TypedAllocator<T> {}

impl<T> fmt::Debug for TypedAllocator<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypedAllocator")
            .field("element", &std::any::type_name::<T>())
            .field("resource", &Arc::as_ptr(&self.resource).cast::<()>())
            .finish()
    }
}
