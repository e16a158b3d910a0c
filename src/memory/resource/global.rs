/*!
 * Global Heap Resource
 * Byte resource backed by the process allocator
 */

use crate::memory::traits::MemoryResource;
use crate::memory::types::{MemoryError, MemoryResult};
use std::alloc::{self, Layout};
use std::ptr::NonNull;

/// Forwards to `std::alloc`
#[derive(Debug, Default, Clone, Copy)]
pub struct GlobalResource;

impl MemoryResource for GlobalResource {
    fn allocate(&self, layout: Layout) -> MemoryResult<NonNull<u8>> {
        if layout.size() == 0 {
            // Zero-sized requests get a well-aligned dangling pointer
            return NonNull::new(layout.align() as *mut u8).ok_or(MemoryError::ParentAllocationFailed {
                size: 0,
                alignment: layout.align(),
            });
        }

        // SAFETY: layout has a non-zero size
        let ptr = unsafe { alloc::alloc(layout) };
        NonNull::new(ptr).ok_or(MemoryError::ParentAllocationFailed {
            size: layout.size(),
            alignment: layout.align(),
        })
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) -> MemoryResult<()> {
        if layout.size() != 0 {
            alloc::dealloc(ptr.as_ptr(), layout);
        }
        Ok(())
    }
}
