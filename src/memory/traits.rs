/*!
 * Memory Traits
 * Byte resource contract and arena abstractions
 */

use super::types::*;
use crate::core::types::Size;
use std::alloc::Layout;
use std::ptr::NonNull;

/// Byte-granularity memory resource
///
/// Everything that hands out raw memory implements this: the global heap,
/// the tracking test resource, and both arena strategies. Callers hold an
/// `Arc<dyn MemoryResource>` and never assume a concrete variant.
pub trait MemoryResource: Send + Sync {
    /// Allocate a region satisfying `layout`
    fn allocate(&self, layout: Layout) -> MemoryResult<NonNull<u8>>;

    /// Return a region to the resource
    ///
    /// # Safety
    ///
    /// `ptr` must come from `allocate` on a resource equal to this one, with
    /// the same `layout`, and must not have been deallocated since. Arenas
    /// reject pointers outside their buffer, but other misuse is undefined.
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) -> MemoryResult<()>;

    /// Whether memory from `other` can be released through `self`
    ///
    /// Defaults to object identity.
    fn is_equal(&self, other: &dyn MemoryResource) -> bool {
        std::ptr::eq(
            self as *const Self as *const (),
            other as *const dyn MemoryResource as *const (),
        )
    }
}

/// Fixed-capacity arena behind the byte resource contract
pub trait ArenaAllocator: MemoryResource {
    /// Total bytes managed, fixed for the arena's lifetime
    fn capacity(&self) -> Size;

    /// Active fit policy
    fn fit_mode(&self) -> FitMode;

    /// Change the fit policy; applies from the next allocation on
    fn set_fit_mode(&self, mode: FitMode);

    /// Snapshot of every block in address order
    fn blocks(&self) -> Vec<BlockInfo>;

    /// Check the block structure and the free index
    fn verify(&self) -> MemoryResult<()>;

    /// Whether `ptr` points inside the arena buffer
    fn owns(&self, ptr: NonNull<u8>) -> bool;

    /// Usage figures computed from one consistent snapshot
    fn stats(&self) -> ArenaStats {
        ArenaStats::from_blocks(self.capacity(), &self.blocks())
    }
}
