/*!
 * Arena Allocators
 *
 * Fixed-capacity allocators that carve one buffer, taken from a parent
 * resource at construction, into variable-sized blocks.
 *
 * ## Strategies
 *
 * - **Sorted list** ([`SortedListArena`]): free blocks threaded through one
 *   ascending-by-address singly-linked list. O(n) selection for every fit mode.
 * - **Red-black tree** ([`RedBlackTreeArena`]): free blocks indexed by
 *   (size, address) in an embedded red-black tree. O(log n) best/worst fit,
 *   O(1) neighbour lookup through boundary tags.
 *
 * ## Features
 *
 * - **Self-describing**: every header lives inside the buffer, addressed by offset
 * - **Block splitting**: blocks are split when the remainder can stand alone
 * - **Coalescing**: neighbouring free blocks merge on every deallocation
 * - **Introspection**: address-ordered block iteration, stats and verification
 */

mod block;
mod config;
mod cursor;
mod red_black_tree;
mod sorted_list;

pub use block::BlockIter;
pub use config::ArenaConfig;
pub use red_black_tree::RedBlackTreeArena;
pub use sorted_list::SortedListArena;

use crate::core::limits::BLOCK_ALIGN;
use crate::core::types::Size;
use crate::memory::resource::default_resource;
use crate::memory::traits::MemoryResource;
use crate::memory::types::{FitMode, MemoryError, MemoryResult};
use crate::monitoring::Logger;
use cursor::ArenaCursor;
use std::alloc::Layout;
use std::ptr::NonNull;
use std::sync::Arc;

/// Buffer taken from the parent resource, released on drop
pub(crate) struct RawArena {
    base: NonNull<u8>,
    layout: Layout,
    parent: Arc<dyn MemoryResource>,
}

// SAFETY: the buffer is only touched through the owning arena's lock or at drop
unsafe impl Send for RawArena {}
unsafe impl Sync for RawArena {}

impl RawArena {
    /// Take a buffer of `space_size` bytes (rounded down to the block alignment)
    pub(crate) fn acquire(
        parent: Arc<dyn MemoryResource>,
        space_size: Size,
        min_block: Size,
    ) -> MemoryResult<(Self, ArenaCursor)> {
        let capacity = space_size & !(BLOCK_ALIGN - 1);
        if capacity < min_block {
            return Err(MemoryError::CapacityTooSmall {
                requested: space_size,
                minimum: min_block,
            });
        }

        let layout = Layout::from_size_align(capacity, BLOCK_ALIGN).map_err(|_| {
            MemoryError::ParentAllocationFailed {
                size: capacity,
                alignment: BLOCK_ALIGN,
            }
        })?;
        let base = parent.allocate(layout)?;

        if base.as_ptr() as usize % BLOCK_ALIGN != 0 {
            // SAFETY: returned by `parent` for this exact layout
            let _ = unsafe { parent.deallocate(base, layout) };
            return Err(MemoryError::ParentAllocationFailed {
                size: capacity,
                alignment: BLOCK_ALIGN,
            });
        }

        // SAFETY: freshly allocated, aligned, and owned by the returned RawArena
        let cursor = unsafe { ArenaCursor::new(base, capacity) };
        Ok((Self { base, layout, parent }, cursor))
    }

    pub(crate) fn capacity(&self) -> Size {
        self.layout.size()
    }

    pub(crate) fn parent(&self) -> &Arc<dyn MemoryResource> {
        &self.parent
    }

    pub(crate) fn contains(&self, ptr: NonNull<u8>) -> bool {
        let start = self.base.as_ptr() as usize;
        let address = ptr.as_ptr() as usize;
        address >= start && address < start + self.layout.size()
    }
}

impl Drop for RawArena {
    fn drop(&mut self) {
        // SAFETY: allocated from `parent` with `layout` in `acquire`
        if let Err(e) = unsafe { self.parent.deallocate(self.base, self.layout) } {
            log::error!("Parent resource refused the arena buffer: {}", e);
        }
    }
}

/// Requests above the block alignment cannot be honoured by an arena
pub(crate) fn check_alignment(layout: &Layout) -> MemoryResult<()> {
    if layout.align() > BLOCK_ALIGN {
        return Err(MemoryError::AlignmentError {
            alignment: layout.align(),
            supported: BLOCK_ALIGN,
        });
    }
    Ok(())
}

/// Builder for both arena strategies
///
/// # Example
///
/// ```
/// use fit_arena::memory::{ArenaAllocator, ArenaBuilder, FitMode};
///
/// let arena = ArenaBuilder::new(4096)
///     .with_fit_mode(FitMode::BestFit)
///     .build_red_black_tree()
///     .unwrap();
/// assert_eq!(arena.capacity(), 4096);
/// ```
#[derive(Clone)]
pub struct ArenaBuilder {
    config: ArenaConfig,
    parent: Option<Arc<dyn MemoryResource>>,
    logger: Option<Arc<dyn Logger>>,
}

impl ArenaBuilder {
    pub fn new(space_size: Size) -> Self {
        Self::from_config(ArenaConfig {
            space_size,
            ..Default::default()
        })
    }

    pub fn from_config(config: ArenaConfig) -> Self {
        Self {
            config,
            parent: None,
            logger: None,
        }
    }

    pub fn with_fit_mode(mut self, fit_mode: FitMode) -> Self {
        self.config.fit_mode = fit_mode;
        self
    }

    /// Resource supplying the buffer (default: the process-wide default resource)
    pub fn with_parent(mut self, parent: Arc<dyn MemoryResource>) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn with_logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn build_sorted_list(self) -> MemoryResult<SortedListArena> {
        let parent = self.parent.unwrap_or_else(default_resource);
        SortedListArena::from_parts(&self.config, parent, self.logger)
    }

    pub fn build_red_black_tree(self) -> MemoryResult<RedBlackTreeArena> {
        let parent = self.parent.unwrap_or_else(default_resource);
        RedBlackTreeArena::from_parts(&self.config, parent, self.logger)
    }
}

impl std::fmt::Debug for ArenaBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArenaBuilder")
            .field("config", &self.config)
            .field("custom_parent", &self.parent.is_some())
            .field("logger", &self.logger.is_some())
            .finish()
    }
}
