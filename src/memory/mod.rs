/*!
 * Memory Module
 * Byte resources, fixed-capacity arenas and the typed allocator facade
 */

pub mod arena;
pub mod resource;
pub mod traits;
pub mod typed;
pub mod types;

// Re-export for convenience
pub use arena::{ArenaBuilder, ArenaConfig, BlockIter, RedBlackTreeArena, SortedListArena};
pub use resource::{default_resource, set_default_resource, GlobalResource, TrackingResource};
pub use traits::*;
pub use typed::TypedAllocator;
pub use types::*;
