/*!
 * Fit Arena
 * Fixed-capacity arena allocators behind a byte resource contract
 */

pub mod core;
pub mod memory;
pub mod monitoring;

// Re-exports
pub use memory::{
    default_resource, set_default_resource, ArenaAllocator, ArenaBuilder, ArenaConfig, ArenaStats,
    BlockInfo, FitMode, MemoryError, MemoryResource, MemoryResult, RedBlackTreeArena,
    SortedListArena, TypedAllocator,
};
pub use monitoring::{init_tracing, LogFacade, Logger, Severity, TracingFacade};
