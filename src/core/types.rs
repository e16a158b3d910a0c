/*!
 * Core Types
 * Common types used across the allocators
 */

/// Address type for memory operations
pub type Address = usize;

/// Size type for memory operations
pub type Size = usize;

/// Byte offset of a block inside an arena buffer
pub type Offset = usize;
