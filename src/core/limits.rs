/*!
 * Arena Limits and Constants
 *
 * Centralized location for block layout constants and default sizes.
 *
 * ## Block layout
 * Every block starts with a two-word header. Word 0 holds the block size with
 * status flags packed into the low bits; word 1 is strategy specific (next free
 * offset for the sorted list, physical predecessor size for the free tree).
 * Free blocks in the red-black tree additionally keep parent/left/right offsets
 * in the first three payload words.
 */

use std::mem::size_of;

// =============================================================================
// BLOCK LAYOUT
// =============================================================================

/// Machine word used for every header field
pub const WORD_SIZE: usize = size_of::<usize>();

/// Granularity of block sizes and alignment of every payload (16 bytes)
/// Sizes are multiples of this, so the low 4 bits of a size word are free for flags
pub const BLOCK_ALIGN: usize = 16;

/// Header in front of every block (size word + strategy word, padded to BLOCK_ALIGN)
pub const HEADER_SIZE: usize = BLOCK_ALIGN;

/// Smallest block the sorted list arena will create (header + one aligned unit)
pub const LIST_MIN_BLOCK: usize = HEADER_SIZE + BLOCK_ALIGN;

/// Smallest block the red-black tree arena will create
/// Header plus parent/left/right links, rounded up to BLOCK_ALIGN
pub const TREE_MIN_BLOCK: usize = (HEADER_SIZE + 3 * WORD_SIZE + BLOCK_ALIGN - 1) & !(BLOCK_ALIGN - 1);

// =============================================================================
// DEFAULTS
// =============================================================================

/// Default arena capacity (1MB)
pub const DEFAULT_ARENA_SIZE: usize = 1024 * 1024;

/// Environment variable overriding the arena capacity
pub const ENV_SPACE_SIZE: &str = "ARENA_SPACE_SIZE";

/// Environment variable overriding the fit mode
pub const ENV_FIT_MODE: &str = "ARENA_FIT_MODE";
