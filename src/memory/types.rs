/*!
 * Memory Types
 * Common types for arena allocation
 */

use crate::core::types::{Offset, Size};
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Memory operation result
pub type MemoryResult<T> = Result<T, MemoryError>;

/// Memory errors
#[derive(Error, Debug, Clone, PartialEq, Eq, Diagnostic)]
pub enum MemoryError {
    #[error("Out of memory: requested {requested} bytes, largest free block holds {largest_free} bytes ({capacity} byte arena)")]
    #[diagnostic(
        code(memory::out_of_memory),
        help("The arena never grows. Free blocks, switch fit mode, or build a larger arena.")
    )]
    OutOfMemory {
        requested: Size,
        largest_free: Size,
        capacity: Size,
    },

    #[error("Invalid memory address: 0x{0:x}")]
    #[diagnostic(
        code(memory::invalid_address),
        help("The pointer was not returned by this resource, or it was already released.")
    )]
    InvalidAddress(usize),

    #[error("Alignment error: requested alignment {alignment}, supported up to {supported}")]
    #[diagnostic(code(memory::alignment))]
    AlignmentError { alignment: usize, supported: usize },

    #[error("Layout overflow: {count} elements of {element_size} bytes")]
    #[diagnostic(code(memory::layout_overflow))]
    LayoutOverflow { count: usize, element_size: usize },

    #[error("Arena capacity too small: {requested} bytes requested, at least {minimum} required")]
    #[diagnostic(code(memory::capacity_too_small))]
    CapacityTooSmall { requested: Size, minimum: Size },

    #[error("Parent resource could not supply {size} bytes aligned to {alignment}")]
    #[diagnostic(code(memory::parent_allocation_failed))]
    ParentAllocationFailed { size: Size, alignment: usize },

    #[error("Memory corruption detected at offset 0x{offset:x}: {reason}")]
    #[diagnostic(code(memory::corruption))]
    CorruptionDetected { offset: Offset, reason: String },

    #[error("Invalid arena configuration: {0}")]
    #[diagnostic(code(memory::invalid_configuration))]
    InvalidConfiguration(String),

    #[error("Default memory resource already initialized")]
    #[diagnostic(
        code(memory::default_resource_set),
        help("Install the default resource once, before anything asks for it.")
    )]
    DefaultResourceAlreadySet,
}

impl MemoryError {
    pub(crate) fn corruption(offset: Offset, reason: impl Into<String>) -> Self {
        Self::CorruptionDetected {
            offset,
            reason: reason.into(),
        }
    }
}

/// Policy used to pick a free block for a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FitMode {
    /// First block large enough, in ascending address order
    #[default]
    FirstFit,
    /// Smallest block large enough, lowest address on ties
    BestFit,
    /// Largest block, lowest address on ties
    WorstFit,
}

impl FitMode {
    pub const ALL: [FitMode; 3] = [FitMode::FirstFit, FitMode::BestFit, FitMode::WorstFit];

    pub fn as_str(&self) -> &'static str {
        match self {
            FitMode::FirstFit => "first_fit",
            FitMode::BestFit => "best_fit",
            FitMode::WorstFit => "worst_fit",
        }
    }
}

impl fmt::Display for FitMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FitMode {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "first_fit" | "first" => Ok(FitMode::FirstFit),
            "best_fit" | "best" => Ok(FitMode::BestFit),
            "worst_fit" | "worst" => Ok(FitMode::WorstFit),
            other => Err(MemoryError::InvalidConfiguration(format!(
                "unknown fit mode '{}'",
                other
            ))),
        }
    }
}

/// One block as seen by introspection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockInfo {
    /// Offset of the block header from the arena start
    pub offset: Offset,
    /// Block size including its header
    pub size: Size,
    pub occupied: bool,
}

impl BlockInfo {
    pub fn is_free(&self) -> bool {
        !self.occupied
    }

    /// Offset one past the last byte of the block
    pub fn end(&self) -> Offset {
        self.offset + self.size
    }
}

/// Arena statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArenaStats {
    pub capacity: Size,
    pub used_bytes: Size,
    pub free_bytes: Size,
    pub occupied_blocks: usize,
    pub free_blocks: usize,
    pub largest_free_block: Size,
}

impl ArenaStats {
    pub fn from_blocks<'a>(capacity: Size, blocks: impl IntoIterator<Item = &'a BlockInfo>) -> Self {
        let mut stats = ArenaStats {
            capacity,
            ..Default::default()
        };
        for block in blocks {
            if block.occupied {
                stats.used_bytes += block.size;
                stats.occupied_blocks += 1;
            } else {
                stats.free_bytes += block.size;
                stats.free_blocks += 1;
                stats.largest_free_block = stats.largest_free_block.max(block.size);
            }
        }
        stats
    }

    /// Share of the arena taken by occupied blocks, in percent
    pub fn usage_percentage(&self) -> f64 {
        if self.capacity == 0 {
            return 0.0;
        }
        (self.used_bytes as f64 / self.capacity as f64) * 100.0
    }

    /// 0.0 when all free space is one block, approaching 1.0 as it scatters
    pub fn fragmentation(&self) -> f64 {
        if self.free_bytes == 0 {
            return 0.0;
        }
        1.0 - (self.largest_free_block as f64 / self.free_bytes as f64)
    }
}
