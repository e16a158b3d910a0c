/*!
 * Block Headers
 * Size/status words shared by both arena strategies, plus address-order iteration
 */

use super::cursor::ArenaCursor;
use crate::core::limits::{BLOCK_ALIGN, HEADER_SIZE, WORD_SIZE};
use crate::core::types::{Offset, Size};
use crate::memory::types::BlockInfo;

/// Marks an absent link in free-list and free-tree headers
pub(crate) const NIL: Offset = usize::MAX;

/// Offset of the strategy-specific header word
pub(crate) const STRATEGY_WORD: Offset = WORD_SIZE;

const OCCUPIED: usize = 0b01;
const RED: usize = 0b10;
const FLAG_MASK: usize = BLOCK_ALIGN - 1;

/// Block size (header included) needed to serve `request` payload bytes
///
/// Zero-byte requests still get one aligned unit. Returns `None` on overflow.
pub(crate) fn required_block_size(request: Size, min_block: Size) -> Option<Size> {
    let payload = request.max(1).checked_add(BLOCK_ALIGN - 1)? & !(BLOCK_ALIGN - 1);
    Some(payload.checked_add(HEADER_SIZE)?.max(min_block))
}

impl ArenaCursor {
    #[inline]
    pub(crate) fn block_size(&self, block: Offset) -> Size {
        self.word(block) & !FLAG_MASK
    }

    #[inline]
    pub(crate) fn is_occupied(&self, block: Offset) -> bool {
        self.word(block) & OCCUPIED != 0
    }

    /// Rewrite size and status; the color bit is cleared
    #[inline]
    pub(crate) fn write_header(&mut self, block: Offset, size: Size, occupied: bool) {
        debug_assert_eq!(size & FLAG_MASK, 0);
        let flags = if occupied { OCCUPIED } else { 0 };
        self.set_word(block, size | flags);
    }

    #[inline]
    pub(crate) fn is_red(&self, block: Offset) -> bool {
        self.word(block) & RED != 0
    }

    #[inline]
    pub(crate) fn set_red(&mut self, block: Offset, red: bool) {
        let word = self.word(block);
        let word = if red { word | RED } else { word & !RED };
        self.set_word(block, word);
    }

    /// Payload bytes a block can hold
    #[inline]
    pub(crate) fn payload_capacity(&self, block: Offset) -> Size {
        self.block_size(block) - HEADER_SIZE
    }

    /// Occupied block whose payload starts at `ptr` and can hold `size` bytes
    pub(crate) fn occupied_block_of(&self, ptr: std::ptr::NonNull<u8>, size: Size) -> Option<Offset> {
        let block = self.header_of(ptr)?;
        if !self.is_occupied(block) {
            return None;
        }
        let block_size = self.block_size(block);
        if block_size < HEADER_SIZE + size.max(1) || block + block_size > self.capacity() {
            return None;
        }
        Some(block)
    }

    pub(crate) fn iter_blocks(&self) -> BlockIter<'_> {
        BlockIter {
            cursor: self,
            offset: 0,
        }
    }

    /// Walk the physical blocks checking tiling and coalescing
    ///
    /// Returns the offsets of the free blocks in address order.
    pub(crate) fn verify_blocks(&self, min_block: Size) -> crate::memory::MemoryResult<Vec<Offset>> {
        use crate::memory::MemoryError;

        let mut free = Vec::new();
        let mut offset = 0;
        let mut previous_free = false;
        while offset < self.capacity() {
            let size = self.block_size(offset);
            if size < min_block || offset + size > self.capacity() {
                return Err(MemoryError::corruption(
                    offset,
                    format!("block size {} breaks the arena tiling", size),
                ));
            }
            let occupied = self.is_occupied(offset);
            if !occupied {
                if previous_free {
                    return Err(MemoryError::corruption(offset, "adjacent free blocks were not coalesced"));
                }
                free.push(offset);
            }
            previous_free = !occupied;
            offset += size;
        }
        Ok(free)
    }
}

/// Forward iterator over every block in address order
///
/// Borrowed from a locked arena. A clone carries the current position, and
/// two iterators are equal when they sit on the same block of the same arena.
#[derive(Clone)]
pub struct BlockIter<'a> {
    cursor: &'a ArenaCursor,
    offset: Offset,
}

impl<'a> BlockIter<'a> {
    /// Offset of the next block to be yielded
    pub fn position(&self) -> Offset {
        self.offset
    }
}

impl<'a> Iterator for BlockIter<'a> {
    type Item = BlockInfo;

    fn next(&mut self) -> Option<BlockInfo> {
        if self.offset >= self.cursor.capacity() {
            return None;
        }
        let size = self.cursor.block_size(self.offset);
        let info = BlockInfo {
            offset: self.offset,
            size,
            occupied: self.cursor.is_occupied(self.offset),
        };
        // A zero size would never advance; treat it as the end of a corrupt arena
        self.offset = if size == 0 {
            self.cursor.capacity()
        } else {
            self.offset + size
        };
        Some(info)
    }
}

impl<'a> std::iter::FusedIterator for BlockIter<'a> {}

impl<'a> PartialEq for BlockIter<'a> {
    fn eq(&self, other: &Self) -> bool {
        self.cursor.base_address() == other.cursor.base_address() && self.offset == other.offset
    }
}

impl<'a> Eq for BlockIter<'a> {}

impl<'a> std::fmt::Debug for BlockIter<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockIter")
            .field("offset", &self.offset)
            .field("capacity", &self.cursor.capacity())
            .finish()
    }
}
