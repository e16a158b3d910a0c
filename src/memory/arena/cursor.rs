/*!
 * Arena Cursor
 * The only code path that reads or writes raw arena memory
 */

use crate::core::limits::{BLOCK_ALIGN, HEADER_SIZE, WORD_SIZE};
use crate::core::types::{Offset, Size};
use std::ptr::NonNull;

/// Word-granular view over an arena buffer
///
/// All metadata lives inside the buffer and is addressed by offset from the
/// base, so a byte copy of the buffer is a valid arena. Offsets handed to
/// `word`/`set_word` come from headers the arena itself wrote; the bounds
/// checks below are debug-only.
pub(crate) struct ArenaCursor {
    base: NonNull<u8>,
    capacity: Size,
}

// SAFETY: the cursor is only reachable through the owning arena's mutex
unsafe impl Send for ArenaCursor {}

impl ArenaCursor {
    /// # Safety
    ///
    /// `base` must be valid for reads and writes of `capacity` bytes, aligned
    /// to `BLOCK_ALIGN`, and not accessed through any other path while the
    /// cursor exists (client payloads excepted).
    pub(crate) unsafe fn new(base: NonNull<u8>, capacity: Size) -> Self {
        debug_assert_eq!(base.as_ptr() as usize % BLOCK_ALIGN, 0);
        debug_assert_eq!(capacity % BLOCK_ALIGN, 0);
        Self { base, capacity }
    }

    #[inline]
    pub(crate) fn capacity(&self) -> Size {
        self.capacity
    }

    #[inline]
    pub(crate) fn word(&self, offset: Offset) -> usize {
        debug_assert!(offset % WORD_SIZE == 0 && offset + WORD_SIZE <= self.capacity);
        // SAFETY: offset is word aligned and inside the buffer
        unsafe { self.base.as_ptr().add(offset).cast::<usize>().read() }
    }

    #[inline]
    pub(crate) fn set_word(&mut self, offset: Offset, value: usize) {
        debug_assert!(offset % WORD_SIZE == 0 && offset + WORD_SIZE <= self.capacity);
        // SAFETY: offset is word aligned and inside the buffer
        unsafe { self.base.as_ptr().add(offset).cast::<usize>().write(value) }
    }

    /// Client pointer for the block at `block`
    #[inline]
    pub(crate) fn payload(&self, block: Offset) -> NonNull<u8> {
        debug_assert!(block + HEADER_SIZE <= self.capacity);
        // SAFETY: the header lies inside the buffer, so the payload start is at most one past the end
        unsafe { NonNull::new_unchecked(self.base.as_ptr().add(block + HEADER_SIZE)) }
    }

    /// Whether `ptr` points into the buffer
    pub(crate) fn contains(&self, ptr: NonNull<u8>) -> bool {
        let start = self.base.as_ptr() as usize;
        let address = ptr.as_ptr() as usize;
        address >= start && address < start + self.capacity
    }

    /// Header offset for a client pointer, if it could be a payload start
    ///
    /// Checks bounds and alignment only; whether a block actually starts there
    /// is up to the caller.
    pub(crate) fn header_of(&self, ptr: NonNull<u8>) -> Option<Offset> {
        let start = self.base.as_ptr() as usize;
        let address = ptr.as_ptr() as usize;
        let offset = address.checked_sub(start)?.checked_sub(HEADER_SIZE)?;
        if offset % BLOCK_ALIGN != 0 || offset + HEADER_SIZE > self.capacity {
            return None;
        }
        Some(offset)
    }

    /// Overwrite this buffer with the contents of `other`
    pub(crate) fn copy_from(&mut self, other: &ArenaCursor) {
        debug_assert_eq!(self.capacity, other.capacity);
        // SAFETY: both buffers hold `capacity` bytes and never overlap
        unsafe {
            std::ptr::copy_nonoverlapping(other.base.as_ptr(), self.base.as_ptr(), self.capacity);
        }
    }

    /// Identity of the underlying buffer, for positional comparisons
    #[inline]
    pub(crate) fn base_address(&self) -> usize {
        self.base.as_ptr() as usize
    }
}
