/*!
 * Sorted List Arena
 * Free blocks threaded through one ascending-by-address singly-linked list
 */

use super::block::{required_block_size, BlockIter, NIL, STRATEGY_WORD};
use super::cursor::ArenaCursor;
use super::{check_alignment, ArenaBuilder, ArenaConfig, RawArena};
use crate::core::limits::{HEADER_SIZE, LIST_MIN_BLOCK};
use crate::core::types::{Offset, Size};
use crate::memory::resource::default_resource;
use crate::memory::traits::{ArenaAllocator, MemoryResource};
use crate::memory::types::{BlockInfo, FitMode, MemoryError, MemoryResult};
use crate::monitoring::{emit, Logger, Severity};
use parking_lot::Mutex;
use std::alloc::Layout;
use std::ptr::NonNull;
use std::sync::Arc;

/// Arena whose free blocks form an address-sorted singly-linked list
///
/// The second header word of a free block holds the offset of the next free
/// block. Selection walks the list under the active fit mode; deallocation
/// finds the insertion point in the list and merges with whichever address
/// neighbours are free.
pub struct SortedListArena {
    state: Mutex<ListState>,
    logger: Option<Arc<dyn Logger>>,
    raw: RawArena,
}

struct ListState {
    cursor: ArenaCursor,
    head: Offset,
    fit_mode: FitMode,
}

impl ListState {
    fn new(mut cursor: ArenaCursor, fit_mode: FitMode) -> Self {
        let capacity = cursor.capacity();
        cursor.write_header(0, capacity, false);
        cursor.set_word(STRATEGY_WORD, NIL);
        Self {
            cursor,
            head: 0,
            fit_mode,
        }
    }

    #[inline]
    fn next(&self, block: Offset) -> Offset {
        self.cursor.word(block + STRATEGY_WORD)
    }

    #[inline]
    fn set_next(&mut self, block: Offset, next: Offset) {
        self.cursor.set_word(block + STRATEGY_WORD, next);
    }

    /// Point `prev` (or the head when `prev` is NIL) at `block`
    #[inline]
    fn link_after(&mut self, prev: Offset, block: Offset) {
        if prev == NIL {
            self.head = block;
        } else {
            self.set_next(prev, block);
        }
    }

    /// Pick a free block of at least `needed` bytes: (list predecessor, block)
    fn select(&self, needed: Size) -> Option<(Offset, Offset)> {
        let mut chosen: Option<(Offset, Offset, Size)> = None;
        let mut prev = NIL;
        let mut current = self.head;

        while current != NIL {
            let size = self.cursor.block_size(current);
            match self.fit_mode {
                FitMode::FirstFit => {
                    if size >= needed {
                        return Some((prev, current));
                    }
                }
                FitMode::BestFit => {
                    if size >= needed && chosen.map_or(true, |(_, _, best)| size < best) {
                        chosen = Some((prev, current, size));
                    }
                }
                FitMode::WorstFit => {
                    if chosen.map_or(true, |(_, _, worst)| size > worst) {
                        chosen = Some((prev, current, size));
                    }
                }
            }
            prev = current;
            current = self.next(current);
        }

        chosen
            .filter(|&(_, _, size)| size >= needed)
            .map(|(prev, block, _)| (prev, block))
    }

    fn largest_free(&self) -> Size {
        let mut largest = 0;
        let mut current = self.head;
        while current != NIL {
            largest = largest.max(self.cursor.block_size(current));
            current = self.next(current);
        }
        largest
    }

    /// Mark `block` occupied, splitting off a free remainder when it can stand alone
    fn take(&mut self, prev: Offset, block: Offset, needed: Size) {
        let size = self.cursor.block_size(block);
        let next = self.next(block);

        if size - needed >= LIST_MIN_BLOCK {
            // The remainder inherits the block's place in the list
            let rest = block + needed;
            self.cursor.write_header(rest, size - needed, false);
            self.set_next(rest, next);
            self.link_after(prev, rest);
            self.cursor.write_header(block, needed, true);
        } else {
            self.link_after(prev, next);
            self.cursor.write_header(block, size, true);
        }
        self.set_next(block, NIL);
    }

    /// Return `block` to the list, merging with free address neighbours
    ///
    /// Returns the offset and size of the resulting free block.
    fn release(&mut self, block: Offset) -> (Offset, Size) {
        let mut size = self.cursor.block_size(block);

        let mut prev = NIL;
        let mut next = self.head;
        while next != NIL && next < block {
            prev = next;
            next = self.next(next);
        }

        if next != NIL && block + size == next {
            size += self.cursor.block_size(next);
            next = self.next(next);
        }

        let mut start = block;
        if prev != NIL && prev + self.cursor.block_size(prev) == block {
            start = prev;
            size += self.cursor.block_size(prev);
        }

        self.cursor.write_header(start, size, false);
        self.set_next(start, next);
        if start != prev {
            self.link_after(prev, start);
        }
        (start, size)
    }

    /// Occupied block for `ptr` that actually starts on the block chain
    ///
    /// Blocks between a free block and the next one are all occupied, so the
    /// walk starts at the end of the closest free block below `ptr`. Headers
    /// absorbed by a merge or forged inside a payload are never reached.
    fn validated_block(&self, ptr: NonNull<u8>, size: Size) -> Option<Offset> {
        let block = self.cursor.occupied_block_of(ptr, size)?;

        let mut prev = NIL;
        let mut current = self.head;
        while current != NIL && current < block {
            prev = current;
            current = self.next(current);
        }

        let mut offset = if prev == NIL {
            0
        } else {
            prev + self.cursor.block_size(prev)
        };
        while offset < block {
            let step = self.cursor.block_size(offset);
            if step == 0 || !self.cursor.is_occupied(offset) {
                return None;
            }
            offset += step;
        }
        (offset == block).then_some(block)
    }

    fn verify(&self) -> MemoryResult<()> {
        let free = self.cursor.verify_blocks(LIST_MIN_BLOCK)?;

        let mut listed = Vec::with_capacity(free.len());
        let mut current = self.head;
        while current != NIL {
            if current >= self.cursor.capacity() || listed.len() > free.len() {
                return Err(MemoryError::corruption(current, "free list runs past the free blocks"));
            }
            if listed.last().map_or(false, |&last| current <= last) {
                return Err(MemoryError::corruption(current, "free list is not in ascending address order"));
            }
            listed.push(current);
            current = self.next(current);
        }

        if listed != free {
            let offset = listed
                .iter()
                .zip(&free)
                .find(|(a, b)| a != b)
                .map(|(a, _)| *a)
                .or_else(|| listed.get(free.len()).or_else(|| free.get(listed.len())).copied())
                .unwrap_or(0);
            return Err(MemoryError::corruption(offset, "free list does not match the free blocks"));
        }
        Ok(())
    }
}

impl SortedListArena {
    /// Arena of `space_size` bytes from the default resource, first fit, no logging
    pub fn new(space_size: Size) -> MemoryResult<Self> {
        Self::from_parts(&ArenaConfig::new(space_size, FitMode::default()), default_resource(), None)
    }

    pub fn builder(space_size: Size) -> ArenaBuilder {
        ArenaBuilder::new(space_size)
    }

    pub(crate) fn from_parts(
        config: &ArenaConfig,
        parent: Arc<dyn MemoryResource>,
        logger: Option<Arc<dyn Logger>>,
    ) -> MemoryResult<Self> {
        let (raw, cursor) = RawArena::acquire(parent, config.space_size, LIST_MIN_BLOCK)?;
        let arena = Self {
            state: Mutex::new(ListState::new(cursor, config.fit_mode)),
            logger,
            raw,
        };
        arena.log(Severity::Info, || {
            format!(
                "Sorted list arena initialized with {} bytes ({})",
                arena.raw.capacity(),
                config.fit_mode
            )
        });
        Ok(arena)
    }

    /// Run `f` over the blocks in address order while holding the arena lock
    pub fn with_blocks<R, F>(&self, f: F) -> R
    where
        F: FnOnce(BlockIter<'_>) -> R,
    {
        let state = self.state.lock();
        f(state.cursor.iter_blocks())
    }

    /// Deep copy: a same-size buffer from the same parent holding the same blocks
    pub fn try_clone(&self) -> MemoryResult<Self> {
        let state = self.state.lock();
        let (raw, mut cursor) =
            RawArena::acquire(Arc::clone(self.raw.parent()), self.raw.capacity(), LIST_MIN_BLOCK)?;
        cursor.copy_from(&state.cursor);
        Ok(Self {
            state: Mutex::new(ListState {
                cursor,
                head: state.head,
                fit_mode: state.fit_mode,
            }),
            logger: self.logger.clone(),
            raw,
        })
    }

    #[inline]
    fn log<F: FnOnce() -> String>(&self, severity: Severity, message: F) {
        emit(self.logger.as_ref(), severity, message);
    }
}

impl MemoryResource for SortedListArena {
    fn allocate(&self, layout: Layout) -> MemoryResult<NonNull<u8>> {
        check_alignment(&layout)?;
        let request = layout.size();
        let mut state = self.state.lock();
        let fit_mode = state.fit_mode;
        self.log(Severity::Debug, || format!("Allocating {} bytes ({})", request, fit_mode));

        let selected = required_block_size(request, LIST_MIN_BLOCK)
            .and_then(|needed| state.select(needed).map(|(prev, block)| (prev, block, needed)));

        let Some((prev, block, needed)) = selected else {
            let largest_free = state.largest_free().saturating_sub(HEADER_SIZE);
            drop(state);
            self.log(Severity::Error, || {
                format!(
                    "Out of memory: {} bytes requested, largest free block holds {} bytes",
                    request, largest_free
                )
            });
            return Err(MemoryError::OutOfMemory {
                requested: request,
                largest_free,
                capacity: self.raw.capacity(),
            });
        };

        state.take(prev, block, needed);
        let size = state.cursor.block_size(block);
        let ptr = state.cursor.payload(block);
        drop(state);

        self.log(Severity::Trace, || {
            format!("Allocated block at offset 0x{:x} ({} bytes) for {} bytes", block, size, request)
        });
        Ok(ptr)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) -> MemoryResult<()> {
        let address = ptr.as_ptr() as usize;
        let mut state = self.state.lock();
        self.log(Severity::Debug, || format!("Deallocating 0x{:x} ({} bytes)", address, layout.size()));

        let Some(block) = state.validated_block(ptr, layout.size()) else {
            drop(state);
            self.log(Severity::Error, || {
                format!("Rejected deallocation of 0x{:x}: not an occupied block of this arena", address)
            });
            return Err(MemoryError::InvalidAddress(address));
        };

        let (start, size) = state.release(block);
        drop(state);

        self.log(Severity::Trace, || {
            format!("Released block at offset 0x{:x}, free block 0x{:x} now spans {} bytes", block, start, size)
        });
        Ok(())
    }
}

impl ArenaAllocator for SortedListArena {
    fn capacity(&self) -> Size {
        self.raw.capacity()
    }

    fn fit_mode(&self) -> FitMode {
        self.state.lock().fit_mode
    }

    fn set_fit_mode(&self, mode: FitMode) {
        let mut state = self.state.lock();
        state.fit_mode = mode;
        self.log(Severity::Debug, || format!("Fit mode set to {}", mode));
    }

    fn blocks(&self) -> Vec<BlockInfo> {
        self.with_blocks(|blocks| blocks.collect())
    }

    fn verify(&self) -> MemoryResult<()> {
        self.state.lock().verify()
    }

    fn owns(&self, ptr: NonNull<u8>) -> bool {
        self.raw.contains(ptr)
    }
}

impl std::fmt::Debug for SortedListArena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("SortedListArena")
            .field("capacity", &self.raw.capacity())
            .field("fit_mode", &state.fit_mode)
            .field("head", &state.head)
            .finish()
    }
}
