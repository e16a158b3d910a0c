/*!
 * Red-Black Tree Arena
 * Free blocks indexed by (size, address) in a tree embedded in the blocks themselves
 */

use super::block::{required_block_size, BlockIter, NIL, STRATEGY_WORD};
use super::cursor::ArenaCursor;
use super::{check_alignment, ArenaBuilder, ArenaConfig, RawArena};
use crate::core::limits::{BLOCK_ALIGN, HEADER_SIZE, TREE_MIN_BLOCK, WORD_SIZE};
use crate::core::types::{Offset, Size};
use crate::memory::resource::default_resource;
use crate::memory::traits::{ArenaAllocator, MemoryResource};
use crate::memory::types::{BlockInfo, FitMode, MemoryError, MemoryResult};
use crate::monitoring::{emit, Logger, Severity};
use parking_lot::Mutex;
use std::alloc::Layout;
use std::ptr::NonNull;
use std::sync::Arc;

/// Strategy word: size of the physically preceding block (0 for the first block)
const PREV_SIZE: Offset = STRATEGY_WORD;
/// Tree links, stored in the payload of free blocks
const PARENT: Offset = HEADER_SIZE;
const LEFT: Offset = HEADER_SIZE + WORD_SIZE;
const RIGHT: Offset = HEADER_SIZE + 2 * WORD_SIZE;

/// A valid tree over 64-bit offsets is never deeper than this
const MAX_TREE_DEPTH: usize = 2 * usize::BITS as usize;

/// Arena whose free blocks form a red-black tree keyed by (size, address)
///
/// # Performance
/// - Best/worst fit: O(log n) descent
/// - First fit: O(n) walk over the blocks in address order
/// - Deallocation: O(1) neighbour lookup through boundary tags, O(log n) re-indexing
pub struct RedBlackTreeArena {
    state: Mutex<TreeState>,
    logger: Option<Arc<dyn Logger>>,
    raw: RawArena,
}

struct TreeState {
    cursor: ArenaCursor,
    root: Offset,
    fit_mode: FitMode,
}

impl TreeState {
    fn new(mut cursor: ArenaCursor, fit_mode: FitMode) -> Self {
        let capacity = cursor.capacity();
        cursor.write_header(0, capacity, false);
        cursor.set_word(PREV_SIZE, 0);
        let mut state = Self {
            cursor,
            root: NIL,
            fit_mode,
        };
        state.insert(0);
        state
    }

    // -------------------------------------------------------------------------
    // Link accessors
    // -------------------------------------------------------------------------

    #[inline]
    fn parent(&self, node: Offset) -> Offset {
        self.cursor.word(node + PARENT)
    }

    #[inline]
    fn left(&self, node: Offset) -> Offset {
        self.cursor.word(node + LEFT)
    }

    #[inline]
    fn right(&self, node: Offset) -> Offset {
        self.cursor.word(node + RIGHT)
    }

    #[inline]
    fn set_parent(&mut self, node: Offset, parent: Offset) {
        if node != NIL {
            self.cursor.set_word(node + PARENT, parent);
        }
    }

    #[inline]
    fn set_left(&mut self, node: Offset, left: Offset) {
        self.cursor.set_word(node + LEFT, left);
    }

    #[inline]
    fn set_right(&mut self, node: Offset, right: Offset) {
        self.cursor.set_word(node + RIGHT, right);
    }

    /// NIL leaves count as black
    #[inline]
    fn is_red(&self, node: Offset) -> bool {
        node != NIL && self.cursor.is_red(node)
    }

    #[inline]
    fn paint(&mut self, node: Offset, red: bool) {
        if node != NIL {
            self.cursor.set_red(node, red);
        }
    }

    #[inline]
    fn key(&self, node: Offset) -> (Size, Offset) {
        (self.cursor.block_size(node), node)
    }

    #[inline]
    fn prev_size(&self, block: Offset) -> Size {
        self.cursor.word(block + PREV_SIZE)
    }

    #[inline]
    fn set_prev_size(&mut self, block: Offset, size: Size) {
        self.cursor.set_word(block + PREV_SIZE, size);
    }

    /// Keep the boundary tag of the block after `block` in sync with its size
    fn update_follower(&mut self, block: Offset, size: Size) {
        let follower = block + size;
        if follower < self.cursor.capacity() {
            self.set_prev_size(follower, size);
        }
    }

    // -------------------------------------------------------------------------
    // Tree shape
    // -------------------------------------------------------------------------

    fn rotate_left(&mut self, x: Offset) {
        let y = self.right(x);
        let y_left = self.left(y);
        self.set_right(x, y_left);
        self.set_parent(y_left, x);

        let x_parent = self.parent(x);
        self.set_parent(y, x_parent);
        if x_parent == NIL {
            self.root = y;
        } else if x == self.left(x_parent) {
            self.set_left(x_parent, y);
        } else {
            self.set_right(x_parent, y);
        }

        self.set_left(y, x);
        self.set_parent(x, y);
    }

    fn rotate_right(&mut self, x: Offset) {
        let y = self.left(x);
        let y_right = self.right(y);
        self.set_left(x, y_right);
        self.set_parent(y_right, x);

        let x_parent = self.parent(x);
        self.set_parent(y, x_parent);
        if x_parent == NIL {
            self.root = y;
        } else if x == self.right(x_parent) {
            self.set_right(x_parent, y);
        } else {
            self.set_left(x_parent, y);
        }

        self.set_right(y, x);
        self.set_parent(x, y);
    }

    /// Put subtree `v` where `u` hangs
    fn transplant(&mut self, u: Offset, v: Offset) {
        let u_parent = self.parent(u);
        if u_parent == NIL {
            self.root = v;
        } else if u == self.left(u_parent) {
            self.set_left(u_parent, v);
        } else {
            self.set_right(u_parent, v);
        }
        self.set_parent(v, u_parent);
    }

    fn minimum(&self, mut node: Offset) -> Offset {
        while self.left(node) != NIL {
            node = self.left(node);
        }
        node
    }

    fn insert(&mut self, node: Offset) {
        let key = self.key(node);
        let mut parent = NIL;
        let mut current = self.root;
        while current != NIL {
            parent = current;
            current = if key < self.key(current) {
                self.left(current)
            } else {
                self.right(current)
            };
        }

        self.set_parent(node, parent);
        self.set_left(node, NIL);
        self.set_right(node, NIL);
        self.paint(node, true);

        if parent == NIL {
            self.root = node;
        } else if key < self.key(parent) {
            self.set_left(parent, node);
        } else {
            self.set_right(parent, node);
        }

        self.insert_fixup(node);
    }

    fn insert_fixup(&mut self, mut node: Offset) {
        while self.is_red(self.parent(node)) {
            // A red parent is never the root, so the grandparent exists
            let parent = self.parent(node);
            let grandparent = self.parent(parent);

            if parent == self.left(grandparent) {
                let uncle = self.right(grandparent);
                if self.is_red(uncle) {
                    self.paint(parent, false);
                    self.paint(uncle, false);
                    self.paint(grandparent, true);
                    node = grandparent;
                } else {
                    if node == self.right(parent) {
                        node = parent;
                        self.rotate_left(node);
                    }
                    let parent = self.parent(node);
                    let grandparent = self.parent(parent);
                    self.paint(parent, false);
                    self.paint(grandparent, true);
                    self.rotate_right(grandparent);
                }
            } else {
                let uncle = self.left(grandparent);
                if self.is_red(uncle) {
                    self.paint(parent, false);
                    self.paint(uncle, false);
                    self.paint(grandparent, true);
                    node = grandparent;
                } else {
                    if node == self.left(parent) {
                        node = parent;
                        self.rotate_right(node);
                    }
                    let parent = self.parent(node);
                    let grandparent = self.parent(parent);
                    self.paint(parent, false);
                    self.paint(grandparent, true);
                    self.rotate_left(grandparent);
                }
            }
        }
        let root = self.root;
        self.paint(root, false);
    }

    fn remove(&mut self, node: Offset) {
        let mut removed_red = self.is_red(node);
        let child;
        let child_parent;

        if self.left(node) == NIL {
            child = self.right(node);
            child_parent = self.parent(node);
            self.transplant(node, child);
        } else if self.right(node) == NIL {
            child = self.left(node);
            child_parent = self.parent(node);
            self.transplant(node, child);
        } else {
            let successor = self.minimum(self.right(node));
            removed_red = self.is_red(successor);
            child = self.right(successor);

            if self.parent(successor) == node {
                child_parent = successor;
            } else {
                child_parent = self.parent(successor);
                self.transplant(successor, child);
                let right = self.right(node);
                self.set_right(successor, right);
                self.set_parent(right, successor);
            }

            self.transplant(node, successor);
            let left = self.left(node);
            self.set_left(successor, left);
            self.set_parent(left, successor);
            let red = self.is_red(node);
            self.paint(successor, red);
        }

        if !removed_red {
            self.remove_fixup(child, child_parent);
        }
    }

    /// `node` carries an extra black; `parent` is tracked separately since `node` may be NIL
    fn remove_fixup(&mut self, mut node: Offset, mut parent: Offset) {
        while node != self.root && !self.is_red(node) {
            if node == self.left(parent) {
                let mut sibling = self.right(parent);
                if self.is_red(sibling) {
                    self.paint(sibling, false);
                    self.paint(parent, true);
                    self.rotate_left(parent);
                    sibling = self.right(parent);
                }
                if !self.is_red(self.left(sibling)) && !self.is_red(self.right(sibling)) {
                    self.paint(sibling, true);
                    node = parent;
                    parent = self.parent(node);
                } else {
                    if !self.is_red(self.right(sibling)) {
                        let nephew = self.left(sibling);
                        self.paint(nephew, false);
                        self.paint(sibling, true);
                        self.rotate_right(sibling);
                        sibling = self.right(parent);
                    }
                    let red = self.is_red(parent);
                    self.paint(sibling, red);
                    self.paint(parent, false);
                    let nephew = self.right(sibling);
                    self.paint(nephew, false);
                    self.rotate_left(parent);
                    node = self.root;
                    parent = NIL;
                }
            } else {
                let mut sibling = self.left(parent);
                if self.is_red(sibling) {
                    self.paint(sibling, false);
                    self.paint(parent, true);
                    self.rotate_right(parent);
                    sibling = self.left(parent);
                }
                if !self.is_red(self.left(sibling)) && !self.is_red(self.right(sibling)) {
                    self.paint(sibling, true);
                    node = parent;
                    parent = self.parent(node);
                } else {
                    if !self.is_red(self.left(sibling)) {
                        let nephew = self.right(sibling);
                        self.paint(nephew, false);
                        self.paint(sibling, true);
                        self.rotate_left(sibling);
                        sibling = self.left(parent);
                    }
                    let red = self.is_red(parent);
                    self.paint(sibling, red);
                    self.paint(parent, false);
                    let nephew = self.left(sibling);
                    self.paint(nephew, false);
                    self.rotate_right(parent);
                    node = self.root;
                    parent = NIL;
                }
            }
        }
        self.paint(node, false);
    }

    // -------------------------------------------------------------------------
    // Fit queries
    // -------------------------------------------------------------------------

    /// Smallest key whose size is at least `needed`
    fn lower_bound(&self, needed: Size) -> Offset {
        let mut candidate = NIL;
        let mut current = self.root;
        while current != NIL {
            if self.cursor.block_size(current) >= needed {
                candidate = current;
                current = self.left(current);
            } else {
                current = self.right(current);
            }
        }
        candidate
    }

    fn largest_free(&self) -> Size {
        if self.root == NIL {
            return 0;
        }
        let mut current = self.root;
        while self.right(current) != NIL {
            current = self.right(current);
        }
        self.cursor.block_size(current)
    }

    fn select(&self, needed: Size) -> Option<Offset> {
        let found = match self.fit_mode {
            FitMode::FirstFit => self
                .cursor
                .iter_blocks()
                .find(|block| !block.occupied && block.size >= needed)
                .map_or(NIL, |block| block.offset),
            FitMode::BestFit => self.lower_bound(needed),
            FitMode::WorstFit => {
                // Lowest address among the largest blocks
                let largest = self.largest_free();
                if largest < needed {
                    NIL
                } else {
                    self.lower_bound(largest)
                }
            }
        };
        (found != NIL).then_some(found)
    }

    // -------------------------------------------------------------------------
    // Block transitions
    // -------------------------------------------------------------------------

    fn take(&mut self, block: Offset, needed: Size) {
        self.remove(block);
        let size = self.cursor.block_size(block);

        if size - needed >= TREE_MIN_BLOCK {
            let rest = block + needed;
            let rest_size = size - needed;
            self.cursor.write_header(rest, rest_size, false);
            self.set_prev_size(rest, needed);
            self.update_follower(rest, rest_size);
            self.insert(rest);
            self.cursor.write_header(block, needed, true);
        } else {
            self.cursor.write_header(block, size, true);
        }
    }

    fn release(&mut self, block: Offset) -> (Offset, Size) {
        let mut start = block;
        let mut size = self.cursor.block_size(block);

        let right = block + size;
        if right < self.cursor.capacity() && !self.cursor.is_occupied(right) {
            self.remove(right);
            size += self.cursor.block_size(right);
        }

        if block != 0 {
            let left = block - self.prev_size(block);
            if !self.cursor.is_occupied(left) {
                self.remove(left);
                size += self.cursor.block_size(left);
                start = left;
            }
        }

        self.cursor.write_header(start, size, false);
        self.update_follower(start, size);
        self.insert(start);
        (start, size)
    }

    /// Occupied block for `ptr` whose boundary tags agree with its neighbours
    fn validated_block(&self, ptr: NonNull<u8>, size: Size) -> Option<Offset> {
        let block = self.cursor.occupied_block_of(ptr, size)?;
        let block_size = self.cursor.block_size(block);

        if block != 0 {
            let prev = self.prev_size(block);
            if prev < TREE_MIN_BLOCK
                || prev > block
                || prev % BLOCK_ALIGN != 0
                || self.cursor.block_size(block - prev) != prev
            {
                return None;
            }
        }
        let follower = block + block_size;
        if follower < self.cursor.capacity() && self.prev_size(follower) != block_size {
            return None;
        }
        Some(block)
    }

    // -------------------------------------------------------------------------
    // Verification
    // -------------------------------------------------------------------------

    fn verify(&self) -> MemoryResult<()> {
        let mut free = self.cursor.verify_blocks(TREE_MIN_BLOCK)?;

        let mut expected_prev = 0;
        for block in self.cursor.iter_blocks() {
            if self.prev_size(block.offset) != expected_prev {
                return Err(MemoryError::corruption(
                    block.offset,
                    "boundary tag disagrees with the preceding block",
                ));
            }
            expected_prev = block.size;
        }

        if self.root != NIL {
            if self.is_red(self.root) {
                return Err(MemoryError::corruption(self.root, "root is red"));
            }
            if self.parent(self.root) != NIL {
                return Err(MemoryError::corruption(self.root, "root has a parent"));
            }
        }

        let mut nodes = Vec::with_capacity(free.len());
        self.verify_subtree(self.root, 0, free.len(), &mut nodes)?;

        if let Some(pair) = nodes.windows(2).find(|pair| self.key(pair[0]) >= self.key(pair[1])) {
            return Err(MemoryError::corruption(pair[1], "tree keys out of order"));
        }

        nodes.sort_unstable();
        free.sort_unstable();
        if nodes != free {
            let offset = nodes
                .iter()
                .zip(&free)
                .find(|(a, b)| a != b)
                .map(|(a, _)| *a)
                .or_else(|| nodes.get(free.len()).or_else(|| free.get(nodes.len())).copied())
                .unwrap_or(0);
            return Err(MemoryError::corruption(offset, "tree does not index exactly the free blocks"));
        }
        Ok(())
    }

    /// Checks links and colors below `node`, returning its black height
    fn verify_subtree(
        &self,
        node: Offset,
        depth: usize,
        limit: usize,
        nodes: &mut Vec<Offset>,
    ) -> MemoryResult<usize> {
        if node == NIL {
            return Ok(1);
        }
        if depth > MAX_TREE_DEPTH || nodes.len() > limit {
            return Err(MemoryError::corruption(node, "tree contains a cycle"));
        }
        if node % BLOCK_ALIGN != 0 || node > self.cursor.capacity() - TREE_MIN_BLOCK {
            return Err(MemoryError::corruption(node, "tree link points outside the arena"));
        }
        if self.cursor.is_occupied(node) {
            return Err(MemoryError::corruption(node, "occupied block linked into the free tree"));
        }

        let left = self.left(node);
        let right = self.right(node);
        for child in [left, right] {
            if child == NIL {
                continue;
            }
            if child % BLOCK_ALIGN != 0 || child > self.cursor.capacity() - TREE_MIN_BLOCK {
                return Err(MemoryError::corruption(child, "tree link points outside the arena"));
            }
            if self.parent(child) != node {
                return Err(MemoryError::corruption(child, "parent link does not match"));
            }
        }
        if self.is_red(node) && (self.is_red(left) || self.is_red(right)) {
            return Err(MemoryError::corruption(node, "red node with a red child"));
        }

        let left_height = self.verify_subtree(left, depth + 1, limit, nodes)?;
        nodes.push(node);
        let right_height = self.verify_subtree(right, depth + 1, limit, nodes)?;

        if left_height != right_height {
            return Err(MemoryError::corruption(node, "black heights differ"));
        }
        Ok(left_height + usize::from(!self.is_red(node)))
    }
}

impl RedBlackTreeArena {
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
        let (raw, cursor) = RawArena::acquire(parent, config.space_size, TREE_MIN_BLOCK)?;
        let arena = Self {
            state: Mutex::new(TreeState::new(cursor, config.fit_mode)),
            logger,
            raw,
        };
        arena.log(Severity::Info, || {
            format!(
                "Red-black tree arena initialized with {} bytes ({})",
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
            RawArena::acquire(Arc::clone(self.raw.parent()), self.raw.capacity(), TREE_MIN_BLOCK)?;
        cursor.copy_from(&state.cursor);
        Ok(Self {
            state: Mutex::new(TreeState {
                cursor,
                root: state.root,
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

impl MemoryResource for RedBlackTreeArena {
    fn allocate(&self, layout: Layout) -> MemoryResult<NonNull<u8>> {
        check_alignment(&layout)?;
        let request = layout.size();
        let mut state = self.state.lock();
        let fit_mode = state.fit_mode;
        self.log(Severity::Debug, || format!("Allocating {} bytes ({})", request, fit_mode));

        let selected = required_block_size(request, TREE_MIN_BLOCK)
            .and_then(|needed| state.select(needed).map(|block| (block, needed)));

        let Some((block, needed)) = selected else {
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

        state.take(block, needed);
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

impl ArenaAllocator for RedBlackTreeArena {
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

impl std::fmt::Debug for RedBlackTreeArena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("RedBlackTreeArena")
            .field("capacity", &self.raw.capacity())
            .field("fit_mode", &state.fit_mode)
            .field("root", &state.root)
            .finish()
    }
}
