/*!
 * Red-Black Tree Arena Tests
 * Tree-indexed free space: selection, boundary tags and verification
 */

use fit_arena::core::limits::{HEADER_SIZE, TREE_MIN_BLOCK};
use fit_arena::memory::{
    ArenaAllocator, ArenaBuilder, BlockInfo, FitMode, GlobalResource, MemoryError, MemoryResource,
    RedBlackTreeArena, TrackingResource,
};
use pretty_assertions::assert_eq;
use std::alloc::Layout;
use std::sync::Arc;

fn layout(size: usize) -> Layout {
    Layout::from_size_align(size, 16).unwrap()
}

#[test]
fn test_blocks_tile_the_arena() {
    let arena = RedBlackTreeArena::new(8192).unwrap();
    let sizes = [1, 17, 100, 255, 1024, 33, 0];
    let ptrs: Vec<_> = sizes.iter().map(|&s| arena.allocate(layout(s)).unwrap()).collect();

    let blocks = arena.blocks();
    assert_eq!(blocks.iter().map(|b| b.size).sum::<usize>(), 8192);
    assert!(blocks.windows(2).all(|w| w[0].end() == w[1].offset));
    assert!(blocks.iter().all(|b| b.size >= TREE_MIN_BLOCK));
    arena.verify().unwrap();

    for (ptr, &size) in ptrs.iter().zip(&sizes) {
        unsafe { arena.deallocate(*ptr, layout(size)).unwrap() };
        arena.verify().unwrap();
    }
    assert_eq!(arena.blocks(), vec![BlockInfo { offset: 0, size: 8192, occupied: false }]);
}

#[test]
fn test_small_requests_use_tree_minimum() {
    let arena = RedBlackTreeArena::new(1024).unwrap();
    let ptr = arena.allocate(layout(1)).unwrap();
    assert_eq!(arena.blocks()[0].size, TREE_MIN_BLOCK);
    unsafe { arena.deallocate(ptr, layout(1)).unwrap() };
}

#[test]
fn test_unsplittable_remainder_stays_with_block() {
    // A remainder smaller than the tree minimum cannot hold its links
    let arena = RedBlackTreeArena::new(TREE_MIN_BLOCK + 64).unwrap();
    let ptr = arena.allocate(layout(64)).unwrap();

    let blocks = arena.blocks();
    assert_eq!(blocks.len(), 1);
    assert_eq!(blocks[0].size, TREE_MIN_BLOCK + 64);
    assert!(blocks[0].occupied);
    unsafe { arena.deallocate(ptr, layout(64)).unwrap() };
    arena.verify().unwrap();
}

#[test]
fn test_best_fit_picks_tightest_block() {
    let arena = ArenaBuilder::new(4096)
        .with_fit_mode(FitMode::BestFit)
        .build_red_black_tree()
        .unwrap();

    // Holes of 256, 96 and 160 bytes, each fenced by an occupied block
    let holes = [240, 80, 144];
    let mut fences = Vec::new();
    let mut hole_ptrs = Vec::new();
    for &payload in &holes {
        hole_ptrs.push(arena.allocate(layout(payload)).unwrap());
        fences.push(arena.allocate(layout(16)).unwrap());
    }
    for (ptr, &payload) in hole_ptrs.iter().zip(&holes) {
        unsafe { arena.deallocate(*ptr, layout(payload)).unwrap() };
    }

    let chosen = arena.allocate(layout(120)).unwrap();
    assert_eq!(chosen, hole_ptrs[2], "160-byte hole is the tightest fit for a 144-byte block");

    let exact = arena.allocate(layout(80)).unwrap();
    assert_eq!(exact, hole_ptrs[1]);
    arena.verify().unwrap();
}

#[test]
fn test_exhaustion_leaves_tree_intact() {
    let arena = RedBlackTreeArena::new(64).unwrap();
    assert_eq!(
        arena.allocate(layout(1000)).unwrap_err(),
        MemoryError::OutOfMemory {
            requested: 1000,
            largest_free: 64 - HEADER_SIZE,
            capacity: 64,
        }
    );
    arena.verify().unwrap();

    for mode in FitMode::ALL {
        arena.set_fit_mode(mode);
        let ptr = arena.allocate(layout(48)).unwrap();
        unsafe { arena.deallocate(ptr, layout(48)).unwrap() };
    }
    arena.verify().unwrap();
}

#[test]
fn test_over_aligned_request_is_rejected() {
    let arena = RedBlackTreeArena::new(1024).unwrap();
    assert_eq!(
        arena.allocate(Layout::from_size_align(64, 64).unwrap()).unwrap_err(),
        MemoryError::AlignmentError {
            alignment: 64,
            supported: 16,
        }
    );
}

#[test]
fn test_double_free_is_rejected() {
    let arena = RedBlackTreeArena::new(1024).unwrap();
    let a = arena.allocate(layout(64)).unwrap();
    let _b = arena.allocate(layout(64)).unwrap();

    unsafe { arena.deallocate(a, layout(64)).unwrap() };
    assert!(matches!(
        unsafe { arena.deallocate(a, layout(64)) },
        Err(MemoryError::InvalidAddress(_))
    ));
    arena.verify().unwrap();
}

#[test]
fn test_foreign_pointer_is_rejected() {
    let arena = RedBlackTreeArena::new(1024).unwrap();
    let other = RedBlackTreeArena::new(1024).unwrap();
    let ptr = other.allocate(layout(64)).unwrap();

    assert!(!arena.owns(ptr));
    assert!(matches!(
        unsafe { arena.deallocate(ptr, layout(64)) },
        Err(MemoryError::InvalidAddress(_))
    ));
    unsafe { other.deallocate(ptr, layout(64)).unwrap() };
}

#[test]
fn test_deep_copy_shares_parent_not_buffer() {
    let tracker = Arc::new(TrackingResource::new(Arc::new(GlobalResource)));
    let arena = RedBlackTreeArena::builder(2048)
        .with_parent(tracker.clone())
        .with_fit_mode(FitMode::WorstFit)
        .build_red_black_tree()
        .unwrap();
    let ptrs: Vec<_> = (0..5).map(|_| arena.allocate(layout(100)).unwrap()).collect();
    unsafe {
        arena.deallocate(ptrs[1], layout(100)).unwrap();
        arena.deallocate(ptrs[3], layout(100)).unwrap();
    }

    let copy = arena.try_clone().unwrap();
    assert_eq!(tracker.live_allocations(), 2);
    assert_eq!(copy.blocks(), arena.blocks());
    assert_eq!(copy.fit_mode(), FitMode::WorstFit);
    copy.verify().unwrap();

    // The copy's free tree is its own: fill it completely
    while copy.allocate(layout(16)).is_ok() {}
    copy.verify().unwrap();
    assert_eq!(copy.stats().free_blocks, 0);
    assert_eq!(arena.stats().free_blocks, 3);

    drop(copy);
    drop(arena);
    assert_eq!(tracker.live_allocations(), 0);
}

#[test]
fn test_with_blocks_iterates_under_lock() {
    let arena = RedBlackTreeArena::new(1024).unwrap();
    let _a = arena.allocate(layout(100)).unwrap();

    let (count, first_free) = arena.with_blocks(|blocks| {
        let blocks: Vec<_> = blocks.collect();
        (blocks.len(), blocks.iter().find(|b| b.is_free()).map(|b| b.offset))
    });
    assert_eq!(count, 2);
    assert_eq!(first_free, Some(HEADER_SIZE + 112));

    let iter = arena.with_blocks(|mut blocks| {
        let start = blocks.clone();
        blocks.next();
        (start.position(), blocks.position())
    });
    assert_eq!(iter, (0, HEADER_SIZE + 112));
}
