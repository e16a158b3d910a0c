/*!
 * Coalescing Tests
 * Neighbouring free blocks always merge, whatever order they are released in
 */

use fit_arena::memory::{ArenaAllocator, ArenaBuilder, BlockInfo, MemoryResource};
use pretty_assertions::assert_eq;
use std::alloc::Layout;
use std::sync::Arc;

fn layout(size: usize) -> Layout {
    Layout::from_size_align(size, 16).unwrap()
}

fn arenas(space_size: usize) -> Vec<(&'static str, Arc<dyn ArenaAllocator>)> {
    vec![
        ("sorted_list", Arc::new(ArenaBuilder::new(space_size).build_sorted_list().unwrap())),
        ("red_black_tree", Arc::new(ArenaBuilder::new(space_size).build_red_black_tree().unwrap())),
    ]
}

fn free_layout(arena: &dyn ArenaAllocator) -> Vec<(usize, usize)> {
    arena
        .blocks()
        .iter()
        .filter(|b| b.is_free())
        .map(|b| (b.offset, b.size))
        .collect()
}

#[test]
fn test_middle_release_joins_both_sides() {
    for (name, arena) in arenas(192) {
        let a = arena.allocate(layout(48)).unwrap();
        let b = arena.allocate(layout(48)).unwrap();
        let c = arena.allocate(layout(48)).unwrap();
        assert!(free_layout(arena.as_ref()).is_empty(), "{}", name);

        unsafe {
            arena.deallocate(a, layout(48)).unwrap();
            arena.deallocate(c, layout(48)).unwrap();
        }
        assert_eq!(free_layout(arena.as_ref()), vec![(0, 64), (128, 64)], "{}", name);
        arena.verify().unwrap();

        unsafe { arena.deallocate(b, layout(48)).unwrap() };
        assert_eq!(
            arena.blocks(),
            vec![BlockInfo { offset: 0, size: 192, occupied: false }],
            "{}",
            name
        );
        arena.verify().unwrap();
    }
}

#[test]
fn test_every_release_order_restores_one_block() {
    let orders = [
        [0, 1, 2, 3],
        [3, 2, 1, 0],
        [1, 3, 0, 2],
        [2, 0, 3, 1],
        [0, 2, 1, 3],
    ];

    for order in orders {
        for (name, arena) in arenas(1024) {
            let sizes = [100, 36, 200, 64];
            let ptrs: Vec<_> = sizes.iter().map(|&s| arena.allocate(layout(s)).unwrap()).collect();

            for &i in &order {
                unsafe { arena.deallocate(ptrs[i], layout(sizes[i])).unwrap() };
                arena.verify().unwrap();
                let blocks = arena.blocks();
                assert!(
                    blocks.windows(2).all(|w| w[0].occupied || w[1].occupied),
                    "{}: adjacent free blocks after releasing {} in {:?}",
                    name,
                    i,
                    order
                );
            }
            assert_eq!(free_layout(arena.as_ref()), vec![(0, 1024)], "{} {:?}", name, order);
        }
    }
}

#[test]
fn test_release_merges_into_trailing_space() {
    for (name, arena) in arenas(1024) {
        let a = arena.allocate(layout(100)).unwrap();
        let b = arena.allocate(layout(100)).unwrap();

        unsafe { arena.deallocate(b, layout(100)).unwrap() };
        assert_eq!(free_layout(arena.as_ref()), vec![(128, 896)], "{}", name);

        unsafe { arena.deallocate(a, layout(100)).unwrap() };
        assert_eq!(free_layout(arena.as_ref()), vec![(0, 1024)], "{}", name);
    }
}
