/*!
 * Structural Invariant Tests
 * Random allocate/deallocate sequences must keep every arena invariant
 */

use fit_arena::core::limits::{HEADER_SIZE, TREE_MIN_BLOCK};
use fit_arena::memory::{ArenaAllocator, ArenaBuilder, FitMode, MemoryError, MemoryResource};
use proptest::prelude::*;
use std::alloc::Layout;
use std::ptr::NonNull;

#[derive(Debug, Clone)]
enum Op {
    Allocate(usize),
    Deallocate(usize),
    SwitchMode(usize),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0usize..600).prop_map(Op::Allocate),
        2 => any::<usize>().prop_map(Op::Deallocate),
        1 => (0usize..3).prop_map(Op::SwitchMode),
    ]
}

fn layout(size: usize) -> Layout {
    Layout::from_size_align(size, 16).unwrap()
}

/// Replays `ops`, tagging every payload so overlapping blocks would show up
fn run_sequence(arena: &dyn ArenaAllocator, ops: &[Op]) -> Result<(), TestCaseError> {
    let capacity = arena.capacity();
    let mut live: Vec<(NonNull<u8>, usize, u8)> = Vec::new();
    let mut tag: u8 = 0;

    for op in ops {
        match *op {
            Op::Allocate(size) => match arena.allocate(layout(size)) {
                Ok(ptr) => {
                    tag = tag.wrapping_add(1);
                    unsafe { ptr.as_ptr().write_bytes(tag, size) };
                    live.push((ptr, size, tag));
                }
                Err(MemoryError::OutOfMemory { largest_free, .. }) => {
                    prop_assert!(largest_free < size.max(1) || arena.fit_mode() != FitMode::WorstFit);
                }
                Err(e) => return Err(TestCaseError::fail(format!("unexpected error: {}", e))),
            },
            Op::Deallocate(pick) => {
                if live.is_empty() {
                    continue;
                }
                let (ptr, size, tag) = live.swap_remove(pick % live.len());
                let payload = unsafe { std::slice::from_raw_parts(ptr.as_ptr(), size) };
                prop_assert!(payload.iter().all(|&b| b == tag), "payload overwritten");
                unsafe { arena.deallocate(ptr, layout(size)) }
                    .map_err(|e| TestCaseError::fail(e.to_string()))?;
            }
            Op::SwitchMode(mode) => arena.set_fit_mode(FitMode::ALL[mode]),
        }

        arena
            .verify()
            .map_err(|e| TestCaseError::fail(format!("{:?}", e)))?;
        let blocks = arena.blocks();
        prop_assert_eq!(blocks.iter().map(|b| b.size).sum::<usize>(), capacity);
        prop_assert_eq!(
            blocks.iter().filter(|b| b.occupied).count(),
            live.len()
        );
    }

    for (ptr, size, _) in live.drain(..) {
        unsafe { arena.deallocate(ptr, layout(size)) }.map_err(|e| TestCaseError::fail(e.to_string()))?;
    }
    prop_assert_eq!(arena.blocks().len(), 1);
    prop_assert_eq!(arena.stats().free_bytes, capacity);
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_sorted_list_keeps_invariants(ops in prop::collection::vec(op_strategy(), 1..200)) {
        let arena = ArenaBuilder::new(8192).build_sorted_list().unwrap();
        run_sequence(&arena, &ops)?;
    }

    #[test]
    fn prop_red_black_tree_keeps_invariants(ops in prop::collection::vec(op_strategy(), 1..200)) {
        let arena = ArenaBuilder::new(8192).build_red_black_tree().unwrap();
        run_sequence(&arena, &ops)?;
    }

    #[test]
    fn prop_strategies_agree_on_layout(ops in prop::collection::vec(op_strategy(), 1..120)) {
        // With every block a multiple of the tree minimum, a remainder is either empty
        // or large enough for both strategies to split off, so the two indexes
        // must pick the same blocks and the layouts never diverge.
        let list = ArenaBuilder::new(TREE_MIN_BLOCK * 100).build_sorted_list().unwrap();
        let tree = ArenaBuilder::new(TREE_MIN_BLOCK * 100).build_red_black_tree().unwrap();
        let mut live: Vec<(NonNull<u8>, NonNull<u8>, usize)> = Vec::new();

        for op in &ops {
            match *op {
                Op::Allocate(size) => {
                    let size = TREE_MIN_BLOCK * (size / TREE_MIN_BLOCK + 1) - HEADER_SIZE;
                    match (list.allocate(layout(size)), tree.allocate(layout(size))) {
                        (Ok(a), Ok(b)) => live.push((a, b, size)),
                        (Err(_), Err(_)) => {}
                        (a, b) => prop_assert!(false, "strategies disagree: {:?} vs {:?}", a, b),
                    }
                }
                Op::Deallocate(pick) if !live.is_empty() => {
                    let (a, b, size) = live.swap_remove(pick % live.len());
                    unsafe {
                        list.deallocate(a, layout(size)).unwrap();
                        tree.deallocate(b, layout(size)).unwrap();
                    }
                }
                Op::Deallocate(_) => {}
                Op::SwitchMode(mode) => {
                    list.set_fit_mode(FitMode::ALL[mode]);
                    tree.set_fit_mode(FitMode::ALL[mode]);
                }
            }
            prop_assert_eq!(list.blocks(), tree.blocks());
        }
    }
}
