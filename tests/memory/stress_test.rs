/*!
 * Concurrency Stress Tests
 * Many threads sharing one arena through its lock
 */

use fit_arena::memory::{ArenaAllocator, ArenaBuilder, FitMode, MemoryResource, TypedAllocator};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::alloc::Layout;
use std::sync::Arc;
use std::thread;

const THREADS: usize = 8;
const ROUNDS: usize = 2_000;

fn hammer(arena: Arc<dyn ArenaAllocator>) {
    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let arena = Arc::clone(&arena);
            thread::spawn(move || {
                let mut rng = StdRng::seed_from_u64(0xA11C + t as u64);
                // Addresses travel as usize so the handle stays Send
                let mut live: Vec<(usize, usize)> = Vec::new();

                for _ in 0..ROUNDS {
                    if live.is_empty() || rng.gen_bool(0.55) {
                        let size = rng.gen_range(1..512);
                        let layout = Layout::from_size_align(size, 8).unwrap();
                        if let Ok(ptr) = arena.allocate(layout) {
                            unsafe { ptr.as_ptr().write_bytes(t as u8, size) };
                            live.push((ptr.as_ptr() as usize, size));
                        }
                    } else {
                        let (address, size) = live.swap_remove(rng.gen_range(0..live.len()));
                        let ptr = std::ptr::NonNull::new(address as *mut u8).unwrap();
                        let payload = unsafe { std::slice::from_raw_parts(ptr.as_ptr(), size) };
                        assert!(payload.iter().all(|&b| b == t as u8), "payload shared between threads");
                        unsafe {
                            arena
                                .deallocate(ptr, Layout::from_size_align(size, 8).unwrap())
                                .unwrap()
                        };
                    }

                    if rng.gen_ratio(1, 200) {
                        arena.set_fit_mode(FitMode::ALL[rng.gen_range(0..3)]);
                    }
                }

                for (address, size) in live {
                    let ptr = std::ptr::NonNull::new(address as *mut u8).unwrap();
                    unsafe {
                        arena
                            .deallocate(ptr, Layout::from_size_align(size, 8).unwrap())
                            .unwrap()
                    };
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("worker thread panicked");
    }

    arena.verify().unwrap();
    let stats = arena.stats();
    assert_eq!(stats.occupied_blocks, 0);
    assert_eq!(stats.free_blocks, 1);
    assert_eq!(stats.free_bytes, arena.capacity());
}

#[test]
fn test_sorted_list_under_contention() {
    let arena = ArenaBuilder::new(256 * 1024).build_sorted_list().unwrap();
    hammer(Arc::new(arena));
}

#[test]
fn test_red_black_tree_under_contention() {
    let arena = ArenaBuilder::new(256 * 1024)
        .with_fit_mode(FitMode::BestFit)
        .build_red_black_tree()
        .unwrap();
    hammer(Arc::new(arena));
}

#[test]
fn test_shared_facade_across_threads() {
    let arena = Arc::new(ArenaBuilder::new(64 * 1024).build_red_black_tree().unwrap());
    let alloc: TypedAllocator<u64> = TypedAllocator::new(arena.clone());

    let handles: Vec<_> = (0..THREADS as u64)
        .map(|t| {
            let alloc = alloc.clone();
            thread::spawn(move || {
                for i in 0..500u64 {
                    let ptr = alloc.new_object(t * 1_000 + i).unwrap();
                    assert_eq!(unsafe { *ptr.as_ptr() }, t * 1_000 + i);
                    unsafe { alloc.delete_object(ptr).unwrap() };
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("worker thread panicked");
    }
    assert_eq!(arena.stats().occupied_blocks, 0);
    arena.verify().unwrap();
}
