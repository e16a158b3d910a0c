/*!
 * Default Resource Tests
 * The process-wide resource is fixed once anything has observed it
 */

use fit_arena::memory::{
    default_resource, set_default_resource, GlobalResource, MemoryError, MemoryResource,
    SortedListArena, TypedAllocator,
};
use serial_test::serial;
use std::alloc::Layout;
use std::sync::Arc;

#[test]
#[serial]
fn test_default_resource_is_a_stable_handle() {
    let first = default_resource();
    let second = default_resource();
    assert!(Arc::ptr_eq(&first, &second));
    assert!(first.is_equal(second.as_ref()));

    let layout = Layout::from_size_align(128, 16).unwrap();
    let ptr = first.allocate(layout).unwrap();
    unsafe { second.deallocate(ptr, layout).unwrap() };
}

#[test]
#[serial]
fn test_install_after_first_use_is_rejected() {
    // Arenas built without a parent have already pinned the default
    let _arena = SortedListArena::new(1024).unwrap();
    assert_eq!(
        set_default_resource(Arc::new(GlobalResource)),
        Err(MemoryError::DefaultResourceAlreadySet)
    );
}

#[test]
#[serial]
fn test_default_facades_compare_equal() {
    let a: TypedAllocator<u64> = TypedAllocator::with_default();
    let b: TypedAllocator<String> = TypedAllocator::with_default();
    assert!(a == b);

    let ptr = a.new_object(99u64).unwrap();
    unsafe { b.delete_object(ptr).unwrap() };
}
