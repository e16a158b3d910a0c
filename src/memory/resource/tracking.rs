/*!
 * Tracking Resource
 * Byte resource that records every live allocation it forwards
 */

use crate::core::types::{Address, Size};
use crate::memory::traits::MemoryResource;
use crate::memory::types::{MemoryError, MemoryResult};
use ahash::RandomState;
use dashmap::DashMap;
use log::warn;
use std::alloc::Layout;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Wraps a parent resource and keeps a table of outstanding allocations
///
/// Used to prove that arenas and facades release exactly what they take.
/// Deallocations that don't match a recorded allocation are rejected
/// without reaching the parent.
pub struct TrackingResource {
    parent: Arc<dyn MemoryResource>,
    live: DashMap<Address, Layout, RandomState>,
    live_bytes: AtomicUsize,
    total_allocations: AtomicUsize,
    total_deallocations: AtomicUsize,
}

impl TrackingResource {
    pub fn new(parent: Arc<dyn MemoryResource>) -> Self {
        Self {
            parent,
            live: DashMap::with_hasher(RandomState::new()),
            live_bytes: AtomicUsize::new(0),
            total_allocations: AtomicUsize::new(0),
            total_deallocations: AtomicUsize::new(0),
        }
    }

    /// Track allocations served by the process-wide default resource
    pub fn with_default() -> Self {
        Self::new(super::default_resource())
    }

    pub fn live_allocations(&self) -> usize {
        self.live.len()
    }

    pub fn live_bytes(&self) -> Size {
        self.live_bytes.load(Ordering::SeqCst)
    }

    pub fn total_allocations(&self) -> usize {
        self.total_allocations.load(Ordering::SeqCst)
    }

    pub fn total_deallocations(&self) -> usize {
        self.total_deallocations.load(Ordering::SeqCst)
    }

    /// Whether `ptr` is an outstanding allocation of this resource
    pub fn is_live(&self, ptr: NonNull<u8>) -> bool {
        self.live.contains_key(&(ptr.as_ptr() as Address))
    }
}

impl MemoryResource for TrackingResource {
    fn allocate(&self, layout: Layout) -> MemoryResult<NonNull<u8>> {
        let ptr = self.parent.allocate(layout)?;
        self.live.insert(ptr.as_ptr() as Address, layout);
        self.live_bytes.fetch_add(layout.size(), Ordering::SeqCst);
        self.total_allocations.fetch_add(1, Ordering::SeqCst);
        Ok(ptr)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) -> MemoryResult<()> {
        let address = ptr.as_ptr() as Address;
        // The entry only leaves the table when its layout matches
        if self.live.remove_if(&address, |_, recorded| *recorded == layout).is_none() {
            match self.live.get(&address).map(|entry| *entry.value()) {
                Some(recorded) => warn!(
                    "Rejected deallocation of 0x{:x}: layout {:?} does not match recorded {:?}",
                    address, layout, recorded
                ),
                None => warn!("Rejected deallocation of untracked address 0x{:x}", address),
            }
            return Err(MemoryError::InvalidAddress(address));
        }

        self.live_bytes.fetch_sub(layout.size(), Ordering::SeqCst);
        self.total_deallocations.fetch_add(1, Ordering::SeqCst);
        self.parent.deallocate(ptr, layout)
    }
}

impl std::fmt::Debug for TrackingResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackingResource")
            .field("live_allocations", &self.live_allocations())
            .field("live_bytes", &self.live_bytes())
            .field("total_allocations", &self.total_allocations())
            .finish()
    }
}
