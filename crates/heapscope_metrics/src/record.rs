//! Live allocation records keyed by address.

use crate::collections::{map_in, BookkeepingMap};
use crate::tags::{AllocatorKind, MemoryRegion};
use allocator_api2::alloc::Allocator;
use heapscope_core::memory::UntrackedAlloc;
use serde::{Deserialize, Serialize};

/// Everything the tracker knows about one live allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocationRecord {
    pub address: usize,
    pub size: usize,
    pub region: MemoryRegion,
    pub kind: AllocatorKind,
    /// [`current_thread_hash`](crate::thread::current_thread_hash) of the allocating thread.
    pub thread: u64,
}

/// Fixed-width form of a record as stored in scene files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationEvent {
    pub address: u64,
    pub region: MemoryRegion,
    pub size: u64,
    pub kind: AllocatorKind,
    pub thread_hash: u64,
}

impl From<&AllocationRecord> for AllocationEvent {
    fn from(record: &AllocationRecord) -> Self {
        Self {
            address: record.address as u64,
            region: record.region,
            size: record.size as u64,
            kind: record.kind,
            thread_hash: record.thread,
        }
    }
}

/// Map from address to [`AllocationRecord`].
///
/// Not synchronized; the tracker guards it with its own lock. The table is
/// allocated from `A`, which defaults to [`UntrackedAlloc`] so growing it
/// never re-enters a tracking global allocator.
pub struct AllocationStore<A: Allocator + Clone = UntrackedAlloc> {
    records: BookkeepingMap<usize, AllocationRecord, A>,
}

impl AllocationStore {
    pub fn new() -> Self {
        Self::new_in(UntrackedAlloc)
    }
}

impl Default for AllocationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: Allocator + Clone> AllocationStore<A> {
    pub fn new_in(alloc: A) -> Self {
        Self { records: map_in(alloc) }
    }

    /// Stores a record. Returns `false` (and stores nothing) for a null
    /// address or one that is already live.
    pub fn insert(&mut self, record: AllocationRecord) -> bool {
        if record.address == 0 {
            return false;
        }
        match self.records.entry(record.address) {
            hashbrown::hash_map::Entry::Occupied(_) => false,
            hashbrown::hash_map::Entry::Vacant(slot) => {
                slot.insert(record);
                true
            }
        }
    }

    pub fn remove(&mut self, address: usize) -> Option<AllocationRecord> {
        self.records.remove(&address)
    }

    pub fn get(&self, address: usize) -> Option<&AllocationRecord> {
        self.records.get(&address)
    }

    pub fn contains(&self, address: usize) -> bool {
        self.records.contains_key(&address)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AllocationRecord> + '_ {
        self.records.values()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}
