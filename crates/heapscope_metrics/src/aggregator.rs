//! Live/peak/lifetime counters, globally and per allocator kind, region and
//! thread.

use crate::collections::{map_in, BookkeepingMap};
use crate::record::AllocationRecord;
use crate::tags::{AllocatorKind, MemoryRegion};
use allocator_api2::alloc::Allocator;
use heapscope_core::memory::UntrackedAlloc;
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use std::hash::Hash;

/// Counters kept for one key of one dimension.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimensionCounters {
    pub current_bytes: u64,
    pub peak_bytes: u64,
    pub active_allocations: u64,
    pub total_allocations: u64,
}

impl DimensionCounters {
    fn add(&mut self, size: u64) {
        self.current_bytes += size;
        self.peak_bytes = self.peak_bytes.max(self.current_bytes);
        self.active_allocations += 1;
        self.total_allocations += 1;
    }

    fn remove(&mut self, size: u64) {
        decrement(&mut self.current_bytes, size, "current bytes");
        decrement(&mut self.active_allocations, 1, "active allocations");
    }
}

/// Allocation activity since the last new-frame notification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameCounters {
    pub allocated_bytes: u64,
    pub allocation_count: u64,
}

fn decrement(counter: &mut u64, by: u64, what: &str) {
    debug_assert!(*counter >= by, "{what} underflow: {} - {by}", *counter);
    *counter = counter.saturating_sub(by);
}

/// Sparse map of [`DimensionCounters`]; keys never seen read as zero.
pub struct DimensionMap<K, A: Allocator + Clone = UntrackedAlloc> {
    entries: BookkeepingMap<K, DimensionCounters, A>,
}

impl<K: Copy + Eq + Hash, A: Allocator + Clone> DimensionMap<K, A> {
    pub fn new_in(alloc: A) -> Self {
        Self { entries: map_in(alloc) }
    }

    pub fn get(&self, key: K) -> DimensionCounters {
        self.entries.get(&key).copied().unwrap_or_default()
    }

    /// Keys seen so far with their counters, in no particular order.
    pub fn iter(&self) -> impl ExactSizeIterator<Item = (K, DimensionCounters)> + '_ {
        self.entries.iter().map(|(key, counters)| (*key, *counters))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn add(&mut self, key: K, size: u64) {
        self.entries.entry(key).or_default().add(size);
    }

    fn remove(&mut self, key: K, size: u64) {
        match self.entries.get_mut(&key) {
            Some(counters) => counters.remove(size),
            None => debug_assert!(false, "deallocation for a key with no recorded allocations"),
        }
    }

    fn clear(&mut self) {
        self.entries.clear();
    }
}

impl<K, A> Serialize for DimensionMap<K, A>
where
    K: Copy + Eq + Hash + Serialize,
    A: Allocator + Clone,
{
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.iter())
    }
}

/// Aggregated allocation metrics.
///
/// Serializes with the same layout as [`MetricsSnapshot`], which is how it is
/// read back.
pub struct MemoryMetrics<A: Allocator + Clone = UntrackedAlloc> {
    current_bytes: u64,
    peak_bytes: u64,
    active_allocations: u64,
    total_allocations: u64,
    frame: FrameCounters,
    by_allocator: DimensionMap<AllocatorKind, A>,
    by_region: DimensionMap<MemoryRegion, A>,
    by_thread: DimensionMap<u64, A>,
}

impl MemoryMetrics {
    pub fn new() -> Self {
        Self::new_in(UntrackedAlloc)
    }
}

impl Default for MemoryMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: Allocator + Clone> MemoryMetrics<A> {
    pub fn new_in(alloc: A) -> Self {
        Self {
            current_bytes: 0,
            peak_bytes: 0,
            active_allocations: 0,
            total_allocations: 0,
            frame: FrameCounters::default(),
            by_allocator: DimensionMap::new_in(alloc.clone()),
            by_region: DimensionMap::new_in(alloc.clone()),
            by_thread: DimensionMap::new_in(alloc),
        }
    }

    pub fn track_allocation(&mut self, record: &AllocationRecord) {
        let size = record.size as u64;

        self.current_bytes += size;
        self.peak_bytes = self.peak_bytes.max(self.current_bytes);
        self.active_allocations += 1;
        self.total_allocations += 1;

        self.frame.allocated_bytes += size;
        self.frame.allocation_count += 1;

        self.by_allocator.add(record.kind, size);
        self.by_region.add(record.region, size);
        self.by_thread.add(record.thread, size);
    }

    /// Undoes the live part of [`track_allocation`](Self::track_allocation)
    /// for a stored record. Peaks, lifetime totals and frame counters stay.
    pub fn track_deallocation(&mut self, record: &AllocationRecord) {
        let size = record.size as u64;

        decrement(&mut self.current_bytes, size, "current bytes");
        decrement(&mut self.active_allocations, 1, "active allocations");

        self.by_allocator.remove(record.kind, size);
        self.by_region.remove(record.region, size);
        self.by_thread.remove(record.thread, size);
    }

    pub fn on_new_frame(&mut self) {
        self.frame = FrameCounters::default();
    }

    pub fn clear(&mut self) {
        self.current_bytes = 0;
        self.peak_bytes = 0;
        self.active_allocations = 0;
        self.total_allocations = 0;
        self.frame = FrameCounters::default();
        self.by_allocator.clear();
        self.by_region.clear();
        self.by_thread.clear();
    }

    pub fn current_bytes(&self) -> u64 {
        self.current_bytes
    }

    pub fn peak_bytes(&self) -> u64 {
        self.peak_bytes
    }

    pub fn active_allocations(&self) -> u64 {
        self.active_allocations
    }

    pub fn total_allocations(&self) -> u64 {
        self.total_allocations
    }

    pub fn frame(&self) -> FrameCounters {
        self.frame
    }

    pub fn by_allocator(&self) -> &DimensionMap<AllocatorKind, A> {
        &self.by_allocator
    }

    pub fn by_region(&self) -> &DimensionMap<MemoryRegion, A> {
        &self.by_region
    }

    pub fn by_thread(&self) -> &DimensionMap<u64, A> {
        &self.by_thread
    }

    // ------------------------------------------------------------------------
    // Per-dimension accessors
    // ------------------------------------------------------------------------

    pub fn allocator_usage(&self, kind: AllocatorKind) -> u64 {
        self.by_allocator.get(kind).current_bytes
    }

    pub fn allocator_peak_usage(&self, kind: AllocatorKind) -> u64 {
        self.by_allocator.get(kind).peak_bytes
    }

    pub fn allocator_active_allocations(&self, kind: AllocatorKind) -> u64 {
        self.by_allocator.get(kind).active_allocations
    }

    pub fn allocator_total_allocations(&self, kind: AllocatorKind) -> u64 {
        self.by_allocator.get(kind).total_allocations
    }

    pub fn region_usage(&self, region: MemoryRegion) -> u64 {
        self.by_region.get(region).current_bytes
    }

    pub fn region_peak_usage(&self, region: MemoryRegion) -> u64 {
        self.by_region.get(region).peak_bytes
    }

    pub fn region_active_allocations(&self, region: MemoryRegion) -> u64 {
        self.by_region.get(region).active_allocations
    }

    pub fn region_total_allocations(&self, region: MemoryRegion) -> u64 {
        self.by_region.get(region).total_allocations
    }

    pub fn thread_usage(&self, thread: u64) -> u64 {
        self.by_thread.get(thread).current_bytes
    }

    pub fn thread_peak_usage(&self, thread: u64) -> u64 {
        self.by_thread.get(thread).peak_bytes
    }

    pub fn thread_active_allocations(&self, thread: u64) -> u64 {
        self.by_thread.get(thread).active_allocations
    }

    pub fn thread_total_allocations(&self, thread: u64) -> u64 {
        self.by_thread.get(thread).total_allocations
    }

    /// Owned copy, e.g. for handing to a UI thread.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            current_bytes: self.current_bytes,
            peak_bytes: self.peak_bytes,
            active_allocations: self.active_allocations,
            total_allocations: self.total_allocations,
            frame: self.frame,
            by_allocator: self.by_allocator.iter().collect(),
            by_region: self.by_region.iter().collect(),
            by_thread: self.by_thread.iter().collect(),
        }
    }
}

impl<A: Allocator + Clone> Serialize for MemoryMetrics<A> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("MetricsSnapshot", 8)?;
        state.serialize_field("current_bytes", &self.current_bytes)?;
        state.serialize_field("peak_bytes", &self.peak_bytes)?;
        state.serialize_field("active_allocations", &self.active_allocations)?;
        state.serialize_field("total_allocations", &self.total_allocations)?;
        state.serialize_field("frame", &self.frame)?;
        state.serialize_field("by_allocator", &self.by_allocator)?;
        state.serialize_field("by_region", &self.by_region)?;
        state.serialize_field("by_thread", &self.by_thread)?;
        state.end()
    }
}

/// Owned, deserializable counterpart of [`MemoryMetrics`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub current_bytes: u64,
    pub peak_bytes: u64,
    pub active_allocations: u64,
    pub total_allocations: u64,
    pub frame: FrameCounters,
    pub by_allocator: Vec<(AllocatorKind, DimensionCounters)>,
    pub by_region: Vec<(MemoryRegion, DimensionCounters)>,
    pub by_thread: Vec<(u64, DimensionCounters)>,
}

impl MetricsSnapshot {
    pub fn allocator(&self, kind: AllocatorKind) -> DimensionCounters {
        lookup(&self.by_allocator, kind)
    }

    pub fn region(&self, region: MemoryRegion) -> DimensionCounters {
        lookup(&self.by_region, region)
    }

    pub fn thread(&self, thread: u64) -> DimensionCounters {
        lookup(&self.by_thread, thread)
    }
}

fn lookup<K: PartialEq>(entries: &[(K, DimensionCounters)], key: K) -> DimensionCounters {
    entries
        .iter()
        .find(|(candidate, _)| *candidate == key)
        .map(|(_, counters)| *counters)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(address: usize, size: usize, region: MemoryRegion, kind: AllocatorKind, thread: u64) -> AllocationRecord {
        AllocationRecord { address, size, region, kind, thread }
    }

    #[test]
    fn unseen_keys_read_as_zero() {
        let metrics = MemoryMetrics::new();
        for kind in AllocatorKind::ALL {
            assert_eq!(metrics.allocator_usage(kind), 0);
            assert_eq!(metrics.allocator_total_allocations(kind), 0);
        }
        assert_eq!(metrics.region_peak_usage(MemoryRegion::Window), 0);
        assert_eq!(metrics.thread_active_allocations(42), 0);
        assert!(metrics.by_thread().is_empty());
    }

    #[test]
    fn allocate_then_free_returns_to_zero() {
        let mut metrics = MemoryMetrics::new();
        let a = record(0x1000, 64, MemoryRegion::Assets, AllocatorKind::Malloc, 1);
        let b = record(0x2000, 128, MemoryRegion::Renderer, AllocatorKind::Global, 2);

        metrics.track_allocation(&a);
        metrics.track_allocation(&b);
        assert_eq!(metrics.current_bytes(), 192);
        assert_eq!(metrics.peak_bytes(), 192);
        assert_eq!(metrics.active_allocations(), 2);

        metrics.track_deallocation(&a);
        assert_eq!(metrics.current_bytes(), 128);
        assert_eq!(metrics.peak_bytes(), 192);
        assert_eq!(metrics.region_usage(MemoryRegion::Assets), 0);
        assert_eq!(metrics.region_peak_usage(MemoryRegion::Assets), 64);
        assert_eq!(metrics.region_usage(MemoryRegion::Renderer), 128);

        metrics.track_deallocation(&b);
        assert_eq!(metrics.current_bytes(), 0);
        assert_eq!(metrics.active_allocations(), 0);
        assert_eq!(metrics.total_allocations(), 2);
        assert_eq!(metrics.thread_usage(1), 0);
        assert_eq!(metrics.thread_usage(2), 0);
        assert_eq!(metrics.thread_total_allocations(2), 1);
    }

    #[test]
    fn dimensions_sum_to_global() {
        let mut metrics = MemoryMetrics::new();
        let mut live = Vec::new();
        for i in 0..60usize {
            let r = record(
                0x100 + i * 0x10,
                (i % 7 + 1) * 24,
                MemoryRegion::ALL[i % MemoryRegion::ALL.len()],
                AllocatorKind::ALL[i % AllocatorKind::ALL.len()],
                (i % 3) as u64 + 1,
            );
            metrics.track_allocation(&r);
            live.push(r);
            if i % 4 == 3 {
                let freed = live.remove(i % live.len());
                metrics.track_deallocation(&freed);
            }

            let by_kind: u64 = metrics.by_allocator().iter().map(|(_, c)| c.current_bytes).sum();
            let by_region: u64 = metrics.by_region().iter().map(|(_, c)| c.current_bytes).sum();
            let by_thread: u64 = metrics.by_thread().iter().map(|(_, c)| c.current_bytes).sum();
            assert_eq!(by_kind, metrics.current_bytes());
            assert_eq!(by_region, metrics.current_bytes());
            assert_eq!(by_thread, metrics.current_bytes());

            let active: u64 = metrics.by_allocator().iter().map(|(_, c)| c.active_allocations).sum();
            assert_eq!(active, metrics.active_allocations());
            assert_eq!(metrics.active_allocations(), live.len() as u64);
        }
    }

    #[test]
    fn frame_counters_reset_without_touching_totals() {
        let mut metrics = MemoryMetrics::new();
        let r = record(0x10, 32, MemoryRegion::Core, AllocatorKind::Frame, 1);
        metrics.track_allocation(&r);
        assert_eq!(metrics.frame(), FrameCounters { allocated_bytes: 32, allocation_count: 1 });

        metrics.track_deallocation(&r);
        assert_eq!(metrics.frame().allocated_bytes, 32);

        metrics.on_new_frame();
        assert_eq!(metrics.frame(), FrameCounters::default());
        assert_eq!(metrics.total_allocations(), 1);
        assert_eq!(metrics.peak_bytes(), 32);
    }

    #[test]
    fn serialized_metrics_decode_as_snapshot() {
        let mut metrics = MemoryMetrics::new();
        metrics.track_allocation(&record(0x10, 40, MemoryRegion::Ecs, AllocatorKind::Pool, 9));
        metrics.track_allocation(&record(0x20, 8, MemoryRegion::Debug, AllocatorKind::Ring, 9));

        let bytes = bincode::serialize(&metrics).unwrap();
        let decoded: MetricsSnapshot = bincode::deserialize(&bytes).unwrap();

        assert_eq!(decoded.current_bytes, 48);
        assert_eq!(decoded.frame.allocation_count, 2);
        assert_eq!(decoded.region(MemoryRegion::Ecs).current_bytes, 40);
        assert_eq!(decoded.allocator(AllocatorKind::Ring).total_allocations, 1);
        assert_eq!(decoded.thread(9).active_allocations, 2);
        assert_eq!(decoded.region(MemoryRegion::Window), DimensionCounters::default());
        assert_eq!(decoded.by_region.len(), metrics.snapshot().by_region.len());
    }

    #[test]
    fn clear_forgets_everything() {
        let mut metrics = MemoryMetrics::new_in(allocator_api2::alloc::Global);
        metrics.track_allocation(&record(0x10, 40, MemoryRegion::Ecs, AllocatorKind::Pool, 9));
        metrics.clear();
        assert_eq!(metrics.snapshot(), MetricsSnapshot::default());
    }
}
