//! Time series rebuilt from an imported scene.

use super::format::SnapshotFrame;
use crate::aggregator::DimensionCounters;
use crate::record::AllocationEvent;
use crate::tags::{AllocatorKind, MemoryRegion};
use std::collections::HashMap;
use std::hash::Hash;

/// Four aligned series for one key: one point per snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeriesSet {
    pub usage: Vec<u64>,
    pub peak: Vec<u64>,
    pub active: Vec<u64>,
    pub total: Vec<u64>,
}

impl SeriesSet {
    fn zeros(len: usize) -> Self {
        Self {
            usage: vec![0; len],
            peak: vec![0; len],
            active: vec![0; len],
            total: vec![0; len],
        }
    }

    fn push(&mut self, counters: DimensionCounters) {
        self.usage.push(counters.current_bytes);
        self.peak.push(counters.peak_bytes);
        self.active.push(counters.active_allocations);
        self.total.push(counters.total_allocations);
    }

    pub fn len(&self) -> usize {
        self.usage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.usage.is_empty()
    }
}

/// Everything the memory UI plots for a loaded scene.
///
/// Every series, including the per-key ones, has exactly
/// [`snapshot_count`](Self::snapshot_count) points; a key that was absent
/// from a snapshot reads as zero there.
#[derive(Debug, Default)]
pub struct SceneMetricsStorage {
    expected_snapshot_count: u64,
    global: SeriesSet,
    by_allocator: HashMap<AllocatorKind, SeriesSet>,
    by_region: HashMap<MemoryRegion, SeriesSet>,
    by_thread: HashMap<u64, SeriesSet>,
    frame_bytes: Vec<u64>,
    frame_allocations: Vec<u64>,
    times_us: Vec<f64>,
    events: Vec<AllocationEvent>,
    stacktraces: Vec<String>,
    skipped_records: u64,
}

impl SceneMetricsStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears everything and reserves room for `expected` snapshots.
    pub(crate) fn initialize(&mut self, expected: u64) {
        self.reset();
        self.expected_snapshot_count = expected;

        let capacity = usize::try_from(expected).unwrap_or(0);
        self.times_us.reserve(capacity);
        self.events.reserve(capacity);
        self.stacktraces.reserve(capacity);
        self.frame_bytes.reserve(capacity);
        self.frame_allocations.reserve(capacity);
    }

    pub(crate) fn append(&mut self, frame: SnapshotFrame) {
        let index = self.events.len();
        let metrics = &frame.metrics;

        self.global.push(DimensionCounters {
            current_bytes: metrics.current_bytes,
            peak_bytes: metrics.peak_bytes,
            active_allocations: metrics.active_allocations,
            total_allocations: metrics.total_allocations,
        });
        append_dimension(&mut self.by_allocator, &metrics.by_allocator, index);
        append_dimension(&mut self.by_region, &metrics.by_region, index);
        append_dimension(&mut self.by_thread, &metrics.by_thread, index);

        self.frame_bytes.push(metrics.frame.allocated_bytes);
        self.frame_allocations.push(metrics.frame.allocation_count);
        self.times_us.push(frame.time_us);
        self.events.push(frame.event);
        self.stacktraces.push(frame.stacktrace);
    }

    pub(crate) fn note_skipped(&mut self) {
        self.skipped_records += 1;
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn snapshot_count(&self) -> usize {
        self.events.len()
    }

    /// Count announced by the scene file's trailer.
    pub fn expected_snapshot_count(&self) -> u64 {
        self.expected_snapshot_count
    }

    /// Records that failed to decode and were left out.
    pub fn skipped_records(&self) -> u64 {
        self.skipped_records
    }

    pub fn global(&self) -> &SeriesSet {
        &self.global
    }

    pub fn allocator(&self, kind: AllocatorKind) -> Option<&SeriesSet> {
        self.by_allocator.get(&kind)
    }

    pub fn region(&self, region: MemoryRegion) -> Option<&SeriesSet> {
        self.by_region.get(&region)
    }

    pub fn thread(&self, thread: u64) -> Option<&SeriesSet> {
        self.by_thread.get(&thread)
    }

    pub fn allocators(&self) -> impl Iterator<Item = (AllocatorKind, &SeriesSet)> + '_ {
        self.by_allocator.iter().map(|(kind, series)| (*kind, series))
    }

    pub fn regions(&self) -> impl Iterator<Item = (MemoryRegion, &SeriesSet)> + '_ {
        self.by_region.iter().map(|(region, series)| (*region, series))
    }

    pub fn threads(&self) -> impl Iterator<Item = (u64, &SeriesSet)> + '_ {
        self.by_thread.iter().map(|(thread, series)| (*thread, series))
    }

    pub fn frame_bytes(&self) -> &[u64] {
        &self.frame_bytes
    }

    pub fn frame_allocations(&self) -> &[u64] {
        &self.frame_allocations
    }

    /// Event times in microseconds since the scene began.
    pub fn times_us(&self) -> &[f64] {
        &self.times_us
    }

    pub fn events(&self) -> &[AllocationEvent] {
        &self.events
    }

    pub fn stacktraces(&self) -> &[String] {
        &self.stacktraces
    }
}

/// Pushes one point per key: the snapshot's value, or 0 for keys it lacks.
/// Keys seen for the first time are back-filled with zeros.
fn append_dimension<K: Copy + Eq + Hash>(
    series: &mut HashMap<K, SeriesSet>,
    entries: &[(K, DimensionCounters)],
    index: usize,
) {
    for &(key, counters) in entries {
        let set = series.entry(key).or_insert_with(|| SeriesSet::zeros(index));
        if set.len() == index {
            set.push(counters);
        }
    }
    for set in series.values_mut() {
        if set.len() == index {
            set.push(DimensionCounters::default());
        }
    }
}
