//! The allocation tracker façade.

use crate::aggregator::{MemoryMetrics, MetricsSnapshot};
use crate::config::TrackerConfig;
use crate::error::TrackerError;
use crate::record::{AllocationRecord, AllocationStore};
use crate::scene::{SceneRecorder, SceneSummary};
use crate::tags::{AllocatorKind, MemoryRegion};
use crate::thread::{self, SuppressGuard};
use heapscope_core::events::{FrameEvents, ListenerId};
use parking_lot::{Mutex, RwLock};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

struct TrackerState {
    records: AllocationStore,
    metrics: MemoryMetrics,
    recorder: SceneRecorder,
}

struct FrameSubscription {
    events: Weak<FrameEvents>,
    id: ListenerId,
}

impl FrameSubscription {
    fn cancel(self) {
        if let Some(events) = self.events.upgrade() {
            events.unsubscribe(self.id);
        }
    }
}

/// Records allocation events from any thread and aggregates them.
///
/// One lock orders every mutation, so scene files are chronological. Each
/// entry point marks its thread as inside the tracker first; anything the
/// tracker allocates for itself is therefore invisible to a tracking global
/// allocator instead of recursing into it.
pub struct AllocationTracker {
    tracking_enabled: AtomicBool,
    state: RwLock<TrackerState>,
    frame_subscription: Mutex<Option<FrameSubscription>>,
}

impl AllocationTracker {
    /// Creates a tracker with tracking disabled until [`init`](Self::init)
    /// or [`enable_tracking`](Self::enable_tracking).
    pub fn new(config: TrackerConfig) -> Arc<Self> {
        let _guard = SuppressGuard::enter();
        Arc::new(Self {
            tracking_enabled: AtomicBool::new(false),
            state: RwLock::new(TrackerState {
                records: AllocationStore::new(),
                metrics: MemoryMetrics::new(),
                recorder: SceneRecorder::new(&config),
            }),
            frame_subscription: Mutex::new(None),
        })
    }

    /// Subscribes to frame notifications, warms up the scene recorder and
    /// enables tracking.
    pub fn init(self: &Arc<Self>, frame_events: &Arc<FrameEvents>) {
        let _guard = SuppressGuard::enter();

        let tracker = Arc::downgrade(self);
        let id = frame_events.subscribe(move || {
            if let Some(tracker) = tracker.upgrade() {
                tracker.new_frame();
            }
        });
        let subscription = FrameSubscription {
            events: Arc::downgrade(frame_events),
            id,
        };
        if let Some(previous) = self.frame_subscription.lock().replace(subscription) {
            previous.cancel();
        }

        if let Err(err) = self.state.write().recorder.warm_up() {
            tracing::warn!(error = %err, "memory profiler warm-up failed");
        }

        self.enable_tracking();
        tracing::info!("allocation tracking initialized");
    }

    /// Ends any active scene, stops listening for frames, reports live
    /// allocations and forgets all state.
    pub fn shutdown(&self) {
        let _guard = SuppressGuard::enter();
        self.disable_tracking();

        if let Some(subscription) = self.frame_subscription.lock().take() {
            subscription.cancel();
        }

        let mut state = self.state.write();
        state.recorder.end_scene();

        let leaked = state.records.len();
        if leaked > 0 {
            tracing::info!(
                allocations = leaked,
                bytes = state.metrics.current_bytes(),
                "live allocations at tracker shutdown"
            );
            let here = thread::current_thread_hash();
            for record in state.records.iter().filter(|record| record.thread == here) {
                tracing::debug!(
                    "leaked {:#x}: {} bytes ({} / {})",
                    record.address,
                    record.size,
                    record.region,
                    record.kind
                );
            }
        }

        state.records.clear();
        state.metrics.clear();
        tracing::info!("allocation tracking shut down");
    }

    pub fn enable_tracking(&self) {
        self.tracking_enabled.store(true, Ordering::Release);
    }

    pub fn disable_tracking(&self) {
        self.tracking_enabled.store(false, Ordering::Release);
    }

    pub fn is_tracking_enabled(&self) -> bool {
        self.tracking_enabled.load(Ordering::Acquire)
    }

    /// Registers a live allocation.
    ///
    /// Ignored when tracking is off, `ptr` is null, the call comes from
    /// inside the tracker, or `ptr` is already registered (logged).
    pub fn add_allocation(&self, ptr: *const u8, size: usize, region: MemoryRegion, kind: AllocatorKind) {
        tracking! {
            if ptr.is_null() || !self.is_tracking_enabled() || thread::is_suppressed() {
                return;
            }
            let _guard = SuppressGuard::enter();
            let record = AllocationRecord {
                address: ptr as usize,
                size,
                region,
                kind,
                thread: thread::current_thread_hash(),
            };

            let mut state = self.state.write();
            let TrackerState { records, metrics, recorder } = &mut *state;
            if !records.insert(record) {
                tracing::warn!(
                    "allocation {:#x} ({} bytes) registered twice without a free; ignoring",
                    record.address,
                    size
                );
                return;
            }
            metrics.track_allocation(&record);
            if recorder.is_scene_active() {
                recorder.record_snapshot(metrics, &record);
            }
        }
        #[cfg(not(feature = "tracking"))]
        let _ = (ptr, size, region, kind);
    }

    /// Unregisters an allocation using the size and tags stored when it was
    /// added. Unknown pointers are ignored.
    pub fn remove_allocation(&self, ptr: *const u8) {
        tracking! {
            if ptr.is_null() || !self.is_tracking_enabled() || thread::is_suppressed() {
                return;
            }
            let _guard = SuppressGuard::enter();

            let mut state = self.state.write();
            let TrackerState { records, metrics, recorder } = &mut *state;
            let Some(record) = records.get(ptr as usize).copied() else {
                return;
            };
            metrics.track_deallocation(&record);
            if recorder.is_scene_active() {
                recorder.record_snapshot(metrics, &record);
            }
            records.remove(record.address);
        }
        #[cfg(not(feature = "tracking"))]
        let _ = ptr;
    }

    /// Resets the per-frame counters.
    pub fn new_frame(&self) {
        let _guard = SuppressGuard::enter();
        self.state.write().metrics.on_new_frame();
    }

    /// Starts streaming events to a new scene file and returns its path.
    pub fn begin_scene(&self, name: &str) -> Result<PathBuf, TrackerError> {
        let _guard = SuppressGuard::enter();
        let result = self.state.write().recorder.begin_scene(name);
        if let Err(err) = &result {
            tracing::warn!(scene = name, error = %err, "memory profiling scene could not start");
        }
        result
    }

    pub fn end_scene(&self) -> Option<SceneSummary> {
        let _guard = SuppressGuard::enter();
        self.state.write().recorder.end_scene()
    }

    pub fn is_scene_active(&self) -> bool {
        let _guard = SuppressGuard::enter();
        self.state.read().recorder.is_scene_active()
    }

    /// Runs `f` against the live metrics under the read lock.
    pub fn with_metrics<R>(&self, f: impl FnOnce(&MemoryMetrics) -> R) -> R {
        let _guard = SuppressGuard::enter();
        f(&self.state.read().metrics)
    }

    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.with_metrics(MemoryMetrics::snapshot)
    }

    pub fn live_allocation_count(&self) -> usize {
        let _guard = SuppressGuard::enter();
        self.state.read().records.len()
    }

    /// Live records ordered by address.
    pub fn leak_report(&self) -> Vec<AllocationRecord> {
        let _guard = SuppressGuard::enter();
        let mut live: Vec<_> = self.state.read().records.iter().copied().collect();
        live.sort_unstable_by_key(|record| record.address);
        live
    }
}

impl Drop for AllocationTracker {
    fn drop(&mut self) {
        let _guard = SuppressGuard::enter();
        self.state.get_mut().recorder.end_scene();
    }
}
