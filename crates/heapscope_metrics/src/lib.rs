//! Heapscope Metrics - allocation tracking and memory profiling
//!
//! Records every allocation and free reported to an [`AllocationTracker`],
//! aggregates live/peak/lifetime counters per allocator kind, memory region
//! and thread, and can stream every event into a binary scene file that the
//! [`SceneMetricsImporter`] turns back into time series.
//!
//! # Feature Flags
//!
//! - `tracking` - Record allocations (default: enabled)
//!
//! # Usage
//!
//! ```ignore
//! use heapscope_core::events::FrameEvents;
//! use heapscope_metrics::{AllocationTracker, AllocatorKind, MemoryRegion, TrackerConfig};
//!
//! let frames = Arc::new(FrameEvents::new());
//! let tracker = AllocationTracker::new(TrackerConfig::default());
//! tracker.init(&frames);
//!
//! tracker.begin_scene("LevelLoad")?;
//! tracker.add_allocation(ptr, 64, MemoryRegion::Assets, AllocatorKind::Pool);
//! tracker.remove_allocation(ptr);
//! tracker.end_scene();
//! ```
//!
//! Without the `tracking` feature, `add_allocation` and `remove_allocation`
//! compile down to nothing.

/// Execute code only when allocation tracking is compiled in
macro_rules! tracking {
    ($($tt:tt)*) => {
        #[cfg(feature = "tracking")]
        {
            $($tt)*
        }
    };
}

mod aggregator;
mod collections;
mod config;
mod error;
mod hook;
mod record;
pub mod scene;
pub mod stacktrace;
mod tags;
pub mod thread;
mod tracker;

pub use aggregator::{DimensionCounters, DimensionMap, FrameCounters, MemoryMetrics, MetricsSnapshot};
pub use config::TrackerConfig;
pub use error::{ImportError, TrackerError};
pub use hook::{RegionAllocator, TrackingAllocator};
pub use record::{AllocationEvent, AllocationRecord, AllocationStore};
pub use scene::{SceneMetricsImporter, SceneMetricsStorage, SceneSummary, SeriesSet};
pub use tags::{AllocatorKind, MemoryRegion};
pub use thread::{region_scope, untracked, RegionGuard, SuppressGuard};
pub use tracker::AllocationTracker;
