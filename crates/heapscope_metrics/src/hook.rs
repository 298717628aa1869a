//! Ways to feed allocations into a tracker without calling it by hand.

use crate::error::TrackerError;
use crate::tags::{AllocatorKind, MemoryRegion};
use crate::thread;
use crate::tracker::AllocationTracker;
use allocator_api2::alloc::{AllocError, Allocator};
use heapscope_core::memory::UntrackedAlloc;
use std::alloc::{GlobalAlloc, Layout, System};
use std::ptr::NonNull;
use std::sync::{Arc, OnceLock};

/// Global allocator wrapper that reports every allocation to a tracker.
///
/// ```ignore
/// #[global_allocator]
/// static GLOBAL: TrackingAllocator = TrackingAllocator::new(System);
///
/// GLOBAL.attach(tracker.clone())?;
/// ```
///
/// Blocks are tagged [`AllocatorKind::Global`] and with the thread's current
/// [`region_scope`](crate::region_scope). Until a tracker is attached this
/// is a plain passthrough.
pub struct TrackingAllocator<A = System> {
    inner: A,
    tracker: OnceLock<Arc<AllocationTracker>>,
}

impl<A> TrackingAllocator<A> {
    pub const fn new(inner: A) -> Self {
        Self {
            inner,
            tracker: OnceLock::new(),
        }
    }

    /// Starts reporting to `tracker`. Only one tracker can ever be attached.
    pub fn attach(&self, tracker: Arc<AllocationTracker>) -> Result<(), TrackerError> {
        let _guard = thread::SuppressGuard::enter();
        self.tracker.set(tracker).map_err(|_| TrackerError::AlreadyAttached)
    }

    pub fn tracker(&self) -> Option<&Arc<AllocationTracker>> {
        self.tracker.get()
    }

    #[inline]
    fn attached(&self) -> Option<&AllocationTracker> {
        if thread::is_suppressed() {
            return None;
        }
        self.tracker.get().map(Arc::as_ref)
    }

    #[inline]
    fn report_alloc(&self, ptr: *mut u8, size: usize) {
        if ptr.is_null() {
            return;
        }
        if let Some(tracker) = self.attached() {
            tracker.add_allocation(ptr, size, thread::current_region(), AllocatorKind::Global);
        }
    }

    #[inline]
    fn report_dealloc(&self, ptr: *mut u8) {
        if let Some(tracker) = self.attached() {
            tracker.remove_allocation(ptr);
        }
    }
}

// SAFETY: Every request is forwarded unchanged to `inner`; the tracker only
// observes addresses.
unsafe impl<A: GlobalAlloc> GlobalAlloc for TrackingAllocator<A> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let ptr = unsafe { self.inner.alloc(layout) };
        self.report_alloc(ptr, layout.size());
        ptr
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        let ptr = unsafe { self.inner.alloc_zeroed(layout) };
        self.report_alloc(ptr, layout.size());
        ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        // Forget the address before another thread can be handed it again.
        self.report_dealloc(ptr);
        unsafe { self.inner.dealloc(ptr, layout) }
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        self.report_dealloc(ptr);
        let new_ptr = unsafe { self.inner.realloc(ptr, layout, new_size) };
        if new_ptr.is_null() {
            // The old block is still live.
            self.report_alloc(ptr, layout.size());
        } else {
            self.report_alloc(new_ptr, new_size);
        }
        new_ptr
    }
}

/// [`Allocator`] for `allocator_api2` collections that charges every block
/// to one region, reported as [`AllocatorKind::Malloc`].
///
/// ```ignore
/// let mut meshes = allocator_api2::vec::Vec::new_in(RegionAllocator::new(tracker, MemoryRegion::Renderer));
/// ```
#[derive(Clone)]
pub struct RegionAllocator {
    tracker: Arc<AllocationTracker>,
    region: MemoryRegion,
}

impl RegionAllocator {
    pub fn new(tracker: Arc<AllocationTracker>, region: MemoryRegion) -> Self {
        Self { tracker, region }
    }

    pub fn region(&self) -> MemoryRegion {
        self.region
    }
}

// SAFETY: Blocks come from `UntrackedAlloc` and are returned to it with the
// same layout.
unsafe impl Allocator for RegionAllocator {
    fn allocate(&self, layout: Layout) -> Result<NonNull<[u8]>, AllocError> {
        let block = UntrackedAlloc.allocate(layout)?;
        if layout.size() != 0 {
            self.tracker.add_allocation(
                block.cast::<u8>().as_ptr(),
                layout.size(),
                self.region,
                AllocatorKind::Malloc,
            );
        }
        Ok(block)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        if layout.size() != 0 {
            self.tracker.remove_allocation(ptr.as_ptr());
        }
        unsafe { UntrackedAlloc.deallocate(ptr, layout) }
    }
}

#[cfg(all(test, feature = "tracking"))]
mod tests {
    use super::*;
    use crate::config::TrackerConfig;
    use crate::thread::region_scope;
    use heapscope_core::events::FrameEvents;

    fn tracker() -> (Arc<AllocationTracker>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let tracker = AllocationTracker::new(TrackerConfig {
            profile_root: dir.path().to_path_buf(),
            capture_call_stacks: false,
            ..TrackerConfig::default()
        });
        tracker.init(&Arc::new(FrameEvents::new()));
        (tracker, dir)
    }

    #[test]
    fn wrapper_reports_alloc_realloc_dealloc() {
        let (tracker, _dir) = tracker();
        let hook = TrackingAllocator::new(System);
        hook.attach(tracker.clone()).unwrap();
        assert!(hook.attach(tracker.clone()).is_err());

        let layout = Layout::from_size_align(64, 8).unwrap();
        unsafe {
            let ptr = {
                let _assets = region_scope(MemoryRegion::Assets);
                hook.alloc(layout)
            };
            assert!(!ptr.is_null());
            tracker.with_metrics(|m| {
                assert_eq!(m.allocator_usage(AllocatorKind::Global), 64);
                assert_eq!(m.region_usage(MemoryRegion::Assets), 64);
            });

            let grown = hook.realloc(ptr, layout, 256);
            assert!(!grown.is_null());
            tracker.with_metrics(|m| {
                assert_eq!(m.current_bytes(), 256);
                assert_eq!(m.active_allocations(), 1);
                assert_eq!(m.region_usage(MemoryRegion::Unknown), 256);
            });

            hook.dealloc(grown, Layout::from_size_align(256, 8).unwrap());
        }
        assert_eq!(tracker.metrics_snapshot().current_bytes, 0);
        assert_eq!(tracker.live_allocation_count(), 0);
    }

    #[test]
    fn unattached_wrapper_is_a_passthrough() {
        let hook = TrackingAllocator::new(System);
        assert!(hook.tracker().is_none());
        let layout = Layout::new::<u64>();
        unsafe {
            let ptr = hook.alloc_zeroed(layout);
            assert_eq!(*(ptr as *const u64), 0);
            hook.dealloc(ptr, layout);
        }
    }

    #[test]
    fn region_allocator_charges_its_region() {
        let (tracker, _dir) = tracker();
        let alloc = RegionAllocator::new(tracker.clone(), MemoryRegion::Renderer);

        let mut vertices = allocator_api2::vec::Vec::new_in(alloc.clone());
        vertices.extend_from_slice(&[0u32; 100]);
        tracker.with_metrics(|m| {
            assert!(m.region_usage(MemoryRegion::Renderer) >= 400);
            assert_eq!(m.region_active_allocations(MemoryRegion::Renderer), 1);
            assert!(m.allocator_total_allocations(AllocatorKind::Malloc) >= 1);
        });

        drop(vertices);
        assert_eq!(tracker.metrics_snapshot().region(MemoryRegion::Renderer).current_bytes, 0);
        assert_eq!(alloc.region(), MemoryRegion::Renderer);
    }
}
