//! Per-thread tracker state: thread identity, reentrancy suppression and the
//! region tag used by the global allocator hook.
//!
//! Everything here lives in `const` thread-locals so reading it never
//! allocates, which matters because these functions run inside the global
//! allocator.

use crate::collections::fixed_state;
use crate::tags::MemoryRegion;
use std::cell::Cell;
use std::hash::BuildHasher;
use std::marker::PhantomData;
use std::thread::ThreadId;

thread_local! {
    static SUPPRESS_DEPTH: Cell<u32> = const { Cell::new(0) };
    static THREAD_HASH: Cell<u64> = const { Cell::new(0) };
    static CURRENT_REGION: Cell<MemoryRegion> = const { Cell::new(MemoryRegion::Unknown) };
}

/// Hashes a thread id into the key used by the per-thread metrics.
///
/// Never returns 0.
pub fn thread_hash_of(id: ThreadId) -> u64 {
    match BuildHasher::hash_one(&fixed_state(), id) {
        0 => 1,
        hash => hash,
    }
}

/// Hash of the calling thread, computed once and cached.
///
/// Returns 0 once the thread's locals have been torn down.
pub fn current_thread_hash() -> u64 {
    THREAD_HASH
        .try_with(|cached| match cached.get() {
            0 => {
                let hash = thread_hash_of(std::thread::current().id());
                cached.set(hash);
                hash
            }
            hash => hash,
        })
        .unwrap_or(0)
}

/// While alive, the tracker ignores allocation events from this thread.
///
/// Every tracker entry point holds one of these so that allocations it makes
/// itself (map growth, file writes, stack capture, log formatting) are not
/// reported back into it. Guards nest.
#[must_use = "suppression ends when the guard is dropped"]
pub struct SuppressGuard {
    _not_send: PhantomData<*const ()>,
}

impl SuppressGuard {
    pub fn enter() -> Self {
        let _ = SUPPRESS_DEPTH.try_with(|depth| depth.set(depth.get() + 1));
        Self { _not_send: PhantomData }
    }
}

impl Drop for SuppressGuard {
    fn drop(&mut self) {
        let _ = SUPPRESS_DEPTH.try_with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

/// True while the calling thread is inside tracker machinery.
///
/// A thread whose locals are already destroyed counts as suppressed.
pub fn is_suppressed() -> bool {
    SUPPRESS_DEPTH.try_with(|depth| depth.get() > 0).unwrap_or(true)
}

/// Runs `f` with tracking suppressed on this thread.
pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
    let _guard = SuppressGuard::enter();
    f()
}

/// Tags global-allocator allocations on this thread with a region until dropped.
#[must_use = "the region is restored when the guard is dropped"]
pub struct RegionGuard {
    previous: MemoryRegion,
    _not_send: PhantomData<*const ()>,
}

impl Drop for RegionGuard {
    fn drop(&mut self) {
        let previous = self.previous;
        let _ = CURRENT_REGION.try_with(|region| region.set(previous));
    }
}

/// Sets the region reported for this thread's global allocations.
///
/// ```ignore
/// let _region = region_scope(MemoryRegion::Assets);
/// let texture = vec![0u8; 4096]; // tagged Assets
/// ```
pub fn region_scope(region: MemoryRegion) -> RegionGuard {
    let previous = CURRENT_REGION
        .try_with(|current| current.replace(region))
        .unwrap_or(MemoryRegion::Unknown);
    RegionGuard {
        previous,
        _not_send: PhantomData,
    }
}

/// Region set by the innermost live [`region_scope`] on this thread.
pub fn current_region() -> MemoryRegion {
    CURRENT_REGION
        .try_with(Cell::get)
        .unwrap_or(MemoryRegion::Unknown)
}
