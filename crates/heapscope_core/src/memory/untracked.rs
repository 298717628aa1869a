//! Allocator for tracker bookkeeping.
//!
//! Goes straight to the system allocator, bypassing whatever
//! `#[global_allocator]` is installed, so the tracker's own collections never
//! report allocations to themselves.

use allocator_api2::alloc::{AllocError, Allocator};
use std::alloc::{GlobalAlloc, Layout, System};
use std::ptr::NonNull;

/// [`Allocator`] that forwards to [`System`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UntrackedAlloc;

// SAFETY: Blocks come from `System` and stay valid until `deallocate`;
// zero-sized requests get a well-aligned dangling pointer that is never freed.
unsafe impl Allocator for UntrackedAlloc {
    fn allocate(&self, layout: Layout) -> Result<NonNull<[u8]>, AllocError> {
        if layout.size() == 0 {
            return Ok(NonNull::slice_from_raw_parts(dangling(layout), 0));
        }
        // SAFETY: layout has a non-zero size.
        let ptr = unsafe { System.alloc(layout) };
        NonNull::new(ptr)
            .map(|ptr| NonNull::slice_from_raw_parts(ptr, layout.size()))
            .ok_or(AllocError)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        if layout.size() != 0 {
            // SAFETY: caller passes a block this allocator returned for `layout`.
            unsafe { System.dealloc(ptr.as_ptr(), layout) }
        }
    }
}

fn dangling(layout: Layout) -> NonNull<u8> {
    // SAFETY: alignment is always non-zero.
    unsafe { NonNull::new_unchecked(layout.align() as *mut u8) }
}
