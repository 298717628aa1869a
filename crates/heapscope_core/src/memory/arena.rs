//! Linear (bump) arena over a fixed memory block.

use std::alloc::{GlobalAlloc, Layout, System};
use std::fmt;
use std::ptr::{self, NonNull};

/// Alignment of every backing block handed out by the system allocator.
pub const MAX_ALIGN: usize = 16;

/// Capacity used when growing an arena that was created empty.
const MIN_GROW_CAPACITY: usize = 64;

/// A bump allocator over a single fixed-capacity block.
///
/// Allocation advances a marker; nothing is freed individually. [`reset`]
/// rewinds the marker to the start of the block, after which the same space
/// is handed out again. The block only grows through [`resize_buffer`], and
/// only while the arena is empty.
///
/// The backing block comes straight from [`System`], so arenas never show up
/// in the tracked global allocator.
///
/// Not internally synchronized: every mutating call takes `&mut self`.
///
/// [`reset`]: LinearArena::reset
/// [`resize_buffer`]: LinearArena::resize_buffer
pub struct LinearArena {
    start: NonNull<u8>,
    capacity: usize,
    /// Offset of the bump pointer from `start`. Always `<= capacity`.
    marker: usize,
}

// SAFETY: The arena exclusively owns its block. Shared references only expose
// `used`/`capacity`, every access to the bytes requires `&mut self`.
unsafe impl Send for LinearArena {}
unsafe impl Sync for LinearArena {}

impl LinearArena {
    /// Create an arena with a block of exactly `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            start: alloc_block(capacity),
            capacity,
            marker: 0,
        }
    }

    /// Carve `size` bytes aligned to `align` out of the block.
    ///
    /// Returns `None`, leaving the arena untouched, if the remaining space
    /// after alignment padding is smaller than `size`.
    ///
    /// # Panics
    ///
    /// If `align` is not a power of two.
    pub fn allocate(&mut self, size: usize, align: usize) -> Option<NonNull<u8>> {
        assert!(
            align.is_power_of_two(),
            "arena alignment must be a power of two (got {align})"
        );

        let base = self.start.as_ptr() as usize;
        let current = base.checked_add(self.marker)?;
        let aligned = current.checked_add(align - 1)? & !(align - 1);
        let offset = aligned - base;
        let end = offset.checked_add(size)?;
        if end > self.capacity {
            return None;
        }

        self.marker = end;
        // SAFETY: offset <= end <= capacity, so the pointer stays inside the
        // block or one past its end.
        Some(unsafe { NonNull::new_unchecked(self.start.as_ptr().add(offset)) })
    }

    /// Carve a zeroed, byte-aligned slice of `len` bytes out of the block.
    pub fn allocate_bytes(&mut self, len: usize) -> Option<&mut [u8]> {
        let ptr = self.allocate(len, 1)?;
        // SAFETY: `allocate` reserved `len` bytes for us inside the block and
        // the returned borrow keeps the arena from handing them out again.
        unsafe {
            ptr::write_bytes(ptr.as_ptr(), 0, len);
            Some(std::slice::from_raw_parts_mut(ptr.as_ptr(), len))
        }
    }

    /// Rewind the marker to the start of the block. The block is kept.
    pub fn reset(&mut self) {
        self.marker = 0;
    }

    /// Bytes handed out since the last reset, alignment padding included.
    pub fn used(&self) -> usize {
        self.marker
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn remaining(&self) -> usize {
        self.capacity - self.marker
    }

    /// Replace the block with one of double the capacity.
    ///
    /// Only allowed while nothing is allocated; returns `false` without any
    /// effect otherwise. The marker is at the start of the new block afterwards.
    pub fn resize_buffer(&mut self) -> bool {
        if self.used() != 0 {
            return false;
        }

        let new_capacity = self
            .capacity
            .saturating_mul(2)
            .max(MIN_GROW_CAPACITY);
        let new_start = alloc_block(new_capacity);

        free_block(self.start, self.capacity);
        self.start = new_start;
        self.capacity = new_capacity;
        self.marker = 0;

        tracing::trace!(capacity = new_capacity, "linear arena grown");
        true
    }

    /// Offset of `ptr` from the start of the block, if it points into it.
    pub fn offset_of(&self, ptr: NonNull<u8>) -> Option<usize> {
        let base = self.start.as_ptr() as usize;
        let addr = ptr.as_ptr() as usize;
        (base..=base + self.capacity)
            .contains(&addr)
            .then(|| addr - base)
    }
}

impl Clone for LinearArena {
    /// Deep copy of the whole block; the copy has the same used size.
    fn clone(&self) -> Self {
        let start = alloc_block(self.capacity);
        if self.capacity != 0 {
            // SAFETY: both blocks are `capacity` bytes and distinct allocations.
            unsafe {
                ptr::copy_nonoverlapping(self.start.as_ptr(), start.as_ptr(), self.capacity);
            }
        }
        Self {
            start,
            capacity: self.capacity,
            marker: self.marker,
        }
    }
}

impl Drop for LinearArena {
    fn drop(&mut self) {
        free_block(self.start, self.capacity);
    }
}

impl fmt::Debug for LinearArena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinearArena")
            .field("capacity", &self.capacity)
            .field("used", &self.marker)
            .finish()
    }
}

fn block_layout(capacity: usize) -> Layout {
    Layout::from_size_align(capacity, MAX_ALIGN).expect("arena capacity overflows a Layout")
}

fn alloc_block(capacity: usize) -> NonNull<u8> {
    if capacity == 0 {
        // SAFETY: MAX_ALIGN is non-zero; a zero-sized block is never dereferenced.
        return unsafe { NonNull::new_unchecked(MAX_ALIGN as *mut u8) };
    }
    let layout = block_layout(capacity);
    // SAFETY: layout has a non-zero size.
    let ptr = unsafe { System.alloc(layout) };
    match NonNull::new(ptr) {
        Some(ptr) => ptr,
        None => std::alloc::handle_alloc_error(layout),
    }
}

fn free_block(start: NonNull<u8>, capacity: usize) {
    if capacity == 0 {
        return;
    }
    // SAFETY: `start` was returned by `alloc_block(capacity)`.
    unsafe { System.dealloc(start.as_ptr(), block_layout(capacity)) }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(ptr: NonNull<u8>) -> usize {
        ptr.as_ptr() as usize
    }

    #[test]
    fn allocate_packs_byte_aligned_blocks() {
        let mut arena = LinearArena::new(2056);
        let a = arena.allocate(5, 1).unwrap();
        let b = arena.allocate(27, 1).unwrap();
        let c = arena.allocate(57, 1).unwrap();

        assert_eq!(addr(b) - addr(a), 5);
        assert_eq!(addr(c) - addr(b), 27);
        assert_eq!(arena.used(), 5 + 27 + 57);
    }

    #[test]
    fn allocated_bytes_are_writable() {
        let mut arena = LinearArena::new(64);
        let bytes = arena.allocate_bytes(26).unwrap();
        assert!(bytes.iter().all(|&b| b == 0));
        bytes.copy_from_slice(b"abcdefghijklmnopqrstuvwxyz");
        assert_eq!(&bytes[..4], b"abcd");
    }

    #[test]
    fn oversized_allocation_fails() {
        let mut arena = LinearArena::new(2056);
        assert!(arena.allocate(3000, 1).is_none());
        assert!(arena.allocate(2057, 1).is_none());
        assert_eq!(arena.used(), 0);
        assert!(arena.allocate(2056, 1).is_some());
        assert_eq!(arena.remaining(), 0);
    }

    #[test]
    fn exhaustion_leaves_used_size_unchanged() {
        let mut arena = LinearArena::new(2200);
        for size in [300, 400, 200, 700, 500] {
            assert!(arena.allocate(size, 1).is_some());
        }
        assert_eq!(arena.used(), 2100);

        assert!(arena.allocate(250, 1).is_none());
        assert_eq!(arena.used(), 2100);

        // Something that still fits is served after the failure.
        assert!(arena.allocate(100, 1).is_some());
        assert_eq!(arena.used(), 2200);
    }

    #[test]
    fn padding_counts_against_capacity() {
        let mut arena = LinearArena::new(32);
        arena.allocate(1, 1).unwrap();
        // 15 bytes of padding + 17 bytes would need 33.
        assert!(arena.allocate(17, 16).is_none());
        assert_eq!(arena.used(), 1);
        assert!(arena.allocate(16, 16).is_some());
        assert_eq!(arena.used(), 32);
    }

    #[test]
    fn every_power_of_two_alignment_is_respected() {
        let mut arena = LinearArena::new(4096);
        let mut align = 1;
        while align <= 256 {
            // Knock the marker off alignment before each request.
            arena.allocate(1, 1).unwrap();
            let ptr = arena.allocate(3, align).unwrap();
            assert_eq!(addr(ptr) % align, 0, "alignment {align}");
            align *= 2;
        }
    }

    #[test]
    fn mixed_type_alignments() {
        #[repr(align(16))]
        struct Aligned16([u8; 8]);

        let mut arena = LinearArena::new(1024);
        let a = arena
            .allocate(std::mem::size_of::<Aligned16>(), std::mem::align_of::<Aligned16>())
            .unwrap();
        assert_eq!(addr(a) % 16, 0);
        let b = arena.allocate(8, std::mem::align_of::<u64>()).unwrap();
        assert_eq!(addr(b) % std::mem::align_of::<u64>(), 0);
        let c = arena.allocate(4, std::mem::align_of::<f32>()).unwrap();
        assert_eq!(addr(c) % std::mem::align_of::<f32>(), 0);
    }

    #[test]
    #[should_panic(expected = "power of two")]
    fn non_power_of_two_alignment_panics() {
        let mut arena = LinearArena::new(64);
        let _ = arena.allocate(4, 3);
    }

    #[test]
    fn reset_reuses_space_from_the_start() {
        let mut arena = LinearArena::new(2200);
        for size in [300, 400, 200, 700, 500] {
            arena.allocate(size, 1).unwrap();
        }
        arena.reset();
        assert_eq!(arena.used(), 0);
        assert_eq!(arena.capacity(), 2200);

        arena.allocate(250, 1).unwrap();
        assert_eq!(arena.used(), 250);
    }

    #[test]
    fn reset_replays_identical_offsets() {
        let requests = [(5, 1), (12, 8), (1, 1), (30, 16), (7, 4), (64, 32)];
        let mut arena = LinearArena::new(512);

        let offsets = |arena: &mut LinearArena| -> Vec<usize> {
            requests
                .iter()
                .map(|&(size, align)| {
                    let ptr = arena.allocate(size, align).unwrap();
                    arena.offset_of(ptr).unwrap()
                })
                .collect()
        };

        let first = offsets(&mut arena);
        arena.reset();
        let second = offsets(&mut arena);

        assert_eq!(first, second);
        assert_eq!(first[1] % 8, 0);
    }

    #[test]
    fn resize_only_when_empty() {
        let mut arena = LinearArena::new(128);
        arena.allocate(10, 1).unwrap();
        assert!(!arena.resize_buffer());
        assert_eq!(arena.capacity(), 128);
        assert_eq!(arena.used(), 10);

        arena.reset();
        assert!(arena.resize_buffer());
        assert_eq!(arena.capacity(), 256);
        assert_eq!(arena.used(), 0);
        assert!(arena.allocate(200, 1).is_some());
    }

    #[test]
    fn empty_arena_grows() {
        let mut arena = LinearArena::new(0);
        assert!(arena.allocate(1, 1).is_none());
        assert!(arena.allocate(0, 1).is_some());
        assert!(arena.resize_buffer());
        assert!(arena.capacity() >= MIN_GROW_CAPACITY);
    }

    #[test]
    fn clone_is_a_deep_copy() {
        let mut arena = LinearArena::new(256);
        arena.allocate_bytes(4).unwrap().copy_from_slice(b"heap");

        let mut copy = arena.clone();
        assert_eq!(copy.capacity(), arena.capacity());
        assert_eq!(copy.used(), arena.used());

        // Writes to the copy do not show up in the original.
        copy.reset();
        copy.allocate_bytes(4).unwrap().copy_from_slice(b"copy");
        arena.reset();
        let original = arena.allocate(4, 1).unwrap();
        let bytes = unsafe { std::slice::from_raw_parts(original.as_ptr(), 4) };
        assert_eq!(bytes, b"heap");
    }

    #[test]
    fn moved_arena_keeps_its_block() {
        let mut arena = LinearArena::new(64);
        let ptr = arena.allocate(8, 8).unwrap();
        let moved = arena;
        assert_eq!(moved.used(), 8);
        assert_eq!(moved.offset_of(ptr), Some(0));
    }
}
