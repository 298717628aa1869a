//! Hash maps used for tracker bookkeeping.

use heapscope_core::memory::UntrackedAlloc;

/// Deterministic hasher state; building one never touches the heap.
pub type FixedState = ahash::RandomState;

/// `hashbrown` map parameterized over the allocator its table lives in.
pub type BookkeepingMap<K, V, A = UntrackedAlloc> = hashbrown::HashMap<K, V, FixedState, A>;

const SEEDS: [u64; 4] = [
    0x243f_6a88_85a3_08d3,
    0x1319_8a2e_0370_7344,
    0xa409_3822_299f_31d0,
    0x082e_fa98_ec4e_6c89,
];

pub fn fixed_state() -> FixedState {
    ahash::RandomState::with_seeds(SEEDS[0], SEEDS[1], SEEDS[2], SEEDS[3])
}

pub fn map_in<K, V, A>(alloc: A) -> BookkeepingMap<K, V, A>
where
    A: allocator_api2::alloc::Allocator + Clone,
{
    hashbrown::HashMap::with_hasher_in(fixed_state(), alloc)
}
