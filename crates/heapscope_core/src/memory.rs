//! Memory management utilities
//!
//! Arena allocation and the allocator used for tracker bookkeeping

mod arena;
mod untracked;

pub use arena::{LinearArena, MAX_ALIGN};
pub use untracked::UntrackedAlloc;
