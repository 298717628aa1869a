//! Heapscope Core
//!
//! Engine-side building blocks the memory tracker sits on:
//! - Linear arena and the untracked bookkeeping allocator
//! - Frame boundary notifications
//! - Monotonic scene clock

pub mod events;
pub mod memory;
pub mod time;

/// Engine version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
