//! Monotonic clock for recording sessions

use std::time::{Duration, Instant};

/// Measures time since the start of a recording session.
#[derive(Debug, Clone, Copy)]
pub struct SceneClock {
    start: Instant,
}

impl SceneClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Restart the clock at zero.
    pub fn reset(&mut self) {
        self.start = Instant::now();
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Elapsed time in (fractional) microseconds.
    pub fn elapsed_micros(&self) -> f64 {
        self.elapsed().as_secs_f64() * 1_000_000.0
    }
}

impl Default for SceneClock {
    fn default() -> Self {
        Self::new()
    }
}
