//! Host time adapter.
//!
//! Implements the [`Clock`] port on `std::time::Instant`, giving the
//! calibration busy-wait a monotonic origin and a blocking sleep.

use core::time::Duration;
use std::time::Instant;

use crate::app::ports::Clock;

/// Monotonic clock anchored at construction.
pub struct SystemClock {
    start: Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemClock {
    pub fn new() -> Self {
        Self { start: Instant::now() }
    }

    /// Microseconds since construction (monotonic, wraps at `u64::MAX`).
    pub fn uptime_us(&self) -> u64 {
        self.start.elapsed().as_micros() as u64
    }
}

impl Clock for SystemClock {
    fn now_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }

    fn sleep(&mut self, dur: Duration) {
        std::thread::sleep(dur);
    }
}
