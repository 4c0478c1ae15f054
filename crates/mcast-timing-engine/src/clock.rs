//! # Run Clock
//!
//! High-resolution elapsed-time source for a measurement run.
//!
//! Backed by [`quanta::Clock`] (TSC-calibrated where available, monotonic
//! fallback otherwise). Tests build a [`RunClock`] over `quanta::Clock::mock()`
//! and drive time by hand.

use quanta::{Clock, Instant};
use std::time::Duration;

/// Clock shared by both phases of a run and by the capture callback.
#[derive(Debug, Clone)]
pub struct RunClock {
    clock: Clock,
    epoch: Instant,
}

impl RunClock {
    pub fn new() -> Self {
        Self::from_clock(Clock::new())
    }

    /// Wrap an existing clock (e.g. a mocked one). The epoch is taken now.
    pub fn from_clock(clock: Clock) -> Self {
        let epoch = clock.now();
        Self { clock, epoch }
    }

    pub fn now(&self) -> Instant {
        self.clock.now()
    }

    /// Elapsed time from `start` to now. Saturates at zero.
    pub fn elapsed_since(&self, start: Instant) -> Duration {
        self.clock.now().saturating_duration_since(start)
    }

    /// Elapsed time since the clock was created.
    pub fn uptime(&self) -> Duration {
        self.elapsed_since(self.epoch)
    }
}

impl Default for RunClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Tick → µs conversion used for every reported figure, JOIN and LEAVE alike.
pub fn to_micros(d: Duration) -> i64 {
    i64::try_from(d.as_micros()).unwrap_or(i64::MAX)
}
