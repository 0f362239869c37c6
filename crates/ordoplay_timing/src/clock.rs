// SPDX-License-Identifier: MIT OR Apache-2.0
//! Clocks used to evaluate motion.
//!
//! All timestamps in this crate are seconds on a shared clock. The
//! [`SystemClock`] follows wall time, the [`ManualClock`] only moves when told
//! to, which makes simulations and tests deterministic.

use std::cell::Cell;
use std::rc::Rc;
use std::time::Instant;

/// Source of the current time in seconds
pub trait Clock {
    /// Current time in seconds
    fn now(&self) -> f64;
}

/// Monotonic clock, zero at construction
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    epoch: Instant,
}

impl SystemClock {
    /// Create a new system clock
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }
}

/// Clock driven explicitly by the caller.
///
/// Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Rc<Cell<f64>>,
}

impl ManualClock {
    /// Create a manual clock starting at `start`
    pub fn new(start: f64) -> Self {
        Self {
            now: Rc::new(Cell::new(start)),
        }
    }

    /// Set the current time
    pub fn set(&self, now: f64) {
        self.now.set(now);
    }

    /// Move the clock forward by `delta` seconds
    pub fn advance(&self, delta: f64) {
        self.now.set(self.now.get() + delta);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        self.now.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_is_shared() {
        let clock = ManualClock::new(1.0);
        let other = clock.clone();
        clock.advance(2.5);
        assert_eq!(other.now(), 3.5);
        other.set(10.0);
        assert_eq!(clock.now(), 10.0);
    }

    #[test]
    fn test_system_clock_is_monotonic() {
        let clock = SystemClock::new();
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
        assert!(a >= 0.0);
    }
}
