//! Time sources for the kernel.

use chrono::Utc;
use std::cell::Cell;
use std::rc::Rc;

/// Supplies "now" in seconds
pub trait Clock {
    fn now(&self) -> f64;
}

/// Wall-clock time as fractional Unix seconds
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        Utc::now().timestamp_micros() as f64 / 1_000_000.0
    }
}

/// Manually advanced clock shared between a driver and the kernel
///
/// Clones share the same time, so a driver can keep one handle and give
/// another to the kernel.
#[derive(Clone, Debug, Default)]
pub struct SimulatedClock {
    now: Rc<Cell<f64>>,
}

impl SimulatedClock {
    pub fn starting_at(now: f64) -> Self {
        Self {
            now: Rc::new(Cell::new(now)),
        }
    }

    pub fn advance(&self, seconds: f64) {
        self.now.set(self.now.get() + seconds);
    }

    pub fn set(&self, now: f64) {
        self.now.set(now);
    }
}

impl Clock for SimulatedClock {
    fn now(&self) -> f64 {
        self.now.get()
    }
}
