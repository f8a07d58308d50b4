//! Per-source admission gate shared by all worker threads.
//!
//! Bounds how many calls to one provider may be in flight at once and
//! spaces out call starts by a minimum interval. The browser-driven source
//! runs with a concurrency of one.

use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateLimits {
    pub max_concurrent: usize,
    pub min_interval: Duration,
}

impl GateLimits {
    pub fn new(max_concurrent: usize, min_interval: Duration) -> Self {
        Self {
            max_concurrent: max_concurrent.max(1),
            min_interval,
        }
    }

    pub fn unbounded() -> Self {
        Self::new(usize::MAX, Duration::ZERO)
    }
}

#[derive(Debug, Default)]
struct GateState {
    in_flight: usize,
    next_start: Option<Instant>,
}

#[derive(Debug)]
pub struct SourceGate {
    limits: GateLimits,
    state: Mutex<GateState>,
    released: Condvar,
}

impl SourceGate {
    pub fn new(limits: GateLimits) -> Self {
        Self {
            limits,
            state: Mutex::new(GateState::default()),
            released: Condvar::new(),
        }
    }

    pub fn limits(&self) -> GateLimits {
        self.limits
    }

    /// Blocks until a slot is free and the spacing interval has elapsed.
    pub fn acquire(&self) -> GatePermit<'_> {
        let wait = {
            let mut state = self.state.lock();
            while state.in_flight >= self.limits.max_concurrent {
                self.released.wait(&mut state);
            }
            state.in_flight += 1;

            let now = Instant::now();
            let start = match state.next_start {
                Some(reserved) if reserved > now => reserved,
                _ => now,
            };
            state.next_start = Some(start + self.limits.min_interval);
            start.saturating_duration_since(now)
        };

        if !wait.is_zero() {
            std::thread::sleep(wait);
        }
        GatePermit { gate: self }
    }

    pub fn in_flight(&self) -> usize {
        self.state.lock().in_flight
    }

    fn release(&self) {
        let mut state = self.state.lock();
        state.in_flight -= 1;
        self.released.notify_one();
    }
}

/// Held for the duration of one adapter call.
#[must_use]
pub struct GatePermit<'a> {
    gate: &'a SourceGate,
}

impl Drop for GatePermit<'_> {
    fn drop(&mut self) {
        self.gate.release();
    }
}
