//! Monotonic + wall-clock time source.
//!
//! Everything that measures elapsed time (override age, idle deadlines) reads
//! `monotonic()`; only the brightness schedule cares about `wall()`.

use crate::lock_or_recover;
use chrono::{DateTime, Utc};
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub trait Clock: Send + Sync {
    /// Time elapsed since the clock's origin. Never goes backwards.
    fn monotonic(&self) -> Duration;

    /// Current wall-clock time. May jump (NTP sync, manual change, suspend).
    fn wall(&self) -> DateTime<Utc>;
}

/// Host clock.
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn monotonic(&self) -> Duration {
        self.origin.elapsed()
    }

    fn wall(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Hand-driven clock for deterministic tests and dry runs.
#[derive(Debug)]
pub struct ManualClock {
    state: Mutex<ManualTime>,
}

#[derive(Debug, Clone, Copy)]
struct ManualTime {
    monotonic: Duration,
    wall: DateTime<Utc>,
}

impl ManualClock {
    pub fn new(wall: DateTime<Utc>) -> Self {
        Self {
            state: Mutex::new(ManualTime {
                monotonic: Duration::ZERO,
                wall,
            }),
        }
    }

    /// Move both clocks forward together.
    pub fn advance(&self, by: Duration) {
        let mut state = lock_or_recover(&self.state, "ManualClock::advance");
        state.monotonic += by;
        if let Ok(delta) = chrono::Duration::from_std(by) {
            state.wall += delta;
        }
    }

    /// Jump the wall clock without touching monotonic time.
    pub fn set_wall(&self, wall: DateTime<Utc>) {
        lock_or_recover(&self.state, "ManualClock::set_wall").wall = wall;
    }
}

impl Clock for ManualClock {
    fn monotonic(&self) -> Duration {
        lock_or_recover(&self.state, "ManualClock::monotonic").monotonic
    }

    fn wall(&self) -> DateTime<Utc> {
        lock_or_recover(&self.state, "ManualClock::wall").wall
    }
}
