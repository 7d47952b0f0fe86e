//! Monotonic tick sources
//!
//! The scheduler measures timer deadlines in abstract ticks. A [`Clock`]
//! reports the current tick and converts a tick count into a wall-clock
//! [`Duration`] for the blocking wait in the run loop.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Absolute or relative time in clock ticks
pub type Tick = u64;

/// Monotonic tick source supplied to a scheduler
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current tick
    fn now(&self) -> Tick;

    /// Wall-clock length of `ticks`
    fn ticks_to_duration(&self, ticks: Tick) -> Duration;
}

fn scale(tick: Duration, ticks: Tick) -> Duration {
    let nanos = (tick.as_nanos() as u64).saturating_mul(ticks);
    Duration::from_nanos(nanos)
}

/// Clock backed by `Instant`, counting ticks of a fixed length since creation
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    origin: Instant,
    tick: Duration,
}

impl MonotonicClock {
    /// Create a clock whose tick is `tick` long (a zero tick is treated as 1µs)
    pub fn new(tick: Duration) -> Self {
        let tick = if tick.is_zero() { Duration::from_micros(1) } else { tick };
        Self {
            origin: Instant::now(),
            tick,
        }
    }

    /// One tick per millisecond
    pub fn millis() -> Self {
        Self::new(Duration::from_millis(1))
    }

    /// One tick per microsecond
    pub fn micros() -> Self {
        Self::new(Duration::from_micros(1))
    }

    pub fn tick(&self) -> Duration {
        self.tick
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::millis()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Tick {
        (self.origin.elapsed().as_nanos() / self.tick.as_nanos()) as Tick
    }

    fn ticks_to_duration(&self, ticks: Tick) -> Duration {
        scale(self.tick, ticks)
    }
}

/// Clock that only moves when told to; used to drive timers deterministically
#[derive(Debug)]
pub struct ManualClock {
    now: AtomicU64,
    tick: Duration,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    pub fn starting_at(now: Tick) -> Self {
        Self {
            now: AtomicU64::new(now),
            tick: Duration::from_millis(1),
        }
    }

    /// Move the clock forward by `ticks`, returning the new time
    pub fn advance(&self, ticks: Tick) -> Tick {
        self.now.fetch_add(ticks, Ordering::AcqRel) + ticks
    }

    /// Jump to an absolute tick; the clock never moves backwards
    pub fn set(&self, now: Tick) {
        self.now.fetch_max(now, Ordering::AcqRel);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Tick {
        self.now.load(Ordering::Acquire)
    }

    fn ticks_to_duration(&self, ticks: Tick) -> Duration {
        scale(self.tick, ticks)
    }
}
