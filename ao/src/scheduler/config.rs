//! Scheduler configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Scheduler configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Ready-queue slots reserved at init
    #[serde(default = "default_ready_queue_reserve")]
    pub ready_queue_reserve: usize,

    /// Length of one clock tick in microseconds
    #[serde(default = "default_tick_micros")]
    pub tick_micros: u64,

    /// Byte budget for queue growth (unlimited when absent)
    #[serde(default)]
    pub memory_limit: Option<usize>,

    /// Iterations per `run_non_blocking` call when hosted by an external loop
    #[serde(default = "default_non_blocking_batch")]
    pub non_blocking_batch: usize,
}

fn default_ready_queue_reserve() -> usize {
    20
}

fn default_tick_micros() -> u64 {
    1_000
}

fn default_non_blocking_batch() -> usize {
    16
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            ready_queue_reserve: default_ready_queue_reserve(),
            tick_micros: default_tick_micros(),
            memory_limit: None,
            non_blocking_batch: default_non_blocking_batch(),
        }
    }
}

impl SchedulerConfig {
    /// Get the tick length as a Duration
    pub fn tick(&self) -> Duration {
        Duration::from_micros(self.tick_micros)
    }
}
