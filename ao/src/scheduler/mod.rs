//! Per-thread scheduler for active objects
//!
//! Provides:
//! - A thread-safe ready queue ordered by priority, then completion order
//! - An owner-thread timer queue ordered by deadline, then arming order
//! - Blocking and non-blocking run loops with stop/suspend/resume
//! - Thread-affinity checks on every owner-only operation

mod config;
mod control;
mod core;
mod observer;
mod queue;
mod thread;
mod timer;

pub use config::SchedulerConfig;
pub use control::SchedulerControl;
pub(crate) use self::core::SchedulerShared;
pub use self::core::{RunReport, Scheduler, SchedulerBuilder};
pub use observer::{NoopStats, SchedulerObserver, StatsSink};
pub use queue::{Membership, ObjectStats, QueuePresence, ReadyQueue, SchedulerStats};
pub use thread::ThreadContext;
pub use timer::TimerQueue;
