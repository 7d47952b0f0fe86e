//! Host-loop callbacks and the optional statistics sink

use std::time::Duration;

use crate::clock::Tick;
use crate::error::TaskError;
use crate::object::{ErrorDisposition, ObjectId};

/// Notified when a scheduler driven through `run_non_blocking` has new work
///
/// Registration is one-shot: after either callback fires the observer must
/// register again. `ready_callback` may run on the thread that completed a
/// request, not the scheduler's thread.
pub trait SchedulerObserver: Send + Sync {
    /// An object became ready
    fn ready_callback(&self);

    /// A new earliest timer deadline is `delay` ticks away
    fn timer_callback(&self, delay: Tick);
}

/// Receives per-object scheduling events; every method defaults to a no-op
pub trait StatsSink: Send + Sync {
    fn on_run(&self, _id: ObjectId, _name: &str, _elapsed: Duration) {}

    fn on_error(&self, _id: ObjectId, _name: &str, _error: &TaskError, _disposition: ErrorDisposition) {}

    fn on_cancel(&self, _id: ObjectId, _name: &str) {}
}

/// Sink that drops every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopStats;

impl StatsSink for NoopStats {}
