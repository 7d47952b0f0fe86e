//! Loop control flags shared with other threads

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Condvar, Mutex};
use tracing::debug;

use super::queue::ReadyQueue;

/// Stop and suspend requests observed by the run loop at iteration boundaries
#[derive(Debug, Default)]
pub(crate) struct ControlFlags {
    stop: AtomicBool,
    suspended: Mutex<bool>,
    resumed: Condvar,
}

impl ControlFlags {
    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    pub fn clear_stop(&self) {
        self.stop.store(false, Ordering::Release);
    }

    pub fn is_suspended(&self) -> bool {
        *self.suspended.lock()
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
        let _suspended = self.suspended.lock();
        self.resumed.notify_all();
    }

    pub fn suspend(&self) {
        *self.suspended.lock() = true;
    }

    pub fn resume(&self) {
        *self.suspended.lock() = false;
        self.resumed.notify_all();
    }

    /// Block while suspended, unless a stop arrives
    pub fn wait_while_suspended(&self) {
        let mut suspended = self.suspended.lock();
        while *suspended && !self.stop_requested() {
            self.resumed.wait(&mut suspended);
        }
    }
}

/// Handle for stopping, suspending and resuming a scheduler from any thread
///
/// These calls only set flags; a task body already running is never
/// interrupted.
#[derive(Clone)]
pub struct SchedulerControl {
    pub(crate) flags: Arc<ControlFlags>,
    pub(crate) ready: Weak<ReadyQueue>,
}

impl SchedulerControl {
    fn interrupt(&self) {
        if let Some(ready) = self.ready.upgrade() {
            ready.interrupt();
        }
    }

    pub fn stop_scheduler(&self) {
        debug!("SchedulerControl::stop_scheduler: called");
        self.flags.request_stop();
        self.interrupt();
    }

    pub fn suspend_scheduler(&self) {
        debug!("SchedulerControl::suspend_scheduler: called");
        self.flags.suspend();
        self.interrupt();
    }

    pub fn resume_scheduler(&self) {
        debug!("SchedulerControl::resume_scheduler: called");
        self.flags.resume();
    }

    pub fn is_stop_requested(&self) -> bool {
        self.flags.stop_requested()
    }

    pub fn is_suspended(&self) -> bool {
        self.flags.is_suspended()
    }
}

impl std::fmt::Debug for SchedulerControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerControl")
            .field("stop", &self.flags.stop_requested())
            .field("suspended", &self.flags.is_suspended())
            .finish()
    }
}
