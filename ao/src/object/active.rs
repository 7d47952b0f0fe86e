//! Active objects: units of deferred work owned by application code
//!
//! An [`ActiveObject`] wraps an [`ActiveTask`] implementation. Once attached
//! to a [`Scheduler`] the object can arm one request at a time, either as a
//! plain pending request completed by some provider through
//! [`ActiveObject::complete`] or a [`Completer`], or as a timer request that
//! completes when its deadline passes. The scheduler then runs the task body
//! on its own thread.

use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{ObjectState, Priority, RequestStatus};
use crate::clock::Tick;
use crate::error::{SchedulerError, TaskError};
use crate::scheduler::{Scheduler, SchedulerShared};

/// Process-unique identifier of an active object
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectId(u64);

static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(1);

impl ObjectId {
    /// Generate a new unique ObjectId
    pub fn new() -> Self {
        ObjectId(NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ao#{}", self.0)
    }
}

/// What the scheduler should do with an object after its task body returns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rearm {
    /// Leave the object Idle (or as armed during the call)
    Done,
    /// Arm a pending request to be completed externally
    Pend,
    /// Arm and complete immediately with status `None`
    ReadyNow,
    /// Arm a timer request `ticks` from now
    After(Tick),
}

/// Result of `run_error`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorDisposition {
    Handled,
    Unhandled,
}

/// The hooks an active object implements
pub trait ActiveTask: Send + 'static {
    /// Task body, run on the scheduler's thread once the request completes
    fn run(&mut self, cx: &mut RunContext<'_>) -> Result<Rearm, TaskError>;

    /// Synchronously cancel whatever external operation is outstanding
    fn do_cancel(&mut self) {}

    /// Handle an error returned (or a panic raised) by `run`
    fn run_error(&mut self, _error: &TaskError) -> ErrorDisposition {
        ErrorDisposition::Unhandled
    }
}

impl<F> ActiveTask for F
where
    F: FnMut(&mut RunContext<'_>) -> Result<Rearm, TaskError> + Send + 'static,
{
    fn run(&mut self, cx: &mut RunContext<'_>) -> Result<Rearm, TaskError> {
        self(cx)
    }
}

/// View of the scheduler handed to a running task body
pub struct RunContext<'a> {
    id: ObjectId,
    status: RequestStatus,
    armed: bool,
    shared: &'a Arc<SchedulerShared>,
}

impl<'a> RunContext<'a> {
    pub(crate) fn new(id: ObjectId, status: RequestStatus, shared: &'a Arc<SchedulerShared>) -> Self {
        Self {
            id,
            status,
            armed: false,
            shared,
        }
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// Status the completed request carried
    pub fn status(&self) -> RequestStatus {
        self.status
    }

    /// Current scheduler tick
    pub fn now(&self) -> Tick {
        self.shared.now()
    }

    pub fn scheduler_name(&self) -> &str {
        self.shared.name()
    }

    /// Arm a pending request now, before issuing it to a provider
    ///
    /// The returned completer may be used right away from any thread. The
    /// body must then return [`Rearm::Done`].
    pub fn set_busy(&mut self) -> Completer {
        let priority = self.shared.priority_of(self.id);
        self.shared.set_busy(self.id, priority, "RunContext::set_busy");
        self.armed = true;
        self.completer()
    }

    /// Cancel the request armed by [`RunContext::set_busy`]
    ///
    /// `do_cancel` runs once the body returns. The body is then free to
    /// return any [`Rearm`].
    pub fn cancel(&mut self) {
        self.shared.cancel(self.id);
        self.armed = false;
    }

    /// Completer for this object, valid for the request armed next
    pub fn completer(&self) -> Completer {
        Completer {
            id: self.id,
            scheduler: Arc::downgrade(self.shared),
        }
    }

    pub(crate) fn armed(&self) -> bool {
        self.armed
    }
}

/// Object-safe view of an object used by the scheduler
pub(crate) trait Dispatch: Send + Sync {
    fn name(&self) -> &str;
    fn priority(&self) -> Priority;
    fn run(&self, cx: &mut RunContext<'_>) -> Result<Rearm, TaskError>;
    /// Blocks while another thread holds the task guard
    fn do_cancel(&self);
    fn run_error(&self, error: &TaskError) -> ErrorDisposition;
}

struct ObjectCore<T> {
    id: ObjectId,
    name: String,
    priority: AtomicI32,
    attachment: Mutex<Weak<SchedulerShared>>,
    task: Mutex<T>,
}

impl<T: ActiveTask> Dispatch for ObjectCore<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> Priority {
        Priority::new(self.priority.load(Ordering::Relaxed))
    }

    fn run(&self, cx: &mut RunContext<'_>) -> Result<Rearm, TaskError> {
        self.task.lock().run(cx)
    }

    fn do_cancel(&self) {
        self.task.lock().do_cancel();
    }

    fn run_error(&self, error: &TaskError) -> ErrorDisposition {
        self.task.lock().run_error(error)
    }
}

/// A unit of deferred work with a name, a priority and one request slot
pub struct ActiveObject<T: ActiveTask> {
    core: Arc<ObjectCore<T>>,
}

impl<T: ActiveTask> ActiveObject<T> {
    /// Create a detached object
    pub fn new(name: impl Into<String>, priority: Priority, task: T) -> Self {
        let name = name.into();
        let id = ObjectId::new();
        debug!(%id, %name, %priority, "ActiveObject::new: called");
        Self {
            core: Arc::new(ObjectCore {
                id,
                name,
                priority: AtomicI32::new(priority.value()),
                attachment: Mutex::new(Weak::new()),
                task: Mutex::new(task),
            }),
        }
    }

    pub fn id(&self) -> ObjectId {
        self.core.id
    }

    pub fn name(&self) -> &str {
        &self.core.name
    }

    pub fn priority(&self) -> Priority {
        self.core.priority()
    }

    /// Change the priority; takes effect the next time a request is armed
    pub fn set_priority(&self, priority: Priority) {
        self.core.priority.store(priority.value(), Ordering::Relaxed);
    }

    /// Access the task state, e.g. to inspect results between runs
    ///
    /// Do not hold the guard across scheduler calls that may run or cancel
    /// this object on the same thread; `cancel` waits for the guard.
    pub fn task(&self) -> MutexGuard<'_, T> {
        self.core.task.lock()
    }

    fn scheduler(&self, op: &str) -> Arc<SchedulerShared> {
        self.core
            .attachment
            .lock()
            .upgrade()
            .unwrap_or_else(|| panic!("{}: object {} ({}) is not attached to a scheduler", op, self.id(), self.name()))
    }

    pub fn is_added(&self) -> bool {
        self.core.attachment.lock().upgrade().is_some()
    }

    /// Attach to `scheduler`; must be called on the scheduler's thread
    pub fn add_to_scheduler(&self, scheduler: &Scheduler) -> Result<(), SchedulerError> {
        debug!(id = %self.id(), name = self.name(), "ActiveObject::add_to_scheduler: called");
        let shared = scheduler.shared();
        shared.ensure_owner("ActiveObject::add_to_scheduler");

        let mut attachment = self.core.attachment.lock();
        if attachment.upgrade().is_some() {
            panic!(
                "ActiveObject::add_to_scheduler: object {} ({}) is already attached",
                self.id(),
                self.name()
            );
        }

        let dispatch: Arc<dyn Dispatch> = self.core.clone();
        shared.attach(self.id(), &dispatch)?;
        *attachment = Arc::downgrade(shared);
        Ok(())
    }

    /// Cancel any outstanding request and detach
    pub fn remove_from_scheduler(&self) {
        debug!(id = %self.id(), name = self.name(), "ActiveObject::remove_from_scheduler: called");
        let shared = self.scheduler("ActiveObject::remove_from_scheduler");
        shared.detach(self.id());
        *self.core.attachment.lock() = Weak::new();
    }

    /// Arm a pending request to be completed by a provider
    pub fn set_busy(&self) {
        self.scheduler("ActiveObject::set_busy")
            .set_busy(self.id(), self.priority(), "ActiveObject::set_busy");
    }

    /// Arm a timer request that completes `delay` ticks from now
    pub fn after(&self, delay: Tick) -> Result<(), SchedulerError> {
        self.scheduler("ActiveObject::after")
            .after(self.id(), self.priority(), delay, "ActiveObject::after")
    }

    /// Arm only if no request is outstanding; a zero delay completes at once
    ///
    /// Returns whether a request was armed.
    pub fn run_if_not_ready(&self, delay: Tick) -> Result<bool, SchedulerError> {
        self.scheduler("ActiveObject::run_if_not_ready")
            .run_if_not_ready(self.id(), self.priority(), delay)
    }

    /// Complete the outstanding request; callable from any thread
    pub fn complete(&self, status: impl Into<RequestStatus>) {
        self.scheduler("ActiveObject::complete").complete(self.id(), status.into());
    }

    /// Thread-safe handle that completes this object's requests
    pub fn completer(&self) -> Completer {
        Completer {
            id: self.id(),
            scheduler: Arc::downgrade(&self.scheduler("ActiveObject::completer")),
        }
    }

    /// Cancel the outstanding request; a no-op when none is outstanding
    pub fn cancel(&self) {
        self.scheduler("ActiveObject::cancel").cancel(self.id());
    }

    pub fn state(&self) -> ObjectState {
        self.link_snapshot().map(|(state, _)| state).unwrap_or_default()
    }

    pub fn status(&self) -> RequestStatus {
        self.link_snapshot().map(|(_, status)| status).unwrap_or_default()
    }

    /// A request is outstanding (Pending or Ready)
    pub fn is_busy(&self) -> bool {
        self.state().is_busy()
    }

    fn link_snapshot(&self) -> Option<(ObjectState, RequestStatus)> {
        let shared = self.core.attachment.lock().upgrade()?;
        shared.link(self.id()).map(|link| (link.state, link.status))
    }
}

impl<T: ActiveTask> Drop for ActiveObject<T> {
    fn drop(&mut self) {
        let Some(shared) = self.core.attachment.lock().upgrade() else {
            return;
        };
        if !shared.is_attached(self.id()) {
            return;
        }
        if std::thread::panicking() {
            if shared.is_owner() {
                shared.detach(self.id());
            }
            return;
        }
        panic!(
            "active object {} ({}) dropped while attached to scheduler '{}'",
            self.id(),
            self.name(),
            shared.name()
        );
    }
}

impl<T: ActiveTask> std::fmt::Debug for ActiveObject<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveObject")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("priority", &self.priority())
            .field("state", &self.state())
            .finish()
    }
}

/// Cloneable, thread-safe completion handle for one object
#[derive(Clone)]
pub struct Completer {
    id: ObjectId,
    scheduler: Weak<SchedulerShared>,
}

impl Completer {
    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// Complete the object's outstanding request from any thread
    pub fn complete(&self, status: impl Into<RequestStatus>) {
        let shared = self
            .scheduler
            .upgrade()
            .unwrap_or_else(|| panic!("Completer::complete: scheduler of object {} is gone", self.id));
        shared.complete(self.id, status.into());
    }
}

impl std::fmt::Debug for Completer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Completer").field("id", &self.id).finish()
    }
}
