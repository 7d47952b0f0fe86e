//! Scheduler implementation

use std::cell::RefCell;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::alloc::{Allocator, BoundedAllocator, SystemAllocator};
use crate::clock::{Clock, MonotonicClock, Tick};
use crate::error::{SchedulerError, TaskError};
use crate::object::{Dispatch, ErrorDisposition, ObjectId, Priority, Rearm, RequestStatus, RunContext};

use super::config::SchedulerConfig;
use super::control::{ControlFlags, SchedulerControl};
use super::observer::{NoopStats, SchedulerObserver, StatsSink};
use super::queue::{Membership, ObjectStats, QueueLink, QueuePresence, ReadyQueue, SchedulerStats};
use super::thread::ThreadContext;
use super::timer::TimerQueue;

thread_local! {
    static INSTALLED: RefCell<Option<Weak<SchedulerShared>>> = const { RefCell::new(None) };
}

/// Outcome of one `run_non_blocking` call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RunReport {
    /// Task bodies invoked
    pub ran: usize,
    /// Objects still waiting in the ready queue
    pub ready: usize,
    /// Ticks until the earliest timer deadline
    pub next_delay: Option<Tick>,
}

impl RunReport {
    /// The host loop should call again without waiting
    pub fn has_ready(&self) -> bool {
        self.ready > 0
    }
}

struct Registration {
    name: String,
    task: Weak<dyn Dispatch>,
    runs: u64,
    errors: u64,
    run_time: Duration,
}

/// Object whose body is executing on the owner thread
struct CurrentRun {
    id: ObjectId,
    /// The body cancelled its own request; `do_cancel` runs after it returns
    cancel_deferred: bool,
}

/// State only the owning thread touches
struct LocalState {
    timers: TimerQueue,
    registry: HashMap<ObjectId, Registration>,
    stats: SchedulerStats,
    current: Option<CurrentRun>,
}

/// Scheduler state reachable from objects and completers
pub(crate) struct SchedulerShared {
    name: String,
    owner: ThreadContext,
    config: SchedulerConfig,
    ready: Arc<ReadyQueue>,
    flags: Arc<ControlFlags>,
    clock: Arc<dyn Clock>,
    allocator: Arc<dyn Allocator>,
    sink: Arc<dyn StatsSink>,
    observer: Mutex<Option<Arc<dyn SchedulerObserver>>>,
    local: Mutex<LocalState>,
    running: AtomicBool,
}

/// Clears the running flag when a loop call returns or unwinds
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl SchedulerShared {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn now(&self) -> Tick {
        self.clock.now()
    }

    pub fn is_owner(&self) -> bool {
        self.owner.is_current()
    }

    pub fn ensure_owner(&self, op: &str) {
        self.owner.ensure_current(op);
    }

    pub fn is_attached(&self, id: ObjectId) -> bool {
        self.ready.is_attached(id)
    }

    pub fn link(&self, id: ObjectId) -> Option<QueueLink> {
        self.ready.link(id)
    }

    fn enter_loop(&self, op: &str) -> Result<RunningGuard<'_>, SchedulerError> {
        self.ensure_owner(op);
        if self.running.swap(true, Ordering::AcqRel) {
            debug!(name = %self.name, op, "SchedulerShared::enter_loop: already running");
            return Err(SchedulerError::AlreadyRunning(self.name.clone()));
        }
        Ok(RunningGuard(&self.running))
    }

    /// Priority an object arms with: its current value, or the last one recorded
    pub fn priority_of(&self, id: ObjectId) -> Priority {
        let task = self.local.lock().registry.get(&id).and_then(|r| r.task.upgrade());
        match task {
            Some(task) => task.priority(),
            None => self.ready.link(id).map(|link| link.priority).unwrap_or_default(),
        }
    }

    pub fn attach(&self, id: ObjectId, task: &Arc<dyn Dispatch>) -> Result<(), SchedulerError> {
        debug!(%id, name = task.name(), "SchedulerShared::attach: called");
        self.ready.attach(id, task.priority())?;
        self.local.lock().registry.insert(
            id,
            Registration {
                name: task.name().to_string(),
                task: Arc::downgrade(task),
                runs: 0,
                errors: 0,
                run_time: Duration::ZERO,
            },
        );
        Ok(())
    }

    pub fn detach(&self, id: ObjectId) {
        debug!(%id, "SchedulerShared::detach: called");
        self.ensure_owner("ActiveObject::remove_from_scheduler");
        self.cancel_request(id);
        self.ready.detach(id);
        let mut local = self.local.lock();
        local.timers.remove(id);
        local.registry.remove(&id);
    }

    pub fn set_busy(&self, id: ObjectId, priority: Priority, op: &str) {
        self.ensure_owner(op);
        self.ready.arm(id, priority, None, op);
    }

    pub fn after(&self, id: ObjectId, priority: Priority, delay: Tick, op: &str) -> Result<(), SchedulerError> {
        debug!(%id, delay, op, "SchedulerShared::after: called");
        self.ensure_owner(op);
        self.ready.check_armable(id, op);

        let wake_at = self.now().saturating_add(delay);
        let earliest = {
            let mut local = self.local.lock();
            let previous = local.timers.next_deadline();
            local.timers.add(id, wake_at)?;
            previous.is_none_or(|previous| wake_at < previous)
        };
        self.ready.arm(id, priority, Some(wake_at), op);

        if earliest {
            let observer = self.observer.lock().take();
            if let Some(observer) = observer {
                debug!(%id, delay, "SchedulerShared::after: new earliest deadline, notifying observer");
                observer.timer_callback(delay);
            }
        }
        Ok(())
    }

    pub fn run_if_not_ready(&self, id: ObjectId, priority: Priority, delay: Tick) -> Result<bool, SchedulerError> {
        debug!(%id, delay, "SchedulerShared::run_if_not_ready: called");
        self.ensure_owner("ActiveObject::run_if_not_ready");
        let Some(link) = self.ready.link(id) else {
            panic!("ActiveObject::run_if_not_ready: object {} is not attached to a scheduler", id);
        };
        if link.state.is_busy() {
            debug!(%id, state = %link.state, "SchedulerShared::run_if_not_ready: already armed");
            return Ok(false);
        }

        if delay == 0 {
            self.ready.arm(id, priority, None, "ActiveObject::run_if_not_ready");
            self.complete(id, RequestStatus::None);
        } else {
            self.after(id, priority, delay, "ActiveObject::run_if_not_ready")?;
        }
        Ok(true)
    }

    /// Cross-thread completion entry point
    pub fn complete(&self, id: ObjectId, status: RequestStatus) {
        self.ready.complete(id, status);
        let observer = self.observer.lock().take();
        if let Some(observer) = observer {
            debug!(%id, "SchedulerShared::complete: notifying observer");
            observer.ready_callback();
        }
    }

    pub fn cancel(&self, id: ObjectId) {
        debug!(%id, "SchedulerShared::cancel: called");
        self.ensure_owner("ActiveObject::cancel");
        if !self.ready.is_attached(id) {
            panic!("ActiveObject::cancel: object {} is not attached to a scheduler", id);
        }
        self.cancel_request(id);
    }

    fn cancel_request(&self, id: ObjectId) {
        let Some(link) = self.ready.link(id) else {
            return;
        };
        if !link.state.is_busy() {
            debug!(%id, state = %link.state, "SchedulerShared::cancel_request: nothing outstanding");
            return;
        }

        let (name, task) = {
            let mut local = self.local.lock();
            let (name, task) = match local.registry.get(&id) {
                Some(reg) => (reg.name.clone(), reg.task.upgrade()),
                None => (String::new(), None),
            };
            match local.current.as_mut() {
                // The body holds its own task; dispatch calls do_cancel after it returns
                Some(current) if current.id == id => {
                    debug!(%id, "SchedulerShared::cancel_request: cancelled from its own body, deferring do_cancel");
                    current.cancel_deferred = true;
                    (name, None)
                }
                _ => (name, task),
            }
        };
        if let Some(task) = task {
            task.do_cancel();
        }

        let previous = self.ready.cancel_link(id);
        let mut local = self.local.lock();
        if previous == Membership::Timer {
            local.timers.remove(id);
        }
        local.stats.total_cancels += 1;
        drop(local);

        debug!(%id, ?previous, "SchedulerShared::cancel_request: cancelled");
        self.sink.on_cancel(id, &name);
    }

    /// Move every expired timer into the ready queue
    fn promote_expired(&self, now: Tick) -> usize {
        let expired = {
            let mut local = self.local.lock();
            let expired = local.timers.pop_expired(now);
            local.stats.total_timer_expirations += expired.len() as u64;
            expired
        };
        for id in &expired {
            self.ready.insert(*id);
        }
        expired.len()
    }

    fn next_delay(&self, now: Tick) -> Option<Tick> {
        self.local.lock().timers.peek_delay(now)
    }

    /// Run one popped object's task body and apply its outcome
    fn dispatch(self: &Arc<Self>, id: ObjectId, status: RequestStatus) -> Result<(), SchedulerError> {
        let task = self.local.lock().registry.get(&id).and_then(|reg| reg.task.upgrade());
        let Some(task) = task else {
            warn!(%id, "SchedulerShared::dispatch: object is gone, skipping");
            self.ready.finish_run(id);
            return Ok(());
        };
        debug!(%id, name = task.name(), %status, "SchedulerShared::dispatch: running");

        self.local.lock().current = Some(CurrentRun {
            id,
            cancel_deferred: false,
        });
        let mut cx = RunContext::new(id, status, self);
        let started = Instant::now();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| task.run(&mut cx)));
        let elapsed = started.elapsed();
        let armed = cx.armed();

        let current = self.local.lock().current.take();
        if current.is_some_and(|current| current.cancel_deferred) {
            debug!(%id, "SchedulerShared::dispatch: running deferred do_cancel");
            task.do_cancel();
        }

        let result = outcome.unwrap_or_else(|payload| Err(TaskError::from_panic(payload)));

        {
            let mut local = self.local.lock();
            if let Some(reg) = local.registry.get_mut(&id) {
                reg.runs += 1;
                reg.run_time += elapsed;
                if result.is_err() {
                    reg.errors += 1;
                }
            }
            local.stats.total_runs += 1;
            local.stats.total_run_time_us += elapsed.as_micros() as u64;
        }
        self.sink.on_run(id, task.name(), elapsed);

        match result {
            Ok(rearm) => self.apply_rearm(id, task.priority(), rearm, armed),
            Err(err) => {
                self.ready.finish_run(id);
                let disposition = task.run_error(&err);
                self.sink.on_error(id, task.name(), &err, disposition);
                let mut local = self.local.lock();
                match disposition {
                    ErrorDisposition::Handled => {
                        local.stats.total_errors_handled += 1;
                        warn!(%id, name = task.name(), error = %err, "Task error handled");
                        Ok(())
                    }
                    ErrorDisposition::Unhandled => {
                        local.stats.total_errors_unhandled += 1;
                        error!(%id, name = task.name(), error = %err, "Unhandled task error, stopping loop");
                        Err(SchedulerError::TaskFailed {
                            name: task.name().to_string(),
                            source: err,
                        })
                    }
                }
            }
        }
    }

    fn apply_rearm(&self, id: ObjectId, priority: Priority, rearm: Rearm, armed: bool) -> Result<(), SchedulerError> {
        if !self.ready.is_attached(id) {
            debug!(%id, "SchedulerShared::apply_rearm: object detached during run");
            return Ok(());
        }
        if armed && rearm != Rearm::Done {
            panic!(
                "object {} armed a request with RunContext::set_busy and then returned {:?}",
                id, rearm
            );
        }

        match rearm {
            Rearm::Done => {
                self.ready.finish_run(id);
                Ok(())
            }
            Rearm::Pend => {
                self.ready.arm(id, priority, None, "Rearm::Pend");
                Ok(())
            }
            Rearm::ReadyNow => {
                self.ready.arm(id, priority, None, "Rearm::ReadyNow");
                self.complete(id, RequestStatus::None);
                Ok(())
            }
            Rearm::After(delay) => self.after(id, priority, delay, "Rearm::After").inspect_err(|_| {
                self.ready.finish_run(id);
            }),
        }
    }
}

/// Builder for a thread's scheduler
pub struct SchedulerBuilder {
    name: String,
    config: SchedulerConfig,
    clock: Option<Arc<dyn Clock>>,
    allocator: Option<Arc<dyn Allocator>>,
    stats_sink: Arc<dyn StatsSink>,
}

impl SchedulerBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: SchedulerConfig::default(),
            clock: None,
            allocator: None,
            stats_sink: Arc::new(NoopStats),
        }
    }

    pub fn config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn allocator(mut self, allocator: Arc<dyn Allocator>) -> Self {
        self.allocator = Some(allocator);
        self
    }

    pub fn stats_sink(mut self, sink: Arc<dyn StatsSink>) -> Self {
        self.stats_sink = sink;
        self
    }

    pub fn ready_queue_reserve(mut self, reserve: usize) -> Self {
        self.config.ready_queue_reserve = reserve;
        self
    }

    /// Install the scheduler on the calling thread
    pub fn init(self) -> Result<Scheduler, SchedulerError> {
        debug!(name = %self.name, config = ?self.config, "SchedulerBuilder::init: called");
        let owner = ThreadContext::current();

        INSTALLED.with(|slot| {
            let mut slot = slot.borrow_mut();
            if slot.as_ref().and_then(Weak::upgrade).is_some() {
                debug!(thread = owner.name(), "SchedulerBuilder::init: thread already has a scheduler");
                return Err(SchedulerError::AlreadyInstalled(owner.name().to_string()));
            }

            let clock: Arc<dyn Clock> = match self.clock {
                Some(clock) => clock,
                None => Arc::new(MonotonicClock::new(self.config.tick())),
            };
            let allocator: Arc<dyn Allocator> = match (self.allocator, self.config.memory_limit) {
                (Some(allocator), _) => allocator,
                (None, Some(limit)) => Arc::new(BoundedAllocator::new(limit)),
                (None, None) => Arc::new(SystemAllocator::new()),
            };

            let ready = Arc::new(ReadyQueue::new(self.config.ready_queue_reserve, Arc::clone(&allocator))?);
            let shared = Arc::new(SchedulerShared {
                name: self.name,
                owner,
                config: self.config,
                ready,
                flags: Arc::new(ControlFlags::default()),
                clock,
                local: Mutex::new(LocalState {
                    timers: TimerQueue::new(Arc::clone(&allocator)),
                    registry: HashMap::new(),
                    stats: SchedulerStats::default(),
                    current: None,
                }),
                allocator,
                sink: self.stats_sink,
                observer: Mutex::new(None),
                running: AtomicBool::new(false),
            });

            *slot = Some(Arc::downgrade(&shared));
            info!(name = %shared.name, thread = shared.owner.name(), "Scheduler installed");
            Ok(Scheduler { shared })
        })
    }
}

/// Per-thread cooperative scheduler for active objects
///
/// At most one scheduler is installed per thread. Objects attach to it with
/// `ActiveObject::add_to_scheduler`; the run loop then executes their task
/// bodies in priority order as their requests complete.
pub struct Scheduler {
    shared: Arc<SchedulerShared>,
}

impl Scheduler {
    /// Install a scheduler on the calling thread
    pub fn init(
        name: impl Into<String>,
        allocator: Arc<dyn Allocator>,
        ready_queue_reserve: usize,
    ) -> Result<Self, SchedulerError> {
        Self::builder(name)
            .allocator(allocator)
            .ready_queue_reserve(ready_queue_reserve)
            .init()
    }

    pub fn builder(name: impl Into<String>) -> SchedulerBuilder {
        SchedulerBuilder::new(name)
    }

    /// Whether the calling thread has a live scheduler
    pub fn is_installed() -> bool {
        INSTALLED
            .try_with(|slot| slot.borrow().as_ref().and_then(Weak::upgrade).is_some())
            .unwrap_or(false)
    }

    pub(crate) fn shared(&self) -> &Arc<SchedulerShared> {
        &self.shared
    }

    /// Detach every remaining object and uninstall the scheduler
    pub fn cleanup(self) {
        debug!(name = %self.shared.name, "Scheduler::cleanup: called");
        self.shared.ensure_owner("Scheduler::cleanup");
        let remaining: Vec<_> = self.shared.local.lock().registry.keys().copied().collect();
        for id in remaining {
            warn!(%id, scheduler = %self.shared.name, "Scheduler::cleanup: object still attached, detaching");
            self.shared.detach(id);
        }
        info!(name = %self.shared.name, "Scheduler cleaned up");
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn owner(&self) -> &ThreadContext {
        &self.shared.owner
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.shared.clock
    }

    pub fn allocator(&self) -> &Arc<dyn Allocator> {
        &self.shared.allocator
    }

    pub fn now(&self) -> Tick {
        self.shared.now()
    }

    /// Handle for stop/suspend/resume from other threads
    pub fn control(&self) -> SchedulerControl {
        SchedulerControl {
            flags: Arc::clone(&self.shared.flags),
            ready: Arc::downgrade(&self.shared.ready),
        }
    }

    /// Run the blocking loop until a stop is requested or a task fails
    pub fn start_scheduler(&self) -> Result<(), SchedulerError> {
        debug!(name = %self.shared.name, "Scheduler::start_scheduler: called");
        let shared = &self.shared;
        let _running = shared.enter_loop("Scheduler::start_scheduler")?;
        shared.flags.clear_stop();
        info!(name = %shared.name, "Scheduler loop started");

        loop {
            let generation = shared.ready.generation();
            if shared.flags.stop_requested() {
                debug!("Scheduler::start_scheduler: stop requested");
                break;
            }
            if shared.flags.is_suspended() {
                debug!("Scheduler::start_scheduler: suspended, waiting for resume");
                shared.flags.wait_while_suspended();
                continue;
            }

            let now = shared.now();
            shared.promote_expired(now);
            let timeout = shared.next_delay(now).map(|delay| shared.clock.ticks_to_duration(delay));

            if let Some((id, status)) = shared.ready.wait_and_pop_top(timeout, generation) {
                shared.dispatch(id, status)?;
            }
        }

        info!(name = %shared.name, "Scheduler loop stopped");
        Ok(())
    }

    /// Run up to `max_count` ready objects without blocking
    pub fn run_non_blocking(&self, max_count: usize) -> Result<RunReport, SchedulerError> {
        debug!(max_count, "Scheduler::run_non_blocking: called");
        let shared = &self.shared;
        let _running = shared.enter_loop("Scheduler::run_non_blocking")?;

        let mut ran = 0;
        if !shared.flags.is_suspended() {
            while ran < max_count {
                shared.promote_expired(shared.now());
                let Some((id, status)) = shared.ready.pop_top() else {
                    break;
                };
                shared.dispatch(id, status)?;
                ran += 1;
                if shared.flags.is_suspended() {
                    debug!("Scheduler::run_non_blocking: suspended mid-batch");
                    break;
                }
            }
        } else {
            debug!("Scheduler::run_non_blocking: suspended, running nothing");
        }

        let now = shared.now();
        shared.promote_expired(now);
        let report = RunReport {
            ran,
            ready: shared.ready.len(),
            next_delay: shared.next_delay(now),
        };
        debug!(?report, "Scheduler::run_non_blocking: done");
        Ok(report)
    }

    pub fn stop_scheduler(&self) {
        self.control().stop_scheduler();
    }

    pub fn suspend_scheduler(&self) {
        self.control().suspend_scheduler();
    }

    pub fn resume_scheduler(&self) {
        self.control().resume_scheduler();
    }

    /// Install a one-shot observer, replacing any previous one
    pub fn register_for_callback(&self, observer: Arc<dyn SchedulerObserver>) {
        debug!("Scheduler::register_for_callback: called");
        self.shared.ensure_owner("Scheduler::register_for_callback");
        *self.shared.observer.lock() = Some(observer);
    }

    pub fn unregister_callback(&self) {
        debug!("Scheduler::unregister_callback: called");
        self.shared.ensure_owner("Scheduler::unregister_callback");
        self.shared.observer.lock().take();
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    pub fn ready_len(&self) -> usize {
        self.shared.ready.len()
    }

    pub fn timer_len(&self) -> usize {
        self.shared.ensure_owner("Scheduler::timer_len");
        self.shared.local.lock().timers.len()
    }

    pub fn attached(&self) -> usize {
        self.shared.ready.attached()
    }

    /// Which queues currently hold `id`
    pub fn queue_presence(&self, id: ObjectId) -> QueuePresence {
        self.shared.ensure_owner("Scheduler::queue_presence");
        QueuePresence {
            ready: self.shared.ready.contains(id),
            timer: self.shared.local.lock().timers.contains(id),
        }
    }

    pub fn stats(&self) -> SchedulerStats {
        self.shared.ensure_owner("Scheduler::stats");
        let local = self.shared.local.lock();
        SchedulerStats {
            total_completions: self.shared.ready.completions(),
            peak_ready_depth: self.shared.ready.peak_depth(),
            peak_timer_depth: local.timers.peak_depth(),
            ..local.stats.clone()
        }
    }

    /// Per-object statistics, ordered by id
    pub fn object_stats(&self) -> Vec<ObjectStats> {
        self.shared.ensure_owner("Scheduler::object_stats");
        let local = self.shared.local.lock();
        let mut stats: Vec<_> = local
            .registry
            .iter()
            .filter_map(|(id, reg)| {
                let link = self.shared.ready.link(*id)?;
                Some(ObjectStats {
                    id: *id,
                    name: reg.name.clone(),
                    priority: link.priority,
                    state: link.state,
                    runs: reg.runs,
                    errors: reg.errors,
                    run_time_us: reg.run_time.as_micros() as u64,
                })
            })
            .collect();
        stats.sort_by_key(|s| s.id);
        stats
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if !self.shared.owner.is_current() {
            return;
        }
        let this = Arc::as_ptr(&self.shared);
        let _ = INSTALLED.try_with(|slot| {
            if let Ok(mut slot) = slot.try_borrow_mut() {
                if slot.as_ref().is_some_and(|weak| std::ptr::eq(weak.as_ptr(), this)) {
                    *slot = None;
                }
            }
        });
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("name", &self.shared.name)
            .field("owner", &self.shared.owner.name())
            .field("ready", &self.shared.ready.len())
            .finish()
    }
}
