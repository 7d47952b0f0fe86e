//! Ready queue and per-object queue links
//!
//! The ready queue is the one structure shared across threads. Besides the
//! ordered entries it owns the link of every attached object (state, status,
//! membership, sequence number), so a completion from any thread validates
//! and updates an object under a single lock.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};
use std::mem::size_of;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::alloc::Allocator;
use crate::clock::Tick;
use crate::error::SchedulerError;
use crate::object::{ObjectId, ObjectState, Priority, RequestStatus};

/// Smallest growth step when the ready queue runs out of reserved slots
const MIN_GROWTH: usize = 8;

/// Which queue an object currently sits in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Membership {
    #[default]
    None,
    Ready,
    Timer,
}

/// Physical presence of an object in the two queues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueuePresence {
    pub ready: bool,
    pub timer: bool,
}

/// Ready-queue ordering: higher priority first, then earlier insertion
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct ReadyKey {
    priority: Reverse<Priority>,
    seq: u64,
}

/// Scheduling metadata for one attached object
#[derive(Debug, Clone)]
pub(crate) struct QueueLink {
    pub priority: Priority,
    pub seq: u64,
    pub wake_at: Option<Tick>,
    pub membership: Membership,
    pub state: ObjectState,
    pub status: RequestStatus,
}

impl QueueLink {
    fn new(priority: Priority) -> Self {
        Self {
            priority,
            seq: 0,
            wake_at: None,
            membership: Membership::None,
            state: ObjectState::Idle,
            status: RequestStatus::None,
        }
    }

    fn key(&self) -> ReadyKey {
        ReadyKey {
            priority: Reverse(self.priority),
            seq: self.seq,
        }
    }
}

/// Bytes charged to the allocator for every reserved ready-queue slot
pub(crate) const READY_SLOT_BYTES: usize =
    size_of::<ReadyKey>() + size_of::<ObjectId>() * 2 + size_of::<QueueLink>();

struct ReadyInner {
    entries: BTreeMap<ReadyKey, ObjectId>,
    links: HashMap<ObjectId, QueueLink>,
    next_seq: u64,
    capacity: usize,
    interrupts: u64,
    completions: u64,
    peak_depth: usize,
}

/// Thread-safe priority queue of objects whose request has completed
pub struct ReadyQueue {
    inner: Mutex<ReadyInner>,
    signal: Condvar,
    allocator: Arc<dyn Allocator>,
}

impl ReadyQueue {
    /// Create a queue with `reserve` slots charged to `allocator` up front
    pub fn new(reserve: usize, allocator: Arc<dyn Allocator>) -> Result<Self, SchedulerError> {
        debug!(reserve, "ReadyQueue::new: called");
        allocator.allocate(reserve * READY_SLOT_BYTES)?;
        Ok(Self {
            inner: Mutex::new(ReadyInner {
                entries: BTreeMap::new(),
                links: HashMap::with_capacity(reserve),
                next_seq: 0,
                capacity: reserve,
                interrupts: 0,
                completions: 0,
                peak_depth: 0,
            }),
            signal: Condvar::new(),
            allocator,
        })
    }

    /// Register a link for a newly attached object, growing capacity if needed
    pub(crate) fn attach(&self, id: ObjectId, priority: Priority) -> Result<(), SchedulerError> {
        debug!(%id, %priority, "ReadyQueue::attach: called");
        let mut inner = self.inner.lock();
        assert!(!inner.links.contains_key(&id), "object {} is already attached", id);

        if inner.links.len() >= inner.capacity {
            let grown = (inner.capacity * 2).max(inner.capacity + MIN_GROWTH);
            debug!(from = inner.capacity, to = grown, "ReadyQueue::attach: growing capacity");
            self.allocator.allocate((grown - inner.capacity) * READY_SLOT_BYTES)?;
            inner.capacity = grown;
        }

        inner.links.insert(id, QueueLink::new(priority));
        Ok(())
    }

    /// Drop an object's link and any queued entry
    pub(crate) fn detach(&self, id: ObjectId) -> bool {
        debug!(%id, "ReadyQueue::detach: called");
        let mut inner = self.inner.lock();
        let Some(link) = inner.links.remove(&id) else {
            return false;
        };
        if link.membership == Membership::Ready {
            inner.entries.remove(&link.key());
        }
        true
    }

    pub(crate) fn is_attached(&self, id: ObjectId) -> bool {
        self.inner.lock().links.contains_key(&id)
    }

    /// Snapshot of an object's link
    pub(crate) fn link(&self, id: ObjectId) -> Option<QueueLink> {
        self.inner.lock().links.get(&id).cloned()
    }

    /// Panic unless `id` is attached and has no outstanding request
    pub(crate) fn check_armable(&self, id: ObjectId, op: &str) {
        let inner = self.inner.lock();
        Self::armable_link(&inner, id, op);
    }

    fn armable_link<'a>(inner: &'a ReadyInner, id: ObjectId, op: &str) -> &'a QueueLink {
        let Some(link) = inner.links.get(&id) else {
            panic!("{}: object {} is not attached to a scheduler", op, id);
        };
        if link.state.is_busy() {
            panic!("{}: object {} already has an outstanding request ({})", op, id, link.state);
        }
        link
    }

    /// Move an Idle or Running object to Pending
    ///
    /// With `wake_at` set the object is recorded as a timer member; the
    /// caller has already placed it in the timer queue.
    pub(crate) fn arm(&self, id: ObjectId, priority: Priority, wake_at: Option<Tick>, op: &str) {
        debug!(%id, %priority, ?wake_at, op, "ReadyQueue::arm: called");
        let mut inner = self.inner.lock();
        Self::armable_link(&inner, id, op);
        if let Some(link) = inner.links.get_mut(&id) {
            link.priority = priority;
            link.state = ObjectState::Pending;
            link.status = RequestStatus::Pending;
            link.wake_at = wake_at;
            link.membership = if wake_at.is_some() {
                Membership::Timer
            } else {
                Membership::None
            };
        }
    }

    /// Complete an outstanding request; callable from any thread
    pub fn complete(&self, id: ObjectId, status: RequestStatus) {
        debug!(%id, %status, "ReadyQueue::complete: called");
        assert!(
            status != RequestStatus::Pending,
            "complete: object {} cannot be completed with the pending status",
            id
        );

        let mut inner = self.inner.lock();
        let Some(link) = inner.links.get_mut(&id) else {
            panic!("complete: object {} is not attached to a scheduler", id);
        };
        if link.state != ObjectState::Pending {
            panic!("complete: object {} is {}, not pending", id, link.state);
        }
        if link.membership == Membership::Timer {
            panic!("complete: object {} is waiting on a timer; timer requests complete on expiry", id);
        }
        link.status = status;
        Self::insert_locked(&mut inner, id);
        inner.completions += 1;
        drop(inner);

        self.signal.notify_one();
    }

    /// Insert a pending timer member whose deadline has passed
    pub fn insert(&self, id: ObjectId) {
        debug!(%id, "ReadyQueue::insert: called");
        let mut inner = self.inner.lock();
        match inner.links.get_mut(&id) {
            Some(link) if link.state == ObjectState::Pending && link.membership == Membership::Timer => {
                link.status = RequestStatus::None;
            }
            Some(link) => panic!(
                "insert: object {} is {} in {:?}, expected a pending timer member",
                id, link.state, link.membership
            ),
            None => panic!("insert: object {} is not attached to a scheduler", id),
        }
        Self::insert_locked(&mut inner, id);
        drop(inner);

        self.signal.notify_one();
    }

    fn insert_locked(inner: &mut ReadyInner, id: ObjectId) {
        let ReadyInner {
            entries,
            links,
            next_seq,
            peak_depth,
            ..
        } = inner;

        let seq = *next_seq;
        *next_seq += 1;

        if let Some(link) = links.get_mut(&id) {
            link.seq = seq;
            link.state = ObjectState::Ready;
            link.membership = Membership::Ready;
            link.wake_at = None;
            entries.insert(link.key(), id);
            *peak_depth = (*peak_depth).max(entries.len());
        }
    }

    fn pop_top_locked(inner: &mut ReadyInner) -> Option<(ObjectId, RequestStatus)> {
        let (_, id) = inner.entries.pop_first()?;
        let link = inner
            .links
            .get_mut(&id)
            .unwrap_or_else(|| panic!("ready entry {} has no link", id));
        link.membership = Membership::None;
        link.state = ObjectState::Running;
        Some((id, link.status))
    }

    /// Remove and return the top entry without blocking
    ///
    /// The returned object is marked Running.
    pub fn pop_top(&self) -> Option<(ObjectId, RequestStatus)> {
        Self::pop_top_locked(&mut self.inner.lock())
    }

    /// Current interrupt generation, taken before checking loop flags
    pub(crate) fn generation(&self) -> u64 {
        self.inner.lock().interrupts
    }

    /// Block until an entry is available, `timeout` elapses, or the queue is
    /// interrupted after `generation` was observed
    ///
    /// `None` as timeout waits indefinitely. The returned object is marked
    /// Running.
    pub fn wait_and_pop_top(&self, timeout: Option<Duration>, generation: u64) -> Option<(ObjectId, RequestStatus)> {
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        let mut inner = self.inner.lock();
        loop {
            if let Some(top) = Self::pop_top_locked(&mut inner) {
                return Some(top);
            }
            if inner.interrupts != generation {
                return None;
            }
            match deadline {
                Some(deadline) => {
                    if self.signal.wait_until(&mut inner, deadline).timed_out() {
                        return Self::pop_top_locked(&mut inner);
                    }
                }
                None => self.signal.wait(&mut inner),
            }
        }
    }

    /// Wake any blocked waiter without queueing anything
    pub(crate) fn interrupt(&self) {
        let mut inner = self.inner.lock();
        inner.interrupts += 1;
        drop(inner);
        self.signal.notify_all();
    }

    /// Pull an object out of the queue; a no-op if it is not queued
    pub fn remove(&self, id: ObjectId) -> bool {
        debug!(%id, "ReadyQueue::remove: called");
        Self::remove_locked(&mut self.inner.lock(), id)
    }

    fn remove_locked(inner: &mut ReadyInner, id: ObjectId) -> bool {
        let ReadyInner { entries, links, .. } = inner;
        match links.get_mut(&id) {
            Some(link) if link.membership == Membership::Ready => {
                entries.remove(&link.key());
                link.membership = Membership::None;
                true
            }
            _ => false,
        }
    }

    /// Finish a cancellation: leave the object Idle with status Cancelled
    ///
    /// Returns the membership the object had before.
    pub(crate) fn cancel_link(&self, id: ObjectId) -> Membership {
        let mut inner = self.inner.lock();
        let Some(previous) = inner.links.get(&id).map(|link| link.membership) else {
            return Membership::None;
        };
        Self::remove_locked(&mut inner, id);
        let Some(link) = inner.links.get_mut(&id) else {
            return previous;
        };
        link.membership = Membership::None;
        link.wake_at = None;
        link.state = ObjectState::Idle;
        link.status = RequestStatus::Cancelled;
        previous
    }

    /// Running → Idle after a task body returns without re-arming
    pub(crate) fn finish_run(&self, id: ObjectId) {
        let mut inner = self.inner.lock();
        if let Some(link) = inner.links.get_mut(&id) {
            if link.state == ObjectState::Running {
                link.state = ObjectState::Idle;
            }
        }
    }

    pub(crate) fn contains(&self, id: ObjectId) -> bool {
        let inner = self.inner.lock();
        inner
            .links
            .get(&id)
            .is_some_and(|link| inner.entries.get(&link.key()) == Some(&id))
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn attached(&self) -> usize {
        self.inner.lock().links.len()
    }

    pub(crate) fn completions(&self) -> u64 {
        self.inner.lock().completions
    }

    pub(crate) fn peak_depth(&self) -> usize {
        self.inner.lock().peak_depth
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().capacity
    }
}

impl Drop for ReadyQueue {
    fn drop(&mut self) {
        let capacity = self.inner.get_mut().capacity;
        self.allocator.deallocate(capacity * READY_SLOT_BYTES);
    }
}

/// Scheduler statistics
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct SchedulerStats {
    pub total_runs: u64,
    pub total_completions: u64,
    pub total_timer_expirations: u64,
    pub total_cancels: u64,
    pub total_errors_handled: u64,
    pub total_errors_unhandled: u64,
    pub total_run_time_us: u64,
    pub peak_ready_depth: usize,
    pub peak_timer_depth: usize,
}

/// Per-object statistics for display
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectStats {
    pub id: ObjectId,
    pub name: String,
    pub priority: Priority,
    pub state: ObjectState,
    pub runs: u64,
    pub errors: u64,
    pub run_time_us: u64,
}
