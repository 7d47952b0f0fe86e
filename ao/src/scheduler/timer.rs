//! Timer queue for absolute-deadline requests
//!
//! Owned by the scheduler's thread; no internal locking. Entries are ordered
//! by wake time and then by arming order, so equal deadlines expire in the
//! order they were armed.

use std::collections::{BTreeMap, HashMap};
use std::mem::size_of;
use std::sync::Arc;

use tracing::debug;

use crate::alloc::Allocator;
use crate::clock::Tick;
use crate::error::SchedulerError;
use crate::object::ObjectId;

const MIN_GROWTH: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct TimerKey {
    wake_at: Tick,
    seq: u64,
}

/// Bytes charged to the allocator for every timer slot
pub(crate) const TIMER_SLOT_BYTES: usize = (size_of::<TimerKey>() + size_of::<ObjectId>()) * 2;

/// Priority queue of objects waiting for a wake time
pub struct TimerQueue {
    entries: BTreeMap<TimerKey, ObjectId>,
    keys: HashMap<ObjectId, TimerKey>,
    next_seq: u64,
    capacity: usize,
    peak_depth: usize,
    allocator: Arc<dyn Allocator>,
}

impl TimerQueue {
    pub fn new(allocator: Arc<dyn Allocator>) -> Self {
        Self {
            entries: BTreeMap::new(),
            keys: HashMap::new(),
            next_seq: 0,
            capacity: 0,
            peak_depth: 0,
            allocator,
        }
    }

    /// Queue `id` to wake at `wake_at`
    ///
    /// Fails without side effects if growing the queue is refused by the
    /// allocator.
    pub fn add(&mut self, id: ObjectId, wake_at: Tick) -> Result<(), SchedulerError> {
        debug!(%id, wake_at, "TimerQueue::add: called");
        assert!(!self.keys.contains_key(&id), "object {} is already in the timer queue", id);

        if self.entries.len() >= self.capacity {
            let grown = (self.capacity * 2).max(self.capacity + MIN_GROWTH);
            debug!(from = self.capacity, to = grown, "TimerQueue::add: growing capacity");
            self.allocator.allocate((grown - self.capacity) * TIMER_SLOT_BYTES)?;
            self.capacity = grown;
        }

        let key = TimerKey {
            wake_at,
            seq: self.next_seq,
        };
        self.next_seq += 1;
        self.entries.insert(key, id);
        self.keys.insert(id, key);
        self.peak_depth = self.peak_depth.max(self.entries.len());
        Ok(())
    }

    /// Remove every entry due at or before `now`, earliest deadline first
    pub fn pop_expired(&mut self, now: Tick) -> Vec<ObjectId> {
        let mut expired = Vec::new();
        while let Some(entry) = self.entries.first_entry() {
            if entry.key().wake_at > now {
                break;
            }
            let id = entry.remove();
            self.keys.remove(&id);
            expired.push(id);
        }
        if !expired.is_empty() {
            debug!(now, count = expired.len(), "TimerQueue::pop_expired: expired");
        }
        expired
    }

    /// Ticks until the earliest deadline; zero when one is already due
    pub fn peek_delay(&self, now: Tick) -> Option<Tick> {
        self.next_deadline().map(|wake_at| wake_at.saturating_sub(now))
    }

    pub fn next_deadline(&self) -> Option<Tick> {
        self.entries.keys().next().map(|key| key.wake_at)
    }

    /// Remove `id`; a no-op if it is not queued
    pub fn remove(&mut self, id: ObjectId) -> bool {
        match self.keys.remove(&id) {
            Some(key) => {
                debug!(%id, "TimerQueue::remove: removed");
                self.entries.remove(&key);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.keys.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn peak_depth(&self) -> usize {
        self.peak_depth
    }
}

impl Drop for TimerQueue {
    fn drop(&mut self) {
        self.allocator.deallocate(self.capacity * TIMER_SLOT_BYTES);
    }
}
