//! Thread affinity for scheduler-owned state

use std::thread::{self, ThreadId};

/// The thread that owns a scheduler
#[derive(Debug, Clone)]
pub struct ThreadContext {
    id: ThreadId,
    name: String,
}

impl ThreadContext {
    /// Capture the calling thread
    pub fn current() -> Self {
        let current = thread::current();
        Self {
            id: current.id(),
            name: current.name().map(str::to_string).unwrap_or_else(|| format!("{:?}", current.id())),
        }
    }

    pub fn id(&self) -> ThreadId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_current(&self) -> bool {
        thread::current().id() == self.id
    }

    /// Panic if the caller is not the owning thread
    pub fn ensure_current(&self, op: &str) {
        if !self.is_current() {
            let caller = thread::current();
            panic!(
                "{} called from thread {} but the scheduler is owned by thread {}",
                op,
                caller.name().map(str::to_string).unwrap_or_else(|| format!("{:?}", caller.id())),
                self.name
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_thread_matches() {
        let ctx = ThreadContext::current();
        assert!(ctx.is_current());
        ctx.ensure_current("test");
    }

    #[test]
    fn test_other_thread_does_not_match() {
        let ctx = ThreadContext::current();
        let result = thread::Builder::new()
            .name("intruder".to_string())
            .spawn(move || {
                assert!(!ctx.is_current());
                ctx.ensure_current("Scheduler::start_scheduler");
            })
            .unwrap()
            .join();

        let payload = result.unwrap_err();
        let message = payload.downcast_ref::<String>().unwrap();
        assert!(message.contains("Scheduler::start_scheduler called from thread intruder"));
    }
}
