//! Error types for the scheduler and task bodies

use std::any::Any;

use thiserror::Error;

use crate::object::RequestStatus;

/// Failure reported by an allocator when a queue needs to grow
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot allocate {requested} bytes ({in_use} of {limit} in use)")]
pub struct AllocError {
    pub requested: usize,
    pub in_use: usize,
    pub limit: usize,
}

/// Errors surfaced by scheduler operations
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("A scheduler is already installed on thread {0}")]
    AlreadyInstalled(String),

    #[error("Scheduler '{0}' is already running its loop")]
    AlreadyRunning(String),

    #[error("Out of memory: {0}")]
    OutOfMemory(#[from] AllocError),

    #[error("Unhandled error in active object '{name}': {source}")]
    TaskFailed {
        name: String,
        #[source]
        source: TaskError,
    },

    #[error("Failed to spawn thread: {0}")]
    Spawn(#[from] std::io::Error),
}

impl SchedulerError {
    /// Check if this error came out of a task body
    pub fn is_task_failure(&self) -> bool {
        matches!(self, SchedulerError::TaskFailed { .. })
    }

    /// The task error carried by a `TaskFailed`, if any
    pub fn task_error(&self) -> Option<&TaskError> {
        match self {
            SchedulerError::TaskFailed { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Error signalled by an active object's task body
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("failed with code {0}")]
    Code(i32),

    #[error("{0}")]
    Message(String),

    #[error("panicked: {0}")]
    Panicked(String),
}

impl TaskError {
    /// Numeric code handed to `run_error` style handlers
    pub fn code(&self) -> i32 {
        match self {
            TaskError::Code(code) => *code,
            TaskError::Message(_) | TaskError::Panicked(_) => RequestStatus::GeneralError.code(),
        }
    }

    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        TaskError::Panicked(message)
    }
}

impl From<String> for TaskError {
    fn from(message: String) -> Self {
        TaskError::Message(message)
    }
}

impl From<&str> for TaskError {
    fn from(message: &str) -> Self {
        TaskError::Message(message.to_string())
    }
}
