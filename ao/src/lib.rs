//! aosched - per-thread active object scheduler
//!
//! Multiplexes many asynchronous units of work ("active objects") onto one
//! thread. Each object arms a single request at a time; when the request
//! completes (from any thread) or its timer expires, the scheduler runs the
//! object's task body on the owning thread, highest priority first.
//!
//! # Core Concepts
//!
//! - **One scheduler per thread**: installed with [`Scheduler::init`] or
//!   [`Scheduler::builder`], removed with [`Scheduler::cleanup`]
//! - **Cross-thread completion**: [`ActiveObject::complete`] and
//!   [`Completer`] are the only operations allowed off the owning thread
//! - **Deterministic order**: priority first, then completion order; timers
//!   expire by deadline and then compete by priority
//! - **Run-to-completion**: task bodies are never preempted; stop and suspend
//!   take effect between bodies
//!
//! # Example
//!
//! ```ignore
//! use aosched::{ActiveObject, Priority, Rearm, RunContext, Scheduler, TaskError};
//!
//! let reader = ActiveObject::new("reader", Priority::NOMINAL, |cx: &mut RunContext<'_>| -> Result<Rearm, TaskError> {
//!     println!("completed with {}", cx.status());
//!     Ok(Rearm::Done)
//! });
//! let sched = Scheduler::builder("main").init()?;
//! reader.add_to_scheduler(&sched)?;
//! reader.set_busy();
//! let completer = reader.completer();
//! std::thread::spawn(move || completer.complete(0));
//! ```
//!
//! # Modules
//!
//! - [`object`] - active objects, priorities and request status
//! - [`scheduler`] - ready/timer queues, run loops, control and observers
//! - [`workload`] - synthetic workload used by the `ao` binary

pub mod alloc;
pub mod cli;
pub mod clock;
pub mod config;
pub mod error;
pub mod object;
pub mod scheduler;
pub mod workload;

// Re-export commonly used types
pub use alloc::{Allocator, BoundedAllocator, SystemAllocator};
pub use clock::{Clock, ManualClock, MonotonicClock, Tick};
pub use config::Config;
pub use error::{AllocError, SchedulerError, TaskError};
pub use object::{
    ActiveObject, ActiveTask, Completer, ErrorDisposition, ObjectId, ObjectState, Priority, Rearm, RequestStatus,
    RunContext,
};
pub use scheduler::{
    Membership, NoopStats, ObjectStats, QueuePresence, RunReport, Scheduler, SchedulerBuilder, SchedulerConfig,
    SchedulerControl, SchedulerObserver, SchedulerStats, StatsSink, ThreadContext,
};
pub use workload::{HostMode, WorkloadConfig, WorkloadReport, run_workload};
