//! Active objects and their request bookkeeping types
//!
//! An active object owns one request slot. Arming the slot (`set_busy`,
//! `after`) moves it to Pending; completion or timer expiry makes it Ready;
//! the scheduler then runs its task body.

mod active;
mod priority;
mod status;

pub(crate) use active::Dispatch;
pub use active::{ActiveObject, ActiveTask, Completer, ErrorDisposition, ObjectId, Rearm, RunContext};
pub use priority::Priority;
pub use status::{ObjectState, REQUEST_PENDING, RequestStatus};
