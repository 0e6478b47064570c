//! Work dispatch: farming evaluations out to remote simulation workers.
//!
//! Core components:
//! - `work_item`: WorkItem + Completion (one-shot completion signal)
//! - `queue`: CapabilityQueue (FIFO per simulation configuration)
//! - `proxy`: WorkerProxy state machine (Offline → Idle → Assigned)
//! - `dispatcher`: Dispatcher matching loop and task-wide cancellation

pub mod dispatcher;
pub mod proxy;
pub mod queue;
pub mod work_item;

pub use dispatcher::{Dispatcher, spawn_dispatch_loop};
pub use proxy::{AssignOutcome, WorkerPhase, WorkerProxy};
pub use queue::CapabilityQueue;
pub use work_item::{Completion, Evaluation, WorkItem, WorkItemFactory, WorkPayload};
