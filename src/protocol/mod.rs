//! Wire protocol: messages and presence statuses exchanged with remotes.
//!
//! Everything arriving from the transport is decoded exactly once into one of
//! the tagged enums here and matched exhaustively by the router.

pub mod messages;
pub mod status;

pub use messages::{Message, Parameter, ReplyStatus, SimulationResult};
pub use status::{
    CandidateRecord, OptimizationToolStatus, PresenceStatus, TaskSnapshot, TaskState, WorkerStatus,
};
