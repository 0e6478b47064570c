//! Optimizer hub: distributes evolutionary optimization evaluations to remote simulation workers.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod optimization;
pub mod protocol;
pub mod router;
pub mod transport;
