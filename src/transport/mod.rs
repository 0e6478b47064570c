//! Transport abstraction: presence-based, unreliable delivery keyed by identity.
//!
//! Implementations:
//! - `memory`: in-process transport for local runs and tests
//! - `ws`: WebSocket hub remotes connect to

pub mod memory;
pub mod ws;

use async_trait::async_trait;

use crate::error::TransportError;
use crate::protocol::{Message, PresenceStatus};

pub use memory::{MemoryTransport, Outbound};
pub use ws::{Envelope, WsHub};

/// Something that happened on the transport, attributed to a remote identity.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Availability change, optionally with the contact's raw status body.
    Presence {
        from: String,
        available: bool,
        status: Option<String>,
    },
    /// A message body from a contact.
    Message { from: String, body: String },
}

/// Outbound side of the transport.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver a message to one remote. `Ok` means the transport accepted it.
    async fn send(&self, to: &str, message: &Message) -> Result<(), TransportError>;

    /// Advertise our own presence status to every connected remote.
    async fn publish_status(&self, status: &PresenceStatus) -> Result<(), TransportError>;
}

pub(crate) fn encode_for(to: &str, message: &Message) -> Result<String, TransportError> {
    message.encode().map_err(|e| TransportError::SendFailed {
        to: to.to_string(),
        reason: e.to_string(),
    })
}
