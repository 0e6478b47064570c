//! In-process transport. Outbound messages land on a channel the caller reads.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock, mpsc};

use super::{Transport, encode_for};
use crate::error::TransportError;
use crate::protocol::{Message, OptimizationToolStatus, PresenceStatus};

/// A message handed to the transport for delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    pub to: String,
    pub message: Message,
}

/// Transport that delivers into an unbounded channel.
pub struct MemoryTransport {
    outbox: mpsc::UnboundedSender<Outbound>,
    /// Recipients whose sends fail, to exercise delivery-failure recovery.
    failing: RwLock<HashSet<String>>,
    published: Mutex<Vec<PresenceStatus>>,
}

impl MemoryTransport {
    /// Create the transport and the receiving end of its outbox.
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            outbox: tx,
            failing: RwLock::new(HashSet::new()),
            published: Mutex::new(Vec::new()),
        });
        (transport, rx)
    }

    /// Make every send to `to` fail until restored.
    pub async fn fail_sends_to(&self, to: &str) {
        self.failing.write().await.insert(to.to_string());
    }

    pub async fn restore_sends_to(&self, to: &str) {
        self.failing.write().await.remove(to);
    }

    /// All presence statuses published so far, oldest first.
    pub async fn published(&self) -> Vec<PresenceStatus> {
        self.published.lock().await.clone()
    }

    /// The most recently published aggregate tool status.
    pub async fn last_tool_status(&self) -> Option<OptimizationToolStatus> {
        self.published
            .lock()
            .await
            .iter()
            .rev()
            .find_map(|status| match status {
                PresenceStatus::OptimizationTool(tool) => Some(tool.clone()),
                _ => None,
            })
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&self, to: &str, message: &Message) -> Result<(), TransportError> {
        if self.failing.read().await.contains(to) {
            return Err(TransportError::SendFailed {
                to: to.to_string(),
                reason: "delivery refused".to_string(),
            });
        }
        // Same encoding path as a real transport, so unencodable messages fail here too.
        encode_for(to, message)?;
        self.outbox
            .send(Outbound {
                to: to.to_string(),
                message: message.clone(),
            })
            .map_err(|_| TransportError::Closed)
    }

    async fn publish_status(&self, status: &PresenceStatus) -> Result<(), TransportError> {
        self.published.lock().await.push(status.clone());
        Ok(())
    }
}
