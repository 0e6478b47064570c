//! Turns transport events into dispatcher and registry calls.
//!
//! A remote becomes a contact on its first decodable presence status. Worker
//! contacts may only report results; orchestrator contacts may only issue
//! optimization commands. Everything else is logged and dropped.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::dispatch::{Dispatcher, WorkerProxy};
use crate::error::{DispatchError, ProtocolError};
use crate::optimization::OptimizationRegistry;
use crate::protocol::{Message, PresenceStatus, WorkerStatus};
use crate::transport::{Transport, TransportEvent};

/// What a remote identity is known to be.
#[derive(Clone)]
pub enum Contact {
    /// A simulation worker, backed by its dispatcher proxy.
    Worker(Arc<WorkerProxy>),
    /// A client submitting optimizations.
    Orchestrator,
}

impl Contact {
    pub fn is_worker(&self) -> bool {
        matches!(self, Self::Worker(_))
    }
}

pub struct ContactRouter {
    dispatcher: Arc<Dispatcher>,
    registry: Arc<OptimizationRegistry>,
    transport: Arc<dyn Transport>,
    contacts: RwLock<HashMap<String, Contact>>,
}

impl ContactRouter {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        registry: Arc<OptimizationRegistry>,
        transport: Arc<dyn Transport>,
    ) -> Arc<Self> {
        Arc::new(Self {
            dispatcher,
            registry,
            transport,
            contacts: RwLock::new(HashMap::new()),
        })
    }

    pub async fn contact(&self, jid: &str) -> Option<Contact> {
        self.contacts.read().await.get(jid).cloned()
    }

    /// Consume events until the transport side hangs up.
    pub fn run(self: &Arc<Self>, mut events: mpsc::Receiver<TransportEvent>) -> JoinHandle<()> {
        let router = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                router.handle_event(event).await;
            }
            info!("Transport event stream ended");
        })
    }

    pub async fn handle_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::Presence {
                from,
                available,
                status,
            } => self.handle_presence(&from, available, status.as_deref()).await,
            TransportEvent::Message { from, body } => self.handle_message(&from, &body).await,
        }
    }

    async fn handle_presence(&self, from: &str, available: bool, status: Option<&str>) {
        let Some(body) = status else {
            // Bare availability change for a contact we already know.
            if let Some(Contact::Worker(proxy)) = self.contact(from).await {
                proxy.set_available(available).await;
            }
            return;
        };

        let status = match PresenceStatus::decode(body) {
            Ok(status) => status,
            Err(e) => {
                debug!(from = %from, error = %e, "Dropped undecodable presence status");
                return;
            }
        };

        match status {
            PresenceStatus::SimulationManager {
                simulation_configuration_id,
                simulation_id,
            } => {
                let proxy = self
                    .dispatcher
                    .register_worker(
                        from,
                        available,
                        WorkerStatus::new(simulation_configuration_id, simulation_id),
                    )
                    .await;
                let previous = self
                    .contacts
                    .write()
                    .await
                    .insert(from.to_string(), Contact::Worker(proxy));
                if matches!(previous, Some(Contact::Orchestrator)) {
                    info!(from = %from, "Orchestrator now acts as a simulation worker");
                }
            }
            PresenceStatus::Orchestrator => {
                let previous = self
                    .contacts
                    .write()
                    .await
                    .insert(from.to_string(), Contact::Orchestrator);
                match previous {
                    None => info!(from = %from, "Registered orchestrator"),
                    // Its results would no longer be accepted; stop handing it work.
                    Some(Contact::Worker(proxy)) => {
                        info!(from = %from, "Simulation worker now acts as an orchestrator");
                        proxy.set_available(false).await;
                    }
                    Some(Contact::Orchestrator) => {}
                }
            }
            PresenceStatus::OptimizationTool(_) => {
                debug!(from = %from, "Ignoring optimization tool presence");
            }
        }
    }

    async fn handle_message(&self, from: &str, body: &str) {
        let message = match Message::decode(body) {
            Ok(message) => message,
            Err(e) => {
                warn!(from = %from, error = %e, "Dropped undecodable message");
                return;
            }
        };
        let Some(contact) = self.contact(from).await else {
            debug!(from = %from, kind = message.kind(), "Message from unknown contact");
            return;
        };

        match (contact, message) {
            (
                Contact::Orchestrator,
                Message::StartOptimization {
                    optimization_id,
                    simulation_configuration_id,
                    configuration,
                },
            ) => {
                let error = self
                    .registry
                    .create_task(
                        &optimization_id,
                        Some(from.to_string()),
                        &simulation_configuration_id,
                        configuration,
                    )
                    .await
                    .err()
                    .map(|e| e.to_string());
                self.reply(from, Message::started(&optimization_id, error))
                    .await;
            }
            (Contact::Orchestrator, Message::CancelOptimization { optimization_id }) => {
                let error = self
                    .registry
                    .cancel_task(&optimization_id)
                    .await
                    .err()
                    .map(|e| e.to_string());
                self.reply(from, Message::cancelled(&optimization_id, error))
                    .await;
            }
            (Contact::Orchestrator, Message::GetOptimizationStatus { optimization_id }) => {
                let snapshot = match self.registry.get_task(&optimization_id).await {
                    Some(task) => Ok(task.snapshot().await),
                    None => Err(format!("Unknown ID: {optimization_id}")),
                };
                self.reply(from, Message::status(&optimization_id, snapshot))
                    .await;
            }
            (Contact::Worker(_), Message::SimulationResult(result)) => {
                let simulation_id = result.simulation_id.clone();
                match self.dispatcher.handle_result(from, result).await {
                    Ok(true) => {}
                    Ok(false) => {
                        debug!(worker = %from, simulation_id = %simulation_id, "Stale simulation result")
                    }
                    Err(DispatchError::UnknownWorker(worker)) => {
                        warn!(worker = %worker, "Result from unregistered worker")
                    }
                    Err(e) => warn!(worker = %from, error = %e, "Result not applied"),
                }
            }
            (_, message) => {
                let e = ProtocolError::Unexpected {
                    from: from.to_string(),
                    kind: message.kind().to_string(),
                };
                warn!(error = %e, "Dropped message");
            }
        }
    }

    async fn reply(&self, to: &str, message: Message) {
        if let Err(e) = self.transport.send(to, &message).await {
            warn!(to = %to, kind = message.kind(), error = %e, "Failed to send reply");
        }
    }
}

/// Push every task snapshot to its submitter and republish the aggregate status.
pub fn spawn_progress_forwarder(
    registry: Arc<OptimizationRegistry>,
    transport: Arc<dyn Transport>,
) -> JoinHandle<()> {
    let mut updates = registry.subscribe();
    tokio::spawn(async move {
        loop {
            match updates.recv().await {
                Ok(update) => {
                    if let Some(owner) = &update.owner {
                        let id = update.snapshot.optimization_id.clone();
                        let message = Message::status(&id, Ok(update.snapshot));
                        if let Err(e) = transport.send(owner, &message).await {
                            warn!(to = %owner, task_id = %id, error = %e, "Failed to forward progress");
                        }
                    }
                    registry.publish_status().await;
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "Progress forwarder lagged behind task updates");
                    registry.publish_status().await;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
