//! Worker proxy: local bookkeeping for one remote simulation worker.
//!
//! A proxy holds at most one work item. Any divergence between the worker's
//! self-reported status and the proxy's bookkeeping, a presence loss, a
//! delivery failure or an elapsed item timeout puts the item back on the
//! capability queue (reclaim), unless its waiter already gave up, in which
//! case the item is dropped. The proxy never waits on the worker.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use super::queue::CapabilityQueue;
use super::work_item::WorkItem;
use crate::protocol::{SimulationResult, WorkerStatus};
use crate::transport::Transport;

/// Coarse state of a worker proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerPhase {
    /// Worker not present.
    Offline,
    /// Present and holding nothing.
    Idle,
    /// Holding an item until a result arrives or it is reclaimed.
    Assigned,
}

impl std::fmt::Display for WorkerPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Offline => "offline",
            Self::Idle => "idle",
            Self::Assigned => "assigned",
        };
        write!(f, "{s}")
    }
}

/// Result of offering an item to a proxy.
#[derive(Debug)]
pub enum AssignOutcome {
    /// Delivered; the proxy now holds the item.
    Assigned,
    /// The proxy is not free or advertises another capability. The item is handed back.
    Rejected(WorkItem),
    /// Delivery failed; the item was reclaimed to the tail of its queue.
    DeliveryFailed,
}

#[derive(Debug, Default)]
struct ProxyState {
    available: bool,
    capability: Option<String>,
    assignment: Option<String>,
    current: Option<WorkItem>,
    assigned_at: Option<Instant>,
}

/// Local state machine for one remote worker.
pub struct WorkerProxy {
    worker_id: String,
    state: Mutex<ProxyState>,
    queue: Arc<CapabilityQueue>,
    transport: Arc<dyn Transport>,
}

impl WorkerProxy {
    pub fn new(
        worker_id: impl Into<String>,
        queue: Arc<CapabilityQueue>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            worker_id: worker_id.into(),
            state: Mutex::new(ProxyState::default()),
            queue,
            transport,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Presence update. Going offline reclaims the held item.
    pub async fn set_available(&self, available: bool) {
        let mut state = self.state.lock().await;
        if state.available != available {
            debug!(worker = %self.worker_id, available, "Worker availability changed");
        }
        state.available = available;
        if !available {
            self.reclaim_locked(&mut state, "worker went offline").await;
        }
    }

    /// Reconcile the worker's self-reported status with our bookkeeping.
    pub async fn handle_status(&self, status: WorkerStatus) {
        let mut state = self.state.lock().await;
        trace!(worker = %self.worker_id, ?status, "Worker status");
        state.capability = status.capability;
        state.assignment = status.assignment;

        let Some(item) = state.current.as_ref() else {
            return;
        };

        let divergence = if !state.available {
            Some("worker went offline")
        } else {
            match state.assignment.as_deref() {
                None => Some("worker reports no assignment"),
                Some(id) if id != item.item_id() => Some("worker reports a different assignment"),
                Some(_) => match state.capability.as_deref() {
                    Some(key) if key != item.capability_key() => {
                        Some("worker reconfigured for another capability")
                    }
                    _ => None,
                },
            }
        };

        if let Some(reason) = divergence {
            self.reclaim_locked(&mut state, reason).await;
        }
    }

    /// Whether the proxy can accept new work. Reclaims a timed-out item first.
    pub async fn is_free(&self) -> bool {
        let mut state = self.state.lock().await;
        self.is_free_locked(&mut state).await
    }

    /// Offer an item. On acceptance the item is sent to the worker without
    /// holding the proxy lock.
    pub async fn try_assign(&self, item: WorkItem) -> AssignOutcome {
        let (message, item_id) = {
            let mut state = self.state.lock().await;
            if !self.is_free_locked(&mut state).await {
                return AssignOutcome::Rejected(item);
            }
            if state.capability.as_deref() != Some(item.capability_key()) {
                return AssignOutcome::Rejected(item);
            }
            let message = item.to_message();
            let item_id = item.item_id().to_string();
            state.current = Some(item);
            state.assigned_at = Some(Instant::now());
            (message, item_id)
        };

        match self.transport.send(&self.worker_id, &message).await {
            Ok(()) => {
                debug!(worker = %self.worker_id, item_id = %item_id, "Work item assigned");
                AssignOutcome::Assigned
            }
            Err(e) => {
                warn!(worker = %self.worker_id, item_id = %item_id, error = %e, "Failed to deliver work item");
                let mut state = self.state.lock().await;
                if state
                    .current
                    .as_ref()
                    .is_some_and(|current| current.item_id() == item_id)
                {
                    self.reclaim_locked(&mut state, "delivery failed").await;
                }
                AssignOutcome::DeliveryFailed
            }
        }
    }

    /// Handle a result reported by the worker. Returns whether it matched the held item.
    pub async fn handle_result(&self, result: SimulationResult) -> bool {
        let mut finished = {
            let mut state = self.state.lock().await;
            let matches = state
                .current
                .as_ref()
                .is_some_and(|item| item.item_id() == result.simulation_id);
            if !matches {
                debug!(
                    worker = %self.worker_id,
                    simulation_id = %result.simulation_id,
                    "Ignoring result for an item this worker does not hold"
                );
                return false;
            }

            if !result.success {
                self.reclaim_locked(&mut state, "worker reported failure").await;
                return true;
            }

            state.assigned_at = None;
            let Some(item) = state.current.take() else {
                return false;
            };
            item
        };

        // Signal outside the lock.
        info!(
            worker = %self.worker_id,
            item_id = %finished.item_id(),
            fitness = result.fitness_value,
            "Simulation complete"
        );
        if let Err(e) = finished.signal_success(result.fitness_value) {
            warn!(worker = %self.worker_id, error = %e, "Could not signal work item");
        }
        true
    }

    /// Return the held item to its queue. A no-op when nothing is held.
    pub async fn reclaim(&self) -> bool {
        let mut state = self.state.lock().await;
        self.reclaim_locked(&mut state, "reclaimed").await
    }

    pub async fn phase(&self) -> WorkerPhase {
        let state = self.state.lock().await;
        if state.current.is_some() {
            WorkerPhase::Assigned
        } else if state.available {
            WorkerPhase::Idle
        } else {
            WorkerPhase::Offline
        }
    }

    /// Capability key the worker currently advertises.
    pub async fn capability(&self) -> Option<String> {
        self.state.lock().await.capability.clone()
    }

    /// Id of the held item, if any.
    pub async fn current_item_id(&self) -> Option<String> {
        self.state
            .lock()
            .await
            .current
            .as_ref()
            .map(|item| item.item_id().to_string())
    }

    /// How long the current item has been held.
    pub async fn assignment_age(&self) -> Option<Duration> {
        self.state
            .lock()
            .await
            .assigned_at
            .map(|started| started.elapsed())
    }

    async fn is_free_locked(&self, state: &mut ProxyState) -> bool {
        let timed_out = match (state.current.as_ref(), state.assigned_at) {
            (Some(item), Some(started)) if item.timeout_seconds() != 0 => {
                started.elapsed() > Duration::from_secs(item.timeout_seconds())
            }
            _ => false,
        };
        if timed_out {
            self.reclaim_locked(state, "simulation timed out").await;
        }

        state.available && state.current.is_none() && state.assignment.is_none()
    }

    async fn reclaim_locked(&self, state: &mut ProxyState, reason: &str) -> bool {
        state.assigned_at = None;
        let Some(item) = state.current.take() else {
            return false;
        };
        if item.is_abandoned() {
            debug!(
                worker = %self.worker_id,
                item_id = %item.item_id(),
                reason,
                "Dropping work item nobody waits for"
            );
            return true;
        }
        info!(
            worker = %self.worker_id,
            item_id = %item.item_id(),
            reason,
            "Reclaiming work item"
        );
        self.queue.push_back(item).await;
        true
    }
}
