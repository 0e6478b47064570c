//! Evaluation dispatcher: pairs free worker proxies with queued work items.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::proxy::{AssignOutcome, WorkerProxy};
use super::queue::CapabilityQueue;
use super::work_item::WorkItem;
use crate::error::DispatchError;
use crate::protocol::{SimulationResult, WorkerStatus};
use crate::transport::Transport;

/// Owns the worker proxies and the capability queue.
pub struct Dispatcher {
    queue: Arc<CapabilityQueue>,
    proxies: RwLock<HashMap<String, Arc<WorkerProxy>>>,
    transport: Arc<dyn Transport>,
}

impl Dispatcher {
    pub fn new(transport: Arc<dyn Transport>) -> Arc<Self> {
        Arc::new(Self {
            queue: Arc::new(CapabilityQueue::new()),
            proxies: RwLock::new(HashMap::new()),
            transport,
        })
    }

    /// Get or create the proxy for a worker and apply its presence and status.
    pub async fn register_worker(
        &self,
        worker_id: &str,
        available: bool,
        status: WorkerStatus,
    ) -> Arc<WorkerProxy> {
        let proxy = {
            let mut proxies = self.proxies.write().await;
            Arc::clone(proxies.entry(worker_id.to_string()).or_insert_with(|| {
                info!(worker = %worker_id, "Registered simulation worker");
                Arc::new(WorkerProxy::new(
                    worker_id,
                    Arc::clone(&self.queue),
                    Arc::clone(&self.transport),
                ))
            }))
        };
        proxy.set_available(available).await;
        proxy.handle_status(status).await;
        proxy
    }

    pub async fn worker(&self, worker_id: &str) -> Option<Arc<WorkerProxy>> {
        self.proxies.read().await.get(worker_id).cloned()
    }

    pub async fn worker_count(&self) -> usize {
        self.proxies.read().await.len()
    }

    /// Route a worker's result to its proxy.
    pub async fn handle_result(
        &self,
        worker_id: &str,
        result: SimulationResult,
    ) -> Result<bool, DispatchError> {
        let proxy = self
            .worker(worker_id)
            .await
            .ok_or_else(|| DispatchError::UnknownWorker(worker_id.to_string()))?;
        Ok(proxy.handle_result(result).await)
    }

    /// Append an item to the tail of its capability queue.
    pub async fn enqueue(&self, item: WorkItem) {
        self.queue.push_back(item).await;
    }

    /// One matching pass. Returns the number of items handed to workers.
    pub async fn tick(&self) -> usize {
        let proxies: Vec<Arc<WorkerProxy>> = self.proxies.read().await.values().cloned().collect();
        let mut assigned = 0;

        for proxy in proxies {
            if !proxy.is_free().await {
                continue;
            }
            let Some(capability) = proxy.capability().await else {
                continue;
            };
            let Some(item) = self.next_live_item(&capability).await else {
                continue;
            };

            match proxy.try_assign(item).await {
                AssignOutcome::Assigned => assigned += 1,
                AssignOutcome::Rejected(item) => {
                    // Proxy changed between the free check and the claim.
                    debug!(worker = %proxy.worker_id(), item_id = %item.item_id(), "Claim lost, item restored");
                    self.queue.push_front(item).await;
                }
                AssignOutcome::DeliveryFailed => {
                    warn!(worker = %proxy.worker_id(), "Delivery failed, item moved to queue tail");
                }
            }
        }

        if assigned > 0 {
            debug!(assigned, "Dispatch tick");
        }
        assigned
    }

    /// Pop the oldest item for a capability whose waiter is still listening.
    async fn next_live_item(&self, capability: &str) -> Option<WorkItem> {
        while let Some(item) = self.queue.pop_front(capability).await {
            if !item.is_abandoned() {
                return Some(item);
            }
            debug!(item_id = %item.item_id(), "Dropped abandoned work item");
        }
        None
    }

    /// Signal-cancel and drop every queued item of a task. Items already held
    /// by a proxy resolve on their own. Returns the number of cancelled items.
    pub async fn cancel_all_for_task(&self, task_id: &str) -> usize {
        let removed = self.queue.remove_task(task_id).await;
        let count = removed.len();
        // Queue lock is released here; signals fire without any lock held.
        for mut item in removed {
            if let Err(e) = item.signal_cancelled() {
                debug!(error = %e, "Queued item was already signalled");
            }
        }
        if count > 0 {
            info!(task_id = %task_id, count, "Cancelled queued work items");
        }
        count
    }

    pub fn queue(&self) -> &Arc<CapabilityQueue> {
        &self.queue
    }
}

/// Spawn the periodic matching loop.
pub fn spawn_dispatch_loop(
    dispatcher: Arc<Dispatcher>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            dispatcher.tick().await;
        }
    })
}
