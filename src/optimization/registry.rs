//! Registry of live optimization tasks, keyed by id.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{RwLock, broadcast};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::config::OptimizationConfiguration;
use super::ga::GeneticAlgorithm;
use super::method::{Method, MethodFactory};
use super::task::{OptimizationTask, TaskUpdate};
use crate::config::RegistryConfig;
use crate::dispatch::Dispatcher;
use crate::error::RegistryError;
use crate::protocol::{OptimizationToolStatus, PresenceStatus};
use crate::transport::Transport;

pub struct OptimizationRegistry {
    config: RegistryConfig,
    dispatcher: Arc<Dispatcher>,
    transport: Arc<dyn Transport>,
    method_factory: MethodFactory,
    tasks: RwLock<HashMap<String, Arc<OptimizationTask>>>,
    updates: broadcast::Sender<TaskUpdate>,
}

impl OptimizationRegistry {
    /// Registry running the default genetic algorithm.
    pub fn new(
        config: RegistryConfig,
        dispatcher: Arc<Dispatcher>,
        transport: Arc<dyn Transport>,
    ) -> Arc<Self> {
        Self::with_method_factory(
            config,
            dispatcher,
            transport,
            Arc::new(|cfg: &OptimizationConfiguration| {
                GeneticAlgorithm::from_configuration(cfg).map(|ga| Box::new(ga) as Box<dyn Method>)
            }),
        )
    }

    pub fn with_method_factory(
        config: RegistryConfig,
        dispatcher: Arc<Dispatcher>,
        transport: Arc<dyn Transport>,
        method_factory: MethodFactory,
    ) -> Arc<Self> {
        let (updates, _) = broadcast::channel(config.broadcast_capacity.max(1));
        Arc::new(Self {
            config,
            dispatcher,
            transport,
            method_factory,
            tasks: RwLock::new(HashMap::new()),
            updates,
        })
    }

    /// Create and start a task. A duplicate id or an unusable configuration
    /// leaves the registry untouched.
    pub async fn create_task(
        &self,
        id: &str,
        owner: Option<String>,
        capability_key: &str,
        config: OptimizationConfiguration,
    ) -> Result<Arc<OptimizationTask>, RegistryError> {
        let invalid = |reason: String| RegistryError::InvalidConfiguration {
            id: id.to_string(),
            reason,
        };

        let task = {
            let mut tasks = self.tasks.write().await;
            if tasks.contains_key(id) {
                warn!(task_id = %id, "Rejected duplicate optimization id");
                return Err(RegistryError::DuplicateTask(id.to_string()));
            }
            config.validate().map_err(|e| invalid(e.to_string()))?;
            let method = (self.method_factory)(&config).map_err(|e| invalid(e.to_string()))?;

            let task = OptimizationTask::new(
                id,
                owner,
                capability_key,
                config,
                Arc::clone(&self.dispatcher),
                self.updates.clone(),
            );
            tasks.insert(id.to_string(), Arc::clone(&task));
            task.start(method);
            task
        };

        info!(task_id = %id, capability = %capability_key, "Optimization task created");
        self.publish_status().await;
        Ok(task)
    }

    pub async fn cancel_task(&self, id: &str) -> Result<(), RegistryError> {
        let task = self
            .get_task(id)
            .await
            .ok_or_else(|| RegistryError::UnknownTask(id.to_string()))?;
        task.cancel().await;
        Ok(())
    }

    pub async fn get_task(&self, id: &str) -> Option<Arc<OptimizationTask>> {
        self.tasks.read().await.get(id).cloned()
    }

    pub async fn task_count(&self) -> usize {
        self.tasks.read().await.len()
    }

    /// Snapshots of all live tasks, ordered by id.
    pub async fn status(&self) -> OptimizationToolStatus {
        let tasks = self.tasks.read().await;
        let mut snapshots = Vec::with_capacity(tasks.len());
        for task in tasks.values() {
            snapshots.push(task.snapshot().await);
        }
        snapshots.sort_by(|a, b| a.optimization_id.cmp(&b.optimization_id));
        OptimizationToolStatus { tasks: snapshots }
    }

    /// Publish the aggregate status over the transport.
    pub async fn publish_status(&self) {
        let status = PresenceStatus::OptimizationTool(self.status().await);
        if let Err(e) = self.transport.publish_status(&status).await {
            warn!(error = %e, "Failed to publish optimization status");
        }
    }

    /// Evict tasks that finished more than the keep-alive ago. Returns the
    /// number evicted; the status is republished only when that is non-zero.
    pub async fn sweep(&self) -> usize {
        let now = Instant::now();
        let evicted = {
            let mut tasks = self.tasks.write().await;
            let mut expired = Vec::new();
            for (id, task) in tasks.iter() {
                if !task.snapshot().await.state.is_terminal() {
                    continue;
                }
                if let Some(finished_at) = task.finished_at().await
                    && now.duration_since(finished_at) > self.config.task_keep_alive
                {
                    expired.push(id.clone());
                }
            }
            for id in &expired {
                tasks.remove(id);
                debug!(task_id = %id, "Evicted finished optimization task");
            }
            expired.len()
        };

        if evicted > 0 {
            info!(evicted, "Swept finished optimization tasks");
            self.publish_status().await;
        }
        evicted
    }

    /// Receive every task snapshot as it is published.
    pub fn subscribe(&self) -> broadcast::Receiver<TaskUpdate> {
        self.updates.subscribe()
    }
}

/// Spawn the periodic eviction sweep.
pub fn spawn_sweep_loop(
    registry: Arc<OptimizationRegistry>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            registry.sweep().await;
        }
    })
}
