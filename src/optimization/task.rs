//! Optimization task: the generation loop and its public snapshot.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use futures::FutureExt;
use tokio::sync::{Mutex, RwLock, broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info};

use super::config::OptimizationConfiguration;
use super::evaluator::Evaluator;
use super::method::{Method, Ranked};
use crate::dispatch::{Dispatcher, Evaluation};
use crate::error::TaskError;
use crate::protocol::{TaskSnapshot, TaskState};

/// A snapshot change, addressed to the task's submitter.
#[derive(Debug, Clone)]
pub struct TaskUpdate {
    pub owner: Option<String>,
    pub snapshot: TaskSnapshot,
}

pub struct OptimizationTask {
    id: String,
    owner: Option<String>,
    capability_key: String,
    config: OptimizationConfiguration,
    snapshot: RwLock<TaskSnapshot>,
    cancelled: AtomicBool,
    finished_at: Mutex<Option<Instant>>,
    done: watch::Sender<bool>,
    dispatcher: Arc<Dispatcher>,
    updates: broadcast::Sender<TaskUpdate>,
}

impl OptimizationTask {
    pub fn new(
        id: impl Into<String>,
        owner: Option<String>,
        capability_key: impl Into<String>,
        config: OptimizationConfiguration,
        dispatcher: Arc<Dispatcher>,
        updates: broadcast::Sender<TaskUpdate>,
    ) -> Arc<Self> {
        let id = id.into();
        Arc::new(Self {
            snapshot: RwLock::new(TaskSnapshot::started(&id)),
            id,
            owner,
            capability_key: capability_key.into(),
            config,
            cancelled: AtomicBool::new(false),
            finished_at: Mutex::new(None),
            done: watch::channel(false).0,
            dispatcher,
            updates,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Identity that submitted the task, if it came in over the transport.
    pub fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }

    pub fn capability_key(&self) -> &str {
        &self.capability_key
    }

    pub fn config(&self) -> &OptimizationConfiguration {
        &self.config
    }

    pub async fn snapshot(&self) -> TaskSnapshot {
        self.snapshot.read().await.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// When the run loop exited, if it has.
    pub async fn finished_at(&self) -> Option<Instant> {
        *self.finished_at.lock().await
    }

    /// Wait until the run loop has exited.
    pub async fn finished(&self) {
        let mut rx = self.done.subscribe();
        let _ = rx.wait_for(|done| *done).await;
    }

    /// Spawn the generation loop. Errors and panics end the task in the
    /// `Error` state with the last good snapshot data.
    pub fn start(self: &Arc<Self>, method: Box<dyn Method>) -> JoinHandle<()> {
        let task = Arc::clone(self);
        tokio::spawn(async move {
            info!(task_id = %task.id, capability = %task.capability_key, "Optimization started");
            let outcome = AssertUnwindSafe(task.run(method)).catch_unwind().await;
            match outcome {
                Ok(Ok(state)) => {
                    info!(task_id = %task.id, state = %state, "Optimization finished");
                }
                Ok(Err(e)) => {
                    error!(task_id = %task.id, error = %e, "Optimization failed");
                    task.fail(e.to_string()).await;
                }
                Err(panic) => {
                    let reason = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    let e = TaskError::Panicked {
                        id: task.id.clone(),
                        reason,
                    };
                    error!(task_id = %task.id, error = %e, "Optimization panicked");
                    task.fail(e.to_string()).await;
                }
            }
            *task.finished_at.lock().await = Some(Instant::now());
            task.done.send_replace(true);
        })
    }

    /// Request cancellation. Queued evaluations of this task resolve at once;
    /// the loop stops at the next generation boundary. Idempotent.
    pub async fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::SeqCst) {
            info!(task_id = %self.id, "Optimization cancellation requested");
        }
        self.dispatcher.cancel_all_for_task(&self.id).await;
    }

    async fn run(&self, mut method: Box<dyn Method>) -> Result<TaskState, TaskError> {
        let mut evaluator = Evaluator::new(
            Arc::clone(&self.dispatcher),
            &self.id,
            &self.capability_key,
            self.config.parameters.clone(),
            self.config.simulation_timeout_seconds,
            self.config.evaluation_seed,
        );
        let mut population = method.initial_population(self.config.candidate_count);
        let mut generation = 0;
        let mut best: Option<Ranked> = None;

        loop {
            if self.is_cancelled() {
                self.publish(TaskState::Cancelled, generation, best.as_ref(), &[], None)
                    .await;
                return Ok(TaskState::Cancelled);
            }

            let evaluations = evaluator.evaluate(&population).await;
            let evaluated = evaluations.len();
            let fitness: Vec<f64> = evaluations.iter().map(Evaluation::fitness).collect();
            let ranked = method
                .rank(population, &fitness)
                .map_err(|e| self.failed(e))?;
            generation += 1;

            if let Some(top) = ranked.first()
                && best.as_ref().is_none_or(|b| top.fitness > b.fitness)
            {
                best = Some(top.clone());
            }
            let best_fitness = best.as_ref().map_or(0.0, |b| b.fitness);

            let (state, description) = if evaluated != self.config.candidate_count {
                let e = TaskError::PopulationMismatch {
                    id: self.id.clone(),
                    expected: self.config.candidate_count,
                    actual: evaluated,
                };
                (TaskState::Error, Some(e.to_string()))
            } else if generation >= self.config.generation_count
                || best_fitness >= self.config.fitness_threshold
            {
                (TaskState::Complete, None)
            } else if self.is_cancelled() {
                (TaskState::Cancelled, None)
            } else {
                (TaskState::Running, None)
            };

            debug!(task_id = %self.id, generation, best_fitness, state = %state, "Generation evaluated");
            self.publish(state, generation, best.as_ref(), &ranked, description)
                .await;

            if state.is_terminal() {
                return Ok(state);
            }
            population = method.evolve(&ranked).map_err(|e| self.failed(e))?;
        }
    }

    fn failed(&self, e: impl std::fmt::Display) -> TaskError {
        TaskError::Failed {
            id: self.id.clone(),
            reason: e.to_string(),
        }
    }

    fn progress(&self, state: TaskState, generation: usize) -> f64 {
        if state == TaskState::Complete {
            return 100.0;
        }
        let limit = self.config.generation_count.max(1);
        (100.0 * generation as f64 / limit as f64).min(100.0)
    }

    async fn publish(
        &self,
        state: TaskState,
        generation: usize,
        best: Option<&Ranked>,
        ranked: &[Ranked],
        description: Option<String>,
    ) {
        let snapshot = TaskSnapshot {
            optimization_id: self.id.clone(),
            state,
            generation,
            progress: self.progress(state, generation),
            best_fitness: best.map_or(0.0, |b| b.fitness),
            best_parameters: best
                .map(|b| b.candidate.pack(&self.config.parameters))
                .unwrap_or_default(),
            candidates: ranked.iter().map(Ranked::to_record).collect(),
            description,
            updated_at: Utc::now(),
        };
        self.replace_snapshot(snapshot).await;
    }

    /// Mark the task failed, keeping the last good generation data.
    async fn fail(&self, reason: String) {
        let mut snapshot = self.snapshot().await;
        snapshot.state = TaskState::Error;
        snapshot.description = Some(reason);
        snapshot.updated_at = Utc::now();
        self.replace_snapshot(snapshot).await;
    }

    async fn replace_snapshot(&self, snapshot: TaskSnapshot) {
        *self.snapshot.write().await = snapshot.clone();
        // No subscribers is fine.
        let _ = self.updates.send(TaskUpdate {
            owner: self.owner.clone(),
            snapshot,
        });
    }
}
