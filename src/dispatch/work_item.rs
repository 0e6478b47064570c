//! Work items: one deferred fitness evaluation plus its completion signal.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::oneshot;

use crate::error::DispatchError;
use crate::protocol::{Message, Parameter};

/// How a waiter saw an evaluation end.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Evaluation {
    /// A worker reported success with this fitness.
    Success(f64),
    /// The item was cancelled or dropped before a result arrived.
    Cancelled,
    /// The waiter stopped waiting.
    TimedOut,
}

impl Evaluation {
    /// Fitness to use for ranking; failed evaluations count as zero.
    pub fn fitness(&self) -> f64 {
        match self {
            Self::Success(fitness) => *fitness,
            Self::Cancelled | Self::TimedOut => 0.0,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

/// Candidate data shipped to the worker.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkPayload {
    pub seed: u64,
    pub parameters: Vec<Parameter>,
}

/// A single deferred evaluation.
///
/// Owned by exactly one of: the capability queue, a worker proxy's assignment
/// slot, or nobody (signalled and dropped). Dropping an unsignalled item
/// resolves its waiter as [`Evaluation::Cancelled`].
#[derive(Debug)]
pub struct WorkItem {
    task_id: String,
    capability_key: String,
    item_id: String,
    payload: WorkPayload,
    timeout_seconds: u64,
    result_fitness: Option<f64>,
    signal: Option<oneshot::Sender<Evaluation>>,
}

impl WorkItem {
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn capability_key(&self) -> &str {
        &self.capability_key
    }

    pub fn item_id(&self) -> &str {
        &self.item_id
    }

    pub fn payload(&self) -> &WorkPayload {
        &self.payload
    }

    /// Seconds a worker may hold this item before it is reclaimed; 0 = no limit.
    pub fn timeout_seconds(&self) -> u64 {
        self.timeout_seconds
    }

    pub fn result_fitness(&self) -> Option<f64> {
        self.result_fitness
    }

    pub fn is_signalled(&self) -> bool {
        self.signal.is_none()
    }

    /// The waiter dropped its [`Completion`] before the item was signalled.
    /// Such an item must never be queued or dispatched again.
    pub fn is_abandoned(&self) -> bool {
        self.signal.as_ref().is_some_and(|signal| signal.is_closed())
    }

    /// Record the fitness and fire the completion signal.
    pub fn signal_success(&mut self, fitness: f64) -> Result<(), DispatchError> {
        let signal = self.take_signal()?;
        self.result_fitness = Some(fitness);
        if signal.send(Evaluation::Success(fitness)).is_err() {
            tracing::trace!(item_id = %self.item_id, "Result arrived after waiter gave up");
        }
        Ok(())
    }

    /// Fire the completion signal without a result.
    pub fn signal_cancelled(&mut self) -> Result<(), DispatchError> {
        let signal = self.take_signal()?;
        let _ = signal.send(Evaluation::Cancelled);
        Ok(())
    }

    /// Message instructing a worker to evaluate this item.
    pub fn to_message(&self) -> Message {
        Message::RunSimulation {
            optimization_id: self.task_id.clone(),
            simulation_id: self.item_id.clone(),
            seed: self.payload.seed,
            parameters: self.payload.parameters.clone(),
        }
    }

    fn take_signal(&mut self) -> Result<oneshot::Sender<Evaluation>, DispatchError> {
        self.signal.take().ok_or_else(|| DispatchError::AlreadySignalled {
            item_id: self.item_id.clone(),
        })
    }
}

/// Waiting side of a work item.
#[derive(Debug)]
pub struct Completion {
    item_id: String,
    rx: oneshot::Receiver<Evaluation>,
}

impl Completion {
    pub fn item_id(&self) -> &str {
        &self.item_id
    }

    /// Block until the item is signalled, or until `timeout` elapses if given.
    pub async fn wait(self, timeout: Option<Duration>) -> Evaluation {
        let received = match timeout {
            Some(limit) => match tokio::time::timeout(limit, self.rx).await {
                Ok(received) => received,
                Err(_) => return Evaluation::TimedOut,
            },
            None => self.rx.await,
        };
        // A dropped sender means the item was destroyed unsignalled.
        received.unwrap_or(Evaluation::Cancelled)
    }
}

/// Creates work items for one task, numbering them `s_<task>_<n>`.
#[derive(Debug)]
pub struct WorkItemFactory {
    task_id: String,
    capability_key: String,
    timeout_seconds: u64,
    counter: AtomicU64,
}

impl WorkItemFactory {
    pub fn new(
        task_id: impl Into<String>,
        capability_key: impl Into<String>,
        timeout_seconds: u64,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            capability_key: capability_key.into(),
            timeout_seconds,
            counter: AtomicU64::new(0),
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn create(&self, payload: WorkPayload) -> (WorkItem, Completion) {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        let item_id = format!("s_{}_{}", self.task_id, n);
        let (tx, rx) = oneshot::channel();
        let item = WorkItem {
            task_id: self.task_id.clone(),
            capability_key: self.capability_key.clone(),
            item_id: item_id.clone(),
            payload,
            timeout_seconds: self.timeout_seconds,
            result_fitness: None,
            signal: Some(tx),
        };
        (item, Completion { item_id, rx })
    }
}

#[cfg(test)]
pub(crate) fn test_item(task_id: &str, capability: &str, timeout_seconds: u64) -> (WorkItem, Completion) {
    WorkItemFactory::new(task_id, capability, timeout_seconds).create(WorkPayload {
        seed: 7,
        parameters: vec![Parameter {
            name: "gain".into(),
            meta: String::new(),
            value: 0.5,
        }],
    })
}
