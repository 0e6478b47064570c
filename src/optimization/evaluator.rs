//! Population evaluation through the dispatcher.

use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, warn};

use super::method::{Candidate, ParameterDefinition};
use crate::dispatch::{Dispatcher, Evaluation, WorkItemFactory, WorkPayload};

/// Turns candidates into work items and waits for their results.
pub struct Evaluator {
    dispatcher: Arc<Dispatcher>,
    factory: WorkItemFactory,
    parameters: Vec<ParameterDefinition>,
    wait_timeout: Option<Duration>,
    seeds: StdRng,
}

impl Evaluator {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        task_id: &str,
        capability_key: &str,
        parameters: Vec<ParameterDefinition>,
        timeout_seconds: u64,
        evaluation_seed: u64,
    ) -> Self {
        Self {
            dispatcher,
            factory: WorkItemFactory::new(task_id, capability_key, timeout_seconds),
            parameters,
            wait_timeout: (timeout_seconds > 0).then(|| Duration::from_secs(timeout_seconds)),
            seeds: StdRng::seed_from_u64(evaluation_seed),
        }
    }

    /// Evaluate a population, one result per candidate in input order.
    ///
    /// All items are queued up front so idle workers can pick them up in
    /// parallel. Each wait is bounded by the per-simulation timeout; a timed
    /// out or cancelled item counts as zero fitness and is not retried here.
    pub async fn evaluate(&mut self, population: &[Candidate]) -> Vec<Evaluation> {
        let mut completions = Vec::with_capacity(population.len());
        for candidate in population {
            let payload = WorkPayload {
                seed: self.seeds.gen_range(0..u64::MAX),
                parameters: candidate.pack(&self.parameters),
            };
            let (item, completion) = self.factory.create(payload);
            self.dispatcher.enqueue(item).await;
            completions.push(completion);
        }
        debug!(task_id = %self.factory.task_id(), count = completions.len(), "Population queued");

        let mut results = Vec::with_capacity(completions.len());
        for completion in completions {
            let item_id = completion.item_id().to_string();
            let evaluation = completion.wait(self.wait_timeout).await;
            if !evaluation.is_success() {
                warn!(task_id = %self.factory.task_id(), item_id = %item_id, ?evaluation, "Evaluation did not succeed");
            }
            results.push(evaluation);
        }

        // Nothing should outlive the batch in the queue.
        if results.iter().any(|e| !e.is_success()) {
            self.dispatcher.cancel_all_for_task(self.factory.task_id()).await;
        }
        results
    }
}
