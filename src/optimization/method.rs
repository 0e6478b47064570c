//! The evolutionary method seam: candidates, ranking, evolution.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::config::OptimizationConfiguration;
use crate::error::MethodError;
use crate::protocol::{CandidateRecord, Parameter};

/// Describes one optimized parameter. Candidate values are normalised and
/// multiplied by `scale` when packed for a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDefinition {
    pub name: String,
    #[serde(default)]
    pub meta: String,
    #[serde(default = "default_scale")]
    pub scale: f64,
}

fn default_scale() -> f64 {
    1.0
}

/// A candidate solution: one normalised value per parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub values: Vec<f64>,
}

impl Candidate {
    pub fn new(values: Vec<f64>) -> Self {
        Self { values }
    }

    /// Pack into named, scaled parameters for transport. Values without a
    /// definition are sent as `p<index>` with scale 1.
    pub fn pack(&self, definitions: &[ParameterDefinition]) -> Vec<Parameter> {
        self.values
            .iter()
            .enumerate()
            .map(|(i, value)| match definitions.get(i) {
                Some(def) => Parameter {
                    name: def.name.clone(),
                    meta: def.meta.clone(),
                    value: def.scale * value,
                },
                None => Parameter {
                    name: format!("p{i}"),
                    meta: String::new(),
                    value: *value,
                },
            })
            .collect()
    }
}

/// A candidate with its evaluated fitness.
#[derive(Debug, Clone, PartialEq)]
pub struct Ranked {
    pub candidate: Candidate,
    pub fitness: f64,
}

impl Ranked {
    pub fn to_record(&self) -> CandidateRecord {
        CandidateRecord {
            values: self.candidate.values.clone(),
            fitness: self.fitness,
        }
    }
}

/// An evolutionary search method driven one generation at a time.
pub trait Method: Send {
    /// The first generation.
    fn initial_population(&mut self, count: usize) -> Vec<Candidate>;

    /// Pair candidates with their fitness, best first.
    fn rank(&self, population: Vec<Candidate>, fitness: &[f64]) -> Result<Vec<Ranked>, MethodError> {
        if population.len() != fitness.len() {
            return Err(MethodError::LengthMismatch {
                population: population.len(),
                fitness: fitness.len(),
            });
        }
        let mut ranked: Vec<Ranked> = population
            .into_iter()
            .zip(fitness.iter().copied())
            .map(|(candidate, fitness)| Ranked { candidate, fitness })
            .collect();
        ranked.sort_by(|a, b| b.fitness.total_cmp(&a.fitness));
        Ok(ranked)
    }

    /// Produce the next generation from a ranked one.
    fn evolve(&mut self, ranked: &[Ranked]) -> Result<Vec<Candidate>, MethodError>;
}

/// Builds the method for a task from its configuration.
pub type MethodFactory =
    Arc<dyn Fn(&OptimizationConfiguration) -> Result<Box<dyn Method>, MethodError> + Send + Sync>;
