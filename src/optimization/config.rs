//! Per-task optimization configuration, as carried by a start request.

use serde::{Deserialize, Serialize};

use super::method::ParameterDefinition;
use crate::error::ConfigError;

/// Tuning of the default genetic algorithm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MethodSettings {
    /// Share of each generation carried over unchanged (at least one candidate).
    pub elite_fraction: f64,
    /// Per-gene probability of mutation.
    pub mutation_rate: f64,
    /// Standard deviation of the Gaussian mutation step.
    pub mutation_strength: f64,
}

impl Default for MethodSettings {
    fn default() -> Self {
        Self {
            elite_fraction: 0.2,
            mutation_rate: 0.1,
            mutation_strength: 0.1,
        }
    }
}

/// Configuration of one optimization task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizationConfiguration {
    /// Per-simulation timeout in seconds; 0 waits indefinitely.
    pub simulation_timeout_seconds: u64,
    pub evolution_seed: u64,
    pub evaluation_seed: u64,
    pub generation_count: usize,
    pub candidate_count: usize,
    /// Stop early once the best fitness reaches this value.
    pub fitness_threshold: f64,
    /// The parameters every candidate assigns a value to.
    pub parameters: Vec<ParameterDefinition>,
    pub method: MethodSettings,
}

impl Default for OptimizationConfiguration {
    fn default() -> Self {
        Self {
            simulation_timeout_seconds: 120,
            evolution_seed: 0,
            evaluation_seed: 0,
            generation_count: 100,
            candidate_count: 100,
            fitness_threshold: 100.0,
            parameters: Vec::new(),
            method: MethodSettings::default(),
        }
    }
}

impl OptimizationConfiguration {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.generation_count == 0 {
            return Err(invalid("generation_count", "must be at least 1"));
        }
        if self.candidate_count == 0 {
            return Err(invalid("candidate_count", "must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.method.elite_fraction) {
            return Err(invalid("method.elite_fraction", "must be within [0, 1]"));
        }
        if !(0.0..=1.0).contains(&self.method.mutation_rate) {
            return Err(invalid("method.mutation_rate", "must be within [0, 1]"));
        }
        if !self.method.mutation_strength.is_finite() || self.method.mutation_strength < 0.0 {
            return Err(invalid("method.mutation_strength", "must be a non-negative number"));
        }
        Ok(())
    }
}

fn invalid(key: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}
