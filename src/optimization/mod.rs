//! Optimization tasks, their generation loop and the registry that owns them.
//!
//! - `config`: per-task configuration carried by a start request
//! - `method`: Method trait, candidates and parameter packing
//! - `ga`: default genetic algorithm
//! - `evaluator`: population evaluation through the dispatcher
//! - `task`: OptimizationTask generation loop and snapshot
//! - `registry`: OptimizationRegistry and its eviction sweep

pub mod config;
pub mod evaluator;
pub mod ga;
pub mod method;
pub mod registry;
pub mod task;

pub use config::{MethodSettings, OptimizationConfiguration};
pub use evaluator::Evaluator;
pub use ga::GeneticAlgorithm;
pub use method::{Candidate, Method, MethodFactory, ParameterDefinition, Ranked};
pub use registry::{OptimizationRegistry, spawn_sweep_loop};
pub use task::{OptimizationTask, TaskUpdate};
