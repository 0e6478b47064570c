//! Presence statuses and optimization task snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::messages::Parameter;
use crate::error::ProtocolError;

/// Lifecycle state of an optimization task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Created, first generation not evaluated yet.
    Started,
    /// At least one generation evaluated, more to go.
    Running,
    /// Generation limit or fitness threshold reached.
    Complete,
    /// Consistency failure or unexpected error.
    Error,
    /// Cancelled on request.
    Cancelled,
}

impl TaskState {
    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Error | Self::Cancelled)
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Started => "started",
            Self::Running => "running",
            Self::Complete => "complete",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// One evaluated candidate of a generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateRecord {
    pub values: Vec<f64>,
    pub fitness: f64,
}

/// Publicly visible status of an optimization task, replaced once per generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub optimization_id: String,
    pub state: TaskState,
    pub generation: usize,
    /// Percent of the generation budget consumed (0–100).
    pub progress: f64,
    pub best_fitness: f64,
    #[serde(default)]
    pub best_parameters: Vec<Parameter>,
    /// Candidates of the most recent generation, best first.
    #[serde(default)]
    pub candidates: Vec<CandidateRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl TaskSnapshot {
    /// Snapshot of a freshly created task.
    pub fn started(optimization_id: impl Into<String>) -> Self {
        Self {
            optimization_id: optimization_id.into(),
            state: TaskState::Started,
            generation: 0,
            progress: 0.0,
            best_fitness: 0.0,
            best_parameters: Vec::new(),
            candidates: Vec::new(),
            description: None,
            updated_at: Utc::now(),
        }
    }
}

/// Aggregate status of the hub: one snapshot per live task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptimizationToolStatus {
    pub tasks: Vec<TaskSnapshot>,
}

/// Status advertised through presence by each kind of contact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PresenceStatus {
    /// A remote simulation worker.
    SimulationManager {
        #[serde(default)]
        simulation_configuration_id: Option<String>,
        #[serde(default)]
        simulation_id: Option<String>,
    },
    /// A client submitting optimizations.
    Orchestrator,
    /// Another optimization hub (including our own published status).
    OptimizationTool(OptimizationToolStatus),
}

impl PresenceStatus {
    pub fn decode(body: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(body)?)
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// A worker's self-report: which simulation configuration it is set up for
/// and which simulation, if any, it is currently running.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerStatus {
    pub capability: Option<String>,
    pub assignment: Option<String>,
}

impl WorkerStatus {
    /// Build from raw fields, treating empty strings as absent.
    pub fn new(capability: Option<String>, assignment: Option<String>) -> Self {
        Self {
            capability: capability.filter(|s| !s.is_empty()),
            assignment: assignment.filter(|s| !s.is_empty()),
        }
    }

    pub fn idle(capability: impl Into<String>) -> Self {
        Self::new(Some(capability.into()), None)
    }
}
