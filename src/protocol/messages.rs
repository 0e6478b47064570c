//! Message bodies exchanged between the hub, orchestrators and simulation workers.

use serde::{Deserialize, Serialize};

use super::status::TaskSnapshot;
use crate::error::ProtocolError;
use crate::optimization::OptimizationConfiguration;

/// Outcome flag carried by replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyStatus {
    Ok,
    Error,
}

/// A named, scaled parameter value as sent to a simulation worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    #[serde(default)]
    pub meta: String,
    pub value: f64,
}

/// Result reported by a simulation worker for one work item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationResult {
    pub optimization_id: String,
    pub simulation_id: String,
    pub success: bool,
    #[serde(default)]
    pub fitness_value: f64,
}

/// Every message body the hub understands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    /// Orchestrator → hub: start a new optimization.
    StartOptimization {
        optimization_id: String,
        simulation_configuration_id: String,
        #[serde(default)]
        configuration: OptimizationConfiguration,
    },
    /// Orchestrator → hub: cancel a running optimization.
    CancelOptimization { optimization_id: String },
    /// Orchestrator → hub: request the current snapshot of an optimization.
    GetOptimizationStatus { optimization_id: String },
    /// Hub → orchestrator.
    OptimizationStarted {
        optimization_id: String,
        status: ReplyStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
    /// Hub → orchestrator.
    OptimizationCancelled {
        optimization_id: String,
        status: ReplyStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
    /// Hub → orchestrator: reply to a status query, also pushed after every generation.
    OptimizationStatus {
        optimization_id: String,
        status: ReplyStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        snapshot: Option<TaskSnapshot>,
    },
    /// Hub → worker: evaluate one candidate.
    RunSimulation {
        optimization_id: String,
        simulation_id: String,
        seed: u64,
        parameters: Vec<Parameter>,
    },
    /// Worker → hub.
    SimulationResult(SimulationResult),
}

impl Message {
    /// Decode a message body.
    pub fn decode(body: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(body)?)
    }

    /// Encode to the JSON body sent over the transport.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Short name of the variant, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::StartOptimization { .. } => "start_optimization",
            Self::CancelOptimization { .. } => "cancel_optimization",
            Self::GetOptimizationStatus { .. } => "get_optimization_status",
            Self::OptimizationStarted { .. } => "optimization_started",
            Self::OptimizationCancelled { .. } => "optimization_cancelled",
            Self::OptimizationStatus { .. } => "optimization_status",
            Self::RunSimulation { .. } => "run_simulation",
            Self::SimulationResult(_) => "simulation_result",
        }
    }

    pub fn started(optimization_id: &str, error: Option<String>) -> Self {
        Self::OptimizationStarted {
            optimization_id: optimization_id.to_string(),
            status: reply_status(&error),
            description: error,
        }
    }

    pub fn cancelled(optimization_id: &str, error: Option<String>) -> Self {
        Self::OptimizationCancelled {
            optimization_id: optimization_id.to_string(),
            status: reply_status(&error),
            description: error,
        }
    }

    pub fn status(optimization_id: &str, snapshot: Result<TaskSnapshot, String>) -> Self {
        match snapshot {
            Ok(snapshot) => Self::OptimizationStatus {
                optimization_id: optimization_id.to_string(),
                status: ReplyStatus::Ok,
                description: None,
                snapshot: Some(snapshot),
            },
            Err(reason) => Self::OptimizationStatus {
                optimization_id: optimization_id.to_string(),
                status: ReplyStatus::Error,
                description: Some(reason),
                snapshot: None,
            },
        }
    }
}

fn reply_status(error: &Option<String>) -> ReplyStatus {
    if error.is_some() {
        ReplyStatus::Error
    } else {
        ReplyStatus::Ok
    }
}
