//! Error types for the optimizer hub.

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Work item and worker proxy errors.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Work item {item_id} was already signalled")]
    AlreadySignalled { item_id: String },

    #[error("Unknown worker: {0}")]
    UnknownWorker(String),
}

/// Optimization task errors.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("Task {id}: expected {expected} evaluated candidates, got {actual}")]
    PopulationMismatch {
        id: String,
        expected: usize,
        actual: usize,
    },

    #[error("Task {id} panicked: {reason}")]
    Panicked { id: String, reason: String },

    #[error("Task {id} failed: {reason}")]
    Failed { id: String, reason: String },
}

/// Optimization registry errors.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Duplicate ID: {0}")]
    DuplicateTask(String),

    #[error("Unknown ID: {0}")]
    UnknownTask(String),

    #[error("Invalid configuration for {id}: {reason}")]
    InvalidConfiguration { id: String, reason: String },
}

/// Transport-level errors.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Recipient {to} is not connected")]
    NotConnected { to: String },

    #[error("Failed to send to {to}: {reason}")]
    SendFailed { to: String, reason: String },

    #[error("Transport closed")]
    Closed,

    #[error("Failed to encode frame: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Wire decoding errors.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Unexpected message from {from}: {kind}")]
    Unexpected { from: String, kind: String },
}

/// Errors raised by an evolutionary method.
#[derive(Debug, thiserror::Error)]
pub enum MethodError {
    #[error("Invalid method configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Population and fitness lengths differ: {population} vs {fitness}")]
    LengthMismatch { population: usize, fitness: usize },

    #[error("Cannot evolve an empty population")]
    EmptyPopulation,
}
