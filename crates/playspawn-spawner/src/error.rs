//! Error types for lifecycle operations.

use playspawn_config::ConfigError;
use playspawn_runner::{AutomationFailure, EngineError, InventoryError, RunnerError};
use thiserror::Error;

/// Errors returned by [`PlaybookSpawner`](crate::PlaybookSpawner) operations.
#[derive(Debug, Error)]
pub enum SpawnerError {
    /// A playbook run completed but failed.
    #[error("{0}")]
    Automation(Box<AutomationFailure>),

    /// The server state has no usable address or port after start.
    #[error("Server state is missing '{field}'")]
    MissingEndpoint { field: String },

    /// The reported port is not a valid port number.
    #[error("Invalid port: {0}")]
    InvalidPort(String),

    /// The poll playbook did not report a boolean `running` field.
    #[error("Poll playbook must set a boolean 'running' fact, got: {0}")]
    InvalidPollOutput(String),

    /// Invalid configuration, or an inventory that could not be produced.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A run workspace could not be prepared.
    #[error("Workspace error: {0}")]
    Workspace(#[source] std::io::Error),

    /// The engine could not run at all.
    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl From<RunnerError> for SpawnerError {
    fn from(err: RunnerError) -> Self {
        match err {
            RunnerError::Automation(failure) => SpawnerError::Automation(failure),
            RunnerError::Workspace(e) => SpawnerError::Workspace(e),
            RunnerError::InventoryWrite { source, .. } => SpawnerError::Workspace(source),
            RunnerError::Engine(e) => SpawnerError::Engine(e),
        }
    }
}

impl From<InventoryError> for SpawnerError {
    fn from(err: InventoryError) -> Self {
        SpawnerError::Configuration(err.to_string())
    }
}

impl From<ConfigError> for SpawnerError {
    fn from(err: ConfigError) -> Self {
        SpawnerError::Configuration(err.to_string())
    }
}

impl SpawnerError {
    /// The failed run, if this error came from one.
    pub fn automation_failure(&self) -> Option<&AutomationFailure> {
        match self {
            SpawnerError::Automation(failure) => Some(failure),
            _ => None,
        }
    }
}

/// Result type for lifecycle operations.
pub type Result<T> = std::result::Result<T, SpawnerError>;
