//! Error types for the cloak client.

use crate::task::TaskState;

/// Top-level error type for the client.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Service error: {0}")]
    Service(#[from] ServiceError),

    #[error("Task error: {0}")]
    Task(#[from] TaskError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Errors talking to the remote job service.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Request to {endpoint} failed: {reason}")]
    RequestFailed { endpoint: String, reason: String },

    #[error("{endpoint} returned HTTP {status}")]
    Http { endpoint: String, status: u16 },

    #[error("Invalid response from {endpoint}: {reason}")]
    InvalidResponse { endpoint: String, reason: String },

    #[error("Invalid upload part {file_name}: {reason}")]
    InvalidPart { file_name: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Task lifecycle errors. These report refused or failed operations; the
/// controller has already reflected them in its state and log.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("No files selected")]
    NoFiles,

    #[error("Task is {state}, operation not permitted")]
    Busy { state: TaskState },

    #[error("Cannot transition task from {from} to {to}")]
    InvalidTransition { from: TaskState, to: TaskState },

    #[error("Submission failed: {0}")]
    SubmissionFailed(#[source] ServiceError),

    #[error("Task was superseded by a newer file selection")]
    Superseded,

    #[error("No completed task to download")]
    NotComplete,

    #[error("Controller has been shut down")]
    Closed,
}

/// Result type alias for the client.
pub type Result<T> = std::result::Result<T, Error>;
