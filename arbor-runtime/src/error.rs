//! Runtime error types.

use arbor_core::CoreError;
use thiserror::Error;

/// Runtime errors.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    #[error("chart not found: {0}")]
    ChartNotFound(String),

    #[error("instance not found: {0}")]
    InstanceNotFound(String),

    #[error("instance already exists: {0}")]
    InstanceExists(String),

    #[error("instance {0} did not answer in time")]
    Timeout(String),

    #[error("host shutting down")]
    ShuttingDown,

    #[error("no tokio runtime to run the instance on")]
    NoRuntime,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RuntimeError {
    /// Returns an error code suitable for structured output.
    pub fn error_code(&self) -> &'static str {
        match self {
            RuntimeError::Core(e) => e.error_code(),
            RuntimeError::ChartNotFound(_) => "CHART_NOT_FOUND",
            RuntimeError::InstanceNotFound(_) => "INSTANCE_NOT_FOUND",
            RuntimeError::InstanceExists(_) => "INSTANCE_EXISTS",
            RuntimeError::Timeout(_) => "TIMEOUT",
            RuntimeError::ShuttingDown => "SHUTTING_DOWN",
            RuntimeError::NoRuntime => "INTERNAL_ERROR",
            RuntimeError::Io(_) => "INTERNAL_ERROR",
            RuntimeError::Json(_) => "BAD_REQUEST",
        }
    }

    /// Returns whether retrying the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RuntimeError::Timeout(_))
    }
}
