//! Core error types.

use crate::interpreter::MachineStatus;
use thiserror::Error;

/// A value could not be resolved against the context or event.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ResolutionError {
    #[error("path '{path}' not found")]
    MissingPath { path: String },

    #[error("type mismatch in '{at}': expected {expected}, found {found}")]
    TypeMismatch {
        at: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("'{path}' refers to the triggering event but none is available")]
    NoEvent { path: String },

    #[error("division by zero in '{at}'")]
    DivisionByZero { at: String },

    #[error("result of '{at}' is not a finite number")]
    NonFinite { at: String },

    #[error("predicate '{name}' is not registered")]
    UnknownPredicate { name: String },
}

/// Why an action did not complete.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ActionFailure {
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error("raise of '{event}' rejected while a dispatch is in progress")]
    RaiseRejected { event: String },
}

/// Errors from the statechart interpreter.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("resolution failed: {0}")]
    Resolution(#[from] ResolutionError),

    #[error("guard '{guard}' on '{event}' in state '{state}' failed: {reason}")]
    GuardEvaluation {
        guard: String,
        state: String,
        event: String,
        #[source]
        reason: ResolutionError,
    },

    #[error("action '{action}' failed ({source_state} -> {target}): {reason}")]
    ActionExecution {
        action: String,
        source_state: String,
        target: String,
        #[source]
        reason: ActionFailure,
    },

    #[error("invalid chart definition: {reason}")]
    InvalidDefinition { reason: String },

    #[error("invalid expression: {reason}")]
    InvalidExpression { reason: String },

    #[error("cannot {operation} an interpreter that is {status}")]
    Lifecycle {
        operation: &'static str,
        status: MachineStatus,
    },

    #[error("more than {limit} events processed in one run; raised events discarded")]
    MicrostepLimit { limit: usize },

    #[error("snapshot checksum mismatch: chart is {expected}, snapshot has {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CoreError {
    /// Returns true for errors that leave the machine running.
    pub fn is_contained(&self) -> bool {
        matches!(
            self,
            CoreError::Resolution(_)
                | CoreError::GuardEvaluation { .. }
                | CoreError::ActionExecution { .. }
                | CoreError::MicrostepLimit { .. }
        )
    }

    /// Returns an error code suitable for structured output.
    pub fn error_code(&self) -> &'static str {
        match self {
            CoreError::Resolution(_) => "RESOLUTION_ERROR",
            CoreError::GuardEvaluation { .. } => "GUARD_EVALUATION_ERROR",
            CoreError::ActionExecution { .. } => "ACTION_EXECUTION_ERROR",
            CoreError::InvalidDefinition { .. } => "INVALID_DEFINITION",
            CoreError::InvalidExpression { .. } => "INVALID_DEFINITION",
            CoreError::Lifecycle { .. } => "LIFECYCLE_ERROR",
            CoreError::MicrostepLimit { .. } => "MICROSTEP_LIMIT",
            CoreError::ChecksumMismatch { .. } => "CONFLICT",
            CoreError::Json(_) => "BAD_REQUEST",
        }
    }

    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        CoreError::InvalidDefinition {
            reason: reason.into(),
        }
    }
}
