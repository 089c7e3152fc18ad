//! Stage-boundary error taxonomy.
//!
//! Every error a stage can raise is caught at the stage boundary,
//! classified, and recorded; nothing escapes the engine's invocation
//! wrapper. The classification decides where the run goes next: fatal
//! errors abort, escalation errors route to human review, and refinement
//! "errors" (quality gate failures) are not errors at all; they stay on
//! the normal loop path.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Where an error sends the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Quality gate failure; handled by the refinement loop.
    Refinement,
    /// Routed to human review (iteration ceiling, budget, timeouts).
    Escalation,
    /// Transitions straight to abort.
    Fatal,
    /// Informational entry in the run history; never affects routing.
    Warning,
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorClass::Refinement => write!(f, "refinement"),
            ErrorClass::Escalation => write!(f, "escalation"),
            ErrorClass::Fatal => write!(f, "fatal"),
            ErrorClass::Warning => write!(f, "warning"),
        }
    }
}

/// Errors raised by stage functions and their collaborators.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("unsupported document format: {0}")]
    UnsupportedFormat(String),

    #[error("corrupt document: {0}")]
    CorruptDocument(String),

    #[error("rate limited by model provider ({model})")]
    RateLimited { model: String },

    #[error("prompt exceeds context window of {model}")]
    ContextOverflow { model: String },

    #[error("malformed model response: {0}")]
    MalformedResponse(String),

    #[error("all model attempts exhausted: {0}")]
    ClientExhausted(String),

    #[error("stage '{stage}' timed out after {seconds}s")]
    Timeout { stage: String, seconds: u64 },

    #[error("run budget exceeded: spent ${spent:.4} of ${limit:.2}")]
    BudgetExceeded { spent: f64, limit: f64 },

    #[error("run record serialization failed: {0}")]
    Serialization(String),

    #[error("i/o failure: {0}")]
    Io(String),

    #[error("review gate unavailable: {0}")]
    ReviewUnavailable(String),

    #[error("internal invariant violated: {0}")]
    Internal(String),
}

impl StageError {
    /// Classify this error for routing purposes.
    pub fn class(&self) -> ErrorClass {
        match self {
            // Nothing can be salvaged from these; abort the run.
            StageError::UnsupportedFormat(_)
            | StageError::CorruptDocument(_)
            | StageError::ClientExhausted(_)
            | StageError::Serialization(_)
            | StageError::Io(_)
            | StageError::Internal(_) => ErrorClass::Fatal,

            // A human may still rescue the run.
            StageError::RateLimited { .. }
            | StageError::ContextOverflow { .. }
            | StageError::MalformedResponse(_)
            | StageError::Timeout { .. }
            | StageError::BudgetExceeded { .. }
            | StageError::ReviewUnavailable(_) => ErrorClass::Escalation,
        }
    }
}
