//! Common error types used across the workspace.
//!
//! Each layer defines its own typed errors and converts into
//! [`VoxlineError`] via `#[from]`; no variant carries a bare `String` as its
//! only payload.

use std::time::Duration;

use crate::command::{CommandState, TransitionError};

/// Top-level error shared by the domain and application layers.
#[derive(Debug, thiserror::Error)]
pub enum VoxlineError {
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    NotFound(#[from] NotFoundError),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error(transparent)]
    Conflict(#[from] ConflictError),

    /// The durable store failed. Never retried silently: the caller cannot
    /// know which state the entity ended up in.
    #[error("storage error: {0}")]
    Storage(Box<dyn std::error::Error + Send + Sync>),
}

impl VoxlineError {
    /// Whether this error comes from the durable store.
    #[must_use]
    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_))
    }
}

impl From<TransitionError> for VoxlineError {
    fn from(err: TransitionError) -> Self {
        Self::Command(CommandError::InvalidTransition(err))
    }
}

/// Constructor-level invariant violations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("command text must not be empty")]
    EmptyText,

    #[error("name must not be empty")]
    EmptyName,

    #[error("template must declare at least one pattern")]
    NoPatterns,

    #[error("macro must declare at least one step")]
    NoSteps,

    #[error("macro step {0} has an empty command")]
    EmptyStepCommand(usize),

    #[error("confidence must be within 0.0..=1.0, got {0}")]
    ConfidenceOutOfRange(f64),

    #[error("max_retries must be at least 1")]
    ZeroRetryBudget,

    #[error("unknown event type {0:?}")]
    UnknownEventType(String),
}

/// A lookup by id found nothing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{entity} {id} not found")]
pub struct NotFoundError {
    pub entity: &'static str,
    pub id: String,
}

/// An update was based on a stale snapshot of the entity.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{entity} {id} was modified concurrently (expected version {expected_version})")]
pub struct ConflictError {
    pub entity: &'static str,
    pub id: String,
    pub expected_version: u64,
}

/// Failures of the command lifecycle itself.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CommandError {
    /// Nothing recognised the input. Non-fatal and never retried.
    #[error("no template, macro or intent matched the input")]
    MatchNotFound,

    #[error("invalid schedule expression {expression:?}: {reason}")]
    InvalidSchedule { expression: String, reason: String },

    #[error("macro {0:?} not found")]
    MacroNotFound(String),

    #[error("macro {0:?} is disabled")]
    MacroDisabled(String),

    #[error("condition {condition:?} not satisfied within {timeout:?}")]
    ConditionTimeout {
        condition: String,
        timeout: Duration,
    },

    #[error("macro step {index} ended in state {state}")]
    MacroStepFailed { index: usize, state: CommandState },

    /// A step would run a macro that is already being expanded.
    #[error("macro invocation cycle {}", .chain.join(" -> "))]
    MacroCycle { chain: Vec<String> },

    #[error("connection lost: {0}")]
    ConnectionLost(String),

    #[error("delivery failed after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },

    #[error(transparent)]
    InvalidTransition(TransitionError),

    #[error("command was cancelled")]
    Cancelled,
}
