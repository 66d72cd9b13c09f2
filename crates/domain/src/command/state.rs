//! Command lifecycle states and the transition table between them.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Where a [`Command`](super::Command) currently sits in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandState {
    #[default]
    Pending,
    Matched,
    Scheduled,
    Queued,
    Dispatched,
    Synced,
    Completed,
    Failed,
    Cancelled,
}

impl CommandState {
    pub const ALL: [Self; 9] = [
        Self::Pending,
        Self::Matched,
        Self::Scheduled,
        Self::Queued,
        Self::Dispatched,
        Self::Synced,
        Self::Completed,
        Self::Failed,
        Self::Cancelled,
    ];

    /// Stable lowercase name, used for storage and the wire.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Matched => "matched",
            Self::Scheduled => "scheduled",
            Self::Queued => "queued",
            Self::Dispatched => "dispatched",
            Self::Synced => "synced",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Terminal states are immutable.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether `self -> next` is an edge of the lifecycle graph.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        if next == Self::Cancelled {
            return !self.is_terminal();
        }
        matches!(
            (self, next),
            (Self::Pending, Self::Matched)
                | (Self::Matched, Self::Scheduled | Self::Dispatched | Self::Queued)
                | (Self::Scheduled, Self::Pending)
                | (Self::Dispatched, Self::Completed | Self::Queued)
                | (Self::Queued, Self::Synced | Self::Queued | Self::Failed)
                | (Self::Synced, Self::Completed)
        )
    }
}

impl fmt::Display for CommandState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandState {
    type Err = UnknownStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| UnknownStateError(s.to_string()))
    }
}

/// A stored state name did not match any [`CommandState`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown command state {0:?}")]
pub struct UnknownStateError(pub String);

/// An attempted transition that is not an edge of the lifecycle graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid transition from {from} to {to}")]
pub struct TransitionError {
    pub from: CommandState,
    pub to: CommandState,
}
