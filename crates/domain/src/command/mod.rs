//! Command: one user-intent unit tracked through its full lifecycle.
//!
//! A command is created for every new input (typed text, recognised audio,
//! a schedule firing or a macro step). Only the orchestrator mutates it, and
//! only along the edges allowed by [`CommandState::can_transition_to`].

mod state;

pub use state::{CommandState, TransitionError, UnknownStateError};

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ValidationError, VoxlineError};
use crate::id::CommandId;
use crate::time::{Timestamp, now};

/// Extracted parameter name to value.
pub type Variables = BTreeMap<String, String>;

/// What produced a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandOrigin {
    #[default]
    Interactive,
    Scheduled,
    MacroStep,
    Synced,
}

impl CommandOrigin {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Interactive => "interactive",
            Self::Scheduled => "scheduled",
            Self::MacroStep => "macro_step",
            Self::Synced => "synced",
        }
    }
}

impl fmt::Display for CommandOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandOrigin {
    type Err = UnknownOriginError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "interactive" => Ok(Self::Interactive),
            "scheduled" => Ok(Self::Scheduled),
            "macro_step" => Ok(Self::MacroStep),
            "synced" => Ok(Self::Synced),
            other => Err(UnknownOriginError(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown command origin {0:?}")]
pub struct UnknownOriginError(pub String);

/// How the orchestrator decided to handle a command's text.
///
/// A closed set: the orchestrator switches on it instead of dispatching to
/// open-ended handlers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Resolution {
    MatchedTemplate {
        template: String,
        confidence: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        response: Option<String>,
    },
    Macro {
        name: String,
    },
    RawPassthrough {
        response: String,
        confidence: f64,
        actions: Vec<serde_json::Value>,
    },
    Unmatched,
}

impl Resolution {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MatchedTemplate { .. } => "matched_template",
            Self::Macro { .. } => "macro",
            Self::RawPassthrough { .. } => "raw_passthrough",
            Self::Unmatched => "unmatched",
        }
    }

    /// Whether there is something to deliver or execute.
    #[must_use]
    pub fn is_actionable(&self) -> bool {
        !matches!(self, Self::Unmatched)
    }
}

/// Acknowledgement returned by the remote processing backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    pub success: bool,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl DeliveryReceipt {
    #[must_use]
    pub fn ok(data: serde_json::Value) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

/// One user-intent unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub id: CommandId,
    pub text: String,
    pub variables: Variables,
    pub state: CommandState,
    pub origin: CommandOrigin,
    pub resolution: Option<Resolution>,
    pub result: Option<DeliveryReceipt>,
    /// Human-readable reason accompanying a terminal failure or cancel.
    pub reason: Option<String>,
    pub retry_count: u32,
    /// Bumped by the store on every successful update.
    pub version: u64,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Command {
    /// Create a builder for constructing a [`Command`].
    #[must_use]
    pub fn builder() -> CommandBuilder {
        CommandBuilder::default()
    }

    /// Check domain invariants.
    ///
    /// # Errors
    ///
    /// Returns [`VoxlineError::Validation`] when `text` is blank.
    pub fn validate(&self) -> Result<(), VoxlineError> {
        if self.text.trim().is_empty() {
            return Err(ValidationError::EmptyText.into());
        }
        Ok(())
    }

    /// Whether this command runs a macro rather than being delivered.
    #[must_use]
    pub fn is_macro(&self) -> bool {
        matches!(self.resolution, Some(Resolution::Macro { .. }))
    }

    /// A running macro is executed locally and never queued, so its abort
    /// is the one way out of `Dispatched` into `Failed`.
    fn is_aborted_macro(&self, next: CommandState) -> bool {
        self.is_macro() && self.state == CommandState::Dispatched && next == CommandState::Failed
    }

    /// Successful delivery with a truthy acknowledgement.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.state == CommandState::Completed
            && self.result.as_ref().is_none_or(|receipt| receipt.success)
    }

    /// Move to `next`, enforcing the lifecycle graph.
    ///
    /// `Queued -> Queued` counts a retry. `Scheduled -> Pending` is a
    /// schedule firing: the origin becomes [`CommandOrigin::Scheduled`] and
    /// the previous resolution is dropped so the text is resolved afresh.
    /// A macro command may also go from `Dispatched` to `Failed` when its
    /// steps abort.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError`] when the edge does not exist.
    pub fn transition(&mut self, next: CommandState, at: Timestamp) -> Result<(), TransitionError> {
        if !self.state.can_transition_to(next) && !self.is_aborted_macro(next) {
            return Err(TransitionError {
                from: self.state,
                to: next,
            });
        }
        match (self.state, next) {
            (CommandState::Queued, CommandState::Queued) => self.retry_count += 1,
            (CommandState::Scheduled, CommandState::Pending) => {
                self.origin = CommandOrigin::Scheduled;
                self.resolution = None;
            }
            _ => {}
        }
        self.state = next;
        self.updated_at = at;
        Ok(())
    }
}

/// Step-by-step builder for [`Command`].
#[derive(Debug, Default)]
pub struct CommandBuilder {
    id: Option<CommandId>,
    text: Option<String>,
    variables: Variables,
    origin: Option<CommandOrigin>,
    created_at: Option<Timestamp>,
}

impl CommandBuilder {
    #[must_use]
    pub fn id(mut self, id: CommandId) -> Self {
        self.id = Some(id);
        self
    }

    #[must_use]
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    #[must_use]
    pub fn variables(mut self, variables: Variables) -> Self {
        self.variables = variables;
        self
    }

    #[must_use]
    pub fn variable(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn origin(mut self, origin: CommandOrigin) -> Self {
        self.origin = Some(origin);
        self
    }

    #[must_use]
    pub fn created_at(mut self, ts: Timestamp) -> Self {
        self.created_at = Some(ts);
        self
    }

    /// Consume the builder, validate, and return a `Pending` [`Command`].
    ///
    /// # Errors
    ///
    /// Returns [`VoxlineError::Validation`] if `text` is missing or blank.
    pub fn build(self) -> Result<Command, VoxlineError> {
        let created_at = self.created_at.unwrap_or_else(now);
        let command = Command {
            id: self.id.unwrap_or_default(),
            text: self.text.unwrap_or_default().trim().to_string(),
            variables: self.variables,
            state: CommandState::Pending,
            origin: self.origin.unwrap_or_default(),
            resolution: None,
            result: None,
            reason: None,
            retry_count: 0,
            version: 0,
            created_at,
            updated_at: created_at,
        };
        command.validate()?;
        Ok(command)
    }
}
