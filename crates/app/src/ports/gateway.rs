//! Inbound ports: what GUIs, the HTTP API and the macro engine call.

use std::future::Future;

use futures_util::future::BoxFuture;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use voxline_domain::command::{Command, CommandOrigin, Resolution, Variables};
use voxline_domain::command_macro::{MacroAborted, StepResult};
use voxline_domain::error::{CommandError, VoxlineError};
use voxline_domain::id::CommandId;
use voxline_domain::schedule::ScheduleEntry;

/// Synchronous acceptance of a submitted input.
///
/// Completion is asynchronous: follow the command through
/// [`CommandGateway::get_status`] or the event stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Submission {
    pub command_id: CommandId,
    pub resolution: Resolution,
}

impl Submission {
    #[must_use]
    pub fn is_unmatched(&self) -> bool {
        !self.resolution.is_actionable()
    }

    /// The command id, or [`CommandError::MatchNotFound`] for unmatched input.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::MatchNotFound`] when nothing recognised the input.
    pub fn accepted(&self) -> Result<CommandId, CommandError> {
        if self.is_unmatched() {
            Err(CommandError::MatchNotFound)
        } else {
            Ok(self.command_id)
        }
    }
}

/// Request to register a deferred command.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleRequest {
    pub text: String,
    pub expression: String,
    pub recurring: bool,
    pub metadata: serde_json::Value,
}

/// The orchestrator as seen by its callers.
pub trait CommandGateway: Send + Sync {
    fn submit(
        &self,
        text: String,
        origin: CommandOrigin,
    ) -> impl Future<Output = Result<Submission, VoxlineError>> + Send;

    fn get_status(
        &self,
        id: CommandId,
    ) -> impl Future<Output = Result<Command, VoxlineError>> + Send;

    fn cancel(&self, id: CommandId) -> impl Future<Output = Result<Command, VoxlineError>> + Send;

    fn schedule(
        &self,
        request: ScheduleRequest,
    ) -> impl Future<Output = Result<ScheduleEntry, VoxlineError>> + Send;

    fn run_macro(
        &self,
        name: String,
        variables: Variables,
    ) -> impl Future<Output = Result<Vec<StepResult>, MacroAborted>> + Send;
}

/// Submission contract used by the macro engine.
///
/// Boxed so the macro engine and the orchestrator can call each other
/// without an infinitely sized future.
pub trait CommandSubmitter: Send + Sync {
    /// Submit `text` and wait until the resulting command is terminal.
    ///
    /// Unmatched input comes back as a `Cancelled` command rather than an
    /// error. Cancelling `cancel` stops the wait, not the command.
    fn submit_and_wait<'a>(
        &'a self,
        text: String,
        origin: CommandOrigin,
        variables: Variables,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<Command, VoxlineError>>;
}
