//! Queued commands: offline-buffered delivery records.
//!
//! An entry is never removed by the queue itself: it is either marked
//! synced, or its retry budget runs out and it is kept for inspection.

use serde::{Deserialize, Serialize};

use crate::command::Command;
use crate::error::{ValidationError, VoxlineError};
use crate::id::{CommandId, QueueEntryId};
use crate::time::Timestamp;

/// Delivery attempts allowed when nothing else is configured.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// A command waiting for connectivity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedCommand {
    pub id: QueueEntryId,
    pub command_id: CommandId,
    /// Snapshot of the command at enqueue time; this is what gets delivered.
    pub payload: Command,
    pub synced: bool,
    pub retry_count: u32,
    pub max_retries: u32,
    pub created_at: Timestamp,
    pub last_error: Option<String>,
}

impl QueuedCommand {
    /// Wrap `payload` in a fresh, unsynced entry.
    ///
    /// # Errors
    ///
    /// Returns [`VoxlineError::Validation`] when `max_retries` is zero.
    pub fn new(payload: Command, max_retries: u32, at: Timestamp) -> Result<Self, VoxlineError> {
        if max_retries == 0 {
            return Err(ValidationError::ZeroRetryBudget.into());
        }
        Ok(Self {
            id: QueueEntryId::new(),
            command_id: payload.id,
            payload,
            synced: false,
            retry_count: 0,
            max_retries,
            created_at: at,
            last_error: None,
        })
    }

    /// Selected by the next drain pass.
    #[must_use]
    pub fn is_eligible(&self) -> bool {
        !self.synced && self.retry_count < self.max_retries
    }

    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        !self.synced && self.retry_count >= self.max_retries
    }

    pub fn mark_synced(&mut self) {
        self.synced = true;
        self.last_error = None;
    }

    /// Count a failed delivery attempt. Returns `true` once the budget is spent.
    pub fn record_failure(&mut self, error: impl Into<String>) -> bool {
        self.retry_count = self.retry_count.saturating_add(1);
        self.last_error = Some(error.into());
        self.is_exhausted()
    }

    /// Take the entry out of future drains without deleting it.
    pub fn discard(&mut self, reason: impl Into<String>) {
        self.retry_count = self.max_retries;
        self.last_error = Some(reason.into());
    }
}
