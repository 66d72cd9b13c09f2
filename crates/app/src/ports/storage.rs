//! Storage port: repository traits for the durable store.
//!
//! The store is the single source of truth for commands, schedule entries and
//! queue entries. Every write is a single-entity transaction; command updates
//! are additionally guarded by an optimistic `version` check so that the
//! orchestrator, the drain pass and the scheduler never overwrite each
//! other's transitions.

use std::future::Future;

use voxline_domain::command::{Command, CommandState};
use voxline_domain::error::VoxlineError;
use voxline_domain::id::{CommandId, ScheduleEntryId};
use voxline_domain::queue::QueuedCommand;
use voxline_domain::schedule::ScheduleEntry;
use voxline_domain::time::Timestamp;

/// Repository for persisting and querying [`Command`]s.
pub trait CommandRepository {
    /// Insert a new command.
    fn create(&self, command: Command) -> impl Future<Output = Result<Command, VoxlineError>> + Send;

    /// Get a command by its unique identifier.
    fn get_by_id(
        &self,
        id: CommandId,
    ) -> impl Future<Output = Result<Option<Command>, VoxlineError>> + Send;

    /// Overwrite a command whose stored version equals `command.version`.
    ///
    /// Returns the stored command with its version bumped, a
    /// [`VoxlineError::Conflict`] when another writer got there first, or
    /// [`VoxlineError::NotFound`] when the command does not exist.
    fn update(&self, command: Command) -> impl Future<Output = Result<Command, VoxlineError>> + Send;

    /// All commands currently in `state`, oldest first.
    fn find_by_state(
        &self,
        state: CommandState,
    ) -> impl Future<Output = Result<Vec<Command>, VoxlineError>> + Send;

    /// Delete terminal commands last updated before `cutoff`, together with
    /// their queue entries. Returns the number of commands removed.
    fn delete_terminal_before(
        &self,
        cutoff: Timestamp,
    ) -> impl Future<Output = Result<u64, VoxlineError>> + Send;
}

/// Repository for persisted [`ScheduleEntry`]s.
pub trait ScheduleRepository {
    fn create(
        &self,
        entry: ScheduleEntry,
    ) -> impl Future<Output = Result<ScheduleEntry, VoxlineError>> + Send;

    fn get_by_id(
        &self,
        id: ScheduleEntryId,
    ) -> impl Future<Output = Result<Option<ScheduleEntry>, VoxlineError>> + Send;

    /// Entries with `next_run <= now`, earliest first.
    fn find_due(
        &self,
        now: Timestamp,
    ) -> impl Future<Output = Result<Vec<ScheduleEntry>, VoxlineError>> + Send;

    /// Entries anchored on `command_id`.
    fn find_by_command(
        &self,
        command_id: CommandId,
    ) -> impl Future<Output = Result<Vec<ScheduleEntry>, VoxlineError>> + Send;

    fn update(
        &self,
        entry: ScheduleEntry,
    ) -> impl Future<Output = Result<ScheduleEntry, VoxlineError>> + Send;

    fn delete(&self, id: ScheduleEntryId) -> impl Future<Output = Result<(), VoxlineError>> + Send;
}

/// Repository for offline [`QueuedCommand`]s.
pub trait QueueRepository {
    /// Durably persist a new entry.
    fn enqueue(
        &self,
        entry: QueuedCommand,
    ) -> impl Future<Output = Result<QueuedCommand, VoxlineError>> + Send;

    /// Unsynced entries with retry budget left, in creation order.
    fn find_pending(&self) -> impl Future<Output = Result<Vec<QueuedCommand>, VoxlineError>> + Send;

    /// Most recent entry for `command_id`, synced or not.
    fn find_by_command(
        &self,
        command_id: CommandId,
    ) -> impl Future<Output = Result<Option<QueuedCommand>, VoxlineError>> + Send;

    fn update(
        &self,
        entry: QueuedCommand,
    ) -> impl Future<Output = Result<QueuedCommand, VoxlineError>> + Send;
}
