//! Command scheduler: fires persisted schedule entries when they fall due.
//!
//! The scheduler owns the existence of schedule entries. What a firing does
//! to commands is delegated to a [`FiringHandler`] (the orchestrator).

use std::future::Future;
use std::time::Duration;

use tracing::{debug, info, warn};
use voxline_domain::error::{CommandError, VoxlineError};
use voxline_domain::id::{CommandId, ScheduleEntryId};
use voxline_domain::schedule::{FiringOutcome, ScheduleEntry};
use voxline_domain::time::Timestamp;

use crate::ports::ScheduleRepository;

/// Default interval between two polls of the schedule table.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Reacts to a due schedule entry.
pub trait FiringHandler: Send + Sync {
    /// Submit the entry's command.
    ///
    /// Returning [`CommandError::Cancelled`] or a not-found error retires the
    /// entry; any other error is logged and the entry advances as if it had
    /// fired.
    fn fire(&self, entry: &ScheduleEntry) -> impl Future<Output = Result<(), VoxlineError>> + Send;
}

/// Registration and polling of schedule entries.
pub struct Scheduler<SR> {
    repo: SR,
    poll_interval: Duration,
}

impl<SR: ScheduleRepository> Scheduler<SR> {
    pub fn new(repo: SR, poll_interval: Duration) -> Self {
        Self {
            repo,
            poll_interval,
        }
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Validate a registration without persisting anything.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::InvalidSchedule`] when the expression is
    /// neither an absolute timestamp nor a valid recurrence, or
    /// [`VoxlineError::Validation`] for empty command text.
    pub fn prepare(
        &self,
        command_id: CommandId,
        command: &str,
        expression: &str,
        recurring: bool,
        metadata: serde_json::Value,
        now: Timestamp,
    ) -> Result<ScheduleEntry, VoxlineError> {
        ScheduleEntry::builder()
            .command_id(command_id)
            .command(command)
            .expression(expression)
            .recurring(recurring)
            .metadata(metadata)
            .created_at(now)
            .build()
    }

    /// Persist a prepared entry.
    ///
    /// # Errors
    ///
    /// Returns a storage error propagated from the repository.
    #[tracing::instrument(skip(self, entry), fields(entry_id = %entry.id, next_run = %entry.next_run))]
    pub async fn register(&self, entry: ScheduleEntry) -> Result<ScheduleEntry, VoxlineError> {
        let entry = self.repo.create(entry).await?;
        info!(recurring = entry.recurring, "schedule entry registered");
        Ok(entry)
    }

    /// Validate and persist a new entry for `command_id`.
    ///
    /// # Errors
    ///
    /// See [`prepare`](Self::prepare) and [`register`](Self::register).
    pub async fn schedule(
        &self,
        command_id: CommandId,
        command: &str,
        expression: &str,
        recurring: bool,
        metadata: serde_json::Value,
        now: Timestamp,
    ) -> Result<ScheduleEntry, VoxlineError> {
        let entry = self.prepare(command_id, command, expression, recurring, metadata, now)?;
        self.register(entry).await
    }

    /// Look up an entry by id.
    ///
    /// # Errors
    ///
    /// Returns a storage error propagated from the repository.
    pub async fn get(&self, id: ScheduleEntryId) -> Result<Option<ScheduleEntry>, VoxlineError> {
        self.repo.get_by_id(id).await
    }

    /// Entries anchored on `command_id`.
    ///
    /// # Errors
    ///
    /// Returns a storage error propagated from the repository.
    pub async fn find_for_command(
        &self,
        command_id: CommandId,
    ) -> Result<Vec<ScheduleEntry>, VoxlineError> {
        self.repo.find_by_command(command_id).await
    }

    /// Remove every entry anchored on `command_id`. Returns how many went.
    ///
    /// # Errors
    ///
    /// Returns a storage error propagated from the repository.
    pub async fn remove_for_command(&self, command_id: CommandId) -> Result<usize, VoxlineError> {
        let entries = self.find_for_command(command_id).await?;
        for entry in &entries {
            self.repo.delete(entry.id).await?;
        }
        Ok(entries.len())
    }

    /// Fire every entry due at `now`, once each.
    ///
    /// Recurring entries are rescheduled strictly after `now` (missed ticks
    /// are not replayed); one-shot entries are deleted. Returns the number
    /// of entries fired.
    ///
    /// # Errors
    ///
    /// Returns a storage error; entries already processed stay processed.
    #[tracing::instrument(skip(self, handler))]
    pub async fn poll_once<H>(&self, now: Timestamp, handler: &H) -> Result<usize, VoxlineError>
    where
        H: FiringHandler + ?Sized,
    {
        let due = self.repo.find_due(now).await?;
        let mut fired = 0;
        for mut entry in due {
            debug!(entry_id = %entry.id, command = %entry.command, "firing schedule entry");
            match handler.fire(&entry).await {
                Ok(()) => fired += 1,
                Err(
                    VoxlineError::Command(CommandError::Cancelled) | VoxlineError::NotFound(_),
                ) => {
                    info!(entry_id = %entry.id, "anchor command gone, retiring entry");
                    self.repo.delete(entry.id).await?;
                    continue;
                }
                Err(err) if err.is_storage() => return Err(err),
                Err(err) => {
                    warn!(entry_id = %entry.id, %err, "schedule firing failed");
                    fired += 1;
                }
            }

            match entry.record_firing(now) {
                Ok(FiringOutcome::Reschedule(next)) => {
                    debug!(entry_id = %entry.id, %next, "rescheduled");
                    self.repo.update(entry).await?;
                }
                Ok(FiringOutcome::Retire) => self.repo.delete(entry.id).await?,
                Err(err) => {
                    warn!(entry_id = %entry.id, %err, "stored expression no longer parses, retiring");
                    self.repo.delete(entry.id).await?;
                }
            }
        }
        Ok(fired)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use chrono::TimeDelta;
    use voxline_domain::id::ScheduleEntryId;

    use super::*;
    use crate::testing::InMemoryScheduleRepo;

    #[derive(Default)]
    struct RecordingHandler {
        fired: Mutex<Vec<(ScheduleEntryId, Timestamp)>>,
        reply_cancelled: bool,
    }

    impl RecordingHandler {
        fn count(&self) -> usize {
            self.fired.lock().unwrap().len()
        }
    }

    impl FiringHandler for RecordingHandler {
        fn fire(&self, entry: &ScheduleEntry) -> impl Future<Output = Result<(), VoxlineError>> + Send {
            self.fired.lock().unwrap().push((entry.id, entry.next_run));
            let result = if self.reply_cancelled {
                Err(CommandError::Cancelled.into())
            } else {
                Ok(())
            };
            async { result }
        }
    }

    fn ts(s: &str) -> Timestamp {
        s.parse().unwrap()
    }

    fn scheduler() -> (Scheduler<InMemoryScheduleRepo>, InMemoryScheduleRepo) {
        let repo = InMemoryScheduleRepo::default();
        (Scheduler::new(repo.clone(), DEFAULT_POLL_INTERVAL), repo)
    }

    #[tokio::test]
    async fn should_reject_invalid_expression_before_persisting() {
        let (scheduler, repo) = scheduler();
        let result = scheduler
            .schedule(CommandId::new(), "feed the cat", "whenever", false, serde_json::Value::Null, ts("2030-01-01T00:00:00Z"))
            .await;
        assert!(matches!(
            result,
            Err(VoxlineError::Command(CommandError::InvalidSchedule { .. }))
        ));
        assert!(repo.all().is_empty());
    }

    #[tokio::test]
    async fn should_fire_recurring_entry_once_per_poll_sixty_one_seconds_apart() {
        let (scheduler, repo) = scheduler();
        let start = ts("2030-01-01T10:00:30Z");
        let entry = scheduler
            .schedule(CommandId::new(), "check the mail", "* * * * *", true, serde_json::Value::Null, start)
            .await
            .unwrap();
        let handler = RecordingHandler::default();

        let first_poll = entry.next_run + TimeDelta::seconds(1);
        assert_eq!(scheduler.poll_once(first_poll, &handler).await.unwrap(), 1);
        let after_first = repo.all()[0].next_run;
        assert!(after_first > first_poll);

        let second_poll = first_poll + TimeDelta::seconds(61);
        assert_eq!(scheduler.poll_once(second_poll, &handler).await.unwrap(), 1);
        let after_second = repo.all()[0].next_run;
        assert!(after_second > second_poll);

        assert_eq!(handler.count(), 2);
        assert_eq!(repo.all()[0].last_run, Some(second_poll));
    }

    #[tokio::test]
    async fn should_not_backfill_missed_ticks() {
        let (scheduler, repo) = scheduler();
        let start = ts("2030-01-01T10:00:00Z");
        scheduler
            .schedule(CommandId::new(), "ping", "* * * * *", true, serde_json::Value::Null, start)
            .await
            .unwrap();
        let handler = RecordingHandler::default();

        // ten minutes late
        let late = start + TimeDelta::minutes(10) + TimeDelta::seconds(5);
        scheduler.poll_once(late, &handler).await.unwrap();
        scheduler.poll_once(late, &handler).await.unwrap();

        assert_eq!(handler.count(), 1);
        assert_eq!(repo.all()[0].next_run, ts("2030-01-01T10:11:00Z"));
    }

    #[tokio::test]
    async fn should_delete_one_shot_entry_after_firing() {
        let (scheduler, repo) = scheduler();
        let now = ts("2030-01-01T10:00:00Z");
        scheduler
            .schedule(CommandId::new(), "water the plants", "2030-01-01T10:05:00Z", false, serde_json::Value::Null, now)
            .await
            .unwrap();
        let handler = RecordingHandler::default();

        assert_eq!(scheduler.poll_once(now, &handler).await.unwrap(), 0);
        assert_eq!(repo.all().len(), 1);

        let due = now + TimeDelta::minutes(5);
        assert_eq!(scheduler.poll_once(due, &handler).await.unwrap(), 1);
        assert!(repo.all().is_empty());
    }

    #[tokio::test]
    async fn should_retire_entry_when_anchor_was_cancelled() {
        let (scheduler, repo) = scheduler();
        let now = ts("2030-01-01T10:00:00Z");
        scheduler
            .schedule(CommandId::new(), "ping", "* * * * *", true, serde_json::Value::Null, now)
            .await
            .unwrap();
        let handler = RecordingHandler {
            reply_cancelled: true,
            ..RecordingHandler::default()
        };

        let fired = scheduler
            .poll_once(now + TimeDelta::minutes(2), &handler)
            .await
            .unwrap();

        assert_eq!(fired, 0);
        assert!(repo.all().is_empty());
    }

    #[tokio::test]
    async fn should_remove_entries_for_command() {
        let (scheduler, repo) = scheduler();
        let anchor = CommandId::new();
        let now = ts("2030-01-01T10:00:00Z");
        scheduler
            .schedule(anchor, "a", "* * * * *", true, serde_json::Value::Null, now)
            .await
            .unwrap();
        scheduler
            .schedule(CommandId::new(), "b", "* * * * *", true, serde_json::Value::Null, now)
            .await
            .unwrap();

        assert_eq!(scheduler.remove_for_command(anchor).await.unwrap(), 1);
        assert_eq!(repo.all().len(), 1);
    }
}
