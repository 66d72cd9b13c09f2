//! Startup recovery and retention.
//!
//! After a crash, commands can be stuck in any non-terminal state. Recovery
//! walks each of them once and puts it back on a path that ends in a
//! terminal state, redelivering under the original command id.

use serde::Serialize;
use tracing::{info, warn};
use voxline_domain::command::{Command, CommandState};
use voxline_domain::error::{CommandError, VoxlineError};
use voxline_domain::time::retention_cutoff;

use super::Orchestrator;
use crate::ports::{
    CommandRepository, EventPublisher, IntentBackend, QueueRepository, ScheduleRepository,
    Transport,
};

const INTERRUPTED_REASON: &str = "interrupted by restart";
const ORPHANED_REASON: &str = "schedule entry missing";

/// What [`Orchestrator::recover`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    /// `Pending` commands resolved again.
    pub resumed: usize,
    /// Commands put back into the offline queue.
    pub requeued: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl RecoveryReport {
    #[must_use]
    pub fn total(&self) -> usize {
        self.resumed + self.requeued + self.completed + self.failed + self.cancelled
    }
}

impl<CR, QR, SR, T, P, I> Orchestrator<CR, QR, SR, T, P, I>
where
    CR: CommandRepository + Send + Sync + 'static,
    QR: QueueRepository + Send + Sync + 'static,
    SR: ScheduleRepository + Send + Sync + 'static,
    T: Transport + 'static,
    P: EventPublisher + Send + Sync + 'static,
    I: IntentBackend + 'static,
{
    /// Repair commands left mid-flight by a previous run.
    ///
    /// Must run before the background loops start. A `Scheduled` anchor
    /// whose entry was never stored is cancelled; the others fire on the
    /// next poll.
    ///
    /// # Errors
    ///
    /// Returns a storage error. Commands that cannot be repaired for any
    /// other reason are logged and skipped.
    #[tracing::instrument(skip_all)]
    pub async fn recover(&self) -> Result<RecoveryReport, VoxlineError> {
        // snapshot first: repairs move commands between the states walked here
        let mut stranded = Vec::new();
        for state in [
            CommandState::Pending,
            CommandState::Matched,
            CommandState::Scheduled,
            CommandState::Dispatched,
            CommandState::Queued,
            CommandState::Synced,
        ] {
            stranded.extend(self.commands.find_by_state(state).await?);
        }

        let mut report = RecoveryReport::default();
        for command in stranded {
            let id = command.id;
            match self.recover_one(command, &mut report).await {
                Ok(()) => {}
                Err(err) if err.is_storage() => return Err(err),
                Err(err) => warn!(command_id = %id, %err, "command not recovered"),
            }
        }
        if report.total() > 0 {
            info!(?report, "recovered interrupted commands");
        }
        Ok(report)
    }

    async fn recover_one(
        &self,
        command: Command,
        report: &mut RecoveryReport,
    ) -> Result<(), VoxlineError> {
        let id = command.id;
        match command.state {
            CommandState::Pending => {
                self.resolve_and_advance(command).await?;
                report.resumed += 1;
            }
            CommandState::Matched if command.is_macro() => {
                self.try_transition(id, CommandState::Cancelled, |c| {
                    c.reason = Some(INTERRUPTED_REASON.to_string());
                })
                .await?;
                report.cancelled += 1;
            }
            CommandState::Dispatched if command.is_macro() => {
                self.try_transition(id, CommandState::Failed, |c| {
                    c.reason = Some(INTERRUPTED_REASON.to_string());
                })
                .await?;
                report.failed += 1;
            }
            CommandState::Matched | CommandState::Dispatched => {
                self.fall_back_to_queue(id, INTERRUPTED_REASON).await?;
                report.requeued += 1;
            }
            CommandState::Queued => match self.queue.find_by_command(id).await? {
                None => {
                    self.queue.enqueue(&command, self.clock.now()).await?;
                    report.requeued += 1;
                }
                Some(entry) if entry.synced => {
                    if self
                        .try_transition(id, CommandState::Synced, |_| {})
                        .await?
                        .is_some()
                    {
                        self.try_transition(id, CommandState::Completed, |_| {}).await?;
                    }
                    report.completed += 1;
                }
                Some(entry) if entry.is_exhausted() => {
                    let reason = CommandError::RetriesExhausted {
                        attempts: entry.retry_count,
                    }
                    .to_string();
                    self.try_transition(id, CommandState::Failed, move |c| {
                        c.reason = Some(reason.clone());
                    })
                    .await?;
                    report.failed += 1;
                }
                Some(_) => {}
            },
            CommandState::Synced => {
                self.try_transition(id, CommandState::Completed, |_| {}).await?;
                report.completed += 1;
            }
            CommandState::Scheduled => {
                if self.scheduler.find_for_command(id).await?.is_empty() {
                    self.try_transition(id, CommandState::Cancelled, |c| {
                        c.reason = Some(ORPHANED_REASON.to_string());
                    })
                    .await?;
                    report.cancelled += 1;
                }
            }
            CommandState::Completed
            | CommandState::Failed
            | CommandState::Cancelled => {}
        }
        Ok(())
    }

    /// Delete terminal commands last touched more than `days` ago.
    /// Returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns a storage error propagated from the repository.
    #[tracing::instrument(skip(self))]
    pub async fn sweep_retention(&self, days: u32) -> Result<u64, VoxlineError> {
        let cutoff = retention_cutoff(self.clock.now(), days);
        let removed = self.commands.delete_terminal_before(cutoff).await?;
        if removed > 0 {
            info!(removed, %cutoff, "expired commands swept");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;
    use voxline_domain::command::{DeliveryReceipt, Resolution};
    use voxline_domain::queue::QueuedCommand;

    use super::super::tests::{eventually, harness};
    use super::*;
    use crate::ports::{Clock, CommandGateway, ScheduleRequest};
    use crate::testing::FakeTransport;

    fn delivery(text: &str) -> Resolution {
        Resolution::MatchedTemplate {
            template: text.replace(' ', "_"),
            confidence: 1.0,
            response: None,
        }
    }

    /// A command walked to `path`'s last state, as a crashed run left it.
    fn stranded(text: &str, resolution: Resolution, path: &[CommandState]) -> Command {
        let mut command = Command::builder().text(text).build().unwrap();
        command.resolution = Some(resolution);
        for state in path {
            command.transition(*state, command.created_at).unwrap();
        }
        command
    }

    #[tokio::test]
    async fn should_requeue_commands_interrupted_mid_delivery() {
        let h = harness(FakeTransport::offline());
        let matched = stranded("lock the door", delivery("lock the door"), &[CommandState::Matched]);
        let dispatched = stranded(
            "close the blinds",
            delivery("close the blinds"),
            &[CommandState::Matched, CommandState::Dispatched],
        );
        h.commands.create(matched.clone()).await.unwrap();
        h.commands.create(dispatched.clone()).await.unwrap();

        let report = h.orchestrator.recover().await.unwrap();

        assert_eq!(report.requeued, 2);
        assert_eq!(h.commands.get(matched.id).unwrap().state, CommandState::Queued);
        assert_eq!(h.commands.get(dispatched.id).unwrap().state, CommandState::Queued);
        let queued: Vec<_> = h.queue.all().into_iter().map(|e| e.command_id).collect();
        assert!(queued.contains(&matched.id));
        assert!(queued.contains(&dispatched.id));

        h.transport.set_available(true);
        h.orchestrator.drain_offline_queue().await.unwrap();
        assert_eq!(h.commands.get(dispatched.id).unwrap().state, CommandState::Completed);
        assert!(h.transport.delivered().contains(&dispatched.id));
    }

    #[tokio::test]
    async fn should_enqueue_queued_command_without_entry() {
        let h = harness(FakeTransport::offline());
        let queued = stranded(
            "lock the door",
            delivery("lock the door"),
            &[CommandState::Matched, CommandState::Queued],
        );
        h.commands.create(queued.clone()).await.unwrap();

        let report = h.orchestrator.recover().await.unwrap();

        assert_eq!(report.requeued, 1);
        assert_eq!(h.queue.all()[0].command_id, queued.id);
        assert_eq!(h.commands.get(queued.id).unwrap().state, CommandState::Queued);
    }

    #[tokio::test]
    async fn should_fail_queued_command_whose_entry_is_exhausted() {
        let h = harness(FakeTransport::offline());
        let queued = stranded(
            "lock the door",
            delivery("lock the door"),
            &[CommandState::Matched, CommandState::Queued],
        );
        h.commands.create(queued.clone()).await.unwrap();
        let mut entry = QueuedCommand::new(queued.clone(), 3, queued.created_at).unwrap();
        for _ in 0..3 {
            entry.record_failure("timeout");
        }
        h.queue.enqueue(entry).await.unwrap();

        let report = h.orchestrator.recover().await.unwrap();

        assert_eq!(report.failed, 1);
        let command = h.commands.get(queued.id).unwrap();
        assert_eq!(command.state, CommandState::Failed);
        assert_eq!(command.reason.as_deref(), Some("delivery failed after 3 attempts"));
    }

    #[tokio::test]
    async fn should_complete_synced_commands() {
        let h = harness(FakeTransport::offline());
        let mut synced = stranded(
            "lock the door",
            delivery("lock the door"),
            &[CommandState::Matched, CommandState::Queued, CommandState::Synced],
        );
        synced.result = Some(DeliveryReceipt::ok(serde_json::json!({"ok": true})));
        h.commands.create(synced.clone()).await.unwrap();

        let report = h.orchestrator.recover().await.unwrap();

        assert_eq!(report.completed, 1);
        assert_eq!(h.commands.get(synced.id).unwrap().state, CommandState::Completed);
    }

    #[tokio::test]
    async fn should_fail_macro_interrupted_mid_run() {
        let h = harness(FakeTransport::offline());
        let running = stranded(
            "run bedtime",
            Resolution::Macro {
                name: "bedtime".into(),
            },
            &[CommandState::Matched, CommandState::Dispatched],
        );
        h.commands.create(running.clone()).await.unwrap();

        let report = h.orchestrator.recover().await.unwrap();

        assert_eq!(report.failed, 1);
        let command = h.commands.get(running.id).unwrap();
        assert_eq!(command.state, CommandState::Failed);
        assert_eq!(command.reason.as_deref(), Some(INTERRUPTED_REASON));
        assert!(h.queue.all().is_empty());
    }

    #[tokio::test]
    async fn should_cancel_scheduled_anchor_left_without_entry() {
        let h = harness(FakeTransport::online());
        let orphan = stranded(
            "lock the door",
            delivery("lock the door"),
            &[CommandState::Matched, CommandState::Scheduled],
        );
        h.commands.create(orphan.clone()).await.unwrap();
        let parked = h
            .orchestrator
            .schedule(ScheduleRequest {
                text: "close the blinds".to_string(),
                expression: "2030-01-02T08:00:00Z".to_string(),
                recurring: false,
                metadata: serde_json::Value::Null,
            })
            .await
            .unwrap();

        let report = h.orchestrator.recover().await.unwrap();

        assert_eq!(report.cancelled, 1);
        let command = h.commands.get(orphan.id).unwrap();
        assert_eq!(command.state, CommandState::Cancelled);
        assert_eq!(command.reason.as_deref(), Some(ORPHANED_REASON));
        assert_eq!(
            h.commands.get(parked.command_id).unwrap().state,
            CommandState::Scheduled
        );
    }

    #[tokio::test]
    async fn should_resolve_pending_commands_again() {
        let h = harness(FakeTransport::online());
        let pending = Command::builder().text("lock the door").build().unwrap();
        h.commands.create(pending.clone()).await.unwrap();

        let report = h.orchestrator.recover().await.unwrap();

        assert_eq!(report.resumed, 1);
        eventually(&h, pending.id, CommandState::Completed).await;
    }

    #[tokio::test]
    async fn should_sweep_only_expired_terminal_commands() {
        let h = harness(FakeTransport::online());
        let now = h.clock.now();
        let mut old = stranded("lock the door", delivery("lock the door"), &[CommandState::Cancelled]);
        old.updated_at = now - TimeDelta::days(31);
        let mut recent = stranded("lock the door", delivery("lock the door"), &[CommandState::Cancelled]);
        recent.updated_at = now - TimeDelta::days(2);
        let mut active = stranded("lock the door", delivery("lock the door"), &[CommandState::Matched]);
        active.updated_at = now - TimeDelta::days(90);
        for command in [&old, &recent, &active] {
            h.commands.create(command.clone()).await.unwrap();
        }

        let removed = h.orchestrator.sweep_retention(30).await.unwrap();

        assert_eq!(removed, 1);
        assert!(h.commands.get(old.id).is_none());
        assert!(h.commands.get(recent.id).is_some());
        assert!(h.commands.get(active.id).is_some());
    }
}
