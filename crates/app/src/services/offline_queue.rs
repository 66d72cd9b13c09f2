//! Offline queue: durable buffering of commands produced while disconnected.
//!
//! The queue owns its entries. It reports what happened to each one during
//! a drain and leaves the matching command transitions to the orchestrator.

use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use voxline_domain::command::{Command, DeliveryReceipt};
use voxline_domain::error::VoxlineError;
use voxline_domain::id::CommandId;
use voxline_domain::queue::{DEFAULT_MAX_RETRIES, QueuedCommand};
use voxline_domain::time::Timestamp;

use crate::ports::{QueueRepository, Transport, TransportError};

/// What a drain pass did with one entry.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    Delivered(DeliveryReceipt),
    /// Delivery failed; the entry stays eligible.
    Retry(TransportError),
    /// Delivery failed and the retry budget is spent.
    Exhausted(TransportError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyncResult {
    /// The entry as persisted after this attempt.
    pub entry: QueuedCommand,
    pub outcome: SyncOutcome,
}

pub struct OfflineQueue<QR> {
    repo: QR,
    max_retries: u32,
    drain_lock: Mutex<()>,
}

impl<QR: QueueRepository> OfflineQueue<QR> {
    pub fn new(repo: QR, max_retries: u32) -> Self {
        Self {
            repo,
            max_retries: max_retries.max(1),
            drain_lock: Mutex::new(()),
        }
    }

    pub fn with_default_retries(repo: QR) -> Self {
        Self::new(repo, DEFAULT_MAX_RETRIES)
    }

    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Snapshot `command` into a new entry. Durable once this returns.
    ///
    /// # Errors
    ///
    /// Returns a storage error propagated from the repository.
    #[tracing::instrument(skip(self, command), fields(command_id = %command.id))]
    pub async fn enqueue(&self, command: &Command, now: Timestamp) -> Result<QueuedCommand, VoxlineError> {
        let entry = QueuedCommand::new(command.clone(), self.max_retries, now)?;
        let entry = self.repo.enqueue(entry).await?;
        info!(entry_id = %entry.id, "command queued for later delivery");
        Ok(entry)
    }

    /// Latest entry recorded for `command_id`.
    ///
    /// # Errors
    ///
    /// Returns a storage error propagated from the repository.
    pub async fn find_by_command(
        &self,
        command_id: CommandId,
    ) -> Result<Option<QueuedCommand>, VoxlineError> {
        self.repo.find_by_command(command_id).await
    }

    /// Withdraw the pending entry of `command_id`, if any, from future drains.
    ///
    /// # Errors
    ///
    /// Returns a storage error propagated from the repository.
    pub async fn discard(&self, command_id: CommandId, reason: &str) -> Result<bool, VoxlineError> {
        match self.repo.find_by_command(command_id).await? {
            Some(mut entry) if entry.is_eligible() => {
                entry.discard(reason);
                self.repo.update(entry).await?;
                debug!(%command_id, reason, "queue entry discarded");
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Try to deliver every eligible entry once, oldest first.
    ///
    /// Passes are serialized: a drain started while another runs waits for
    /// it and then sees the updated entries. A failed delivery never stops
    /// the pass.
    ///
    /// # Errors
    ///
    /// Returns a storage error; results of entries already attempted are
    /// persisted but not returned.
    #[tracing::instrument(skip(self, transport))]
    pub async fn drain<T: Transport>(&self, transport: &T) -> Result<Vec<SyncResult>, VoxlineError> {
        let _guard = self.drain_lock.lock().await;
        let pending = self.repo.find_pending().await?;
        if pending.is_empty() {
            return Ok(Vec::new());
        }
        debug!(pending = pending.len(), "draining offline queue");

        let mut results = Vec::with_capacity(pending.len());
        for mut entry in pending {
            let outcome = match transport.deliver(&entry.payload).await {
                Ok(receipt) => {
                    entry.mark_synced();
                    SyncOutcome::Delivered(receipt)
                }
                Err(err) => {
                    let exhausted = entry.record_failure(err.to_string());
                    warn!(
                        command_id = %entry.command_id,
                        attempt = entry.retry_count,
                        max_retries = entry.max_retries,
                        %err,
                        "queued delivery failed"
                    );
                    if exhausted {
                        SyncOutcome::Exhausted(err)
                    } else {
                        SyncOutcome::Retry(err)
                    }
                }
            };
            let entry = self.repo.update(entry).await?;
            results.push(SyncResult { entry, outcome });
        }

        let delivered = results
            .iter()
            .filter(|r| matches!(r.outcome, SyncOutcome::Delivered(_)))
            .count();
        info!(attempted = results.len(), delivered, "offline queue drained");
        Ok(results)
    }
}
