//! `SQLite` implementation of [`QueueRepository`].

use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row, SqlitePool};
use voxline_app::ports::QueueRepository;
use voxline_domain::error::{NotFoundError, VoxlineError};
use voxline_domain::id::{CommandId, QueueEntryId};
use voxline_domain::queue::QueuedCommand;

use crate::codec::{decode_json, decode_ts, encode_ts};
use crate::error::StorageError;

const INSERT: &str = "INSERT INTO queued_commands \
    (id, command_id, payload, synced, retry_count, max_retries, created_at, last_error) \
    VALUES (?, ?, ?, ?, ?, ?, ?, ?)";

const SELECT_PENDING: &str = "SELECT * FROM queued_commands \
    WHERE synced = 0 AND retry_count < max_retries \
    ORDER BY created_at ASC, seq ASC";

const SELECT_LATEST_FOR_COMMAND: &str =
    "SELECT * FROM queued_commands WHERE command_id = ? ORDER BY seq DESC LIMIT 1";

const UPDATE: &str = "UPDATE queued_commands SET \
    payload = ?, synced = ?, retry_count = ?, max_retries = ?, last_error = ? \
    WHERE id = ?";

/// `SQLite`-backed offline queue.
///
/// Entries are never deleted here: synced and exhausted ones stay for
/// inspection until the retention sweep removes their command.
#[derive(Clone)]
pub struct SqliteQueueRepository {
    pool: SqlitePool,
}

impl SqliteQueueRepository {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

struct Wrapper(QueuedCommand);

impl<'r> FromRow<'r, SqliteRow> for Wrapper {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let id: uuid::Uuid = row.try_get("id")?;
        let command_id: uuid::Uuid = row.try_get("command_id")?;
        let payload: String = row.try_get("payload")?;
        let created_at: String = row.try_get("created_at")?;

        Ok(Self(QueuedCommand {
            id: QueueEntryId::from_uuid(id),
            command_id: CommandId::from_uuid(command_id),
            payload: decode_json(&payload)?,
            synced: row.try_get("synced")?,
            retry_count: row.try_get("retry_count")?,
            max_retries: row.try_get("max_retries")?,
            created_at: decode_ts(&created_at)?,
            last_error: row.try_get("last_error")?,
        }))
    }
}

impl QueueRepository for SqliteQueueRepository {
    async fn enqueue(&self, entry: QueuedCommand) -> Result<QueuedCommand, VoxlineError> {
        let payload = serde_json::to_string(&entry.payload).map_err(StorageError::from)?;
        sqlx::query(INSERT)
            .bind(entry.id.as_uuid())
            .bind(entry.command_id.as_uuid())
            .bind(&payload)
            .bind(entry.synced)
            .bind(entry.retry_count)
            .bind(entry.max_retries)
            .bind(encode_ts(entry.created_at))
            .bind(entry.last_error.as_deref())
            .execute(&self.pool)
            .await
            .map_err(StorageError::from)?;

        Ok(entry)
    }

    async fn find_pending(&self) -> Result<Vec<QueuedCommand>, VoxlineError> {
        let rows: Vec<Wrapper> = sqlx::query_as(SELECT_PENDING)
            .fetch_all(&self.pool)
            .await
            .map_err(StorageError::from)?;

        Ok(rows.into_iter().map(|Wrapper(entry)| entry).collect())
    }

    async fn find_by_command(&self, command_id: CommandId) -> Result<Option<QueuedCommand>, VoxlineError> {
        let row: Option<Wrapper> = sqlx::query_as(SELECT_LATEST_FOR_COMMAND)
            .bind(command_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(StorageError::from)?;

        Ok(row.map(|Wrapper(entry)| entry))
    }

    async fn update(&self, entry: QueuedCommand) -> Result<QueuedCommand, VoxlineError> {
        let payload = serde_json::to_string(&entry.payload).map_err(StorageError::from)?;
        let done = sqlx::query(UPDATE)
            .bind(&payload)
            .bind(entry.synced)
            .bind(entry.retry_count)
            .bind(entry.max_retries)
            .bind(entry.last_error.as_deref())
            .bind(entry.id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(StorageError::from)?;

        if done.rows_affected() == 0 {
            return Err(NotFoundError {
                entity: "QueuedCommand",
                id: entry.id.to_string(),
            }
            .into());
        }
        Ok(entry)
    }
}
