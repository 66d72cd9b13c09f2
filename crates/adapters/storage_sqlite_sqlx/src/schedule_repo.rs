//! `SQLite` implementation of [`ScheduleRepository`].

use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row, SqlitePool};
use voxline_app::ports::ScheduleRepository;
use voxline_domain::error::{NotFoundError, VoxlineError};
use voxline_domain::id::{CommandId, ScheduleEntryId};
use voxline_domain::schedule::ScheduleEntry;
use voxline_domain::time::Timestamp;

use crate::codec::{decode_json, decode_opt_ts, decode_ts, encode_ts};
use crate::error::StorageError;

const INSERT: &str = "INSERT INTO schedule_entries \
    (id, command_id, command, expression, recurring, metadata, next_run, last_run, created_at) \
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)";

const SELECT_BY_ID: &str = "SELECT * FROM schedule_entries WHERE id = ?";

const SELECT_DUE: &str =
    "SELECT * FROM schedule_entries WHERE next_run <= ? ORDER BY next_run ASC, created_at ASC";

const SELECT_BY_COMMAND: &str =
    "SELECT * FROM schedule_entries WHERE command_id = ? ORDER BY created_at ASC";

const UPDATE: &str = "UPDATE schedule_entries SET \
    command = ?, expression = ?, recurring = ?, metadata = ?, next_run = ?, last_run = ? \
    WHERE id = ?";

const DELETE: &str = "DELETE FROM schedule_entries WHERE id = ?";

/// `SQLite`-backed schedule entry repository.
#[derive(Clone)]
pub struct SqliteScheduleRepository {
    pool: SqlitePool,
}

impl SqliteScheduleRepository {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

struct Wrapper(ScheduleEntry);

impl<'r> FromRow<'r, SqliteRow> for Wrapper {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let id: uuid::Uuid = row.try_get("id")?;
        let command_id: uuid::Uuid = row.try_get("command_id")?;
        let metadata: String = row.try_get("metadata")?;
        let next_run: String = row.try_get("next_run")?;
        let created_at: String = row.try_get("created_at")?;

        Ok(Self(ScheduleEntry {
            id: ScheduleEntryId::from_uuid(id),
            command_id: CommandId::from_uuid(command_id),
            command: row.try_get("command")?,
            expression: row.try_get("expression")?,
            recurring: row.try_get("recurring")?,
            metadata: decode_json(&metadata)?,
            next_run: decode_ts(&next_run)?,
            last_run: decode_opt_ts(row.try_get("last_run")?)?,
            created_at: decode_ts(&created_at)?,
        }))
    }
}

impl ScheduleRepository for SqliteScheduleRepository {
    async fn create(&self, entry: ScheduleEntry) -> Result<ScheduleEntry, VoxlineError> {
        let metadata = serde_json::to_string(&entry.metadata).map_err(StorageError::from)?;
        sqlx::query(INSERT)
            .bind(entry.id.as_uuid())
            .bind(entry.command_id.as_uuid())
            .bind(&entry.command)
            .bind(&entry.expression)
            .bind(entry.recurring)
            .bind(&metadata)
            .bind(encode_ts(entry.next_run))
            .bind(entry.last_run.map(encode_ts))
            .bind(encode_ts(entry.created_at))
            .execute(&self.pool)
            .await
            .map_err(StorageError::from)?;

        Ok(entry)
    }

    async fn get_by_id(&self, id: ScheduleEntryId) -> Result<Option<ScheduleEntry>, VoxlineError> {
        let row: Option<Wrapper> = sqlx::query_as(SELECT_BY_ID)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(StorageError::from)?;

        Ok(row.map(|Wrapper(entry)| entry))
    }

    async fn find_due(&self, now: Timestamp) -> Result<Vec<ScheduleEntry>, VoxlineError> {
        let rows: Vec<Wrapper> = sqlx::query_as(SELECT_DUE)
            .bind(encode_ts(now))
            .fetch_all(&self.pool)
            .await
            .map_err(StorageError::from)?;

        Ok(rows.into_iter().map(|Wrapper(entry)| entry).collect())
    }

    async fn find_by_command(&self, command_id: CommandId) -> Result<Vec<ScheduleEntry>, VoxlineError> {
        let rows: Vec<Wrapper> = sqlx::query_as(SELECT_BY_COMMAND)
            .bind(command_id.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(StorageError::from)?;

        Ok(rows.into_iter().map(|Wrapper(entry)| entry).collect())
    }

    async fn update(&self, entry: ScheduleEntry) -> Result<ScheduleEntry, VoxlineError> {
        let metadata = serde_json::to_string(&entry.metadata).map_err(StorageError::from)?;
        let done = sqlx::query(UPDATE)
            .bind(&entry.command)
            .bind(&entry.expression)
            .bind(entry.recurring)
            .bind(&metadata)
            .bind(encode_ts(entry.next_run))
            .bind(entry.last_run.map(encode_ts))
            .bind(entry.id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(StorageError::from)?;

        if done.rows_affected() == 0 {
            return Err(NotFoundError {
                entity: "ScheduleEntry",
                id: entry.id.to_string(),
            }
            .into());
        }
        Ok(entry)
    }

    async fn delete(&self, id: ScheduleEntryId) -> Result<(), VoxlineError> {
        sqlx::query(DELETE)
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(StorageError::from)?;
        Ok(())
    }
}
