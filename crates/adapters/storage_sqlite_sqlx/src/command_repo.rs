//! `SQLite` implementation of [`CommandRepository`].

use std::str::FromStr;

use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row, SqlitePool};
use voxline_app::ports::CommandRepository;
use voxline_domain::command::{Command, CommandOrigin, CommandState};
use voxline_domain::error::{ConflictError, NotFoundError, VoxlineError};
use voxline_domain::id::CommandId;
use voxline_domain::time::Timestamp;

use crate::codec::{decode_error, decode_json, decode_opt_json, decode_ts, encode_ts};
use crate::error::StorageError;

const INSERT: &str = "INSERT INTO commands \
    (id, text, variables, state, origin, resolution, result, reason, retry_count, version, created_at, updated_at) \
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)";

const SELECT_BY_ID: &str = "SELECT * FROM commands WHERE id = ?";

const SELECT_BY_STATE: &str =
    "SELECT * FROM commands WHERE state = ? ORDER BY created_at ASC, id ASC";

const UPDATE: &str = "UPDATE commands SET \
    text = ?, variables = ?, state = ?, origin = ?, resolution = ?, result = ?, reason = ?, \
    retry_count = ?, updated_at = ?, version = version + 1 \
    WHERE id = ? AND version = ?";

const EXISTS: &str = "SELECT 1 FROM commands WHERE id = ?";

const TERMINAL_BEFORE: &str =
    "state IN ('completed', 'failed', 'cancelled') AND updated_at < ?";

/// `SQLite`-backed command repository.
#[derive(Clone)]
pub struct SqliteCommandRepository {
    pool: SqlitePool,
}

impl SqliteCommandRepository {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

struct Wrapper(Command);

impl<'r> FromRow<'r, SqliteRow> for Wrapper {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let id: uuid::Uuid = row.try_get("id")?;
        let variables: String = row.try_get("variables")?;
        let state: String = row.try_get("state")?;
        let origin: String = row.try_get("origin")?;
        let version: i64 = row.try_get("version")?;
        let created_at: String = row.try_get("created_at")?;
        let updated_at: String = row.try_get("updated_at")?;

        Ok(Self(Command {
            id: CommandId::from_uuid(id),
            text: row.try_get("text")?,
            variables: decode_json(&variables)?,
            state: CommandState::from_str(&state).map_err(decode_error)?,
            origin: CommandOrigin::from_str(&origin).map_err(decode_error)?,
            resolution: decode_opt_json(row.try_get("resolution")?)?,
            result: decode_opt_json(row.try_get("result")?)?,
            reason: row.try_get("reason")?,
            retry_count: row.try_get("retry_count")?,
            version: u64::try_from(version).map_err(decode_error)?,
            created_at: decode_ts(&created_at)?,
            updated_at: decode_ts(&updated_at)?,
        }))
    }
}

/// JSON and counter columns of a command, encoded for binding.
struct Encoded {
    variables: String,
    resolution: Option<String>,
    result: Option<String>,
    version: i64,
}

impl Encoded {
    fn new(command: &Command) -> Result<Self, StorageError> {
        Ok(Self {
            variables: serde_json::to_string(&command.variables)?,
            resolution: command
                .resolution
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
            result: command.result.as_ref().map(serde_json::to_string).transpose()?,
            version: i64::try_from(command.version)?,
        })
    }
}

impl CommandRepository for SqliteCommandRepository {
    async fn create(&self, command: Command) -> Result<Command, VoxlineError> {
        let encoded = Encoded::new(&command)?;
        sqlx::query(INSERT)
            .bind(command.id.as_uuid())
            .bind(&command.text)
            .bind(&encoded.variables)
            .bind(command.state.as_str())
            .bind(command.origin.as_str())
            .bind(encoded.resolution.as_deref())
            .bind(encoded.result.as_deref())
            .bind(command.reason.as_deref())
            .bind(command.retry_count)
            .bind(encoded.version)
            .bind(encode_ts(command.created_at))
            .bind(encode_ts(command.updated_at))
            .execute(&self.pool)
            .await
            .map_err(StorageError::from)?;

        Ok(command)
    }

    async fn get_by_id(&self, id: CommandId) -> Result<Option<Command>, VoxlineError> {
        let row: Option<Wrapper> = sqlx::query_as(SELECT_BY_ID)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(StorageError::from)?;

        Ok(row.map(|Wrapper(command)| command))
    }

    async fn update(&self, command: Command) -> Result<Command, VoxlineError> {
        let encoded = Encoded::new(&command)?;
        let done = sqlx::query(UPDATE)
            .bind(&command.text)
            .bind(&encoded.variables)
            .bind(command.state.as_str())
            .bind(command.origin.as_str())
            .bind(encoded.resolution.as_deref())
            .bind(encoded.result.as_deref())
            .bind(command.reason.as_deref())
            .bind(command.retry_count)
            .bind(encode_ts(command.updated_at))
            .bind(command.id.as_uuid())
            .bind(encoded.version)
            .execute(&self.pool)
            .await
            .map_err(StorageError::from)?;

        if done.rows_affected() == 0 {
            let exists = sqlx::query(EXISTS)
                .bind(command.id.as_uuid())
                .fetch_optional(&self.pool)
                .await
                .map_err(StorageError::from)?
                .is_some();
            return Err(if exists {
                ConflictError {
                    entity: "Command",
                    id: command.id.to_string(),
                    expected_version: command.version,
                }
                .into()
            } else {
                NotFoundError {
                    entity: "Command",
                    id: command.id.to_string(),
                }
                .into()
            });
        }

        Ok(Command {
            version: command.version + 1,
            ..command
        })
    }

    async fn find_by_state(&self, state: CommandState) -> Result<Vec<Command>, VoxlineError> {
        let rows: Vec<Wrapper> = sqlx::query_as(SELECT_BY_STATE)
            .bind(state.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(StorageError::from)?;

        Ok(rows.into_iter().map(|Wrapper(command)| command).collect())
    }

    async fn delete_terminal_before(&self, cutoff: Timestamp) -> Result<u64, VoxlineError> {
        let cutoff = encode_ts(cutoff);
        let mut tx = self.pool.begin().await.map_err(StorageError::from)?;

        for dependent in ["queued_commands", "schedule_entries"] {
            let query = format!(
                "DELETE FROM {dependent} WHERE command_id IN (SELECT id FROM commands WHERE {TERMINAL_BEFORE})"
            );
            sqlx::query(&query)
                .bind(&cutoff)
                .execute(&mut *tx)
                .await
                .map_err(StorageError::from)?;
        }
        let done = sqlx::query(&format!("DELETE FROM commands WHERE {TERMINAL_BEFORE}"))
            .bind(&cutoff)
            .execute(&mut *tx)
            .await
            .map_err(StorageError::from)?;

        tx.commit().await.map_err(StorageError::from)?;
        Ok(done.rows_affected())
    }
}
