//! Storage-specific error type wrapping sqlx errors.

use voxline_domain::error::VoxlineError;

/// Errors originating from the `SQLite` storage layer.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// A query or connection failed.
    #[error("database error")]
    Database(#[from] sqlx::Error),

    /// Failed to serialize a value into a JSON column.
    #[error("JSON serialization error")]
    Json(#[from] serde_json::Error),

    /// Failed to run migrations.
    #[error("migration error")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A counter does not fit the column type.
    #[error("counter out of range")]
    OutOfRange(#[from] std::num::TryFromIntError),
}

impl From<StorageError> for VoxlineError {
    fn from(err: StorageError) -> Self {
        Self::Storage(Box::new(err))
    }
}
