//! # voxline-adapter-storage-sqlite-sqlx
//!
//! `SQLite` persistence adapter using [sqlx](https://docs.rs/sqlx).
//!
//! ## Responsibilities
//! - Implement the repository port traits defined in `voxline-app::ports::storage`
//! - Manage `SQLite` connection pool lifecycle
//! - Run database migrations (using sqlx embedded migrations)
//! - Map between domain types and database rows
//!
//! ## Dependency rule
//! Depends on `voxline-app` (for port traits) and `voxline-domain` (for domain types).
//! The `app` and `domain` crates must never reference this adapter.

mod codec;
pub mod command_repo;
pub mod error;
pub mod pool;
pub mod queue_repo;
pub mod schedule_repo;

pub use command_repo::SqliteCommandRepository;
pub use error::StorageError;
pub use pool::{Config, Database};
pub use queue_repo::SqliteQueueRepository;
pub use schedule_repo::SqliteScheduleRepository;
