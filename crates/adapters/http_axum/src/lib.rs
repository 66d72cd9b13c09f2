//! # voxline-adapter-http-axum
//!
//! HTTP adapter built on [axum](https://docs.rs/axum).
//!
//! ## Responsibilities
//! - Serve a JSON API over the [`CommandGateway`](voxline_app::ports::CommandGateway)
//!   port (`/api/commands`, `/api/schedules`, `/api/macros/{name}/run`)
//! - Stream command events as server-sent events (`/api/events/stream`) so
//!   clients follow progress without polling
//! - Map [`VoxlineError`](voxline_domain::error::VoxlineError) onto status codes in one place
//!
//! ## Dependency rule
//! Depends on `voxline-app` (for port traits) and `voxline-domain` (for domain
//! types used in request/response mapping). Never leaks axum types into the
//! domain.

pub mod api;
pub mod error;
pub mod router;
pub mod state;
