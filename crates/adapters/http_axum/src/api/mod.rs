//! JSON API handler modules.

#[allow(clippy::missing_errors_doc)]
pub mod commands;
pub mod macros;
#[allow(clippy::missing_errors_doc)]
pub mod schedules;
pub mod sse;

use axum::Router;
use axum::routing::{get, post};

use voxline_app::ports::CommandGateway;

use crate::state::AppState;

/// Build the `/api` sub-router.
pub fn routes<G>() -> Router<AppState<G>>
where
    G: CommandGateway + 'static,
{
    Router::new()
        // Commands
        .route("/commands", post(commands::submit::<G>))
        .route("/commands/{id}", get(commands::get::<G>))
        .route("/commands/{id}/cancel", post(commands::cancel::<G>))
        // Schedules
        .route("/schedules", post(schedules::create::<G>))
        // Macros
        .route("/macros/{name}/run", post(macros::run::<G>))
        // Events
        .route("/events/stream", get(sse::stream::<G>))
}
