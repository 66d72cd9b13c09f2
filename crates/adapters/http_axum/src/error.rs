//! HTTP error response mapping.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use voxline_domain::error::{CommandError, VoxlineError};

/// JSON error body returned by API endpoints.
#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

/// Maps [`VoxlineError`] to an HTTP response with appropriate status code.
pub struct ApiError(VoxlineError);

impl From<VoxlineError> for ApiError {
    fn from(err: VoxlineError) -> Self {
        Self(err)
    }
}

impl From<CommandError> for ApiError {
    fn from(err: CommandError) -> Self {
        Self(err.into())
    }
}

/// Status code for `err`, shared with handlers that build richer bodies.
pub(crate) fn status_of(err: &VoxlineError) -> StatusCode {
    match err {
        VoxlineError::Validation(_) => StatusCode::BAD_REQUEST,
        VoxlineError::NotFound(_) => StatusCode::NOT_FOUND,
        VoxlineError::Conflict(_) => StatusCode::CONFLICT,
        VoxlineError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        VoxlineError::Command(err) => match err {
            CommandError::InvalidSchedule { .. } => StatusCode::BAD_REQUEST,
            CommandError::MacroNotFound(_) => StatusCode::NOT_FOUND,
            CommandError::MacroDisabled(_)
            | CommandError::InvalidTransition(_)
            | CommandError::Cancelled => StatusCode::CONFLICT,
            CommandError::MatchNotFound
            | CommandError::ConditionTimeout { .. }
            | CommandError::MacroStepFailed { .. }
            | CommandError::MacroCycle { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            CommandError::ConnectionLost(_) => StatusCode::SERVICE_UNAVAILABLE,
            CommandError::RetriesExhausted { .. } => StatusCode::BAD_GATEWAY,
        },
    }
}

/// Message safe to show to the caller.
pub(crate) fn message_of(err: &VoxlineError) -> String {
    if let VoxlineError::Storage(source) = err {
        tracing::error!(error = %source, "storage error");
        return "internal server error".to_string();
    }
    err.to_string()
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_of(&self.0);
        let error = message_of(&self.0);
        (status, Json(ErrorBody { error })).into_response()
    }
}
