//! JSON handlers for commands.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

use voxline_app::ports::{CommandGateway, Submission};
use voxline_domain::command::{Command, CommandOrigin};
use voxline_domain::error::CommandError;
use voxline_domain::id::CommandId;

use crate::error::ApiError;
use crate::state::AppState;

/// Request body for submitting text.
#[derive(Deserialize)]
pub struct SubmitRequest {
    pub text: String,
    #[serde(default)]
    pub origin: CommandOrigin,
}

/// Body returned when nothing recognised the text.
#[derive(Serialize)]
pub struct UnmatchedBody {
    pub error: String,
    /// The command, already `cancelled`, kept for inspection.
    pub command_id: CommandId,
}

/// Possible responses from the submit endpoint.
pub enum SubmitResponse {
    Accepted(Json<Submission>),
    Unmatched(Json<UnmatchedBody>),
}

impl IntoResponse for SubmitResponse {
    fn into_response(self) -> Response {
        match self {
            Self::Accepted(json) => (StatusCode::ACCEPTED, json).into_response(),
            Self::Unmatched(json) => (StatusCode::UNPROCESSABLE_ENTITY, json).into_response(),
        }
    }
}

/// Possible responses from the get and cancel endpoints.
pub enum CommandResponse {
    Ok(Json<Command>),
}

impl IntoResponse for CommandResponse {
    fn into_response(self) -> Response {
        match self {
            Self::Ok(json) => json.into_response(),
        }
    }
}

/// `POST /api/commands`
///
/// Answers as soon as the text is resolved; delivery continues in the
/// background.
pub async fn submit<G>(
    State(state): State<AppState<G>>,
    Json(request): Json<SubmitRequest>,
) -> Result<SubmitResponse, ApiError>
where
    G: CommandGateway + 'static,
{
    let submission = state.gateway.submit(request.text, request.origin).await?;
    if submission.is_unmatched() {
        return Ok(SubmitResponse::Unmatched(Json(UnmatchedBody {
            error: CommandError::MatchNotFound.to_string(),
            command_id: submission.command_id,
        })));
    }
    Ok(SubmitResponse::Accepted(Json(submission)))
}

/// `GET /api/commands/{id}`
pub async fn get<G>(
    State(state): State<AppState<G>>,
    Path(id): Path<CommandId>,
) -> Result<CommandResponse, ApiError>
where
    G: CommandGateway + 'static,
{
    let command = state.gateway.get_status(id).await?;
    Ok(CommandResponse::Ok(Json(command)))
}

/// `POST /api/commands/{id}/cancel`
pub async fn cancel<G>(
    State(state): State<AppState<G>>,
    Path(id): Path<CommandId>,
) -> Result<CommandResponse, ApiError>
where
    G: CommandGateway + 'static,
{
    let command = state.gateway.cancel(id).await?;
    Ok(CommandResponse::Ok(Json(command)))
}
