//! JSON handler running a macro.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

use voxline_app::ports::CommandGateway;
use voxline_domain::command::Variables;
use voxline_domain::command_macro::StepResult;

use crate::error::{message_of, status_of};
use crate::state::AppState;

#[derive(Default, Deserialize)]
pub struct RunMacroRequest {
    #[serde(default)]
    pub variables: Variables,
}

/// Body returned when a macro stops early: the steps that did complete
/// come back alongside the error.
#[derive(Serialize)]
pub struct AbortedBody {
    pub error: String,
    pub completed: Vec<StepResult>,
    pub failed_step: Option<usize>,
}

pub enum RunResponse {
    Ok(Json<Vec<StepResult>>),
    Aborted(StatusCode, Json<AbortedBody>),
}

impl IntoResponse for RunResponse {
    fn into_response(self) -> Response {
        match self {
            Self::Ok(json) => json.into_response(),
            Self::Aborted(status, json) => (status, json).into_response(),
        }
    }
}

/// `POST /api/macros/{name}/run`
///
/// Waits for every step to reach a terminal state.
pub async fn run<G>(
    State(state): State<AppState<G>>,
    Path(name): Path<String>,
    Json(request): Json<RunMacroRequest>,
) -> RunResponse
where
    G: CommandGateway + 'static,
{
    match state.gateway.run_macro(name, request.variables).await {
        Ok(steps) => RunResponse::Ok(Json(steps)),
        Err(aborted) => RunResponse::Aborted(
            status_of(&aborted.error),
            Json(AbortedBody {
                error: message_of(&aborted.error),
                completed: aborted.completed,
                failed_step: aborted.failed_step,
            }),
        ),
    }
}
