//! JSON handlers for deferred commands.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use voxline_app::ports::{CommandGateway, ScheduleRequest};
use voxline_domain::schedule::ScheduleEntry;

use crate::error::ApiError;
use crate::state::AppState;

/// Request body for registering a schedule.
#[derive(Deserialize)]
pub struct CreateScheduleRequest {
    pub text: String,
    /// RFC 3339 timestamp or cron expression.
    pub expression: String,
    #[serde(default)]
    pub recurring: bool,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl From<CreateScheduleRequest> for ScheduleRequest {
    fn from(request: CreateScheduleRequest) -> Self {
        Self {
            text: request.text,
            expression: request.expression,
            recurring: request.recurring,
            metadata: request.metadata,
        }
    }
}

/// Possible responses from the create endpoint.
pub enum CreateResponse {
    Created(Json<ScheduleEntry>),
}

impl IntoResponse for CreateResponse {
    fn into_response(self) -> Response {
        match self {
            Self::Created(json) => (StatusCode::CREATED, json).into_response(),
        }
    }
}

/// `POST /api/schedules`
pub async fn create<G>(
    State(state): State<AppState<G>>,
    Json(request): Json<CreateScheduleRequest>,
) -> Result<CreateResponse, ApiError>
where
    G: CommandGateway + 'static,
{
    let entry = state.gateway.schedule(request.into()).await?;
    Ok(CreateResponse::Created(Json(entry)))
}
