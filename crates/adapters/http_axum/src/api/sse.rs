//! Server-Sent Events (SSE) stream for real-time updates.

use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use serde::Deserialize;
use tokio_stream::StreamExt;

use voxline_app::event_bus::EventFilter;
use voxline_app::ports::CommandGateway;
use voxline_domain::error::{ValidationError, VoxlineError};
use voxline_domain::event::EventType;
use voxline_domain::id::CommandId;

use crate::error::ApiError;
use crate::state::AppState;

/// Narrows the stream. Without parameters every event is sent.
#[derive(Debug, Default, Deserialize)]
pub struct StreamQuery {
    /// Follow a single command.
    pub command_id: Option<CommandId>,
    /// Comma-separated event type names, e.g. `state_changed,schedule_fired`.
    pub types: Option<String>,
}

impl StreamQuery {
    fn filter(&self) -> Result<EventFilter, ValidationError> {
        let filter = self
            .command_id
            .map_or_else(EventFilter::all, EventFilter::command);
        let Some(types) = &self.types else {
            return Ok(filter);
        };
        let types = types
            .split(',')
            .filter(|name| !name.trim().is_empty())
            .map(str::parse::<EventType>)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(filter.with_types(types))
    }
}

/// `GET /api/events/stream[?command_id=..][&types=..]`
///
/// Each event is sent as a JSON `data:` frame whose SSE event name is the
/// event type (`state_changed`, `command_created`, ...). The stream ends
/// when the client disconnects or the event bus is closed.
#[allow(clippy::missing_errors_doc)]
pub async fn stream<G>(
    State(state): State<AppState<G>>,
    Query(query): Query<StreamQuery>,
) -> Result<Sse<impl tokio_stream::Stream<Item = Result<Event, std::convert::Infallible>>>, ApiError>
where
    G: CommandGateway + 'static,
{
    let filter = query.filter().map_err(VoxlineError::from)?;
    let events = state
        .event_bus
        .subscribe(filter)
        .into_stream()
        .filter_map(|event| match serde_json::to_string(&event) {
            Ok(json) => Some(Ok(Event::default()
                .event(event.event_type.to_string())
                .data(json))),
            Err(err) => {
                tracing::warn!(%err, "failed to serialize event to JSON for SSE stream");
                None
            }
        });

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}
