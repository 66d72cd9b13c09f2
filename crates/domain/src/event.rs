//! Event: an immutable record of something that happened to a command.
//!
//! Events are published on every state transition and on a few lifecycle
//! milestones (schedule firings, macro steps, drain passes) so that UIs can
//! follow progress without polling.

use serde::{Deserialize, Serialize};

use crate::command::{Command, CommandState};
use crate::error::ValidationError;
use crate::id::{CommandId, EventId};
use crate::time::Timestamp;

/// Discriminates the kind of [`Event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    CommandCreated,
    StateChanged,
    CommandUnmatched,
    ScheduleFired,
    MacroStepCompleted,
    QueueDrained,
}

impl EventType {
    pub const ALL: [Self; 6] = [
        Self::CommandCreated,
        Self::StateChanged,
        Self::CommandUnmatched,
        Self::ScheduleFired,
        Self::MacroStepCompleted,
        Self::QueueDrained,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CommandCreated => "command_created",
            Self::StateChanged => "state_changed",
            Self::CommandUnmatched => "command_unmatched",
            Self::ScheduleFired => "schedule_fired",
            Self::MacroStepCompleted => "macro_step_completed",
            Self::QueueDrained => "queue_drained",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|event_type| event_type.as_str() == wanted)
            .ok_or_else(|| ValidationError::UnknownEventType(wanted.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub event_type: EventType,
    pub command_id: Option<CommandId>,
    pub data: serde_json::Value,
    pub timestamp: Timestamp,
}

impl Event {
    #[must_use]
    pub fn new(
        event_type: EventType,
        command_id: Option<CommandId>,
        data: serde_json::Value,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            id: EventId::new(),
            event_type,
            command_id,
            data,
            timestamp,
        }
    }

    /// `command` has just moved from `from` to its current state.
    #[must_use]
    pub fn state_changed(command: &Command, from: CommandState) -> Self {
        Self::new(
            EventType::StateChanged,
            Some(command.id),
            serde_json::json!({
                "from": from,
                "to": command.state,
                "origin": command.origin,
                "retry_count": command.retry_count,
                "reason": command.reason,
            }),
            command.updated_at,
        )
    }
}
