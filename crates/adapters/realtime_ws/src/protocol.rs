//! JSON frames exchanged with the processing backend.
//!
//! Every frame is an object with a `type` field. A delivery pushes a
//! `command` frame carrying the command id; the backend answers with a
//! `command_result` frame echoing that id, which also lets it drop
//! duplicates after a redelivery.

use serde::{Deserialize, Serialize};
use voxline_domain::command::{Command, CommandOrigin, DeliveryReceipt, Resolution, Variables};
use voxline_domain::id::CommandId;

pub const COMMAND_RESULT: &str = "command_result";

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outbound<'a> {
    Command {
        id: CommandId,
        text: &'a str,
        variables: &'a Variables,
        origin: CommandOrigin,
        #[serde(skip_serializing_if = "Option::is_none")]
        resolution: Option<&'a Resolution>,
    },
}

impl<'a> Outbound<'a> {
    #[must_use]
    pub fn command(command: &'a Command) -> Self {
        Self::Command {
            id: command.id,
            text: &command.text,
            variables: &command.variables,
            origin: command.origin,
            resolution: command.resolution.as_ref(),
        }
    }
}

/// Body of a `command_result` frame.
#[derive(Debug, Deserialize)]
pub struct CommandResult {
    pub id: CommandId,
    #[serde(default = "default_success")]
    pub success: bool,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default)]
    pub error: Option<String>,
}

fn default_success() -> bool {
    true
}

impl CommandResult {
    #[must_use]
    pub fn into_receipt(self) -> DeliveryReceipt {
        let success = self.success && self.error.is_none();
        let data = match self.error {
            Some(error) if self.data.is_null() => serde_json::json!({ "error": error }),
            _ => self.data,
        };
        DeliveryReceipt { success, data }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn should_tag_command_frame_and_carry_id() {
        let command = Command::builder()
            .text("turn on the lights")
            .variable("room", "kitchen")
            .build()
            .unwrap();

        let frame = serde_json::to_value(Outbound::command(&command)).unwrap();

        assert_eq!(frame["type"], "command");
        assert_eq!(frame["id"], command.id.to_string());
        assert_eq!(frame["text"], "turn on the lights");
        assert_eq!(frame["variables"], json!({"room": "kitchen"}));
        assert_eq!(frame["origin"], "interactive");
        assert!(frame.get("resolution").is_none());
    }

    #[test]
    fn should_default_result_to_success() {
        let id = CommandId::new();
        let result: CommandResult =
            serde_json::from_value(json!({"type": "command_result", "id": id, "data": {"ok": 1}}))
                .unwrap();

        let receipt = result.into_receipt();

        assert!(receipt.success);
        assert_eq!(receipt.data, json!({"ok": 1}));
    }

    #[test]
    fn should_turn_error_into_failed_receipt() {
        let result: CommandResult = serde_json::from_value(
            json!({"type": "command_result", "id": CommandId::new(), "error": "device offline"}),
        )
        .unwrap();

        let receipt = result.into_receipt();

        assert!(!receipt.success);
        assert_eq!(receipt.data, json!({"error": "device offline"}));
    }
}
