use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::Priority;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveAction {
    Archived,
    Unarchived,
}

/// Events sent over the WebSocket gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Server confirms successful authentication
    Ready { user_id: Uuid, username: String },

    /// A message addressed to this user was sent
    NewMessage {
        message_id: Uuid,
        subject: String,
        sender_id: Uuid,
        sender_name: String,
        sender_email: String,
        sent_at: chrono::DateTime<chrono::Utc>,
        priority: Priority,
        body_preview: String,
    },

    /// The user archived or unarchived messages on another tab/device
    ArchiveChange {
        message_ids: Vec<Uuid>,
        action: ArchiveAction,
        bulk: bool,
    },

    /// A user came online or went offline
    PresenceUpdate {
        user_id: Uuid,
        username: String,
        online: bool,
    },
}

impl GatewayEvent {
    /// Wire name of the event, as found in the `type` field.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ready { .. } => "Ready",
            Self::NewMessage { .. } => "NewMessage",
            Self::ArchiveChange { .. } => "ArchiveChange",
            Self::PresenceUpdate { .. } => "PresenceUpdate",
        }
    }
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Client-side activity ping; refreshes the session's last activity
    Heartbeat,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn archive_change_wire_format() {
        let id = Uuid::nil();
        let event = GatewayEvent::ArchiveChange {
            message_ids: vec![id],
            action: ArchiveAction::Unarchived,
            bulk: false,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "ArchiveChange");
        assert_eq!(json["data"]["action"], "unarchived");
        assert_eq!(json["type"], event.name());
    }

    #[test]
    fn heartbeat_parses_without_data() {
        let cmd: GatewayCommand = serde_json::from_str(r#"{"type":"Heartbeat"}"#).unwrap();
        assert_eq!(cmd, GatewayCommand::Heartbeat);
    }
}
