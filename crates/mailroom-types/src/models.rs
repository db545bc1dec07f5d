use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::roles::Role;

/// Directory entry for an internal user. Never carries credentials.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub display_name: String,
    pub role: Role,
    pub department: Option<String>,
    pub attachments_override: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(Priority::Low),
            "normal" => Some(Priority::Normal),
            "high" => Some(Priority::High),
            _ => None,
        }
    }
}

/// Metadata returned by the blob store. Raw bytes are never kept on a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    pub size: u64,
    #[serde(rename = "type")]
    pub mime_type: String,
    pub stored_name: String,
}

/// A canonical message shared by every participant.
///
/// `recipient_ids` entries are either internal user ids (uuid strings) or raw
/// external email addresses, in the order the sender gave them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub subject: String,
    pub body: String,
    pub sender_id: Uuid,
    pub recipient_ids: Vec<String>,
    pub cc_recipients: Vec<String>,
    pub bcc_recipients: Vec<String>,
    pub priority: Priority,
    pub attachments: Vec<Attachment>,
    pub sent_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub is_deleted: bool,
}

impl Message {
    pub fn is_addressed_to(&self, user_id: Uuid) -> bool {
        let id = user_id.to_string();
        self.recipient_ids.iter().any(|r| *r == id)
    }

    /// Sender, to, cc or bcc.
    pub fn is_participant(&self, user_id: Uuid) -> bool {
        if self.sender_id == user_id {
            return true;
        }
        let id = user_id.to_string();
        self.recipient_ids
            .iter()
            .chain(&self.cc_recipients)
            .chain(&self.bcc_recipients)
            .any(|r| *r == id)
    }
}

/// Input to the message store. `id` is optional; the store assigns one.
#[derive(Debug, Clone, Default)]
pub struct NewMessage {
    pub id: Option<Uuid>,
    pub subject: String,
    pub body: String,
    pub sender_id: Option<Uuid>,
    pub recipient_ids: Vec<String>,
    pub cc_recipients: Vec<String>,
    pub bcc_recipients: Vec<String>,
    pub priority: Priority,
    pub attachments: Vec<Attachment>,
}

/// The three strict overlay variants. ReadMark is upserted and lives apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlayKind {
    Deletion,
    Archive,
    PermanentDeletion,
}

impl OverlayKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OverlayKind::Deletion => "deletion",
            OverlayKind::Archive => "archive",
            OverlayKind::PermanentDeletion => "permanent deletion",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverlayRecord {
    pub id: Uuid,
    pub kind: OverlayKind,
    pub message_id: Uuid,
    pub user_id: Uuid,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadMark {
    pub id: String,
    pub message_id: Uuid,
    pub user_id: Uuid,
    pub read_at: DateTime<Utc>,
}

impl ReadMark {
    pub fn key(message_id: Uuid, user_id: Uuid) -> String {
        format!("{}:{}", message_id, user_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub user_id: Uuid,
    pub display_name: String,
    pub email: String,
    pub role: Role,
    pub department: Option<String>,
    pub transport_id: Option<String>,
    pub login_time: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrashEntry {
    #[serde(flatten)]
    pub message: Message,
    pub deleted_at: DateTime<Utc>,
}

/// A recipient as shown in a read-receipt report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipientInfo {
    /// User id for internal users, the raw address for external ones.
    pub id: String,
    pub display_name: String,
    pub email: Option<String>,
    pub role: Role,
    pub external: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadReceipt {
    pub recipient: RecipientInfo,
    pub is_read: bool,
    pub read_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailboxCounts {
    pub inbox: usize,
    pub unread: usize,
    pub sent: usize,
    pub archive: usize,
    pub trash: usize,
}
