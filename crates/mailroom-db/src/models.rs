/// Database row types. These map directly to SQLite rows.
/// Distinct from mailroom-types models to keep the DB layer independent.

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub email: String,
    pub display_name: String,
    pub role: String,
    pub department: Option<String>,
    pub attachments_override: bool,
    pub password: String,
    pub created_at: String,
}

pub struct MessageRow {
    pub id: String,
    pub subject: String,
    pub body: String,
    pub sender_id: String,
    pub priority: String,
    pub attachments: String,
    pub sent_at: String,
    pub created_at: String,
    pub is_deleted: bool,
}

pub struct RecipientRow {
    pub message_id: String,
    pub kind: String,
    pub recipient: String,
}

pub struct SessionRow {
    pub user_id: String,
    pub display_name: String,
    pub email: String,
    pub role: String,
    pub department: Option<String>,
    pub transport_id: Option<String>,
    pub login_time: String,
    pub last_activity_at: String,
    pub is_active: bool,
}
