//! Message Store: canonical, shared message records.
//!
//! Append-only from the rest of the system's point of view. The only column
//! ever updated is the global `is_deleted` kill-switch, and nothing in the
//! mailbox flows flips it.

use std::collections::HashMap;

use rusqlite::{Connection, OptionalExtension, ToSql};
use tracing::{debug, warn};
use uuid::Uuid;

use mailroom_types::models::{Message, NewMessage, Priority};

use crate::error::{MailError, Result};
use crate::models::{MessageRow, RecipientRow};
use crate::{Database, format_timestamp, now, parse_timestamp, parse_uuid};

const MESSAGE_COLUMNS: &str =
    "m.id, m.subject, m.body, m.sender_id, m.priority, m.attachments, m.sent_at, m.created_at, m.is_deleted";

/// Message ids bound per recipient lookup.
const RECIPIENT_BATCH: usize = 500;

impl Database {
    /// Validate and persist a new message. Assigns an id when none is given and
    /// stamps `sent_at`/`created_at` with the current time.
    pub fn send_message(&self, new: NewMessage) -> Result<Message> {
        let message = prepare_message(new)?;

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let sent_at = format_timestamp(message.sent_at);
            tx.execute(
                "INSERT INTO messages (id, subject, body, sender_id, priority, attachments, sent_at, created_at, is_deleted)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7, 0)",
                rusqlite::params![
                    message.id.to_string(),
                    message.subject,
                    message.body,
                    message.sender_id.to_string(),
                    message.priority.as_str(),
                    serde_json::to_string(&message.attachments)?,
                    sent_at,
                ],
            )?;

            {
                let mut stmt = tx.prepare(
                    "INSERT INTO message_recipients (message_id, kind, position, recipient) VALUES (?1, ?2, ?3, ?4)",
                )?;
                let mid = message.id.to_string();
                for (kind, list) in [
                    ("to", &message.recipient_ids),
                    ("cc", &message.cc_recipients),
                    ("bcc", &message.bcc_recipients),
                ] {
                    for (position, recipient) in list.iter().enumerate() {
                        stmt.execute(rusqlite::params![mid, kind, position as i64, recipient])?;
                    }
                }

                let mut stmt = tx.prepare(
                    "INSERT OR IGNORE INTO message_attachments (message_id, stored_name) VALUES (?1, ?2)",
                )?;
                for attachment in &message.attachments {
                    stmt.execute((&mid, &attachment.stored_name))?;
                }
            }

            tx.commit()?;
            Ok(())
        })
        .map_err(|e| match e {
            MailError::Conflict(_) => MailError::conflict(format!("message {} already exists", message.id)),
            other => other,
        })?;

        debug!(
            "Stored message {} from {} to {} recipient(s)",
            message.id,
            message.sender_id,
            message.recipient_ids.len()
        );
        Ok(message)
    }

    pub fn get_message(&self, id: Uuid) -> Result<Message> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM messages m WHERE m.id = ?1", MESSAGE_COLUMNS);
            let row = conn
                .query_row(&sql, [id.to_string()], map_message_row)
                .optional()?
                .ok_or_else(|| MailError::not_found(format!("message {}", id)))?;
            Ok(hydrate(conn, vec![row])?.remove(0))
        })
    }

    /// Messages sent by `user_id`, newest first. Globally deleted messages are excluded.
    pub fn list_by_sender(&self, user_id: Uuid) -> Result<Vec<Message>> {
        self.with_conn(|conn| {
            query_messages(
                conn,
                "m.is_deleted = 0 AND m.sender_id = ?1",
                &[&user_id.to_string()],
            )
        })
    }

    /// Messages whose `to` list contains `user_id`, newest first. Globally
    /// deleted messages are excluded.
    pub fn list_by_recipient(&self, user_id: Uuid) -> Result<Vec<Message>> {
        self.with_conn(|conn| {
            query_messages(
                conn,
                "m.is_deleted = 0 AND m.id IN
                    (SELECT message_id FROM message_recipients WHERE kind = 'to' AND recipient = ?1)",
                &[&user_id.to_string()],
            )
        })
    }

    pub(crate) fn message_exists(conn: &Connection, id: Uuid) -> Result<bool> {
        let found: Option<i64> = conn
            .query_row("SELECT 1 FROM messages WHERE id = ?1", [id.to_string()], |r| r.get(0))
            .optional()?;
        Ok(found.is_some())
    }
}

fn prepare_message(new: NewMessage) -> Result<Message> {
    let subject = new.subject.trim().to_string();
    if subject.is_empty() {
        return Err(MailError::validation("subject is required"));
    }
    if new.body.trim().is_empty() {
        return Err(MailError::validation("body is required"));
    }
    let sender_id = new
        .sender_id
        .ok_or_else(|| MailError::validation("sender is required"))?;

    let recipient_ids = clean_addresses(new.recipient_ids);
    if recipient_ids.is_empty() {
        return Err(MailError::validation("at least one recipient is required"));
    }

    let ts = now();
    Ok(Message {
        id: new.id.unwrap_or_else(Uuid::new_v4),
        subject,
        body: new.body,
        sender_id,
        recipient_ids,
        cc_recipients: clean_addresses(new.cc_recipients),
        bcc_recipients: clean_addresses(new.bcc_recipients),
        priority: new.priority,
        attachments: new.attachments,
        sent_at: ts,
        created_at: ts,
        is_deleted: false,
    })
}

/// Trim entries, drop blanks and store anything that parses as a user id in
/// its canonical lowercase form so every lookup compares the same string.
fn clean_addresses(list: Vec<String>) -> Vec<String> {
    list.into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .map(|s| match s.parse::<Uuid>() {
            Ok(id) => id.to_string(),
            Err(_) => s,
        })
        .collect()
}

/// Load messages matching `filter` (a SQL predicate over alias `m`), newest first.
pub(crate) fn query_messages(
    conn: &Connection,
    filter: &str,
    params: &[&dyn ToSql],
) -> Result<Vec<Message>> {
    let sql = format!(
        "SELECT {} FROM messages m WHERE {} ORDER BY m.sent_at DESC",
        MESSAGE_COLUMNS, filter
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params, map_message_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    hydrate(conn, rows)
}

fn map_message_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        subject: row.get(1)?,
        body: row.get(2)?,
        sender_id: row.get(3)?,
        priority: row.get(4)?,
        attachments: row.get(5)?,
        sent_at: row.get(6)?,
        created_at: row.get(7)?,
        is_deleted: row.get(8)?,
    })
}

/// Attach recipient lists to message rows, batching the ids so large mailboxes
/// stay under SQLite's bound-parameter limit.
fn hydrate(conn: &Connection, rows: Vec<MessageRow>) -> Result<Vec<Message>> {
    if rows.is_empty() {
        return Ok(vec![]);
    }

    let ids: Vec<&str> = rows.iter().map(|r| r.id.as_str()).collect();
    let mut recipient_rows = Vec::new();
    for batch in ids.chunks(RECIPIENT_BATCH) {
        let placeholders: Vec<String> = (1..=batch.len()).map(|i| format!("?{}", i)).collect();
        let sql = format!(
            "SELECT message_id, kind, recipient FROM message_recipients
             WHERE message_id IN ({})
             ORDER BY message_id, kind, position",
            placeholders.join(", ")
        );

        let mut stmt = conn.prepare(&sql)?;
        let params: Vec<&dyn ToSql> = batch.iter().map(|id| id as &dyn ToSql).collect();
        let found = stmt.query_map(params.as_slice(), |row| {
            Ok(RecipientRow {
                message_id: row.get(0)?,
                kind: row.get(1)?,
                recipient: row.get(2)?,
            })
        })?;
        for row in found {
            recipient_rows.push(row?);
        }
    }

    // message_id -> (to, cc, bcc)
    let mut lists: HashMap<String, (Vec<String>, Vec<String>, Vec<String>)> = HashMap::new();
    for r in recipient_rows {
        let entry = lists.entry(r.message_id).or_default();
        match r.kind.as_str() {
            "to" => entry.0.push(r.recipient),
            "cc" => entry.1.push(r.recipient),
            "bcc" => entry.2.push(r.recipient),
            other => warn!("Unknown recipient kind '{}'", other),
        }
    }

    rows.into_iter()
        .map(|row| {
            let (to, cc, bcc) = lists.remove(&row.id).unwrap_or_default();
            Ok(Message {
                id: parse_uuid(&row.id)?,
                subject: row.subject,
                body: row.body,
                sender_id: parse_uuid(&row.sender_id)?,
                recipient_ids: to,
                cc_recipients: cc,
                bcc_recipients: bcc,
                priority: Priority::parse(&row.priority).unwrap_or_else(|| {
                    warn!("Corrupt priority '{}' on message '{}'", row.priority, row.id);
                    Priority::Normal
                }),
                attachments: serde_json::from_str(&row.attachments)?,
                sent_at: parse_timestamp(&row.sent_at),
                created_at: parse_timestamp(&row.created_at),
                is_deleted: row.is_deleted,
            })
        })
        .collect()
}
