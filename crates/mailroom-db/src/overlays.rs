//! Overlay Ledger: per-(message, user) records that change how a shared
//! message is displayed to one user.
//!
//! Deletion, Archive and PermanentDeletion are strict: one row per pair,
//! enforced by `UNIQUE(message_id, user_id)`, and a second create is a
//! `Conflict`. ReadMark is create-or-refresh via `ON CONFLICT DO UPDATE`.
//! PermanentDeletion has no remove.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};
use tracing::{debug, info};
use uuid::Uuid;

use mailroom_types::api::{BulkArchiveResponse, BulkFailure, BulkFailureReason};
use mailroom_types::models::{OverlayKind, OverlayRecord, ReadMark};

use crate::error::{MailError, Result};
use crate::{Database, format_timestamp, now, parse_timestamp, parse_uuid};

fn table(kind: OverlayKind) -> &'static str {
    match kind {
        OverlayKind::Deletion => "deletions",
        OverlayKind::Archive => "archives",
        OverlayKind::PermanentDeletion => "permanent_deletions",
    }
}

impl Database {
    // -- Strict overlays --

    /// Insert-if-absent. `NotFound` for an unknown message, `Conflict` when the
    /// pair already has a record of this kind.
    pub fn create_overlay(
        &self,
        kind: OverlayKind,
        message_id: Uuid,
        user_id: Uuid,
    ) -> Result<OverlayRecord> {
        self.with_conn_mut(|conn| insert_overlay(conn, kind, message_id, user_id))
    }

    pub fn get_overlay(
        &self,
        kind: OverlayKind,
        message_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<OverlayRecord>> {
        self.with_conn(|conn| query_overlay(conn, kind, message_id, user_id))
    }

    /// Drop a Deletion record ("restore from trash" at the ledger level).
    pub fn remove_deletion(&self, message_id: Uuid, user_id: Uuid) -> Result<()> {
        self.with_conn_mut(|conn| delete_overlay(conn, OverlayKind::Deletion, message_id, user_id))
    }

    pub fn remove_archive(&self, message_id: Uuid, user_id: Uuid) -> Result<()> {
        self.with_conn_mut(|conn| delete_overlay(conn, OverlayKind::Archive, message_id, user_id))
    }

    pub fn overlay_ids(&self, kind: OverlayKind, user_id: Uuid) -> Result<HashSet<Uuid>> {
        self.with_conn(|conn| Ok(overlay_times(conn, kind, user_id)?.into_keys().collect()))
    }

    /// Deletion records for a user with their timestamps, for trash annotation.
    pub fn deletion_times(&self, user_id: Uuid) -> Result<HashMap<Uuid, DateTime<Utc>>> {
        self.with_conn(|conn| overlay_times(conn, OverlayKind::Deletion, user_id))
    }

    // -- Read marks --

    /// Create or refresh the read mark for the pair. Always leaves exactly one row.
    pub fn upsert_read_mark(&self, message_id: Uuid, user_id: Uuid) -> Result<ReadMark> {
        self.with_conn_mut(|conn| {
            if !Database::message_exists(conn, message_id)? {
                return Err(MailError::not_found(format!("message {}", message_id)));
            }
            upsert_read(conn, message_id, user_id)
        })
    }

    pub fn delete_read_mark(&self, message_id: Uuid, user_id: Uuid) -> Result<()> {
        let removed = self.with_conn_mut(|conn| {
            Ok(conn.execute(
                "DELETE FROM read_marks WHERE message_id = ?1 AND user_id = ?2",
                (message_id.to_string(), user_id.to_string()),
            )?)
        })?;
        if removed == 0 {
            return Err(MailError::not_found(format!(
                "read mark for message {} and user {}",
                message_id, user_id
            )));
        }
        Ok(())
    }

    pub fn list_read_marks(&self, message_id: Uuid) -> Result<Vec<ReadMark>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, message_id, user_id, read_at FROM read_marks WHERE message_id = ?1 ORDER BY read_at",
            )?;
            let rows = stmt
                .query_map([message_id.to_string()], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            rows.into_iter()
                .map(|(id, mid, uid, read_at)| {
                    Ok(ReadMark {
                        id,
                        message_id: parse_uuid(&mid)?,
                        user_id: parse_uuid(&uid)?,
                        read_at: parse_timestamp(&read_at),
                    })
                })
                .collect()
        })
    }

    /// Every message id the user has a read mark for.
    pub(crate) fn read_ids(conn: &Connection, user_id: Uuid) -> Result<HashSet<Uuid>> {
        let mut stmt = conn.prepare("SELECT message_id FROM read_marks WHERE user_id = ?1")?;
        let ids = stmt
            .query_map([user_id.to_string()], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        ids.iter().map(|id| parse_uuid(id)).collect()
    }

    // -- Mailbox actions --
    //
    // These wrap the raw ledger with participant checks and the trash rules:
    // restore is impossible once a permanent deletion exists, and permanent
    // deletion only applies to messages currently in the user's trash.
    // Trash and archive need a mailbox copy (sender or `to`); cc and bcc
    // recipients may only mark a message read.

    pub fn trash_message(&self, message_id: Uuid, user_id: Uuid) -> Result<OverlayRecord> {
        let record = self.with_conn_mut(|conn| {
            ensure_participant(conn, message_id, user_id, Reach::Mailbox)?;
            insert_overlay(conn, OverlayKind::Deletion, message_id, user_id)
        })?;
        debug!("User {} trashed message {}", user_id, message_id);
        Ok(record)
    }

    pub fn restore_message(&self, message_id: Uuid, user_id: Uuid) -> Result<()> {
        self.with_conn_mut(|conn| {
            if query_overlay(conn, OverlayKind::PermanentDeletion, message_id, user_id)?.is_some() {
                return Err(MailError::not_found(format!(
                    "message {} was permanently deleted",
                    message_id
                )));
            }
            delete_overlay(conn, OverlayKind::Deletion, message_id, user_id)
        })?;
        debug!("User {} restored message {}", user_id, message_id);
        Ok(())
    }

    /// Permanently delete a message from the user's trash. Terminal for this
    /// user; the message row and every other participant's view are untouched.
    pub fn purge_message(&self, message_id: Uuid, user_id: Uuid) -> Result<OverlayRecord> {
        let record = self.with_conn_mut(|conn| {
            if query_overlay(conn, OverlayKind::Deletion, message_id, user_id)?.is_none() {
                return Err(MailError::not_found(format!(
                    "message {} is not in the trash",
                    message_id
                )));
            }
            insert_overlay(conn, OverlayKind::PermanentDeletion, message_id, user_id)
        })?;
        info!("User {} permanently deleted message {}", user_id, message_id);
        Ok(record)
    }

    pub fn archive_message(&self, message_id: Uuid, user_id: Uuid) -> Result<OverlayRecord> {
        self.with_conn_mut(|conn| {
            ensure_participant(conn, message_id, user_id, Reach::Mailbox)?;
            insert_overlay(conn, OverlayKind::Archive, message_id, user_id)
        })
    }

    pub fn unarchive_message(&self, message_id: Uuid, user_id: Uuid) -> Result<()> {
        self.remove_archive(message_id, user_id)
    }

    /// Archive each id independently. Per-id failures are reported, not
    /// raised; only a storage failure aborts (earlier ids stay archived).
    pub fn bulk_archive(&self, message_ids: &[Uuid], user_id: Uuid) -> Result<BulkArchiveResponse> {
        let mut outcome = BulkArchiveResponse::default();

        for &message_id in message_ids {
            let reason = match self.archive_message(message_id, user_id) {
                Ok(_) => {
                    outcome.archived.push(message_id);
                    continue;
                }
                Err(MailError::Conflict(_)) => BulkFailureReason::AlreadyArchived,
                Err(MailError::NotFound(_)) => BulkFailureReason::NotFound,
                Err(MailError::Forbidden(_)) => BulkFailureReason::Forbidden,
                Err(e) => return Err(e),
            };
            outcome.failed.push(BulkFailure { message_id, reason });
        }

        debug!(
            "User {} bulk-archived {} message(s), {} failed",
            user_id,
            outcome.archived.len(),
            outcome.failed.len()
        );
        Ok(outcome)
    }

    pub fn mark_read(&self, message_id: Uuid, user_id: Uuid) -> Result<ReadMark> {
        self.with_conn_mut(|conn| {
            ensure_participant(conn, message_id, user_id, Reach::AnyCopy)?;
            upsert_read(conn, message_id, user_id)
        })
    }

    pub fn mark_unread(&self, message_id: Uuid, user_id: Uuid) -> Result<()> {
        self.delete_read_mark(message_id, user_id)
    }
}

/// Which recipient lists grant access on top of being the sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reach {
    /// `to` only: the lists that place a message in a mailbox view.
    Mailbox,
    /// `to`, `cc` and `bcc`.
    AnyCopy,
}

/// `NotFound` for an unknown message, `Forbidden` unless the user is the
/// sender or appears in a recipient list covered by `reach`.
fn ensure_participant(conn: &Connection, message_id: Uuid, user_id: Uuid, reach: Reach) -> Result<()> {
    let mid = message_id.to_string();
    let uid = user_id.to_string();

    let sender: String = conn
        .query_row("SELECT sender_id FROM messages WHERE id = ?1", [&mid], |r| r.get(0))
        .optional()?
        .ok_or_else(|| MailError::not_found(format!("message {}", message_id)))?;
    if sender == uid {
        return Ok(());
    }

    let sql = match reach {
        Reach::Mailbox => {
            "SELECT 1 FROM message_recipients WHERE message_id = ?1 AND recipient = ?2 AND kind = 'to' LIMIT 1"
        }
        Reach::AnyCopy => "SELECT 1 FROM message_recipients WHERE message_id = ?1 AND recipient = ?2 LIMIT 1",
    };
    let addressed: Option<i64> = conn.query_row(sql, [&mid, &uid], |r| r.get(0)).optional()?;
    match addressed {
        Some(_) => Ok(()),
        None => Err(MailError::forbidden(format!(
            "user {} has no mailbox copy of message {}",
            user_id, message_id
        ))),
    }
}

fn insert_overlay(
    conn: &Connection,
    kind: OverlayKind,
    message_id: Uuid,
    user_id: Uuid,
) -> Result<OverlayRecord> {
    if !Database::message_exists(conn, message_id)? {
        return Err(MailError::not_found(format!("message {}", message_id)));
    }

    let record = OverlayRecord {
        id: Uuid::new_v4(),
        kind,
        message_id,
        user_id,
        timestamp: now(),
    };

    let sql = format!(
        "INSERT INTO {} (id, message_id, user_id, created_at) VALUES (?1, ?2, ?3, ?4)",
        table(kind)
    );
    conn.execute(
        &sql,
        (
            record.id.to_string(),
            message_id.to_string(),
            user_id.to_string(),
            format_timestamp(record.timestamp),
        ),
    )
    .map_err(|e| match MailError::from(e) {
        MailError::Conflict(_) => MailError::conflict(format!(
            "{} already exists for message {} and user {}",
            kind.as_str(),
            message_id,
            user_id
        )),
        other => other,
    })?;

    Ok(record)
}

fn delete_overlay(conn: &Connection, kind: OverlayKind, message_id: Uuid, user_id: Uuid) -> Result<()> {
    let sql = format!("DELETE FROM {} WHERE message_id = ?1 AND user_id = ?2", table(kind));
    let removed = conn.execute(&sql, (message_id.to_string(), user_id.to_string()))?;
    if removed == 0 {
        return Err(MailError::not_found(format!(
            "{} for message {} and user {}",
            kind.as_str(),
            message_id,
            user_id
        )));
    }
    Ok(())
}

fn query_overlay(
    conn: &Connection,
    kind: OverlayKind,
    message_id: Uuid,
    user_id: Uuid,
) -> Result<Option<OverlayRecord>> {
    let sql = format!(
        "SELECT id, created_at FROM {} WHERE message_id = ?1 AND user_id = ?2",
        table(kind)
    );
    let row: Option<(String, String)> = conn
        .query_row(&sql, (message_id.to_string(), user_id.to_string()), |r| {
            Ok((r.get(0)?, r.get(1)?))
        })
        .optional()?;

    row.map(|(id, created_at)| {
        Ok(OverlayRecord {
            id: parse_uuid(&id)?,
            kind,
            message_id,
            user_id,
            timestamp: parse_timestamp(&created_at),
        })
    })
    .transpose()
}

pub(crate) fn overlay_times(
    conn: &Connection,
    kind: OverlayKind,
    user_id: Uuid,
) -> Result<HashMap<Uuid, DateTime<Utc>>> {
    let sql = format!("SELECT message_id, created_at FROM {} WHERE user_id = ?1", table(kind));
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([user_id.to_string()], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(mid, ts)| Ok((parse_uuid(&mid)?, parse_timestamp(&ts))))
        .collect()
}

fn upsert_read(conn: &Connection, message_id: Uuid, user_id: Uuid) -> Result<ReadMark> {
    let mark = ReadMark {
        id: ReadMark::key(message_id, user_id),
        message_id,
        user_id,
        read_at: now(),
    };
    conn.execute(
        "INSERT INTO read_marks (id, message_id, user_id, read_at) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(id) DO UPDATE SET read_at = excluded.read_at",
        (
            &mark.id,
            message_id.to_string(),
            user_id.to_string(),
            format_timestamp(mark.read_at),
        ),
    )?;
    Ok(mark)
}
