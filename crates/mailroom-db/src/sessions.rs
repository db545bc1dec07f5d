//! Session Registry: one row per logged-in user with staleness expiry.

use chrono::Duration;
use rusqlite::{Connection, OptionalExtension};
use tracing::{debug, info, warn};
use uuid::Uuid;

use mailroom_types::models::Session;
use mailroom_types::roles::Role;

use crate::error::{MailError, Result};
use crate::models::SessionRow;
use crate::users::query_profile_by_id;
use crate::{Database, format_timestamp, now, parse_timestamp, parse_uuid};

/// Default activity window, in minutes, for the "who is online" view.
pub const ACTIVE_WINDOW_MINUTES: i64 = 30;

pub fn default_active_window() -> Duration {
    Duration::minutes(ACTIVE_WINDOW_MINUTES)
}

const SESSION_COLUMNS: &str = "user_id, display_name, email, role, department, transport_id, login_time, last_activity_at, is_active";

/// Counts from one prune pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PruneStats {
    pub orphaned: usize,
    pub stale: usize,
}

impl Database {
    /// Create or refresh the session for `user_id`. Profile fields come from the
    /// user directory; a second upsert keeps `login_time` and takes the newest
    /// transport id and activity timestamp.
    pub fn upsert_session(&self, user_id: Uuid, transport_id: Option<&str>) -> Result<Session> {
        let session = self.with_conn_mut(|conn| {
            let profile = query_profile_by_id(conn, user_id)?
                .ok_or_else(|| MailError::not_found(format!("user {}", user_id)))?;
            let ts = format_timestamp(now());

            conn.execute(
                "INSERT INTO sessions (user_id, display_name, email, role, department, transport_id, login_time, last_activity_at, is_active)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7, 1)
                 ON CONFLICT(user_id) DO UPDATE SET
                    display_name = excluded.display_name,
                    email = excluded.email,
                    role = excluded.role,
                    department = excluded.department,
                    transport_id = excluded.transport_id,
                    last_activity_at = excluded.last_activity_at,
                    is_active = 1",
                rusqlite::params![
                    user_id.to_string(),
                    profile.display_name,
                    profile.email,
                    profile.role.as_str(),
                    profile.department,
                    transport_id,
                    ts,
                ],
            )?;

            query_session(conn, user_id)?
                .ok_or_else(|| MailError::StorageUnavailable("session vanished after upsert".into()))
        })?;

        debug!("Session upserted for {} (transport {:?})", user_id, session.transport_id);
        Ok(session)
    }

    /// Refresh `last_activity_at`. `NotFound` if the user has no active session.
    pub fn touch_session(&self, user_id: Uuid) -> Result<()> {
        let changed = self.with_conn_mut(|conn| {
            Ok(conn.execute(
                "UPDATE sessions SET last_activity_at = ?1 WHERE user_id = ?2 AND is_active = 1",
                (format_timestamp(now()), user_id.to_string()),
            )?)
        })?;
        if changed == 0 {
            return Err(MailError::not_found(format!("active session for user {}", user_id)));
        }
        Ok(())
    }

    /// Explicit logout.
    pub fn remove_session(&self, user_id: Uuid) -> Result<()> {
        let removed = self.with_conn_mut(|conn| {
            Ok(conn.execute("DELETE FROM sessions WHERE user_id = ?1", [user_id.to_string()])?)
        })?;
        if removed == 0 {
            return Err(MailError::not_found(format!("session for user {}", user_id)));
        }
        info!("Session removed for {}", user_id);
        Ok(())
    }

    pub fn get_session(&self, user_id: Uuid) -> Result<Option<Session>> {
        self.with_conn(|conn| query_session(conn, user_id))
    }

    /// Delete sessions whose user no longer exists and sessions idle longer
    /// than `window`. Safe to run concurrently with readers.
    pub fn prune_sessions(&self, window: Duration) -> Result<PruneStats> {
        let cutoff = format_timestamp(now() - window);
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let orphaned = tx.execute(
                "DELETE FROM sessions WHERE user_id NOT IN (SELECT id FROM users)",
                [],
            )?;
            let stale = tx.execute(
                "DELETE FROM sessions WHERE last_activity_at < ?1 OR is_active = 0",
                [&cutoff],
            )?;
            tx.commit()?;
            Ok(PruneStats { orphaned, stale })
        })
    }

    /// Sessions active within `window`, most recently active first. Prunes
    /// orphaned and stale sessions as a side effect.
    pub fn list_active_sessions(&self, window: Duration) -> Result<Vec<Session>> {
        let stats = self.prune_sessions(window)?;
        if stats.orphaned + stats.stale > 0 {
            debug!(
                "Pruned {} orphaned and {} stale session(s) while listing",
                stats.orphaned, stats.stale
            );
        }

        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM sessions WHERE is_active = 1 ORDER BY last_activity_at DESC",
                SESSION_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([], map_session_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.into_iter().map(row_to_session).collect()
        })
    }
}

fn query_session(conn: &Connection, user_id: Uuid) -> Result<Option<Session>> {
    let sql = format!("SELECT {} FROM sessions WHERE user_id = ?1", SESSION_COLUMNS);
    conn.query_row(&sql, [user_id.to_string()], map_session_row)
        .optional()?
        .map(row_to_session)
        .transpose()
}

fn map_session_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SessionRow> {
    Ok(SessionRow {
        user_id: row.get(0)?,
        display_name: row.get(1)?,
        email: row.get(2)?,
        role: row.get(3)?,
        department: row.get(4)?,
        transport_id: row.get(5)?,
        login_time: row.get(6)?,
        last_activity_at: row.get(7)?,
        is_active: row.get(8)?,
    })
}

fn row_to_session(row: SessionRow) -> Result<Session> {
    let role = row.role.parse::<Role>().unwrap_or_else(|e| {
        warn!("{} on session '{}'", e, row.user_id);
        Role::External
    });
    Ok(Session {
        user_id: parse_uuid(&row.user_id)?,
        display_name: row.display_name,
        email: row.email,
        role,
        department: row.department,
        transport_id: row.transport_id,
        login_time: parse_timestamp(&row.login_time),
        last_activity_at: parse_timestamp(&row.last_activity_at),
        is_active: row.is_active,
    })
}
