pub mod error;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod overlays;
pub mod sessions;
pub mod uploads;
pub mod users;
pub mod views;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;
use std::path::Path;
use std::sync::Mutex;
use tracing::{info, warn};

pub use error::{MailError, Result};
pub use users::UserDirectory;

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let conn = Connection::open(path)?;

        // WAL mode for concurrent reads
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        migrations::run(&conn)?;

        info!("Database opened at {}", path.display());
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Fresh private database, used by tests and throwaway instances.
    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        migrations::run(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| MailError::StorageUnavailable(format!("DB lock poisoned: {}", e)))?;
        f(&conn)
    }

    pub fn with_conn_mut<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| MailError::StorageUnavailable(format!("DB lock poisoned: {}", e)))?;
        f(&mut conn)
    }
}

/// Timestamps are stored as fixed-width RFC 3339 so that text order is time order.
pub(crate) fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| {
            // SQLite's datetime('now') has no timezone: "YYYY-MM-DD HH:MM:SS"
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            warn!("Corrupt timestamp '{}': {}", raw, e);
            DateTime::default()
        })
}

/// Current time truncated to the stored precision, so values read back compare equal.
pub(crate) fn now() -> DateTime<Utc> {
    parse_timestamp(&format_timestamp(Utc::now()))
}

pub(crate) fn parse_uuid(raw: &str) -> Result<uuid::Uuid> {
    raw.parse()
        .map_err(|e| MailError::StorageUnavailable(format!("Corrupt id '{}': {}", raw, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_text_order_matches_time_order() {
        let early = "2026-01-02T03:04:05.006Z".parse::<DateTime<Utc>>().unwrap();
        let late = early + chrono::Duration::milliseconds(995);
        assert!(format_timestamp(early) < format_timestamp(late));
        assert_eq!(parse_timestamp(&format_timestamp(late)), late);
    }

    #[test]
    fn parses_sqlite_default_format() {
        let ts = parse_timestamp("2026-03-04 05:06:07");
        assert_eq!(format_timestamp(ts), "2026-03-04T05:06:07.000Z");
    }
}
