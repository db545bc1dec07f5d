//! Error taxonomy shared by every storage and mailbox operation.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, MailError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MailError {
    /// A required field is missing or malformed; nothing was written.
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Duplicate strict-create. Callers may treat it as already satisfied.
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),
}

impl MailError {
    pub fn validation(msg: impl Into<String>) -> Self {
        MailError::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        MailError::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        MailError::Conflict(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        MailError::Forbidden(msg.into())
    }
}

impl From<rusqlite::Error> for MailError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, _)
                if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                    || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY =>
            {
                MailError::Conflict(err.to_string())
            }
            _ => MailError::StorageUnavailable(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for MailError {
    fn from(err: serde_json::Error) -> Self {
        MailError::StorageUnavailable(format!("corrupt JSON column: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn unique_violation_maps_to_conflict() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (k TEXT NOT NULL UNIQUE); INSERT INTO t VALUES ('a');")
            .unwrap();
        let err: MailError = conn
            .execute("INSERT INTO t VALUES ('a')", [])
            .unwrap_err()
            .into();
        assert!(matches!(err, MailError::Conflict(_)));
    }

    #[test]
    fn other_failures_map_to_storage_unavailable() {
        let conn = Connection::open_in_memory().unwrap();
        let err: MailError = conn.execute("SELECT * FROM missing", []).unwrap_err().into();
        assert!(matches!(err, MailError::StorageUnavailable(_)));
    }
}
