use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 =
        conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;

    if version < 1 {
        info!("Running migration v1 (initial schema)");
        conn.execute_batch(
            "
            CREATE TABLE users (
                id                   TEXT PRIMARY KEY,
                username             TEXT NOT NULL UNIQUE,
                email                TEXT NOT NULL UNIQUE COLLATE NOCASE,
                display_name         TEXT NOT NULL,
                role                 TEXT NOT NULL DEFAULT 'agent',
                department           TEXT,
                attachments_override INTEGER NOT NULL DEFAULT 0,
                password             TEXT NOT NULL,
                created_at           TEXT NOT NULL
            );

            CREATE TABLE messages (
                id          TEXT PRIMARY KEY,
                subject     TEXT NOT NULL,
                body        TEXT NOT NULL,
                sender_id   TEXT NOT NULL,
                priority    TEXT NOT NULL DEFAULT 'normal',
                attachments TEXT NOT NULL DEFAULT '[]',
                sent_at     TEXT NOT NULL,
                created_at  TEXT NOT NULL,
                is_deleted  INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX idx_messages_sender ON messages(sender_id, sent_at);

            -- kind: 'to' | 'cc' | 'bcc'; position keeps the sender's order
            CREATE TABLE message_recipients (
                message_id  TEXT NOT NULL REFERENCES messages(id),
                kind        TEXT NOT NULL,
                position    INTEGER NOT NULL,
                recipient   TEXT NOT NULL,
                PRIMARY KEY (message_id, kind, position)
            );

            CREATE INDEX idx_recipients_lookup ON message_recipients(recipient, kind);

            CREATE TABLE deletions (
                id          TEXT PRIMARY KEY,
                message_id  TEXT NOT NULL REFERENCES messages(id),
                user_id     TEXT NOT NULL,
                created_at  TEXT NOT NULL,
                UNIQUE(message_id, user_id)
            );

            CREATE TABLE archives (
                id          TEXT PRIMARY KEY,
                message_id  TEXT NOT NULL REFERENCES messages(id),
                user_id     TEXT NOT NULL,
                created_at  TEXT NOT NULL,
                UNIQUE(message_id, user_id)
            );

            CREATE TABLE permanent_deletions (
                id          TEXT PRIMARY KEY,
                message_id  TEXT NOT NULL REFERENCES messages(id),
                user_id     TEXT NOT NULL,
                created_at  TEXT NOT NULL,
                UNIQUE(message_id, user_id)
            );

            CREATE INDEX idx_deletions_user ON deletions(user_id);
            CREATE INDEX idx_archives_user ON archives(user_id);
            CREATE INDEX idx_permanent_deletions_user ON permanent_deletions(user_id);

            -- id is '<message_id>:<user_id>', one row per pair
            CREATE TABLE read_marks (
                id          TEXT PRIMARY KEY,
                message_id  TEXT NOT NULL REFERENCES messages(id),
                user_id     TEXT NOT NULL,
                read_at     TEXT NOT NULL
            );

            CREATE INDEX idx_read_marks_message ON read_marks(message_id);
            CREATE INDEX idx_read_marks_user ON read_marks(user_id);

            CREATE TABLE sessions (
                user_id          TEXT PRIMARY KEY,
                display_name     TEXT NOT NULL,
                email            TEXT NOT NULL,
                role             TEXT NOT NULL,
                department       TEXT,
                transport_id     TEXT,
                login_time       TEXT NOT NULL,
                last_activity_at TEXT NOT NULL,
                is_active        INTEGER NOT NULL DEFAULT 1
            );

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    if version < 2 {
        info!("Running migration v2 (attachment uploads)");
        conn.execute_batch(
            "
            CREATE TABLE uploads (
                stored_name TEXT PRIMARY KEY,
                uploader_id TEXT NOT NULL,
                name        TEXT NOT NULL,
                size        INTEGER NOT NULL,
                mime_type   TEXT NOT NULL,
                created_at  TEXT NOT NULL
            );

            CREATE TABLE message_attachments (
                message_id  TEXT NOT NULL REFERENCES messages(id),
                stored_name TEXT NOT NULL,
                PRIMARY KEY (message_id, stored_name)
            );

            CREATE INDEX idx_message_attachments_blob ON message_attachments(stored_name);

            INSERT INTO schema_version (version) VALUES (2);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
