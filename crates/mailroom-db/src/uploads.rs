//! Upload ledger: which user stored which attachment blob.
//!
//! A message may only reference blobs its sender uploaded, with the metadata
//! the blob store returned. Downloads are open to the uploader and to
//! participants of any live message that references the blob.

use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension;
use tracing::debug;
use uuid::Uuid;

use mailroom_types::models::Attachment;

use crate::error::{MailError, Result};
use crate::{Database, format_timestamp, now, parse_timestamp, parse_uuid};

#[derive(Debug, Clone, PartialEq)]
pub struct UploadRecord {
    pub attachment: Attachment,
    pub uploader_id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl Database {
    pub fn record_upload(&self, uploader_id: Uuid, attachment: &Attachment) -> Result<UploadRecord> {
        let record = UploadRecord {
            attachment: attachment.clone(),
            uploader_id,
            created_at: now(),
        };
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO uploads (stored_name, uploader_id, name, size, mime_type, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    attachment.stored_name,
                    uploader_id.to_string(),
                    attachment.name,
                    attachment.size as i64,
                    attachment.mime_type,
                    format_timestamp(record.created_at),
                ],
            )?;
            Ok(())
        })?;
        Ok(record)
    }

    pub fn get_upload(&self, stored_name: &str) -> Result<Option<UploadRecord>> {
        self.with_conn(|conn| {
            let row: Option<(String, String, i64, String, String)> = conn
                .query_row(
                    "SELECT uploader_id, name, size, mime_type, created_at FROM uploads WHERE stored_name = ?1",
                    [stored_name],
                    |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?)),
                )
                .optional()?;

            row.map(|(uploader_id, name, size, mime_type, created_at)| {
                Ok(UploadRecord {
                    attachment: Attachment {
                        name,
                        size: size as u64,
                        mime_type,
                        stored_name: stored_name.to_string(),
                    },
                    uploader_id: parse_uuid(&uploader_id)?,
                    created_at: parse_timestamp(&created_at),
                })
            })
            .transpose()
        })
    }

    /// Check attachment references on an outgoing message against the ledger.
    ///
    /// Each entry must name a blob `sender_id` uploaded, and its name, size and
    /// type must be exactly what the store returned. Yields the recorded
    /// metadata in request order.
    pub fn verify_attachments(&self, sender_id: Uuid, claimed: &[Attachment]) -> Result<Vec<Attachment>> {
        claimed
            .iter()
            .map(|c| {
                let record = self.get_upload(&c.stored_name)?.ok_or_else(|| {
                    MailError::validation(format!("unknown attachment {}", c.stored_name))
                })?;
                if record.uploader_id != sender_id {
                    return Err(MailError::forbidden(format!(
                        "attachment {} belongs to another user",
                        c.stored_name
                    )));
                }
                if *c != record.attachment {
                    debug!("Attachment {} metadata differs from upload", c.stored_name);
                    return Err(MailError::validation(format!(
                        "attachment {} does not match the stored upload",
                        c.stored_name
                    )));
                }
                Ok(record.attachment)
            })
            .collect()
    }

    /// True when `user_id` uploaded the blob or takes part (sender, to, cc or
    /// bcc) in a live message that references it.
    pub fn can_download(&self, stored_name: &str, user_id: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM uploads WHERE stored_name = ?1 AND uploader_id = ?2
                     UNION ALL
                     SELECT 1 FROM message_attachments a
                       JOIN messages m ON m.id = a.message_id
                      WHERE a.stored_name = ?1 AND m.is_deleted = 0
                        AND (m.sender_id = ?2 OR m.id IN
                             (SELECT message_id FROM message_recipients WHERE recipient = ?2))
                     LIMIT 1",
                    (stored_name, user_id.to_string()),
                    |r| r.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mailroom_types::models::NewMessage;

    fn upload(db: &Database, uploader: Uuid) -> Attachment {
        let attachment = Attachment {
            name: "rota.csv".into(),
            size: 42,
            mime_type: "text/csv".into(),
            stored_name: Uuid::new_v4().to_string(),
        };
        db.record_upload(uploader, &attachment).unwrap();
        attachment
    }

    #[test]
    fn verify_accepts_only_the_recorded_metadata() {
        let db = Database::open_in_memory().unwrap();
        let (sender, other) = (Uuid::new_v4(), Uuid::new_v4());
        let att = upload(&db, sender);

        assert_eq!(db.verify_attachments(sender, &[att.clone()]).unwrap(), vec![att.clone()]);

        let mut bigger = att.clone();
        bigger.size = 1;
        assert!(matches!(db.verify_attachments(sender, &[bigger]), Err(MailError::Validation(_))));

        let mut retyped = att.clone();
        retyped.mime_type = "application/x-msdownload".into();
        assert!(matches!(db.verify_attachments(sender, &[retyped]), Err(MailError::Validation(_))));

        let mut unknown = att.clone();
        unknown.stored_name = Uuid::new_v4().to_string();
        assert!(matches!(db.verify_attachments(sender, &[unknown]), Err(MailError::Validation(_))));

        assert!(matches!(db.verify_attachments(other, &[att]), Err(MailError::Forbidden(_))));
    }

    #[test]
    fn download_follows_message_participation() {
        let db = Database::open_in_memory().unwrap();
        let (sender, to, bcc, outsider) =
            (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let att = upload(&db, sender);

        assert!(db.can_download(&att.stored_name, sender).unwrap());
        assert!(!db.can_download(&att.stored_name, to).unwrap());

        let message = db
            .send_message(NewMessage {
                subject: "Rota".into(),
                body: "Attached.".into(),
                sender_id: Some(sender),
                recipient_ids: vec![to.to_string()],
                bcc_recipients: vec![bcc.to_string()],
                attachments: vec![att.clone()],
                ..Default::default()
            })
            .unwrap();

        assert!(db.can_download(&att.stored_name, to).unwrap());
        assert!(db.can_download(&att.stored_name, bcc).unwrap());
        assert!(!db.can_download(&att.stored_name, outsider).unwrap());

        db.with_conn(|conn| {
            conn.execute("UPDATE messages SET is_deleted = 1 WHERE id = ?1", [message.id.to_string()])?;
            Ok(())
        })
        .unwrap();
        assert!(!db.can_download(&att.stored_name, to).unwrap());
        assert!(db.can_download(&att.stored_name, sender).unwrap());
    }
}
