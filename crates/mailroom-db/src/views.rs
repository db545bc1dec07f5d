//! Mailbox View Resolver.
//!
//! Storage only loads a [`MailboxSnapshot`]; every inclusion/exclusion rule
//! for inbox, sent, archive and trash lives in the pure functions here.
//!
//! Precedence: a message that is both trashed and archived by the same user
//! shows only in that user's trash.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use mailroom_types::models::{
    MailboxCounts, Message, OverlayKind, ReadMark, ReadReceipt, RecipientInfo, TrashEntry,
    UserProfile,
};
use mailroom_types::roles::{Role, can_manage_others};

use crate::error::{MailError, Result};
use crate::messages::query_messages;
use crate::overlays::overlay_times;
use crate::users::UserDirectory;
use crate::Database;

/// One user's overlay state, keyed by message id.
#[derive(Debug, Clone, Default)]
pub struct UserOverlays {
    pub deleted: HashMap<Uuid, DateTime<Utc>>,
    pub archived: HashSet<Uuid>,
    pub purged: HashSet<Uuid>,
    pub read: HashSet<Uuid>,
}

/// Everything needed to resolve one user's mailboxes, read under a single lock.
#[derive(Debug, Clone)]
pub struct MailboxSnapshot {
    pub user_id: Uuid,
    pub messages: Vec<Message>,
    pub overlays: UserOverlays,
}

impl MailboxSnapshot {
    fn visible(&self) -> impl Iterator<Item = &Message> {
        self.messages
            .iter()
            .filter(|m| !m.is_deleted && !self.overlays.purged.contains(&m.id))
    }

    pub fn inbox(&self) -> Vec<Message> {
        let o = &self.overlays;
        sorted_by_sent(
            self.visible()
                .filter(|m| m.is_addressed_to(self.user_id))
                .filter(|m| !o.deleted.contains_key(&m.id) && !o.archived.contains(&m.id)),
        )
    }

    /// The sender's copy ignores every overlay axis, purge included.
    pub fn sent(&self) -> Vec<Message> {
        sorted_by_sent(
            self.messages
                .iter()
                .filter(|m| !m.is_deleted && m.sender_id == self.user_id),
        )
    }

    pub fn archive(&self) -> Vec<Message> {
        let o = &self.overlays;
        sorted_by_sent(
            self.visible()
                .filter(|m| m.sender_id == self.user_id || m.is_addressed_to(self.user_id))
                .filter(|m| o.archived.contains(&m.id) && !o.deleted.contains_key(&m.id)),
        )
    }

    /// Trashed messages, most recently trashed first.
    pub fn trash(&self) -> Vec<TrashEntry> {
        let mut entries: Vec<TrashEntry> = self
            .visible()
            .filter_map(|m| {
                self.overlays.deleted.get(&m.id).map(|deleted_at| TrashEntry {
                    message: m.clone(),
                    deleted_at: *deleted_at,
                })
            })
            .collect();
        entries.sort_by(|a, b| b.deleted_at.cmp(&a.deleted_at));
        entries
    }

    pub fn counts(&self) -> MailboxCounts {
        let inbox = self.inbox();
        MailboxCounts {
            unread: inbox
                .iter()
                .filter(|m| !self.overlays.read.contains(&m.id))
                .count(),
            inbox: inbox.len(),
            sent: self.sent().len(),
            archive: self.archive().len(),
            trash: self.trash().len(),
        }
    }
}

fn sorted_by_sent<'a>(messages: impl Iterator<Item = &'a Message>) -> Vec<Message> {
    let mut out: Vec<Message> = messages.cloned().collect();
    out.sort_by(|a, b| b.sent_at.cmp(&a.sent_at));
    out
}

/// Per-recipient read state for `message`, in `recipient_ids` order.
///
/// `directory` maps each raw recipient id to the user it resolved to. Entries
/// missing from it, emails included, become external pseudo-recipients, which
/// are never read.
pub fn read_receipts(
    message: &Message,
    marks: &[ReadMark],
    directory: &HashMap<String, UserProfile>,
) -> Vec<ReadReceipt> {
    let read_at: HashMap<Uuid, DateTime<Utc>> =
        marks.iter().map(|m| (m.user_id, m.read_at)).collect();

    message
        .recipient_ids
        .iter()
        .map(|raw| match directory.get(raw) {
            Some(user) => {
                let at = read_at.get(&user.id).copied();
                ReadReceipt {
                    recipient: RecipientInfo {
                        id: user.id.to_string(),
                        display_name: user.display_name.clone(),
                        email: Some(user.email.clone()),
                        role: user.role,
                        external: false,
                    },
                    is_read: at.is_some(),
                    read_at: at,
                }
            }
            None => ReadReceipt {
                recipient: RecipientInfo {
                    id: raw.clone(),
                    display_name: raw.clone(),
                    email: raw.contains('@').then(|| raw.clone()),
                    role: Role::External,
                    external: true,
                },
                is_read: false,
                read_at: None,
            },
        })
        .collect()
}

impl Database {
    /// Load every message the user can see in any mailbox along with the user's
    /// overlay sets. Fails as a whole; there is no partially-filtered result.
    pub fn mailbox_snapshot(&self, user_id: Uuid) -> Result<MailboxSnapshot> {
        let uid = user_id.to_string();
        self.with_conn(|conn| {
            let messages = query_messages(
                conn,
                "m.is_deleted = 0 AND (
                    m.sender_id = ?1
                    OR m.id IN (SELECT message_id FROM message_recipients WHERE kind = 'to' AND recipient = ?1)
                    OR m.id IN (SELECT message_id FROM deletions WHERE user_id = ?1)
                 )",
                &[&uid],
            )?;

            let overlays = UserOverlays {
                deleted: overlay_times(conn, OverlayKind::Deletion, user_id)?,
                archived: overlay_times(conn, OverlayKind::Archive, user_id)?.into_keys().collect(),
                purged: overlay_times(conn, OverlayKind::PermanentDeletion, user_id)?
                    .into_keys()
                    .collect(),
                read: Database::read_ids(conn, user_id)?,
            };

            Ok(MailboxSnapshot {
                user_id,
                messages,
                overlays,
            })
        })
    }

    pub fn inbox(&self, user_id: Uuid) -> Result<Vec<Message>> {
        Ok(self.mailbox_snapshot(user_id)?.inbox())
    }

    pub fn sent(&self, user_id: Uuid) -> Result<Vec<Message>> {
        Ok(self.mailbox_snapshot(user_id)?.sent())
    }

    pub fn archived(&self, user_id: Uuid) -> Result<Vec<Message>> {
        Ok(self.mailbox_snapshot(user_id)?.archive())
    }

    pub fn trash(&self, user_id: Uuid) -> Result<Vec<TrashEntry>> {
        Ok(self.mailbox_snapshot(user_id)?.trash())
    }

    pub fn mailbox_counts(&self, user_id: Uuid) -> Result<MailboxCounts> {
        Ok(self.mailbox_snapshot(user_id)?.counts())
    }

    /// Read receipts for a message. Only the sender, or a role that can manage
    /// other users, may see them.
    pub fn read_receipts(&self, message_id: Uuid, viewer: &UserProfile) -> Result<Vec<ReadReceipt>> {
        let message = self.get_message(message_id)?;
        if message.sender_id != viewer.id && !can_manage_others(viewer.role) {
            return Err(MailError::forbidden("only the sender can view read receipts"));
        }

        // Only internal ids are looked up. An email entry never reaches a
        // mailbox, so it stays external even when it matches a directory user.
        let mut directory = HashMap::new();
        for raw in &message.recipient_ids {
            let Ok(id) = raw.parse::<Uuid>() else { continue };
            if let Some(user) = self.resolve(id)? {
                directory.insert(raw.clone(), user);
            }
        }

        let marks = self.list_read_marks(message_id)?;
        debug!(
            "Read receipts for {}: {} recipient(s), {} resolved, {} mark(s)",
            message_id,
            message.recipient_ids.len(),
            directory.len(),
            marks.len()
        );
        Ok(read_receipts(&message, &marks, &directory))
    }
}
