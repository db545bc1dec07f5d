//! Notification fan-out: best-effort, at-most-once delivery of mailbox
//! events to live channels. Nothing is queued for offline users and no
//! failure here ever reaches the caller of the triggering write.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use mailroom_types::events::{ArchiveAction, GatewayEvent};
use mailroom_types::models::{Message, UserProfile};

use crate::transport::Transport;

const PREVIEW_CHARS: usize = 100;

#[derive(Clone)]
pub struct Notifier {
    transport: Arc<dyn Transport>,
}

impl Notifier {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Push `NewMessage` to every internal recipient in `recipient_ids`.
    /// External email addresses have no channel and are skipped. Returns how
    /// many live channels accepted the event.
    pub async fn notify_new_message(&self, message: &Message, sender: &UserProfile) -> usize {
        let preview = body_preview(&message.body);
        let mut seen = HashSet::new();
        let mut delivered = 0;

        for raw in &message.recipient_ids {
            let Ok(user_id) = raw.parse::<Uuid>() else {
                continue;
            };
            if !seen.insert(user_id) {
                continue;
            }

            let event = GatewayEvent::NewMessage {
                message_id: message.id,
                subject: message.subject.clone(),
                sender_id: message.sender_id,
                sender_name: sender.display_name.clone(),
                sender_email: sender.email.clone(),
                sent_at: message.sent_at,
                priority: message.priority,
                body_preview: preview.clone(),
            };

            if self.transport.send(user_id, event).await {
                delivered += 1;
            } else {
                debug!("Recipient {} offline, skipping new-message event for {}", user_id, message.id);
            }
        }

        debug!(
            "New message {} delivered live to {}/{} recipient(s)",
            message.id,
            delivered,
            seen.len()
        );
        delivered
    }

    /// Tell the acting user's own channel that messages were (un)archived, so
    /// other tabs and devices stay consistent. Never reaches other participants.
    pub async fn notify_archive_change(
        &self,
        user_id: Uuid,
        message_ids: Vec<Uuid>,
        action: ArchiveAction,
        bulk: bool,
    ) -> bool {
        if message_ids.is_empty() {
            return false;
        }
        let event = GatewayEvent::ArchiveChange {
            message_ids,
            action,
            bulk,
        };
        self.transport.send(user_id, event).await
    }
}

/// First 100 characters of the body, with `...` appended when truncated.
pub fn body_preview(body: &str) -> String {
    let mut chars = body.char_indices();
    match chars.nth(PREVIEW_CHARS) {
        Some((cut, _)) => format!("{}...", &body[..cut]),
        None => body.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use mailroom_types::models::Priority;
    use mailroom_types::roles::Role;
    use tokio::sync::Mutex;

    use crate::transport::ChannelHandle;

    /// Records deliveries for users marked online.
    #[derive(Default)]
    struct RecordingTransport {
        online: HashSet<Uuid>,
        sent: Mutex<Vec<(Uuid, GatewayEvent)>>,
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn join(&self, _user_id: Uuid, _handle: ChannelHandle) {}

        async fn send(&self, user_id: Uuid, event: GatewayEvent) -> bool {
            if !self.online.contains(&user_id) {
                return false;
            }
            self.sent.lock().await.push((user_id, event));
            true
        }
    }

    fn sender() -> UserProfile {
        UserProfile {
            id: Uuid::new_v4(),
            username: "sam".into(),
            email: "sam@mailroom.example".into(),
            display_name: "Sam Sender".into(),
            role: Role::Agent,
            department: None,
            attachments_override: false,
            created_at: Utc::now(),
        }
    }

    fn message(from: &UserProfile, to: Vec<String>, body: &str) -> Message {
        Message {
            id: Uuid::new_v4(),
            subject: "Hello".into(),
            body: body.into(),
            sender_id: from.id,
            recipient_ids: to,
            cc_recipients: vec![],
            bcc_recipients: vec![],
            priority: Priority::High,
            attachments: vec![],
            sent_at: Utc::now(),
            created_at: Utc::now(),
            is_deleted: false,
        }
    }

    #[test]
    fn preview_truncates_at_100_chars() {
        assert_eq!(body_preview("short"), "short");
        let exact = "a".repeat(100);
        assert_eq!(body_preview(&exact), exact);
        let long = "é".repeat(150);
        let preview = body_preview(&long);
        assert_eq!(preview.chars().count(), 103);
        assert!(preview.ends_with("..."));
    }

    #[tokio::test]
    async fn new_message_goes_to_online_recipients_only() {
        let (online, offline) = (Uuid::new_v4(), Uuid::new_v4());
        let transport = Arc::new(RecordingTransport {
            online: HashSet::from([online]),
            ..Default::default()
        });
        let notifier = Notifier::new(transport.clone());
        let from = sender();
        let m = message(
            &from,
            vec![online.to_string(), offline.to_string(), "x@outside.example".into()],
            "Body",
        );

        assert_eq!(notifier.notify_new_message(&m, &from).await, 1);

        let sent = transport.sent.lock().await;
        assert_eq!(sent.len(), 1);
        let (to, event) = &sent[0];
        assert_eq!(*to, online);
        match event {
            GatewayEvent::NewMessage { sender_name, sender_email, priority, body_preview, .. } => {
                assert_eq!(sender_name, "Sam Sender");
                assert_eq!(sender_email, "sam@mailroom.example");
                assert_eq!(*priority, Priority::High);
                assert_eq!(body_preview, "Body");
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn archive_change_targets_actor_only() {
        let (actor, other) = (Uuid::new_v4(), Uuid::new_v4());
        let transport = Arc::new(RecordingTransport {
            online: HashSet::from([actor, other]),
            ..Default::default()
        });
        let notifier = Notifier::new(transport.clone());
        let ids = vec![Uuid::new_v4(), Uuid::new_v4()];

        assert!(notifier.notify_archive_change(actor, ids.clone(), ArchiveAction::Archived, true).await);
        assert!(!notifier.notify_archive_change(actor, vec![], ArchiveAction::Archived, true).await);

        let sent = transport.sent.lock().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, actor);
        assert_eq!(
            sent[0].1,
            GatewayEvent::ArchiveChange { message_ids: ids, action: ArchiveAction::Archived, bulk: true }
        );
    }
}
