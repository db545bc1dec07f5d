//! Delivery seam between the notification layer and live client connections.

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use mailroom_types::events::GatewayEvent;

/// The sending half of one live connection, tagged with its connection id.
#[derive(Debug, Clone)]
pub struct ChannelHandle {
    pub conn_id: Uuid,
    pub sender: mpsc::UnboundedSender<GatewayEvent>,
}

/// One logical channel per user id, at most one live handle per user.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Attach `handle` to the user's channel. Re-joining with the same
    /// connection id is a no-op; a different connection replaces the old one.
    async fn join(&self, user_id: Uuid, handle: ChannelHandle);

    /// Push an event to the user's live channel. Returns whether a live
    /// channel accepted it; offline users are a silent no-op.
    async fn send(&self, user_id: Uuid, event: GatewayEvent) -> bool;
}
