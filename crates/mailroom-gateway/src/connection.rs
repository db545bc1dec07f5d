use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

use mailroom_db::{Database, MailError};
use mailroom_types::events::{GatewayCommand, GatewayEvent};

use crate::dispatcher::Dispatcher;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

type WsSink = futures_util::stream::SplitSink<WebSocket, Message>;

/// Handle a pre-authenticated WebSocket connection. The JWT was validated at
/// the HTTP upgrade, so this goes straight to session registration, Ready and
/// the event loop.
pub async fn handle_connection(
    socket: WebSocket,
    dispatcher: Dispatcher,
    db: Arc<Database>,
    user_id: Uuid,
    username: String,
) {
    let (mut sender, mut receiver) = socket.split();

    // Join the user's channel first so nothing sent after the session exists is lost
    let (conn_id, mut user_rx) = dispatcher.register_user_channel(user_id).await;

    let transport_id = conn_id.to_string();
    let session_db = db.clone();
    let session = tokio::task::spawn_blocking(move || {
        session_db.upsert_session(user_id, Some(transport_id.as_str()))
    })
    .await;

    match session {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => {
            warn!("{} ({}) rejected at gateway: {}", username, user_id, e);
            dispatcher.unregister_user_channel(user_id, conn_id).await;
            return;
        }
        Err(e) => {
            warn!("spawn_blocking join error: {}", e);
            dispatcher.unregister_user_channel(user_id, conn_id).await;
            return;
        }
    }

    info!("{} ({}) connected to gateway", username, user_id);

    let ready = GatewayEvent::Ready {
        user_id,
        username: username.clone(),
    };
    if send_event(&mut sender, &ready).await.is_err() {
        dispatcher.user_offline(user_id, conn_id).await;
        return;
    }

    // Send existing online users to this client so they see who's already here
    for (uid, uname) in dispatcher.online_users().await {
        let event = GatewayEvent::PresenceUpdate {
            user_id: uid,
            username: uname,
            online: true,
        };
        if send_event(&mut sender, &event).await.is_err() {
            dispatcher.user_offline(user_id, conn_id).await;
            return;
        }
    }

    // Now mark ourselves online (broadcasts to everyone else)
    dispatcher.user_online(user_id, username.clone()).await;

    let mut broadcast_rx = dispatcher.subscribe();

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward broadcasts + targeted events -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = broadcast_rx.recv() => {
                    let event = match result {
                        Ok(event) => event,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            warn!("Broadcast receiver lagged by {} messages", n);
                            continue;
                        }
                        Err(_) => break,
                    };
                    if send_event(&mut sender, &event).await.is_err() {
                        break;
                    }
                }
                result = user_rx.recv() => {
                    // None: a newer connection replaced this one
                    let Some(event) = result else { break };
                    if send_event(&mut sender, &event).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from client
    let recv_db = db.clone();
    let username_recv = username.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(GatewayCommand::Heartbeat) => touch(&recv_db, user_id).await,
                    Err(e) => {
                        warn!(
                            "{} ({}) bad command: {} -- raw: {}",
                            username_recv,
                            user_id,
                            e,
                            text.chars().take(200).collect::<String>()
                        );
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                    touch(&recv_db, user_id).await;
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    dispatcher.user_offline(user_id, conn_id).await;
    info!("{} ({}) disconnected from gateway", username, user_id);
}

async fn send_event(sender: &mut WsSink, event: &GatewayEvent) -> Result<(), ()> {
    let text = serde_json::to_string(event).map_err(|e| {
        warn!("Failed to serialize {} event: {}", event.name(), e);
    })?;
    sender.send(Message::Text(text.into())).await.map_err(|_| ())
}

/// Refresh session activity. A missing session (logged out over HTTP, or
/// swept) is not an error for the socket.
async fn touch(db: &Arc<Database>, user_id: Uuid) {
    let db = db.clone();
    match tokio::task::spawn_blocking(move || db.touch_session(user_id)).await {
        Ok(Ok(())) => {}
        Ok(Err(MailError::NotFound(_))) => debug!("No active session to touch for {}", user_id),
        Ok(Err(e)) => warn!("Session touch failed for {}: {}", user_id, e),
        Err(e) => warn!("spawn_blocking join error: {}", e),
    }
}
