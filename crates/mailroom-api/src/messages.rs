use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;
use uuid::Uuid;

use mailroom_db::MailError;
use mailroom_types::api::{Claims, SendMessageRequest};
use mailroom_types::models::NewMessage;
use mailroom_types::roles::{can_manage_others, can_send_attachments};

use crate::auth::{AppState, current_user};
use crate::db_call;
use crate::error::ApiError;

/// POST /messages: persist, respond, then push `NewMessage` to online
/// recipients in the background.
pub async fn send_message(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let sender = current_user(&state, &claims).await?;
    if !req.attachments.is_empty() && !can_send_attachments(sender.role, sender.attachments_override) {
        return Err(MailError::forbidden(format!("role {} may not send attachments", sender.role)).into());
    }

    let sender_id = sender.id;
    let message = db_call(&state, move |db| {
        // Only metadata the blob store handed back to this sender is accepted
        let attachments = db.verify_attachments(sender_id, &req.attachments)?;
        db.send_message(NewMessage {
            id: None,
            subject: req.subject,
            body: req.body,
            sender_id: Some(sender_id),
            recipient_ids: req.recipient_ids,
            cc_recipients: req.cc_recipients,
            bcc_recipients: req.bcc_recipients,
            priority: req.priority,
            attachments,
        })
    })
    .await?;

    info!(
        "{} sent message {} to {} recipient(s)",
        sender.username,
        message.id,
        message.recipient_ids.len()
    );

    // Fan-out never holds up or fails the send
    let notifier = state.notifier.clone();
    let pushed = message.clone();
    tokio::spawn(async move {
        notifier.notify_new_message(&pushed, &sender).await;
    });

    Ok((StatusCode::CREATED, Json(message)))
}

/// GET /messages/{id}: participants, plus admins and managers.
pub async fn get_message(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(message_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let viewer = current_user(&state, &claims).await?;
    let message = db_call(&state, move |db| db.get_message(message_id)).await?;

    if !message.is_participant(viewer.id) && !can_manage_others(viewer.role) {
        return Err(MailError::forbidden(format!("{} is not a participant of {}", viewer.id, message_id)).into());
    }
    Ok(Json(message))
}

/// POST /messages/{id}/read
pub async fn mark_read(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(message_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = claims.sub;
    let mark = db_call(&state, move |db| db.mark_read(message_id, user_id)).await?;
    Ok(Json(mark))
}

/// DELETE /messages/{id}/read
pub async fn mark_unread(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(message_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let user_id = claims.sub;
    db_call(&state, move |db| db.mark_unread(message_id, user_id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /messages/{id}/receipts: per-recipient read status for the sender.
pub async fn read_receipts(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(message_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let viewer = current_user(&state, &claims).await?;
    let receipts = db_call(&state, move |db| db.read_receipts(message_id, &viewer)).await?;
    Ok(Json(receipts))
}
