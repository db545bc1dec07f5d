//! Per-user mailbox actions: trash, restore, permanent delete, archive.
//! Archive changes are echoed to the actor's own gateway channel.

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use mailroom_db::MailError;
use mailroom_types::api::{BulkArchiveRequest, Claims};
use mailroom_types::events::ArchiveAction;

use crate::auth::AppState;
use crate::db_call;
use crate::error::ApiError;

const MAX_BULK_IDS: usize = 500;

pub async fn trash_message(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(message_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = claims.sub;
    let record = db_call(&state, move |db| db.trash_message(message_id, user_id)).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

pub async fn restore_message(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(message_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let user_id = claims.sub;
    db_call(&state, move |db| db.restore_message(message_id, user_id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /messages/{id}: only from the caller's trash, and only once.
pub async fn purge_message(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(message_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let user_id = claims.sub;
    db_call(&state, move |db| db.purge_message(message_id, user_id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn archive_message(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(message_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = claims.sub;
    let record = db_call(&state, move |db| db.archive_message(message_id, user_id)).await?;

    echo_archive_change(&state, user_id, vec![message_id], ArchiveAction::Archived, false);
    Ok((StatusCode::CREATED, Json(record)))
}

pub async fn unarchive_message(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(message_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let user_id = claims.sub;
    db_call(&state, move |db| db.unarchive_message(message_id, user_id)).await?;

    echo_archive_change(&state, user_id, vec![message_id], ArchiveAction::Unarchived, false);
    Ok(StatusCode::NO_CONTENT)
}

/// POST /mailbox/archive/bulk: per-id outcomes; one event for all ids that
/// were actually archived.
pub async fn bulk_archive(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<BulkArchiveRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.message_ids.is_empty() {
        return Err(MailError::validation("message_ids must not be empty").into());
    }
    if req.message_ids.len() > MAX_BULK_IDS {
        return Err(MailError::validation(format!("at most {} ids per request", MAX_BULK_IDS)).into());
    }

    let user_id = claims.sub;
    let ids = req.message_ids;
    let outcome = db_call(&state, move |db| db.bulk_archive(&ids, user_id)).await?;

    echo_archive_change(&state, user_id, outcome.archived.clone(), ArchiveAction::Archived, true);
    Ok(Json(outcome))
}

fn echo_archive_change(
    state: &AppState,
    user_id: Uuid,
    message_ids: Vec<Uuid>,
    action: ArchiveAction,
    bulk: bool,
) {
    let notifier = state.notifier.clone();
    tokio::spawn(async move {
        notifier.notify_archive_change(user_id, message_ids, action, bulk).await;
    });
}
