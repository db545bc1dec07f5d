use axum::{
    Extension, Json,
    body::{Body, Bytes},
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::IntoResponse,
};
use tracing::debug;

use mailroom_db::MailError;
use mailroom_types::api::{Claims, UploadQuery};
use mailroom_types::roles::{can_manage_others, can_send_attachments};

use crate::auth::{AppState, current_user};
use crate::db_call;
use crate::error::ApiError;

/// POST /attachments?name=report.pdf: raw request body, returns the
/// attachment metadata to reference from a later send.
pub async fn upload_attachment(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<UploadQuery>,
    bytes: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let uploader = current_user(&state, &claims).await?;
    if !can_send_attachments(uploader.role, uploader.attachments_override) {
        return Err(MailError::forbidden(format!("role {} may not send attachments", uploader.role)).into());
    }
    if bytes.len() > state.max_attachment_bytes {
        return Err(ApiError::PayloadTooLarge);
    }

    let attachment = state.blobs.put(bytes, &query.name).await?;
    let uploader_id = uploader.id;
    let recorded = attachment.clone();
    db_call(&state, move |db| db.record_upload(uploader_id, &recorded)).await?;
    debug!("{} uploaded attachment {}", uploader_id, attachment.stored_name);

    Ok((StatusCode::CREATED, Json(attachment)))
}

/// GET /attachments/{stored_name}: streams the stored bytes back to the
/// uploader, participants of a message carrying it, and admins or managers.
pub async fn download_attachment(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(stored_name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let viewer = current_user(&state, &claims).await?;
    let (name, viewer_id) = (stored_name.clone(), viewer.id);
    let (upload, allowed) = db_call(&state, move |db| {
        let upload = db
            .get_upload(&name)?
            .ok_or_else(|| MailError::not_found(format!("attachment {}", name)))?;
        Ok((upload, db.can_download(&name, viewer_id)?))
    })
    .await?;
    if !allowed && !can_manage_others(viewer.role) {
        return Err(MailError::forbidden(format!("{} may not download {}", viewer.id, stored_name)).into());
    }

    let blob = state.blobs.get(&stored_name).await?;

    Ok((
        [
            (header::CONTENT_TYPE, upload.attachment.mime_type),
            (header::CONTENT_LENGTH, blob.size.to_string()),
        ],
        Body::from_stream(blob.stream),
    ))
}
