use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    response::IntoResponse,
};
use tracing::info;
use uuid::Uuid;

use mailroom_db::{MailError, UserDirectory};
use mailroom_types::api::{
    AttachmentsOverrideRequest, Claims, PresenceEntry, UpdateRoleRequest, UserQuery,
};
use mailroom_types::roles::{Role, can_manage_others, is_admin};

use crate::auth::{AppState, current_user};
use crate::db_call;
use crate::error::ApiError;

/// GET /users?role=agent,bde: directory listing, every role when omitted.
pub async fn list_users(
    State(state): State<AppState>,
    Extension(_claims): Extension<Claims>,
    Query(query): Query<UserQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let roles = parse_roles(query.role.as_deref())?;
    let users = db_call(&state, move |db| db.list_by_role(&roles)).await?;
    Ok(Json(users))
}

/// GET /sessions: prunes stale sessions, then lists who is active.
pub async fn list_sessions(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let viewer = current_user(&state, &claims).await?;
    if !can_manage_others(viewer.role) {
        return Err(MailError::forbidden("only admins and managers may list sessions").into());
    }
    let window = state.session_window;
    let sessions = db_call(&state, move |db| db.list_active_sessions(window)).await?;
    Ok(Json(sessions))
}

/// GET /presence: users with a live gateway connection.
pub async fn list_presence(
    State(state): State<AppState>,
    Extension(_claims): Extension<Claims>,
) -> impl IntoResponse {
    let mut online: Vec<PresenceEntry> = state
        .dispatcher
        .online_users()
        .await
        .into_iter()
        .map(|(user_id, username)| PresenceEntry { user_id, username })
        .collect();
    online.sort_by(|a, b| a.username.cmp(&b.username));
    Json(online)
}

/// PUT /users/{id}/role: admin only.
pub async fn update_role(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(user_id): Path<Uuid>,
    Json(req): Json<UpdateRoleRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let actor = current_user(&state, &claims).await?;
    if !is_admin(actor.role) {
        return Err(MailError::forbidden("only admins may change roles").into());
    }
    if actor.id == user_id && req.role != Role::Admin {
        return Err(MailError::validation("admins cannot demote themselves").into());
    }

    let role = req.role;
    let profile = db_call(&state, move |db| db.update_role(user_id, role)).await?;
    info!("{} changed role of {} to {}", actor.username, user_id, role);
    Ok(Json(profile))
}

/// PUT /users/{id}/attachments: grant or revoke the per-user attachment
/// override. Admins and managers only.
pub async fn set_attachments_override(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(user_id): Path<Uuid>,
    Json(req): Json<AttachmentsOverrideRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let actor = current_user(&state, &claims).await?;
    if !can_manage_others(actor.role) {
        return Err(MailError::forbidden("only admins and managers may grant attachments").into());
    }

    let allowed = req.allowed;
    let profile = db_call(&state, move |db| {
        db.set_attachments_override(user_id, allowed)?;
        db.resolve(user_id)?
            .ok_or_else(|| MailError::not_found(format!("user {}", user_id)))
    })
    .await?;
    info!("{} set attachment override of {} to {}", actor.username, user_id, allowed);
    Ok(Json(profile))
}

fn parse_roles(raw: Option<&str>) -> Result<Vec<Role>, ApiError> {
    let raw = raw.unwrap_or("").trim();
    if raw.is_empty() {
        return Ok(Role::ALL.to_vec());
    }
    raw.split(',')
        .filter(|part| !part.trim().is_empty())
        .map(|part| {
            part.parse::<Role>()
                .map_err(|e| ApiError::from(MailError::validation(e.to_string())))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_filter_parsing() {
        assert_eq!(parse_roles(None).unwrap().len(), Role::ALL.len());
        assert_eq!(
            parse_roles(Some("agent, BDE")).unwrap(),
            vec![Role::Agent, Role::Bde]
        );
        assert!(matches!(
            parse_roles(Some("agent,wizard")),
            Err(ApiError::Mail(MailError::Validation(_)))
        ));
    }
}
