use axum::{Extension, Json, extract::State, response::IntoResponse};

use mailroom_types::api::Claims;

use crate::auth::AppState;
use crate::db_call;
use crate::error::ApiError;

pub async fn inbox(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = claims.sub;
    Ok(Json(db_call(&state, move |db| db.inbox(user_id)).await?))
}

pub async fn sent(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = claims.sub;
    Ok(Json(db_call(&state, move |db| db.sent(user_id)).await?))
}

pub async fn archive(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = claims.sub;
    Ok(Json(db_call(&state, move |db| db.archived(user_id)).await?))
}

pub async fn trash(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = claims.sub;
    Ok(Json(db_call(&state, move |db| db.trash(user_id)).await?))
}

pub async fn counts(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = claims.sub;
    Ok(Json(db_call(&state, move |db| db.mailbox_counts(user_id)).await?))
}
