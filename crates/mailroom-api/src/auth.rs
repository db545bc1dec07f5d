use std::sync::Arc;

use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use jsonwebtoken::{EncodingKey, Header, encode};
use tracing::{debug, error, info};
use uuid::Uuid;

use mailroom_db::users::NewUser;
use mailroom_db::{Database, MailError, UserDirectory};
use mailroom_gateway::dispatcher::Dispatcher;
use mailroom_gateway::notify::Notifier;
use mailroom_types::api::{
    Claims, LoginRequest, LoginResponse, RegisterRequest, RegisterResponse, ResetPasswordRequest,
};
use mailroom_types::models::UserProfile;
use mailroom_types::roles::{Role, can_manage_others};

use crate::blobs::BlobStore;
use crate::db_call;
use crate::error::ApiError;

const TOKEN_LIFETIME_DAYS: i64 = 30;
const MIN_PASSWORD_LEN: usize = 8;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub jwt_secret: String,
    pub dispatcher: Dispatcher,
    pub notifier: Notifier,
    pub blobs: Arc<dyn BlobStore>,
    /// Sessions idle longer than this are pruned.
    pub session_window: chrono::Duration,
    pub max_attachment_bytes: usize,
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let username = req.username.trim().to_string();
    if username.len() < 3 || username.len() > 32 {
        return Err(MailError::validation("username must be 3-32 characters").into());
    }
    if req.password.len() < MIN_PASSWORD_LEN {
        return Err(MailError::validation("password must be at least 8 characters").into());
    }

    let password_hash = hash_password(&req.password)?;

    // The first account bootstraps the directory as its admin
    let profile = db_call(&state, move |db| {
        db.create_user_bootstrapping(NewUser {
            display_name: req.display_name.unwrap_or_default(),
            username,
            email: req.email,
            role: Role::Agent,
            department: req.department,
            password_hash,
        })
    })
    .await?;

    let token = create_token(&state.jwt_secret, &profile)?;

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            user_id: profile.id,
            token,
        }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let username = req.username.trim().to_string();
    let creds = db_call(&state, move |db| db.get_credentials_by_username(&username))
        .await?
        .ok_or(ApiError::Unauthorized)?;

    let parsed_hash = PasswordHash::new(&creds.password_hash).map_err(|e| {
        error!("Stored password hash for {} is unreadable: {}", creds.profile.id, e);
        ApiError::Internal
    })?;

    Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .map_err(|_| ApiError::Unauthorized)?;

    let profile = creds.profile;
    let user_id = profile.id;
    db_call(&state, move |db| db.upsert_session(user_id, None)).await?;

    let token = create_token(&state.jwt_secret, &profile)?;
    info!("{} ({}) logged in", profile.username, profile.id);

    Ok(Json(LoginResponse {
        user_id: profile.id,
        username: profile.username,
        role: profile.role,
        token,
    }))
}

pub async fn logout(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<StatusCode, ApiError> {
    let user_id = claims.sub;
    match db_call(&state, move |db| db.remove_session(user_id)).await {
        Ok(()) => info!("{} ({}) logged out", claims.username, user_id),
        Err(ApiError::Mail(MailError::NotFound(_))) => {
            debug!("Logout for {} without an active session", user_id)
        }
        Err(e) => return Err(e),
    }
    Ok(StatusCode::NO_CONTENT)
}

/// POST /users/{id}/password: a user may reset their own password; admins
/// and managers may reset anyone's.
pub async fn reset_password(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(user_id): Path<Uuid>,
    Json(req): Json<ResetPasswordRequest>,
) -> Result<StatusCode, ApiError> {
    let actor = current_user(&state, &claims).await?;
    if actor.id != user_id && !can_manage_others(actor.role) {
        return Err(MailError::forbidden("only admins and managers may reset other passwords").into());
    }
    if req.new_password.len() < MIN_PASSWORD_LEN {
        return Err(MailError::validation("password must be at least 8 characters").into());
    }

    let password_hash = hash_password(&req.new_password)?;
    db_call(&state, move |db| db.update_password(user_id, &password_hash)).await?;

    info!("Password for {} reset by {}", user_id, actor.id);
    Ok(StatusCode::NO_CONTENT)
}

/// Fresh profile for the token's subject. Role changes take effect on the
/// next request rather than at token expiry.
pub(crate) async fn current_user(state: &AppState, claims: &Claims) -> Result<UserProfile, ApiError> {
    let user_id = claims.sub;
    db_call(state, move |db| db.resolve(user_id))
        .await?
        .ok_or(ApiError::Unauthorized)
}

pub fn create_token(secret: &str, profile: &UserProfile) -> Result<String, ApiError> {
    let claims = Claims {
        sub: profile.id,
        username: profile.username.clone(),
        role: profile.role,
        exp: (chrono::Utc::now() + chrono::Duration::days(TOKEN_LIFETIME_DAYS)).timestamp() as usize,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| {
        error!("Failed to sign token: {}", e);
        ApiError::Internal
    })
}

fn hash_password(password: &str) -> Result<String, ApiError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| {
            error!("Password hashing failed: {}", e);
            ApiError::Internal
        })
}
