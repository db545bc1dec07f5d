use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::{
    TypedHeader,
    headers::{Authorization, authorization::Bearer},
};
use jsonwebtoken::{DecodingKey, Validation, decode};

use mailroom_types::api::Claims;

use crate::auth::AppState;
use crate::error::ApiError;

/// Extract and validate the JWT from the Authorization header.
pub async fn require_auth(
    State(state): State<AppState>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let TypedHeader(Authorization(bearer)) = bearer.ok_or(ApiError::Unauthorized)?;
    let claims = decode_token(&state.jwt_secret, bearer.token())?;

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

/// Validate a token's signature and expiry. Shared with the gateway upgrade,
/// which receives the token as a query parameter.
pub fn decode_token(secret: &str, token: &str) -> Result<Claims, ApiError> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|_| ApiError::Unauthorized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use mailroom_types::models::UserProfile;
    use mailroom_types::roles::Role;
    use uuid::Uuid;

    use crate::auth::create_token;

    fn profile() -> UserProfile {
        UserProfile {
            id: Uuid::new_v4(),
            username: "hana".into(),
            email: "hana@mailroom.example".into(),
            display_name: "Hana".into(),
            role: Role::TeamLeader,
            department: None,
            attachments_override: false,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn token_round_trips_claims() {
        let p = profile();
        let token = create_token("secret-one", &p).unwrap();
        let claims = decode_token("secret-one", &token).unwrap();
        assert_eq!(claims.sub, p.id);
        assert_eq!(claims.role, Role::TeamLeader);
    }

    #[test]
    fn wrong_secret_is_unauthorized() {
        let token = create_token("secret-one", &profile()).unwrap();
        assert!(matches!(decode_token("secret-two", &token), Err(ApiError::Unauthorized)));
        assert!(matches!(decode_token("secret-one", "garbage"), Err(ApiError::Unauthorized)));
    }
}
