use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::{error, warn};

use mailroom_db::MailError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Mail(#[from] MailError),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Payload too large")]
    PayloadTooLarge,

    #[error("Internal server error")]
    Internal,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Mail(MailError::Validation(_)) => StatusCode::BAD_REQUEST,
            ApiError::Mail(MailError::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Mail(MailError::Conflict(_)) => StatusCode::CONFLICT,
            ApiError::Mail(MailError::Forbidden(_)) => StatusCode::FORBIDDEN,
            ApiError::Mail(MailError::StorageUnavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        match &self {
            // Storage details stay in the log, not in the response
            ApiError::Mail(MailError::StorageUnavailable(detail)) => {
                error!("Storage unavailable: {}", detail);
                return (status, Json(serde_json::json!({ "error": "storage unavailable" })))
                    .into_response();
            }
            ApiError::Internal => error!("Internal error surfaced to client"),
            ApiError::Mail(MailError::Forbidden(msg)) => warn!("Forbidden: {}", msg),
            _ => {}
        }
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}
