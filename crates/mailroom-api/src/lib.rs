pub mod attachments;
pub mod auth;
pub mod blobs;
pub mod error;
pub mod mailbox;
pub mod messages;
pub mod middleware;
pub mod overlays;
pub mod routes;
pub mod users;

use mailroom_db::Database;
use tracing::error;

use crate::auth::AppState;
use crate::error::ApiError;

/// Run a blocking DB call off the async runtime.
pub(crate) async fn db_call<F, T>(state: &AppState, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&Database) -> mailroom_db::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let db = state.db.clone();
    tokio::task::spawn_blocking(move || f(&db))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::Internal
        })?
        .map_err(ApiError::from)
}
