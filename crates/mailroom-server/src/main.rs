mod cleanup;
mod config;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    extract::{Query, State, WebSocketUpgrade},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use mailroom_api::auth::{AppState, AppStateInner};
use mailroom_api::blobs::FsBlobStore;
use mailroom_api::middleware::decode_token;
use mailroom_api::routes;
use mailroom_db::Database;
use mailroom_gateway::connection;
use mailroom_gateway::dispatcher::Dispatcher;
use mailroom_gateway::notify::Notifier;

use crate::config::Config;

#[derive(Debug, Deserialize)]
struct GatewayQuery {
    token: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mailroom=debug,mailroom_api=debug,mailroom_db=debug,mailroom_gateway=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    // Init database and attachment storage
    let db = Arc::new(Database::open(&config.db_path)?);
    let blobs = Arc::new(FsBlobStore::new(config.attachment_dir.clone()).await?);

    // Background session sweep (runs at startup, then on the interval)
    tokio::spawn(cleanup::run_session_sweep(
        db.clone(),
        config.session_window,
        config.sweep_interval,
    ));

    // Shared state
    let dispatcher = Dispatcher::new();
    let state: AppState = Arc::new(AppStateInner {
        db,
        jwt_secret: config.jwt_secret.clone(),
        notifier: Notifier::new(Arc::new(dispatcher.clone())),
        dispatcher,
        blobs,
        session_window: config.session_window,
        max_attachment_bytes: config.max_attachment_bytes,
    });

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(state.clone());

    let app = Router::new()
        .merge(routes::router(state))
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Mailroom server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// GET /gateway?token=..: browsers cannot set headers on a WebSocket
/// handshake, so the JWT arrives as a query parameter.
async fn ws_upgrade(
    State(state): State<AppState>,
    Query(query): Query<GatewayQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let claims = match decode_token(&state.jwt_secret, &query.token) {
        Ok(claims) => claims,
        Err(_) => {
            warn!("Rejected gateway upgrade with an invalid token");
            return StatusCode::UNAUTHORIZED.into_response();
        }
    };

    let dispatcher = state.dispatcher.clone();
    let db = state.db.clone();
    ws.on_upgrade(move |socket| {
        connection::handle_connection(socket, dispatcher, db, claims.sub, claims.username)
    })
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
