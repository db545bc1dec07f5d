use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post, put},
};

use crate::auth::{self, AppState};
use crate::middleware::require_auth;
use crate::{attachments, mailbox, messages, overlays, users};

/// Every REST route, public and protected, with state applied. The binary
/// adds the gateway upgrade and the outer layers.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/health", get(health))
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login));

    let protected_routes = Router::new()
        .route("/auth/logout", post(auth::logout))
        .route("/users", get(users::list_users))
        .route("/users/{id}/password", post(auth::reset_password))
        .route("/users/{id}/role", put(users::update_role))
        .route("/users/{id}/attachments", put(users::set_attachments_override))
        .route("/sessions", get(users::list_sessions))
        .route("/presence", get(users::list_presence))
        .route("/messages", post(messages::send_message))
        .route(
            "/messages/{id}",
            get(messages::get_message).delete(overlays::purge_message),
        )
        .route(
            "/messages/{id}/trash",
            post(overlays::trash_message).delete(overlays::restore_message),
        )
        .route(
            "/messages/{id}/archive",
            post(overlays::archive_message).delete(overlays::unarchive_message),
        )
        .route(
            "/messages/{id}/read",
            post(messages::mark_read).delete(messages::mark_unread),
        )
        .route("/messages/{id}/receipts", get(messages::read_receipts))
        .route("/mailbox/inbox", get(mailbox::inbox))
        .route("/mailbox/sent", get(mailbox::sent))
        .route("/mailbox/archive", get(mailbox::archive))
        .route("/mailbox/trash", get(mailbox::trash))
        .route("/mailbox/counts", get(mailbox::counts))
        .route("/mailbox/archive/bulk", post(overlays::bulk_archive))
        .route(
            "/attachments",
            post(attachments::upload_attachment)
                .layer(DefaultBodyLimit::max(state.max_attachment_bytes)),
        )
        .route("/attachments/{stored_name}", get(attachments::download_attachment))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::{Body, to_bytes},
        http::{Method, Request, StatusCode, header},
    };
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use mailroom_db::Database;
    use mailroom_gateway::dispatcher::Dispatcher;
    use mailroom_gateway::notify::Notifier;

    use super::*;
    use crate::auth::AppStateInner;
    use crate::blobs::FsBlobStore;

    struct Harness {
        app: Router,
        _blobs: tempfile::TempDir,
    }

    async fn harness() -> Harness {
        let blobs_dir = tempfile::tempdir().unwrap();
        let dispatcher = Dispatcher::new();
        let state = Arc::new(AppStateInner {
            db: Arc::new(Database::open_in_memory().unwrap()),
            jwt_secret: "test-secret".into(),
            notifier: Notifier::new(Arc::new(dispatcher.clone())),
            dispatcher,
            blobs: Arc::new(FsBlobStore::new(blobs_dir.path().to_path_buf()).await.unwrap()),
            session_window: chrono::Duration::minutes(30),
            max_attachment_bytes: 1024,
        });
        Harness {
            app: router(state),
            _blobs: blobs_dir,
        }
    }

    impl Harness {
        async fn call(
            &self,
            method: Method,
            uri: &str,
            token: Option<&str>,
            body: Option<Value>,
        ) -> (StatusCode, Value) {
            let mut req = Request::builder().method(method).uri(uri);
            if let Some(token) = token {
                req = req.header(header::AUTHORIZATION, format!("Bearer {}", token));
            }
            let req = match body {
                Some(body) => req
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
                None => req.body(Body::empty()).unwrap(),
            };

            let res = self.app.clone().oneshot(req).await.unwrap();
            let status = res.status();
            let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
            let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
            (status, value)
        }

        /// Registers a user and returns (user_id, token).
        async fn register(&self, username: &str) -> (String, String) {
            let (status, body) = self
                .call(
                    Method::POST,
                    "/auth/register",
                    None,
                    Some(json!({
                        "username": username,
                        "email": format!("{}@mailroom.example", username),
                        "password": "correct horse",
                    })),
                )
                .await;
            assert_eq!(status, StatusCode::CREATED, "{}", body);
            (
                body["user_id"].as_str().unwrap().to_string(),
                body["token"].as_str().unwrap().to_string(),
            )
        }
    }

    fn len(v: &Value) -> usize {
        v.as_array().map(Vec::len).unwrap_or(0)
    }

    #[tokio::test]
    async fn first_user_is_admin_and_login_works() {
        let h = harness().await;
        h.register("root").await;
        h.register("agent1").await;

        let (status, body) = h
            .call(
                Method::POST,
                "/auth/login",
                None,
                Some(json!({ "username": "root", "password": "correct horse" })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["role"], "admin");

        let (_, body) = h
            .call(
                Method::POST,
                "/auth/login",
                None,
                Some(json!({ "username": "agent1", "password": "correct horse" })),
            )
            .await;
        assert_eq!(body["role"], "agent");

        let (status, _) = h
            .call(
                Method::POST,
                "/auth/login",
                None,
                Some(json!({ "username": "agent1", "password": "wrong password" })),
            )
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn protected_routes_require_a_token() {
        let h = harness().await;
        let (status, _) = h.call(Method::GET, "/mailbox/inbox", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (status, _) = h.call(Method::GET, "/mailbox/inbox", Some("nope"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (status, _) = h.call(Method::GET, "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn mailbox_flow_is_per_user() {
        let h = harness().await;
        let (_, alice) = h.register("alice").await;
        let (bob_id, bob) = h.register("bob").await;

        let (status, sent) = h
            .call(
                Method::POST,
                "/messages",
                Some(&alice),
                Some(json!({
                    "subject": "Rota",
                    "body": "Next week's rota is attached.",
                    "recipient_ids": [bob_id],
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        let mid = sent["id"].as_str().unwrap().to_string();

        let (_, inbox) = h.call(Method::GET, "/mailbox/inbox", Some(&bob), None).await;
        assert_eq!(len(&inbox), 1);

        let (status, _) = h
            .call(Method::POST, &format!("/messages/{}/archive", mid), Some(&bob), None)
            .await;
        assert_eq!(status, StatusCode::CREATED);
        let (status, _) = h
            .call(Method::POST, &format!("/messages/{}/archive", mid), Some(&bob), None)
            .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (_, inbox) = h.call(Method::GET, "/mailbox/inbox", Some(&bob), None).await;
        let (_, archive) = h.call(Method::GET, "/mailbox/archive", Some(&bob), None).await;
        assert_eq!((len(&inbox), len(&archive)), (0, 1));

        h.call(Method::POST, &format!("/messages/{}/trash", mid), Some(&bob), None)
            .await;
        let (_, archive) = h.call(Method::GET, "/mailbox/archive", Some(&bob), None).await;
        let (_, trash) = h.call(Method::GET, "/mailbox/trash", Some(&bob), None).await;
        assert_eq!((len(&archive), len(&trash)), (0, 1));
        assert!(trash[0]["deleted_at"].is_string());

        // Alice's copy is untouched by Bob's overlays
        let (_, sent_view) = h.call(Method::GET, "/mailbox/sent", Some(&alice), None).await;
        assert_eq!(len(&sent_view), 1);

        let (status, _) = h
            .call(Method::DELETE, &format!("/messages/{}", mid), Some(&bob), None)
            .await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = h
            .call(Method::DELETE, &format!("/messages/{}/trash", mid), Some(&bob), None)
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn outsiders_cannot_touch_a_message() {
        let h = harness().await;
        let (_, alice) = h.register("alice").await;
        let (bob_id, _) = h.register("bob").await;
        let (_, eve) = h.register("eve").await;

        let (_, sent) = h
            .call(
                Method::POST,
                "/messages",
                Some(&alice),
                Some(json!({ "subject": "Hi", "body": "Private", "recipient_ids": [bob_id] })),
            )
            .await;
        let mid = sent["id"].as_str().unwrap().to_string();

        for (method, uri) in [
            (Method::GET, format!("/messages/{}", mid)),
            (Method::POST, format!("/messages/{}/trash", mid)),
            (Method::POST, format!("/messages/{}/archive", mid)),
            (Method::GET, format!("/messages/{}/receipts", mid)),
        ] {
            let (status, _) = h.call(method, &uri, Some(&eve), None).await;
            assert_eq!(status, StatusCode::FORBIDDEN, "{}", uri);
        }
    }

    #[tokio::test]
    async fn bulk_archive_reports_per_id() {
        let h = harness().await;
        let (_, alice) = h.register("alice").await;
        let (bob_id, bob) = h.register("bob").await;

        let (_, sent) = h
            .call(
                Method::POST,
                "/messages",
                Some(&alice),
                Some(json!({ "subject": "One", "body": "1", "recipient_ids": [bob_id] })),
            )
            .await;
        let mid = sent["id"].as_str().unwrap().to_string();
        let missing = uuid::Uuid::new_v4().to_string();

        let (status, body) = h
            .call(
                Method::POST,
                "/mailbox/archive/bulk",
                Some(&bob),
                Some(json!({ "message_ids": [mid.clone(), missing] })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["archived"], json!([mid]));
        assert_eq!(body["failed"][0]["reason"], "not-found");
    }

    #[tokio::test]
    async fn role_gates() {
        let h = harness().await;
        let (_, admin) = h.register("admin").await;
        let (agent_id, agent) = h.register("agent").await;

        let (status, _) = h.call(Method::GET, "/sessions", Some(&agent), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, _) = h.call(Method::GET, "/sessions", Some(&admin), None).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = h
            .call(
                Method::PUT,
                &format!("/users/{}/role", agent_id),
                Some(&agent),
                Some(json!({ "role": "manager" })),
            )
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = h
            .call(
                Method::PUT,
                &format!("/users/{}/role", agent_id),
                Some(&admin),
                Some(json!({ "role": "team-leader" })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["role"], "team-leader");

        let (_, listed) = h.call(Method::GET, "/users?role=team-leader", Some(&admin), None).await;
        assert_eq!(len(&listed), 1);
    }

    #[tokio::test]
    async fn attachment_upload_is_role_gated() {
        let h = harness().await;
        let (_, admin) = h.register("admin").await;
        let (_, agent) = h.register("agent").await;

        let upload = |token: String, bytes: &'static [u8]| {
            Request::builder()
                .method(Method::POST)
                .uri("/attachments?name=notes.txt")
                .header(header::AUTHORIZATION, format!("Bearer {}", token))
                .body(Body::from(bytes))
                .unwrap()
        };

        let res = h.app.clone().oneshot(upload(agent, b"hello")).await.unwrap();
        assert_eq!(res.status(), StatusCode::FORBIDDEN);

        let res = h.app.clone().oneshot(upload(admin.clone(), b"hello")).await.unwrap();
        assert_eq!(res.status(), StatusCode::CREATED);
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let meta: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(meta["type"], "text/plain");

        let stored = meta["stored_name"].as_str().unwrap();
        let req = Request::builder()
            .uri(format!("/attachments/{}", stored))
            .header(header::AUTHORIZATION, format!("Bearer {}", admin))
            .body(Body::empty())
            .unwrap();
        let res = h.app.clone().oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"hello");
    }
    #[tokio::test]
    async fn attachments_are_checked_on_send_and_download() {
        let h = harness().await;
        let (_, admin) = h.register("admin").await;
        let (bob_id, bob) = h.register("bob").await;
        let (_, carol) = h.register("carol").await;

        let req = Request::builder()
            .method(Method::POST)
            .uri("/attachments?name=rota.txt")
            .header(header::AUTHORIZATION, format!("Bearer {}", admin))
            .body(Body::from(&b"mon: bob"[..]))
            .unwrap();
        let res = h.app.clone().oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::CREATED);
        let meta: Value =
            serde_json::from_slice(&to_bytes(res.into_body(), usize::MAX).await.unwrap()).unwrap();
        let stored = meta["stored_name"].as_str().unwrap().to_string();

        let download = |token: &str| {
            Request::builder()
                .uri(format!("/attachments/{}", stored))
                .header(header::AUTHORIZATION, format!("Bearer {}", token))
                .body(Body::empty())
                .unwrap()
        };
        let res = h.app.clone().oneshot(download(&bob)).await.unwrap();
        assert_eq!(res.status(), StatusCode::FORBIDDEN);

        let mut forged = meta.clone();
        forged["size"] = json!(1);
        let (status, _) = h
            .call(
                Method::POST,
                "/messages",
                Some(&admin),
                Some(json!({
                    "subject": "Rota",
                    "body": "Attached.",
                    "recipient_ids": [bob_id],
                    "attachments": [forged],
                })),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, sent) = h
            .call(
                Method::POST,
                "/messages",
                Some(&admin),
                Some(json!({
                    "subject": "Rota",
                    "body": "Attached.",
                    "recipient_ids": [bob_id],
                    "attachments": [meta],
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(sent["attachments"][0]["size"], 8);

        let res = h.app.clone().oneshot(download(&bob)).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.headers()[header::CONTENT_TYPE], "text/plain");
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"mon: bob");

        let res = h.app.clone().oneshot(download(&carol)).await.unwrap();
        assert_eq!(res.status(), StatusCode::FORBIDDEN);
    }
}
