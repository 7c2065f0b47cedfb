use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode, header},
};
use chrono::{Duration, Utc};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

use mabu_api::conversations::ConversationStore;
use mabu_api::mailer::Mailer;
use mabu_api::session::{SessionConfig, SessionManager};
use mabu_api::uploads::ImageStore;
use mabu_api::{AppState, AppStateInner};
use mabu_auth::AccessTokens;
use mabu_auth::password::hash_password;
use mabu_db::Database;
use mabu_db::models::NewUser;
use mabu_gateway::Dispatcher;
use mabu_types::api::AuthUser;
use mabu_types::events::GatewayEvent;
use mabu_types::models::Role;

const SECRET: &str = "integration-secret-please-ignore";
const PASSWORD: &str = "s3cret-pass";

struct TestApp {
    router: Router,
    state: AppState,
}

impl TestApp {
    async fn new() -> Self {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let upload_dir = std::env::temp_dir().join(format!("mabu-http-{}", uuid::Uuid::new_v4()));

        let state: AppState = Arc::new(AppStateInner {
            db: db.clone(),
            sessions: SessionManager::new(
                db.clone(),
                SessionConfig {
                    access_tokens: AccessTokens::new(SECRET, Duration::hours(1)),
                    refresh_ttl: Duration::days(30),
                    require_email_verification: true,
                },
            ),
            conversations: ConversationStore::new(db),
            dispatcher: Dispatcher::new(),
            images: ImageStore::new(upload_dir).await.unwrap(),
            mailer: Mailer::disabled(),
        });

        Self {
            router: mabu_api::router(state.clone()),
            state,
        }
    }

    /// Verified account, optionally promoted to admin.
    fn seed_user(&self, name: &str, role: Role) -> i64 {
        let hash = hash_password(PASSWORD).unwrap();
        let id = self
            .state
            .db
            .create_user(
                &NewUser {
                    username: name,
                    email: &format!("{name}@campus.edu"),
                    password_hash: &hash,
                    verification_code: None,
                    verification_expires_at: None,
                },
                Utc::now(),
            )
            .unwrap();
        self.state.db.mark_email_verified(id).unwrap();
        if role == Role::Admin {
            self.state
                .db
                .with_conn_mut(|conn| {
                    conn.execute("UPDATE users SET role = 'admin' WHERE id = ?1", [id])?;
                    Ok(())
                })
                .unwrap();
        }
        id
    }

    fn token_for(&self, id: i64, name: &str, role: Role) -> String {
        self.state
            .sessions
            .access_tokens()
            .issue(&AuthUser {
                id,
                role,
                name: name.into(),
            })
            .unwrap()
    }

    async fn call(&self, req: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into()))
        };
        (status, json)
    }

    async fn json(&self, method: Method, uri: &str, token: Option<&str>, body: Value) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        self.call(builder.body(Body::from(body.to_string())).unwrap()).await
    }

    async fn get(&self, uri: &str, token: Option<&str>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(Method::GET).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        self.call(builder.body(Body::empty()).unwrap()).await
    }

    async fn login(&self, identifier: &str) -> Value {
        let (status, body) = self
            .json(
                Method::POST,
                "/sessions",
                None,
                json!({ "identifier": identifier, "password": PASSWORD }),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        body
    }
}

#[tokio::test]
async fn register_verify_then_login() {
    let app = TestApp::new().await;

    let (status, profile) = app
        .json(
            Method::POST,
            "/auth/register",
            None,
            json!({ "username": "  ngoc  ", "email": "ngoc@campus.edu", "password": PASSWORD }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(profile["username"], "ngoc");
    assert_eq!(profile["role"], "user");
    assert_eq!(profile["email_verified"], false);
    assert!(profile.get("password_hash").is_none());

    // Same email again
    let (status, _) = app
        .json(
            Method::POST,
            "/auth/register",
            None,
            json!({ "username": "ngoc2", "email": "NGOC@campus.edu", "password": PASSWORD }),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = app
        .json(Method::POST, "/sessions", None, json!({ "identifier": "ngoc", "password": PASSWORD }))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(body["error"].as_str().unwrap().contains("verify your email"));

    let (status, _) = app
        .json(
            Method::POST,
            "/auth/verify-email",
            None,
            json!({ "email": "ngoc@campus.edu", "code": "not-it" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let code = app
        .state
        .db
        .get_user_by_email("ngoc@campus.edu")
        .unwrap()
        .unwrap()
        .verification_code
        .unwrap();
    let (status, _) = app
        .json(
            Method::POST,
            "/auth/verify-email",
            None,
            json!({ "email": "ngoc@campus.edu", "code": code }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let login = app.login("ngoc@campus.edu").await;
    let token = login["access_token"].as_str().unwrap();
    let (status, me) = app.get("/auth/me", Some(token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["username"], "ngoc");
    assert_eq!(me["email_verified"], true);
}

#[tokio::test]
async fn register_validates_input() {
    let app = TestApp::new().await;

    for body in [
        json!({ "username": "abc", "email": "a@b.co", "password": PASSWORD }),
        json!({ "username": "abcd", "email": "a@b.co", "password": "12345" }),
        json!({ "username": "abcd", "email": "not-an-email", "password": PASSWORD }),
    ] {
        let (status, json) = app.json(Method::POST, "/auth/register", None, body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["error"].is_string());
    }

    // Unknown fields are refused with the usual error shape
    let (status, json) = app
        .json(
            Method::POST,
            "/auth/register",
            None,
            json!({ "username": "abcd", "email": "a@b.co", "password": PASSWORD, "role": "admin" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].is_string());
}

#[tokio::test]
async fn resend_code_never_reveals_accounts() {
    let app = TestApp::new().await;
    let (status, body) = app
        .json(Method::POST, "/auth/resend-verify-code", None, json!({ "email": "ghost@campus.edu" }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);
}

#[tokio::test]
async fn hello_reaches_both_participants() {
    let app = TestApp::new().await;
    let a = app.seed_user("alpha", Role::User);
    let b = app.seed_user("bravo", Role::User);
    let token_a = app.login("alpha").await["access_token"].as_str().unwrap().to_string();
    let token_b = app.token_for(b, "bravo", Role::User);

    let (_, mut rx_b) = app.state.dispatcher.join(b).await;
    let (_, mut rx_a) = app.state.dispatcher.join(a).await;
    let before = Utc::now() - Duration::milliseconds(1);

    let (status, msg) = app
        .json(
            Method::POST,
            &format!("/conversations/{b}/messages"),
            Some(&token_a),
            json!({ "text": "Hello" }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(msg["from_user_id"], a);
    assert_eq!(msg["to_user_id"], b);
    assert_eq!(msg["text"], "Hello");
    let sent_at: chrono::DateTime<Utc> = serde_json::from_value(msg["created_at"].clone()).unwrap();
    assert!(sent_at >= before);

    for rx in [&mut rx_b, &mut rx_a] {
        match rx.recv().await {
            Some(GatewayEvent::MessageNew(pushed)) => {
                assert_eq!(pushed.id, msg["id"].as_i64().unwrap());
                assert_eq!(pushed.text, "Hello");
            }
            other => panic!("expected message:new, got {other:?}"),
        }
    }

    let (status, list) = app.get("/conversations", Some(&token_a)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list[0]["partner"]["id"], b);
    assert_eq!(list[0]["last_message"], "Hello");

    let (status, thread) = app.get(&format!("/conversations/{a}"), Some(&token_b)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(thread["partner"]["name"], "alpha");
    assert_eq!(thread["messages"].as_array().unwrap().len(), 1);

    let (status, read) = app
        .json(Method::POST, &format!("/conversations/{a}/read"), Some(&token_b), json!({}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(read["affected"], 1);
    let (_, read) = app
        .json(Method::POST, &format!("/conversations/{a}/read"), Some(&token_b), json!({}))
        .await;
    assert_eq!(read["affected"], 0);
}

#[tokio::test]
async fn empty_message_writes_and_pushes_nothing() {
    let app = TestApp::new().await;
    let a = app.seed_user("alpha", Role::User);
    let b = app.seed_user("bravo", Role::User);
    let token_a = app.token_for(a, "alpha", Role::User);
    let (_, mut rx_b) = app.state.dispatcher.join(b).await;

    let (status, body) = app
        .json(
            Method::POST,
            &format!("/conversations/{b}/messages"),
            Some(&token_a),
            json!({ "text": "   " }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.get("code").is_none());

    assert!(app.state.db.get_thread(a, b).unwrap().is_empty());
    assert!(rx_b.try_recv().is_err());
}

#[tokio::test]
async fn recipient_must_be_someone_else() {
    let app = TestApp::new().await;
    let a = app.seed_user("alpha", Role::User);
    let token = app.token_for(a, "alpha", Role::User);

    let (status, _) = app
        .json(Method::POST, &format!("/conversations/{a}/messages"), Some(&token), json!({ "text": "hi" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .json(Method::POST, "/conversations/9999/messages", Some(&token), json!({ "text": "hi" }))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = app
        .json(Method::POST, "/conversations/abc/messages", Some(&token), json!({ "text": "hi" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string(), "{body}");

    // Own id is not a conversation partner
    let (status, body) = app.get(&format!("/conversations/{a}"), Some(&token)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn malformed_path_ids_answer_with_error_body() {
    let app = TestApp::new().await;
    let admin = app.seed_user("warden", Role::Admin);
    let token = app.token_for(admin, "warden", Role::Admin);

    let cases = [
        (Method::GET, "/conversations/abc"),
        (Method::POST, "/conversations/abc/read"),
        (Method::POST, "/conversations/1.5/messages"),
        (Method::POST, "/notifications/xyz/read"),
        (Method::POST, "/admin/users/me/status"),
    ];
    for (method, uri) in cases {
        let (status, body) = app.json(method, uri, Some(&token), json!({ "active": true, "text": "hi" })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
        assert!(body["error"].is_string(), "{uri}: {body}");
    }
}

#[tokio::test]
async fn racing_registrations_yield_one_account() {
    let app = TestApp::new().await;
    let body = |email: &str| json!({ "username": "twins", "email": email, "password": PASSWORD });

    let ((first, _), (second, _)) = tokio::join!(
        app.json(Method::POST, "/auth/register", None, body("one@campus.edu")),
        app.json(Method::POST, "/auth/register", None, body("two@campus.edu")),
    );
    let mut statuses = [first, second];
    statuses.sort();
    assert_eq!(statuses, [StatusCode::CREATED, StatusCode::CONFLICT]);
}

#[tokio::test]
async fn auth_failures_are_distinguished() {
    let app = TestApp::new().await;
    let a = app.seed_user("alpha", Role::User);

    let (status, body) = app.get("/conversations", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body.get("code").is_none());

    let (status, body) = app.get("/conversations", Some("not.a.jwt")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body.get("code").is_none());

    let expired = app
        .state
        .sessions
        .access_tokens()
        .issue_at(
            &AuthUser {
                id: a,
                role: Role::User,
                name: "alpha".into(),
            },
            Utc::now() - Duration::hours(2),
        )
        .unwrap();
    let (status, body) = app.get("/conversations", Some(&expired)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "TOKEN_EXPIRED");
}

#[tokio::test]
async fn unknown_user_and_wrong_password_answer_alike() {
    let app = TestApp::new().await;
    app.seed_user("alpha", Role::User);

    let wrong = app
        .json(Method::POST, "/sessions", None, json!({ "username": "alpha", "password": "nope-nope" }))
        .await;
    let unknown = app
        .json(Method::POST, "/sessions", None, json!({ "username": "zulu", "password": "nope-nope" }))
        .await;
    assert_eq!(wrong.0, StatusCode::UNAUTHORIZED);
    assert_eq!(wrong, unknown);
}

#[tokio::test]
async fn deactivated_account_loses_its_session() {
    let app = TestApp::new().await;
    let admin = app.seed_user("admin", Role::Admin);
    let user = app.seed_user("charlie", Role::User);
    let admin_token = app.token_for(admin, "admin", Role::Admin);

    let login = app.login("charlie").await;
    let refresh_token = login["refresh_token"].as_str().unwrap();

    let (status, _) = app
        .json(Method::POST, "/sessions/refresh", None, json!({ "refresh_token": refresh_token }))
        .await;
    assert_eq!(status, StatusCode::OK);

    // Regular users cannot moderate
    let user_token = login["access_token"].as_str().unwrap();
    let (status, _) = app
        .json(
            Method::POST,
            &format!("/admin/users/{admin}/status"),
            Some(user_token),
            json!({ "active": false }),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .json(
            Method::POST,
            &format!("/admin/users/{user}/status"),
            Some(&admin_token),
            json!({ "active": false }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app
        .json(Method::POST, "/sessions/refresh", None, json!({ "refresh_token": refresh_token }))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(body["error"].as_str().unwrap().contains("blocked"));

    let (status, _) = app
        .json(Method::POST, "/sessions/refresh", None, json!({ "refresh_token": refresh_token }))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn logout_is_idempotent_over_http() {
    let app = TestApp::new().await;
    app.seed_user("delta", Role::User);
    let login = app.login("delta").await;
    let refresh_token = login["refresh_token"].as_str().unwrap();

    for _ in 0..2 {
        let (status, _) = app
            .json(Method::DELETE, "/sessions", None, json!({ "refresh_token": refresh_token }))
            .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, _) = app
        .json(Method::POST, "/sessions/refresh", None, json!({ "refresh_token": refresh_token }))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn notifications_are_pushed_and_scoped() {
    let app = TestApp::new().await;
    let admin = app.seed_user("admin", Role::Admin);
    let a = app.seed_user("alpha", Role::User);
    let b = app.seed_user("bravo", Role::User);
    let admin_token = app.token_for(admin, "admin", Role::Admin);
    let token_a = app.token_for(a, "alpha", Role::User);
    let token_b = app.token_for(b, "bravo", Role::User);
    let (_, mut rx_a) = app.state.dispatcher.join(a).await;

    let payload = json!({ "to_user_id": a, "category": "listing", "body": "Your desk lamp was claimed" });

    let (status, _) = app
        .json(Method::POST, "/notifications", Some(&token_b), payload.clone())
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, created) = app
        .json(Method::POST, "/notifications", Some(&admin_token), payload)
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let id = created["id"].as_i64().unwrap();

    match rx_a.recv().await {
        Some(GatewayEvent::NotifyNew(n)) => assert_eq!(n.id, id),
        other => panic!("expected notify:new, got {other:?}"),
    }

    let (_, list) = app.get("/notifications", Some(&token_a)).await;
    assert_eq!(list.as_array().unwrap().len(), 1);
    let (_, list) = app.get("/notifications", Some(&token_b)).await;
    assert!(list.as_array().unwrap().is_empty());

    let (status, _) = app
        .json(Method::POST, &format!("/notifications/{id}/read"), Some(&token_b), json!({}))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = app
        .json(Method::POST, &format!("/notifications/{id}/read"), Some(&token_a), json!({}))
        .await;
    assert_eq!(status, StatusCode::OK);
}

const PNG: &[u8] = b"\x89PNG\r\n\x1a\nfakepixels";

/// Multipart image message: text, listing 12 and a small png.
fn image_request(partner: i64, token: &str) -> Request<Body> {
    let boundary = "mabu-test-boundary";
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"text\"\r\n\r\nstill available?\r\n\
             --{boundary}\r\nContent-Disposition: form-data; name=\"listing_id\"\r\n\r\n12\r\n\
             --{boundary}\r\nContent-Disposition: form-data; name=\"image\"; filename=\"lamp.png\"\r\n\
             Content-Type: image/png\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(PNG);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

    Request::builder()
        .method(Method::POST)
        .uri(format!("/conversations/{partner}/messages/image"))
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={boundary}"))
        .body(Body::from(body))
        .unwrap()
}

fn stored_images(app: &TestApp) -> usize {
    std::fs::read_dir(app.state.images.root().join("chat")).unwrap().count()
}

#[tokio::test]
async fn image_message_is_stored_and_served() {
    let app = TestApp::new().await;
    let a = app.seed_user("alpha", Role::User);
    let b = app.seed_user("bravo", Role::User);
    let token_a = app.token_for(a, "alpha", Role::User);

    let req = image_request(b, &token_a);
    let (status, msg) = app.call(req).await;
    assert_eq!(status, StatusCode::CREATED, "{msg}");
    assert_eq!(msg["text"], "still available?");
    assert_eq!(msg["listing"]["id"], 12);
    assert_eq!(msg["listing"]["available"], false);

    let image_url = msg["image_url"].as_str().unwrap();
    assert!(image_url.starts_with("/uploads/chat/"));

    let response = app
        .router
        .clone()
        .oneshot(Request::builder().uri(image_url).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let served = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&served[..], PNG);
}

#[tokio::test]
async fn image_for_unknown_recipient_leaves_no_file() {
    let app = TestApp::new().await;
    let a = app.seed_user("alpha", Role::User);
    let token_a = app.token_for(a, "alpha", Role::User);

    let (status, body) = app.call(image_request(9999, &token_a)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].is_string());
    assert_eq!(stored_images(&app), 0);

    let (status, _) = app.call(image_request(a, &token_a)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(stored_images(&app), 0);
}

#[tokio::test]
async fn gateway_rejects_bad_token_before_upgrade() {
    let app = TestApp::new().await;

    let (status, body) = app.get("/gateway?token=forged", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["error"].is_string());

    let (status, _) = app.get("/gateway", Some("forged")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn health_is_public() {
    let app = TestApp::new().await;
    let (status, body) = app.get("/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}
