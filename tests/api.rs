//! Router-level tests driven through `tower::ServiceExt::oneshot`.

mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde_json::{json, Value};
use tower::ServiceExt;

use common::{app_state, resident, services, RecordingPush, CALLABLE_SECRET, TRIGGER_KEY};
use notifyd::api;
use notifyd::store::memory::MemoryStore;
use notifyd::store::DocumentStore;

fn app(store: Arc<MemoryStore>, push: Arc<RecordingPush>) -> Router {
    api::router(app_state(services(store, push)))
}

fn trigger(uri: &str, key: Option<&str>, body: &str) -> Request<Body> {
    let mut req = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(k) = key {
        req = req.header("x-trigger-key", k);
    }
    req.body(Body::from(body.to_string())).unwrap()
}

fn caller_token(sub: &str, secret: &str) -> String {
    let claims = json!({ "sub": sub, "exp": chrono::Utc::now().timestamp() + 600 });
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .unwrap()
}

async fn json_body(resp: axum::response::Response) -> Value {
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_healthz() {
    let resp = app(Arc::new(MemoryStore::new()), RecordingPush::new())
        .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_readyz_pings_store() {
    let resp = app(Arc::new(MemoryStore::new()), RecordingPush::new())
        .oneshot(Request::get("/readyz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_unknown_route_is_404() {
    let resp = app(Arc::new(MemoryStore::new()), RecordingPush::new())
        .oneshot(Request::get("/nope").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_trigger_requires_key() {
    let app = app(Arc::new(MemoryStore::new()), RecordingPush::new());

    let missing = app
        .clone()
        .oneshot(trigger("/triggers/events/e1", None, "{}"))
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);
    let body = json_body(missing).await;
    assert_eq!(body["error"]["code"], "invalid_trigger_key");

    let wrong = app
        .oneshot(trigger("/triggers/events/e1", Some("not-the-key"), "{}"))
        .await
        .unwrap();
    assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_trigger_accepts_bearer_key() {
    let req = Request::builder()
        .method("POST")
        .uri("/triggers/events/e1")
        .header(header::AUTHORIZATION, format!("Bearer {}", TRIGGER_KEY))
        .body(Body::from("{}"))
        .unwrap();
    let resp = app(Arc::new(MemoryStore::new()), RecordingPush::new())
        .oneshot(req)
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let body = json_body(resp).await;
    assert_eq!(body["status"], "skipped");
    assert_eq!(body["reason"], "event has no city");
}

#[tokio::test]
async fn test_event_trigger_reports_counts() {
    let store = Arc::new(MemoryStore::new());
    store.insert_user(resident("r1", "Lisbon", "t1", true));
    let push = RecordingPush::new();

    let resp = app(store.clone(), push.clone())
        .oneshot(trigger(
            "/triggers/events/e2",
            Some(TRIGGER_KEY),
            r#"{"city": "Lisbon", "eventName": "Fado"}"#,
        ))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let body = json_body(resp).await;
    assert_eq!(body["status"], "completed");
    assert_eq!(body["city"], "Lisbon");
    assert_eq!(body["records"], 1);
    assert_eq!(body["successful"], 1);
    assert_eq!(push.multicast_tokens(), vec!["t1".to_string()]);
}

#[tokio::test]
async fn test_unparsable_document_is_skipped() {
    let resp = app(Arc::new(MemoryStore::new()), RecordingPush::new())
        .oneshot(trigger("/triggers/tips/t1", Some(TRIGGER_KEY), "{oops"))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let body = json_body(resp).await;
    assert_eq!(body["status"], "skipped");
    assert_eq!(body["reason"], "unparsable document");
}

#[tokio::test]
async fn test_connection_request_route() {
    let store = Arc::new(MemoryStore::new());
    let resp = app(store.clone(), RecordingPush::new())
        .oneshot(trigger(
            "/triggers/users/alice/received-connection-requests/bob",
            Some(TRIGGER_KEY),
            "",
        ))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let records = store.list_user_notifications("alice").await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].from_user_id.as_deref(), Some("bob"));
}

#[tokio::test]
async fn test_callable_rejects_unauthenticated_caller() {
    let app = app(Arc::new(MemoryStore::new()), RecordingPush::new());

    let anonymous = app
        .clone()
        .oneshot(
            Request::post("/api/v1/test-notification")
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        anonymous.headers().get("www-authenticate").unwrap(),
        "Bearer"
    );

    let forged = app
        .oneshot(
            Request::post("/api/v1/test-notification")
                .header(
                    header::AUTHORIZATION,
                    format!("Bearer {}", caller_token("admin", "wrong-secret")),
                )
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(forged.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_callable_creates_and_sends_test_broadcast() {
    let store = Arc::new(MemoryStore::new());
    store.insert_user(common::user("u1", Some("t1")));
    let push = RecordingPush::new();

    let resp = app(store.clone(), push.clone())
        .oneshot(
            Request::post("/api/v1/test-notification")
                .header(
                    header::AUTHORIZATION,
                    format!("Bearer {}", caller_token("admin-7", CALLABLE_SECRET)),
                )
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"data": {"title": "Ping"}}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let body = json_body(resp).await;
    assert_eq!(body["success"], true);
    assert_eq!(
        body["message"],
        "Test notification created and will be sent to all users"
    );
    let id = body["notificationId"].as_str().unwrap().to_string();

    // delivery runs in a spawned task
    let mut record = None;
    for _ in 0..100 {
        record = store.get_broadcast(&id).await.unwrap();
        if record.as_ref().and_then(|r| r.processed_at).is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let record = record.expect("broadcast stored");
    assert_eq!(record.notification_sent, Some(true));
    assert_eq!(record.document["createdBy"], "admin-7");
    assert_eq!(record.document["title"], "Ping");
    assert_eq!(push.multicast_payloads()[0].title, "Ping");
}

#[tokio::test]
async fn test_metrics_endpoint() {
    notifyd::metrics::init();
    let resp = app(Arc::new(MemoryStore::new()), RecordingPush::new())
        .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp.headers()[header::CONTENT_TYPE]
        .to_str()
        .unwrap()
        .starts_with("text/plain"));
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("notifyd_tokens_retired_total"));
}
