use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, HeaderMap},
    response::IntoResponse,
    Json,
};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use serde_json::Value;

use crate::errors::AppError;
use crate::metrics::encode_metrics;
use crate::models::documents::Fields;
use crate::triggers::callable::{self, TestNotificationRequest, TestNotificationResponse};
use crate::triggers::{broadcast, direct, location, relationship, TriggerOutcome};
use crate::AppState;

// ── Document bodies ──────────────────────────────────────────

/// Parse a trigger body. An empty body is an empty document; anything that
/// is not a JSON object ends the trigger as skipped.
fn document(body: &[u8]) -> Result<Fields, Json<TriggerOutcome>> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Fields::new());
    }
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(fields)) => Ok(fields),
        Ok(_) => Err(Json(TriggerOutcome::skipped("document is not a JSON object"))),
        Err(e) => {
            tracing::info!(error = %e, "unparsable trigger document");
            Err(Json(TriggerOutcome::skipped("unparsable document")))
        }
    }
}

// ── Trigger handlers ─────────────────────────────────────────

pub async fn broadcast_created(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Bytes,
) -> Json<TriggerOutcome> {
    match document(&body) {
        Ok(doc) => Json(broadcast::handle(&state.services, &id, doc).await),
        Err(skipped) => skipped,
    }
}

pub async fn connection_request(
    State(state): State<Arc<AppState>>,
    Path((user_id, requester_id)): Path<(String, String)>,
) -> Json<TriggerOutcome> {
    Json(relationship::connection_request(&state.services, &user_id, &requester_id).await)
}

pub async fn connection_established(
    State(state): State<Arc<AppState>>,
    Path((user_id, connection_id)): Path<(String, String)>,
    body: Bytes,
) -> Json<TriggerOutcome> {
    match document(&body) {
        Ok(doc) => Json(
            relationship::connection_established(&state.services, &user_id, &connection_id, doc)
                .await,
        ),
        Err(skipped) => skipped,
    }
}

pub async fn user_notification(
    State(state): State<Arc<AppState>>,
    Path((user_id, notification_id)): Path<(String, String)>,
    body: Bytes,
) -> Json<TriggerOutcome> {
    match document(&body) {
        Ok(doc) => Json(direct::handle(&state.services, &user_id, &notification_id, doc).await),
        Err(skipped) => skipped,
    }
}

pub async fn tip(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Bytes,
) -> Json<TriggerOutcome> {
    match document(&body) {
        Ok(doc) => Json(location::handle_tip(&state.services, &id, doc).await),
        Err(skipped) => skipped,
    }
}

pub async fn event(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Bytes,
) -> Json<TriggerOutcome> {
    match document(&body) {
        Ok(doc) => Json(location::handle_event(&state.services, &id, doc).await),
        Err(skipped) => skipped,
    }
}

// ── Callable ─────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct CallerClaims {
    sub: String,
}

/// Verify the HS256 bearer token and return the caller uid.
fn authenticate(headers: &HeaderMap, secret: &str) -> Result<String, AppError> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .ok_or(AppError::Unauthenticated)?;

    let data = jsonwebtoken::decode::<CallerClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::new(Algorithm::HS256),
    )
    .map_err(|e| {
        tracing::warn!(error = %e, "callable: rejected bearer token");
        AppError::Unauthenticated
    })?;

    let uid = data.claims.sub.trim().to_string();
    if uid.is_empty() {
        return Err(AppError::Unauthenticated);
    }
    Ok(uid)
}

/// Accepts the request fields directly or wrapped as `{"data": {...}}`.
fn callable_request(body: &[u8]) -> Result<TestNotificationRequest, AppError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(TestNotificationRequest::default());
    }
    let value: Value =
        serde_json::from_slice(body).map_err(|e| AppError::BadRequest(e.to_string()))?;
    let inner = match value {
        Value::Object(mut map) if map.get("data").map_or(false, Value::is_object) => {
            map.remove("data").unwrap_or_default()
        }
        other => other,
    };
    serde_json::from_value(inner).map_err(|e| AppError::BadRequest(e.to_string()))
}

pub async fn test_notification(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<TestNotificationResponse>, AppError> {
    let uid = authenticate(&headers, &state.callable_secret)?;
    let req = callable_request(&body)?;

    let resp = callable::create_test_notification(state.services.clone(), &uid, &req).await?;
    tracing::info!(uid = %uid, notification_id = %resp.notification_id, "test notification created");
    Ok(Json(resp))
}

// ── Operational ──────────────────────────────────────────────

pub async fn readiness_check(State(state): State<Arc<AppState>>) -> Result<&'static str, AppError> {
    state.services.store.ping().await.map_err(|e| {
        tracing::warn!(error = %e, "readiness: store ping failed");
        AppError::Unavailable
    })?;
    Ok("ok")
}

pub async fn metrics() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        encode_metrics(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;

    fn bearer(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", token)).unwrap(),
        );
        headers
    }

    fn jwt(sub: &str, secret: &str) -> String {
        let claims = json!({ "sub": sub, "exp": chrono::Utc::now().timestamp() + 3600 });
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn test_authenticate_accepts_valid_token() {
        let headers = bearer(&jwt("admin-1", "s3cret"));
        assert_eq!(authenticate(&headers, "s3cret").unwrap(), "admin-1");
    }

    #[test]
    fn test_authenticate_rejects_wrong_secret_and_missing_header() {
        let headers = bearer(&jwt("admin-1", "other"));
        assert!(matches!(
            authenticate(&headers, "s3cret"),
            Err(AppError::Unauthenticated)
        ));
        assert!(matches!(
            authenticate(&HeaderMap::new(), "s3cret"),
            Err(AppError::Unauthenticated)
        ));
    }

    #[test]
    fn test_callable_request_unwraps_data() {
        let req = callable_request(br#"{"data": {"title": "Hi"}}"#).unwrap();
        assert_eq!(req.title.as_deref(), Some("Hi"));

        let req = callable_request(br#"{"message": "Yo"}"#).unwrap();
        assert_eq!(req.message.as_deref(), Some("Yo"));

        let req = callable_request(b"").unwrap();
        assert!(req.title.is_none());
    }

    #[test]
    fn test_document_parsing() {
        assert!(document(b"").unwrap().is_empty());
        assert_eq!(document(br#"{"city": "Lisbon"}"#).unwrap()["city"], "Lisbon");
        assert!(document(b"[1, 2]").is_err());
        assert!(document(b"{not json").is_err());
    }
}
