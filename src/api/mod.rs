use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::errors::AppError;
use crate::AppState;

pub mod handlers;

/// Build the service router: trigger routes under `/triggers`, the callable
/// under `/api/v1`, plus health and metrics.
pub fn router(state: Arc<AppState>) -> Router {
    let triggers = Router::new()
        .route("/notifications/:id", post(handlers::broadcast_created))
        .route(
            "/users/:user_id/received-connection-requests/:requester_id",
            post(handlers::connection_request),
        )
        .route(
            "/users/:user_id/connections/:connection_id",
            post(handlers::connection_established),
        )
        .route(
            "/users/:user_id/notifications/:notification_id",
            post(handlers::user_notification),
        )
        .route("/tips/:id", post(handlers::tip))
        .route("/events/:id", post(handlers::event))
        .layer(middleware::from_fn_with_state(state.clone(), trigger_auth));

    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/readyz", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics))
        .route("/api/v1/test-notification", post(handlers::test_notification))
        .nest("/triggers", triggers)
        .fallback(fallback_404)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn fallback_404() -> StatusCode {
    StatusCode::NOT_FOUND
}

/// Middleware: validates `X-Trigger-Key` (or `Authorization: Bearer`)
/// against the configured trigger key.
async fn trigger_auth(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let provided_key = req
        .headers()
        .get("x-trigger-key")
        .and_then(|v| v.to_str().ok())
        .or_else(|| {
            req.headers()
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
                .map(|t| t.trim())
        });

    match provided_key {
        Some(k) if k == state.trigger_key => Ok(next.run(req).await),
        Some(k) => {
            // never log the full key
            let masked = if k.len() > 8 {
                format!("{}…{}", &k[..4], &k[k.len() - 4..])
            } else {
                "****".to_string()
            };
            tracing::warn!("trigger API: invalid key (provided: '{}')", masked);
            Err(AppError::InvalidTriggerKey)
        }
        None => {
            tracing::warn!("trigger API: missing X-Trigger-Key header");
            Err(AppError::InvalidTriggerKey)
        }
    }
}
