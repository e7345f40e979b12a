//! Firebase Cloud Messaging HTTP v1 backend.
//!
//! v1 has no multicast endpoint, so a multicast call is one
//! `messages:send` request per token, run with bounded concurrency and
//! reported back in token order. The bearer token is fetched once per call;
//! failing to get one fails the whole call.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::payload::PushPayload;
use super::{
    token_suffix, BatchResponse, PushError, PushProvider, SendOutcome, CODE_INTERNAL,
    CODE_INVALID_ARGUMENT, CODE_MISMATCHED_CREDENTIAL, CODE_RATE_EXCEEDED,
    CODE_SERVER_UNAVAILABLE, CODE_THIRD_PARTY_AUTH, CODE_TOKEN_NOT_REGISTERED, CODE_UNKNOWN,
    MAX_MULTICAST_TOKENS,
};

pub const MESSAGING_SCOPE: &str = "https://www.googleapis.com/auth/firebase.messaging";

/// In-flight sends per multicast call.
const SEND_CONCURRENCY: usize = 16;

// ── Credentials ──────────────────────────────────────────────

/// Supplies OAuth2 bearer tokens for the FCM API.
#[async_trait]
pub trait AccessTokenSource: Send + Sync {
    async fn bearer(&self) -> Result<String, PushError>;
}

/// A fixed bearer token, e.g. from `FCM_ACCESS_TOKEN`.
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

#[async_trait]
impl AccessTokenSource for StaticToken {
    async fn bearer(&self) -> Result<String, PushError> {
        Ok(self.0.clone())
    }
}

/// Application Default Credentials via `gcp_auth`.
pub struct GcpTokenSource {
    provider: Arc<dyn gcp_auth::TokenProvider>,
}

impl GcpTokenSource {
    pub async fn discover() -> Result<Self, PushError> {
        let provider = gcp_auth::provider()
            .await
            .map_err(|e| PushError::Auth(e.to_string()))?;
        Ok(Self { provider })
    }
}

#[async_trait]
impl AccessTokenSource for GcpTokenSource {
    async fn bearer(&self) -> Result<String, PushError> {
        let token = self
            .provider
            .token(&[MESSAGING_SCOPE])
            .await
            .map_err(|e| PushError::Auth(e.to_string()))?;
        Ok(token.as_str().to_string())
    }
}

// ── Client ───────────────────────────────────────────────────

#[derive(Clone)]
pub struct FcmClient {
    http: reqwest::Client,
    send_url: String,
    auth: Arc<dyn AccessTokenSource>,
}

impl FcmClient {
    pub fn new(
        endpoint: &str,
        project_id: &str,
        auth: Arc<dyn AccessTokenSource>,
    ) -> Result<Self, PushError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent("notifyd/0.1")
            .build()
            .map_err(|e| PushError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            send_url: format!(
                "{}/v1/projects/{}/messages:send",
                endpoint.trim_end_matches('/'),
                project_id
            ),
            auth,
        })
    }

    /// FCM v1 request body for one device.
    pub fn message_body(token: &str, payload: &PushPayload) -> Value {
        let hints = &payload.hints;

        json!({
            "message": {
                "token": token,
                "notification": {
                    "title": payload.title,
                    "body": payload.body,
                },
                "data": payload.data,
                "android": {
                    "priority": "HIGH",
                    "notification": {
                        "channel_id": hints.channel_id,
                        "icon": hints.icon,
                        "color": hints.color,
                        "sound": hints.sound,
                        "notification_priority": "PRIORITY_HIGH",
                    },
                },
                "apns": {
                    "headers": { "apns-priority": "10" },
                    "payload": {
                        "aps": {
                            "alert": { "title": payload.title, "body": payload.body },
                            "sound": hints.sound,
                            "badge": hints.badge,
                        },
                    },
                },
            }
        })
    }

    async fn post(
        &self,
        bearer: &str,
        token: &str,
        payload: &PushPayload,
    ) -> Result<String, PushError> {
        let resp = self
            .http
            .post(&self.send_url)
            .bearer_auth(bearer)
            .json(&Self::message_body(token, payload))
            .send()
            .await
            .map_err(|e| PushError::Transport(e.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            let sent: SendResponse = resp
                .json()
                .await
                .map_err(|e| PushError::Transport(e.to_string()))?;
            return Ok(sent.name);
        }

        let body = resp.text().await.unwrap_or_default();
        let (code, message) = parse_error(&body);
        debug!(
            token = token_suffix(token),
            status = %status,
            code,
            "fcm rejected message"
        );
        Err(PushError::Rejected {
            code: code.to_string(),
            message,
        })
    }
}

#[async_trait]
impl PushProvider for FcmClient {
    async fn send(&self, token: &str, payload: &PushPayload) -> Result<String, PushError> {
        let bearer = self.auth.bearer().await?;
        self.post(&bearer, token, payload).await
    }

    async fn send_multicast(
        &self,
        tokens: &[String],
        payload: &PushPayload,
    ) -> Result<BatchResponse, PushError> {
        if tokens.len() > MAX_MULTICAST_TOKENS {
            return Err(PushError::TooManyTokens(tokens.len()));
        }
        let bearer = self.auth.bearer().await?;

        let responses: Vec<SendOutcome> = stream::iter(tokens.iter().cloned())
            .map(|token: String| {
                let bearer = bearer.as_str();
                async move {
                    let token = token.as_str();
                    match self.post(bearer, token, payload).await {
                        Ok(message_id) => SendOutcome::Sent { message_id },
                        Err(PushError::Rejected { code, message }) => {
                            SendOutcome::Failed { code, message }
                        }
                        Err(e) => {
                            warn!(token = token_suffix(token), error = %e, "fcm send failed");
                            SendOutcome::Failed {
                                code: CODE_UNKNOWN.to_string(),
                                message: e.to_string(),
                            }
                        }
                    }
                }
            })
            .buffered(SEND_CONCURRENCY)
            .collect()
            .await;

        Ok(BatchResponse { responses })
    }
}

// ── Error mapping ────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct SendResponse {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    details: Vec<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorDetail {
    #[serde(default)]
    error_code: Option<String>,
}

/// Map an FCM v1 error status to a `messaging/*` code.
pub fn map_status(status: &str) -> &'static str {
    match status {
        "UNREGISTERED" | "NOT_FOUND" => CODE_TOKEN_NOT_REGISTERED,
        "INVALID_ARGUMENT" => CODE_INVALID_ARGUMENT,
        "SENDER_ID_MISMATCH" | "PERMISSION_DENIED" => CODE_MISMATCHED_CREDENTIAL,
        "QUOTA_EXCEEDED" | "RESOURCE_EXHAUSTED" => CODE_RATE_EXCEEDED,
        "UNAVAILABLE" => CODE_SERVER_UNAVAILABLE,
        "INTERNAL" => CODE_INTERNAL,
        "THIRD_PARTY_AUTH_ERROR" | "UNAUTHENTICATED" => CODE_THIRD_PARTY_AUTH,
        _ => CODE_UNKNOWN,
    }
}

/// The FCM-specific `errorCode` detail wins over the generic status.
fn parse_error(body: &str) -> (&'static str, String) {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(env) => {
            let status = env
                .error
                .details
                .iter()
                .find_map(|d| d.error_code.clone())
                .or(env.error.status)
                .unwrap_or_default();
            (map_status(&status), env.error.message)
        }
        Err(_) => (CODE_UNKNOWN, body.chars().take(200).collect()),
    }
}
