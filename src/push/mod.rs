pub mod fcm;
pub mod log;
pub mod payload;

use async_trait::async_trait;
use thiserror::Error;

pub use payload::PushPayload;

/// Provider-documented hard limit on tokens per multicast call.
pub const MAX_MULTICAST_TOKENS: usize = 500;

// ── Error codes ──────────────────────────────────────────────

pub const CODE_TOKEN_NOT_REGISTERED: &str = "messaging/registration-token-not-registered";
pub const CODE_INVALID_TOKEN: &str = "messaging/invalid-registration-token";
pub const CODE_INVALID_ARGUMENT: &str = "messaging/invalid-argument";
pub const CODE_MISMATCHED_CREDENTIAL: &str = "messaging/mismatched-credential";
pub const CODE_RATE_EXCEEDED: &str = "messaging/message-rate-exceeded";
pub const CODE_SERVER_UNAVAILABLE: &str = "messaging/server-unavailable";
pub const CODE_INTERNAL: &str = "messaging/internal-error";
pub const CODE_THIRD_PARTY_AUTH: &str = "messaging/third-party-auth-error";
pub const CODE_UNKNOWN: &str = "messaging/unknown-error";

#[derive(Debug, Error)]
pub enum PushError {
    /// Credentials for the provider could not be obtained.
    #[error("push auth error: {0}")]
    Auth(String),

    /// The call never produced a provider answer.
    #[error("push transport error: {0}")]
    Transport(String),

    /// The provider rejected a single-target send.
    #[error("push rejected ({code}): {message}")]
    Rejected { code: String, message: String },

    #[error("too many tokens for one multicast call: {0}")]
    TooManyTokens(usize),
}

impl PushError {
    pub fn code(&self) -> Option<&str> {
        match self {
            PushError::Rejected { code, .. } => Some(code),
            _ => None,
        }
    }
}

/// Result for one token of a multicast call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Sent { message_id: String },
    Failed { code: String, message: String },
}

impl SendOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, SendOutcome::Sent { .. })
    }
}

/// Per-token results of a multicast call, in token order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchResponse {
    pub responses: Vec<SendOutcome>,
}

impl BatchResponse {
    pub fn success_count(&self) -> usize {
        self.responses.iter().filter(|r| r.is_success()).count()
    }

    pub fn failure_count(&self) -> usize {
        self.responses.len() - self.success_count()
    }
}

/// Abstraction over push-delivery backends.
/// Implementations: FcmClient (FCM HTTP v1), LogProvider (local development).
#[async_trait]
pub trait PushProvider: Send + Sync {
    /// Send to one device. Returns the provider message id.
    async fn send(&self, token: &str, payload: &PushPayload) -> Result<String, PushError>;

    /// Send to up to [`MAX_MULTICAST_TOKENS`] devices. `Err` means the whole
    /// call failed; per-token failures are reported in the response.
    async fn send_multicast(
        &self,
        tokens: &[String],
        payload: &PushPayload,
    ) -> Result<BatchResponse, PushError>;
}

/// Last characters of a token, for logs.
pub fn token_suffix(token: &str) -> &str {
    let start = token
        .char_indices()
        .rev()
        .nth(11)
        .map(|(i, _)| i)
        .unwrap_or(0);
    &token[start..]
}
