use async_trait::async_trait;
use tracing::info;

use super::{
    token_suffix, BatchResponse, PushError, PushPayload, PushProvider, SendOutcome,
    MAX_MULTICAST_TOKENS,
};

/// Development backend: logs every message and reports it delivered.
#[derive(Debug, Default, Clone)]
pub struct LogProvider;

#[async_trait]
impl PushProvider for LogProvider {
    async fn send(&self, token: &str, payload: &PushPayload) -> Result<String, PushError> {
        info!(
            token = token_suffix(token),
            title = %payload.title,
            body = %payload.body,
            channel = %payload.hints.channel_id,
            "push (log provider)"
        );
        Ok(format!("log/{}", uuid::Uuid::new_v4().simple()))
    }

    async fn send_multicast(
        &self,
        tokens: &[String],
        payload: &PushPayload,
    ) -> Result<BatchResponse, PushError> {
        if tokens.len() > MAX_MULTICAST_TOKENS {
            return Err(PushError::TooManyTokens(tokens.len()));
        }
        info!(
            tokens = tokens.len(),
            title = %payload.title,
            channel = %payload.hints.channel_id,
            "multicast push (log provider)"
        );
        let responses = tokens
            .iter()
            .map(|_| SendOutcome::Sent {
                message_id: format!("log/{}", uuid::Uuid::new_v4().simple()),
            })
            .collect();
        Ok(BatchResponse { responses })
    }
}
