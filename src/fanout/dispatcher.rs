use std::time::Duration;

use tracing::{debug, error, info};

use crate::metrics;
use crate::push::{PushPayload, PushProvider, SendOutcome, MAX_MULTICAST_TOKENS};

pub const DEFAULT_BATCH_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchSettings {
    batch_size: usize,
    batch_delay: Duration,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            batch_size: MAX_MULTICAST_TOKENS,
            batch_delay: DEFAULT_BATCH_DELAY,
        }
    }
}

impl DispatchSettings {
    /// `batch_size` is clamped to `1..=MAX_MULTICAST_TOKENS`.
    pub fn new(batch_size: usize, batch_delay: Duration) -> Self {
        Self {
            batch_size: batch_size.clamp(1, MAX_MULTICAST_TOKENS),
            batch_delay,
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn batch_delay(&self) -> Duration {
        self.batch_delay
    }
}

/// One token's delivery failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureRecord {
    pub token: String,
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub successful: usize,
    pub failed: usize,
    pub batches: usize,
    /// Per-token failures. Shorter than `failed` when a whole batch failed
    /// at the transport level.
    pub failures: Vec<FailureRecord>,
}

/// Sends a token list as sequential multicast batches.
pub struct BatchDispatcher<'a> {
    provider: &'a dyn PushProvider,
    settings: DispatchSettings,
}

impl<'a> BatchDispatcher<'a> {
    pub fn new(provider: &'a dyn PushProvider, settings: DispatchSettings) -> Self {
        Self { provider, settings }
    }

    /// Dispatch `tokens` in input order. Never fails: a batch whose call
    /// fails counts every token in it as failed.
    pub async fn dispatch(&self, tokens: &[String], payload: &PushPayload) -> DispatchSummary {
        let mut summary = DispatchSummary::default();
        let chunks: Vec<&[String]> = tokens.chunks(self.settings.batch_size).collect();
        let total = chunks.len();

        for (index, chunk) in chunks.into_iter().enumerate() {
            summary.batches += 1;
            debug!(batch = index + 1, total, size = chunk.len(), "sending push batch");

            match self.provider.send_multicast(chunk, payload).await {
                Ok(response) => {
                    let successes = response.success_count();
                    let failures = chunk.len().saturating_sub(successes);
                    summary.successful += successes;
                    summary.failed += failures;

                    for (token, outcome) in chunk.iter().zip(response.responses) {
                        if let SendOutcome::Failed { code, message } = outcome {
                            summary.failures.push(FailureRecord {
                                token: token.clone(),
                                code,
                                message,
                            });
                        }
                    }

                    metrics::record_batch(successes, failures, true);
                    info!(
                        batch = index + 1,
                        successful = successes,
                        failed = failures,
                        "push batch complete"
                    );
                }
                Err(e) => {
                    summary.failed += chunk.len();
                    metrics::record_batch(0, chunk.len(), false);
                    error!(
                        batch = index + 1,
                        size = chunk.len(),
                        error = %e,
                        "push batch failed"
                    );
                }
            }

            if index + 1 < total {
                tokio::time::sleep(self.settings.batch_delay).await;
            }
        }

        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::push::{BatchResponse, PushError};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Fails tokens starting with `dead`, and the whole call when the first
    /// token starts with `boom`.
    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<Vec<String>>>,
    }

    #[async_trait]
    impl PushProvider for Recorder {
        async fn send(&self, _token: &str, _payload: &PushPayload) -> Result<String, PushError> {
            Ok("id".into())
        }

        async fn send_multicast(
            &self,
            tokens: &[String],
            _payload: &PushPayload,
        ) -> Result<BatchResponse, PushError> {
            self.calls.lock().unwrap().push(tokens.to_vec());
            if tokens[0].starts_with("boom") {
                return Err(PushError::Transport("connection reset".into()));
            }
            let responses = tokens
                .iter()
                .map(|t| {
                    if t.starts_with("dead") {
                        SendOutcome::Failed {
                            code: "messaging/registration-token-not-registered".into(),
                            message: "gone".into(),
                        }
                    } else {
                        SendOutcome::Sent { message_id: format!("m-{}", t) }
                    }
                })
                .collect();
            Ok(BatchResponse { responses })
        }
    }

    fn tokens(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("tok-{:05}", i)).collect()
    }

    fn payload() -> PushPayload {
        PushPayload::broadcast("t", "m", "general")
    }

    #[tokio::test(start_paused = true)]
    async fn test_batches_cover_every_token_in_order() {
        for len in [1usize, 499, 500, 501, 1200] {
            let recorder = Recorder::default();
            let input = tokens(len);
            let summary = BatchDispatcher::new(&recorder, DispatchSettings::default())
                .dispatch(&input, &payload())
                .await;

            let calls = recorder.calls.lock().unwrap().clone();
            assert_eq!(calls.len(), (len + 499) / 500, "len = {}", len);
            assert!(calls.iter().all(|c| c.len() <= 500));
            assert_eq!(calls.concat(), input);
            assert_eq!(summary.batches, calls.len());
            assert_eq!(summary.successful, len);
            assert_eq!(summary.failed, 0);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_per_token_failures_become_records() {
        let recorder = Recorder::default();
        let input = vec!["a".to_string(), "dead-1".to_string(), "b".to_string()];
        let summary = BatchDispatcher::new(&recorder, DispatchSettings::default())
            .dispatch(&input, &payload())
            .await;

        assert_eq!(summary.successful, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].token, "dead-1");
        assert_eq!(
            summary.failures[0].code,
            "messaging/registration-token-not-registered"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_failure_counts_whole_batch_without_records() {
        let recorder = Recorder::default();
        let mut input: Vec<String> = (0..3).map(|i| format!("boom-{}", i)).collect();
        input.push("ok".into());
        let settings = DispatchSettings::new(3, DEFAULT_BATCH_DELAY);

        let summary = BatchDispatcher::new(&recorder, settings)
            .dispatch(&input, &payload())
            .await;

        assert_eq!(summary.batches, 2);
        assert_eq!(summary.failed, 3);
        assert_eq!(summary.successful, 1);
        assert!(summary.failures.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_only_between_batches() {
        let recorder = Recorder::default();
        let settings = DispatchSettings::new(2, Duration::from_millis(100));
        let started = tokio::time::Instant::now();

        BatchDispatcher::new(&recorder, settings)
            .dispatch(&tokens(6), &payload())
            .await;

        assert_eq!(started.elapsed(), Duration::from_millis(200));
    }

    #[test]
    fn test_batch_size_clamped() {
        assert_eq!(DispatchSettings::new(10_000, DEFAULT_BATCH_DELAY).batch_size(), 500);
        assert_eq!(DispatchSettings::new(0, DEFAULT_BATCH_DELAY).batch_size(), 1);
    }
}
