//! Document-creation handlers.
//!
//! Every handler claims a de-duplication key, runs its flow and folds the
//! result into a [`TriggerOutcome`]. Missing input ends the flow as
//! `Skipped`; store, push-transport and geocoding errors end it as `Failed`.

pub mod broadcast;
pub mod callable;
pub mod direct;
pub mod location;
pub mod relationship;

use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::dedup::TriggerDedup;
use crate::fanout::{reconcile, BatchDispatcher, DispatchSettings, FailureRecord};
use crate::geocode::{GeocodeError, ReverseGeocoder};
use crate::metrics;
use crate::push::{PushError, PushProvider};
use crate::store::{DocumentStore, StoreError};

pub const FALLBACK_ACTOR: &str = "Someone";

#[derive(Debug, Error)]
pub enum TriggerError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Push(#[from] PushError),

    #[error(transparent)]
    Geocode(#[from] GeocodeError),
}

/// Counts reported by a completed flow. Zero fields are flow-specific.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    pub recipients: usize,
    pub successful: usize,
    pub failed: usize,
    pub batches: usize,
    pub records: usize,
    pub retired_tokens: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TriggerOutcome {
    Completed(Report),
    Skipped { reason: String },
    Failed { error: String },
}

impl TriggerOutcome {
    pub fn skipped(reason: impl Into<String>) -> Self {
        TriggerOutcome::Skipped {
            reason: reason.into(),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TriggerOutcome::Completed(_) => "completed",
            TriggerOutcome::Skipped { .. } => "skipped",
            TriggerOutcome::Failed { .. } => "failed",
        }
    }

    pub fn report(&self) -> Option<&Report> {
        match self {
            TriggerOutcome::Completed(report) => Some(report),
            _ => None,
        }
    }
}

/// Process-wide collaborators shared by every handler.
pub struct Services {
    pub store: Arc<dyn DocumentStore>,
    pub push: Arc<dyn PushProvider>,
    pub geocoder: Arc<dyn ReverseGeocoder>,
    pub dedup: TriggerDedup,
    pub dispatch: DispatchSettings,
}

impl Services {
    pub fn dispatcher(&self) -> BatchDispatcher<'_> {
        BatchDispatcher::new(self.push.as_ref(), self.dispatch)
    }

    /// Reconcile `failures`, logging instead of failing. Returns the number
    /// of user records cleared.
    pub async fn reconcile_logged(&self, failures: &[FailureRecord]) -> usize {
        if failures.is_empty() {
            return 0;
        }
        match reconcile(self.store.as_ref(), failures).await {
            Ok(summary) => summary.cleared_users,
            Err(e) => {
                error!(error = %e, failures = failures.len(), "token reconciliation aborted");
                0
            }
        }
    }

    /// `fullName` of `user_id`, or [`FALLBACK_ACTOR`]. Lookup errors are
    /// logged and fall back.
    pub async fn display_name(&self, user_id: Option<&str>) -> String {
        let Some(id) = user_id else {
            return FALLBACK_ACTOR.to_string();
        };
        match self.store.get_user(id).await {
            Ok(Some(user)) => user.display_name_or(FALLBACK_ACTOR).to_string(),
            Ok(None) => FALLBACK_ACTOR.to_string(),
            Err(e) => {
                warn!(user_id = id, error = %e, "failed to load actor, using fallback name");
                FALLBACK_ACTOR.to_string()
            }
        }
    }

    /// Claim `trigger:ids`, then run `flow` and record its outcome. A failed
    /// flow releases the claim.
    pub(crate) async fn guarded<Fut>(
        &self,
        trigger: &'static str,
        ids: &[&str],
        flow: Fut,
    ) -> TriggerOutcome
    where
        Fut: Future<Output = Result<TriggerOutcome, TriggerError>>,
    {
        let key = format!("{}:{}", trigger, ids.join("/"));

        let outcome = if !self.dedup.claim(&key).await {
            TriggerOutcome::skipped("duplicate delivery")
        } else {
            match flow.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    self.dedup.release(&key).await;
                    TriggerOutcome::Failed {
                        error: e.to_string(),
                    }
                }
            }
        };

        metrics::record_trigger(trigger, outcome.label());
        match &outcome {
            TriggerOutcome::Completed(report) => {
                info!(trigger, key = %key, report = ?report, "trigger completed")
            }
            TriggerOutcome::Skipped { reason } => {
                info!(trigger, key = %key, reason = %reason, "trigger skipped")
            }
            TriggerOutcome::Failed { error } => {
                error!(trigger, key = %key, error = %error, "trigger failed")
            }
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_serialization() {
        let skipped = serde_json::to_value(TriggerOutcome::skipped("nothing to do")).unwrap();
        assert_eq!(skipped["status"], "skipped");
        assert_eq!(skipped["reason"], "nothing to do");

        let done = serde_json::to_value(TriggerOutcome::Completed(Report {
            records: 2,
            ..Default::default()
        }))
        .unwrap();
        assert_eq!(done["status"], "completed");
        assert_eq!(done["records"], 2);
        assert!(done.get("city").is_none());
    }
}
