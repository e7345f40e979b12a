use std::collections::HashSet;

use tracing::{debug, info};

use super::dispatcher::FailureRecord;
use crate::metrics;
use crate::push::{CODE_INVALID_ARGUMENT, CODE_INVALID_TOKEN, CODE_TOKEN_NOT_REGISTERED};
use crate::store::{BatchWriter, DocumentStore, StoreError, UserFilter, WriteOp};

/// Error codes meaning the token will never succeed again.
pub const TERMINAL_CODES: [&str; 3] = [
    CODE_TOKEN_NOT_REGISTERED,
    CODE_INVALID_TOKEN,
    CODE_INVALID_ARGUMENT,
];

pub fn is_terminal(code: &str) -> bool {
    TERMINAL_CODES.contains(&code)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    /// Failure records looked at.
    pub examined: usize,
    /// Distinct terminal tokens looked up.
    pub retired_tokens: usize,
    /// Users whose token was actually cleared.
    pub cleared_users: usize,
    pub commits: usize,
}

/// Clear every terminally invalid token from every user holding it.
///
/// Each terminal token is re-queried by value, so stale copies on other
/// users are cleared too. Clear ops share one running batch across the whole
/// list. The first query or commit error aborts the rest; earlier commits
/// stay applied.
pub async fn reconcile(
    store: &dyn DocumentStore,
    failures: &[FailureRecord],
) -> Result<ReconcileSummary, StoreError> {
    let mut summary = ReconcileSummary {
        examined: failures.len(),
        ..Default::default()
    };
    let mut writer = BatchWriter::new(store);
    let mut looked_up = HashSet::new();

    for failure in failures {
        if !is_terminal(&failure.code) {
            debug!(code = %failure.code, "transient push failure, keeping token");
            continue;
        }
        if !looked_up.insert(failure.token.as_str()) {
            continue;
        }
        summary.retired_tokens += 1;

        let holders = store
            .query_users(&UserFilter::holding_token(&failure.token))
            .await?;
        for user in holders {
            writer
                .push(WriteOp::ClearToken {
                    user_id: user.id,
                    token: failure.token.clone(),
                    error_code: failure.code.clone(),
                })
                .await?;
        }
    }

    let stats = writer.finish().await?;
    summary.cleared_users = stats.applied;
    summary.commits = stats.commits;
    metrics::record_retired(stats.applied);

    if summary.retired_tokens > 0 {
        info!(
            examined = summary.examined,
            retired_tokens = summary.retired_tokens,
            cleared_users = summary.cleared_users,
            commits = summary.commits,
            "reconciled invalid tokens"
        );
    }
    Ok(summary)
}
