pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::documents::Fields;
use crate::models::notification::{
    BroadcastRecord, DeliveryStatus, NewUserNotification, UserNotification,
};
use crate::models::user::User;

/// Maximum number of operations a single batched write may carry.
pub const BATCH_WRITE_LIMIT: usize = 500;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("batch of {0} writes exceeds the limit of {BATCH_WRITE_LIMIT}")]
    BatchTooLarge(usize),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Constraint on the `fcmToken` field of a user query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TokenFilter {
    #[default]
    Any,
    /// `fcmToken != null`. Blank strings still match; callers filter those.
    Present,
    /// Stored token equals this value once surrounding whitespace is trimmed.
    Equals(String),
}

/// Equality filters over the users collection, plus the single
/// not-null inequality carried by [`TokenFilter::Present`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserFilter {
    pub token: TokenFilter,
    pub current_city: Option<String>,
    pub role: Option<String>,
    /// Preference flag that must be `true` in `appSettings`.
    pub preference: Option<String>,
}

impl UserFilter {
    pub fn with_token() -> Self {
        Self {
            token: TokenFilter::Present,
            ..Default::default()
        }
    }

    pub fn holding_token(token: &str) -> Self {
        Self {
            token: TokenFilter::Equals(token.to_string()),
            ..Default::default()
        }
    }

    pub fn in_city(city: &str) -> Self {
        Self {
            current_city: Some(city.to_string()),
            ..Default::default()
        }
    }

    pub fn with_role(role: &str) -> Self {
        Self {
            role: Some(role.to_string()),
            ..Default::default()
        }
    }

    pub fn preference(mut self, flag: &str) -> Self {
        self.preference = Some(flag.to_string());
        self
    }

    /// Whether `user` satisfies every constraint of this filter.
    pub fn matches(&self, user: &User) -> bool {
        let token_ok = match &self.token {
            TokenFilter::Any => true,
            TokenFilter::Present => user.fcm_token.is_some(),
            TokenFilter::Equals(t) => token_matches(user.fcm_token.as_deref(), t),
        };
        token_ok
            && self
                .current_city
                .as_ref()
                .map_or(true, |c| user.current_city.as_ref() == Some(c))
            && self
                .role
                .as_ref()
                .map_or(true, |r| user.role.as_ref() == Some(r))
            && self
                .preference
                .as_ref()
                .map_or(true, |p| user.preference(p))
    }
}

/// Tokens are sent trimmed, so stored values compare trimmed too.
pub fn token_matches(stored: Option<&str>, token: &str) -> bool {
    stored.map(str::trim) == Some(token.trim())
}

/// A single write queued into a [`WriteBatch`].
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Remove `token` from the user, stamping the error code and the server
    /// time. No-op unless the user still holds `token` (see [`token_matches`]).
    ClearToken {
        user_id: String,
        token: String,
        error_code: String,
    },
    /// Create a record in `users/{user_id}/notifications`.
    CreateUserNotification {
        user_id: String,
        notification: NewUserNotification,
    },
}

/// Operations committed atomically by [`DocumentStore::commit`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, op: WriteOp) {
        self.ops.push(op);
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }
}

/// Abstraction over the document database.
/// Implementations: PgStore (PostgreSQL), MemoryStore (in-process).
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn ping(&self) -> Result<(), StoreError>;

    async fn get_user(&self, id: &str) -> Result<Option<User>, StoreError>;

    async fn query_users(&self, filter: &UserFilter) -> Result<Vec<User>, StoreError>;

    /// Apply every op of `batch` atomically and return how many ops changed
    /// a document. Batches above [`BATCH_WRITE_LIMIT`] are rejected.
    async fn commit(&self, batch: WriteBatch) -> Result<usize, StoreError>;

    async fn list_user_notifications(
        &self,
        user_id: &str,
    ) -> Result<Vec<UserNotification>, StoreError>;

    /// Create a broadcast document and return its id.
    async fn create_broadcast(&self, document: Fields) -> Result<String, StoreError>;

    async fn get_broadcast(&self, id: &str) -> Result<Option<BroadcastRecord>, StoreError>;

    async fn record_delivery_status(
        &self,
        id: &str,
        status: &DeliveryStatus,
    ) -> Result<(), StoreError>;
}

/// Totals reported by [`BatchWriter::finish`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteStats {
    /// Ops sent to the store.
    pub written: usize,
    /// Ops that changed a document. Conditional clears may change nothing.
    pub applied: usize,
    pub commits: usize,
}

/// Accumulates ops and commits every time `limit` are pending, then once
/// more on [`finish`](Self::finish) for the remainder. N queued ops always
/// produce `ceil(N / limit)` commits.
pub struct BatchWriter<'a> {
    store: &'a dyn DocumentStore,
    pending: WriteBatch,
    limit: usize,
    stats: WriteStats,
}

impl<'a> BatchWriter<'a> {
    pub fn new(store: &'a dyn DocumentStore) -> Self {
        Self::with_limit(store, BATCH_WRITE_LIMIT)
    }

    pub fn with_limit(store: &'a dyn DocumentStore, limit: usize) -> Self {
        Self {
            store,
            pending: WriteBatch::new(),
            limit: limit.clamp(1, BATCH_WRITE_LIMIT),
            stats: WriteStats::default(),
        }
    }

    pub async fn push(&mut self, op: WriteOp) -> Result<(), StoreError> {
        self.pending.push(op);
        if self.pending.len() >= self.limit {
            self.flush().await?;
        }
        Ok(())
    }

    pub fn stats(&self) -> WriteStats {
        self.stats
    }

    pub async fn finish(mut self) -> Result<WriteStats, StoreError> {
        if !self.pending.is_empty() {
            self.flush().await?;
        }
        Ok(self.stats)
    }

    async fn flush(&mut self) -> Result<(), StoreError> {
        let batch = std::mem::take(&mut self.pending);
        let size = batch.len();
        let applied = self.store.commit(batch).await?;
        self.stats.written += size;
        self.stats.applied += applied;
        self.stats.commits += 1;
        tracing::debug!(size, commits = self.stats.commits, "committed write batch");
        Ok(())
    }
}
