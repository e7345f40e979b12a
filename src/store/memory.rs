//! In-process document store backed by `DashMap`.
//!
//! Used for local development (`NOTIFYD_STORE=memory`) and by the test
//! suite. Counts queries and commits, and can be told to fail either.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;

use super::{
    token_matches, DocumentStore, StoreError, UserFilter, WriteBatch, WriteOp, BATCH_WRITE_LIMIT,
};
use crate::models::documents::Fields;
use crate::models::notification::{BroadcastRecord, DeliveryStatus, UserNotification};
use crate::models::user::User;

const NO_LIMIT: usize = usize::MAX;

pub struct MemoryStore {
    users: DashMap<String, User>,
    notifications: DashMap<String, Vec<UserNotification>>,
    broadcasts: DashMap<String, BroadcastRecord>,
    queries: AtomicUsize,
    commits: AtomicUsize,
    fail_queries: AtomicBool,
    commits_before_failure: AtomicUsize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            users: DashMap::new(),
            notifications: DashMap::new(),
            broadcasts: DashMap::new(),
            queries: AtomicUsize::new(0),
            commits: AtomicUsize::new(0),
            fail_queries: AtomicBool::new(false),
            commits_before_failure: AtomicUsize::new(NO_LIMIT),
        }
    }

    /// Load users from a JSON array of user documents.
    pub async fn from_seed(path: &Path) -> anyhow::Result<Self> {
        let raw = tokio::fs::read_to_string(path).await?;
        let users: Vec<User> = serde_json::from_str(&raw)?;
        let store = Self::new();
        for user in users {
            store.insert_user(user);
        }
        tracing::info!(users = store.users.len(), path = %path.display(), "seeded memory store");
        Ok(store)
    }

    pub fn insert_user(&self, user: User) {
        self.users.insert(user.id.clone(), user);
    }

    pub fn user(&self, id: &str) -> Option<User> {
        self.users.get(id).map(|u| u.clone())
    }

    pub fn users(&self) -> Vec<User> {
        let mut users: Vec<User> = self.users.iter().map(|u| u.clone()).collect();
        users.sort_by(|a, b| a.id.cmp(&b.id));
        users
    }

    /// Every per-user notification record, across all users.
    pub fn all_notifications(&self) -> Vec<UserNotification> {
        self.notifications
            .iter()
            .flat_map(|entry| entry.value().clone())
            .collect()
    }

    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    pub fn fail_queries(&self, fail: bool) {
        self.fail_queries.store(fail, Ordering::SeqCst);
    }

    /// Let `n` more commits succeed; every later commit fails.
    pub fn fail_commits_after(&self, n: usize) {
        self.commits_before_failure.store(n, Ordering::SeqCst);
    }

    fn check_query(&self) -> Result<(), StoreError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if self.fail_queries.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected query failure".into()));
        }
        Ok(())
    }

    fn check_commit(&self) -> Result<(), StoreError> {
        let remaining = self.commits_before_failure.load(Ordering::SeqCst);
        if remaining == 0 {
            return Err(StoreError::Unavailable("injected commit failure".into()));
        }
        if remaining != NO_LIMIT {
            self.commits_before_failure
                .store(remaining - 1, Ordering::SeqCst);
        }
        Ok(())
    }

    /// Returns whether the op changed anything.
    fn apply(&self, op: WriteOp) -> bool {
        let now = Utc::now();
        match op {
            WriteOp::ClearToken {
                user_id,
                token,
                error_code,
            } => {
                let Some(mut user) = self.users.get_mut(&user_id) else {
                    return false;
                };
                if !token_matches(user.fcm_token.as_deref(), &token) {
                    return false;
                }
                user.fcm_token = None;
                user.token_invalidated_at = Some(now);
                user.last_token_error = Some(error_code);
                true
            }
            WriteOp::CreateUserNotification {
                user_id,
                notification,
            } => {
                let record = UserNotification {
                    id: uuid::Uuid::new_v4().simple().to_string(),
                    user_id: user_id.clone(),
                    kind: notification.kind,
                    from_user_id: notification.from_user_id,
                    is_read: false,
                    created_at: now,
                    fields: notification.fields,
                };
                self.notifications.entry(user_id).or_default().push(record);
                true
            }
        }
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn get_user(&self, id: &str) -> Result<Option<User>, StoreError> {
        self.check_query()?;
        Ok(self.user(id))
    }

    async fn query_users(&self, filter: &UserFilter) -> Result<Vec<User>, StoreError> {
        self.check_query()?;
        Ok(self
            .users()
            .into_iter()
            .filter(|u| filter.matches(u))
            .collect())
    }

    async fn commit(&self, batch: WriteBatch) -> Result<usize, StoreError> {
        if batch.len() > BATCH_WRITE_LIMIT {
            return Err(StoreError::BatchTooLarge(batch.len()));
        }
        self.check_commit()?;
        let applied = batch
            .into_ops()
            .into_iter()
            .map(|op| self.apply(op))
            .filter(|changed| *changed)
            .count();
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(applied)
    }

    async fn list_user_notifications(
        &self,
        user_id: &str,
    ) -> Result<Vec<UserNotification>, StoreError> {
        self.check_query()?;
        Ok(self
            .notifications
            .get(user_id)
            .map(|n| n.clone())
            .unwrap_or_default())
    }

    async fn create_broadcast(&self, document: Fields) -> Result<String, StoreError> {
        let id = uuid::Uuid::new_v4().simple().to_string();
        self.broadcasts
            .insert(id.clone(), BroadcastRecord::new(id.clone(), document));
        Ok(id)
    }

    async fn get_broadcast(&self, id: &str) -> Result<Option<BroadcastRecord>, StoreError> {
        self.check_query()?;
        Ok(self.broadcasts.get(id).map(|b| b.clone()))
    }

    async fn record_delivery_status(
        &self,
        id: &str,
        status: &DeliveryStatus,
    ) -> Result<(), StoreError> {
        self.check_commit()?;
        let mut record = self
            .broadcasts
            .entry(id.to_string())
            .or_insert_with(|| BroadcastRecord::new(id, Fields::new()));
        record.apply_status(status, Utc::now());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::notification::NewUserNotification;

    #[tokio::test]
    async fn test_clear_token_is_conditional() {
        let store = MemoryStore::new();
        let mut user = User::new("u1");
        user.fcm_token = Some("fresh".into());
        store.insert_user(user);

        let mut batch = WriteBatch::new();
        batch.push(WriteOp::ClearToken {
            user_id: "u1".into(),
            token: "stale".into(),
            error_code: "messaging/registration-token-not-registered".into(),
        });
        assert_eq!(store.commit(batch).await.unwrap(), 0);

        assert_eq!(store.user("u1").unwrap().fcm_token.as_deref(), Some("fresh"));
    }

    #[tokio::test]
    async fn test_clear_token_matches_padded_stored_token() {
        let store = MemoryStore::new();
        let mut user = User::new("u1");
        user.fcm_token = Some("  dead  ".into());
        store.insert_user(user);

        let mut batch = WriteBatch::new();
        batch.push(WriteOp::ClearToken {
            user_id: "u1".into(),
            token: "dead".into(),
            error_code: "messaging/invalid-registration-token".into(),
        });
        assert_eq!(store.commit(batch).await.unwrap(), 1);

        assert_eq!(store.user("u1").unwrap().fcm_token, None);
    }

    #[tokio::test]
    async fn test_oversized_batch_rejected() {
        let store = MemoryStore::new();
        let mut batch = WriteBatch::new();
        for _ in 0..=BATCH_WRITE_LIMIT {
            batch.push(WriteOp::CreateUserNotification {
                user_id: "u1".into(),
                notification: NewUserNotification::new("like", None),
            });
        }
        let err = store.commit(batch).await.unwrap_err();
        assert!(matches!(err, StoreError::BatchTooLarge(501)));
        assert_eq!(store.commit_count(), 0);
    }

    #[tokio::test]
    async fn test_commit_fault_injection() {
        let store = MemoryStore::new();
        store.fail_commits_after(1);
        assert!(store.commit(WriteBatch::new()).await.is_ok());
        assert!(store.commit(WriteBatch::new()).await.is_err());
    }
}
