//! At-most-once guard for trigger deliveries. Failed runs release their
//! claim so the platform's retry is processed.
//!
//! Tier 1 is an in-process `DashMap` of claim expiries. Tier 2, when Redis
//! is configured, is `SET NX EX` so replicas share claims. Redis errors fall
//! back to the local answer.

use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use redis::aio::ConnectionManager;
use tokio::time::Instant;
use tracing::warn;

pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

const REDIS_PREFIX: &str = "notifyd:trigger:";

#[derive(Clone)]
pub struct TriggerDedup {
    local: Arc<DashMap<String, Instant>>,
    redis: Option<ConnectionManager>,
    ttl: Duration,
}

impl TriggerDedup {
    pub fn local_only() -> Self {
        Self {
            local: Arc::new(DashMap::new()),
            redis: None,
            ttl: DEFAULT_TTL,
        }
    }

    pub fn with_redis(redis: ConnectionManager) -> Self {
        Self {
            redis: Some(redis),
            ..Self::local_only()
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Claim `key`. Returns `false` when it was already claimed within the TTL.
    pub async fn claim(&self, key: &str) -> bool {
        let now = Instant::now();
        let fresh = match self.local.entry(key.to_string()) {
            Entry::Occupied(mut e) => {
                if *e.get() > now {
                    false
                } else {
                    e.insert(now + self.ttl);
                    true
                }
            }
            Entry::Vacant(e) => {
                e.insert(now + self.ttl);
                true
            }
        };
        if !fresh {
            return false;
        }

        let Some(redis) = &self.redis else {
            return true;
        };
        let mut conn = redis.clone();
        let result: redis::RedisResult<Option<String>> = redis::cmd("SET")
            .arg(format!("{}{}", REDIS_PREFIX, key))
            .arg(1)
            .arg("NX")
            .arg("EX")
            .arg(self.ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await;

        match result {
            Ok(set) => set.is_some(),
            Err(e) => {
                warn!(key, error = %e, "redis dedup unavailable, using local claim");
                true
            }
        }
    }

    /// Give up a claim so a redelivery of `key` runs again.
    pub async fn release(&self, key: &str) {
        self.local.remove(key);

        let Some(redis) = &self.redis else {
            return;
        };
        let mut conn = redis.clone();
        let result: redis::RedisResult<i64> = redis::cmd("DEL")
            .arg(format!("{}{}", REDIS_PREFIX, key))
            .query_async(&mut conn)
            .await;
        if let Err(e) = result {
            warn!(key, error = %e, "failed to release redis dedup claim");
        }
    }

    /// Drop expired local claims.
    pub fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.local.len();
        self.local.retain(|_, expires_at| *expires_at > now);
        before - self.local.len()
    }

    pub fn local_len(&self) -> usize {
        self.local.len()
    }
}
