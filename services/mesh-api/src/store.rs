//! External key-value state
//!
//! Everything the mesh shares across processes lives behind [`KeyValue`]:
//! the intent fingerprint map, the terminal-result cache, provider affinity
//! bindings, and rate-limit counters. Production uses Redis; tests use the
//! in-memory implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use mesh_core::{AFFINITY_TTL_SECONDS, RESULT_CACHE_TTL_SECONDS};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

/// Key prefixes shared with other mesh deployments.
pub mod keys {
    /// Cached terminal result JSON, 24 h TTL
    pub const PAYMENT_RESULT: &str = "payment_result";
    /// User -> provider affinity binding, 24 h TTL
    pub const PROVIDER_AFFINITY: &str = "provider_affinity";
    /// Per-key rate limit counter, 60 s TTL
    pub const RATE_LIMIT: &str = "ratelimit";
}

/// Store failures.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The key does not exist
    #[error("key not found")]
    NotFound,
    /// Backend failure
    #[error("store backend error: {0}")]
    Backend(String),
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        StoreError::Backend(err.to_string())
    }
}

/// Minimal key-value interface required by the mesh.
#[async_trait]
pub trait KeyValue: Send + Sync {
    /// Fetch a value.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    /// Store a value without expiry.
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    /// Store a value with a TTL.
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;
    /// Delete a key; `NotFound` when absent.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
    /// Increment a counter, setting `ttl` on first touch. Returns the new count.
    async fn incr_ex(&self, key: &str, ttl: Duration) -> Result<i64, StoreError>;
    /// Liveness probe.
    async fn ping(&self) -> Result<(), StoreError>;
}

/// Redis-backed store.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    /// Connect to Redis and build a managed connection.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url).map_err(StoreError::from)?;
        let conn = ConnectionManager::new(client).await.map_err(StoreError::from)?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl KeyValue for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let value: Option<String> = self.conn.clone().get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.conn.clone().set::<_, _, ()>(key, value).await?;
        Ok(())
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        self.conn
            .clone()
            .set_ex::<_, _, ()>(key, value, ttl.as_secs())
            .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let removed: i64 = self.conn.clone().del(key).await?;
        if removed == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn incr_ex(&self, key: &str, ttl: Duration) -> Result<i64, StoreError> {
        let mut conn = self.conn.clone();
        let count: i64 = conn.incr(key, 1).await?;
        if count == 1 {
            conn.expire::<_, ()>(key, ttl.as_secs() as i64).await?;
        }
        Ok(count)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let pong: String = redis::cmd("PING").query_async(&mut self.conn.clone()).await?;
        if pong == "PONG" {
            Ok(())
        } else {
            Err(StoreError::Backend(format!("unexpected ping reply: {pong}")))
        }
    }
}

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: String,
    expires_at: Option<DateTime<Utc>>,
}

/// In-process store with TTL semantics, used by tests.
#[derive(Default)]
pub struct MemoryStore {
    entries: DashMap<String, MemoryEntry>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn live_entry(&self, key: &str) -> Option<MemoryEntry> {
        let entry = self.entries.get(key)?.clone();
        if let Some(expires_at) = entry.expires_at {
            if expires_at <= Utc::now() {
                drop(entry);
                self.entries.remove(key);
                return None;
            }
        }
        Some(entry)
    }
}

#[async_trait]
impl KeyValue for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.live_entry(key).map(|e| e.value))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries.insert(
            key.to_string(),
            MemoryEntry { value: value.to_string(), expires_at: None },
        );
        Ok(())
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        self.entries.insert(
            key.to_string(),
            MemoryEntry {
                value: value.to_string(),
                expires_at: Some(Utc::now() + chrono::Duration::from_std(ttl).unwrap_or_default()),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        if self.live_entry(key).is_none() {
            return Err(StoreError::NotFound);
        }
        self.entries.remove(key);
        Ok(())
    }

    async fn incr_ex(&self, key: &str, ttl: Duration) -> Result<i64, StoreError> {
        let current = self.live_entry(key).and_then(|e| e.value.parse::<i64>().ok());
        let next = current.unwrap_or(0) + 1;
        let expires_at = if current.is_none() {
            Some(Utc::now() + chrono::Duration::from_std(ttl).unwrap_or_default())
        } else {
            self.entries.get(key).and_then(|e| e.expires_at)
        };
        self.entries.insert(
            key.to_string(),
            MemoryEntry { value: next.to_string(), expires_at },
        );
        Ok(next)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// SHA-256 fingerprint of the canonical `{amount, id}` JSON, hex-encoded.
pub fn intent_fingerprint(caller_id: &str, amount: i64) -> String {
    let canonical = serde_json::json!({
        "amount": amount,
        "id": caller_id,
    });
    let digest = Sha256::digest(canonical.to_string().as_bytes());
    hex::encode(digest)
}

/// Idempotent (caller, amount) -> payment id mapping.
pub struct IntentStore {
    kv: Arc<dyn KeyValue>,
}

impl IntentStore {
    /// Wrap a key-value backend.
    pub fn new(kv: Arc<dyn KeyValue>) -> Self {
        Self { kv }
    }

    /// Register an intent. Returns `(payment_id, reused)` where `reused`
    /// signals that the fingerprint already had an id.
    pub async fn register(&self, caller_id: &str, amount: i64) -> Result<(String, bool), StoreError> {
        let fingerprint = intent_fingerprint(caller_id, amount);
        if let Some(existing) = self.kv.get(&fingerprint).await? {
            return Ok((existing, true));
        }

        let payment_id = format!("pay_{}", Uuid::new_v4());
        self.kv.set(&fingerprint, &payment_id).await?;
        Ok((payment_id, false))
    }

    /// The id registered for this fingerprint, if any.
    pub async fn lookup(&self, caller_id: &str, amount: i64) -> Result<Option<String>, StoreError> {
        self.kv.get(&intent_fingerprint(caller_id, amount)).await
    }

    /// Remove the fingerprint mapping, returning the id it held.
    pub async fn revoke(&self, caller_id: &str, amount: i64) -> Result<String, StoreError> {
        let fingerprint = intent_fingerprint(caller_id, amount);
        let existing = self.kv.get(&fingerprint).await?.ok_or(StoreError::NotFound)?;
        self.kv.delete(&fingerprint).await?;
        Ok(existing)
    }
}

/// 24-hour cache of terminal payment results.
pub struct ResultCache {
    kv: Arc<dyn KeyValue>,
}

impl ResultCache {
    /// Wrap a key-value backend.
    pub fn new(kv: Arc<dyn KeyValue>) -> Self {
        Self { kv }
    }

    /// Cache the result blob for a payment.
    pub async fn store(&self, payment_id: &str, result_json: &str) {
        let key = format!("{}:{}", keys::PAYMENT_RESULT, payment_id);
        if let Err(e) = self
            .kv
            .set_ex(&key, result_json, Duration::from_secs(RESULT_CACHE_TTL_SECONDS))
            .await
        {
            warn!(payment_id, error = %e, "failed to cache payment result");
        }
    }

    /// The cached result blob, if still live.
    pub async fn fetch(&self, payment_id: &str) -> Option<String> {
        let key = format!("{}:{}", keys::PAYMENT_RESULT, payment_id);
        match self.kv.get(&key).await {
            Ok(value) => value,
            Err(e) => {
                warn!(payment_id, error = %e, "failed to read cached payment result");
                None
            }
        }
    }
}

/// Key-value backed affinity bindings for the selector.
pub struct KvAffinityStore {
    kv: Arc<dyn KeyValue>,
}

impl KvAffinityStore {
    /// Wrap a key-value backend.
    pub fn new(kv: Arc<dyn KeyValue>) -> Self {
        Self { kv }
    }
}

#[async_trait]
impl mesh_providers::selector::AffinityStore for KvAffinityStore {
    async fn get(&self, user_id: &str) -> Option<String> {
        let key = format!("{}:{}", keys::PROVIDER_AFFINITY, user_id);
        self.kv.get(&key).await.ok().flatten()
    }

    async fn set(&self, user_id: &str, provider: &str, ttl: Duration) {
        let key = format!("{}:{}", keys::PROVIDER_AFFINITY, user_id);
        if let Err(e) = self.kv.set_ex(&key, provider, ttl).await {
            warn!(user_id, provider, error = %e, "failed to store provider affinity");
        }
    }
}

/// 60-second rate-limit counters, persisted for cross-process enforcement.
pub struct RateLimitStore {
    kv: Arc<dyn KeyValue>,
}

impl RateLimitStore {
    /// Wrap a key-value backend.
    pub fn new(kv: Arc<dyn KeyValue>) -> Self {
        Self { kv }
    }

    /// Count one hit for `api_key` in the current 60 s window.
    pub async fn hit(&self, api_key: &str) -> Result<i64, StoreError> {
        let key = format!("{}:{}", keys::RATE_LIMIT, api_key);
        self.kv.incr_ex(&key, Duration::from_secs(60)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_providers::selector::AffinityStore as _;

    #[test]
    fn fingerprint_is_stable_and_distinct() {
        let a = intent_fingerprint("o1", 5000);
        let b = intent_fingerprint("o1", 5000);
        let c = intent_fingerprint("o1", 5001);
        let d = intent_fingerprint("o2", 5000);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
        assert_eq!(a.len(), 64); // hex sha-256
    }

    #[tokio::test]
    async fn register_twice_yields_same_id() {
        let intents = IntentStore::new(Arc::new(MemoryStore::new()));
        let (first, reused_first) = intents.register("o1", 5000).await.unwrap();
        let (second, reused_second) = intents.register("o1", 5000).await.unwrap();
        assert_eq!(first, second);
        assert!(!reused_first);
        assert!(reused_second);
        assert!(first.starts_with("pay_"));
    }

    #[tokio::test]
    async fn revoke_removes_mapping() {
        let intents = IntentStore::new(Arc::new(MemoryStore::new()));
        let (id, _) = intents.register("o1", 5000).await.unwrap();

        let removed = intents.revoke("o1", 5000).await.unwrap();
        assert_eq!(removed, id);
        assert!(matches!(intents.revoke("o1", 5000).await, Err(StoreError::NotFound)));

        // a fresh registration mints a new id
        let (fresh, reused) = intents.register("o1", 5000).await.unwrap();
        assert_ne!(fresh, id);
        assert!(!reused);
    }

    #[tokio::test]
    async fn result_cache_round_trip() {
        let kv: Arc<dyn KeyValue> = Arc::new(MemoryStore::new());
        let cache = ResultCache::new(kv);
        assert!(cache.fetch("pay_x").await.is_none());
        cache.store("pay_x", "{\"status\":\"SUCCESS\"}").await;
        assert_eq!(cache.fetch("pay_x").await.unwrap(), "{\"status\":\"SUCCESS\"}");
    }

    #[tokio::test]
    async fn memory_store_expires_entries() {
        let store = MemoryStore::new();
        store.set_ex("k", "v", Duration::ZERO).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);

        store.set_ex("k2", "v", Duration::from_secs(60)).await.unwrap();
        assert_eq!(store.get("k2").await.unwrap().as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn affinity_store_round_trip() {
        let kv: Arc<dyn KeyValue> = Arc::new(MemoryStore::new());
        let affinity = KvAffinityStore::new(kv);
        assert!(affinity.get("u1").await.is_none());
        affinity.set("u1", "stripe", Duration::from_secs(60)).await;
        assert_eq!(affinity.get("u1").await.as_deref(), Some("stripe"));
    }

    #[tokio::test]
    async fn rate_limit_counter_increments() {
        let kv: Arc<dyn KeyValue> = Arc::new(MemoryStore::new());
        let limiter = RateLimitStore::new(kv);
        assert_eq!(limiter.hit("demo_key").await.unwrap(), 1);
        assert_eq!(limiter.hit("demo_key").await.unwrap(), 2);
        assert_eq!(limiter.hit("other_key").await.unwrap(), 1);
    }
}
