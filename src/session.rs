//! Session store: opaque, cryptographically random session ids that authorize subsequent
//! calls after a successful `create_session`, per the gateway's session-store contract.
//!
//! Grounded in `mcp/registry.rs`'s `tokio::time::interval`-based debounce/sweep idiom for
//! the background reaper, and `rand`/`hex` (both already dependencies) for id generation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::RngCore;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::GatewayError;

#[derive(Debug, Clone)]
struct SessionEntry {
    uid: i64,
    created_at: Instant,
    last_used: Instant,
    ttl: Duration,
}

impl SessionEntry {
    fn is_alive(&self, now: Instant) -> bool {
        self.last_used + self.ttl >= now
    }
}

/// Server-side session store. `uid` here is the gateway's notion of the authenticated
/// identity behind a session id; it does not change which credentials go out on the wire
/// to Odoo (those stay the gateway's configured global uid/secret unless a call explicitly
/// carries its own).
pub struct SessionStore {
    sessions: RwLock<HashMap<String, SessionEntry>>,
    default_ttl: Duration,
}

impl SessionStore {
    pub fn new(default_ttl: Duration) -> Arc<Self> {
        Arc::new(Self {
            sessions: RwLock::new(HashMap::new()),
            default_ttl,
        })
    }

    /// Generates an opaque, cryptographically random session id and stores `{id, uid,
    /// now, now}` with the store's configured TTL.
    pub async fn create(&self, uid: i64) -> String {
        let id = generate_session_id();
        let now = Instant::now();
        let entry = SessionEntry {
            uid,
            created_at: now,
            last_used: now,
            ttl: self.default_ttl,
        };
        self.sessions.write().await.insert(id.clone(), entry);
        id
    }

    /// Touches `last_used` and returns the uid; if expired, removes it and returns a
    /// Session error.
    pub async fn resolve(&self, session_id: &str) -> Result<i64, GatewayError> {
        let now = Instant::now();
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(session_id) {
            Some(entry) if entry.is_alive(now) => {
                entry.last_used = now;
                Ok(entry.uid)
            }
            Some(_) => {
                sessions.remove(session_id);
                Err(GatewayError::Session(format!(
                    "session '{session_id}' has expired"
                )))
            }
            None => Err(GatewayError::Session(format!(
                "unknown session '{session_id}'"
            ))),
        }
    }

    /// Idempotent removal.
    pub async fn destroy(&self, session_id: &str) {
        self.sessions.write().await.remove(session_id);
    }

    /// Removes all sessions whose `last_used + TTL < now`. Returns the number reaped.
    pub async fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, entry| entry.is_alive(now));
        before - sessions.len()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn created_at(&self, session_id: &str) -> Option<Instant> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .map(|e| e.created_at)
    }

    /// Spawns the periodic background sweep task at `session_cleanup_interval`.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let reaped = store.sweep().await;
                if reaped > 0 {
                    tracing::debug!(reaped, "swept expired sessions");
                }
            }
        })
    }
}

fn generate_session_id() -> String {
    let mut bytes = [0u8; 24];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

struct IdempotencyEntry {
    result: Value,
    recorded_at: Instant,
}

/// Bounded-window `operation_id -> result` replay cache for write tools (`odoo.create`,
/// `odoo.write`, `odoo.unlink`, `odoo.actions.call`). A caller that retries a write with the
/// same `operation_id` gets the original result back instead of re-executing it against
/// Odoo. Shares `SessionStore`'s TTL-map-plus-sweeper shape since the lifecycle is
/// identical: insert on first use, expire after a window, periodic reap.
pub struct IdempotencyStore {
    entries: RwLock<HashMap<String, IdempotencyEntry>>,
    ttl: Duration,
}

impl IdempotencyStore {
    pub fn new(ttl: Duration) -> Arc<Self> {
        Arc::new(Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        })
    }

    /// Returns the replayed result if `operation_id` was recorded within the window.
    pub async fn get(&self, operation_id: &str) -> Option<Value> {
        let now = Instant::now();
        let entries = self.entries.read().await;
        entries
            .get(operation_id)
            .filter(|e| e.recorded_at + self.ttl >= now)
            .map(|e| e.result.clone())
    }

    /// Records a write's result under `operation_id`. Overwrites any prior entry, since a
    /// client reusing an `operation_id` after it already replayed once should still get a
    /// consistent answer rather than an error.
    pub async fn record(&self, operation_id: String, result: Value) {
        self.entries.write().await.insert(
            operation_id,
            IdempotencyEntry {
                result,
                recorded_at: Instant::now(),
            },
        );
    }

    /// Removes every entry older than the configured TTL. Returns the number reaped.
    pub async fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| e.recorded_at + self.ttl >= now);
        before - entries.len()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let reaped = store.sweep().await;
                if reaped > 0 {
                    tracing::debug!(reaped, "swept expired idempotency entries");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_then_resolve_returns_same_uid() {
        let store = SessionStore::new(Duration::from_secs(60));
        let id = store.create(42).await;
        let uid = store.resolve(&id).await.unwrap();
        assert_eq!(uid, 42);
    }

    #[tokio::test]
    async fn resolve_unknown_session_errors() {
        let store = SessionStore::new(Duration::from_secs(60));
        let err = store.resolve("nonexistent").await.unwrap_err();
        assert!(matches!(err, GatewayError::Session(_)));
    }

    #[tokio::test]
    async fn resolve_expired_session_removes_and_errors() {
        let store = SessionStore::new(Duration::from_millis(10));
        let id = store.create(1).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        let err = store.resolve(&id).await.unwrap_err();
        assert!(matches!(err, GatewayError::Session(_)));
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn destroy_is_idempotent() {
        let store = SessionStore::new(Duration::from_secs(60));
        let id = store.create(1).await;
        store.destroy(&id).await;
        store.destroy(&id).await;
        assert!(store.resolve(&id).await.is_err());
    }

    #[tokio::test]
    async fn sweep_removes_only_expired() {
        let store = SessionStore::new(Duration::from_millis(10));
        let expiring = store.create(1).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        let fresh = store.create(2).await;
        let reaped = store.sweep().await;
        assert_eq!(reaped, 1);
        assert!(store.resolve(&fresh).await.is_ok());
        assert!(store.resolve(&expiring).await.is_err());
    }

    #[tokio::test]
    async fn session_ids_are_unique_and_hex() {
        let store = SessionStore::new(Duration::from_secs(60));
        let a = store.create(1).await;
        let b = store.create(2).await;
        assert_ne!(a, b);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(a.len(), 48);
    }

    #[tokio::test]
    async fn idempotency_store_replays_recorded_result() {
        let store = IdempotencyStore::new(Duration::from_secs(60));
        store
            .record("op-1".to_string(), serde_json::json!({"id": 42}))
            .await;
        assert_eq!(store.get("op-1").await, Some(serde_json::json!({"id": 42})));
        assert_eq!(store.get("op-unknown").await, None);
    }

    #[tokio::test]
    async fn idempotency_store_expires_after_ttl() {
        let store = IdempotencyStore::new(Duration::from_millis(10));
        store.record("op-1".to_string(), serde_json::json!(1)).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(store.get("op-1").await, None);
    }

    #[tokio::test]
    async fn idempotency_sweep_removes_only_expired() {
        let store = IdempotencyStore::new(Duration::from_millis(10));
        store.record("expiring".to_string(), serde_json::json!(1)).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        store.record("fresh".to_string(), serde_json::json!(2)).await;
        let reaped = store.sweep().await;
        assert_eq!(reaped, 1);
        assert_eq!(store.len().await, 1);
    }
}
