//! TTL cache keyed by `(odoo_db, effective_uid, model, method, stable_args_hash,
//! schema_version)`, generalizing `mcp::cache::MetadataCache`'s `(instance, model)`-only
//! TTL map to the gateway's full cache-key contract with LRU eviction on overflow and
//! schema-version invalidation.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::RwLock;

/// Methods whose results are safe to cache. Everything else (writes, actions) bypasses
/// the cache and triggers `(db, model)`-prefix invalidation instead.
pub const CACHEABLE_METHODS: &[&str] = &[
    "read",
    "search",
    "search_read",
    "search_count",
    "read_group",
    "fields_get",
    "name_search",
];

pub fn is_cacheable_method(method: &str) -> bool {
    CACHEABLE_METHODS.contains(&method)
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub db: String,
    pub effective_uid: i64,
    pub model: String,
    pub method: String,
    pub args_hash: u64,
    pub schema_version: u64,
}

impl CacheKey {
    pub fn new(
        db: &str,
        effective_uid: i64,
        model: &str,
        method: &str,
        args: &Value,
        schema_version: u64,
    ) -> Self {
        Self {
            db: db.to_string(),
            effective_uid,
            model: model.to_string(),
            method: method.to_string(),
            args_hash: hash_args(args),
            schema_version,
        }
    }
}

/// Stable hash of a JSON args value. `serde_json::Value` doesn't implement `Hash`, so we
/// hash its canonical string serialization (object keys are stable-ordered by `Value`'s
/// own `Ord` via `to_string()` only for already-sorted maps; callers should pass
/// normalized/sorted args if key order must not affect cache hits).
fn hash_args(args: &Value) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    args.to_string().hash(&mut hasher);
    hasher.finish()
}

struct Entry {
    value: Value,
    expires_at: Instant,
    last_accessed: Instant,
}

struct Inner {
    entries: HashMap<CacheKey, Entry>,
}

/// Bounded, TTL + LRU cache for read-only Odoo RPC results.
pub struct TtlCache {
    inner: RwLock<Inner>,
    max_entries: usize,
    default_ttl: Duration,
}

impl TtlCache {
    pub fn new(max_entries: usize, default_ttl: Duration) -> Arc<Self> {
        Arc::new(Self {
            inner: RwLock::new(Inner {
                entries: HashMap::new(),
            }),
            max_entries: max_entries.max(1),
            default_ttl,
        })
    }

    pub async fn get(&self, key: &CacheKey) -> Option<Value> {
        let mut inner = self.inner.write().await;
        let now = Instant::now();
        let hit = match inner.entries.get_mut(key) {
            Some(entry) if entry.expires_at > now => {
                entry.last_accessed = now;
                Some(entry.value.clone())
            }
            Some(_) => None,
            None => None,
        };
        if hit.is_none() {
            inner.entries.remove(key);
        }
        hit
    }

    pub async fn insert(&self, key: CacheKey, value: Value) {
        self.insert_with_ttl(key, value, self.default_ttl).await;
    }

    pub async fn insert_with_ttl(&self, key: CacheKey, value: Value, ttl: Duration) {
        let mut inner = self.inner.write().await;
        let now = Instant::now();
        inner.entries.insert(
            key,
            Entry {
                value,
                expires_at: now + ttl,
                last_accessed: now,
            },
        );
        evict_if_needed(&mut inner, self.max_entries);
    }

    /// Invalidates every entry for `(db, model)`, regardless of method/args/uid. Called
    /// after a successful `create`/`write`/`unlink`/action call on that model.
    pub async fn invalidate_prefix(&self, db: &str, model: &str) {
        let mut inner = self.inner.write().await;
        inner
            .entries
            .retain(|k, _| !(k.db == db && k.model == model));
    }

    /// Invalidates every entry tagged with `schema_version` for `db`, per a detected
    /// schema-version change.
    pub async fn invalidate_schema_version(&self, db: &str, schema_version: u64) {
        let mut inner = self.inner.write().await;
        inner
            .entries
            .retain(|k, _| !(k.db == db && k.schema_version == schema_version));
    }

    pub async fn clear_expired(&self) {
        let mut inner = self.inner.write().await;
        let now = Instant::now();
        inner.entries.retain(|_, e| e.expires_at > now);
    }

    pub async fn clear_all(&self) {
        self.inner.write().await.entries.clear();
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn evict_if_needed(inner: &mut Inner, max_entries: usize) {
    while inner.entries.len() > max_entries {
        let oldest = inner
            .entries
            .iter()
            .min_by_key(|(_, e)| e.last_accessed)
            .map(|(k, _)| k.clone());
        match oldest {
            Some(k) => {
                inner.entries.remove(&k);
            }
            None => break,
        }
    }
}

/// Tracks the last-seen `ir.model`/`ir.model.fields` write-date hash per db, so a cheap
/// introspection call can detect schema drift and invalidate stale entries.
pub struct SchemaVersionTracker {
    versions: RwLock<HashMap<String, u64>>,
}

impl SchemaVersionTracker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            versions: RwLock::new(HashMap::new()),
        })
    }

    pub async fn current(&self, db: &str) -> u64 {
        self.versions.read().await.get(db).copied().unwrap_or(0)
    }

    /// Updates the tracked version for `db` from a write-date hash. Returns `Some(old)`
    /// if the version changed (caller should invalidate the old tag), `None` if unchanged
    /// or first-seen.
    pub async fn update(&self, db: &str, new_version: u64) -> Option<u64> {
        let mut versions = self.versions.write().await;
        let old = versions.insert(db.to_string(), new_version);
        match old {
            Some(prev) if prev != new_version => Some(prev),
            _ => None,
        }
    }
}

impl Default for SchemaVersionTracker {
    fn default() -> Self {
        Self {
            versions: RwLock::new(HashMap::new()),
        }
    }
}
