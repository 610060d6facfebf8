//! Provider-Backed Level-2 Cache
//!
//! Delegates storage to an external key/value cache provider. Snapshots are
//! shipped as JSON bytes, so anything the provider keeps is a full deep copy
//! and nothing in it refers back into a live session.
//!
//! Pinning is not supported: the provider owns eviction.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use dashmap::mapref::one::Ref;
use dashmap::DashMap;
use tracing::{debug, info, warn};

use super::cached_pc::CachedPC;
use super::level2::Level2Cache;
use super::metrics::{CacheMetrics, MetricsSnapshot};
use super::unique_key::CacheUniqueKey;
use crate::config::CacheConfig;
use crate::domain::{ClassMeta, Identity};
use crate::error::{Error, Result};

/// External key/value cache, addressed by store name
pub trait CacheProvider: Send + Sync {
    /// Make sure a store exists
    fn create_store(&self, _store: &str) -> Result<()> {
        Ok(())
    }

    fn get(&self, store: &str, key: &str) -> Result<Option<Bytes>>;

    /// Store a value, expiring after `ttl` when given
    fn put(&self, store: &str, key: &str, data: Bytes, ttl: Option<Duration>) -> Result<()>;

    fn remove(&self, store: &str, key: &str) -> Result<bool>;

    fn clear(&self, store: &str) -> Result<()>;

    /// Keys of all live entries
    fn keys(&self, store: &str) -> Result<Vec<String>>;

    fn len(&self, store: &str) -> Result<usize>;
}

struct StoredValue {
    data: Bytes,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// In-process provider for tests and single-node deployments
#[derive(Default)]
pub struct InMemoryCacheProvider {
    /// store -> key -> value
    stores: DashMap<String, DashMap<String, StoredValue>>,
    reads: AtomicU64,
    writes: AtomicU64,
}

impl InMemoryCacheProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total (reads, writes) served
    pub fn operations(&self) -> (u64, u64) {
        (
            self.reads.load(Ordering::Relaxed),
            self.writes.load(Ordering::Relaxed),
        )
    }

    fn entries(&self, store: &str) -> Result<Ref<'_, String, DashMap<String, StoredValue>>> {
        self.stores
            .get(store)
            .ok_or_else(|| Error::Provider(format!("no store named '{}'", store)))
    }

    fn purge_expired(&self, store: &str) {
        if let Some(entries) = self.stores.get(store) {
            let now = Instant::now();
            entries.retain(|_, v| !v.is_expired(now));
        }
    }
}

impl CacheProvider for InMemoryCacheProvider {
    fn create_store(&self, store: &str) -> Result<()> {
        self.stores.entry(store.to_string()).or_default();
        Ok(())
    }

    fn get(&self, store: &str, key: &str) -> Result<Option<Bytes>> {
        self.reads.fetch_add(1, Ordering::Relaxed);

        let entries = self.entries(store)?;
        let expired = match entries.get(key) {
            Some(value) if !value.is_expired(Instant::now()) => return Ok(Some(value.data.clone())),
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.remove(key);
        }
        Ok(None)
    }

    fn put(&self, store: &str, key: &str, data: Bytes, ttl: Option<Duration>) -> Result<()> {
        self.writes.fetch_add(1, Ordering::Relaxed);

        self.entries(store)?.insert(
            key.to_string(),
            StoredValue {
                data,
                expires_at: ttl.map(|ttl| Instant::now() + ttl),
            },
        );
        Ok(())
    }

    fn remove(&self, store: &str, key: &str) -> Result<bool> {
        Ok(self.entries(store)?.remove(key).is_some())
    }

    fn clear(&self, store: &str) -> Result<()> {
        self.entries(store)?.clear();
        Ok(())
    }

    fn keys(&self, store: &str) -> Result<Vec<String>> {
        self.purge_expired(store);
        Ok(self.entries(store)?.iter().map(|e| e.key().clone()).collect())
    }

    fn len(&self, store: &str) -> Result<usize> {
        self.purge_expired(store);
        Ok(self.entries(store)?.len())
    }
}

/// Level-2 cache stored in a [`CacheProvider`]
pub struct ProviderLevel2Cache {
    provider: Arc<dyn CacheProvider>,
    store: String,
    unique_store: String,
    max_size: Option<usize>,
    clear_at_close: bool,
    ttl: Option<Duration>,
    metrics: CacheMetrics,
}

impl std::fmt::Debug for ProviderLevel2Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderLevel2Cache")
            .field("store", &self.store)
            .field("max_size", &self.max_size)
            .finish()
    }
}

impl ProviderLevel2Cache {
    /// Bind to the store named by `config.cache_name`
    pub fn new(config: &CacheConfig, provider: Arc<dyn CacheProvider>) -> Result<Self> {
        let store = config.cache_name.trim();
        if store.is_empty() {
            return Err(Error::Config(
                "provider-backed level2 cache requires a cache name".to_string(),
            ));
        }
        let unique_store = format!("{}.unique", store);
        provider.create_store(store)?;
        provider.create_store(&unique_store)?;

        info!(
            "Creating provider level2 cache on store '{}' (expiry={:?})",
            store,
            config.expiry_timeout()
        );
        Ok(Self {
            provider,
            store: store.to_string(),
            unique_store,
            max_size: config.max_size,
            clear_at_close: config.clear_at_close,
            ttl: config.expiry_timeout(),
            metrics: CacheMetrics::new(),
        })
    }

    /// Backed by a fresh [`InMemoryCacheProvider`]
    pub fn in_memory(config: &CacheConfig) -> Result<Self> {
        Self::new(config, Arc::new(InMemoryCacheProvider::new()))
    }

    pub fn store_name(&self) -> &str {
        &self.store
    }

    fn id_key(id: &Identity) -> Result<String> {
        Ok(serde_json::to_string(id)?)
    }

    /// Encodes the full (class, names, typed values) tuple, so keys that
    /// differ only in value type or that merely print alike stay apart
    fn unique_key(key: &CacheUniqueKey) -> Result<String> {
        Ok(serde_json::to_string(&(
            key.class_name(),
            key.field_names(),
            key.field_values(),
        ))?)
    }

    fn remove_entry(&self, store: &str, key: &str) {
        if let Err(e) = self.provider.remove(store, key) {
            warn!("Failed to remove '{}' from provider store '{}': {}", key, store, e);
        }
    }

    fn encode(pc: &CachedPC) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(pc)?))
    }

    fn decode(data: &[u8]) -> Result<CachedPC> {
        Ok(serde_json::from_slice(data)?)
    }

    fn load(&self, store: &str, key: &str) -> Option<CachedPC> {
        match self.provider.get(store, key) {
            Ok(Some(data)) => match Self::decode(&data) {
                Ok(pc) => Some(pc),
                Err(e) => {
                    warn!("Dropping undecodable entry '{}' from store '{}': {}", key, store, e);
                    self.remove_entry(store, key);
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!("Cache provider read of '{}' failed: {}", key, e);
                None
            }
        }
    }

    fn store_pc(&self, store: &str, key: &str, pc: &CachedPC) -> Result<()> {
        let data = Self::encode(pc)?;
        self.provider.put(store, key, data, self.ttl)
    }

    fn remove_matching<F>(&self, store: &str, pred: F) -> usize
    where
        F: Fn(&CachedPC) -> bool,
    {
        let keys = match self.provider.keys(store) {
            Ok(keys) => keys,
            Err(e) => {
                warn!("Cache provider key listing of '{}' failed: {}", store, e);
                return 0;
            }
        };
        let victims: Vec<String> = keys
            .into_iter()
            .filter(|key| self.load(store, key).is_some_and(|pc| pred(&pc)))
            .collect();
        for key in &victims {
            self.remove_entry(store, key);
        }
        victims.len()
    }
}

impl Level2Cache for ProviderLevel2Cache {
    fn close(&self) {
        if self.clear_at_close {
            self.evict_all();
        }
        info!("Closed provider level2 cache '{}'", self.store);
    }

    fn evict(&self, id: &Identity) {
        let removed = Self::id_key(id).and_then(|key| self.provider.remove(&self.store, &key));
        match removed {
            Ok(true) => self.metrics.record_evictions(1),
            Ok(false) => {}
            Err(e) => warn!("Failed to evict {} from provider cache: {}", id, e),
        }
    }

    fn evict_all(&self) {
        let count = self.size();
        for store in [&self.store, &self.unique_store] {
            if let Err(e) = self.provider.clear(store) {
                warn!("Failed to clear provider store '{}': {}", store, e);
            }
        }
        self.metrics.record_evictions(count as u64);
    }

    fn evict_all_of_class(&self, class: &ClassMeta, include_subclasses: bool) {
        let matches = |pc: &CachedPC| {
            class.name() == pc.class_name()
                || (include_subclasses && class.is_assignable_from(pc.object_class()))
        };
        let count = self.remove_matching(&self.store, matches);
        self.remove_matching(&self.unique_store, matches);
        self.metrics.record_evictions(count as u64);
        debug!("Evicted {} objects of class {} from provider cache", count, class.name());
    }

    fn size(&self) -> usize {
        self.provider.len(&self.store).unwrap_or_else(|e| {
            warn!("Cache provider size query failed: {}", e);
            0
        })
    }

    fn contains_key(&self, id: &Identity) -> bool {
        Self::id_key(id)
            .and_then(|key| self.provider.get(&self.store, &key))
            .map(|data| data.is_some())
            .unwrap_or(false)
    }

    fn get(&self, id: &Identity) -> Option<Arc<CachedPC>> {
        let found = match Self::id_key(id) {
            Ok(key) => self.load(&self.store, &key),
            Err(e) => {
                warn!("Cannot encode identity {}: {}", id, e);
                None
            }
        };
        match found {
            Some(pc) => {
                self.metrics.record_hit();
                Some(Arc::new(pc))
            }
            None => {
                self.metrics.record_miss();
                None
            }
        }
    }

    fn put(&self, id: Identity, pc: CachedPC) -> Option<Arc<CachedPC>> {
        if let Some(max) = self.max_size {
            if self.size() >= max {
                self.metrics.record_rejected_put();
                debug!("Provider cache '{}' full, dropping put of {}", self.store, id);
                return None;
            }
        }

        let key = match Self::id_key(&id) {
            Ok(key) => key,
            Err(e) => {
                warn!("Cannot encode identity {}: {}", id, e);
                return None;
            }
        };
        let previous = self.load(&self.store, &key);
        if let Err(e) = self.store_pc(&self.store, &key, &pc) {
            warn!("Failed to put {} into provider cache: {}", id, e);
            return None;
        }
        self.metrics.record_put();
        previous.map(Arc::new)
    }

    fn get_unique(&self, key: &CacheUniqueKey) -> Option<Arc<CachedPC>> {
        let found = match Self::unique_key(key) {
            Ok(store_key) => self.load(&self.unique_store, &store_key),
            Err(e) => {
                warn!("Cannot encode unique key {}: {}", key, e);
                None
            }
        };
        match &found {
            Some(_) => self.metrics.record_hit(),
            None => self.metrics.record_miss(),
        }
        found.map(Arc::new)
    }

    fn put_unique(&self, key: CacheUniqueKey, pc: CachedPC) -> Option<Arc<CachedPC>> {
        let store_key = match Self::unique_key(&key) {
            Ok(store_key) => store_key,
            Err(e) => {
                warn!("Cannot encode unique key {}: {}", key, e);
                return None;
            }
        };
        let previous = self.load(&self.unique_store, &store_key);
        if let Err(e) = self.store_pc(&self.unique_store, &store_key, &pc) {
            warn!("Failed to put unique key {} into provider cache: {}", key, e);
            return None;
        }
        previous.map(Arc::new)
    }

    fn remove_unique(&self, key: &CacheUniqueKey) {
        match Self::unique_key(key).and_then(|k| self.provider.remove(&self.unique_store, &k)) {
            Ok(_) => {}
            Err(e) => warn!("Failed to remove unique key {} from provider cache: {}", key, e),
        }
    }

    fn stats(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}

// =============================================================================
// Tests
// =============================================================================
