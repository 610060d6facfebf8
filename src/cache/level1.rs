//! Level-1 (Session) Caches
//!
//! Each session keeps the managed objects it has touched in a Level-1 cache
//! so that repeated lookups of the same identity return the same instance.
//! Unlike the Level-2 cache it holds live objects, not snapshots.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::debug;

use super::reference::{MemoryPressure, RefMap, ReferencePolicy, Soft, Strong, Weak};
use super::unique_key::CacheUniqueKey;
use crate::config::{CacheConfig, Level1CacheType};
use crate::domain::{Identity, ObjectRef, StateManager};

/// Per-session object cache
pub trait Level1Cache: Send + Sync {
    /// Cache an object, returning the one it replaced
    fn put(&self, id: Identity, object: ObjectRef) -> Option<ObjectRef>;

    fn get(&self, id: &Identity) -> Option<ObjectRef>;

    fn remove(&self, id: &Identity) -> Option<ObjectRef>;

    fn contains_key(&self, id: &Identity) -> bool;

    fn clear(&self);

    fn size(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.size() == 0
    }

    fn get_unique(&self, key: &CacheUniqueKey) -> Option<ObjectRef>;

    fn put_unique(&self, key: CacheUniqueKey, object: ObjectRef) -> Option<ObjectRef>;

    fn remove_unique(&self, key: &CacheUniqueKey) -> Option<ObjectRef>;

    /// Run a reclaim cycle, returning the number of entries dropped
    fn reclaim(&self, _pressure: MemoryPressure) -> usize {
        0
    }
}

/// Level-1 cache that never drops objects on its own
pub type StrongRefCache = ReferencedLevel1Cache<Strong>;

/// Level-1 cache that drops idle objects or all objects under pressure
pub type SoftRefCache = ReferencedLevel1Cache<Soft>;

/// Level-1 cache that drops objects nobody else holds
pub type WeakRefCache = ReferencedLevel1Cache<Weak>;

struct Inner<R: ReferencePolicy> {
    objects: RefMap<Identity, dyn StateManager, R>,
    unique: RefMap<CacheUniqueKey, dyn StateManager, R>,
}

/// Level-1 cache over reference-policy maps
pub struct ReferencedLevel1Cache<R: ReferencePolicy> {
    inner: RwLock<Inner<R>>,
    soft_idle: Duration,
    reclaim_interval: usize,
    puts_since_reclaim: AtomicUsize,
}

impl<R: ReferencePolicy> ReferencedLevel1Cache<R> {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            inner: RwLock::new(Inner {
                objects: RefMap::new(),
                unique: RefMap::new(),
            }),
            soft_idle: config.soft_idle_timeout(),
            reclaim_interval: config.reclaim_interval.max(1),
            puts_since_reclaim: AtomicUsize::new(0),
        }
    }

    fn reclaim_locked(&self, inner: &mut Inner<R>, pressure: MemoryPressure) -> usize {
        let dropped = inner.objects.reclaim(pressure, self.soft_idle).len()
            + inner.unique.reclaim(pressure, self.soft_idle).len();
        if dropped > 0 {
            debug!("Reclaimed {} {} level1 cache entries", dropped, R::NAME);
        }
        dropped
    }
}

impl<R: ReferencePolicy> Level1Cache for ReferencedLevel1Cache<R> {
    fn put(&self, id: Identity, object: ObjectRef) -> Option<ObjectRef> {
        let mut inner = self.inner.write();
        let previous = inner.objects.insert(id, object);

        let puts = self.puts_since_reclaim.fetch_add(1, Ordering::Relaxed) + 1;
        if puts >= self.reclaim_interval {
            self.puts_since_reclaim.store(0, Ordering::Relaxed);
            self.reclaim_locked(&mut inner, MemoryPressure::Normal);
        }
        previous
    }

    fn get(&self, id: &Identity) -> Option<ObjectRef> {
        self.inner.read().objects.get(id)
    }

    fn remove(&self, id: &Identity) -> Option<ObjectRef> {
        self.inner.write().objects.remove(id)
    }

    fn contains_key(&self, id: &Identity) -> bool {
        self.inner.read().objects.contains_key(id)
    }

    fn clear(&self) {
        let mut inner = self.inner.write();
        inner.objects.clear();
        inner.unique.clear();
    }

    fn size(&self) -> usize {
        self.inner.read().objects.len()
    }

    fn get_unique(&self, key: &CacheUniqueKey) -> Option<ObjectRef> {
        self.inner.read().unique.get(key)
    }

    fn put_unique(&self, key: CacheUniqueKey, object: ObjectRef) -> Option<ObjectRef> {
        self.inner.write().unique.insert(key, object)
    }

    fn remove_unique(&self, key: &CacheUniqueKey) -> Option<ObjectRef> {
        self.inner.write().unique.remove(key)
    }

    fn reclaim(&self, pressure: MemoryPressure) -> usize {
        let mut inner = self.inner.write();
        self.reclaim_locked(&mut inner, pressure)
    }
}

/// Level-1 cache of the configured type
pub fn create_level1_cache(config: &CacheConfig) -> Arc<dyn Level1Cache> {
    match config.level1_type {
        Level1CacheType::Strong => Arc::new(StrongRefCache::new(config)),
        Level1CacheType::Soft => Arc::new(SoftRefCache::new(config)),
        Level1CacheType::Weak => Arc::new(WeakRefCache::new(config)),
    }
}

// =============================================================================
// Tests
// =============================================================================
