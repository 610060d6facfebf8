//! Level-2 Cache Contract
//!
//! The Level-2 cache is shared by every session of a persistence unit and
//! holds [`CachedPC`] snapshots keyed by identity, plus an optional index of
//! snapshots by unique key. It is a best-effort side cache: any `get` may
//! miss and any `put` may be dropped.

use std::collections::HashMap;
use std::sync::Arc;

use super::cached_pc::CachedPC;
use super::metrics::MetricsSnapshot;
use super::reference::MemoryPressure;
use super::unique_key::CacheUniqueKey;
use crate::domain::{ClassMeta, Identity};

/// Shared, process-wide object cache
pub trait Level2Cache: Send + Sync {
    /// Release resources; clears the cache when configured to
    fn close(&self);

    /// Evict the object with this identity
    fn evict(&self, id: &Identity);

    /// Evict every object
    fn evict_all(&self);

    fn evict_all_ids(&self, ids: &[Identity]) {
        for id in ids {
            self.evict(id);
        }
    }

    /// Evict every object of `class` (and optionally its subclasses)
    fn evict_all_of_class(&self, class: &ClassMeta, include_subclasses: bool);

    /// Keep this object strongly referenced until unpinned or evicted
    fn pin(&self, _id: &Identity) {}

    fn pin_all_ids(&self, ids: &[Identity]) {
        for id in ids {
            self.pin(id);
        }
    }

    /// Pin current and future objects of `class` (and optionally subclasses)
    fn pin_all_of_class(&self, _class: &Arc<ClassMeta>, _include_subclasses: bool) {}

    fn unpin(&self, _id: &Identity) {}

    fn unpin_all_ids(&self, ids: &[Identity]) {
        for id in ids {
            self.unpin(id);
        }
    }

    fn unpin_all_of_class(&self, _class: &ClassMeta, _include_subclasses: bool) {}

    fn number_of_pinned_objects(&self) -> usize {
        0
    }

    fn number_of_unpinned_objects(&self) -> usize {
        0
    }

    /// Number of cached objects (pinned and unpinned)
    fn size(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.size() == 0
    }

    fn contains_key(&self, id: &Identity) -> bool;

    /// Snapshot for an identity. The returned snapshot is shared; use
    /// [`CachedPC::get_copy`] for a private mutable copy.
    fn get(&self, id: &Identity) -> Option<Arc<CachedPC>>;

    /// Snapshots for several identities; misses are absent from the result
    fn get_all(&self, ids: &[Identity]) -> HashMap<Identity, Arc<CachedPC>> {
        ids.iter()
            .filter_map(|id| self.get(id).map(|pc| (id.clone(), pc)))
            .collect()
    }

    /// Store a snapshot, returning the one it replaced. A full cache drops
    /// the put and returns `None`.
    fn put(&self, id: Identity, pc: CachedPC) -> Option<Arc<CachedPC>>;

    fn put_all(&self, objects: Vec<(Identity, CachedPC)>) {
        for (id, pc) in objects {
            self.put(id, pc);
        }
    }

    fn get_unique(&self, key: &CacheUniqueKey) -> Option<Arc<CachedPC>>;

    fn put_unique(&self, key: CacheUniqueKey, pc: CachedPC) -> Option<Arc<CachedPC>>;

    fn put_unique_all(&self, objects: Vec<(CacheUniqueKey, CachedPC)>) {
        for (key, pc) in objects {
            self.put_unique(key, pc);
        }
    }

    fn remove_unique(&self, key: &CacheUniqueKey);

    fn remove_unique_all(&self, keys: &[CacheUniqueKey]) {
        for key in keys {
            self.remove_unique(key);
        }
    }

    /// Run a reclaim cycle, returning the number of entries dropped
    fn reclaim(&self, _pressure: MemoryPressure) -> usize {
        0
    }

    fn stats(&self) -> MetricsSnapshot {
        MetricsSnapshot::default()
    }
}
