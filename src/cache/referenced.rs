//! Reference-Backed Level-2 Caches
//!
//! Storage engine shared by the strong, soft and weak Level-2 caches.
//!
//! # Design
//!
//! - Pinned snapshots live in a strong map and are never reclaimed
//! - Unpinned snapshots and the unique-key index follow the cache's
//!   reference policy
//! - Pin sets and value maps share one lock, so a put can never race a
//!   class being pinned
//! - `max_size` is a hard cap: once full, puts are dropped, not evicted for

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{debug, info};

use super::cached_pc::CachedPC;
use super::level2::Level2Cache;
use super::metrics::{CacheMetrics, MetricsSnapshot};
use super::reference::{MemoryPressure, RefMap, ReferencePolicy, Soft, Strong, Weak};
use super::unique_key::CacheUniqueKey;
use crate::config::CacheConfig;
use crate::domain::{ClassMeta, Identity};

/// Level-2 cache holding unpinned snapshots under soft references
pub type SoftLevel2Cache = ReferencedLevel2Cache<Soft>;

/// Level-2 cache holding unpinned snapshots under weak references
pub type WeakLevel2Cache = ReferencedLevel2Cache<Weak>;

/// Level-2 cache that never reclaims
pub type StrongLevel2Cache = ReferencedLevel2Cache<Strong>;

/// Class-level pin rule
#[derive(Debug, Clone)]
struct PinnedClass {
    class: Arc<ClassMeta>,
    subclasses: bool,
}

impl PinnedClass {
    fn matches(&self, cls: &ClassMeta) -> bool {
        self.class.name() == cls.name() || (self.subclasses && self.class.is_assignable_from(cls))
    }
}

fn class_matches(target: &ClassMeta, include_subclasses: bool, cls: &ClassMeta) -> bool {
    target.name() == cls.name() || (include_subclasses && target.is_assignable_from(cls))
}

struct Inner<R: ReferencePolicy> {
    pinned: RefMap<Identity, CachedPC, Strong>,
    unpinned: RefMap<Identity, CachedPC, R>,
    unique: RefMap<CacheUniqueKey, CachedPC, R>,
    pinned_classes: Vec<PinnedClass>,
    pinned_ids: HashSet<Identity>,
}

impl<R: ReferencePolicy> Inner<R> {
    fn new() -> Self {
        Self {
            pinned: RefMap::new(),
            unpinned: RefMap::new(),
            unique: RefMap::new(),
            pinned_classes: Vec::new(),
            pinned_ids: HashSet::new(),
        }
    }

    fn size(&self) -> usize {
        self.pinned.len() + self.unpinned.len()
    }

    fn class_is_pinned(&self, cls: &ClassMeta) -> bool {
        self.pinned_classes.iter().any(|p| p.matches(cls))
    }

    /// Move an unpinned snapshot into the pinned map
    fn promote(&mut self, id: &Identity) -> bool {
        match self.unpinned.remove(id) {
            Some(pc) => {
                self.pinned.insert(id.clone(), pc);
                true
            }
            None => false,
        }
    }

    /// Move a pinned snapshot back under the reference policy
    fn demote(&mut self, id: &Identity) -> bool {
        match self.pinned.remove(id) {
            Some(pc) => {
                self.unpinned.insert(id.clone(), pc);
                true
            }
            None => false,
        }
    }
}

/// Level-2 cache over reference-policy maps with pinning support
pub struct ReferencedLevel2Cache<R: ReferencePolicy> {
    inner: RwLock<Inner<R>>,
    max_size: Option<usize>,
    clear_at_close: bool,
    soft_idle: Duration,
    reclaim_interval: usize,
    puts_since_reclaim: AtomicUsize,
    metrics: CacheMetrics,
}

impl<R: ReferencePolicy> ReferencedLevel2Cache<R> {
    /// Create a cache from configuration
    pub fn new(config: &CacheConfig) -> Self {
        info!(
            "Creating {} level2 cache (max_size={:?}, clear_at_close={})",
            R::NAME,
            config.max_size,
            config.clear_at_close
        );
        Self {
            inner: RwLock::new(Inner::new()),
            max_size: config.max_size,
            clear_at_close: config.clear_at_close,
            soft_idle: config.soft_idle_timeout(),
            reclaim_interval: config.reclaim_interval.max(1),
            puts_since_reclaim: AtomicUsize::new(0),
            metrics: CacheMetrics::new(),
        }
    }

    /// Reference policy name
    pub fn policy_name(&self) -> &'static str {
        R::NAME
    }

    /// Whether this identity is pinned individually
    pub fn is_id_pinned(&self, id: &Identity) -> bool {
        self.inner.read().pinned_ids.contains(id)
    }

    fn reclaim_locked(&self, inner: &mut Inner<R>, pressure: MemoryPressure) -> usize {
        let dropped = inner.unpinned.reclaim(pressure, self.soft_idle).len()
            + inner.unique.reclaim(pressure, self.soft_idle).len();
        if dropped > 0 {
            self.metrics.record_reclaimed(dropped as u64);
            debug!("Reclaimed {} {} level2 cache entries", dropped, R::NAME);
        }
        dropped
    }

    fn maybe_reclaim(&self, inner: &mut Inner<R>) {
        let puts = self.puts_since_reclaim.fetch_add(1, Ordering::Relaxed) + 1;
        if puts >= self.reclaim_interval {
            self.puts_since_reclaim.store(0, Ordering::Relaxed);
            self.reclaim_locked(inner, MemoryPressure::Normal);
        }
    }
}

impl<R: ReferencePolicy> Level2Cache for ReferencedLevel2Cache<R> {
    fn close(&self) {
        if self.clear_at_close {
            self.evict_all();
        }
        info!("Closed {} level2 cache", R::NAME);
    }

    fn evict(&self, id: &Identity) {
        let mut inner = self.inner.write();
        let removed = inner.unpinned.remove(id).is_some() | inner.pinned.remove(id).is_some();
        if removed {
            self.metrics.record_evictions(1);
            debug!("Evicted {} from level2 cache", id);
        }
    }

    fn evict_all(&self) {
        let mut inner = self.inner.write();
        let count = inner.size();
        inner.unpinned.clear();
        inner.pinned.clear();
        inner.unique.clear();
        self.metrics.record_evictions(count as u64);
        debug!("Evicted all {} objects from level2 cache", count);
    }

    fn evict_all_of_class(&self, class: &ClassMeta, include_subclasses: bool) {
        let mut inner = self.inner.write();
        let matches = |pc: &CachedPC| class_matches(class, include_subclasses, pc.object_class());

        let unpinned = inner.unpinned.keys_where(matches);
        let pinned = inner.pinned.keys_where(matches);
        let unique = inner.unique.keys_where(matches);

        for id in &unpinned {
            inner.unpinned.remove(id);
        }
        for id in &pinned {
            inner.pinned.remove(id);
        }
        for key in &unique {
            inner.unique.remove(key);
        }

        let count = unpinned.len() + pinned.len();
        self.metrics.record_evictions(count as u64);
        debug!(
            "Evicted {} objects of class {} (subclasses={}) from level2 cache",
            count,
            class.name(),
            include_subclasses
        );
    }

    fn pin(&self, id: &Identity) {
        let mut inner = self.inner.write();
        inner.pinned_ids.insert(id.clone());
        inner.promote(id);
        self.metrics.record_pin();
        debug!("Pinned {} in level2 cache", id);
    }

    fn pin_all_of_class(&self, class: &Arc<ClassMeta>, include_subclasses: bool) {
        let mut inner = self.inner.write();
        let rule = PinnedClass {
            class: Arc::clone(class),
            subclasses: include_subclasses,
        };
        let exists = inner
            .pinned_classes
            .iter()
            .any(|p| p.class.name() == class.name() && p.subclasses == include_subclasses);
        if !exists {
            inner.pinned_classes.push(rule.clone());
        }

        // Retroactively pin what is already cached
        let ids = inner.unpinned.keys_where(|pc| rule.matches(pc.object_class()));
        for id in &ids {
            inner.promote(id);
        }
        self.metrics.record_pin();
        debug!(
            "Pinned class {} (subclasses={}), promoted {} cached objects",
            class.name(),
            include_subclasses,
            ids.len()
        );
    }

    fn unpin(&self, id: &Identity) {
        let mut inner = self.inner.write();
        inner.demote(id);
        inner.pinned_ids.remove(id);
        self.metrics.record_unpin();
        debug!("Unpinned {} in level2 cache", id);
    }

    fn unpin_all_of_class(&self, class: &ClassMeta, include_subclasses: bool) {
        let mut inner = self.inner.write();
        inner
            .pinned_classes
            .retain(|p| !(p.class.name() == class.name() && p.subclasses == include_subclasses));

        // Individually pinned ids and objects still covered by another rule stay pinned
        let candidates = inner
            .pinned
            .keys_where(|pc| class_matches(class, include_subclasses, pc.object_class()));
        let mut demoted = 0;
        for id in candidates {
            if inner.pinned_ids.contains(&id) {
                continue;
            }
            let still_pinned = inner
                .pinned
                .get(&id)
                .map(|pc| inner.class_is_pinned(pc.object_class()))
                .unwrap_or(false);
            if !still_pinned && inner.demote(&id) {
                demoted += 1;
            }
        }
        self.metrics.record_unpin();
        debug!(
            "Unpinned class {} (subclasses={}), demoted {} cached objects",
            class.name(),
            include_subclasses,
            demoted
        );
    }

    fn number_of_pinned_objects(&self) -> usize {
        self.inner.read().pinned.len()
    }

    fn number_of_unpinned_objects(&self) -> usize {
        self.inner.read().unpinned.len()
    }

    fn size(&self) -> usize {
        self.inner.read().size()
    }

    fn contains_key(&self, id: &Identity) -> bool {
        let inner = self.inner.read();
        inner.pinned.contains_key(id) || inner.unpinned.contains_key(id)
    }

    fn get(&self, id: &Identity) -> Option<Arc<CachedPC>> {
        let inner = self.inner.read();
        let found = inner.pinned.get(id).or_else(|| inner.unpinned.get(id));
        match &found {
            Some(_) => {
                self.metrics.record_hit();
                debug!("Level2 cache hit for {}", id);
            }
            None => {
                self.metrics.record_miss();
                debug!("Level2 cache miss for {}", id);
            }
        }
        found
    }

    fn put(&self, id: Identity, pc: CachedPC) -> Option<Arc<CachedPC>> {
        let mut inner = self.inner.write();

        if let Some(max) = self.max_size {
            if inner.size() >= max {
                self.metrics.record_rejected_put();
                debug!("Level2 cache full ({} objects), dropping put of {}", max, id);
                return None;
            }
        }

        let to_be_pinned =
            inner.class_is_pinned(pc.object_class()) || inner.pinned_ids.contains(&id);
        let pc = Arc::new(pc);

        let previous = if inner.pinned.contains_key(&id) {
            inner.pinned.insert(id.clone(), pc)
        } else if to_be_pinned {
            let previous = inner.unpinned.remove(&id);
            inner.pinned.insert(id.clone(), pc);
            previous
        } else {
            inner.unpinned.insert(id.clone(), pc)
        };

        self.metrics.record_put();
        debug!("Put {} into level2 cache (pinned={})", id, to_be_pinned);
        self.maybe_reclaim(&mut inner);
        previous
    }

    fn get_unique(&self, key: &CacheUniqueKey) -> Option<Arc<CachedPC>> {
        let found = self.inner.read().unique.get(key);
        match &found {
            Some(_) => self.metrics.record_hit(),
            None => self.metrics.record_miss(),
        }
        found
    }

    fn put_unique(&self, key: CacheUniqueKey, pc: CachedPC) -> Option<Arc<CachedPC>> {
        let mut inner = self.inner.write();
        debug!("Put unique key {} into level2 cache", key);
        inner.unique.insert(key, Arc::new(pc))
    }

    fn remove_unique(&self, key: &CacheUniqueKey) {
        self.inner.write().unique.remove(key);
    }

    fn reclaim(&self, pressure: MemoryPressure) -> usize {
        let mut inner = self.inner.write();
        self.reclaim_locked(&mut inner, pressure)
    }

    fn stats(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::FieldMeta;

    fn classes() -> (Arc<ClassMeta>, Arc<ClassMeta>, Arc<ClassMeta>) {
        let vehicle = ClassMeta::builder("Vehicle")
            .field(FieldMeta::new("make"))
            .build();
        let car = ClassMeta::builder("Car")
            .extends(&vehicle)
            .field(FieldMeta::new("doors"))
            .build();
        let person = ClassMeta::builder("Person")
            .field(FieldMeta::new("name"))
            .build();
        (vehicle, car, person)
    }

    fn snapshot(class: &Arc<ClassMeta>, key: i64) -> (Identity, CachedPC) {
        let id = Identity::datastore(class.name(), key);
        let pc = CachedPC::new(Arc::clone(class), vec![], None, Some(id.clone()));
        (id, pc)
    }

    fn config() -> CacheConfig {
        CacheConfig {
            soft_idle_millis: 60_000,
            ..Default::default()
        }
    }

    #[test]
    fn test_put_get_evict() {
        let cache = SoftLevel2Cache::new(&config());
        let (_, _, person) = classes();
        let (id, pc) = snapshot(&person, 1);

        assert!(cache.put(id.clone(), pc.clone()).is_none());
        assert_eq!(cache.size(), 1);
        assert!(cache.contains_key(&id));
        assert_eq!(cache.get(&id).as_deref(), Some(&pc));

        let previous = cache.put(id.clone(), pc.clone());
        assert!(previous.is_some());
        assert_eq!(cache.size(), 1);

        cache.evict(&id);
        assert!(cache.get(&id).is_none());
        assert!(cache.is_empty());

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.evictions, 1);
    }

    #[test]
    fn test_max_size_is_hard_cap() {
        let config = CacheConfig {
            max_size: Some(2),
            ..config()
        };
        let cache = StrongLevel2Cache::new(&config);
        let (_, _, person) = classes();

        for key in 0..2 {
            let (id, pc) = snapshot(&person, key);
            cache.put(id, pc);
        }
        assert_eq!(cache.size(), 2);

        let (id, pc) = snapshot(&person, 2);
        assert!(cache.put(id.clone(), pc).is_none());
        assert_eq!(cache.size(), 2);
        assert!(!cache.contains_key(&id));

        // Replacing an existing entry is dropped too once the cap is reached
        let (existing, pc) = snapshot(&person, 0);
        assert!(cache.put(existing, pc).is_none());
        assert_eq!(cache.stats().rejected_puts, 2);
    }

    #[test]
    fn test_pin_single_id_survives_reclaim() {
        let cache = SoftLevel2Cache::new(&config());
        let (_, _, person) = classes();
        let (id1, pc1) = snapshot(&person, 1);
        let (id2, pc2) = snapshot(&person, 2);
        cache.put(id1.clone(), pc1);
        cache.put(id2.clone(), pc2);

        cache.pin(&id1);
        assert_eq!(cache.number_of_pinned_objects(), 1);
        assert_eq!(cache.number_of_unpinned_objects(), 1);

        assert_eq!(cache.reclaim(MemoryPressure::High), 1);
        assert!(cache.contains_key(&id1));
        assert!(!cache.contains_key(&id2));

        cache.unpin(&id1);
        assert_eq!(cache.number_of_pinned_objects(), 0);
        assert_eq!(cache.reclaim(MemoryPressure::High), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_pinned_id_applies_to_future_puts() {
        let cache = WeakLevel2Cache::new(&config());
        let (_, _, person) = classes();
        let (id, pc) = snapshot(&person, 7);

        cache.pin(&id);
        assert!(cache.is_id_pinned(&id));
        cache.put(id.clone(), pc);
        assert_eq!(cache.number_of_pinned_objects(), 1);
        assert_eq!(cache.reclaim(MemoryPressure::Normal), 0);
    }

    #[test]
    fn test_pin_class_with_subclasses() {
        let cache = WeakLevel2Cache::new(&config());
        let (vehicle, car, person) = classes();

        let (car_id, car_pc) = snapshot(&car, 1);
        let (person_id, person_pc) = snapshot(&person, 1);
        cache.put(car_id.clone(), car_pc);
        cache.put(person_id.clone(), person_pc);

        cache.pin_all_of_class(&vehicle, true);
        assert_eq!(cache.number_of_pinned_objects(), 1);

        // Weak entries with no outside holder are reclaimed; the car is pinned
        assert_eq!(cache.reclaim(MemoryPressure::Normal), 1);
        assert!(cache.contains_key(&car_id));
        assert!(!cache.contains_key(&person_id));

        // Future puts of a subclass are pinned on arrival
        let (car2_id, car2_pc) = snapshot(&car, 2);
        cache.put(car2_id.clone(), car2_pc);
        assert_eq!(cache.number_of_pinned_objects(), 2);

        cache.unpin_all_of_class(&vehicle, true);
        assert_eq!(cache.number_of_pinned_objects(), 0);
        assert_eq!(cache.reclaim(MemoryPressure::Normal), 2);
    }

    #[test]
    fn test_pin_class_without_subclasses_ignores_subclass() {
        let cache = StrongLevel2Cache::new(&config());
        let (vehicle, car, _) = classes();
        let (car_id, car_pc) = snapshot(&car, 1);
        let (vehicle_id, vehicle_pc) = snapshot(&vehicle, 1);
        cache.put(car_id, car_pc);
        cache.put(vehicle_id, vehicle_pc);

        cache.pin_all_of_class(&vehicle, false);
        assert_eq!(cache.number_of_pinned_objects(), 1);
    }

    #[test]
    fn test_unpin_class_keeps_individually_pinned_ids() {
        let cache = SoftLevel2Cache::new(&config());
        let (_, _, person) = classes();
        let (id1, pc1) = snapshot(&person, 1);
        let (id2, pc2) = snapshot(&person, 2);
        cache.put(id1.clone(), pc1);
        cache.put(id2.clone(), pc2);

        cache.pin(&id1);
        cache.pin_all_of_class(&person, false);
        assert_eq!(cache.number_of_pinned_objects(), 2);

        cache.unpin_all_of_class(&person, false);
        assert_eq!(cache.number_of_pinned_objects(), 1);
        assert!(cache.is_id_pinned(&id1));
    }

    #[test]
    fn test_evict_all_of_class() {
        let cache = StrongLevel2Cache::new(&config());
        let (vehicle, car, person) = classes();
        for key in 0..3 {
            let (id, pc) = snapshot(&car, key);
            cache.put(id, pc);
            let (id, pc) = snapshot(&vehicle, key);
            cache.put(id, pc);
            let (id, pc) = snapshot(&person, key);
            cache.put(id, pc);
        }
        let (pinned_car, _) = snapshot(&car, 0);
        cache.pin(&pinned_car);

        cache.evict_all_of_class(&vehicle, false);
        assert_eq!(cache.size(), 6);

        cache.evict_all_of_class(&vehicle, true);
        assert_eq!(cache.size(), 3);
        assert_eq!(cache.number_of_pinned_objects(), 0);
    }

    #[test]
    fn test_unique_keys() {
        let cache = SoftLevel2Cache::new(&config());
        let (_, _, person) = classes();
        let (_, pc) = snapshot(&person, 1);
        let key = CacheUniqueKey::new("Person", [("name", "Ann")]);

        assert!(cache.get_unique(&key).is_none());
        cache.put_unique(key.clone(), pc.clone());
        assert_eq!(cache.get_unique(&key).as_deref(), Some(&pc));

        cache.remove_unique(&key);
        assert!(cache.get_unique(&key).is_none());
    }

    #[test]
    fn test_close_clears_when_configured() {
        let (_, _, person) = classes();

        let cache = StrongLevel2Cache::new(&config());
        let (id, pc) = snapshot(&person, 1);
        cache.put(id, pc);
        cache.close();
        assert!(cache.is_empty());

        let keep = CacheConfig {
            clear_at_close: false,
            ..config()
        };
        let cache = StrongLevel2Cache::new(&keep);
        let (id, pc) = snapshot(&person, 1);
        cache.put(id, pc);
        cache.close();
        assert_eq!(cache.size(), 1);
    }

    #[test]
    fn test_opportunistic_reclaim() {
        let config = CacheConfig {
            reclaim_interval: 4,
            ..config()
        };
        let cache = WeakLevel2Cache::new(&config);
        let (_, _, person) = classes();
        for key in 0..4 {
            let (id, pc) = snapshot(&person, key);
            cache.put(id, pc);
        }
        // The fourth put triggered a sweep over unreferenced weak entries
        assert!(cache.is_empty());
        assert_eq!(cache.stats().reclaimed, 4);
    }

    #[test]
    fn test_get_all_and_evict_all_ids() {
        let cache = StrongLevel2Cache::new(&config());
        let (_, _, person) = classes();
        let ids: Vec<Identity> = (0..3)
            .map(|key| {
                let (id, pc) = snapshot(&person, key);
                cache.put(id.clone(), pc);
                id
            })
            .collect();

        let missing = Identity::datastore("Person", 99);
        let mut wanted = ids.clone();
        wanted.push(missing.clone());
        let found = cache.get_all(&wanted);
        assert_eq!(found.len(), 3);
        assert!(!found.contains_key(&missing));

        cache.evict_all_ids(&ids[..2]);
        assert_eq!(cache.size(), 1);
    }

    #[test]
    fn test_concurrent_access() {
        use std::thread;

        let cache = Arc::new(SoftLevel2Cache::new(&config()));
        let (_, _, person) = classes();

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let cache = Arc::clone(&cache);
                let person = Arc::clone(&person);
                thread::spawn(move || {
                    for i in 0..500 {
                        let (id, pc) = snapshot(&person, t * 1000 + i);
                        cache.put(id.clone(), pc);
                        cache.get(&id);
                        if i % 10 == 0 {
                            cache.pin(&id);
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(cache.size(), 4000);
        assert_eq!(cache.number_of_pinned_objects(), 400);
    }
}
