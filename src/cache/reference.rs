//! Reference-Strength Storage
//!
//! Rust has no tracing garbage collector, so the soft and weak reference
//! semantics of the cache maps are expressed as an explicit reclaim cycle:
//! a [`RefMap`] holds every value behind an `Arc` and, when asked to
//! reclaim, drops the entries its [`ReferencePolicy`] considers collectable.
//!
//! - [`Strong`]: never collected.
//! - [`Soft`]: collected when idle past the soft timeout, or on any cycle
//!   under [`MemoryPressure::High`].
//! - [`Weak`]: collected on any cycle when the map holds the only reference.

use std::collections::HashMap;
use std::hash::Hash;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Memory pressure seen by a reclaim cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryPressure {
    Normal,
    High,
}

/// Reclaim state of one entry
#[derive(Debug, Clone, Copy)]
pub struct ReclaimCandidate {
    /// Someone outside the map still holds the value
    pub shared: bool,
    /// Time since the entry was last read or written
    pub idle: Duration,
}

/// Reference strength of a cache map
pub trait ReferencePolicy: Send + Sync + 'static {
    const NAME: &'static str;

    fn is_reclaimable(candidate: ReclaimCandidate, pressure: MemoryPressure, soft_idle: Duration) -> bool;
}

/// Entries stay until removed explicitly
#[derive(Debug, Clone, Copy, Default)]
pub struct Strong;

/// Entries survive until memory is tight or they go stale
#[derive(Debug, Clone, Copy, Default)]
pub struct Soft;

/// Entries survive only while referenced elsewhere
#[derive(Debug, Clone, Copy, Default)]
pub struct Weak;

impl ReferencePolicy for Strong {
    const NAME: &'static str = "strong";

    fn is_reclaimable(_: ReclaimCandidate, _: MemoryPressure, _: Duration) -> bool {
        false
    }
}

impl ReferencePolicy for Soft {
    const NAME: &'static str = "soft";

    fn is_reclaimable(candidate: ReclaimCandidate, pressure: MemoryPressure, soft_idle: Duration) -> bool {
        pressure == MemoryPressure::High || candidate.idle >= soft_idle
    }
}

impl ReferencePolicy for Weak {
    const NAME: &'static str = "weak";

    fn is_reclaimable(candidate: ReclaimCandidate, _: MemoryPressure, _: Duration) -> bool {
        !candidate.shared
    }
}

struct RefEntry<V: ?Sized> {
    value: Arc<V>,
    /// Milliseconds since the owning map's epoch
    last_access: AtomicU64,
}

/// Map whose entries are subject to a reference policy.
///
/// Not synchronized: owners wrap it in their own lock.
pub struct RefMap<K, V: ?Sized, R> {
    entries: HashMap<K, RefEntry<V>>,
    epoch: Instant,
    _policy: PhantomData<fn() -> R>,
}

impl<K, V: ?Sized, R> Default for RefMap<K, V, R> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            epoch: Instant::now(),
            _policy: PhantomData,
        }
    }
}

impl<K, V, R> RefMap<K, V, R>
where
    K: Eq + Hash + Clone,
    V: ?Sized,
    R: ReferencePolicy,
{
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    fn now_millis(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Get a value, refreshing its access time
    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        let entry = self.entries.get(key)?;
        entry.last_access.store(self.now_millis(), Ordering::Relaxed);
        Some(Arc::clone(&entry.value))
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Insert a value, returning the previous one
    pub fn insert(&mut self, key: K, value: Arc<V>) -> Option<Arc<V>> {
        let entry = RefEntry {
            value,
            last_access: AtomicU64::new(self.now_millis()),
        };
        self.entries.insert(key, entry).map(|old| old.value)
    }

    pub fn remove(&mut self, key: &K) -> Option<Arc<V>> {
        self.entries.remove(key).map(|e| e.value)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn keys(&self) -> Vec<K> {
        self.entries.keys().cloned().collect()
    }

    /// Iterate without refreshing access times
    pub fn iter(&self) -> impl Iterator<Item = (&K, &Arc<V>)> {
        self.entries.iter().map(|(k, e)| (k, &e.value))
    }

    /// Keys whose values satisfy `pred`, collected before any removal
    pub fn keys_where<F>(&self, mut pred: F) -> Vec<K>
    where
        F: FnMut(&V) -> bool,
    {
        self.entries
            .iter()
            .filter(|(_, e)| pred(&e.value))
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Drop every entry the policy deems collectable, returning their keys
    pub fn reclaim(&mut self, pressure: MemoryPressure, soft_idle: Duration) -> Vec<K> {
        let now = self.now_millis();
        let victims: Vec<K> = self
            .entries
            .iter()
            .filter(|(_, e)| {
                let candidate = ReclaimCandidate {
                    shared: Arc::strong_count(&e.value) > 1,
                    idle: Duration::from_millis(
                        now.saturating_sub(e.last_access.load(Ordering::Relaxed)),
                    ),
                };
                R::is_reclaimable(candidate, pressure, soft_idle)
            })
            .map(|(k, _)| k.clone())
            .collect();

        for key in &victims {
            self.entries.remove(key);
        }
        victims
    }
}

// =============================================================================
// Tests
// =============================================================================
