//! Level-2 cache that caches nothing
//!
//! Used when the Level-2 cache is switched off. Puts are discarded and
//! every lookup misses, which keeps callers free of `Option<cache>` checks.

use std::sync::Arc;

use super::cached_pc::CachedPC;
use super::level2::Level2Cache;
use super::unique_key::CacheUniqueKey;
use crate::domain::{ClassMeta, Identity};

/// No-op Level-2 cache
#[derive(Debug, Default, Clone, Copy)]
pub struct NullLevel2Cache;

impl NullLevel2Cache {
    pub fn new() -> Self {
        Self
    }
}

impl Level2Cache for NullLevel2Cache {
    fn close(&self) {}

    fn evict(&self, _id: &Identity) {}

    fn evict_all(&self) {}

    fn evict_all_of_class(&self, _class: &ClassMeta, _include_subclasses: bool) {}

    fn size(&self) -> usize {
        0
    }

    fn contains_key(&self, _id: &Identity) -> bool {
        false
    }

    fn get(&self, _id: &Identity) -> Option<Arc<CachedPC>> {
        None
    }

    fn put(&self, _id: Identity, _pc: CachedPC) -> Option<Arc<CachedPC>> {
        None
    }

    fn get_unique(&self, _key: &CacheUniqueKey) -> Option<Arc<CachedPC>> {
        None
    }

    fn put_unique(&self, _key: CacheUniqueKey, _pc: CachedPC) -> Option<Arc<CachedPC>> {
        None
    }

    fn remove_unique(&self, _key: &CacheUniqueKey) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::FieldMeta;

    #[test]
    fn test_everything_misses() {
        let cache = NullLevel2Cache::new();
        let class = ClassMeta::builder("Person")
            .field(FieldMeta::new("name"))
            .build();
        let id = Identity::datastore("Person", 1);

        assert!(cache.put(id.clone(), CachedPC::empty(Arc::clone(&class))).is_none());
        assert!(cache.get(&id).is_none());
        assert!(!cache.contains_key(&id));
        assert!(cache.is_empty());

        cache.pin(&id);
        assert_eq!(cache.number_of_pinned_objects(), 0);

        let key = CacheUniqueKey::new("Person", [("name", "Ann")]);
        cache.put_unique(key.clone(), CachedPC::empty(class));
        assert!(cache.get_unique(&key).is_none());
        assert!(cache.get_all(&[id]).is_empty());
    }
}
