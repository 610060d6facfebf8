//! Datastore Adapter
//!
//! The system of record behind the caches. Rows use the snapshot format
//! with every persistent field captured, so relations are stored as
//! identities exactly as in the Level-2 cache.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tracing::debug;

use crate::cache::{CacheUniqueKey, CachedPC, CachedValue};
use crate::domain::{Identity, Version};
use crate::error::Result;

/// Authoritative object storage
pub trait Datastore: Send + Sync {
    /// Full row for an identity
    fn load(&self, id: &Identity) -> Result<Option<CachedPC>>;

    /// Insert or replace a row, returning the new version
    fn store(&self, id: Identity, row: CachedPC) -> Result<Version>;

    fn delete(&self, id: &Identity) -> Result<bool>;

    /// Identity of the row matching a unique key
    fn find_unique(&self, key: &CacheUniqueKey) -> Result<Option<Identity>>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Row values of `key`'s fields, when they are all loaded scalars
pub fn unique_key_of_row(row: &CachedPC, field_names: &[String]) -> Option<CacheUniqueKey> {
    let class = row.object_class();
    let mut pairs = Vec::with_capacity(field_names.len());
    for name in field_names {
        let field = class.field_by_name(name)?;
        if !row.is_field_loaded(field.number) {
            return None;
        }
        match row.get_field_value(field.number)? {
            CachedValue::Scalar(s) => pairs.push((name.clone(), s.clone())),
            _ => return None,
        }
    }
    Some(CacheUniqueKey::new(class.name(), pairs))
}

/// In-memory datastore with optimistic version numbers
#[derive(Default)]
pub struct InMemoryDatastore {
    rows: DashMap<Identity, CachedPC>,
    loads: AtomicU64,
    stores: AtomicU64,
}

impl InMemoryDatastore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of row reads served
    pub fn loads(&self) -> u64 {
        self.loads.load(Ordering::Relaxed)
    }

    pub fn stores(&self) -> u64 {
        self.stores.load(Ordering::Relaxed)
    }
}

impl Datastore for InMemoryDatastore {
    fn load(&self, id: &Identity) -> Result<Option<CachedPC>> {
        self.loads.fetch_add(1, Ordering::Relaxed);
        Ok(self.rows.get(id).map(|row| row.get_copy()))
    }

    fn store(&self, id: Identity, mut row: CachedPC) -> Result<Version> {
        self.stores.fetch_add(1, Ordering::Relaxed);
        let next = match self.rows.get(&id).and_then(|r| r.version().cloned()) {
            Some(Version::Number(n)) => n + 1,
            _ => 1,
        };
        let version = Version::Number(next);
        row.set_version(Some(version.clone()));
        debug!("Stored {} at version {}", id, version);
        self.rows.insert(id, row);
        Ok(version)
    }

    fn delete(&self, id: &Identity) -> Result<bool> {
        Ok(self.rows.remove(id).is_some())
    }

    fn find_unique(&self, key: &CacheUniqueKey) -> Result<Option<Identity>> {
        self.loads.fetch_add(1, Ordering::Relaxed);
        let found = self.rows.iter().find_map(|entry| {
            let row = entry.value();
            if row.class_name() != key.class_name() {
                return None;
            }
            let candidate = unique_key_of_row(row, key.field_names())?;
            (candidate == *key).then(|| entry.key().clone())
        });
        Ok(found)
    }

    fn len(&self) -> usize {
        self.rows.len()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::domain::{ClassMeta, FieldMeta, Scalar};

    fn row(name: &str) -> CachedPC {
        let class = ClassMeta::builder("Person")
            .field(FieldMeta::new("email"))
            .unique(["email"])
            .build();
        let mut row = CachedPC::new(Arc::clone(&class), vec![true], None, None);
        row.set_field_value(0, CachedValue::Scalar(Scalar::from(name)));
        row
    }

    #[test]
    fn test_versions_increase() {
        let store = InMemoryDatastore::new();
        let id = Identity::datastore("Person", 1);

        assert_eq!(store.store(id.clone(), row("a@x.org")).unwrap(), Version::Number(1));
        assert_eq!(store.store(id.clone(), row("b@x.org")).unwrap(), Version::Number(2));
        let loaded = store.load(&id).unwrap().unwrap();
        assert_eq!(loaded.version(), Some(&Version::Number(2)));
        assert_eq!(store.loads(), 1);
    }

    #[test]
    fn test_find_unique_and_delete() {
        let store = InMemoryDatastore::new();
        let id = Identity::datastore("Person", 1);
        store.store(id.clone(), row("a@x.org")).unwrap();

        let key = CacheUniqueKey::new("Person", [("email", "a@x.org")]);
        assert_eq!(store.find_unique(&key).unwrap(), Some(id.clone()));
        let other = CacheUniqueKey::new("Person", [("email", "z@x.org")]);
        assert_eq!(store.find_unique(&other).unwrap(), None);

        assert!(store.delete(&id).unwrap());
        assert!(store.load(&id).unwrap().is_none());
        assert!(store.is_empty());
    }
}
