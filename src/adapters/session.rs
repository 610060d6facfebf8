//! Session
//!
//! Reference [`ExecutionContext`]: one unit of work over a shared Level-2
//! cache and datastore. Lookups go Level-1, then Level-2, then datastore;
//! commits write the datastore first and refresh the Level-2 cache after.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::datastore::{unique_key_of_row, Datastore};
use super::managed::ManagedObject;
use crate::cache::{
    build_cached_pc, build_cached_pc_with, create_level1_cache, refresh_cached_pc,
    refresh_cached_pc_with, replay, replay_fields, CacheUniqueKey, CachedPC, Capture, Level1Cache,
    Level2Cache,
};
use crate::config::CacheConfig;
use crate::domain::{ClassMeta, ExecutionContext, Identity, ObjectRef, Scalar, StateManager};
use crate::error::{Error, Result};

struct Enlisted {
    object: Arc<ManagedObject>,
    is_new: bool,
}

/// Unit of work over the shared caches
pub struct Session {
    id: Uuid,
    config: CacheConfig,
    level1: Arc<dyn Level1Cache>,
    level2: Arc<dyn Level2Cache>,
    datastore: Arc<dyn Datastore>,
    enlisted: Mutex<HashMap<Identity, Enlisted>>,
}

impl Session {
    pub fn new(
        config: CacheConfig,
        level2: Arc<dyn Level2Cache>,
        datastore: Arc<dyn Datastore>,
    ) -> Self {
        let id = Uuid::new_v4();
        debug!("Opening session {}", id);
        Self {
            id,
            level1: create_level1_cache(&config),
            config,
            level2,
            datastore,
            enlisted: Mutex::new(HashMap::new()),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn level1(&self) -> &Arc<dyn Level1Cache> {
        &self.level1
    }

    pub fn level2(&self) -> &Arc<dyn Level2Cache> {
        &self.level2
    }

    /// Make a new object persistent at the next commit
    pub fn persist(&self, object: Arc<ManagedObject>) -> Result<()> {
        let id = object.identity().ok_or_else(|| Error::MissingIdentity {
            class_name: object.class().name().to_string(),
        })?;
        self.level1.put(id.clone(), object.clone());
        self.enlisted.lock().insert(id, Enlisted { object, is_new: true });
        Ok(())
    }

    /// Find an object and enlist it, so changes to it are committed
    pub fn find(&self, id: &Identity) -> Result<Arc<ManagedObject>> {
        let object = self.find_object(id, None)?;
        let object = downcast(object)?;
        self.enlisted
            .lock()
            .entry(id.clone())
            .or_insert_with(|| Enlisted {
                object: Arc::clone(&object),
                is_new: false,
            });
        Ok(object)
    }

    /// Find an object by the values of one of its class's unique keys
    pub fn find_unique<I, N, V>(&self, class: &ClassMeta, fields: I) -> Result<Option<Arc<ManagedObject>>>
    where
        I: IntoIterator<Item = (N, V)>,
        N: Into<String>,
        V: Into<Scalar>,
    {
        let key = CacheUniqueKey::new(class.name(), fields);

        if let Some(object) = self.level1.get_unique(&key) {
            return downcast(object).map(Some);
        }

        let id = match self.level2.get_unique(&key).and_then(|pc| pc.id().cloned()) {
            Some(id) => Some(id),
            None => self.datastore.find_unique(&key)?,
        };
        let Some(id) = id else {
            return Ok(None);
        };

        let object = self.find(&id)?;
        self.level1.put_unique(key, object.clone());
        Ok(Some(object))
    }

    /// Load fields from the datastore, returning those that still could not be restored
    pub fn load_fields(&self, object: &ManagedObject, fields: &[usize]) -> Result<Vec<usize>> {
        let id = object.identity().ok_or_else(|| Error::MissingIdentity {
            class_name: object.class().name().to_string(),
        })?;
        let row = self
            .datastore
            .load(&id)?
            .ok_or_else(|| Error::ObjectNotFound { id: id.to_string() })?;

        let (present, absent): (Vec<usize>, Vec<usize>) =
            fields.iter().copied().partition(|&f| row.is_field_loaded(f));
        let mut missing = replay_fields(&row, &present, object, self);
        missing.extend(absent);
        Ok(missing)
    }

    /// Flush new and modified objects to the datastore and the Level-2 cache
    pub fn commit(&self) -> Result<usize> {
        let enlisted: Vec<Enlisted> = self.enlisted.lock().drain().map(|(_, e)| e).collect();
        let mut flushed = 0;

        for Enlisted { object, is_new } in enlisted {
            if !is_new && !object.is_dirty() {
                continue;
            }
            self.flush(&object, is_new)?;
            flushed += 1;
        }

        info!("Session {} committed {} objects", self.id, flushed);
        Ok(flushed)
    }

    fn flush(&self, object: &Arc<ManagedObject>, is_new: bool) -> Result<()> {
        let sm: &dyn StateManager = &**object;
        let id = sm.identity().ok_or_else(|| Error::MissingIdentity {
            class_name: object.class().name().to_string(),
        })?;

        let previous_row = if is_new { None } else { self.datastore.load(&id)? };
        let row = match &previous_row {
            Some(previous) => refresh_cached_pc_with(previous, sm, self, Capture::Persistent),
            None => build_cached_pc_with(sm, self, Capture::Persistent),
        };
        let version = self.datastore.store(id.clone(), row)?;
        object.set_version(Some(version));

        let snapshot = match self.level2.get(&id) {
            Some(previous) if !is_new => refresh_cached_pc(&previous, sm, self),
            _ => build_cached_pc(sm, self),
        };

        let class = object.class();
        for names in class.unique_keys() {
            let old_key = previous_row.as_ref().and_then(|row| unique_key_of_row(row, names));
            let new_key = CacheUniqueKey::for_object(sm, names);
            if let Some(old_key) = old_key.filter(|old| Some(old) != new_key.as_ref()) {
                self.level2.remove_unique(&old_key);
                self.level1.remove_unique(&old_key);
            }
            if let Some(new_key) = new_key {
                self.level2.put_unique(new_key.clone(), snapshot.clone());
                self.level1.put_unique(new_key, object.clone());
            }
        }

        self.level2.put(id, snapshot);
        object.clear_dirty();
        Ok(())
    }

    /// Delete an object from the datastore and both caches
    pub fn delete(&self, id: &Identity) -> Result<bool> {
        if let Some(row) = self.datastore.load(id)? {
            for names in row.object_class().unique_keys() {
                if let Some(key) = unique_key_of_row(&row, names) {
                    self.level2.remove_unique(&key);
                    self.level1.remove_unique(&key);
                }
            }
        }
        let deleted = self.datastore.delete(id)?;
        self.level2.evict(id);
        self.level1.remove(id);
        self.enlisted.lock().remove(id);
        debug!("Session {} deleted {} (found={})", self.id, id, deleted);
        Ok(deleted)
    }

    /// Discard the Level-1 cache and any uncommitted work
    pub fn close(&self) {
        self.level1.clear();
        self.enlisted.lock().clear();
        debug!("Closed session {}", self.id);
    }

    fn from_level2(&self, id: &Identity, cached: &CachedPC) -> Result<ObjectRef> {
        let object = ManagedObject::hollow(Arc::clone(cached.object_class()), id.clone());
        object.set_version(cached.version().cloned());
        // Registered before replay so cyclic references resolve to this instance
        self.level1.put(id.clone(), object.clone());

        let missing = replay(cached, &*object, self);
        if !missing.is_empty() {
            debug!("Level2 hit for {} was partial, loading fields {:?}", id, missing);
            if let Err(e) = self.load_fields(&object, &missing) {
                self.level1.remove(id);
                return Err(e);
            }
        }
        Ok(object)
    }

    fn from_datastore(&self, id: &Identity) -> Result<ObjectRef> {
        let row = self
            .datastore
            .load(id)?
            .ok_or_else(|| Error::ObjectNotFound { id: id.to_string() })?;

        let object = ManagedObject::hollow(Arc::clone(row.object_class()), id.clone());
        object.set_version(row.version().cloned());
        self.level1.put(id.clone(), object.clone());

        let missing = replay(&row, &*object, self);
        if !missing.is_empty() {
            warn!("Object {} loaded without fields {:?}", id, missing);
        }

        let snapshot = build_cached_pc(&*object, self);
        for names in row.object_class().unique_keys() {
            if let Some(key) = CacheUniqueKey::for_object(&*object, names) {
                self.level2.put_unique(key, snapshot.clone());
            }
        }
        self.level2.put(id.clone(), snapshot);
        Ok(object)
    }
}

fn downcast(object: ObjectRef) -> Result<Arc<ManagedObject>> {
    object
        .into_any()
        .downcast::<ManagedObject>()
        .map_err(|_| Error::Internal("session holds a foreign state manager".to_string()))
}

impl ExecutionContext for Session {
    fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn find_object(&self, id: &Identity, class_name: Option<&str>) -> Result<ObjectRef> {
        if let Some(object) = self.level1.get(id) {
            return Ok(object);
        }

        if let Some(cached) = self.level2.get(id) {
            match self.from_level2(id, &cached) {
                Ok(object) => return Ok(object),
                Err(e) if e.is_not_found() => {
                    debug!("Evicting stale level2 entry {}: {}", id, e);
                    self.level2.evict(id);
                    return Err(e);
                }
                Err(e) => warn!("Ignoring level2 entry for {}: {}", id, e),
            }
        }

        debug!(
            "Loading {} ({}) from datastore",
            id,
            class_name.unwrap_or("unknown class")
        );
        self.from_datastore(id)
    }

    fn new_embedded_object(
        &self,
        class: &Arc<ClassMeta>,
        _owner: &dyn StateManager,
        _field: usize,
    ) -> Result<ObjectRef> {
        Ok(ManagedObject::embedded(Arc::clone(class)))
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let pending = self.enlisted.get_mut().values().filter(|e| e.is_new).count();
        if pending > 0 {
            warn!("Session {} dropped with {} uncommitted new objects", self.id, pending);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::datastore::InMemoryDatastore;
    use crate::adapters::test_support::ecosystem;
    use crate::cache::StrongLevel2Cache;

    fn session(level2: &Arc<dyn Level2Cache>, datastore: &Arc<InMemoryDatastore>) -> Session {
        Session::new(CacheConfig::default(), Arc::clone(level2), datastore.clone())
    }

    #[test]
    fn test_load_fields_reports_fields_missing_from_row() {
        let eco = ecosystem();
        let level2: Arc<dyn Level2Cache> = Arc::new(StrongLevel2Cache::new(&CacheConfig::default()));
        let datastore = Arc::new(InMemoryDatastore::new());

        let writer = session(&level2, &datastore);
        let ann = ManagedObject::builder(&eco.person)
            .id(Identity::datastore("Person", 1))
            .set("name", "Ann")
            .build();
        writer.persist(ann).unwrap();
        writer.commit().unwrap();

        let reader = session(&level2, &datastore);
        let ann = reader.find(&Identity::datastore("Person", 1)).unwrap();
        let name = eco.person.field_by_name("name").unwrap().number;
        let age = eco.person.field_by_name("age").unwrap().number;

        assert_eq!(reader.load_fields(&ann, &[name, age]).unwrap(), vec![age]);
        assert!(ann.is_field_loaded(name));
        assert!(!ann.is_field_loaded(age));
    }

    #[test]
    fn test_reference_to_deleted_object_stays_unloaded() {
        let eco = ecosystem();
        let level2: Arc<dyn Level2Cache> = Arc::new(StrongLevel2Cache::new(&CacheConfig::default()));
        let datastore = Arc::new(InMemoryDatastore::new());

        let writer = session(&level2, &datastore);
        let rex = ManagedObject::builder(&eco.pet)
            .id(Identity::datastore("Pet", 3))
            .set("name", "Rex")
            .build();
        let ann = ManagedObject::builder(&eco.person)
            .id(Identity::datastore("Person", 1))
            .set("name", "Ann")
            .object("favourite", rex.clone())
            .build();
        writer.persist(rex).unwrap();
        writer.persist(ann).unwrap();
        writer.commit().unwrap();
        assert!(writer.delete(&Identity::datastore("Pet", 3)).unwrap());
        writer.close();

        let reader = session(&level2, &datastore);
        let ann = reader.find(&Identity::datastore("Person", 1)).unwrap();
        let favourite = eco.person.field_by_name("favourite").unwrap().number;
        assert!(!ann.is_field_loaded(favourite));
        assert!(ann.field(favourite).is_none());
        assert!(ann.field_by_name("name").is_some());
    }
}
