//! Snapshot Retrieval
//!
//! Replays a [`CachedPC`] into a managed object. Identity tokens are
//! resolved lazily through the owning [`ExecutionContext`], which may in turn
//! consult the Level-1 cache, the Level-2 cache or the datastore.
//!
//! Nothing here fails the caller: a field that cannot be rebuilt (or whose
//! referenced object has since been deleted) is reported back so that the
//! caller can fetch it from the datastore. Fields that could not be rebuilt
//! at all are left unloaded; containers missing some elements stay loaded
//! with what was found.

use tracing::{debug, warn};

use super::cached_pc::{CachedPC, CachedValue};
use crate::domain::{
    ClassMeta, Container, ExecutionContext, FieldSupplier, ObjectRef, StateManager, Value,
};
use crate::error::{Error, Result};

/// Resolve an identity token to a managed object
pub fn get_object_from_cached_id(
    ec: &dyn ExecutionContext,
    token: &CachedValue,
) -> Result<ObjectRef> {
    match token {
        CachedValue::CachedId(cached_id) => {
            ec.find_object(cached_id.id(), Some(cached_id.class_name()))
        }
        CachedValue::Id(id) => ec.find_object(id, id.target_class_name()),
        other => Err(Error::Internal(format!(
            "not an identity token: {:?}",
            other
        ))),
    }
}

/// Field supplier that reads from a [`CachedPC`]
pub struct RetrieveFieldManager<'a> {
    cached: &'a CachedPC,
    sm: &'a dyn StateManager,
    ec: &'a dyn ExecutionContext,
    fields_not_loaded: Vec<usize>,
    /// Fields with nothing to restore, a subset of `fields_not_loaded`
    failed: Vec<usize>,
    /// Set when the field being fetched was only partly rebuilt
    partial: bool,
}

impl<'a> RetrieveFieldManager<'a> {
    pub fn new(cached: &'a CachedPC, sm: &'a dyn StateManager, ec: &'a dyn ExecutionContext) -> Self {
        Self {
            cached,
            sm,
            ec,
            fields_not_loaded: Vec::new(),
            failed: Vec::new(),
            partial: false,
        }
    }

    /// Fields that could not be fully restored
    pub fn fields_not_loaded(&self) -> &[usize] {
        &self.fields_not_loaded
    }

    pub fn into_fields_not_loaded(self) -> Vec<usize> {
        self.fields_not_loaded
    }

    /// Fields that could not be rebuilt at all
    pub fn failed_fields(&self) -> &[usize] {
        &self.failed
    }

    /// A snapshot may populate its own class or any subclass of it
    fn check_target(&self, field: usize) -> Result<()> {
        let target = self.sm.class_meta();
        if self.class().is_assignable_from(&target) {
            Ok(())
        } else {
            Err(Error::Reconstruction {
                field,
                reason: format!(
                    "snapshot of {} cannot populate an object of class {}",
                    self.class().name(),
                    target.name()
                ),
            })
        }
    }

    fn class(&self) -> &ClassMeta {
        self.cached.object_class()
    }

    fn decode_field(&mut self, field: usize, cached: &CachedValue) -> Result<Value> {
        match cached {
            CachedValue::Container(container) => {
                let rebuilt = self.decode_container(field, container)?;
                self.ec.wrap_container(self.sm, field, rebuilt)
            }
            other => self.decode_value(field, other),
        }
    }

    fn decode_value(&mut self, field: usize, cached: &CachedValue) -> Result<Value> {
        match cached {
            CachedValue::Null => Ok(Value::Null),
            CachedValue::Scalar(s) => Ok(Value::Scalar(s.clone())),
            CachedValue::Id(_) | CachedValue::CachedId(_) => {
                get_object_from_cached_id(self.ec, cached).map(Value::Object)
            }
            CachedValue::Embedded(nested) => self.materialize_embedded(field, nested).map(Value::Object),
            CachedValue::Container(container) => {
                self.decode_container(field, container).map(Value::Container)
            }
        }
    }

    /// Rebuild a container of the same kind. Elements whose referenced
    /// object is gone are dropped and the field is flagged as partial;
    /// null elements stay null.
    fn decode_container(
        &mut self,
        field: usize,
        container: &Container<CachedValue>,
    ) -> Result<Container<Value>> {
        let mut rebuilt = Container::empty(container.kind());
        match container {
            Container::Map(entries) => {
                let mut out = Vec::with_capacity(entries.len());
                for (key, value) in entries {
                    let key = self.decode_element(field, key)?;
                    let value = self.decode_element(field, value)?;
                    if let (Some(key), Some(value)) = (key, value) {
                        out.push((key, value));
                    }
                }
                rebuilt = Container::Map(out);
            }
            Container::List(elements) | Container::Set(elements) | Container::Array(elements) => {
                for element in elements {
                    if let Some(value) = self.decode_element(field, element)? {
                        rebuilt.push(value)?;
                    }
                }
            }
        }
        Ok(rebuilt)
    }

    fn decode_element(&mut self, field: usize, cached: &CachedValue) -> Result<Option<Value>> {
        match self.decode_value(field, cached) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.is_not_found() => {
                debug!("Dropping element of field {}: {}", field, e);
                self.partial = true;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// New embedded object holding the nested snapshot's loaded fields
    fn materialize_embedded(&mut self, field: usize, nested: &CachedPC) -> Result<ObjectRef> {
        let object = self
            .ec
            .new_embedded_object(nested.object_class(), self.sm, field)?;
        let missing = replay(nested, &*object, self.ec);
        if !missing.is_empty() {
            debug!(
                "Embedded {} in field {} restored without fields {:?}",
                nested.class_name(),
                field,
                missing
            );
            self.partial = true;
        }
        Ok(object)
    }
}

impl FieldSupplier for RetrieveFieldManager<'_> {
    fn fetch_field(&mut self, field: usize) -> Value {
        self.partial = false;

        let Some(cached) = self.cached.get_field_value(field) else {
            // Loaded with no stored value is a null
            return Value::Null;
        };

        let result = self
            .check_target(field)
            .and_then(|()| self.decode_field(field, cached));
        match result {
            Ok(value) => {
                if self.partial {
                    self.fields_not_loaded.push(field);
                }
                value
            }
            Err(e) => {
                let name = self
                    .class()
                    .field(field)
                    .map(|f| f.name.clone())
                    .unwrap_or_default();
                if e.is_not_found() {
                    debug!("Field {}.{} refers to a deleted object: {}", self.class().name(), name, e);
                } else {
                    warn!("Unable to restore field {}.{} from cache: {}", self.class().name(), name, e);
                }
                self.fields_not_loaded.push(field);
                self.failed.push(field);
                Value::Null
            }
        }
    }
}

/// Replay every loaded field of `cached` into `sm`, returning the fields
/// that could not be (fully) restored
pub fn replay(cached: &CachedPC, sm: &dyn StateManager, ec: &dyn ExecutionContext) -> Vec<usize> {
    replay_fields(cached, &cached.loaded_field_numbers(), sm, ec)
}

/// Replay the given fields of `cached` into `sm`. Fields that could not be
/// rebuilt at all are unloaded again; the return value lists those plus
/// the fields that were only partly restored.
pub fn replay_fields(
    cached: &CachedPC,
    fields: &[usize],
    sm: &dyn StateManager,
    ec: &dyn ExecutionContext,
) -> Vec<usize> {
    let mut fm = RetrieveFieldManager::new(cached, sm, ec);
    sm.replace_fields(fields, &mut fm);
    for &field in fm.failed_fields() {
        sm.unload_field(field);
    }
    fm.into_fields_not_loaded()
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::adapters::test_support::{ecosystem, TestContext};
    use crate::adapters::ManagedObject;
    use crate::cache::populate::build_cached_pc;
    use crate::domain::{ContainerKind, Identity, Scalar};

    fn ids_of(value: &Value) -> Vec<Option<Identity>> {
        value
            .container_snapshot()
            .unwrap()
            .unwrap()
            .elements()
            .unwrap()
            .iter()
            .map(|v| v.as_object().and_then(|o| o.identity()))
            .collect()
    }

    #[test]
    fn test_scalar_roundtrip() {
        let eco = ecosystem();
        let ctx = TestContext::new(true);
        let source = ManagedObject::builder(&eco.person)
            .id(Identity::datastore("Person", 1))
            .set("name", "Ann")
            .set("age", 41)
            .build();
        let cached = build_cached_pc(&*source, &ctx);

        let target = ManagedObject::hollow(Arc::clone(&eco.person), Identity::datastore("Person", 1));
        assert!(replay(&cached, &*target, &ctx).is_empty());
        assert_eq!(
            target.field_by_name("name").and_then(|v| v.as_scalar().cloned()),
            Some(Scalar::String("Ann".to_string()))
        );
        assert_eq!(
            target.field_by_name("age").and_then(|v| v.as_scalar().cloned()),
            Some(Scalar::Int(41))
        );
    }

    #[test]
    fn test_relation_resolves_through_context() {
        let eco = ecosystem();
        let ctx = TestContext::new(true);
        let pet = ManagedObject::builder(&eco.pet)
            .id(Identity::datastore("Pet", 3))
            .set("name", "Rex")
            .build();
        ctx.register(pet.clone());
        let source = ManagedObject::builder(&eco.person)
            .id(Identity::datastore("Person", 1))
            .object("favourite", pet)
            .build();
        let cached = build_cached_pc(&*source, &ctx);

        let target = ManagedObject::hollow(Arc::clone(&eco.person), Identity::datastore("Person", 1));
        assert!(replay(&cached, &*target, &ctx).is_empty());
        let favourite = target.field_by_name("favourite").unwrap();
        assert_eq!(
            favourite.as_object().and_then(|o| o.identity()),
            Some(Identity::datastore("Pet", 3))
        );
    }

    #[test]
    fn test_deleted_reference_is_not_loaded() {
        let eco = ecosystem();
        let ctx = TestContext::new(true);
        let pet = ManagedObject::builder(&eco.pet)
            .id(Identity::datastore("Pet", 3))
            .build();
        let source = ManagedObject::builder(&eco.person)
            .id(Identity::datastore("Person", 1))
            .object("favourite", pet)
            .build();
        let cached = build_cached_pc(&*source, &ctx);
        let field = eco.person.field_by_name("favourite").unwrap().number;

        // Never registered, so the context cannot find it
        let target = ManagedObject::hollow(Arc::clone(&eco.person), Identity::datastore("Person", 1));
        assert_eq!(replay(&cached, &*target, &ctx), vec![field]);
        assert!(!target.is_field_loaded(field));
        assert!(target.field(field).is_none());
    }

    #[test]
    fn test_snapshot_of_unrelated_class_is_rejected() {
        let eco = ecosystem();
        let ctx = TestContext::new(true);
        let pet = ManagedObject::builder(&eco.pet)
            .id(Identity::datastore("Pet", 3))
            .set("name", "Rex")
            .build();
        let cached = build_cached_pc(&*pet, &ctx);
        let name = eco.pet.field_by_name("name").unwrap().number;

        let target = ManagedObject::hollow(Arc::clone(&eco.person), Identity::datastore("Person", 1));
        assert_eq!(replay(&cached, &*target, &ctx), vec![name]);
        assert!(target.loaded_field_numbers().is_empty());
    }

    #[test]
    fn test_map_roundtrip_drops_unresolvable_entries() {
        let eco = ecosystem();
        let ctx = TestContext::new(true);
        let rex = ManagedObject::builder(&eco.pet).id(Identity::datastore("Pet", 1)).build();
        let tom = ManagedObject::builder(&eco.pet).id(Identity::datastore("Pet", 2)).build();
        ctx.register(rex.clone());

        let source = ManagedObject::builder(&eco.person)
            .id(Identity::datastore("Person", 1))
            .value(
                "pet_ages",
                Value::Container(Container::Map(vec![
                    (Value::Object(rex.clone()), Value::from(3)),
                    (Value::Object(tom.clone()), Value::from(5)),
                ])),
            )
            .value(
                "pets_by_name",
                Value::Container(Container::Map(vec![
                    (Value::from("rex"), Value::Object(rex)),
                    (Value::from("tom"), Value::Object(tom)),
                ])),
            )
            .build();
        let cached = build_cached_pc(&*source, &ctx);
        let pet_ages = eco.person.field_by_name("pet_ages").unwrap().number;
        let pets_by_name = eco.person.field_by_name("pets_by_name").unwrap().number;

        // Tom was never registered: his entries go, the rest of each map stays
        let target = ManagedObject::hollow(Arc::clone(&eco.person), Identity::datastore("Person", 1));
        assert_eq!(replay(&cached, &*target, &ctx), vec![pet_ages, pets_by_name]);
        assert!(target.is_field_loaded(pet_ages));
        assert!(target.is_field_loaded(pets_by_name));

        let ages = target.field(pet_ages).unwrap().container_snapshot().unwrap().unwrap();
        let ages = ages.entries().unwrap();
        assert_eq!(ages.len(), 1);
        assert_eq!(ages[0].0.as_object().and_then(|o| o.identity()), Some(Identity::datastore("Pet", 1)));
        assert_eq!(ages[0].1.as_scalar(), Some(&Scalar::Int(3)));

        let by_name = target.field(pets_by_name).unwrap().container_snapshot().unwrap().unwrap();
        let by_name = by_name.entries().unwrap();
        assert_eq!(by_name.len(), 1);
        assert_eq!(by_name[0].0.as_scalar(), Some(&Scalar::from("rex")));
    }

    #[test]
    fn test_map_roundtrip_complete() {
        let eco = ecosystem();
        let ctx = TestContext::new(true);
        let rex = ManagedObject::builder(&eco.pet).id(Identity::datastore("Pet", 1)).build();
        ctx.register(rex.clone());
        let source = ManagedObject::builder(&eco.person)
            .id(Identity::datastore("Person", 1))
            .value(
                "pets_by_name",
                Value::Container(Container::Map(vec![(Value::from("rex"), Value::Object(rex))])),
            )
            .build();
        let cached = build_cached_pc(&*source, &ctx);

        let target = ManagedObject::hollow(Arc::clone(&eco.person), Identity::datastore("Person", 1));
        assert!(replay(&cached, &*target, &ctx).is_empty());
        let restored = target.field_by_name("pets_by_name").unwrap();
        let restored = restored.container_snapshot().unwrap().unwrap();
        assert_eq!(restored.kind(), ContainerKind::Map);
        assert_eq!(
            restored.entries().unwrap()[0].1.as_object().and_then(|o| o.identity()),
            Some(Identity::datastore("Pet", 1))
        );
    }

    #[test]
    fn test_array_relation_keeps_kind_and_order() {
        let eco = ecosystem();
        let ctx = TestContext::new(true);
        let a = ManagedObject::builder(&eco.pet).id(Identity::datastore("Pet", 7)).build();
        let b = ManagedObject::builder(&eco.pet).id(Identity::datastore("Pet", 4)).build();
        ctx.register(a.clone());
        ctx.register(b.clone());
        let source = ManagedObject::builder(&eco.person)
            .id(Identity::datastore("Person", 1))
            .value(
                "litter",
                Value::Container(Container::Array(vec![Value::Object(a), Value::Object(b)])),
            )
            .build();
        let cached = build_cached_pc(&*source, &ctx);

        let target = ManagedObject::hollow(Arc::clone(&eco.person), Identity::datastore("Person", 1));
        assert!(replay(&cached, &*target, &ctx).is_empty());
        let litter = target.field_by_name("litter").unwrap();
        assert_eq!(
            litter.container_snapshot().unwrap().unwrap().kind(),
            ContainerKind::Array
        );
        assert_eq!(
            ids_of(&litter),
            vec![Some(Identity::datastore("Pet", 7)), Some(Identity::datastore("Pet", 4))]
        );
    }

    #[test]
    fn test_embedded_elements_rebuilt_per_element() {
        let eco = ecosystem();
        let ctx = TestContext::new(true);
        let first = ManagedObject::builder(&eco.address).set("street", "Elm St").build();
        let second = ManagedObject::builder(&eco.address).set("street", "Oak Ave").build();
        let source = ManagedObject::builder(&eco.person)
            .id(Identity::datastore("Person", 1))
            .value(
                "past_homes",
                Value::Container(Container::List(vec![
                    Value::Object(first.clone()),
                    Value::Object(second),
                ])),
            )
            .build();
        let cached = build_cached_pc(&*source, &ctx);

        let target = ManagedObject::hollow(Arc::clone(&eco.person), Identity::datastore("Person", 1));
        assert!(replay(&cached, &*target, &ctx).is_empty());

        let homes = target.field_by_name("past_homes").unwrap();
        let homes = homes.container_snapshot().unwrap().unwrap();
        let streets: Vec<Option<Scalar>> = homes
            .elements()
            .unwrap()
            .iter()
            .map(|v| {
                let home = v.as_object().unwrap().clone();
                let home = home.into_any().downcast::<ManagedObject>().unwrap();
                assert!(home.identity().is_none());
                home.field_by_name("street").and_then(|s| s.as_scalar().cloned())
            })
            .collect();
        assert_eq!(streets, vec![Some(Scalar::from("Elm St")), Some(Scalar::from("Oak Ave"))]);

        let original: ObjectRef = first;
        assert!(!Arc::ptr_eq(homes.elements().unwrap()[0].as_object().unwrap(), &original));
    }

    #[test]
    fn test_null_elements_survive() {
        let eco = ecosystem();
        let ctx = TestContext::new(true);
        let a = ManagedObject::builder(&eco.pet).id(Identity::datastore("Pet", 1)).build();
        let b = ManagedObject::builder(&eco.pet).id(Identity::datastore("Pet", 2)).build();
        ctx.register(a.clone());
        ctx.register(b.clone());

        let source = ManagedObject::builder(&eco.person)
            .id(Identity::datastore("Person", 1))
            .value(
                "pets",
                Value::Container(Container::List(vec![
                    Value::Object(a),
                    Value::Null,
                    Value::Object(b),
                ])),
            )
            .build();
        let cached = build_cached_pc(&*source, &ctx);

        let target = ManagedObject::hollow(Arc::clone(&eco.person), Identity::datastore("Person", 1));
        assert!(replay(&cached, &*target, &ctx).is_empty());
        assert_eq!(
            ids_of(&target.field_by_name("pets").unwrap()),
            vec![
                Some(Identity::datastore("Pet", 1)),
                None,
                Some(Identity::datastore("Pet", 2))
            ]
        );
    }

    #[test]
    fn test_embedded_rebuilt_as_distinct_instance() {
        let eco = ecosystem();
        let ctx = TestContext::new(true);
        let home = ManagedObject::builder(&eco.address).set("street", "Main St").build();
        let source = ManagedObject::builder(&eco.person)
            .id(Identity::datastore("Person", 1))
            .set("name", "Home")
            .object("home", home.clone())
            .build();
        let cached = build_cached_pc(&*source, &ctx);

        let target = ManagedObject::hollow(Arc::clone(&eco.person), Identity::datastore("Person", 1));
        assert!(replay(&cached, &*target, &ctx).is_empty());

        let restored = target.field_by_name("home").unwrap();
        let restored = restored.as_object().unwrap();
        let original: ObjectRef = home;
        assert!(!Arc::ptr_eq(restored, &original));
        assert_eq!(restored.class_meta().name(), "Address");
    }

    #[test]
    fn test_unresolvable_token_type() {
        let ctx = TestContext::new(true);
        let err = get_object_from_cached_id(&ctx, &CachedValue::Null).err().unwrap();
        assert!(!err.is_not_found());
    }
}
