//! Shared fixtures for unit tests

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::managed::ManagedObject;
use crate::config::CacheConfig;
use crate::domain::{
    ClassMeta, ContainerMeta, ExecutionContext, FieldMeta, Identity, ObjectRef, RelationType,
    Role, StateManager,
};
use crate::error::{Error, Result};

/// A small domain model
pub struct Ecosystem {
    pub person: Arc<ClassMeta>,
    pub address: Arc<ClassMeta>,
    pub account: Arc<ClassMeta>,
    pub pet: Arc<ClassMeta>,
}

pub fn ecosystem() -> Ecosystem {
    let address = ClassMeta::builder("Address")
        .field(FieldMeta::new("street"))
        .field(FieldMeta::new("internal_ref").not_cacheable())
        .build();
    let account = ClassMeta::builder("Account")
        .field(FieldMeta::new("number"))
        .build();
    let pet = ClassMeta::builder("Pet")
        .field(FieldMeta::new("name"))
        .build();
    let person = ClassMeta::builder("Person")
        .field(FieldMeta::new("name"))
        .field(FieldMeta::new("age"))
        .field(FieldMeta::new("session_token").transactional())
        .field(FieldMeta::new("notes").not_cacheable())
        .field(FieldMeta::new("billing").relation(RelationType::ManyToOneUni, "Address"))
        .field(FieldMeta::new("account").relation(RelationType::OneToOneUni, "Account"))
        .field(
            FieldMeta::new("home")
                .relation(RelationType::OneToOneUni, "Address")
                .embedded(),
        )
        .field(FieldMeta::new("tags").container(ContainerMeta::set(Role::Plain)))
        .field(
            FieldMeta::new("visits")
                .container(ContainerMeta::list(Role::Reference).ordered_by_query()),
        )
        .field(FieldMeta::new("pets").container(ContainerMeta::list(Role::Reference)))
        .field(FieldMeta::new("favourite").relation(RelationType::ManyToOneUni, "Pet"))
        .field(
            FieldMeta::new("pet_ages")
                .container(ContainerMeta::map(Role::Reference, Role::Plain)),
        )
        .field(
            FieldMeta::new("pets_by_name")
                .container(ContainerMeta::map(Role::Plain, Role::Reference)),
        )
        .field(FieldMeta::new("litter").container(ContainerMeta::array(Role::Reference)))
        .field(FieldMeta::new("past_homes").container(ContainerMeta::list(Role::Embedded)))
        .field(
            FieldMeta::new("homes_by_label")
                .container(ContainerMeta::map(Role::Plain, Role::Embedded)),
        )
        .unique(["name"])
        .build();

    Ecosystem {
        person,
        address,
        account,
        pet,
    }
}

/// Execution context resolving identities from an explicit registry
pub struct TestContext {
    config: CacheConfig,
    objects: RwLock<HashMap<Identity, ObjectRef>>,
}

impl TestContext {
    pub fn new(cache_embedded: bool) -> Self {
        Self {
            config: CacheConfig {
                cache_embedded,
                ..Default::default()
            },
            objects: RwLock::new(HashMap::new()),
        }
    }

    pub fn register(&self, object: ObjectRef) {
        if let Some(id) = object.identity() {
            self.objects.write().insert(id, object);
        }
    }
}

impl ExecutionContext for TestContext {
    fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn find_object(&self, id: &Identity, _class_name: Option<&str>) -> Result<ObjectRef> {
        self.objects
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::ObjectNotFound { id: id.to_string() })
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
