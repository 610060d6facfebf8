//! Managed Object
//!
//! Generic [`StateManager`] holding field values by absolute field number.
//! The state lock is never held across consumer or supplier callbacks, so a
//! callback may freely walk into other objects (or back into this one).

use std::any::Any;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::warn;

use crate::domain::{
    ClassMeta, FieldConsumer, FieldSupplier, Identity, ObjectRef, StateManager, Value, Version,
};

#[derive(Debug, Default)]
struct ObjectState {
    identity: Option<Identity>,
    version: Option<Version>,
    /// `None` = not loaded
    values: Vec<Option<Value>>,
    dirty: Vec<bool>,
}

/// Managed object backed by a field table
pub struct ManagedObject {
    class: Arc<ClassMeta>,
    state: RwLock<ObjectState>,
}

impl std::fmt::Debug for ManagedObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("ManagedObject")
            .field("class", &self.class.name())
            .field("identity", &state.identity)
            .field("version", &state.version)
            .field("values", &state.values)
            .finish()
    }
}

impl ManagedObject {
    fn new(class: Arc<ClassMeta>, identity: Option<Identity>) -> Self {
        let count = class.field_count();
        Self {
            class,
            state: RwLock::new(ObjectState {
                identity,
                version: None,
                values: vec![None; count],
                dirty: vec![false; count],
            }),
        }
    }

    /// Object with an identity and no loaded fields
    pub fn hollow(class: Arc<ClassMeta>, identity: Identity) -> Arc<Self> {
        Arc::new(Self::new(class, Some(identity)))
    }

    /// Identity-less object stored inline with its owner
    pub fn embedded(class: Arc<ClassMeta>) -> Arc<Self> {
        Arc::new(Self::new(class, None))
    }

    pub fn builder(class: &Arc<ClassMeta>) -> ManagedObjectBuilder {
        ManagedObjectBuilder {
            object: Self::new(Arc::clone(class), None),
        }
    }

    pub fn class(&self) -> &Arc<ClassMeta> {
        &self.class
    }

    pub fn set_identity(&self, identity: Identity) {
        self.state.write().identity = Some(identity);
    }

    pub fn set_version(&self, version: Option<Version>) {
        self.state.write().version = version;
    }

    /// Current value of a loaded field
    pub fn field(&self, field: usize) -> Option<Value> {
        self.state.read().values.get(field).cloned().flatten()
    }

    pub fn field_by_name(&self, name: &str) -> Option<Value> {
        let meta = self.class.field_by_name(name)?;
        self.field(meta.number)
    }

    /// Assign a field, marking it loaded and dirty
    pub fn set_field(&self, field: usize, value: Value) {
        let mut state = self.state.write();
        if field >= state.values.len() {
            warn!("Class {} has no field {}", self.class.name(), field);
            return;
        }
        state.values[field] = Some(value);
        state.dirty[field] = true;
    }

    pub fn set_field_by_name(&self, name: &str, value: Value) {
        match self.class.field_by_name(name) {
            Some(meta) => self.set_field(meta.number, value),
            None => warn!("Class {} has no field '{}'", self.class.name(), name),
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.state.read().dirty.iter().any(|d| *d)
    }

    /// Forget pending modifications, typically after a flush
    pub fn clear_dirty(&self) {
        self.state.write().dirty.iter_mut().for_each(|d| *d = false);
    }
}

impl StateManager for ManagedObject {
    fn class_meta(&self) -> Arc<ClassMeta> {
        Arc::clone(&self.class)
    }

    fn identity(&self) -> Option<Identity> {
        self.state.read().identity.clone()
    }

    fn version(&self) -> Option<Version> {
        self.state.read().version.clone()
    }

    fn loaded_field_numbers(&self) -> Vec<usize> {
        self.state
            .read()
            .values
            .iter()
            .enumerate()
            .filter_map(|(i, v)| v.is_some().then_some(i))
            .collect()
    }

    fn dirty_field_numbers(&self) -> Vec<usize> {
        self.state
            .read()
            .dirty
            .iter()
            .enumerate()
            .filter_map(|(i, d)| d.then_some(i))
            .collect()
    }

    fn is_field_loaded(&self, field: usize) -> bool {
        matches!(self.state.read().values.get(field), Some(Some(_)))
    }

    fn provide_fields(&self, fields: &[usize], consumer: &mut dyn FieldConsumer) {
        for &field in fields {
            // Release the lock before calling out
            let value = self.field(field);
            if let Some(value) = value {
                consumer.store_field(field, value);
            }
        }
    }

    fn replace_fields(&self, fields: &[usize], supplier: &mut dyn FieldSupplier) {
        for &field in fields {
            let value = supplier.fetch_field(field);
            let mut state = self.state.write();
            if let Some(slot) = state.values.get_mut(field) {
                *slot = Some(value);
            }
        }
    }

    fn unload_field(&self, field: usize) {
        let mut state = self.state.write();
        if let Some(slot) = state.values.get_mut(field) {
            *slot = None;
        }
        if let Some(dirty) = state.dirty.get_mut(field) {
            *dirty = false;
        }
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Builder for a [`ManagedObject`] with fields preloaded (and clean)
#[derive(Debug)]
pub struct ManagedObjectBuilder {
    object: ManagedObject,
}

impl ManagedObjectBuilder {
    pub fn id(self, identity: Identity) -> Self {
        self.object.set_identity(identity);
        self
    }

    pub fn version(self, version: Version) -> Self {
        self.object.set_version(Some(version));
        self
    }

    /// Load a field by name
    pub fn value(self, name: &str, value: Value) -> Self {
        self.object.set_field_by_name(name, value);
        self
    }

    pub fn set(self, name: &str, value: impl Into<Value>) -> Self {
        self.value(name, value.into())
    }

    /// Load a reference field by name
    pub fn object(self, name: &str, object: ObjectRef) -> Self {
        self.value(name, Value::Object(object))
    }

    pub fn build(self) -> Arc<ManagedObject> {
        self.object.clear_dirty();
        Arc::new(self.object)
    }
}

// =============================================================================
// Tests
// =============================================================================
