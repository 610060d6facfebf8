//! Snapshot Population
//!
//! Encodes the loaded, cacheable fields of a managed object into a
//! [`CachedPC`]. Relations are reduced to identity tokens, and embedded or
//! serialized objects become nested snapshots, so the result holds no live
//! object handles.
//!
//! Population observes current state only: containers that are not loaded
//! are never loaded for the sake of caching, and any failure just leaves the
//! affected field out of the snapshot.

use std::sync::Arc;

use tracing::{debug, warn};

use super::cached_pc::{CachedPC, CachedValue};
use crate::domain::{
    CachedId, ClassMeta, Container, ContainerKind, ContainerMeta, ExecutionContext, FieldConsumer,
    FieldMeta, Identity, ObjectRef, Role, StateManager, Value,
};
use crate::error::{Error, Result};

/// Identity token for a referenced object. Self-describing identities are
/// stored as-is; application identities are paired with their class.
pub fn get_cacheable_id_for_id(id: &Identity, class_name: &str) -> CachedValue {
    if id.is_self_describing() {
        CachedValue::Id(id.clone())
    } else {
        CachedValue::CachedId(CachedId::new(class_name, id.clone()))
    }
}

fn cacheable_id_for_object(object: &ObjectRef) -> Result<CachedValue> {
    let class = object.class_meta();
    let id = object.identity().ok_or_else(|| Error::MissingIdentity {
        class_name: class.name().to_string(),
    })?;
    Ok(get_cacheable_id_for_id(&id, class.name()))
}

/// Which fields a population captures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capture {
    /// Level-2 snapshot: per-field cacheability and the embedded toggle apply
    Cacheable,
    /// Inside an embedded object: every loaded field except transactional ones
    Embedded,
    /// Datastore row: every persistent field, whatever its cacheability
    Persistent,
}

impl Capture {
    fn nested(self) -> Self {
        match self {
            Capture::Persistent => Capture::Persistent,
            _ => Capture::Embedded,
        }
    }
}

/// Field consumer that writes into a [`CachedPC`]
pub struct PopulateFieldManager<'a> {
    ec: &'a dyn ExecutionContext,
    class: Arc<ClassMeta>,
    cached: &'a mut CachedPC,
    capture: Capture,
}

impl<'a> PopulateFieldManager<'a> {
    pub fn new(sm: &dyn StateManager, ec: &'a dyn ExecutionContext, cached: &'a mut CachedPC) -> Self {
        Self::with_capture(sm.class_meta(), ec, cached, Capture::Cacheable)
    }

    pub fn with_capture(
        class: Arc<ClassMeta>,
        ec: &'a dyn ExecutionContext,
        cached: &'a mut CachedPC,
        capture: Capture,
    ) -> Self {
        Self {
            ec,
            class,
            cached,
            capture,
        }
    }

    fn cache_embedded(&self) -> bool {
        self.capture == Capture::Persistent || self.ec.config().cache_embedded
    }

    /// Encode a field value; `Ok(None)` means the field must stay out of the snapshot
    fn encode_field(&self, meta: &FieldMeta, value: &Value) -> Result<Option<CachedValue>> {
        match value {
            Value::Null => Ok(Some(CachedValue::Null)),
            Value::Scalar(s) => Ok(Some(CachedValue::Scalar(s.clone()))),
            Value::Container(container) => self.encode_container(meta, container),
            Value::Wrapped(wrapper) => {
                if !wrapper.is_loaded() {
                    debug!(
                        "Field {}.{} holds an unloaded {}, not caching it",
                        self.class.name(),
                        meta.name,
                        wrapper.kind()
                    );
                    return Ok(None);
                }
                let container = wrapper.snapshot()?;
                self.encode_container(meta, &container)
            }
            Value::Object(object) => {
                if meta.is_inline() {
                    if !self.cache_embedded() {
                        return Ok(None);
                    }
                    Ok(Some(CachedValue::Embedded(Box::new(self.encode_embedded(object)))))
                } else {
                    cacheable_id_for_object(object).map(Some)
                }
            }
        }
    }

    fn encode_container(
        &self,
        meta: &FieldMeta,
        container: &Container<Value>,
    ) -> Result<Option<CachedValue>> {
        let container_meta = meta
            .container
            .clone()
            .unwrap_or_else(|| plain_container_meta(container.kind()));

        if container_meta.has_embedded() && !self.cache_embedded() {
            return Ok(None);
        }
        // List order without an index column depends on datastore retrieval order
        if self.capture != Capture::Persistent
            && container_meta.has_relations()
            && container.kind() == ContainerKind::List
            && !container_meta.indexed
        {
            debug!(
                "Field {}.{} is a list relation without index column, not caching it",
                self.class.name(),
                meta.name
            );
            return Ok(None);
        }

        let encoded = container.try_convert(
            |element| self.encode_element(container_meta.element, element),
            |key, value| {
                Ok((
                    self.encode_element(container_meta.key, key)?,
                    self.encode_element(container_meta.value, value)?,
                ))
            },
        )?;
        Ok(Some(CachedValue::Container(encoded)))
    }

    fn encode_element(&self, role: Role, value: &Value) -> Result<CachedValue> {
        match value {
            Value::Null => Ok(CachedValue::Null),
            Value::Scalar(s) => Ok(CachedValue::Scalar(s.clone())),
            Value::Object(object) if role == Role::Embedded => {
                Ok(CachedValue::Embedded(Box::new(self.encode_embedded(object))))
            }
            Value::Object(object) => cacheable_id_for_object(object),
            Value::Container(_) | Value::Wrapped(_) => {
                let nested = value
                    .container_snapshot()
                    .ok_or_else(|| Error::Internal("container value without contents".to_string()))??;
                let encoded = nested.try_convert(
                    |element| self.encode_element(Role::Plain, element),
                    |k, v| {
                        Ok((
                            self.encode_element(Role::Plain, k)?,
                            self.encode_element(Role::Plain, v)?,
                        ))
                    },
                )?;
                Ok(CachedValue::Container(encoded))
            }
        }
    }

    /// Snapshot every loaded field of an embedded object
    fn encode_embedded(&self, object: &ObjectRef) -> CachedPC {
        let class = object.class_meta();
        let mut nested = CachedPC::new(Arc::clone(&class), Vec::new(), object.version(), object.identity());
        let fields = object.loaded_field_numbers();
        let mut fm = PopulateFieldManager::with_capture(class, self.ec, &mut nested, self.capture.nested());
        object.provide_fields(&fields, &mut fm);
        nested
    }
}

fn plain_container_meta(kind: ContainerKind) -> ContainerMeta {
    match kind {
        ContainerKind::List => ContainerMeta::list(Role::Plain),
        ContainerKind::Set => ContainerMeta::set(Role::Plain),
        ContainerKind::Array => ContainerMeta::array(Role::Plain),
        ContainerKind::Map => ContainerMeta::map(Role::Plain, Role::Plain),
    }
}

impl FieldConsumer for PopulateFieldManager<'_> {
    fn store_field(&mut self, field: usize, value: Value) {
        let class = Arc::clone(&self.class);
        let Some(meta) = class.field(field) else {
            warn!("Class {} has no field {}", class.name(), field);
            return;
        };

        if meta.is_transactional() || (self.capture == Capture::Cacheable && !meta.cacheable) {
            self.cached.set_loaded_field(field, false);
            return;
        }
        if meta.is_inline() && meta.relation.is_relation() && !self.cache_embedded() {
            self.cached.set_loaded_field(field, false);
            return;
        }

        self.cached.set_loaded_field(field, true);
        match self.encode_field(meta, &value) {
            Ok(Some(encoded)) => self.cached.set_field_value(field, encoded),
            Ok(None) => self.cached.set_loaded_field(field, false),
            Err(e) => {
                warn!(
                    "Unable to cache field {}.{}, leaving it out: {}",
                    class.name(),
                    meta.name,
                    e
                );
                self.cached.set_loaded_field(field, false);
            }
        }
    }
}

/// Build a fresh snapshot of the object's loaded, cacheable fields
pub fn build_cached_pc(sm: &dyn StateManager, ec: &dyn ExecutionContext) -> CachedPC {
    let cached = build_cached_pc_with(sm, ec, Capture::Cacheable);
    debug!("Built {}", cached);
    cached
}

pub fn build_cached_pc_with(
    sm: &dyn StateManager,
    ec: &dyn ExecutionContext,
    capture: Capture,
) -> CachedPC {
    let class = sm.class_meta();
    let mut cached = CachedPC::new(Arc::clone(&class), Vec::new(), sm.version(), sm.identity());
    let fields = sm.loaded_field_numbers();
    {
        let mut fm = PopulateFieldManager::with_capture(class, ec, &mut cached, capture);
        sm.provide_fields(&fields, &mut fm);
    }
    cached
}

/// New snapshot derived from a published one: only the object's dirty
/// fields are re-encoded, and the version is brought up to date.
pub fn refresh_cached_pc(
    previous: &CachedPC,
    sm: &dyn StateManager,
    ec: &dyn ExecutionContext,
) -> CachedPC {
    refresh_cached_pc_with(previous, sm, ec, Capture::Cacheable)
}

pub fn refresh_cached_pc_with(
    previous: &CachedPC,
    sm: &dyn StateManager,
    ec: &dyn ExecutionContext,
    capture: Capture,
) -> CachedPC {
    let mut cached = previous.get_copy();
    cached.set_version(sm.version());

    let (loaded, unloaded): (Vec<usize>, Vec<usize>) = sm
        .dirty_field_numbers()
        .into_iter()
        .partition(|&field| sm.is_field_loaded(field));
    for field in unloaded {
        cached.set_loaded_field(field, false);
    }
    {
        let class = Arc::clone(previous.object_class());
        let mut fm = PopulateFieldManager::with_capture(class, ec, &mut cached, capture);
        sm.provide_fields(&loaded, &mut fm);
    }
    cached
}

// =============================================================================
// Tests
// =============================================================================
