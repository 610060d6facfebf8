//! Domain Ports
//!
//! The contracts through which the cache talks to the rest of the
//! persistence engine. The cache never sees live domain objects directly:
//! it walks them through a [`StateManager`] using the field-manager callback
//! protocol ([`FieldConsumer`] when fields are provided, [`FieldSupplier`]
//! when fields are replaced), and resolves identities through the owning
//! [`ExecutionContext`].

use std::any::Any;
use std::sync::Arc;

use super::identity::{Identity, Version};
use super::metadata::{ClassMeta, ContainerKind};
use super::value::{Container, TrackedContainer, Value};
use crate::config::CacheConfig;
use crate::error::Result;

/// Shared handle to a managed object
pub type ObjectRef = Arc<dyn StateManager>;

/// Receives field values from [`StateManager::provide_fields`]
pub trait FieldConsumer {
    fn store_field(&mut self, field: usize, value: Value);
}

/// Supplies field values to [`StateManager::replace_fields`]
pub trait FieldSupplier {
    fn fetch_field(&mut self, field: usize) -> Value;
}

/// State access for one managed object
pub trait StateManager: Send + Sync {
    /// Metadata of the object's runtime class
    fn class_meta(&self) -> Arc<ClassMeta>;

    /// Identity, `None` for embedded or not-yet-persisted objects
    fn identity(&self) -> Option<Identity>;

    fn version(&self) -> Option<Version>;

    /// Absolute numbers of fields currently held in memory
    fn loaded_field_numbers(&self) -> Vec<usize>;

    /// Absolute numbers of fields modified since the last flush
    fn dirty_field_numbers(&self) -> Vec<usize>;

    fn is_field_loaded(&self, field: usize) -> bool;

    /// Hand each requested field's current value to `consumer`
    fn provide_fields(&self, fields: &[usize], consumer: &mut dyn FieldConsumer);

    /// Replace each requested field with the value `supplier` fetches, marking it loaded
    fn replace_fields(&self, fields: &[usize], supplier: &mut dyn FieldSupplier);

    /// Forget the in-memory value of a field so the next access reloads it
    fn unload_field(&self, field: usize);

    /// Concrete object behind the handle, for owners that need their own type back
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

/// Second-class container wrapper that tracks mutations and may load lazily
pub trait ContainerWrapper: Send + Sync {
    fn kind(&self) -> ContainerKind;

    /// Whether the contents are currently in memory
    fn is_loaded(&self) -> bool;

    /// Copy of the raw contents; fails if they are not loaded
    fn snapshot(&self) -> Result<Container<Value>>;
}

/// The owning persistence context as seen by the cache
pub trait ExecutionContext: Send + Sync {
    fn config(&self) -> &CacheConfig;

    /// Find an object by identity. May hit the session cache, the Level-2
    /// cache or the datastore, and may re-enter snapshot retrieval.
    fn find_object(&self, id: &Identity, class_name: Option<&str>) -> Result<ObjectRef>;

    /// Create a new managed object embedded in `owner`'s `field`
    fn new_embedded_object(
        &self,
        class: &Arc<ClassMeta>,
        owner: &dyn StateManager,
        field: usize,
    ) -> Result<ObjectRef>;

    /// Wrap a rebuilt container so that later mutations are tracked
    fn wrap_container(
        &self,
        _owner: &dyn StateManager,
        _field: usize,
        container: Container<Value>,
    ) -> Result<Value> {
        Ok(Value::Wrapped(Arc::new(TrackedContainer::new(container))))
    }
}
