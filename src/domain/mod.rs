//! Domain Layer
//!
//! Value objects and ports the cache core depends on. Concrete
//! implementations of the ports live in [`crate::adapters`].

pub mod identity;
pub mod metadata;
pub mod ports;
pub mod value;

pub use identity::{CachedId, IdKey, Identity, Version};
pub use metadata::{
    ClassMeta, ClassMetaBuilder, ContainerKind, ContainerMeta, FieldMeta, PersistenceModifier,
    RelationType, Role,
};
pub use ports::{
    ContainerWrapper, ExecutionContext, FieldConsumer, FieldSupplier, ObjectRef, StateManager,
};
pub use value::{Container, Scalar, TrackedContainer, Value};
