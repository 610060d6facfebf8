//! Class and Field Metadata
//!
//! The narrow slice of persistence metadata the cache consults: per-field
//! persistence modifier, cacheability, relation type, embedded/serialized
//! flags and container element roles.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// How a field participates in persistence
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PersistenceModifier {
    #[default]
    Persistent,
    /// Managed inside a transaction but never written to the datastore
    Transactional,
    None,
}

/// Relation between the owning class and the field's target
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelationType {
    #[default]
    None,
    OneToOneUni,
    OneToOneBi,
    ManyToOneUni,
    ManyToOneBi,
    OneToManyUni,
    OneToManyBi,
    ManyToManyBi,
}

impl RelationType {
    /// Whether the field references other persistable objects
    pub fn is_relation(&self) -> bool {
        !matches!(self, RelationType::None)
    }

    /// 1-1 and N-1 relations
    pub fn is_single_valued(&self) -> bool {
        matches!(
            self,
            RelationType::OneToOneUni
                | RelationType::OneToOneBi
                | RelationType::ManyToOneUni
                | RelationType::ManyToOneBi
        )
    }

    /// 1-N and M-N relations
    pub fn is_multi_valued(&self) -> bool {
        matches!(
            self,
            RelationType::OneToManyUni | RelationType::OneToManyBi | RelationType::ManyToManyBi
        )
    }
}

/// Role of a container element, map key or map value
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    /// Non-persistable value (string, number, date, ...)
    #[default]
    Plain,
    /// Persistable object stored by reference
    Reference,
    /// Persistable object stored inline (embedded or serialized)
    Embedded,
}

impl Role {
    #[inline]
    pub fn is_persistent(&self) -> bool {
        !matches!(self, Role::Plain)
    }
}

/// Shape of a container-typed field
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContainerKind {
    List,
    Set,
    Array,
    Map,
}

impl std::fmt::Display for ContainerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContainerKind::List => write!(f, "list"),
            ContainerKind::Set => write!(f, "set"),
            ContainerKind::Array => write!(f, "array"),
            ContainerKind::Map => write!(f, "map"),
        }
    }
}

/// Container descriptor for collection, array and map fields
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerMeta {
    pub kind: ContainerKind,
    /// Element role (collections and arrays)
    pub element: Role,
    /// Key role (maps)
    pub key: Role,
    /// Value role (maps)
    pub value: Role,
    /// List order is kept in an index column
    pub indexed: bool,
}

impl ContainerMeta {
    /// List of elements; order kept by an index column unless `ordered_by` is used
    pub fn list(element: Role) -> Self {
        Self {
            kind: ContainerKind::List,
            element,
            key: Role::Plain,
            value: Role::Plain,
            indexed: true,
        }
    }

    pub fn set(element: Role) -> Self {
        Self {
            kind: ContainerKind::Set,
            ..Self::list(element)
        }
    }

    pub fn array(element: Role) -> Self {
        Self {
            kind: ContainerKind::Array,
            ..Self::list(element)
        }
    }

    pub fn map(key: Role, value: Role) -> Self {
        Self {
            kind: ContainerKind::Map,
            element: Role::Plain,
            key,
            value,
            indexed: false,
        }
    }

    /// Mark a list as ordered by the datastore query rather than an index column
    pub fn ordered_by_query(mut self) -> Self {
        self.indexed = false;
        self
    }

    /// Any key/value/element is a persistable object
    pub fn has_relations(&self) -> bool {
        match self.kind {
            ContainerKind::Map => self.key.is_persistent() || self.value.is_persistent(),
            _ => self.element.is_persistent(),
        }
    }

    /// Any key/value/element is stored inline
    pub fn has_embedded(&self) -> bool {
        match self.kind {
            ContainerKind::Map => self.key == Role::Embedded || self.value == Role::Embedded,
            _ => self.element == Role::Embedded,
        }
    }
}

/// Field metadata
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMeta {
    /// Absolute field number (inherited fields first)
    pub number: usize,
    pub name: String,
    pub persistence: PersistenceModifier,
    /// Whether values of this field may enter the Level-2 cache
    pub cacheable: bool,
    pub relation: RelationType,
    pub embedded: bool,
    pub serialized: bool,
    /// Target class of a single-valued relation
    pub related_class: Option<String>,
    pub container: Option<ContainerMeta>,
}

impl FieldMeta {
    /// Persistent, cacheable, non-relation field. The number is assigned by
    /// [`ClassMetaBuilder`].
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            number: 0,
            name: name.into(),
            persistence: PersistenceModifier::Persistent,
            cacheable: true,
            relation: RelationType::None,
            embedded: false,
            serialized: false,
            related_class: None,
            container: None,
        }
    }

    pub fn transactional(mut self) -> Self {
        self.persistence = PersistenceModifier::Transactional;
        self
    }

    pub fn not_cacheable(mut self) -> Self {
        self.cacheable = false;
        self
    }

    /// Single-valued relation to `class_name`
    pub fn relation(mut self, relation: RelationType, class_name: impl Into<String>) -> Self {
        self.relation = relation;
        self.related_class = Some(class_name.into());
        self
    }

    pub fn embedded(mut self) -> Self {
        self.embedded = true;
        self
    }

    pub fn serialized(mut self) -> Self {
        self.serialized = true;
        self
    }

    /// Container-typed field; containers of persistable objects also set the relation
    pub fn container(mut self, container: ContainerMeta) -> Self {
        if container.has_relations() && !self.relation.is_relation() {
            self.relation = RelationType::OneToManyUni;
        }
        self.container = Some(container);
        self
    }

    pub fn with_relation_type(mut self, relation: RelationType) -> Self {
        self.relation = relation;
        self
    }

    #[inline]
    pub fn is_transactional(&self) -> bool {
        self.persistence == PersistenceModifier::Transactional
    }

    /// Stored inline with its owner
    #[inline]
    pub fn is_inline(&self) -> bool {
        self.embedded || self.serialized
    }
}

/// Class metadata with absolute field numbering across the hierarchy
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassMeta {
    name: String,
    superclass: Option<Arc<ClassMeta>>,
    fields: Vec<FieldMeta>,
    /// Field names of each declared unique key
    unique_keys: Vec<Vec<String>>,
}

impl ClassMeta {
    /// Start building metadata for a class
    pub fn builder(name: impl Into<String>) -> ClassMetaBuilder {
        ClassMetaBuilder {
            name: name.into(),
            superclass: None,
            fields: Vec::new(),
            unique_keys: Vec::new(),
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn superclass(&self) -> Option<&Arc<ClassMeta>> {
        self.superclass.as_ref()
    }

    /// Total number of fields including inherited ones
    #[inline]
    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    pub fn field(&self, number: usize) -> Option<&FieldMeta> {
        self.fields.get(number)
    }

    pub fn field_by_name(&self, name: &str) -> Option<&FieldMeta> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn fields(&self) -> &[FieldMeta] {
        &self.fields
    }

    pub fn unique_keys(&self) -> &[Vec<String>] {
        &self.unique_keys
    }

    /// Whether `other` is this class or one of its subclasses
    pub fn is_assignable_from(&self, other: &ClassMeta) -> bool {
        let mut current = Some(other);
        while let Some(cls) = current {
            if cls.name == self.name {
                return true;
            }
            current = cls.superclass.as_deref();
        }
        false
    }
}

/// Builder for [`ClassMeta`]
#[derive(Debug)]
pub struct ClassMetaBuilder {
    name: String,
    superclass: Option<Arc<ClassMeta>>,
    fields: Vec<FieldMeta>,
    unique_keys: Vec<Vec<String>>,
}

impl ClassMetaBuilder {
    /// Inherit the fields of `parent`; must be called before adding fields
    pub fn extends(mut self, parent: &Arc<ClassMeta>) -> Self {
        let mut inherited = parent.fields.clone();
        inherited.append(&mut self.fields);
        for (i, f) in inherited.iter_mut().enumerate() {
            f.number = i;
        }
        self.fields = inherited;
        self.unique_keys.extend(parent.unique_keys.iter().cloned());
        self.superclass = Some(Arc::clone(parent));
        self
    }

    pub fn field(mut self, mut field: FieldMeta) -> Self {
        field.number = self.fields.len();
        self.fields.push(field);
        self
    }

    /// Declare a unique key over the named fields
    pub fn unique<I, S>(mut self, field_names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.unique_keys
            .push(field_names.into_iter().map(Into::into).collect());
        self
    }

    pub fn build(self) -> Arc<ClassMeta> {
        Arc::new(ClassMeta {
            name: self.name,
            superclass: self.superclass,
            fields: self.fields,
            unique_keys: self.unique_keys,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn hierarchy() -> (Arc<ClassMeta>, Arc<ClassMeta>) {
        let base = ClassMeta::builder("Vehicle")
            .field(FieldMeta::new("id"))
            .field(FieldMeta::new("make"))
            .build();
        let car = ClassMeta::builder("Car")
            .extends(&base)
            .field(FieldMeta::new("doors"))
            .build();
        (base, car)
    }

    #[test]
    fn test_absolute_field_numbering() {
        let (base, car) = hierarchy();
        assert_eq!(base.field_count(), 2);
        assert_eq!(car.field_count(), 3);
        assert_eq!(car.field_by_name("doors").map(|f| f.number), Some(2));
        assert_eq!(car.field(1).map(|f| f.name.as_str()), Some("make"));
    }

    #[test]
    fn test_assignability() {
        let (base, car) = hierarchy();
        assert!(base.is_assignable_from(&car));
        assert!(base.is_assignable_from(&base));
        assert!(!car.is_assignable_from(&base));
    }

    #[test]
    fn test_container_roles() {
        let plain = ContainerMeta::list(Role::Plain);
        assert!(!plain.has_relations());
        assert!(plain.indexed);

        let map = ContainerMeta::map(Role::Plain, Role::Embedded);
        assert!(map.has_relations());
        assert!(map.has_embedded());

        let field = FieldMeta::new("items").container(ContainerMeta::set(Role::Reference));
        assert!(field.relation.is_multi_valued());
    }

    #[test]
    fn test_relation_classification() {
        assert!(RelationType::ManyToOneBi.is_single_valued());
        assert!(RelationType::ManyToManyBi.is_multi_valued());
        assert!(!RelationType::None.is_relation());
    }
}
