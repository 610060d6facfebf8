//! Cached Object Snapshots
//!
//! A [`CachedPC`] is the identity-decoupled, cacheable state of one
//! persistable object. Relations are held as identities or nested
//! snapshots, never as live object handles, so a snapshot can outlive every
//! session that produced it.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::domain::{CachedId, ClassMeta, Container, Identity, Scalar, Version};

/// Value stored for one field of a snapshot
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum CachedValue {
    Null,
    Scalar(Scalar),
    /// Self-describing identity (datastore or single-field)
    Id(Identity),
    /// Application identity paired with its class
    CachedId(CachedId),
    /// Embedded or serialized object
    Embedded(Box<CachedPC>),
    Container(Container<CachedValue>),
}

impl CachedValue {
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, CachedValue::Null)
    }

    /// Whether this value is an identity token
    pub fn is_reference(&self) -> bool {
        matches!(self, CachedValue::Id(_) | CachedValue::CachedId(_))
    }

    pub fn as_embedded(&self) -> Option<&CachedPC> {
        match self {
            CachedValue::Embedded(pc) => Some(pc),
            _ => None,
        }
    }

    pub fn as_container(&self) -> Option<&Container<CachedValue>> {
        match self {
            CachedValue::Container(c) => Some(c),
            _ => None,
        }
    }
}

/// Cacheable snapshot of a persistable object
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CachedPC {
    object_class: Arc<ClassMeta>,
    id: Option<Identity>,
    version: Option<Version>,
    /// Indexed by absolute field number; authoritative for `field_values`
    loaded_fields: Vec<bool>,
    field_values: BTreeMap<usize, CachedValue>,
}

impl CachedPC {
    /// Create a snapshot. `loaded_fields` is resized to the class field count.
    pub fn new(
        object_class: Arc<ClassMeta>,
        mut loaded_fields: Vec<bool>,
        version: Option<Version>,
        id: Option<Identity>,
    ) -> Self {
        loaded_fields.resize(object_class.field_count(), false);
        Self {
            object_class,
            id,
            version,
            loaded_fields,
            field_values: BTreeMap::new(),
        }
    }

    /// Snapshot with no fields loaded
    pub fn empty(object_class: Arc<ClassMeta>) -> Self {
        let count = object_class.field_count();
        Self::new(object_class, vec![false; count], None, None)
    }

    #[inline]
    pub fn object_class(&self) -> &Arc<ClassMeta> {
        &self.object_class
    }

    #[inline]
    pub fn class_name(&self) -> &str {
        self.object_class.name()
    }

    pub fn id(&self) -> Option<&Identity> {
        self.id.as_ref()
    }

    pub fn version(&self) -> Option<&Version> {
        self.version.as_ref()
    }

    pub fn set_version(&mut self, version: Option<Version>) {
        self.version = version;
    }

    pub fn set_field_value(&mut self, field: usize, value: CachedValue) {
        self.field_values.insert(field, value);
    }

    /// Stored value of a field. Check [`CachedPC::is_field_loaded`] first:
    /// a loaded field may legitimately hold `CachedValue::Null`.
    pub fn get_field_value(&self, field: usize) -> Option<&CachedValue> {
        self.field_values.get(&field)
    }

    /// Number of stored field values
    pub fn field_value_count(&self) -> usize {
        self.field_values.len()
    }

    /// Set a field's loaded flag. Unloading drops any stored value.
    /// Numbers beyond the class field count are ignored.
    pub fn set_loaded_field(&mut self, field: usize, loaded: bool) {
        if let Some(flag) = self.loaded_fields.get_mut(field) {
            *flag = loaded;
            if !loaded {
                self.field_values.remove(&field);
            }
        }
    }

    pub fn is_field_loaded(&self, field: usize) -> bool {
        self.loaded_fields.get(field).copied().unwrap_or(false)
    }

    pub fn loaded_fields(&self) -> &[bool] {
        &self.loaded_fields
    }

    /// Absolute numbers of the loaded fields, ascending
    pub fn loaded_field_numbers(&self) -> Vec<usize> {
        self.loaded_fields
            .iter()
            .enumerate()
            .filter_map(|(i, loaded)| loaded.then_some(i))
            .collect()
    }

    /// Deep copy: nested snapshots are duplicated, so the copy can be
    /// mutated without affecting a published instance.
    pub fn get_copy(&self) -> CachedPC {
        self.clone()
    }

    fn fmt_indented(&self, f: &mut std::fmt::Formatter<'_>, indent: usize) -> std::fmt::Result {
        let pad = " ".repeat(indent);
        let flags: String = self
            .loaded_fields
            .iter()
            .map(|l| if *l { 'Y' } else { 'N' })
            .collect();
        write!(f, "{}CachedPC : {}", pad, self.class_name())?;
        if let Some(id) = &self.id {
            write!(f, " id={}", id)?;
        }
        if let Some(v) = &self.version {
            write!(f, " version={}", v)?;
        }
        write!(f, " loadedFlags=[{}]", flags)?;
        for (n, value) in &self.field_values {
            if let CachedValue::Embedded(nested) = value {
                writeln!(f)?;
                write!(f, "{}  field {} =>", pad, n)?;
                writeln!(f)?;
                nested.fmt_indented(f, indent + 4)?;
            }
        }
        Ok(())
    }
}

impl std::fmt::Display for CachedPC {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.fmt_indented(f, 0)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::FieldMeta;

    fn person() -> Arc<ClassMeta> {
        ClassMeta::builder("Person")
            .field(FieldMeta::new("name"))
            .field(FieldMeta::new("age"))
            .field(FieldMeta::new("address").embedded())
            .build()
    }

    fn address() -> Arc<ClassMeta> {
        ClassMeta::builder("Address")
            .field(FieldMeta::new("street"))
            .build()
    }

    #[test]
    fn test_loaded_field_numbers() {
        let mut pc = CachedPC::empty(person());
        assert!(pc.loaded_field_numbers().is_empty());

        pc.set_loaded_field(0, true);
        pc.set_loaded_field(2, true);
        assert_eq!(pc.loaded_field_numbers(), vec![0, 2]);
        assert!(pc.is_field_loaded(2));
        assert!(!pc.is_field_loaded(1));
        assert!(!pc.is_field_loaded(99));
    }

    #[test]
    fn test_loaded_flags_resized_to_class() {
        let pc = CachedPC::new(person(), vec![true], None, None);
        assert_eq!(pc.loaded_fields(), &[true, false, false]);
    }

    #[test]
    fn test_unloading_drops_value() {
        let mut pc = CachedPC::empty(person());
        pc.set_loaded_field(0, true);
        pc.set_field_value(0, CachedValue::Scalar(Scalar::from("Ann")));
        assert_eq!(pc.field_value_count(), 1);

        pc.set_loaded_field(0, false);
        assert!(pc.get_field_value(0).is_none());
    }

    #[test]
    fn test_loaded_null_is_meaningful() {
        let mut pc = CachedPC::empty(person());
        pc.set_loaded_field(1, true);
        pc.set_field_value(1, CachedValue::Null);
        assert!(pc.is_field_loaded(1));
        assert_eq!(pc.get_field_value(1), Some(&CachedValue::Null));
    }

    #[test]
    fn test_copy_is_deep_for_nested_snapshots() {
        let mut nested = CachedPC::empty(address());
        nested.set_loaded_field(0, true);
        nested.set_field_value(0, CachedValue::Scalar(Scalar::from("Main St")));

        let mut pc = CachedPC::empty(person());
        pc.set_loaded_field(2, true);
        pc.set_field_value(2, CachedValue::Embedded(Box::new(nested)));

        let mut copy = pc.get_copy();
        assert_eq!(copy, pc);

        if let Some(CachedValue::Embedded(inner)) = copy.field_values.get_mut(&2) {
            inner.set_field_value(0, CachedValue::Scalar(Scalar::from("Side St")));
        }
        let original = pc.get_field_value(2).and_then(|v| v.as_embedded()).unwrap();
        assert_eq!(
            original.get_field_value(0),
            Some(&CachedValue::Scalar(Scalar::from("Main St")))
        );
        assert_ne!(copy, pc);
    }

    #[test]
    fn test_display_shows_flags() {
        let mut pc = CachedPC::new(
            person(),
            vec![true, false, false],
            Some(Version::Number(3)),
            Some(Identity::datastore("Person", 1)),
        );
        pc.set_field_value(0, CachedValue::Scalar(Scalar::from("Ann")));
        let text = pc.to_string();
        assert!(text.contains("Person"));
        assert!(text.contains("loadedFlags=[YNN]"));
        assert!(text.contains("version=v3"));
    }

    #[test]
    fn test_serde_roundtrip() {
        let mut pc = CachedPC::empty(person());
        pc.set_loaded_field(0, true);
        pc.set_field_value(0, CachedValue::Scalar(Scalar::from("Ann")));
        let json = serde_json::to_string(&pc).unwrap();
        let back: CachedPC = serde_json::from_str(&json).unwrap();
        assert_eq!(back, pc);
    }
}
