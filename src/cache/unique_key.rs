//! Unique-Key Cache Keys
//!
//! Alternate lookup key for objects found through a unique constraint
//! rather than their identity.

use std::hash::{Hash, Hasher};

use crate::domain::{FieldConsumer, Scalar, StateManager, Value};

/// FxHash-style hasher (non-cryptographic, fast)
struct FxHasher {
    hash: u64,
}

impl FxHasher {
    const SEED: u64 = 0x517cc1b727220a95;

    fn new() -> Self {
        Self { hash: Self::SEED }
    }
}

impl Hasher for FxHasher {
    fn write(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.hash = self.hash.rotate_left(5) ^ (byte as u64);
            self.hash = self.hash.wrapping_mul(Self::SEED);
        }
    }

    fn finish(&self) -> u64 {
        self.hash
    }
}

/// Key built from a class name and the values of a unique key's fields
#[derive(Clone, Debug, Eq)]
pub struct CacheUniqueKey {
    /// Pre-computed hash over the whole tuple
    hash: u64,
    class_name: String,
    field_names: Vec<String>,
    field_values: Vec<Scalar>,
    display: String,
}

impl CacheUniqueKey {
    /// Create a key from `(field name, value)` pairs
    pub fn new<I, N, V>(class_name: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = (N, V)>,
        N: Into<String>,
        V: Into<Scalar>,
    {
        let class_name = class_name.into();
        let (field_names, field_values): (Vec<String>, Vec<Scalar>) = fields
            .into_iter()
            .map(|(n, v)| (n.into(), v.into()))
            .unzip();

        let mut hasher = FxHasher::new();
        class_name.hash(&mut hasher);
        field_names.hash(&mut hasher);
        field_values.hash(&mut hasher);

        let pairs: Vec<String> = field_names
            .iter()
            .zip(&field_values)
            .map(|(n, v)| format!("{}={}", n, v))
            .collect();
        let display = format!("{}[{}]", class_name, pairs.join(","));

        Self {
            hash: hasher.finish(),
            class_name,
            field_names,
            field_values,
            display,
        }
    }

    /// Key for a live object, from the current values of `field_names`.
    ///
    /// Returns `None` if any of the fields is unknown, not loaded, or not a
    /// scalar value.
    pub fn for_object(sm: &dyn StateManager, field_names: &[String]) -> Option<Self> {
        let class = sm.class_meta();
        let mut numbers = Vec::with_capacity(field_names.len());
        for name in field_names {
            let field = class.field_by_name(name)?;
            if !sm.is_field_loaded(field.number) {
                return None;
            }
            numbers.push(field.number);
        }

        let mut collector = ScalarCollector::default();
        sm.provide_fields(&numbers, &mut collector);

        let mut pairs = Vec::with_capacity(numbers.len());
        for (name, number) in field_names.iter().zip(&numbers) {
            let value = collector
                .values
                .iter()
                .find(|(n, _)| n == number)
                .and_then(|(_, v)| v.clone())?;
            pairs.push((name.clone(), value));
        }
        Some(Self::new(class.name(), pairs))
    }

    #[inline]
    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn field_names(&self) -> &[String] {
        &self.field_names
    }

    pub fn field_values(&self) -> &[Scalar] {
        &self.field_values
    }

    /// Pre-computed hash
    #[inline]
    pub fn hash_code(&self) -> u64 {
        self.hash
    }
}

impl PartialEq for CacheUniqueKey {
    fn eq(&self, other: &Self) -> bool {
        // Fast path: compare hashes first
        if self.hash != other.hash {
            return false;
        }
        // Full comparison so that hash collisions never alias two keys
        self.class_name == other.class_name
            && self.field_names == other.field_names
            && self.field_values == other.field_values
    }
}

impl Hash for CacheUniqueKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.hash.hash(state);
    }
}

impl std::fmt::Display for CacheUniqueKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.display)
    }
}

#[derive(Default)]
struct ScalarCollector {
    values: Vec<(usize, Option<Scalar>)>,
}

impl FieldConsumer for ScalarCollector {
    fn store_field(&mut self, field: usize, value: Value) {
        let scalar = match value {
            Value::Scalar(s) => Some(s),
            _ => None,
        };
        self.values.push((field, scalar));
    }
}

// =============================================================================
// Tests
// =============================================================================
