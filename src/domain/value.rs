//! Field Values
//!
//! Live field values exchanged with state managers: scalars, references to
//! other managed objects, and containers. Containers are a closed tagged
//! union over list/set/array/map so encode and decode can dispatch on the
//! variant without reflective type lookup.

use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::metadata::ContainerKind;
use super::ports::{ContainerWrapper, ObjectRef};
use crate::error::{Error, Result};

/// Non-persistable field value
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Scalar {
    Bool(bool),
    Char(char),
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(#[serde(with = "float_repr::float")] f32),
    Double(#[serde(with = "float_repr::double")] f64),
    String(String),
    Date(DateTime<Utc>),
    Uuid(Uuid),
    Binary(Vec<u8>),
}

/// Serde form for floats: finite values as plain numbers, NaN and the
/// infinities as their hex bit pattern, which JSON has no literal for
mod float_repr {
    use serde::Deserialize;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(f64),
        Bits(String),
    }

    fn parse_bits<E: serde::de::Error>(text: &str) -> std::result::Result<u64, E> {
        text.strip_prefix("0x")
            .and_then(|hex| u64::from_str_radix(hex, 16).ok())
            .ok_or_else(|| E::custom(format!("invalid float bit pattern '{}'", text)))
    }

    pub mod float {
        use super::{parse_bits, Repr};
        use serde::de::Error as _;
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(v: &f32, s: S) -> std::result::Result<S::Ok, S::Error> {
            if v.is_finite() {
                s.serialize_f32(*v)
            } else {
                s.serialize_str(&format!("0x{:08x}", v.to_bits()))
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<f32, D::Error> {
            match Repr::deserialize(d)? {
                Repr::Number(n) => Ok(n as f32),
                Repr::Bits(text) => {
                    let bits = parse_bits::<D::Error>(&text)?;
                    u32::try_from(bits)
                        .map(f32::from_bits)
                        .map_err(|_| D::Error::custom(format!("'{}' is wider than f32", text)))
                }
            }
        }
    }

    pub mod double {
        use super::{parse_bits, Repr};
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(v: &f64, s: S) -> std::result::Result<S::Ok, S::Error> {
            if v.is_finite() {
                s.serialize_f64(*v)
            } else {
                s.serialize_str(&format!("0x{:016x}", v.to_bits()))
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<f64, D::Error> {
            match Repr::deserialize(d)? {
                Repr::Number(n) => Ok(n),
                Repr::Bits(text) => parse_bits::<D::Error>(&text).map(f64::from_bits),
            }
        }
    }
}

impl PartialEq for Scalar {
    fn eq(&self, other: &Self) -> bool {
        use Scalar::*;
        match (self, other) {
            (Bool(a), Bool(b)) => a == b,
            (Char(a), Char(b)) => a == b,
            (Byte(a), Byte(b)) => a == b,
            (Short(a), Short(b)) => a == b,
            (Int(a), Int(b)) => a == b,
            (Long(a), Long(b)) => a == b,
            // Bitwise so that Eq and Hash agree (NaN == NaN)
            (Float(a), Float(b)) => a.to_bits() == b.to_bits(),
            (Double(a), Double(b)) => a.to_bits() == b.to_bits(),
            (String(a), String(b)) => a == b,
            (Date(a), Date(b)) => a == b,
            (Uuid(a), Uuid(b)) => a == b,
            (Binary(a), Binary(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Scalar {}

impl Hash for Scalar {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Scalar::Bool(v) => v.hash(state),
            Scalar::Char(v) => v.hash(state),
            Scalar::Byte(v) => v.hash(state),
            Scalar::Short(v) => v.hash(state),
            Scalar::Int(v) => v.hash(state),
            Scalar::Long(v) => v.hash(state),
            Scalar::Float(v) => v.to_bits().hash(state),
            Scalar::Double(v) => v.to_bits().hash(state),
            Scalar::String(v) => v.hash(state),
            Scalar::Date(v) => v.hash(state),
            Scalar::Uuid(v) => v.hash(state),
            Scalar::Binary(v) => v.hash(state),
        }
    }
}

impl std::fmt::Display for Scalar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Scalar::Bool(v) => write!(f, "{}", v),
            Scalar::Char(v) => write!(f, "{}", v),
            Scalar::Byte(v) => write!(f, "{}", v),
            Scalar::Short(v) => write!(f, "{}", v),
            Scalar::Int(v) => write!(f, "{}", v),
            Scalar::Long(v) => write!(f, "{}", v),
            Scalar::Float(v) => write!(f, "{}", v),
            Scalar::Double(v) => write!(f, "{}", v),
            Scalar::String(v) => write!(f, "{}", v),
            Scalar::Date(v) => write!(f, "{}", v.to_rfc3339()),
            Scalar::Uuid(v) => write!(f, "{}", v),
            Scalar::Binary(v) => write!(f, "<{} bytes>", v.len()),
        }
    }
}

macro_rules! scalar_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Scalar {
                fn from(v: $ty) -> Self {
                    Scalar::$variant(v)
                }
            }
        )*
    };
}

scalar_from! {
    bool => Bool,
    char => Char,
    i8 => Byte,
    i16 => Short,
    i32 => Int,
    i64 => Long,
    f32 => Float,
    f64 => Double,
    String => String,
    DateTime<Utc> => Date,
    Uuid => Uuid,
    Vec<u8> => Binary,
}

impl From<&str> for Scalar {
    fn from(v: &str) -> Self {
        Scalar::String(v.to_string())
    }
}

/// Container of values, tagged by shape
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Container<V> {
    List(Vec<V>),
    Set(Vec<V>),
    /// Arrays of any component type; the component type comes from metadata
    Array(Vec<V>),
    Map(Vec<(V, V)>),
}

impl<V> Container<V> {
    /// Empty container of the given kind
    pub fn empty(kind: ContainerKind) -> Self {
        match kind {
            ContainerKind::List => Container::List(Vec::new()),
            ContainerKind::Set => Container::Set(Vec::new()),
            ContainerKind::Array => Container::Array(Vec::new()),
            ContainerKind::Map => Container::Map(Vec::new()),
        }
    }

    pub fn kind(&self) -> ContainerKind {
        match self {
            Container::List(_) => ContainerKind::List,
            Container::Set(_) => ContainerKind::Set,
            Container::Array(_) => ContainerKind::Array,
            Container::Map(_) => ContainerKind::Map,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Container::List(v) | Container::Set(v) | Container::Array(v) => v.len(),
            Container::Map(m) => m.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Elements of a list/set/array, `None` for maps
    pub fn elements(&self) -> Option<&[V]> {
        match self {
            Container::List(v) | Container::Set(v) | Container::Array(v) => Some(v),
            Container::Map(_) => None,
        }
    }

    /// Entries of a map, `None` for element containers
    pub fn entries(&self) -> Option<&[(V, V)]> {
        match self {
            Container::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Rebuild a container of the same kind, converting each element, key and value.
    pub fn try_convert<W, F, G>(&self, mut element: F, mut entry: G) -> Result<Container<W>>
    where
        F: FnMut(&V) -> Result<W>,
        G: FnMut(&V, &V) -> Result<(W, W)>,
    {
        Ok(match self {
            Container::List(v) => Container::List(v.iter().map(&mut element).collect::<Result<_>>()?),
            Container::Set(v) => Container::Set(v.iter().map(&mut element).collect::<Result<_>>()?),
            Container::Array(v) => {
                Container::Array(v.iter().map(&mut element).collect::<Result<_>>()?)
            }
            Container::Map(m) => {
                Container::Map(m.iter().map(|(k, v)| entry(k, v)).collect::<Result<_>>()?)
            }
        })
    }

    /// Append to a list/set/array
    pub fn push(&mut self, value: V) -> Result<()> {
        match self {
            Container::List(v) | Container::Set(v) | Container::Array(v) => {
                v.push(value);
                Ok(())
            }
            Container::Map(_) => Err(Error::ContainerUnavailable(
                "cannot push a single element onto a map".to_string(),
            )),
        }
    }
}

/// Live field value
#[derive(Clone)]
pub enum Value {
    Null,
    Scalar(Scalar),
    /// Reference to another managed object
    Object(ObjectRef),
    /// Raw, unwrapped container
    Container(Container<Value>),
    /// Container behind a change-tracking wrapper, possibly not loaded yet
    Wrapped(Arc<dyn ContainerWrapper>),
}

impl Value {
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_scalar(&self) -> Option<&Scalar> {
        match self {
            Value::Scalar(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    /// Snapshot of the container held by this value (wrapped or raw)
    pub fn container_snapshot(&self) -> Option<Result<Container<Value>>> {
        match self {
            Value::Container(c) => Some(Ok(c.clone())),
            Value::Wrapped(w) => Some(w.snapshot()),
            _ => None,
        }
    }
}

macro_rules! value_from_scalar {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::Scalar(Scalar::from(v))
                }
            }
        )*
    };
}

value_from_scalar!(bool, char, i8, i16, i32, i64, f32, f64, String, &str, DateTime<Utc>, Uuid, Vec<u8>);

impl From<Scalar> for Value {
    fn from(v: Scalar) -> Self {
        Value::Scalar(v)
    }
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "Null"),
            Value::Scalar(s) => write!(f, "Scalar({:?})", s),
            Value::Object(o) => {
                let class = o.class_meta();
                match o.identity() {
                    Some(id) => write!(f, "Object({} {})", class.name(), id),
                    None => write!(f, "Object({} <no id>)", class.name()),
                }
            }
            Value::Container(c) => write!(f, "Container({:?})", c),
            Value::Wrapped(w) => write!(
                f,
                "Wrapped({}, loaded={})",
                w.kind(),
                w.is_loaded()
            ),
        }
    }
}

/// Change-tracking container wrapper.
///
/// Mutations through the wrapper mark it dirty; a wrapper created with
/// [`TrackedContainer::lazy`] reports itself unloaded until filled.
pub struct TrackedContainer {
    kind: ContainerKind,
    contents: RwLock<Option<Container<Value>>>,
    dirty: AtomicBool,
}

impl TrackedContainer {
    /// Wrap loaded contents
    pub fn new(container: Container<Value>) -> Self {
        Self {
            kind: container.kind(),
            contents: RwLock::new(Some(container)),
            dirty: AtomicBool::new(false),
        }
    }

    /// Wrapper whose contents have not been fetched yet
    pub fn lazy(kind: ContainerKind) -> Self {
        Self {
            kind,
            contents: RwLock::new(None),
            dirty: AtomicBool::new(false),
        }
    }

    /// Fill a lazy wrapper
    pub fn load(&self, container: Container<Value>) {
        *self.contents.write() = Some(container);
    }

    /// Append an element, marking the wrapper dirty
    pub fn push(&self, value: Value) -> Result<()> {
        let mut guard = self.contents.write();
        let contents = guard.as_mut().ok_or_else(|| {
            Error::ContainerUnavailable(format!("{} contents not loaded", self.kind))
        })?;
        contents.push(value)?;
        self.dirty.store(true, Ordering::Release);
        Ok(())
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    pub fn len(&self) -> Option<usize> {
        self.contents.read().as_ref().map(|c| c.len())
    }
}

impl ContainerWrapper for TrackedContainer {
    fn kind(&self) -> ContainerKind {
        self.kind
    }

    fn is_loaded(&self) -> bool {
        self.contents.read().is_some()
    }

    fn snapshot(&self) -> Result<Container<Value>> {
        self.contents.read().clone().ok_or_else(|| {
            Error::ContainerUnavailable(format!("{} contents not loaded", self.kind))
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
