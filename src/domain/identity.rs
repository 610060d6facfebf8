//! Object Identity Value Objects
//!
//! Identities are the only way a cached snapshot refers to another
//! persistable object. Datastore and single-field identities carry their
//! owning class; application identities do not, so the cache wraps them in
//! a [`CachedId`] when it needs to resolve them later.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One component of an identity key
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum IdKey {
    Long(i64),
    String(String),
    Uuid(Uuid),
}

impl std::fmt::Display for IdKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IdKey::Long(v) => write!(f, "{}", v),
            IdKey::String(v) => write!(f, "{}", v),
            IdKey::Uuid(v) => write!(f, "{}", v),
        }
    }
}

impl From<i64> for IdKey {
    fn from(v: i64) -> Self {
        IdKey::Long(v)
    }
}

impl From<&str> for IdKey {
    fn from(v: &str) -> Self {
        IdKey::String(v.to_string())
    }
}

impl From<String> for IdKey {
    fn from(v: String) -> Self {
        IdKey::String(v)
    }
}

impl From<Uuid> for IdKey {
    fn from(v: Uuid) -> Self {
        IdKey::Uuid(v)
    }
}

/// Identity of a persistable object
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Identity {
    /// Surrogate key assigned by the datastore
    Datastore { class_name: String, key: i64 },
    /// Application identity made of a single primary-key field
    SingleField { class_name: String, key: IdKey },
    /// Arbitrary (possibly composite) application identity
    Application(Vec<IdKey>),
}

impl Identity {
    /// Create a datastore identity
    pub fn datastore(class_name: impl Into<String>, key: i64) -> Self {
        Identity::Datastore {
            class_name: class_name.into(),
            key,
        }
    }

    /// Create a single-field identity
    pub fn single_field(class_name: impl Into<String>, key: impl Into<IdKey>) -> Self {
        Identity::SingleField {
            class_name: class_name.into(),
            key: key.into(),
        }
    }

    /// Create an application identity from its key components
    pub fn application<I, K>(keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<IdKey>,
    {
        Identity::Application(keys.into_iter().map(Into::into).collect())
    }

    /// Whether this identity names its owning class
    #[inline]
    pub fn is_self_describing(&self) -> bool {
        !matches!(self, Identity::Application(_))
    }

    /// Class encoded in the identity, if any
    pub fn target_class_name(&self) -> Option<&str> {
        match self {
            Identity::Datastore { class_name, .. } | Identity::SingleField { class_name, .. } => {
                Some(class_name)
            }
            Identity::Application(_) => None,
        }
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Identity::Datastore { class_name, key } => write!(f, "{}[OID]{}", key, class_name),
            Identity::SingleField { class_name, key } => write!(f, "{}:{}", class_name, key),
            Identity::Application(keys) => {
                write!(f, "[")?;
                for (i, k) in keys.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}", k)?;
                }
                write!(f, "]")
            }
        }
    }
}

/// Identity paired with the class it belongs to.
///
/// Used in snapshots for identities that cannot name their own class.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CachedId {
    class_name: String,
    id: Identity,
}

impl CachedId {
    /// Create a new cached id
    pub fn new(class_name: impl Into<String>, id: Identity) -> Self {
        Self {
            class_name: class_name.into(),
            id,
        }
    }

    /// Get the owning class name
    #[inline]
    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    /// Get the wrapped identity
    #[inline]
    pub fn id(&self) -> &Identity {
        &self.id
    }
}

impl std::fmt::Display for CachedId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CachedId({}, {})", self.class_name, self.id)
    }
}

/// Datastore-supplied optimistic concurrency token
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Version {
    Number(i64),
    Timestamp(DateTime<Utc>),
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Version::Number(v) => write!(f, "v{}", v),
            Version::Timestamp(t) => write!(f, "{}", t.to_rfc3339()),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
