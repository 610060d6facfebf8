//! Error types for the object cache

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the object cache and its collaborators
#[derive(Error, Debug)]
#[allow(clippy::enum_variant_names)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    // =========================================================================
    // Object Resolution Errors
    // =========================================================================
    /// Identity no longer resolves to a persistent object
    #[error("Object not found: {id}")]
    ObjectNotFound { id: String },

    /// Object has no identity and cannot be referenced from a snapshot
    #[error("Object of class {class_name} has no identity")]
    MissingIdentity { class_name: String },

    /// Field value could not be rebuilt from a snapshot
    #[error("Failed to reconstruct field {field}: {reason}")]
    Reconstruction { field: usize, reason: String },

    /// Container contents could not be read or built
    #[error("Container unavailable: {0}")]
    ContainerUnavailable(String),

    // =========================================================================
    // Provider / Serialization Errors
    // =========================================================================
    /// JSON (de)serialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML configuration parse failure
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Cache provider failure
    #[error("Cache provider error: {0}")]
    Provider(String),
}

impl Error {
    /// Returns true if this error means the referenced object is gone
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::ObjectNotFound { .. })
    }
}
