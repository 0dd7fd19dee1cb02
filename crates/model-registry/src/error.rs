//! Error types for the model registry.
//!
//! Every registry operation reports failure through [`RegistryError`]. The
//! first group of variants is the registry contract itself; the second group
//! covers failures of whatever engine sits underneath.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    // Contract errors
    #[error("Duplicate model key: {key}")]
    DuplicateKey { key: String },

    #[error("Unknown model key: {key}")]
    UnknownKey { key: String },

    #[error("Invalid model config ({field}): {message}")]
    InvalidConfig { field: String, message: String },

    #[error("Store version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: String, found: String },

    #[error("Path {path:?} is already registered to model {existing_key}")]
    DuplicatePath { path: PathBuf, existing_key: String },

    // Engine errors
    #[error("Database error: {message}")]
    Database {
        message: String,
        #[source]
        source: Option<rusqlite::Error>,
    },

    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    #[error("Lock poisoned: {0}")]
    Lock(String),
}

/// Result type alias for registry operations.
pub type Result<T> = std::result::Result<T, RegistryError>;

impl From<std::io::Error> for RegistryError {
    fn from(err: std::io::Error) -> Self {
        RegistryError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for RegistryError {
    fn from(err: serde_json::Error) -> Self {
        RegistryError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<rusqlite::Error> for RegistryError {
    fn from(err: rusqlite::Error) -> Self {
        RegistryError::Database {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl RegistryError {
    /// Create a validation failure for a single payload field.
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        RegistryError::InvalidConfig {
            field: field.into(),
            message: message.into(),
        }
    }

    /// The key (or path) the caller asked for does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, RegistryError::UnknownKey { .. })
    }

    /// The write collided with an existing record; pick a different key or path.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            RegistryError::DuplicateKey { .. } | RegistryError::DuplicatePath { .. }
        )
    }

    /// The payload itself must be fixed before retrying.
    pub fn is_invalid(&self) -> bool {
        matches!(self, RegistryError::InvalidConfig { .. })
    }
}
