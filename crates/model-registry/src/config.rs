//! Centralized configuration for the model registry.
//!
//! Constants live on [`RegistryConfig`]; [`RegistrySettings`] is the
//! deserializable form a host application embeds in its own config file to
//! choose an engine at construction time.

use crate::error::Result;
use crate::persistence::{atomic_read_json, atomic_write_json};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Registry-level constants.
pub struct RegistryConfig;

impl RegistryConfig {
    /// Schema version written to, and required from, every durable store.
    pub const CONFIG_FILE_VERSION: &'static str = "3.2";
    pub const BUSY_TIMEOUT_MS: u64 = 5_000;
    pub const DB_FILE_NAME: &'static str = "models.db";
    pub const JSON_FILE_NAME: &'static str = "models.json";
    pub const EVENT_CHANNEL_CAPACITY: usize = 256;
}

/// Storage engine backing a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Memory,
    File,
    Sqlite,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Memory => "memory",
            BackendKind::File => "file",
            BackendKind::Sqlite => "sqlite",
        }
    }

    /// File name used when the settings name a directory rather than a file.
    pub fn default_file_name(&self) -> Option<&'static str> {
        match self {
            BackendKind::Memory => None,
            BackendKind::File => Some(RegistryConfig::JSON_FILE_NAME),
            BackendKind::Sqlite => Some(RegistryConfig::DB_FILE_NAME),
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Engine selection for [`crate::open_store`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct RegistrySettings {
    pub backend: BackendKind,
    /// Store location; a directory gets the backend's default file name.
    /// Ignored by the memory backend, required by the others.
    pub path: Option<PathBuf>,
    /// Keep a `.bak` copy of the previous JSON file on every write.
    pub keep_backup: bool,
}

impl RegistrySettings {
    pub fn memory() -> Self {
        Self::default()
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            backend: BackendKind::File,
            path: Some(path.into()),
            keep_backup: false,
        }
    }

    pub fn sqlite(path: impl Into<PathBuf>) -> Self {
        Self {
            backend: BackendKind::Sqlite,
            path: Some(path.into()),
            keep_backup: false,
        }
    }

    /// Load settings from a JSON file, falling back to defaults if it is missing.
    pub fn load(path: &Path) -> Result<Self> {
        Ok(atomic_read_json(path)?.unwrap_or_default())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        atomic_write_json(path, self, false)
    }

    /// Resolve the on-disk location for durable backends.
    pub fn resolved_path(&self) -> Option<PathBuf> {
        let path = self.path.as_ref()?;
        match self.backend.default_file_name() {
            Some(name) if path.is_dir() => Some(path.join(name)),
            _ => Some(path.clone()),
        }
    }
}
