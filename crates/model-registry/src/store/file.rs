//! JSON file engine.
//!
//! The whole store lives in one file:
//!
//! ```json
//! { "version": "3.2", "models": { "<key>": { ...record... } } }
//! ```
//!
//! Records are served from memory. Each mutation is applied in memory and
//! written out atomically while the write lock is still held; if the write
//! fails the in-memory change is undone, so memory and disk never diverge.

use crate::config::RegistryConfig;
use crate::error::{RegistryError, Result};
use crate::models::{normalize_locator, normalize_query_tags, BaseModelType, ModelConfig, ModelType};
use crate::persistence::{atomic_write_json, read_file_string};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, warn};

use super::indexes::IndexedModels;
use super::{check_version, ModelConfigStore, MISSING_VERSION};

/// Only the header; parsed before any record is touched.
#[derive(Deserialize)]
struct StoreHeader {
    #[serde(default)]
    version: Option<String>,
}

#[derive(Deserialize)]
struct StoreFile {
    #[serde(default)]
    models: BTreeMap<String, ModelConfig>,
}

#[derive(Serialize)]
struct StoreFileRef<'a> {
    version: &'a str,
    models: BTreeMap<&'a str, &'a ModelConfig>,
}

/// Store persisted as a single atomically-rewritten JSON file.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    keep_backup: bool,
    models: RwLock<IndexedModels>,
}

impl FileStore {
    /// Open the store at `path`, creating an empty one if the file is missing.
    ///
    /// Fails with `VersionMismatch` if the file was written under another
    /// schema version.
    pub fn open(path: impl Into<PathBuf>, keep_backup: bool) -> Result<Self> {
        let path = path.into();

        let models = match read_file_string(&path)? {
            Some(contents) => Self::load(&path, &contents)?,
            None => {
                let models = IndexedModels::new();
                Self::write_file(&path, &models, false)?;
                info!("Created model config store at {}", path.display());
                models
            }
        };

        debug!(
            "Opened model config store {} ({} records)",
            path.display(),
            models.len()
        );

        Ok(Self {
            path,
            keep_backup,
            models: RwLock::new(models),
        })
    }

    /// Location of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(path: &Path, contents: &str) -> Result<IndexedModels> {
        let header: StoreHeader = serde_json::from_str(contents).map_err(|e| RegistryError::Json {
            message: format!("Failed to parse header of {}: {}", path.display(), e),
            source: Some(e),
        })?;
        check_version(header.version.as_deref().unwrap_or(MISSING_VERSION))?;

        let file: StoreFile = serde_json::from_str(contents).map_err(|e| RegistryError::Json {
            message: format!("Failed to parse {}: {}", path.display(), e),
            source: Some(e),
        })?;

        let mut records = Vec::with_capacity(file.models.len());
        for (key, mut record) in file.models {
            if record.key.is_empty() {
                record.key = key;
            } else if record.key != key {
                return Err(RegistryError::invalid(
                    "key",
                    format!(
                        "record stored under '{}' claims key '{}' in {}",
                        key,
                        record.key,
                        path.display()
                    ),
                ));
            }
            records.push(record);
        }

        IndexedModels::from_records(records)
    }

    fn write_file(path: &Path, models: &IndexedModels, keep_backup: bool) -> Result<()> {
        let snapshot = StoreFileRef {
            version: RegistryConfig::CONFIG_FILE_VERSION,
            models: models
                .records()
                .map(|record| (record.key.as_str(), record))
                .collect(),
        };
        atomic_write_json(path, &snapshot, keep_backup)
    }

    fn persist(&self, models: &IndexedModels) -> Result<()> {
        Self::write_file(&self.path, models, self.keep_backup)
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, IndexedModels>> {
        self.models
            .read()
            .map_err(|_| RegistryError::Lock(format!("file store {}", self.path.display())))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, IndexedModels>> {
        self.models
            .write()
            .map_err(|_| RegistryError::Lock(format!("file store {}", self.path.display())))
    }
}

impl ModelConfigStore for FileStore {
    fn version(&self) -> &str {
        RegistryConfig::CONFIG_FILE_VERSION
    }

    fn add_model(&self, config: ModelConfig) -> Result<ModelConfig> {
        let mut models = self.write()?;
        models.insert(config.clone())?;

        if let Err(e) = self.persist(&models) {
            warn!("Rolling back add of {}: {}", config.key, e);
            let _ = models.remove(&config.key);
            return Err(e);
        }

        debug!("Inserted model config: {}", config.key);
        Ok(config)
    }

    fn update_model(&self, mut config: ModelConfig) -> Result<ModelConfig> {
        let mut models = self.write()?;
        if config.created_at.is_none() {
            config.created_at = models
                .get(&config.key)
                .and_then(|existing| existing.created_at.clone());
        }
        let previous = models.replace(config.clone())?;

        if let Err(e) = self.persist(&models) {
            warn!("Rolling back update of {}: {}", config.key, e);
            let _ = models.replace(previous);
            return Err(e);
        }

        debug!("Replaced model config: {}", config.key);
        Ok(config)
    }

    fn del_model(&self, key: &str) -> Result<ModelConfig> {
        let mut models = self.write()?;
        let removed = models.remove(key)?;

        if let Err(e) = self.persist(&models) {
            warn!("Rolling back delete of {}: {}", key, e);
            let _ = models.insert(removed);
            return Err(e);
        }

        debug!("Removed model config: {}", key);
        Ok(removed)
    }

    fn get_model(&self, key: &str) -> Result<ModelConfig> {
        self.read()?
            .get(key)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownKey {
                key: key.to_string(),
            })
    }

    fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.read()?.contains(key))
    }

    fn search_by_tag(&self, tags: &BTreeSet<String>) -> Result<Vec<ModelConfig>> {
        let Some(tags) = normalize_query_tags(tags) else {
            return Ok(Vec::new());
        };
        Ok(self.read()?.search_by_tag(&tags))
    }

    fn search_by_path(&self, path: &Path) -> Result<Option<ModelConfig>> {
        let Some(path) = normalize_locator(path) else {
            return Ok(None);
        };
        Ok(self.read()?.search_by_path(&path))
    }

    fn search_by_name(
        &self,
        name: Option<&str>,
        base_model: Option<BaseModelType>,
        model_type: Option<ModelType>,
    ) -> Result<Vec<ModelConfig>> {
        Ok(self.read()?.search_by_name(name, base_model, model_type))
    }

    fn count(&self) -> Result<usize> {
        Ok(self.read()?.len())
    }
}
