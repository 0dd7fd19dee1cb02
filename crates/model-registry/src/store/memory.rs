//! In-memory engine.

use crate::config::RegistryConfig;
use crate::error::{RegistryError, Result};
use crate::models::{normalize_locator, normalize_query_tags, BaseModelType, ModelConfig, ModelType};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

use super::indexes::IndexedModels;
use super::ModelConfigStore;

/// Process-local store; contents are lost when it is dropped.
///
/// One `RwLock` guards the records and every index together, so readers run
/// in parallel and never see a mutation half applied.
#[derive(Debug, Default)]
pub struct MemoryStore {
    models: RwLock<IndexedModels>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, IndexedModels>> {
        self.models
            .read()
            .map_err(|_| RegistryError::Lock("memory store".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, IndexedModels>> {
        self.models
            .write()
            .map_err(|_| RegistryError::Lock("memory store".to_string()))
    }
}

impl ModelConfigStore for MemoryStore {
    fn version(&self) -> &str {
        RegistryConfig::CONFIG_FILE_VERSION
    }

    fn add_model(&self, config: ModelConfig) -> Result<ModelConfig> {
        self.write()?.insert(config.clone())?;
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
        models.replace(config.clone())?;
        debug!("Replaced model config: {}", config.key);
        Ok(config)
    }

    fn del_model(&self, key: &str) -> Result<ModelConfig> {
        let removed = self.write()?.remove(key)?;
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
