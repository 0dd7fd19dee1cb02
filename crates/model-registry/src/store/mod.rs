//! Storage engines for model config records.
//!
//! Every engine implements [`ModelConfigStore`] and guarantees the same
//! contract:
//! - keys are unique, and at most one record owns a given path
//! - the tag, path and name/base/type indexes always agree with the primary
//!   collection, and no reader ever observes a half-applied mutation
//! - a failed mutation leaves the store exactly as it was
//! - a durable store recorded under a different schema version refuses to open
//!
//! Engines receive records that [`crate::ModelRegistry`] has already
//! normalized; they own storage, indexing, uniqueness and atomicity.

mod file;
mod indexes;
mod memory;
mod sqlite;

pub use file::FileStore;
pub use indexes::IndexedModels;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::config::{BackendKind, RegistryConfig, RegistrySettings};
use crate::error::{RegistryError, Result};
use crate::models::{BaseModelType, ModelConfig, ModelType};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::debug;

/// Storage contract shared by all engines.
///
/// Search results are ordered by key, so repeated queries against an
/// unchanged store return the same sequence.
pub trait ModelConfigStore: Send + Sync {
    /// Schema version of the opened store.
    fn version(&self) -> &str;

    /// Store a new record. Fails with `DuplicateKey` or `DuplicatePath`.
    fn add_model(&self, config: ModelConfig) -> Result<ModelConfig>;

    /// Replace the record under `config.key`, returning the stored result.
    ///
    /// A `None` `created_at` is filled from the record being replaced.
    fn update_model(&self, config: ModelConfig) -> Result<ModelConfig>;

    /// Remove a record, returning what was removed.
    fn del_model(&self, key: &str) -> Result<ModelConfig>;

    fn get_model(&self, key: &str) -> Result<ModelConfig>;

    fn exists(&self, key: &str) -> Result<bool>;

    /// Records whose tag set contains every tag in `tags`; empty matches all.
    fn search_by_tag(&self, tags: &BTreeSet<String>) -> Result<Vec<ModelConfig>>;

    /// The record owning `path`, compared after locator normalization.
    fn search_by_path(&self, path: &Path) -> Result<Option<ModelConfig>>;

    /// Records matching every supplied filter; no filters returns everything.
    fn search_by_name(
        &self,
        name: Option<&str>,
        base_model: Option<BaseModelType>,
        model_type: Option<ModelType>,
    ) -> Result<Vec<ModelConfig>>;

    /// Every live record. Always exactly `search_by_name(None, None, None)`.
    fn all_models(&self) -> Result<Vec<ModelConfig>> {
        self.search_by_name(None, None, None)
    }

    fn count(&self) -> Result<usize>;
}

impl<S: ModelConfigStore + ?Sized> ModelConfigStore for Box<S> {
    fn version(&self) -> &str {
        (**self).version()
    }

    fn add_model(&self, config: ModelConfig) -> Result<ModelConfig> {
        (**self).add_model(config)
    }

    fn update_model(&self, config: ModelConfig) -> Result<ModelConfig> {
        (**self).update_model(config)
    }

    fn del_model(&self, key: &str) -> Result<ModelConfig> {
        (**self).del_model(key)
    }

    fn get_model(&self, key: &str) -> Result<ModelConfig> {
        (**self).get_model(key)
    }

    fn exists(&self, key: &str) -> Result<bool> {
        (**self).exists(key)
    }

    fn search_by_tag(&self, tags: &BTreeSet<String>) -> Result<Vec<ModelConfig>> {
        (**self).search_by_tag(tags)
    }

    fn search_by_path(&self, path: &Path) -> Result<Option<ModelConfig>> {
        (**self).search_by_path(path)
    }

    fn search_by_name(
        &self,
        name: Option<&str>,
        base_model: Option<BaseModelType>,
        model_type: Option<ModelType>,
    ) -> Result<Vec<ModelConfig>> {
        (**self).search_by_name(name, base_model, model_type)
    }

    fn count(&self) -> Result<usize> {
        (**self).count()
    }
}

/// Open the engine named by `settings`.
pub fn open_store(settings: &RegistrySettings) -> Result<Box<dyn ModelConfigStore>> {
    debug!("Opening {} model config store", settings.backend);

    let store: Box<dyn ModelConfigStore> = match settings.backend {
        BackendKind::Memory => Box::new(MemoryStore::new()),
        BackendKind::File => {
            let path = required_path(settings)?;
            Box::new(FileStore::open(path, settings.keep_backup)?)
        }
        BackendKind::Sqlite => {
            let path = required_path(settings)?;
            Box::new(SqliteStore::open(path)?)
        }
    };

    Ok(store)
}

fn required_path(settings: &RegistrySettings) -> Result<std::path::PathBuf> {
    settings.resolved_path().ok_or_else(|| {
        RegistryError::invalid(
            "path",
            format!("the {} backend requires a store path", settings.backend),
        )
    })
}

/// Reported as the found version when a durable store carries none.
pub(crate) const MISSING_VERSION: &str = "<missing>";

/// Fail closed unless `found` is the version this build understands.
pub(crate) fn check_version(found: &str) -> Result<()> {
    if found == RegistryConfig::CONFIG_FILE_VERSION {
        Ok(())
    } else {
        Err(RegistryError::VersionMismatch {
            expected: RegistryConfig::CONFIG_FILE_VERSION.to_string(),
            found: found.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_store_for_each_backend() {
        let temp_dir = TempDir::new().unwrap();

        let memory = open_store(&RegistrySettings::memory()).unwrap();
        assert_eq!(memory.version(), RegistryConfig::CONFIG_FILE_VERSION);

        let file = open_store(&RegistrySettings::file(temp_dir.path())).unwrap();
        assert_eq!(file.count().unwrap(), 0);
        assert!(temp_dir.path().join(RegistryConfig::JSON_FILE_NAME).exists());

        let sqlite = open_store(&RegistrySettings::sqlite(temp_dir.path())).unwrap();
        assert_eq!(sqlite.count().unwrap(), 0);
        assert!(temp_dir.path().join(RegistryConfig::DB_FILE_NAME).exists());
    }

    #[test]
    fn test_open_store_requires_path_for_durable_backends() {
        let settings = RegistrySettings {
            backend: BackendKind::Sqlite,
            path: None,
            keep_backup: false,
        };
        let err = open_store(&settings).err().expect("missing path should fail");
        assert!(err.is_invalid());
    }

    #[test]
    fn test_check_version() {
        assert!(check_version(RegistryConfig::CONFIG_FILE_VERSION).is_ok());
        assert!(matches!(
            check_version("3.0"),
            Err(RegistryError::VersionMismatch { .. })
        ));
    }
}
