//! The model configuration registry.
//!
//! [`ModelRegistry`] is the public face of the crate. It validates and
//! normalizes payloads, stamps timestamps, delegates storage to a
//! [`ModelConfigStore`] engine and, once a mutation has committed, tells the
//! optional change notifier about it.

use crate::config::RegistrySettings;
use crate::error::Result;
use crate::events::{ChangeCallback, ChangeKind, ModelChangeEvent};
use crate::models::{BaseModelType, ModelConfig, ModelConfigInput, ModelType};
use crate::store::{open_store, ModelConfigStore};
use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;
use tracing::{debug, warn};

/// Registry of model configuration records keyed by an opaque string.
pub struct ModelRegistry<S: ModelConfigStore = Box<dyn ModelConfigStore>> {
    store: S,
    notifier: Option<ChangeCallback>,
}

impl ModelRegistry {
    /// Open the engine described by `settings`.
    pub fn open(settings: &RegistrySettings) -> Result<Self> {
        Ok(Self::new(open_store(settings)?))
    }
}

impl<S: ModelConfigStore> ModelRegistry<S> {
    /// Wrap an engine. The registry runs silently until a notifier is set.
    pub fn new(store: S) -> Self {
        Self {
            store,
            notifier: None,
        }
    }

    /// Install the callback invoked after every committed mutation.
    pub fn with_notifier(mut self, notifier: ChangeCallback) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Borrow the underlying engine.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Schema version of the opened store.
    pub fn version(&self) -> &str {
        self.store.version()
    }

    /// Add a new record under `key`.
    ///
    /// # Errors
    ///
    /// `DuplicateKey` if `key` is taken, `DuplicatePath` if another record
    /// owns the path, `InvalidConfig` if the payload does not describe a
    /// valid record.
    pub fn add_model(&self, key: &str, config: impl Into<ModelConfigInput>) -> Result<ModelConfig> {
        let mut config = config.into().into_config(key)?;

        let now = now_rfc3339();
        if config.created_at.is_none() {
            config.created_at = Some(now.clone());
        }
        config.updated_at = Some(now);

        let stored = self.store.add_model(config)?;
        debug!("Added model config {} ({})", stored.key, stored.name);

        self.notify(ChangeKind::Added, &stored);
        Ok(stored)
    }

    /// Add a record under a registry-assigned key.
    ///
    /// A key carried inside the payload is used as is; otherwise a fresh
    /// UUID v4 is assigned.
    pub fn register_model(&self, config: impl Into<ModelConfigInput>) -> Result<ModelConfig> {
        let config = config.into();
        let key = config
            .payload_key()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        self.add_model(&key, config)
    }

    /// Remove the record under `key`.
    pub fn del_model(&self, key: &str) -> Result<()> {
        let removed = self.store.del_model(key)?;
        debug!("Deleted model config {}", key);

        self.notify(ChangeKind::Deleted, &removed);
        Ok(())
    }

    /// Replace the attributes of the record under `key`.
    ///
    /// The creation timestamp of the existing record is kept.
    pub fn update_model(
        &self,
        key: &str,
        config: impl Into<ModelConfigInput>,
    ) -> Result<ModelConfig> {
        let mut config = config.into().into_config(key)?;
        config.created_at = None;
        config.updated_at = Some(now_rfc3339());

        let stored = self.store.update_model(config)?;
        debug!("Updated model config {}", stored.key);

        self.notify(ChangeKind::Updated, &stored);
        Ok(stored)
    }

    pub fn get_model(&self, key: &str) -> Result<ModelConfig> {
        self.store.get_model(key)
    }

    /// Whether a record exists under `key`.
    ///
    /// Storage failures are logged and reported as `false`.
    pub fn exists(&self, key: &str) -> bool {
        match self.store.exists(key) {
            Ok(found) => found,
            Err(e) => {
                warn!("Failed to check model config {}: {}", key, e);
                false
            }
        }
    }

    /// Records carrying every tag in `tags`. An empty query returns all records.
    pub fn search_by_tag<I, T>(&self, tags: I) -> Result<Vec<ModelConfig>>
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let tags: BTreeSet<String> = tags.into_iter().map(Into::into).collect();
        self.store.search_by_tag(&tags)
    }

    /// The record registered at `path`, if any.
    pub fn search_by_path(&self, path: impl AsRef<Path>) -> Result<Option<ModelConfig>> {
        self.store.search_by_path(path.as_ref())
    }

    /// Records matching every supplied filter.
    pub fn search_by_name(
        &self,
        name: Option<&str>,
        base_model: Option<BaseModelType>,
        model_type: Option<ModelType>,
    ) -> Result<Vec<ModelConfig>> {
        self.store.search_by_name(name, base_model, model_type)
    }

    /// Every record, ordered by key.
    pub fn all_models(&self) -> Result<Vec<ModelConfig>> {
        self.search_by_name(None, None, None)
    }

    pub fn count(&self) -> Result<usize> {
        self.store.count()
    }

    fn notify(&self, kind: ChangeKind, record: &ModelConfig) {
        if let Some(notifier) = &self.notifier {
            notifier(&ModelChangeEvent::new(kind, record.clone()));
        }
    }
}

impl<S: ModelConfigStore + fmt::Debug> fmt::Debug for ModelRegistry<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelRegistry")
            .field("store", &self.store)
            .field("notifier", &self.notifier.is_some())
            .finish()
    }
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}
