//! Primary collection plus derived secondary indexes.
//!
//! [`IndexedModels`] is the unit the in-process engines put behind a single
//! lock. Every mutation validates first and only then touches the maps, so a
//! failed call leaves the collection exactly as it was.

use crate::error::{RegistryError, Result};
use crate::models::{BaseModelType, ModelConfig, ModelType};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::hash::Hash;
use std::path::{Path, PathBuf};

type KeySet = BTreeSet<String>;

/// Records keyed by model key, with tag, path, name, base and type indexes.
#[derive(Debug, Default, Clone)]
pub struct IndexedModels {
    records: BTreeMap<String, ModelConfig>,
    by_tag: HashMap<String, KeySet>,
    by_path: HashMap<PathBuf, String>,
    by_name: HashMap<String, KeySet>,
    by_base: HashMap<BaseModelType, KeySet>,
    by_type: HashMap<ModelType, KeySet>,
}

impl IndexedModels {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from previously persisted records, enforcing the same
    /// uniqueness rules as [`insert`](Self::insert).
    pub fn from_records(records: impl IntoIterator<Item = ModelConfig>) -> Result<Self> {
        let mut models = Self::new();
        for record in records {
            models.insert(record)?;
        }
        Ok(models)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.records.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&ModelConfig> {
        self.records.get(key)
    }

    /// All records in key order.
    pub fn records(&self) -> impl Iterator<Item = &ModelConfig> {
        self.records.values()
    }

    /// Key of the record owning `path`, if any.
    pub fn path_owner(&self, path: &Path) -> Option<&str> {
        self.by_path.get(path).map(String::as_str)
    }

    /// Add a new record.
    pub fn insert(&mut self, config: ModelConfig) -> Result<()> {
        if self.records.contains_key(&config.key) {
            return Err(RegistryError::DuplicateKey {
                key: config.key.clone(),
            });
        }
        if let Some(owner) = self.path_owner(&config.path) {
            return Err(RegistryError::DuplicatePath {
                path: config.path.clone(),
                existing_key: owner.to_string(),
            });
        }

        self.index(&config);
        self.records.insert(config.key.clone(), config);
        Ok(())
    }

    /// Replace an existing record, moving its index entries. Returns the old record.
    pub fn replace(&mut self, config: ModelConfig) -> Result<ModelConfig> {
        if !self.records.contains_key(&config.key) {
            return Err(RegistryError::UnknownKey {
                key: config.key.clone(),
            });
        }
        if let Some(owner) = self.path_owner(&config.path) {
            if owner != config.key {
                return Err(RegistryError::DuplicatePath {
                    path: config.path.clone(),
                    existing_key: owner.to_string(),
                });
            }
        }

        let key = config.key.clone();
        let previous = self
            .records
            .remove(&key)
            .ok_or_else(|| RegistryError::UnknownKey { key: key.clone() })?;
        self.unindex(&previous);
        self.index(&config);
        self.records.insert(key, config);
        Ok(previous)
    }

    /// Remove a record and all of its index entries.
    pub fn remove(&mut self, key: &str) -> Result<ModelConfig> {
        let previous = self
            .records
            .remove(key)
            .ok_or_else(|| RegistryError::UnknownKey {
                key: key.to_string(),
            })?;
        self.unindex(&previous);
        Ok(previous)
    }

    /// Records carrying every tag in `tags`. An empty query matches everything.
    pub fn search_by_tag(&self, tags: &BTreeSet<String>) -> Vec<ModelConfig> {
        if tags.is_empty() {
            return self.records.values().cloned().collect();
        }

        let mut sets = Vec::with_capacity(tags.len());
        for tag in tags {
            match self.by_tag.get(tag) {
                Some(keys) => sets.push(keys),
                None => return Vec::new(),
            }
        }
        self.collect_intersection(sets)
    }

    pub fn search_by_path(&self, path: &Path) -> Option<ModelConfig> {
        self.path_owner(path)
            .and_then(|key| self.records.get(key))
            .cloned()
    }

    /// Records matching every supplied filter; no filters matches everything.
    pub fn search_by_name(
        &self,
        name: Option<&str>,
        base_model: Option<BaseModelType>,
        model_type: Option<ModelType>,
    ) -> Vec<ModelConfig> {
        let mut sets = Vec::with_capacity(3);

        if let Some(name) = name {
            match self.by_name.get(name) {
                Some(keys) => sets.push(keys),
                None => return Vec::new(),
            }
        }
        if let Some(base) = base_model {
            match self.by_base.get(&base) {
                Some(keys) => sets.push(keys),
                None => return Vec::new(),
            }
        }
        if let Some(model_type) = model_type {
            match self.by_type.get(&model_type) {
                Some(keys) => sets.push(keys),
                None => return Vec::new(),
            }
        }

        if sets.is_empty() {
            return self.records.values().cloned().collect();
        }
        self.collect_intersection(sets)
    }

    /// Intersect key sets (smallest first) and clone the matching records in key order.
    fn collect_intersection(&self, mut sets: Vec<&KeySet>) -> Vec<ModelConfig> {
        sets.sort_by_key(|keys| keys.len());
        let Some((smallest, rest)) = sets.split_first() else {
            return Vec::new();
        };

        smallest
            .iter()
            .filter(|key| rest.iter().all(|keys| keys.contains(*key)))
            .filter_map(|key| self.records.get(key))
            .cloned()
            .collect()
    }

    fn index(&mut self, config: &ModelConfig) {
        let key = &config.key;
        for tag in &config.tags {
            self.by_tag.entry(tag.clone()).or_default().insert(key.clone());
        }
        self.by_path.insert(config.path.clone(), key.clone());
        self.by_name
            .entry(config.name.clone())
            .or_default()
            .insert(key.clone());
        self.by_base
            .entry(config.base_model)
            .or_default()
            .insert(key.clone());
        self.by_type
            .entry(config.model_type)
            .or_default()
            .insert(key.clone());
    }

    fn unindex(&mut self, config: &ModelConfig) {
        let key = &config.key;
        for tag in &config.tags {
            remove_from(&mut self.by_tag, tag, key);
        }
        if self.by_path.get(&config.path) == Some(key) {
            self.by_path.remove(&config.path);
        }
        remove_from(&mut self.by_name, &config.name, key);
        remove_from(&mut self.by_base, &config.base_model, key);
        remove_from(&mut self.by_type, &config.model_type, key);
    }

    /// Panics if any secondary index disagrees with the primary collection.
    #[cfg(test)]
    pub(crate) fn assert_consistent(&self) {
        let mut expected = IndexedModels::new();
        for record in self.records.values() {
            expected.index(record);
        }
        assert_eq!(self.by_tag, expected.by_tag, "tag index drifted");
        assert_eq!(self.by_path, expected.by_path, "path index drifted");
        assert_eq!(self.by_name, expected.by_name, "name index drifted");
        assert_eq!(self.by_base, expected.by_base, "base index drifted");
        assert_eq!(self.by_type, expected.by_type, "type index drifted");
    }
}

/// Drop `key` from the bucket at `bucket`, removing the bucket once empty.
fn remove_from<K, Q>(index: &mut HashMap<K, KeySet>, bucket: &Q, key: &str)
where
    K: Eq + Hash + std::borrow::Borrow<Q>,
    Q: Eq + Hash + ?Sized,
{
    if let Some(keys) = index.get_mut(bucket) {
        keys.remove(key);
        if keys.is_empty() {
            index.remove(bucket);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(key: &str, name: &str, base: BaseModelType, tags: &[&str]) -> ModelConfig {
        ModelConfig::new(
            name,
            base,
            ModelType::Main,
            format!("/models/{}.safetensors", key),
        )
        .with_key(key)
        .with_tags(tags.iter().copied())
    }

    fn tags(values: &[&str]) -> BTreeSet<String> {
        values.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn test_insert_rejects_duplicates_without_side_effects() {
        let mut models = IndexedModels::new();
        models
            .insert(record("a", "alpha", BaseModelType::StableDiffusion1, &["x"]))
            .unwrap();

        let err = models
            .insert(record("a", "other", BaseModelType::StableDiffusionXL, &["y"]))
            .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateKey { .. }));

        let mut same_path = record("b", "beta", BaseModelType::StableDiffusion1, &["y"]);
        same_path.path = PathBuf::from("/models/a.safetensors");
        let err = models.insert(same_path).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicatePath { ref existing_key, .. } if existing_key == "a"));

        assert_eq!(models.len(), 1);
        assert!(models.search_by_tag(&tags(&["y"])).is_empty());
        models.assert_consistent();
    }

    #[test]
    fn test_tag_search_is_subset_match() {
        let mut models = IndexedModels::new();
        models
            .insert(record("a", "alpha", BaseModelType::StableDiffusion1, &["anime", "v2"]))
            .unwrap();
        models
            .insert(record("b", "beta", BaseModelType::StableDiffusion1, &["anime"]))
            .unwrap();
        models
            .insert(record("c", "gamma", BaseModelType::StableDiffusion1, &["animelike"]))
            .unwrap();

        let keys = |found: Vec<ModelConfig>| found.into_iter().map(|r| r.key).collect::<Vec<_>>();

        assert_eq!(keys(models.search_by_tag(&tags(&["anime"]))), ["a", "b"]);
        assert_eq!(keys(models.search_by_tag(&tags(&["anime", "v2"]))), ["a"]);
        assert_eq!(keys(models.search_by_tag(&tags(&["anim"]))), Vec::<String>::new());
        assert_eq!(keys(models.search_by_tag(&BTreeSet::new())), ["a", "b", "c"]);
    }

    #[test]
    fn test_replace_moves_index_entries() {
        let mut models = IndexedModels::new();
        models
            .insert(record("a", "alpha", BaseModelType::StableDiffusion1, &["a"]))
            .unwrap();

        let mut updated = record("a", "alpha-2", BaseModelType::StableDiffusionXL, &["b"]);
        updated.path = PathBuf::from("/models/moved.safetensors");
        let previous = models.replace(updated).unwrap();
        assert_eq!(previous.name, "alpha");

        assert!(models.search_by_tag(&tags(&["a"])).is_empty());
        assert_eq!(models.search_by_tag(&tags(&["b"])).len(), 1);
        assert!(models
            .search_by_path(Path::new("/models/a.safetensors"))
            .is_none());
        assert!(models
            .search_by_path(Path::new("/models/moved.safetensors"))
            .is_some());
        assert!(models.search_by_name(Some("alpha"), None, None).is_empty());
        assert!(models
            .search_by_name(None, Some(BaseModelType::StableDiffusion1), None)
            .is_empty());
        models.assert_consistent();
    }

    #[test]
    fn test_replace_keeps_own_path_but_rejects_foreign_path() {
        let mut models = IndexedModels::new();
        models
            .insert(record("a", "alpha", BaseModelType::Any, &[]))
            .unwrap();
        models
            .insert(record("b", "beta", BaseModelType::Any, &[]))
            .unwrap();

        models
            .replace(record("a", "alpha", BaseModelType::Any, &["kept"]))
            .unwrap();

        let mut stealing = record("b", "beta", BaseModelType::Any, &[]);
        stealing.path = PathBuf::from("/models/a.safetensors");
        assert!(models.replace(stealing).unwrap_err().is_conflict());
        assert_eq!(
            models.get("b").unwrap().path,
            PathBuf::from("/models/b.safetensors")
        );

        assert!(models
            .replace(record("zzz", "ghost", BaseModelType::Any, &[]))
            .unwrap_err()
            .is_not_found());
        models.assert_consistent();
    }

    #[test]
    fn test_remove_clears_every_index() {
        let mut models = IndexedModels::new();
        models
            .insert(record("a", "alpha", BaseModelType::StableDiffusion2, &["x", "y"]))
            .unwrap();

        models.remove("a").unwrap();

        assert!(models.is_empty());
        assert!(models.search_by_tag(&tags(&["x"])).is_empty());
        assert!(models.search_by_name(Some("alpha"), None, None).is_empty());
        assert!(models
            .search_by_path(Path::new("/models/a.safetensors"))
            .is_none());
        assert!(models.remove("a").unwrap_err().is_not_found());
        models.assert_consistent();
    }

    #[test]
    fn test_search_by_name_combines_filters() {
        let mut models = IndexedModels::new();
        models
            .insert(record("a", "shared", BaseModelType::StableDiffusion1, &[]))
            .unwrap();
        models
            .insert(record("b", "shared", BaseModelType::StableDiffusionXL, &[]))
            .unwrap();
        let mut lora = record("c", "shared", BaseModelType::StableDiffusionXL, &[]);
        lora.model_type = ModelType::Lora;
        models.insert(lora).unwrap();

        assert_eq!(models.search_by_name(Some("shared"), None, None).len(), 3);
        assert_eq!(
            models
                .search_by_name(Some("shared"), Some(BaseModelType::StableDiffusionXL), None)
                .len(),
            2
        );
        let only = models.search_by_name(
            None,
            Some(BaseModelType::StableDiffusionXL),
            Some(ModelType::Lora),
        );
        assert_eq!(only.len(), 1);
        assert_eq!(only[0].key, "c");
        assert!(models
            .search_by_name(None, None, Some(ModelType::Vae))
            .is_empty());
        assert_eq!(models.search_by_name(None, None, None).len(), 3);
    }

    #[test]
    fn test_from_records_rejects_duplicate_paths() {
        let mut clash = record("b", "beta", BaseModelType::Any, &[]);
        clash.path = PathBuf::from("/models/a.safetensors");

        let result = IndexedModels::from_records(vec![
            record("a", "alpha", BaseModelType::Any, &[]),
            clash,
        ]);
        assert!(result.unwrap_err().is_conflict());
    }
}
