//! The canonical model config record and payload normalization.

use crate::error::{RegistryError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use super::types::{BaseModelType, ModelFormat, ModelType};

/// Field names owned by [`ModelConfig`]; `extra` may not shadow them.
const RESERVED_FIELDS: &[&str] = &[
    "key",
    "name",
    "base_model",
    "base",
    "model_type",
    "type",
    "path",
    "tags",
    "description",
    "format",
    "hash",
    "created_at",
    "updated_at",
];

/// A stored model configuration record.
///
/// `key`, `name`, `base_model`, `model_type`, `path` and `tags` drive the
/// registry's indexes. Anything else a caller attaches lands in `extra` and is
/// carried through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default)]
    pub key: String,
    pub name: String,
    #[serde(alias = "base")]
    pub base_model: BaseModelType,
    #[serde(alias = "type")]
    pub model_type: ModelType,
    pub path: PathBuf,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<ModelFormat>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    /// RFC 3339; set by the registry on add, preserved by update.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    /// RFC 3339; set by the registry on every write.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl ModelConfig {
    /// Create a config with the load-bearing fields set and everything else empty.
    pub fn new(
        name: impl Into<String>,
        base_model: BaseModelType,
        model_type: ModelType,
        path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            key: String::new(),
            name: name.into(),
            base_model,
            model_type,
            path: path.into(),
            tags: BTreeSet::new(),
            description: None,
            format: None,
            hash: None,
            created_at: None,
            updated_at: None,
            extra: BTreeMap::new(),
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    pub fn with_tags<I, T>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_format(mut self, format: ModelFormat) -> Self {
        self.format = Some(format);
        self
    }

    pub fn with_extra(mut self, field: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(field.into(), value);
        self
    }

    /// Check a record and bring it into canonical form under `key`.
    pub fn normalized(mut self, key: &str) -> Result<Self> {
        if key.trim().is_empty() {
            return Err(RegistryError::invalid("key", "must not be empty"));
        }
        if !self.key.is_empty() && self.key != key {
            return Err(RegistryError::invalid(
                "key",
                format!("payload key '{}' does not match '{}'", self.key, key),
            ));
        }
        self.key = key.to_string();

        self.name = self.name.trim().to_string();
        if self.name.is_empty() {
            return Err(RegistryError::invalid("name", "must not be empty"));
        }

        self.path = normalize_locator(&self.path).ok_or_else(|| {
            RegistryError::invalid("path", format!("malformed path {:?}", self.path))
        })?;

        self.tags = normalize_tags(std::mem::take(&mut self.tags));
        self.description = non_blank(self.description.take());
        self.hash = non_blank(self.hash.take());

        if let Some(field) = self
            .extra
            .keys()
            .find(|field| RESERVED_FIELDS.contains(&field.as_str()))
        {
            return Err(RegistryError::invalid(
                field.clone(),
                "extra fields may not shadow a built-in field",
            ));
        }

        Ok(self)
    }
}

/// An `add`/`update` payload, either loosely typed or already a record.
///
/// Both forms go through [`ModelConfig::normalized`], so callers see the same
/// result and the same errors whichever they pass.
#[derive(Debug, Clone)]
pub enum ModelConfigInput {
    Raw(serde_json::Value),
    Typed(ModelConfig),
}

impl ModelConfigInput {
    /// Key carried inside the payload, if any.
    pub fn payload_key(&self) -> Option<String> {
        let key = match self {
            ModelConfigInput::Raw(value) => value.get("key")?.as_str()?.to_string(),
            ModelConfigInput::Typed(config) => config.key.clone(),
        };
        (!key.is_empty()).then_some(key)
    }

    /// Parse (if needed) and normalize into the canonical record.
    pub fn into_config(self, key: &str) -> Result<ModelConfig> {
        let config = match self {
            ModelConfigInput::Typed(config) => config,
            ModelConfigInput::Raw(value) => {
                if !value.is_object() {
                    return Err(RegistryError::invalid("config", "expected a JSON object"));
                }
                serde_json::from_value::<ModelConfig>(value)
                    .map_err(|e| RegistryError::invalid("config", e.to_string()))?
            }
        };
        config.normalized(key)
    }
}

impl From<ModelConfig> for ModelConfigInput {
    fn from(config: ModelConfig) -> Self {
        ModelConfigInput::Typed(config)
    }
}

impl From<serde_json::Value> for ModelConfigInput {
    fn from(value: serde_json::Value) -> Self {
        ModelConfigInput::Raw(value)
    }
}

impl From<serde_json::Map<String, serde_json::Value>> for ModelConfigInput {
    fn from(map: serde_json::Map<String, serde_json::Value>) -> Self {
        ModelConfigInput::Raw(serde_json::Value::Object(map))
    }
}

/// Canonical form of a filesystem path or URI locator.
///
/// Filesystem paths lose interior `.` components and trailing separators;
/// URI-like locators (`scheme://...`) are kept verbatim. Returns `None` for
/// empty, non-UTF-8 or NUL-containing input.
pub fn normalize_locator(path: &Path) -> Option<PathBuf> {
    let trimmed = path.to_str()?.trim();
    if trimmed.is_empty() || trimmed.contains('\0') {
        return None;
    }
    if trimmed.contains("://") {
        return Some(PathBuf::from(trimmed));
    }
    Some(Path::new(trimmed).components().collect())
}

/// Trim tags and drop empty ones; the set collapses duplicates.
pub fn normalize_tags<I, T>(tags: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = T>,
    T: AsRef<str>,
{
    tags.into_iter()
        .map(|tag| tag.as_ref().trim().to_string())
        .filter(|tag| !tag.is_empty())
        .collect()
}

/// Trim a tag filter without shrinking it.
///
/// Returns `None` if any tag is blank; no record carries a blank tag, so such
/// a query matches nothing.
pub fn normalize_query_tags<I, T>(tags: I) -> Option<BTreeSet<String>>
where
    I: IntoIterator<Item = T>,
    T: AsRef<str>,
{
    tags.into_iter()
        .map(|tag| {
            let tag = tag.as_ref().trim();
            (!tag.is_empty()).then(|| tag.to_string())
        })
        .collect()
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
