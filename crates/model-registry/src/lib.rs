//! Model Registry - Headless store for AI model configuration records.
//!
//! This crate keeps model configuration records (name, base model, model type,
//! path, tags) under opaque string keys, maintains secondary indexes over
//! them, and persists them through a pluggable storage engine: in memory, a
//! single JSON file, or SQLite.
//!
//! # Example
//!
//! ```rust,ignore
//! use model_registry::{BaseModelType, ModelRegistry, ModelType, RegistrySettings};
//! use serde_json::json;
//!
//! fn main() -> model_registry::Result<()> {
//!     let registry = ModelRegistry::open(&RegistrySettings::sqlite("/path/to/models"))?;
//!
//!     registry.add_model(
//!         "m1",
//!         json!({ "name": "sd15", "base": "SD1.5", "type": "main", "path": "/models/sd15.safetensors" }),
//!     )?;
//!
//!     let found = registry.search_by_name(None, Some(BaseModelType::StableDiffusion1), Some(ModelType::Main))?;
//!     println!("Found {} models", found.len());
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod models;
pub mod persistence;
pub mod registry;
pub mod store;

// Re-export commonly used types
pub use config::{BackendKind, RegistryConfig, RegistrySettings};
pub use error::{RegistryError, Result};
pub use events::{ChangeCallback, ChangeKind, ModelChangeEvent, ModelEventBus};
pub use models::{BaseModelType, ModelConfig, ModelConfigInput, ModelFormat, ModelType};
pub use registry::ModelRegistry;
pub use store::{open_store, FileStore, MemoryStore, ModelConfigStore, SqliteStore};
