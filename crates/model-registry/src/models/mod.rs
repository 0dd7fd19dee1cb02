//! Data models for the registry.
//!
//! [`ModelConfig`] is the one record type every engine stores. Payloads arrive
//! as [`ModelConfigInput`] and are normalized before any engine sees them.

mod record;
mod types;

pub use record::*;
pub use types::*;
