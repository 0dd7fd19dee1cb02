//! Durable persistence helpers shared by file-backed engines.

mod atomic;

pub use atomic::{atomic_read_json, atomic_write_json, read_file_string};
