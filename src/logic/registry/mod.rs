//! Registry Module - Durable model metadata
//!
//! # Architecture
//! - `types.rs`: `ModelRecord`, `Metrics`, `Thresholds`, control plane rows
//! - `storage.rs`: SQLite `models` table + artifact files
//!
//! # Invariant
//! At most one row has `selected = 1` (partial unique index + transactional
//! promote).

pub mod types;
pub mod storage;

pub use storage::{ModelRegistry, RegistryError};
pub use types::{Metrics, ModelRecord, RemoteModel, Thresholds};
