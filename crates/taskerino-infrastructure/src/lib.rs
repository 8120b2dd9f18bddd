//! Filesystem-backed implementations of the Taskerino core traits.
//!
//! - `storage`: the chunked per-entity store
//! - `cache`: the byte-bounded LRU in front of it
//! - `compression`: background recompression of old entities
//! - `migration`: upgrades of legacy data
//! - `session_repository`: `SessionRepository` over any `EntityStore`

pub mod cache;
pub mod compression;
pub mod logging;
pub mod migration;
pub mod paths;
pub mod session_repository;
pub mod settings_storage;
pub mod storage;

pub use crate::cache::EntityCache;
pub use crate::compression::{CompressionQueue, CpuSampler, FixedCpuSampler, SystemCpuSampler};
pub use crate::logging::init_tracing;
pub use crate::paths::{PathError, TaskerinoPaths};
pub use crate::session_repository::ChunkedSessionRepository;
pub use crate::settings_storage::SettingsStorage;
pub use crate::storage::ChunkedEntityStore;
