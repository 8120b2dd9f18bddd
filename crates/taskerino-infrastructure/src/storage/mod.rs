//! Durable entity storage.
//!
//! - `atomic_file`: tmp + fsync + rename writes and the locked TOML file handle
//! - `codec`: entity file header, zstd compression and SHA-256 verification
//! - `index`: per-collection `index.json`
//! - `disk_space`: free-space guard run before every write
//! - `chunked_store`: the `EntityStore` implementation tying them together

pub mod atomic_file;
pub mod codec;
pub mod disk_space;
pub mod index;

mod chunked_store;

pub use atomic_file::{AtomicFileError, AtomicTomlFile, write_atomic};
pub use chunked_store::ChunkedEntityStore;
pub(crate) use chunked_store::blocking;
pub use index::CollectionIndex;
