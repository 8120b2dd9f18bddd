//! Domain model and seam traits for Taskerino's session storage and
//! enrichment pipeline. This crate performs no I/O.

pub mod compression;
pub mod config;
pub mod enrichment;
pub mod error;
pub mod session;
pub mod storage;

// Re-export common error type
pub use error::{Result, TaskerinoError};
