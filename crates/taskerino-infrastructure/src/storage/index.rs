//! Per-collection `index.json`.

use super::atomic_file::write_atomic;
use super::codec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use taskerino_core::storage::{IndexEntry, collection_kind};
use taskerino_core::{Result, TaskerinoError};

pub const INDEX_FILE: &str = "index.json";

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionIndex {
    pub collection: String,
    pub entries: BTreeMap<String, IndexEntry>,
}

impl CollectionIndex {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            entries: BTreeMap::new(),
        }
    }

    /// Reads `index.json` from `dir`.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(_))`: index parsed
    /// - `Ok(None)`: no index file
    /// - `Err(_)`: unreadable or unparseable index
    pub fn load(dir: &Path) -> Result<Option<Self>> {
        let path = dir.join(INDEX_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&path)?;
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    pub fn save(&self, dir: &Path) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(self)?;
        write_atomic(&dir.join(INDEX_FILE), &bytes)?;
        Ok(())
    }

    /// Reconstructs the index by reading every entity file header in `dir`.
    ///
    /// Files whose header cannot be parsed are skipped with a warning; they
    /// still fail with `CorruptedEntity` when loaded directly.
    pub fn rebuild(dir: &Path, collection: &str) -> Result<Self> {
        let mut index = Self::new(collection);
        if !dir.exists() {
            return Ok(index);
        }

        let prefix = format!("{}-", collection_kind(collection));
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let file_name = entry.file_name().to_string_lossy().to_string();
            if !file_name.starts_with(&prefix) || !file_name.ends_with(".json") {
                continue;
            }

            let bytes = fs::read(entry.path())?;
            match codec::decode_header(&bytes) {
                Ok((header, _)) => {
                    let updated_at = entry
                        .metadata()
                        .and_then(|m| m.modified())
                        .map(chrono::DateTime::<chrono::Utc>::from)
                        .unwrap_or_else(|_| chrono::Utc::now());
                    index.entries.insert(
                        header.id.clone(),
                        IndexEntry {
                            id: header.id,
                            file_name,
                            checksum: header.checksum,
                            compressed: header.compressed,
                            original_size: header.original_size,
                            stored_size: header.stored_size,
                            timestamp: header.timestamp,
                            updated_at,
                        },
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        "[ChunkedStore] Skipping unreadable file {}/{} during index rebuild: {}",
                        collection,
                        file_name,
                        e
                    );
                }
            }
        }

        tracing::info!(
            "[ChunkedStore] Rebuilt index for '{}' with {} entries",
            collection,
            index.entries.len()
        );
        Ok(index)
    }

    /// Loads the index, rebuilding it from entity files when missing or
    /// unreadable.
    pub fn load_or_rebuild(dir: &Path, collection: &str) -> Result<Self> {
        match Self::load(dir) {
            Ok(Some(index)) => Ok(index),
            Ok(None) => Self::rebuild(dir, collection),
            Err(TaskerinoError::Serialization { message, .. }) => {
                tracing::warn!(
                    "[ChunkedStore] Index for '{}' unreadable ({}), rebuilding",
                    collection,
                    message
                );
                Self::rebuild(dir, collection)
            }
            Err(e) => Err(e),
        }
    }

    /// Entries ordered oldest first by entity timestamp.
    pub fn entries_oldest_first(&self) -> Vec<IndexEntry> {
        let mut entries: Vec<IndexEntry> = self.entries.values().cloned().collect();
        entries.sort_by_key(|e| e.timestamp.unwrap_or(e.updated_at));
        entries
    }
}
