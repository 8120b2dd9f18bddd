//! Per-entity file storage with an index and an LRU read cache.
//!
//! Directory structure:
//! ```text
//! root/
//! ├── sessions/
//! │   ├── index.json
//! │   ├── session-<id>.json
//! │   └── session-<id>.json
//! └── screenshots/
//!     ├── index.json
//!     └── screenshot-<id>.json
//! ```
//!
//! Entity files are written through `write_atomic` and carry their own
//! header (checksum, sizes, compressed flag), so the index can always be
//! rebuilt from them.

use super::atomic_file::write_atomic;
use super::codec::{self, CodecError, EntityHeader};
use super::disk_space::ensure_free_space;
use super::index::CollectionIndex;
use crate::cache::{EntityCache, cache_key};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex, RwLock};
use taskerino_core::storage::{
    CacheStats, CompressionOutcome, EntityDocument, EntityStore, IndexEntry, collection_kind,
};
use taskerino_core::{Result, TaskerinoError};
use tokio::sync::{Mutex, OwnedMutexGuard};

const DEFAULT_MIN_FREE_SPACE: u64 = 100 * 1024 * 1024;
const DEFAULT_ZSTD_LEVEL: i32 = 3;

/// Runs blocking file work off the async executor.
pub(crate) async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| TaskerinoError::internal(format!("Blocking task failed: {}", e)))?
}

fn validate_id(collection: &str, id: &str) -> Result<()> {
    if collection.is_empty() || collection.contains(['/', '\\']) || collection.starts_with('.') {
        return Err(TaskerinoError::validation(format!(
            "Invalid collection name '{}'",
            collection
        )));
    }
    if id.is_empty() || id.contains(['/', '\\']) || id.starts_with('.') {
        return Err(TaskerinoError::validation(format!(
            "Invalid entity id '{}' in {}",
            id, collection
        )));
    }
    Ok(())
}

pub struct ChunkedEntityStore {
    root: PathBuf,
    cache: Arc<EntityCache>,
    indexes: RwLock<HashMap<String, CollectionIndex>>,
    /// Serializes index loads and index file writes.
    index_write: Mutex<()>,
    /// Per-entity write locks; `recompress` holds one across read and rewrite.
    entity_locks: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
    min_free_space: u64,
    zstd_level: i32,
}

impl ChunkedEntityStore {
    /// Creates a store rooted at `root`. The directory is created on first write.
    pub fn new(root: impl Into<PathBuf>, cache: Arc<EntityCache>) -> Self {
        Self {
            root: root.into(),
            cache,
            indexes: RwLock::new(HashMap::new()),
            index_write: Mutex::new(()),
            entity_locks: StdMutex::new(HashMap::new()),
            min_free_space: DEFAULT_MIN_FREE_SPACE,
            zstd_level: DEFAULT_ZSTD_LEVEL,
        }
    }

    pub fn with_min_free_space(mut self, bytes: u64) -> Self {
        self.min_free_space = bytes;
        self
    }

    pub fn with_zstd_level(mut self, level: i32) -> Self {
        self.zstd_level = level;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn cache(&self) -> &Arc<EntityCache> {
        &self.cache
    }

    fn collection_dir(&self, collection: &str) -> PathBuf {
        self.root.join(collection)
    }

    fn file_name(collection: &str, id: &str) -> String {
        format!("{}-{}.json", collection_kind(collection), id)
    }

    fn entity_path(&self, collection: &str, id: &str) -> PathBuf {
        self.collection_dir(collection)
            .join(Self::file_name(collection, id))
    }

    async fn lock_entity(&self, collection: &str, id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.entity_locks.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(locks.entry(cache_key(collection, id)).or_default())
        };
        lock.lock_owned().await
    }

    fn read_indexes(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, CollectionIndex>> {
        self.indexes.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_indexes(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, CollectionIndex>> {
        self.indexes.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Loads (or rebuilds) the collection index on first use.
    async fn ensure_index(&self, collection: &str) -> Result<()> {
        if self.read_indexes().contains_key(collection) {
            return Ok(());
        }

        let _guard = self.index_write.lock().await;
        if self.read_indexes().contains_key(collection) {
            return Ok(());
        }

        let dir = self.collection_dir(collection);
        let name = collection.to_string();
        let index = blocking(move || CollectionIndex::load_or_rebuild(&dir, &name)).await?;
        self.write_indexes().insert(collection.to_string(), index);
        Ok(())
    }

    /// Applies `mutate` to the in-memory index and persists it.
    async fn update_index<F>(&self, collection: &str, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut CollectionIndex),
    {
        self.ensure_index(collection).await?;
        let _guard = self.index_write.lock().await;

        let snapshot = {
            let mut indexes = self.write_indexes();
            let index = indexes
                .entry(collection.to_string())
                .or_insert_with(|| CollectionIndex::new(collection));
            mutate(index);
            index.clone()
        };

        let dir = self.collection_dir(collection);
        blocking(move || snapshot.save(&dir)).await
    }

    fn index_entry(&self, collection: &str, id: &str) -> Option<IndexEntry> {
        self.read_indexes()
            .get(collection)
            .and_then(|index| index.entries.get(id).cloned())
    }

    fn index_entry_from_header(file_name: String, header: &EntityHeader) -> IndexEntry {
        IndexEntry {
            id: header.id.clone(),
            file_name,
            checksum: header.checksum.clone(),
            compressed: header.compressed,
            original_size: header.original_size,
            stored_size: header.stored_size,
            timestamp: header.timestamp,
            updated_at: Utc::now(),
        }
    }

    /// Encodes and atomically writes a payload, then refreshes index and cache.
    async fn write_payload(
        &self,
        collection: &str,
        id: &str,
        timestamp: Option<DateTime<Utc>>,
        payload: Arc<Vec<u8>>,
        zstd_level: Option<i32>,
    ) -> Result<EntityHeader> {
        validate_id(collection, id)?;

        let path = self.entity_path(collection, id);
        let min_free = self.min_free_space;
        let (coll, entity_id) = (collection.to_string(), id.to_string());
        let bytes = Arc::clone(&payload);

        let header = blocking(move || {
            let encoded = codec::encode(&entity_id, timestamp, &bytes, zstd_level).map_err(|e| {
                match e {
                    CodecError::Compress(msg) => {
                        TaskerinoError::compression_failure(&coll, &entity_id, msg)
                    }
                    other => TaskerinoError::internal(other.to_string()),
                }
            })?;
            ensure_free_space(&path, encoded.bytes.len() as u64, min_free)?;
            write_atomic(&path, &encoded.bytes)?;
            Ok(encoded.header)
        })
        .await?;

        let entry = Self::index_entry_from_header(Self::file_name(collection, id), &header);
        self.update_index(collection, move |index| {
            index.entries.insert(entry.id.clone(), entry);
        })
        .await?;

        self.cache.put(cache_key(collection, id), payload);

        tracing::debug!(
            "[ChunkedStore] Saved {}/{} ({} bytes, compressed={})",
            collection,
            id,
            header.stored_size,
            header.compressed
        );
        Ok(header)
    }

    /// Reads and verifies an entity file. Never touches the cache.
    async fn read_verified(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Option<codec::DecodedEntity>> {
        let path = self.entity_path(collection, id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let decoded = blocking(move || Ok(codec::decode(&bytes))).await?;
        match decoded {
            Ok(decoded) => Ok(Some(decoded)),
            Err(e) => {
                self.cache.remove(&cache_key(collection, id));
                tracing::error!("[ChunkedStore] Corrupted entity {}/{}: {}", collection, id, e);
                Err(TaskerinoError::corrupted(collection, id, e.to_string()))
            }
        }
    }

    /// Payload bytes plus timestamp, cache first.
    ///
    /// A cold read holds the entity lock from file read to cache fill, so a
    /// concurrent save can never be followed by an older payload or index entry.
    async fn load_payload(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Option<(Arc<Vec<u8>>, Option<DateTime<Utc>>)>> {
        validate_id(collection, id)?;
        self.ensure_index(collection).await?;

        let key = cache_key(collection, id);
        if let Some(payload) = self.cache.get(&key) {
            let timestamp = self.index_entry(collection, id).and_then(|e| e.timestamp);
            return Ok(Some((payload, timestamp)));
        }

        let _lock = self.lock_entity(collection, id).await;
        // a save may have landed while we waited for the lock
        if let Some(payload) = self.cache.peek(&key) {
            let timestamp = self.index_entry(collection, id).and_then(|e| e.timestamp);
            return Ok(Some((payload, timestamp)));
        }

        let Some(decoded) = self.read_verified(collection, id).await? else {
            return Ok(None);
        };

        // Heal the index when the file is newer than its index entry.
        let stale = self
            .index_entry(collection, id)
            .is_none_or(|e| e.checksum != decoded.header.checksum);
        if stale {
            tracing::debug!("[ChunkedStore] Refreshing stale index entry for {}/{}", collection, id);
            let entry =
                Self::index_entry_from_header(Self::file_name(collection, id), &decoded.header);
            self.update_index(collection, move |index| {
                index.entries.insert(entry.id.clone(), entry);
            })
            .await?;
        }

        let payload = Arc::new(decoded.payload);
        self.cache.put(key, Arc::clone(&payload));
        Ok(Some((payload, decoded.header.timestamp)))
    }

    /// Rebuilds a collection index from its entity files and persists it.
    pub async fn rebuild_index(&self, collection: &str) -> Result<usize> {
        let _guard = self.index_write.lock().await;
        let dir = self.collection_dir(collection);
        let name = collection.to_string();
        let index = blocking(move || {
            let index = CollectionIndex::rebuild(&dir, &name)?;
            index.save(&dir)?;
            Ok(index)
        })
        .await?;
        let count = index.entries.len();
        self.write_indexes().insert(collection.to_string(), index);
        Ok(count)
    }
}

#[async_trait]
impl EntityStore for ChunkedEntityStore {
    async fn save_entity(&self, collection: &str, entity: &EntityDocument) -> Result<()> {
        let payload = Arc::new(serde_json::to_vec(&entity.body)?);
        let _lock = self.lock_entity(collection, &entity.id).await;
        self.write_payload(collection, &entity.id, entity.timestamp, payload, None)
            .await?;
        Ok(())
    }

    async fn save_entity_compressed(
        &self,
        collection: &str,
        entity: &EntityDocument,
    ) -> Result<CompressionOutcome> {
        let payload = Arc::new(serde_json::to_vec(&entity.body)?);
        let _lock = self.lock_entity(collection, &entity.id).await;
        let header = self
            .write_payload(
                collection,
                &entity.id,
                entity.timestamp,
                payload,
                Some(self.zstd_level),
            )
            .await?;
        Ok(CompressionOutcome {
            original_size: header.original_size,
            compressed_size: header.stored_size,
            rewritten: true,
        })
    }

    async fn load_entity(&self, collection: &str, id: &str) -> Result<Option<EntityDocument>> {
        let Some((payload, timestamp)) = self.load_payload(collection, id).await? else {
            return Ok(None);
        };
        let body = serde_json::from_slice(&payload).map_err(|e| {
            TaskerinoError::corrupted(collection, id, format!("payload is not JSON: {}", e))
        })?;
        Ok(Some(EntityDocument {
            id: id.to_string(),
            timestamp,
            body,
        }))
    }

    async fn peek_entity(&self, collection: &str, id: &str) -> Result<Option<EntityDocument>> {
        validate_id(collection, id)?;
        let (payload, timestamp) = match self.cache.peek(&cache_key(collection, id)) {
            Some(payload) => {
                let timestamp = self.index_entry(collection, id).and_then(|e| e.timestamp);
                (payload.as_ref().clone(), timestamp)
            }
            None => match self.read_verified(collection, id).await? {
                Some(decoded) => (decoded.payload, decoded.header.timestamp),
                None => return Ok(None),
            },
        };
        let body = serde_json::from_slice(&payload).map_err(|e| {
            TaskerinoError::corrupted(collection, id, format!("payload is not JSON: {}", e))
        })?;
        Ok(Some(EntityDocument {
            id: id.to_string(),
            timestamp,
            body,
        }))
    }

    async fn load_entity_bytes(&self, collection: &str, id: &str) -> Result<Option<Vec<u8>>> {
        Ok(self
            .load_payload(collection, id)
            .await?
            .map(|(payload, _)| payload.as_ref().clone()))
    }

    async fn load_all(&self, collection: &str) -> Result<Vec<EntityDocument>> {
        let ids: Vec<String> = self
            .index_entries(collection)
            .await?
            .into_iter()
            .map(|e| e.id)
            .collect();

        let mut docs = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(doc) = self.load_entity(collection, &id).await? {
                docs.push(doc);
            }
        }
        Ok(docs)
    }

    async fn delete_entity(&self, collection: &str, id: &str) -> Result<()> {
        validate_id(collection, id)?;
        let _lock = self.lock_entity(collection, id).await;
        let path = self.entity_path(collection, id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        self.cache.remove(&cache_key(collection, id));
        let id_owned = id.to_string();
        self.update_index(collection, move |index| {
            index.entries.remove(&id_owned);
        })
        .await?;

        tracing::debug!("[ChunkedStore] Deleted {}/{}", collection, id);
        Ok(())
    }

    async fn index_entries(&self, collection: &str) -> Result<Vec<IndexEntry>> {
        self.ensure_index(collection).await?;
        Ok(self
            .read_indexes()
            .get(collection)
            .map(|index| index.entries_oldest_first())
            .unwrap_or_default())
    }

    async fn recompress(&self, collection: &str, id: &str) -> Result<CompressionOutcome> {
        validate_id(collection, id)?;
        let _lock = self.lock_entity(collection, id).await;
        let decoded = self
            .read_verified(collection, id)
            .await?
            .ok_or_else(|| TaskerinoError::not_found(collection, id))?;

        if decoded.header.compressed {
            return Ok(CompressionOutcome {
                original_size: decoded.header.original_size,
                compressed_size: decoded.header.stored_size,
                rewritten: false,
            });
        }

        let header = self
            .write_payload(
                collection,
                id,
                decoded.header.timestamp,
                Arc::new(decoded.payload),
                Some(self.zstd_level),
            )
            .await?;

        Ok(CompressionOutcome {
            original_size: header.original_size,
            compressed_size: header.stored_size,
            rewritten: true,
        })
    }

    fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }
}
