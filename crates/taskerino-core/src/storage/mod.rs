//! Entity storage seam.
//!
//! `EntityStore` is the single typed interface over per-entity persistence.
//! It works on untyped `EntityDocument`s so it stays object-safe and can be
//! shared as `Arc<dyn EntityStore>`; `EntityStoreExt` layers typed access on
//! top for any `StoredEntity`.

mod model;

pub use model::{CacheStats, CompressionOutcome, EntityDocument, IndexEntry};

use crate::error::{Result, TaskerinoError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Singular entity kind used in file names (`sessions` -> `session`).
pub fn collection_kind(collection: &str) -> &str {
    collection.strip_suffix('s').unwrap_or(collection)
}

/// A domain type that lives in an entity collection.
pub trait StoredEntity: Serialize + DeserializeOwned + Send + Sync {
    const COLLECTION: &'static str;

    fn entity_id(&self) -> &str;

    fn timestamp(&self) -> Option<DateTime<Utc>> {
        None
    }
}

#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Writes an entity atomically and refreshes the index and cache.
    async fn save_entity(&self, collection: &str, entity: &EntityDocument) -> Result<()>;

    /// Same as `save_entity` with the payload passed through the codec first.
    async fn save_entity_compressed(
        &self,
        collection: &str,
        entity: &EntityDocument,
    ) -> Result<CompressionOutcome>;

    /// Loads an entity, cache first.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(_))`: entity found and verified
    /// - `Ok(None)`: no such entity
    /// - `Err(CorruptedEntity)`: file unreadable or checksum mismatch
    async fn load_entity(&self, collection: &str, id: &str) -> Result<Option<EntityDocument>>;

    /// Reads an entity without filling the cache or moving its counters.
    async fn peek_entity(&self, collection: &str, id: &str) -> Result<Option<EntityDocument>>;

    /// Exact uncompressed payload bytes as written by the last save.
    async fn load_entity_bytes(&self, collection: &str, id: &str) -> Result<Option<Vec<u8>>>;

    /// Loads every entity listed in the collection index.
    async fn load_all(&self, collection: &str) -> Result<Vec<EntityDocument>>;

    async fn delete_entity(&self, collection: &str, id: &str) -> Result<()>;

    async fn index_entries(&self, collection: &str) -> Result<Vec<IndexEntry>>;

    /// Rewrites an existing entity in compressed form through the atomic path.
    async fn recompress(&self, collection: &str, id: &str) -> Result<CompressionOutcome>;

    fn cache_stats(&self) -> CacheStats;
}

fn to_document<T: StoredEntity>(entity: &T) -> Result<EntityDocument> {
    Ok(EntityDocument {
        id: entity.entity_id().to_string(),
        timestamp: entity.timestamp(),
        body: serde_json::to_value(entity)?,
    })
}

fn from_document<T: StoredEntity>(doc: EntityDocument) -> Result<T> {
    serde_json::from_value(doc.body).map_err(|e| {
        TaskerinoError::corrupted(T::COLLECTION, doc.id, format!("schema mismatch: {}", e))
    })
}

/// Typed helpers over any `EntityStore`.
#[async_trait]
pub trait EntityStoreExt: EntityStore {
    async fn save<T: StoredEntity>(&self, entity: &T) -> Result<()> {
        let doc = to_document(entity)?;
        self.save_entity(T::COLLECTION, &doc).await
    }

    async fn save_compressed<T: StoredEntity>(&self, entity: &T) -> Result<CompressionOutcome> {
        let doc = to_document(entity)?;
        self.save_entity_compressed(T::COLLECTION, &doc).await
    }

    async fn load<T: StoredEntity>(&self, id: &str) -> Result<Option<T>> {
        match self.load_entity(T::COLLECTION, id).await? {
            Some(doc) => from_document(doc).map(Some),
            None => Ok(None),
        }
    }

    async fn load_all_typed<T: StoredEntity>(&self) -> Result<Vec<T>> {
        self.load_all(T::COLLECTION)
            .await?
            .into_iter()
            .map(from_document)
            .collect()
    }
}

impl<S: EntityStore + ?Sized> EntityStoreExt for S {}
