//! One-shot move from monolithic collection files to per-entity files.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::path::Path;
use taskerino_core::storage::{EntityDocument, EntityStore};
use taskerino_core::{Result, TaskerinoError};

#[derive(Debug, Clone, PartialEq, Default)]
pub struct CollectionReport {
    pub collection: String,
    pub migrated: usize,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct MigrationReport {
    pub collections: Vec<CollectionReport>,
    /// Collections with no legacy file.
    pub skipped: Vec<String>,
}

impl MigrationReport {
    pub fn total_migrated(&self) -> usize {
        self.collections.iter().map(|c| c.migrated).sum()
    }
}

/// Best-effort entity timestamp from the usual legacy fields.
pub(crate) fn infer_timestamp(item: &Value) -> Option<DateTime<Utc>> {
    ["startTime", "timestamp", "createdAt"]
        .iter()
        .filter_map(|key| item.get(*key).and_then(Value::as_str))
        .find_map(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

/// Copies every item of `{legacy_dir}/{collection}.json` into the store.
///
/// Fail-fast: the first bad item or failed write aborts the whole run with
/// `Migration`. Collections already written stay written; re-running is safe
/// because saving the same item again produces the same entity file.
pub async fn migrate_to_per_entity_files(
    legacy_dir: &Path,
    store: &dyn EntityStore,
    collections: &[&str],
) -> Result<MigrationReport> {
    let mut report = MigrationReport::default();

    for collection in collections {
        let path = legacy_dir.join(format!("{}.json", collection));
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("[Migration] No legacy file for '{}', skipping", collection);
                report.skipped.push(collection.to_string());
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        let items: Vec<Value> = match serde_json::from_slice(&bytes)? {
            Value::Array(items) => items,
            _ => {
                return Err(TaskerinoError::migration(format!(
                    "{} is not a JSON array",
                    path.display()
                )));
            }
        };

        tracing::info!(
            "[Migration] Migrating {} items from {}",
            items.len(),
            path.display()
        );

        let mut migrated = 0;
        for (position, item) in items.into_iter().enumerate() {
            let id = item
                .get("id")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    TaskerinoError::migration(format!(
                        "{} item #{} has no string id",
                        collection, position
                    ))
                })?
                .to_string();

            let timestamp = infer_timestamp(&item);
            let doc = EntityDocument::new(id.clone(), item).with_timestamp(timestamp);

            store.save_entity(collection, &doc).await.map_err(|e| {
                tracing::error!("[Migration] Aborting at {}/{}: {}", collection, id, e);
                TaskerinoError::migration(format!("{}/{}: {}", collection, id, e))
            })?;
            migrated += 1;
        }

        report.collections.push(CollectionReport {
            collection: collection.to_string(),
            migrated,
        });
    }

    tracing::info!(
        "[Migration] Per-entity migration finished: {} entities",
        report.total_migrated()
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::EntityCache;
    use crate::storage::ChunkedEntityStore;
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn store(dir: &Path) -> ChunkedEntityStore {
        ChunkedEntityStore::new(dir.join("store"), Arc::new(EntityCache::new(1 << 20)))
            .with_min_free_space(0)
    }

    fn write_legacy(dir: &Path, collection: &str, items: Value) {
        std::fs::write(dir.join(format!("{}.json", collection)), items.to_string()).unwrap();
    }

    #[tokio::test]
    async fn test_migrates_and_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        write_legacy(
            temp_dir.path(),
            "sessions",
            json!([
                {"id": "a", "name": "First", "startTime": "2024-05-01T10:00:00Z"},
                {"id": "b", "name": "Second", "startTime": "2024-05-02T10:00:00Z"}
            ]),
        );
        let store = store(temp_dir.path());

        let first = migrate_to_per_entity_files(temp_dir.path(), &store, &["sessions", "notes"])
            .await
            .unwrap();
        assert_eq!(first.total_migrated(), 2);
        assert_eq!(first.skipped, vec!["notes".to_string()]);

        let file = temp_dir.path().join("store/sessions/session-a.json");
        let before = std::fs::read(&file).unwrap();

        let second = migrate_to_per_entity_files(temp_dir.path(), &store, &["sessions", "notes"])
            .await
            .unwrap();
        assert_eq!(second, first);
        assert_eq!(std::fs::read(&file).unwrap(), before);

        let entries = store.index_entries("sessions").await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].id, "a");
        assert!(entries[0].timestamp.is_some());
    }

    #[tokio::test]
    async fn test_stops_at_first_bad_collection() {
        let temp_dir = TempDir::new().unwrap();
        write_legacy(temp_dir.path(), "sessions", json!([{"name": "no id"}]));
        write_legacy(temp_dir.path(), "screenshots", json!([{"id": "s1"}]));
        let store = store(temp_dir.path());

        let err = migrate_to_per_entity_files(temp_dir.path(), &store, &["sessions", "screenshots"])
            .await
            .unwrap_err();
        assert!(matches!(err, TaskerinoError::Migration(_)));
        assert!(store.index_entries("screenshots").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_non_array_file_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        write_legacy(temp_dir.path(), "sessions", json!({"id": "a"}));
        let store = store(temp_dir.path());

        let err = migrate_to_per_entity_files(temp_dir.path(), &store, &["sessions"])
            .await
            .unwrap_err();
        assert!(matches!(err, TaskerinoError::Migration(_)));
    }
}
