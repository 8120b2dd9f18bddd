use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An untyped entity as it crosses the `EntityStore` boundary.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityDocument {
    pub id: String,
    /// Entity timestamp used for age-based compression ordering.
    pub timestamp: Option<DateTime<Utc>>,
    pub body: Value,
}

impl EntityDocument {
    pub fn new(id: impl Into<String>, body: Value) -> Self {
        Self {
            id: id.into(),
            timestamp: None,
            body,
        }
    }

    pub fn with_timestamp(mut self, timestamp: Option<DateTime<Utc>>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Index metadata for one stored entity.
///
/// The index is a mirror of the per-entity file headers. It never holds data
/// that cannot be rebuilt from the entity files themselves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexEntry {
    pub id: String,
    pub file_name: String,
    /// `sha256:<hex>` over the uncompressed payload
    pub checksum: String,
    pub compressed: bool,
    pub original_size: u64,
    pub stored_size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl IndexEntry {
    /// `storedSize / originalSize`; 1.0 for uncompressed entries.
    pub fn compression_ratio(&self) -> f64 {
        if self.original_size == 0 {
            return 1.0;
        }
        self.stored_size as f64 / self.original_size as f64
    }

    /// Whole days since the entity timestamp (or last write when it has none).
    pub fn age_in_days(&self, now: DateTime<Utc>) -> u32 {
        let reference = self.timestamp.unwrap_or(self.updated_at);
        let days = (now - reference).num_days();
        u32::try_from(days.max(0)).unwrap_or(u32::MAX)
    }
}

/// Sizes reported after an entity was rewritten in compressed form.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompressionOutcome {
    pub original_size: u64,
    pub compressed_size: u64,
    /// False when the entity was already compressed and nothing was written.
    pub rewritten: bool,
}

impl CompressionOutcome {
    pub fn ratio(&self) -> f64 {
        if self.original_size == 0 {
            return 1.0;
        }
        self.compressed_size as f64 / self.original_size as f64
    }

    pub fn bytes_saved(&self) -> u64 {
        self.original_size.saturating_sub(self.compressed_size)
    }
}

/// Cache telemetry. Derived from cache state, never persisted.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub size: u64,
    pub max_size: u64,
    pub items: u64,
    pub oldest_entry: Option<DateTime<Utc>>,
    pub newest_entry: Option<DateTime<Utc>>,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            return 0.0;
        }
        self.hits as f64 / total as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_age_in_days_prefers_entity_timestamp() {
        let now = Utc::now();
        let entry = IndexEntry {
            id: "a".into(),
            file_name: "session-a.json".into(),
            checksum: "sha256:00".into(),
            compressed: false,
            original_size: 100,
            stored_size: 100,
            timestamp: Some(now - Duration::days(10)),
            updated_at: now,
        };
        assert_eq!(entry.age_in_days(now), 10);
        assert_eq!(entry.compression_ratio(), 1.0);

        let future = IndexEntry {
            timestamp: Some(now + Duration::days(2)),
            ..entry
        };
        assert_eq!(future.age_in_days(now), 0);
    }

    #[test]
    fn test_compression_outcome_math() {
        let outcome = CompressionOutcome {
            original_size: 1000,
            compressed_size: 250,
            rewritten: true,
        };
        assert_eq!(outcome.ratio(), 0.25);
        assert_eq!(outcome.bytes_saved(), 750);
    }
}
