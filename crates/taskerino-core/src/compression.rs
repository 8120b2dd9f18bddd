//! Compression job and statistics types.

use serde::{Deserialize, Serialize};
use std::fmt;
use strum::{Display, EnumString};

/// `(collection, id)` reference to a stored entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityRef {
    pub collection: String,
    pub id: String,
}

impl EntityRef {
    pub fn new(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum JobState {
    Queued,
    Running,
    Done,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Cancelled)
    }
}

/// One unit of work for the compression queue. Lives only in memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompressionJob {
    pub entity_ref: EntityRef,
    pub age_in_days: u32,
    pub state: JobState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CompressionJob {
    pub fn new(entity_ref: EntityRef, age_in_days: u32) -> Self {
        Self {
            entity_ref,
            age_in_days,
            state: JobState::Queued,
            error: None,
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum CompressionMode {
    /// Runs opportunistically whenever CPU usage is below the cap.
    #[default]
    Auto,
    /// Only runs while explicitly resumed.
    Manual,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompressionStats {
    pub sessions_processed: u64,
    pub bytes_saved: u64,
    /// Running average of `compressedSize / originalSize` over completed jobs.
    pub compression_ratio: f64,
    pub in_progress: Vec<EntityRef>,
    pub queued: usize,
    pub failed: u64,
}

impl CompressionStats {
    /// Folds one completed job into the totals.
    pub fn record(&mut self, original_size: u64, compressed_size: u64) {
        let ratio = if original_size == 0 {
            1.0
        } else {
            compressed_size as f64 / original_size as f64
        };
        let n = self.sessions_processed as f64;
        self.compression_ratio = (self.compression_ratio * n + ratio) / (n + 1.0);
        self.sessions_processed += 1;
        self.bytes_saved += original_size.saturating_sub(compressed_size);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_running_average_ratio() {
        let mut stats = CompressionStats::default();
        stats.record(100, 50);
        stats.record(100, 10);
        assert_eq!(stats.sessions_processed, 2);
        assert_eq!(stats.bytes_saved, 140);
        assert!((stats.compression_ratio - 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_entity_ref_display() {
        assert_eq!(EntityRef::new("sessions", "s-1").to_string(), "sessions/s-1");
    }
}
