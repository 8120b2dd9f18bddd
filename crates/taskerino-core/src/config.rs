//! Application settings.
//!
//! All keys are camelCase in `settings.toml` and every field has a default,
//! so a missing or partial file always yields a usable configuration.

use crate::compression::CompressionMode;
use crate::error::{Result, TaskerinoError};
use crate::session::EnrichmentConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

const MIB: u64 = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub storage: StorageSettings,
    pub compression: CompressionSettings,
    pub enrichment: EnrichmentSettings,
    pub logging: LoggingSettings,
}

impl Settings {
    /// Rejects values the runtime cannot honour.
    pub fn validate(&self) -> Result<()> {
        let c = &self.compression;
        if !(0.0..=100.0).contains(&c.max_cpu) {
            return Err(TaskerinoError::config(format!(
                "compression.maxCPU must be within 0-100, got {}",
                c.max_cpu
            )));
        }
        if !(1..=22).contains(&c.zstd_level) {
            return Err(TaskerinoError::config(format!(
                "compression.zstdLevel must be within 1-22, got {}",
                c.zstd_level
            )));
        }
        if self.enrichment.stage_timeout_secs == 0 {
            return Err(TaskerinoError::config(
                "enrichment.stageTimeoutSecs must be positive",
            ));
        }
        self.enrichment
            .default_config
            .validate()
            .map_err(|e| TaskerinoError::config(format!("enrichment.defaultConfig: {}", e)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageSettings {
    /// Overrides the default data directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root_dir: Option<PathBuf>,
    pub max_cache_size_bytes: u64,
    /// Headroom that must remain free after a write.
    pub min_free_space_bytes: u64,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            root_dir: None,
            max_cache_size_bytes: 100 * MIB,
            min_free_space_bytes: 100 * MIB,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompressionSettings {
    pub enabled: bool,
    pub mode: CompressionMode,
    #[serde(rename = "maxCPU")]
    pub max_cpu: f32,
    pub age_threshold_days: u32,
    pub compress_screenshots: bool,
    pub process_oldest_first: bool,
    pub cpu_poll_interval_ms: u64,
    pub zstd_level: i32,
}

impl Default for CompressionSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: CompressionMode::Auto,
            max_cpu: 20.0,
            age_threshold_days: 7,
            compress_screenshots: false,
            process_oldest_first: true,
            cpu_poll_interval_ms: 5000,
            zstd_level: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EnrichmentSettings {
    /// Hard timeout per collaborator call.
    pub stage_timeout_secs: u64,
    /// Used for sessions that carry no `enrichmentConfig`.
    pub default_config: EnrichmentConfig,
}

impl Default for EnrichmentSettings {
    fn default() -> Self {
        Self {
            stage_timeout_secs: 600,
            default_config: EnrichmentConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    pub level: String,
    /// Directory for the rolling log file; stderr only when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,
    pub file_name: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directory: None,
            file_name: "taskerino.log".to_string(),
        }
    }
}
