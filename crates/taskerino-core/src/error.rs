//! Error types for the Taskerino core.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A shared error type for the storage and enrichment subsystems.
///
/// Variants are structured so callers (and the IPC bridge) can tell a
/// rejected request apart from a failed stage or an unreadable entity.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TaskerinoError {
    /// Request rejected before any work started (bad config, budget already spent).
    #[error("Validation error: {0}")]
    Validation(String),

    /// A second enrichment run was requested while one is active.
    #[error("Enrichment already running for session '{session_id}'")]
    ConcurrentEnrichment { session_id: String },

    /// An external collaborator failed during a stage.
    #[error("Stage '{stage}' failed: {message}")]
    StageFailure { stage: String, message: String },

    /// A stage call exceeded its hard timeout.
    #[error("Stage '{stage}' timed out after {millis}ms")]
    StageTimeout { stage: String, millis: u64 },

    /// The run was cancelled by the caller.
    #[error("Enrichment cancelled")]
    Cancelled,

    /// An entity file failed integrity checks on load.
    #[error("Corrupted entity {collection}/{id}: {reason}")]
    CorruptedEntity {
        collection: String,
        id: String,
        reason: String,
    },

    /// Compressing one entity failed. The uncompressed original is untouched.
    #[error("Compression failed for {collection}/{id}: {message}")]
    CompressionFailure {
        collection: String,
        id: String,
        message: String,
    },

    /// Entity not found error with type information
    #[error("Entity not found: {entity_type} '{id}'")]
    NotFound {
        entity_type: String,
        id: String,
    },

    /// Not enough free disk space for a write.
    #[error(
        "Insufficient disk space: {available_mb} MB available, {required_mb} MB required at {path}"
    )]
    InsufficientSpace {
        available_mb: u64,
        required_mb: u64,
        path: String,
    },

    /// IO error (file system operations)
    #[error("IO error: {message}")]
    Io { message: String },

    /// Serialization/deserialization error
    #[error("Serialization error: {format} - {message}")]
    Serialization { format: String, message: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Migration error
    #[error("Migration error: {0}")]
    Migration(String),

    /// Internal error (should not happen in normal operation)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl TaskerinoError {
    // ============================================================================
    // Constructor helpers
    // ============================================================================

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn concurrent_enrichment(session_id: impl Into<String>) -> Self {
        Self::ConcurrentEnrichment {
            session_id: session_id.into(),
        }
    }

    pub fn stage_failure(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::StageFailure {
            stage: stage.into(),
            message: message.into(),
        }
    }

    pub fn corrupted(
        collection: impl Into<String>,
        id: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::CorruptedEntity {
            collection: collection.into(),
            id: id.into(),
            reason: reason.into(),
        }
    }

    pub fn compression_failure(
        collection: impl Into<String>,
        id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::CompressionFailure {
            collection: collection.into(),
            id: id.into(),
            message: message.into(),
        }
    }

    pub fn not_found(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::Io {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn migration(message: impl Into<String>) -> Self {
        Self::Migration(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    // ============================================================================
    // Type checking methods
    // ============================================================================

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_corrupted(&self) -> bool {
        matches!(self, Self::CorruptedEntity { .. })
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    pub fn is_concurrent_enrichment(&self) -> bool {
        matches!(self, Self::ConcurrentEnrichment { .. })
    }

    /// True for failures that stay local to one stage or job and leave the
    /// rest of the pipeline usable.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::StageFailure { .. }
                | Self::StageTimeout { .. }
                | Self::CompressionFailure { .. }
                | Self::Io { .. }
        )
    }
}

// ============================================================================
// From implementations for automatic conversion
// ============================================================================

impl From<std::io::Error> for TaskerinoError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: format!("{} (kind: {:?})", err, err.kind()),
        }
    }
}

impl From<serde_json::Error> for TaskerinoError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            format: "JSON".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<toml::de::Error> for TaskerinoError {
    fn from(err: toml::de::Error) -> Self {
        Self::Serialization {
            format: "TOML".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<toml::ser::Error> for TaskerinoError {
    fn from(err: toml::ser::Error) -> Self {
        Self::Serialization {
            format: "TOML".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<anyhow::Error> for TaskerinoError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

/// A type alias for `Result<T, TaskerinoError>`.
pub type Result<T> = std::result::Result<T, TaskerinoError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_conversion_keeps_kind() {
        let err: TaskerinoError =
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope").into();
        match err {
            TaskerinoError::Io { message } => assert!(message.contains("PermissionDenied")),
            other => panic!("unexpected variant: {:?}", other),
        }
    }

    #[test]
    fn test_recoverable_classification() {
        assert!(TaskerinoError::stage_failure("audio", "boom").is_recoverable());
        assert!(TaskerinoError::compression_failure("sessions", "a", "x").is_recoverable());
        assert!(!TaskerinoError::corrupted("sessions", "a", "checksum").is_recoverable());
        assert!(!TaskerinoError::validation("over budget").is_recoverable());
    }

    #[test]
    fn test_display_messages() {
        let err = TaskerinoError::concurrent_enrichment("s-1");
        assert_eq!(err.to_string(), "Enrichment already running for session 's-1'");

        let err = TaskerinoError::corrupted("sessions", "s-2", "checksum mismatch");
        assert_eq!(
            err.to_string(),
            "Corrupted entity sessions/s-2: checksum mismatch"
        );
    }
}
