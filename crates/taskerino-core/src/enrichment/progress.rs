use crate::session::{EnrichmentStatus, Stage, StageSnapshot};
use serde::{Deserialize, Serialize};
use strum::Display;

/// Phase reported by a progress event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ProgressStage {
    Validating,
    Audio,
    Video,
    Summary,
    Complete,
    Error,
    Cancelled,
}

impl From<Stage> for ProgressStage {
    fn from(stage: Stage) -> Self {
        match stage {
            Stage::Audio => ProgressStage::Audio,
            Stage::Video => ProgressStage::Video,
            Stage::Summary => ProgressStage::Summary,
        }
    }
}

impl ProgressStage {
    /// Stages a run can end on. `Error` is also sent mid-run for each failed
    /// stage; a partial run still ends on `Complete`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Error | Self::Cancelled)
    }
}

/// One event of an enrichment run's progress stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub stage: ProgressStage,
    pub message: String,
    /// Overall progress in `0..=100`.
    pub progress: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stages: Option<StageSnapshot>,
}

impl ProgressEvent {
    pub fn new(
        stage: ProgressStage,
        message: impl Into<String>,
        progress: f64,
        status: &EnrichmentStatus,
    ) -> Self {
        Self {
            stage,
            message: message.into(),
            progress: progress.clamp(0.0, 100.0),
            stages: Some(status.snapshot()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_shape() {
        let status = EnrichmentStatus::default();
        let event = ProgressEvent::new(ProgressStage::Validating, "Validating", -3.0, &status);
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["stage"], "validating");
        assert_eq!(json["progress"], 0.0);
        assert_eq!(json["stages"]["audio"]["status"], "pending");
    }
}
