//! Enrichment status and configuration persisted on every session.
//!
//! The status record is the durable side of the enrichment pipeline: it is
//! written after every stage transition so a crash leaves the last completed
//! stage on disk, and it is what `canResume` / `currentStage` are derived from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Overall state of a session's enrichment.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum EnrichmentState {
    #[default]
    Idle,
    Pending,
    InProgress,
    Completed,
    Failed,
    Partial,
}

impl EnrichmentState {
    /// Terminal states end a run; `Idle` is the resting state before any run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Partial)
    }
}

/// One of the three pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Stage {
    Audio,
    Video,
    Summary,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::Audio, Stage::Video, Stage::Summary];

    /// Share of overall progress (0-100) this stage is worth.
    pub fn weight(&self) -> f64 {
        match self {
            Stage::Audio => 40.0,
            Stage::Video => 30.0,
            Stage::Summary => 30.0,
        }
    }

    /// Progress value at which this stage's band starts.
    pub fn band_start(&self) -> f64 {
        Stage::ALL
            .iter()
            .take_while(|s| *s != self)
            .map(|s| s.weight())
            .sum()
    }

    pub fn next(&self) -> Option<Stage> {
        match self {
            Stage::Audio => Some(Stage::Video),
            Stage::Video => Some(Stage::Summary),
            Stage::Summary => None,
        }
    }
}

/// `currentStage` as persisted: a pipeline stage or `complete`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum CurrentStage {
    #[default]
    Audio,
    Video,
    Summary,
    Complete,
}

impl From<Stage> for CurrentStage {
    fn from(stage: Stage) -> Self {
        match stage {
            Stage::Audio => CurrentStage::Audio,
            Stage::Video => CurrentStage::Video,
            Stage::Summary => CurrentStage::Summary,
        }
    }
}

/// State of a single stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum StageState {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
    Skipped,
}

impl StageState {
    /// Completed or skipped stages count toward progress.
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Completed | Self::Skipped)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageStatus {
    pub status: StageState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
}

impl StageStatus {
    pub fn mark_processing(&mut self, now: DateTime<Utc>) {
        self.status = StageState::Processing;
        self.started_at = Some(now);
        self.completed_at = None;
        self.error = None;
        self.cost = None;
    }

    pub fn mark_completed(&mut self, now: DateTime<Utc>, cost: f64) {
        self.status = StageState::Completed;
        self.completed_at = Some(now);
        self.error = None;
        self.cost = Some(cost.max(0.0));
    }

    pub fn mark_failed(&mut self, now: DateTime<Utc>, error: impl Into<String>) {
        self.status = StageState::Failed;
        self.completed_at = Some(now);
        self.error = Some(error.into());
        self.cost = None;
    }

    pub fn mark_skipped(&mut self, now: DateTime<Utc>) {
        self.status = StageState::Skipped;
        self.completed_at = Some(now);
        self.error = None;
        self.cost = Some(0.0);
    }
}

/// Snapshot of the three stage records, attached to progress events.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<StageStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video: Option<StageStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<StageStatus>,
}

/// Persisted enrichment status of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichmentStatus {
    pub status: EnrichmentState,
    pub progress: f64,
    pub current_stage: CurrentStage,
    pub audio: StageStatus,
    pub video: StageStatus,
    pub summary: StageStatus,
    pub total_cost: f64,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
    pub can_resume: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated_at: Option<DateTime<Utc>>,
}

impl Default for EnrichmentStatus {
    fn default() -> Self {
        Self {
            status: EnrichmentState::Idle,
            progress: 0.0,
            current_stage: CurrentStage::Audio,
            audio: StageStatus::default(),
            video: StageStatus::default(),
            summary: StageStatus::default(),
            total_cost: 0.0,
            errors: Vec::new(),
            warnings: Vec::new(),
            can_resume: false,
            last_updated_at: None,
        }
    }
}

impl EnrichmentStatus {
    pub fn stage(&self, stage: Stage) -> &StageStatus {
        match stage {
            Stage::Audio => &self.audio,
            Stage::Video => &self.video,
            Stage::Summary => &self.summary,
        }
    }

    pub fn stage_mut(&mut self, stage: Stage) -> &mut StageStatus {
        match stage {
            Stage::Audio => &mut self.audio,
            Stage::Video => &mut self.video,
            Stage::Summary => &mut self.summary,
        }
    }

    /// Weighted stage completion; skipped stages contribute their weight.
    pub fn computed_progress(&self) -> f64 {
        Stage::ALL
            .iter()
            .filter(|s| self.stage(**s).status.is_done())
            .map(|s| s.weight())
            .sum()
    }

    /// Sum of costs over completed stages.
    pub fn computed_total_cost(&self) -> f64 {
        Stage::ALL
            .iter()
            .map(|s| self.stage(*s))
            .filter(|st| st.status == StageState::Completed)
            .map(|st| st.cost.unwrap_or(0.0))
            .sum()
    }

    /// Re-derives `progress`, `totalCost` and `canResume` from the stage records.
    pub fn recompute(&mut self) {
        self.progress = self.computed_progress();
        self.total_cost = self.computed_total_cost();
        self.can_resume = self.status == EnrichmentState::Partial;
    }

    /// Terminal status implied by the stage records once a run stops.
    ///
    /// All stages done ⇒ completed; at least one stage actually completed ⇒
    /// partial; otherwise failed.
    pub fn terminal_state(&self) -> EnrichmentState {
        if Stage::ALL.iter().all(|s| self.stage(*s).status.is_done()) {
            EnrichmentState::Completed
        } else if Stage::ALL
            .iter()
            .any(|s| self.stage(*s).status == StageState::Completed)
        {
            EnrichmentState::Partial
        } else {
            EnrichmentState::Failed
        }
    }

    /// Clears every stage back to `pending` for a full restart.
    pub fn reset_for_restart(&mut self) {
        let last_updated_at = self.last_updated_at;
        *self = Self::default();
        self.last_updated_at = last_updated_at;
    }

    /// First stage that still needs work when resuming.
    pub fn first_unfinished_stage(&self) -> Option<Stage> {
        Stage::ALL
            .into_iter()
            .find(|s| !self.stage(*s).status.is_done())
    }

    /// Stage currently marked `processing`, if any.
    pub fn processing_stage(&self) -> Option<Stage> {
        Stage::ALL
            .into_iter()
            .find(|s| self.stage(*s).status == StageState::Processing)
    }

    pub fn snapshot(&self) -> StageSnapshot {
        StageSnapshot {
            audio: Some(self.audio.clone()),
            video: Some(self.video.clone()),
            summary: Some(self.summary.clone()),
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(
            self.status,
            EnrichmentState::Pending | EnrichmentState::InProgress
        )
    }

    /// Checks the persisted-model invariants. Used by tests and by recovery
    /// code that wants to log inconsistent records.
    pub fn check_invariants(&self) -> Result<(), String> {
        if !(0.0..=100.0).contains(&self.progress) {
            return Err(format!("progress {} out of range", self.progress));
        }
        if self.total_cost < 0.0 {
            return Err(format!("negative total cost {}", self.total_cost));
        }
        if self.status == EnrichmentState::Completed
            && !Stage::ALL.iter().all(|s| self.stage(*s).status.is_done())
        {
            return Err("completed status with unfinished stages".to_string());
        }
        if self.can_resume {
            let resumable = Stage::ALL.iter().enumerate().any(|(i, s)| {
                matches!(
                    self.stage(*s).status,
                    StageState::Pending | StageState::Failed
                ) && Stage::ALL[..i]
                    .iter()
                    .any(|earlier| self.stage(*earlier).status == StageState::Completed)
            });
            if !resumable {
                return Err("canResume without a completed stage before an open one".to_string());
            }
        }
        let expected_cost = self.computed_total_cost();
        if (self.total_cost - expected_cost).abs() > 1e-9 {
            return Err(format!(
                "total cost {} does not match stage costs {}",
                self.total_cost, expected_cost
            ));
        }
        Ok(())
    }
}

/// Per-session enrichment preferences. Read-only to the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichmentConfig {
    pub include_audio_review: bool,
    pub include_video_chapters: bool,
    pub auto_enrich_on_complete: bool,
    pub max_cost_threshold: f64,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            include_audio_review: true,
            include_video_chapters: true,
            auto_enrich_on_complete: true,
            max_cost_threshold: 10.0,
        }
    }
}

impl EnrichmentConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !self.max_cost_threshold.is_finite() || self.max_cost_threshold <= 0.0 {
            return Err(format!(
                "maxCostThreshold must be a positive amount, got {}",
                self.max_cost_threshold
            ));
        }
        Ok(())
    }
}
