//! Enrichment pipeline contracts: collaborator traits, progress events and
//! run options/outcomes shared by the orchestrator and its callers.

mod collaborators;
mod progress;

pub use collaborators::{
    AudioReviewResult, AudioReviewService, ChapterProposal, ChapterProposals, StageProgressSink,
    SummaryContext, SummaryGenerator, SummaryResult, VideoChapteringService,
};
pub use progress::{ProgressEvent, ProgressStage};

use crate::session::EnrichmentStatus;
use serde::{Deserialize, Serialize};
use strum::Display;

/// How a run treats earlier stage results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum EnrichmentMode {
    /// Reset every stage to pending and run from audio.
    #[default]
    Restart,
    /// Keep completed stages and continue from the first unfinished one.
    /// Only allowed when the persisted status has `canResume`.
    Resume,
}

/// Terminal result of one enrichment run.
#[derive(Debug, Clone, PartialEq)]
pub enum EnrichmentOutcome {
    Completed(EnrichmentStatus),
    Partial(EnrichmentStatus),
    Failed(EnrichmentStatus),
    Cancelled(EnrichmentStatus),
}

impl EnrichmentOutcome {
    pub fn status(&self) -> &EnrichmentStatus {
        match self {
            Self::Completed(s) | Self::Partial(s) | Self::Failed(s) | Self::Cancelled(s) => s,
        }
    }

    pub fn into_status(self) -> EnrichmentStatus {
        match self {
            Self::Completed(s) | Self::Partial(s) | Self::Failed(s) | Self::Cancelled(s) => s,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }
}
