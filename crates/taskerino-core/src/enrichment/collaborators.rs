//! External AI collaborators driven by the enrichment pipeline.
//!
//! The pipeline treats these as opaque async services. Each result carries
//! the `cost` the call incurred so the orchestrator can keep totals and
//! enforce the per-session budget.

use crate::session::{AudioSegment, RecommendedTask, Screenshot, Session, VideoChapter};
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Sub-progress sink handed to long-running collaborators.
///
/// Receives a fraction in `0.0..=1.0` and a human readable message.
pub type StageProgressSink<'a> = dyn Fn(f64, &str) + Send + Sync + 'a;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioReviewResult {
    pub full_transcription: String,
    #[serde(default)]
    pub insights: Value,
    #[serde(default)]
    pub upgraded_segments: Vec<AudioSegment>,
    #[serde(default)]
    pub full_audio_attachment_id: Option<String>,
    pub cost: f64,
}

#[async_trait]
pub trait AudioReviewService: Send + Sync {
    /// Re-transcribes the session audio in one pass and extracts insights.
    async fn review_session(
        &self,
        session: &Session,
        on_progress: &StageProgressSink,
    ) -> Result<AudioReviewResult>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChapterProposal {
    pub title: String,
    pub start_time: f64,
    pub end_time: f64,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub key_topics: Vec<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChapterProposals {
    pub chapters: Vec<ChapterProposal>,
    pub cost: f64,
}

#[async_trait]
pub trait VideoChapteringService: Send + Sync {
    async fn propose_chapters(&self, session: &Session) -> Result<ChapterProposals>;

    /// Persists accepted chapters and returns them as stored.
    async fn save_chapters(
        &self,
        session_id: &str,
        chapters: &[ChapterProposal],
    ) -> Result<Vec<VideoChapter>>;
}

/// Extra inputs for summary generation.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryContext {
    #[serde(default)]
    pub full_transcription: Option<String>,
    #[serde(default)]
    pub audio_insights: Option<Value>,
    #[serde(default)]
    pub video_chapters: Vec<VideoChapter>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryResult {
    pub narrative: String,
    #[serde(default)]
    pub achievements: Vec<String>,
    #[serde(default)]
    pub blockers: Vec<String>,
    #[serde(default)]
    pub recommended_tasks: Vec<RecommendedTask>,
    #[serde(default)]
    pub key_insights: Vec<String>,
    #[serde(default)]
    pub focus_areas: Vec<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub sub_category: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub cost: f64,
}

#[async_trait]
pub trait SummaryGenerator: Send + Sync {
    async fn generate(
        &self,
        session: &Session,
        screenshots: &[Screenshot],
        audio_segments: &[AudioSegment],
        context: &SummaryContext,
    ) -> Result<SummaryResult>;
}
