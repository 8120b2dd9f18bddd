use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::enrichment::{EnrichmentConfig, EnrichmentState, EnrichmentStatus};
use crate::storage::StoredEntity;

/// A captured work session.
///
/// Only the fields the storage and enrichment subsystems touch are typed.
/// Everything else the UI writes is kept in `extra` so a load/save cycle
/// never drops data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// ISO 8601 start timestamp
    pub start_time: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_category: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default)]
    pub screenshots: Vec<Screenshot>,
    #[serde(default)]
    pub audio_segments: Vec<AudioSegment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video: Option<SessionVideo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_transcription: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_insights: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_audio_attachment_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<SessionSummaryNarrative>,
    #[serde(default)]
    pub enrichment_status: EnrichmentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enrichment_config: Option<EnrichmentConfig>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Session {
    pub fn new(id: impl Into<String>, name: impl Into<String>, start_time: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            start_time: start_time.to_rfc3339(),
            end_time: None,
            category: None,
            sub_category: None,
            tags: Vec::new(),
            notes: None,
            screenshots: Vec::new(),
            audio_segments: Vec::new(),
            video: None,
            full_transcription: None,
            audio_insights: None,
            full_audio_attachment_id: None,
            summary: None,
            enrichment_status: EnrichmentStatus::default(),
            enrichment_config: None,
            extra: Map::new(),
        }
    }

    pub fn start_time_utc(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.start_time)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }

    pub fn has_video(&self) -> bool {
        self.video
            .as_ref()
            .is_some_and(|v| !v.full_video_attachment_id.is_empty())
    }

    pub fn is_enrichment_in_progress(&self) -> bool {
        self.enrichment_status.status == EnrichmentState::InProgress
    }

    /// Returns a lightweight summary for listings.
    pub fn to_summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            start_time: self.start_time.clone(),
            end_time: self.end_time.clone(),
            category: self.category.clone(),
            tags: self.tags.clone(),
            screenshot_count: self.screenshots.len(),
            audio_segment_count: self.audio_segments.len(),
            has_video: self.has_video(),
            has_notes: self.notes.as_ref().is_some_and(|n| !n.trim().is_empty()),
            has_transcript: self.full_transcription.is_some(),
            enrichment_state: self.enrichment_status.status,
            enrichment_progress: self.enrichment_status.progress,
        }
    }

    /// Case-insensitive match on name, category, notes and tags.
    pub fn matches_query(&self, query: &str) -> bool {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return true;
        }
        let contains = |s: &str| s.to_lowercase().contains(&needle);

        contains(&self.name)
            || self.category.as_deref().is_some_and(contains)
            || self.sub_category.as_deref().is_some_and(contains)
            || self.notes.as_deref().is_some_and(contains)
            || self.tags.iter().any(|t| contains(t))
    }
}

impl StoredEntity for Session {
    const COLLECTION: &'static str = "sessions";

    fn entity_id(&self) -> &str {
        &self.id
    }

    fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.start_time_utc()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Screenshot {
    pub id: String,
    #[serde(default)]
    pub attachment_id: String,
    pub timestamp: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl StoredEntity for Screenshot {
    const COLLECTION: &'static str = "screenshots";

    fn entity_id(&self) -> &str {
        &self.id
    }

    fn timestamp(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.timestamp)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioSegment {
    pub id: String,
    pub timestamp: String,
    #[serde(default)]
    pub duration: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcription: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionVideo {
    #[serde(default)]
    pub full_video_attachment_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub chapters: Vec<VideoChapter>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoChapter {
    pub id: String,
    pub title: String,
    pub start_time: f64,
    pub end_time: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default)]
    pub key_topics: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendedTask {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

/// AI-generated narrative stored under `session.summary`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummaryNarrative {
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
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_at: Option<DateTime<Utc>>,
}

/// Lightweight listing view of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub id: String,
    pub name: String,
    pub start_time: String,
    pub end_time: Option<String>,
    pub category: Option<String>,
    pub tags: Vec<String>,
    pub screenshot_count: usize,
    pub audio_segment_count: usize,
    pub has_video: bool,
    pub has_notes: bool,
    pub has_transcript: bool,
    pub enrichment_state: EnrichmentState,
    pub enrichment_progress: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unknown_fields_survive_round_trip() {
        let raw = json!({
            "id": "s-1",
            "name": "Deep work",
            "startTime": "2025-01-10T09:00:00Z",
            "status": "completed",
            "extractedTaskIds": ["t1", "t2"],
            "screenshots": [{
                "id": "shot-1",
                "attachmentId": "att-1",
                "timestamp": "2025-01-10T09:05:00Z",
                "aiAnalysis": {"summary": "editing code"}
            }],
            "video": {"fullVideoAttachmentId": "vid-1", "optimizedPath": "/tmp/v.mp4"}
        });

        let session: Session = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(session.extra["status"], "completed");
        assert!(session.has_video());

        let back = serde_json::to_value(&session).unwrap();
        assert_eq!(back["extractedTaskIds"], raw["extractedTaskIds"]);
        assert_eq!(back["screenshots"][0]["aiAnalysis"], raw["screenshots"][0]["aiAnalysis"]);
        assert_eq!(back["video"]["optimizedPath"], "/tmp/v.mp4");
        assert_eq!(back["enrichmentStatus"]["status"], "idle");
    }

    #[test]
    fn test_matches_query() {
        let mut session = Session::new("s-1", "Refactor parser", Utc::now());
        session.tags = vec!["Rust".into()];
        session.notes = Some("Fixed the lexer".into());

        assert!(session.matches_query("parser"));
        assert!(session.matches_query("rust"));
        assert!(session.matches_query("LEXER"));
        assert!(!session.matches_query("python"));
        assert!(session.matches_query("  "));
    }

    #[test]
    fn test_summary_counts() {
        let mut session = Session::new("s-1", "Review", Utc::now());
        session.audio_segments.push(AudioSegment {
            id: "a-1".into(),
            timestamp: Utc::now().to_rfc3339(),
            duration: 10.0,
            transcription: Some("hello".into()),
            attachment_id: None,
            extra: Map::new(),
        });
        let summary = session.to_summary();
        assert_eq!(summary.audio_segment_count, 1);
        assert!(!summary.has_video);
        assert!(!summary.has_notes);
        assert_eq!(summary.enrichment_state, EnrichmentState::Idle);
    }

    #[test]
    fn test_stored_entity_timestamp() {
        let session = Session::new("s-1", "x", Utc::now());
        assert!(session.timestamp().is_some());
        assert_eq!(Session::COLLECTION, "sessions");
    }
}
