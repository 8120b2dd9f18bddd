//! End-to-end runs of the runtime on a temporary directory: real chunked
//! store, cache and compression queue, scripted AI collaborators.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use serde_json::{Map, Value, json};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use taskerino_application::{EnrichmentOptions, EnrichmentServices, RuntimeOptions, TaskerinoRuntime};
use taskerino_core::compression::CompressionMode;
use taskerino_core::config::Settings;
use taskerino_core::enrichment::{
    AudioReviewResult, AudioReviewService, ChapterProposal, ChapterProposals, ProgressStage,
    StageProgressSink, SummaryContext, SummaryGenerator, SummaryResult, VideoChapteringService,
};
use taskerino_core::session::{
    AudioSegment, CurrentStage, EnrichmentConfig, EnrichmentState, Screenshot, Session,
    SessionQuery, SessionVideo, StageState, VideoChapter,
};
use taskerino_infrastructure::FixedCpuSampler;
use tempfile::TempDir;
use tokio::sync::Notify;

#[derive(Default)]
struct Audio {
    calls: AtomicUsize,
    gate: Option<Arc<Notify>>,
}

#[async_trait]
impl AudioReviewService for Audio {
    async fn review_session(
        &self,
        session: &Session,
        on_progress: &StageProgressSink,
    ) -> anyhow::Result<AudioReviewResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        on_progress(0.25, "Uploading audio");
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        Ok(AudioReviewResult {
            full_transcription: format!("transcript of {}", session.name),
            insights: json!({"sentiment": "positive"}),
            upgraded_segments: Vec::new(),
            full_audio_attachment_id: None,
            cost: 0.12,
        })
    }
}

#[derive(Default)]
struct Video {
    calls: AtomicUsize,
    fail: AtomicBool,
}

#[async_trait]
impl VideoChapteringService for Video {
    async fn propose_chapters(&self, _session: &Session) -> anyhow::Result<ChapterProposals> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("frame extraction failed");
        }
        Ok(ChapterProposals {
            chapters: vec![ChapterProposal {
                title: "Planning".to_string(),
                start_time: 0.0,
                end_time: 120.0,
                summary: Some("Sketching the approach".to_string()),
                key_topics: Vec::new(),
                confidence: None,
            }],
            cost: 0.3,
        })
    }

    async fn save_chapters(
        &self,
        session_id: &str,
        chapters: &[ChapterProposal],
    ) -> anyhow::Result<Vec<VideoChapter>> {
        Ok(chapters
            .iter()
            .map(|c| VideoChapter {
                id: format!("{}-{}", session_id, c.start_time),
                title: c.title.clone(),
                start_time: c.start_time,
                end_time: c.end_time,
                summary: c.summary.clone(),
                key_topics: c.key_topics.clone(),
            })
            .collect())
    }
}

#[derive(Default)]
struct Summary {
    calls: AtomicUsize,
}

#[async_trait]
impl SummaryGenerator for Summary {
    async fn generate(
        &self,
        _session: &Session,
        _screenshots: &[Screenshot],
        _audio_segments: &[AudioSegment],
        context: &SummaryContext,
    ) -> anyhow::Result<SummaryResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(SummaryResult {
            narrative: context.full_transcription.clone().unwrap_or_default(),
            achievements: Vec::new(),
            blockers: Vec::new(),
            recommended_tasks: Vec::new(),
            key_insights: Vec::new(),
            focus_areas: Vec::new(),
            category: None,
            sub_category: None,
            tags: Vec::new(),
            cost: 0.08,
        })
    }
}

struct Harness {
    audio: Arc<Audio>,
    video: Arc<Video>,
    summary: Arc<Summary>,
}

impl Harness {
    fn new() -> Self {
        Self::with_audio(Audio::default())
    }

    fn with_audio(audio: Audio) -> Self {
        Self {
            audio: Arc::new(audio),
            video: Arc::new(Video::default()),
            summary: Arc::new(Summary::default()),
        }
    }

    fn services(&self) -> EnrichmentServices {
        EnrichmentServices {
            audio: self.audio.clone(),
            video: self.video.clone(),
            summary: self.summary.clone(),
        }
    }

    async fn start(&self, root: &Path) -> TaskerinoRuntime {
        self.start_with(root, RuntimeOptions::default()).await
    }

    async fn start_with(&self, root: &Path, mut options: RuntimeOptions) -> TaskerinoRuntime {
        options.cpu_sampler = Some(Arc::new(FixedCpuSampler::new(5.0)));
        TaskerinoRuntime::start(settings(root), self.services(), options)
            .await
            .unwrap()
    }
}

fn settings(root: &Path) -> Settings {
    let mut settings = Settings::default();
    settings.storage.root_dir = Some(root.join("store"));
    settings.storage.min_free_space_bytes = 0;
    settings.compression.mode = CompressionMode::Manual;
    settings
}

fn recorded_session(id: &str, started_days_ago: i64) -> Session {
    let start = Utc::now() - ChronoDuration::days(started_days_ago);
    let mut session = Session::new(id, "Refactor parser", start);
    session.audio_segments.push(AudioSegment {
        id: format!("{}-audio-0", id),
        timestamp: start.to_rfc3339(),
        duration: 12.5,
        transcription: None,
        attachment_id: Some("att-1".to_string()),
        extra: Map::new(),
    });
    session.video = Some(SessionVideo {
        full_video_attachment_id: "vid-1".to_string(),
        duration: Some(120.0),
        chapters: Vec::new(),
        extra: Map::new(),
    });
    session
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_completed_run_survives_restart() {
    let temp_dir = TempDir::new().unwrap();
    let harness = Harness::new();
    let runtime = harness.start(temp_dir.path()).await;
    runtime.sessions().save(&recorded_session("s1", 0)).await.unwrap();

    let run = runtime
        .orchestrator()
        .enrich_session("s1", EnrichmentOptions::restart())
        .await
        .unwrap();
    let outcome = run.outcome().await.unwrap();
    assert!(outcome.is_completed());
    runtime.shutdown().await;

    // cold start reads everything back from disk
    let runtime = harness.start(temp_dir.path()).await;
    let session = runtime.sessions().find_by_id("s1").await.unwrap().unwrap();
    assert_eq!(session.enrichment_status, *outcome.status());
    assert_eq!(session.enrichment_status.progress, 100.0);
    assert!((session.enrichment_status.total_cost - 0.5).abs() < 1e-9);
    assert_eq!(session.video.unwrap().chapters.len(), 1);

    let bytes = runtime
        .store()
        .load_entity_bytes("sessions", "s1")
        .await
        .unwrap()
        .unwrap();
    let raw: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(raw["enrichmentStatus"]["status"], "completed");
    assert_eq!(raw["enrichmentStatus"]["currentStage"], "complete");
    assert_eq!(raw["enrichmentStatus"]["audio"]["status"], "completed");
    assert_eq!(raw["enrichmentStatus"]["canResume"], false);
    runtime.shutdown().await;
}

#[tokio::test]
async fn test_enriched_sessions_are_queryable() {
    let temp_dir = TempDir::new().unwrap();
    let harness = Harness::new();
    let runtime = harness.start(temp_dir.path()).await;
    runtime.sessions().save(&recorded_session("s1", 0)).await.unwrap();
    runtime.sessions().save(&recorded_session("s2", 20)).await.unwrap();

    let run = runtime
        .orchestrator()
        .enrich_session("s1", EnrichmentOptions::restart())
        .await
        .unwrap();
    assert!(run.outcome().await.unwrap().is_completed());

    let query = SessionQuery {
        keywords: Some(vec!["parser".to_string()]),
        start_date: Some(Utc::now() - ChronoDuration::days(7)),
        has_blockers: Some(false),
        ..Default::default()
    };
    let result = runtime.sessions().query(&query).await.unwrap();
    assert_eq!(result.total, 1);
    assert_eq!(result.sessions[0].id, "s1");
    assert!(result.sessions[0].summary.is_some());

    runtime.active_session().set(Some("s1".to_string()));
    let active = runtime.active_session().load().await.unwrap().unwrap();
    assert_eq!(active.enrichment_status.status, EnrichmentState::Completed);
    runtime.shutdown().await;
}

#[tokio::test]
async fn test_video_disabled_completes_with_skip() {
    let temp_dir = TempDir::new().unwrap();
    let harness = Harness::new();
    let runtime = harness.start(temp_dir.path()).await;

    let mut session = recorded_session("s1", 0);
    session.enrichment_config = Some(EnrichmentConfig {
        include_video_chapters: false,
        ..EnrichmentConfig::default()
    });
    runtime.sessions().save(&session).await.unwrap();

    let mut run = runtime
        .orchestrator()
        .enrich_session("s1", EnrichmentOptions::restart())
        .await
        .unwrap();
    let mut stages = Vec::new();
    while let Some(event) = run.next_event().await {
        stages.push(event.stage);
    }
    let status = run.outcome().await.unwrap().into_status();

    assert_eq!(status.status, EnrichmentState::Completed);
    assert_eq!(status.video.status, StageState::Skipped);
    assert_eq!(status.video.cost, Some(0.0));
    assert_eq!(status.progress, 100.0);
    assert_eq!(harness.video.calls.load(Ordering::SeqCst), 0);
    assert_eq!(stages.first(), Some(&ProgressStage::Validating));
    assert_eq!(stages.last(), Some(&ProgressStage::Complete));
    runtime.shutdown().await;
}

#[tokio::test]
async fn test_partial_run_resumes_after_restart() {
    let temp_dir = TempDir::new().unwrap();
    let harness = Harness::new();
    harness.video.fail.store(true, Ordering::SeqCst);
    let runtime = harness.start(temp_dir.path()).await;
    runtime.sessions().save(&recorded_session("s1", 0)).await.unwrap();

    let status = runtime
        .orchestrator()
        .enrich_session("s1", EnrichmentOptions::restart())
        .await
        .unwrap()
        .outcome()
        .await
        .unwrap()
        .into_status();
    assert_eq!(status.status, EnrichmentState::Partial);
    assert_eq!(status.progress, 40.0);
    assert!(status.can_resume);
    assert_eq!(
        status.video.error.as_deref(),
        Some("frame extraction failed")
    );
    runtime.shutdown().await;

    harness.video.fail.store(false, Ordering::SeqCst);
    let runtime = harness.start(temp_dir.path()).await;
    let outcome = runtime
        .orchestrator()
        .enrich_session("s1", EnrichmentOptions::resume())
        .await
        .unwrap()
        .outcome()
        .await
        .unwrap();

    assert!(outcome.is_completed());
    assert_eq!(harness.audio.calls.load(Ordering::SeqCst), 1);
    assert_eq!(harness.video.calls.load(Ordering::SeqCst), 2);
    outcome.status().check_invariants().unwrap();
    runtime.shutdown().await;
}

#[tokio::test]
async fn test_interrupted_run_is_recovered_on_start() {
    let temp_dir = TempDir::new().unwrap();
    let harness = Harness::new();
    let runtime = harness.start(temp_dir.path()).await;

    let mut session = recorded_session("crashed", 0);
    let now = Utc::now();
    {
        let status = &mut session.enrichment_status;
        status.status = EnrichmentState::InProgress;
        status.audio.mark_completed(now, 0.12);
        status.video.mark_processing(now);
        status.current_stage = CurrentStage::Video;
        status.recompute();
    }
    runtime.sessions().save(&session).await.unwrap();
    runtime.shutdown().await;

    let runtime = harness.start(temp_dir.path()).await;
    let status = runtime
        .sessions()
        .find_by_id("crashed")
        .await
        .unwrap()
        .unwrap()
        .enrichment_status;
    assert_eq!(status.status, EnrichmentState::Partial);
    assert_eq!(status.video.status, StageState::Failed);
    assert!(status.can_resume);
    assert_eq!(status.current_stage, CurrentStage::Video);
    runtime.shutdown().await;
}

#[tokio::test]
async fn test_compression_leaves_enriching_session_alone() {
    let temp_dir = TempDir::new().unwrap();
    let gate = Arc::new(Notify::new());
    let harness = Harness::with_audio(Audio {
        gate: Some(gate.clone()),
        ..Audio::default()
    });
    let runtime = harness.start(temp_dir.path()).await;

    let cold = recorded_session("cold", 30);
    runtime.sessions().save(&cold).await.unwrap();
    runtime.sessions().save(&recorded_session("busy", 30)).await.unwrap();

    let mut run = runtime
        .orchestrator()
        .enrich_session("busy", EnrichmentOptions::restart())
        .await
        .unwrap();
    while let Some(event) = run.next_event().await {
        if event.stage == ProgressStage::Audio {
            break;
        }
    }

    let queue = runtime.compression();
    assert_eq!(queue.scan().await.unwrap(), 1);
    queue.resume();
    wait_until(|| queue.stats().sessions_processed == 1).await;

    let entries = runtime.store().index_entries("sessions").await.unwrap();
    let compressed: Vec<(&str, bool)> = entries
        .iter()
        .map(|e| (e.id.as_str(), e.compressed))
        .collect();
    assert!(compressed.contains(&("cold", true)));
    assert!(compressed.contains(&("busy", false)));
    assert!(queue.stats().bytes_saved > 0);

    let reloaded = runtime.sessions().find_by_id("cold").await.unwrap().unwrap();
    assert_eq!(reloaded, cold);

    gate.notify_one();
    assert!(run.outcome().await.unwrap().is_completed());
    runtime.shutdown().await;
}

#[tokio::test]
async fn test_legacy_data_is_migrated_on_start() {
    let temp_dir = TempDir::new().unwrap();
    let legacy_dir = temp_dir.path().join("legacy");
    std::fs::create_dir_all(&legacy_dir).unwrap();
    let started = Utc::now().to_rfc3339();
    std::fs::write(
        legacy_dir.join("sessions.json"),
        json!([{
            "id": "old",
            "name": "Legacy session",
            "startTime": started,
            "audioReviewCompleted": true,
            "fullTranscription": "hello from the past",
            "audioSegments": [{"id": "a0", "timestamp": started, "duration": 3.0}],
            "video": {"fullVideoAttachmentId": "v0"}
        }])
        .to_string(),
    )
    .unwrap();

    let harness = Harness::new();
    let runtime = harness
        .start_with(
            temp_dir.path(),
            RuntimeOptions {
                legacy_dir: Some(legacy_dir),
                ..RuntimeOptions::default()
            },
        )
        .await;

    let session = runtime.sessions().find_by_id("old").await.unwrap().unwrap();
    assert_eq!(session.enrichment_status.status, EnrichmentState::Partial);
    assert!(session.enrichment_status.can_resume);
    assert!(session.enrichment_config.is_some());

    let outcome = runtime
        .orchestrator()
        .enrich_session("old", EnrichmentOptions::resume())
        .await
        .unwrap()
        .outcome()
        .await
        .unwrap();
    assert!(outcome.is_completed());
    assert_eq!(harness.audio.calls.load(Ordering::SeqCst), 0);
    assert_eq!(
        runtime.sessions().find_by_id("old").await.unwrap().unwrap().summary.unwrap().narrative,
        "hello from the past"
    );
    runtime.shutdown().await;
}
