//! The enrichment pipeline: audio review, then video chaptering, then summary.

use super::run_guard::{ActiveRuns, RunPermit};
use super::stage::{
    ProgressEmitter, band_progress, call_with_timeout, failure_message, sanitize_cost,
};
use chrono::Utc;
use futures::Stream;
use std::sync::Arc;
use std::time::Duration;
use taskerino_core::config::EnrichmentSettings;
use taskerino_core::enrichment::{
    AudioReviewService, EnrichmentMode, EnrichmentOutcome, ProgressEvent, ProgressStage,
    SummaryContext, SummaryGenerator, VideoChapteringService,
};
use taskerino_core::session::{
    CurrentStage, EnrichmentConfig, EnrichmentState, EnrichmentStatus, Session,
    SessionRepository, SessionSummaryNarrative, Stage, StageState,
};
use taskerino_core::{Result, TaskerinoError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Per-call options for [`EnrichmentOrchestrator::enrich_session`].
#[derive(Debug, Clone, Default)]
pub struct EnrichmentOptions {
    pub mode: EnrichmentMode,
    /// Checked between stages; a raised token stops the run before the next stage.
    pub cancel: CancellationToken,
    /// Replaces the session's own `enrichmentConfig` for this run only.
    pub config_override: Option<EnrichmentConfig>,
}

impl EnrichmentOptions {
    pub fn restart() -> Self {
        Self::default()
    }

    pub fn resume() -> Self {
        Self {
            mode: EnrichmentMode::Resume,
            ..Self::default()
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_config(mut self, config: EnrichmentConfig) -> Self {
        self.config_override = Some(config);
        self
    }
}

/// Handle to a started run.
///
/// The progress stream is finite and can be consumed once; it ends after the
/// terminal `complete`, `error` or `cancelled` event.
pub struct EnrichmentRun {
    run_id: Uuid,
    session_id: String,
    cancel: CancellationToken,
    events: mpsc::UnboundedReceiver<ProgressEvent>,
    handle: JoinHandle<EnrichmentOutcome>,
}

impl EnrichmentRun {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Requests cancellation before the next stage starts.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub async fn next_event(&mut self) -> Option<ProgressEvent> {
        self.events.recv().await
    }

    /// Progress events as a stream.
    pub fn events(&mut self) -> impl Stream<Item = ProgressEvent> + '_ {
        futures::stream::unfold(&mut self.events, |rx| async move {
            rx.recv().await.map(|event| (event, rx))
        })
    }

    /// Waits for the run to finish. Unread progress events are discarded.
    pub async fn outcome(self) -> Result<EnrichmentOutcome> {
        let Self {
            run_id,
            events,
            handle,
            ..
        } = self;
        drop(events);
        handle
            .await
            .map_err(|e| TaskerinoError::internal(format!("enrichment run {} aborted: {}", run_id, e)))
    }
}

#[derive(Clone)]
struct Collaborators {
    audio: Arc<dyn AudioReviewService>,
    video: Arc<dyn VideoChapteringService>,
    summary: Arc<dyn SummaryGenerator>,
}

/// Drives sessions through the enrichment pipeline.
///
/// At most one run per session is active at a time. Every stage transition
/// is persisted through the session repository, so a crash leaves the last
/// finished stage on disk and [`recover_interrupted`](Self::recover_interrupted)
/// can turn the stale `in-progress` record into a resumable one.
pub struct EnrichmentOrchestrator {
    repository: Arc<dyn SessionRepository>,
    collaborators: Collaborators,
    default_config: EnrichmentConfig,
    stage_timeout: Duration,
    active: ActiveRuns,
}

impl EnrichmentOrchestrator {
    pub fn new(
        repository: Arc<dyn SessionRepository>,
        audio: Arc<dyn AudioReviewService>,
        video: Arc<dyn VideoChapteringService>,
        summary: Arc<dyn SummaryGenerator>,
        settings: &EnrichmentSettings,
    ) -> Self {
        Self {
            repository,
            collaborators: Collaborators {
                audio,
                video,
                summary,
            },
            default_config: settings.default_config.clone(),
            stage_timeout: Duration::from_secs(settings.stage_timeout_secs),
            active: ActiveRuns::new(),
        }
    }

    /// Overrides the per-call hard timeout.
    pub fn with_stage_timeout(mut self, timeout: Duration) -> Self {
        self.stage_timeout = timeout;
        self
    }

    pub fn is_running(&self, session_id: &str) -> bool {
        self.active.is_active(session_id)
    }

    pub fn active_runs(&self) -> usize {
        self.active.len()
    }

    /// Starts enriching a session.
    ///
    /// Rejections happen here, before anything is persisted:
    /// - `ConcurrentEnrichment` if a run is already active for the session
    /// - `NotFound` if the session does not exist
    /// - `Validation` for an unusable config, a resume with nothing to
    ///   resume, or a budget that is already spent
    ///
    /// # Returns
    ///
    /// A handle yielding progress events and the final outcome. Stage errors
    /// never surface as `Err`; they end up in the outcome's status.
    pub async fn enrich_session(
        &self,
        session_id: &str,
        options: EnrichmentOptions,
    ) -> Result<EnrichmentRun> {
        let permit = self
            .active
            .try_acquire(session_id)
            .ok_or_else(|| TaskerinoError::concurrent_enrichment(session_id))?;

        let session = self
            .repository
            .find_by_id(session_id)
            .await?
            .ok_or_else(|| TaskerinoError::not_found("session", session_id))?;

        let config = options
            .config_override
            .clone()
            .or_else(|| session.enrichment_config.clone())
            .unwrap_or_else(|| self.default_config.clone());
        config.validate().map_err(TaskerinoError::validation)?;

        if options.mode == EnrichmentMode::Resume {
            let status = &session.enrichment_status;
            if !status.can_resume {
                return Err(TaskerinoError::validation(format!(
                    "session '{}' has nothing to resume (status: {})",
                    session_id, status.status
                )));
            }
            if status.total_cost >= config.max_cost_threshold {
                return Err(TaskerinoError::validation(format!(
                    "cost threshold already reached for session '{}': {:.4} of {:.4}",
                    session_id, status.total_cost, config.max_cost_threshold
                )));
            }
        }

        let run_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        tracing::info!(
            "[Enrichment] Run {} started for session '{}' ({})",
            run_id,
            session_id,
            options.mode
        );

        let pipeline = Pipeline {
            run_id,
            session,
            config,
            mode: options.mode,
            cancel: options.cancel.clone(),
            repository: Arc::clone(&self.repository),
            collaborators: self.collaborators.clone(),
            stage_timeout: self.stage_timeout,
            emitter: ProgressEmitter::new(tx),
            _permit: permit,
        };
        let handle = tokio::spawn(pipeline.run());

        Ok(EnrichmentRun {
            run_id,
            session_id: session_id.to_string(),
            cancel: options.cancel,
            events: rx,
            handle,
        })
    }

    /// Starts a restart run if the session opted into enrichment on
    /// completion and has never been enriched.
    pub async fn maybe_auto_enrich(&self, session_id: &str) -> Result<Option<EnrichmentRun>> {
        let session = self
            .repository
            .find_by_id(session_id)
            .await?
            .ok_or_else(|| TaskerinoError::not_found("session", session_id))?;

        let auto = session
            .enrichment_config
            .as_ref()
            .unwrap_or(&self.default_config)
            .auto_enrich_on_complete;
        if !auto || session.enrichment_status.status != EnrichmentState::Idle {
            return Ok(None);
        }

        self.enrich_session(session_id, EnrichmentOptions::restart())
            .await
            .map(Some)
    }

    /// Repairs sessions persisted as running with no live run behind them.
    ///
    /// The `processing` stage (if any) is marked failed with "interrupted" and
    /// the overall status is re-derived, so `canResume` reflects what is
    /// actually on disk. Sessions that never got past `pending` return to `idle`.
    ///
    /// # Returns
    ///
    /// The number of sessions repaired.
    pub async fn recover_interrupted(&self) -> Result<usize> {
        let mut recovered = 0;

        for mut session in self.repository.list_all().await? {
            if !session.enrichment_status.is_running() || self.active.is_active(&session.id) {
                continue;
            }

            let status = &mut session.enrichment_status;
            let now = Utc::now();
            if let Some(stage) = status.processing_stage() {
                status.stage_mut(stage).mark_failed(now, "interrupted");
                status.errors.push(format!("{}: interrupted", stage));
            }

            let touched = Stage::ALL.iter().any(|s| {
                matches!(
                    status.stage(*s).status,
                    StageState::Completed | StageState::Failed
                )
            });
            status.status = if touched {
                status.terminal_state()
            } else {
                EnrichmentState::Idle
            };
            status.current_stage = current_stage_of(status);
            status.recompute();
            status.last_updated_at = Some(now);
            if let Err(violation) = status.check_invariants() {
                tracing::warn!(
                    "[Enrichment] Recovered status of '{}' is inconsistent: {}",
                    session.id,
                    violation
                );
            }
            let recovered_as = status.status;

            self.repository.save(&session).await?;
            tracing::warn!(
                "[Enrichment] Recovered interrupted run of session '{}' as {}",
                session.id,
                recovered_as
            );
            recovered += 1;
        }

        Ok(recovered)
    }
}

fn current_stage_of(status: &EnrichmentStatus) -> CurrentStage {
    status
        .first_unfinished_stage()
        .map(CurrentStage::from)
        .unwrap_or(CurrentStage::Complete)
}

/// State of one run, owned by its task.
struct Pipeline {
    run_id: Uuid,
    session: Session,
    config: EnrichmentConfig,
    mode: EnrichmentMode,
    cancel: CancellationToken,
    repository: Arc<dyn SessionRepository>,
    collaborators: Collaborators,
    stage_timeout: Duration,
    emitter: ProgressEmitter,
    _permit: RunPermit,
}

impl Pipeline {
    fn status(&self) -> &EnrichmentStatus {
        &self.session.enrichment_status
    }

    fn status_mut(&mut self) -> &mut EnrichmentStatus {
        &mut self.session.enrichment_status
    }

    fn emit(&self, stage: ProgressStage, message: impl Into<String>, progress: f64) {
        self.emitter.emit(stage, message, progress, self.status());
    }

    async fn persist(&mut self) {
        self.session.enrichment_status.last_updated_at = Some(Utc::now());
        if let Err(e) = self.repository.save(&self.session).await {
            tracing::error!(
                "[Enrichment] Run {}: failed to persist session '{}': {}",
                self.run_id,
                self.session.id,
                e
            );
        }
    }

    async fn run(mut self) -> EnrichmentOutcome {
        if self.mode == EnrichmentMode::Restart {
            self.status_mut().reset_for_restart();
        }
        let progress = self.status().computed_progress();
        self.emit(ProgressStage::Validating, "Validating enrichment request", progress);

        self.status_mut().status = EnrichmentState::Pending;
        self.status_mut().recompute();
        self.persist().await;

        self.status_mut().status = EnrichmentState::InProgress;
        self.persist().await;

        for stage in Stage::ALL {
            if self.status().stage(stage).status.is_done() {
                continue;
            }
            if self.cancel.is_cancelled() {
                return self.finish_cancelled(stage).await;
            }
            if let Some(reason) = self.skip_reason(stage) {
                self.skip_stage(stage, reason).await;
                continue;
            }
            if let Some(message) = self.budget_exceeded() {
                self.fail_stage(stage, message).await;
                return self.finish().await;
            }

            self.begin_stage(stage).await;
            let result = match stage {
                Stage::Audio => self.run_audio().await,
                Stage::Video => self.run_video().await,
                Stage::Summary => self.run_summary().await,
            };
            match result {
                Ok(cost) => self.complete_stage(stage, cost).await,
                Err(e) => {
                    self.fail_stage(stage, failure_message(&e)).await;
                    return self.finish().await;
                }
            }
        }

        self.finish().await
    }

    fn skip_reason(&self, stage: Stage) -> Option<&'static str> {
        match stage {
            Stage::Audio if !self.config.include_audio_review => Some("audio review disabled"),
            Stage::Audio if self.session.audio_segments.is_empty() => Some("no audio recorded"),
            Stage::Video if !self.config.include_video_chapters => Some("video chapters disabled"),
            Stage::Video if !self.session.has_video() => Some("no video recorded"),
            _ => None,
        }
    }

    fn budget_exceeded(&self) -> Option<String> {
        let spent = self.status().total_cost;
        let limit = self.config.max_cost_threshold;
        (spent >= limit).then(|| format!("cost threshold reached ({:.4} of {:.4})", spent, limit))
    }

    async fn skip_stage(&mut self, stage: Stage, reason: &str) {
        let status = self.status_mut();
        status.stage_mut(stage).mark_skipped(Utc::now());
        status.current_stage = current_stage_of(status);
        status.recompute();
        self.persist().await;

        tracing::debug!(
            "[Enrichment] Run {}: skipped {} stage ({})",
            self.run_id,
            stage,
            reason
        );
        self.emit(
            stage.into(),
            format!("Skipped {} stage: {}", stage, reason),
            band_progress(stage, 1.0),
        );
    }

    async fn begin_stage(&mut self, stage: Stage) {
        let status = self.status_mut();
        status.stage_mut(stage).mark_processing(Utc::now());
        status.current_stage = stage.into();
        self.persist().await;

        self.emit(
            stage.into(),
            format!("Starting {} stage", stage),
            stage.band_start(),
        );
    }

    async fn complete_stage(&mut self, stage: Stage, cost: f64) {
        let status = self.status_mut();
        status.stage_mut(stage).mark_completed(Utc::now(), cost);
        status.current_stage = current_stage_of(status);
        status.recompute();
        self.persist().await;

        tracing::info!(
            "[Enrichment] Run {}: {} stage completed (cost {:.4})",
            self.run_id,
            stage,
            cost
        );
        self.emit(
            stage.into(),
            format!("Completed {} stage", stage),
            band_progress(stage, 1.0),
        );
    }

    async fn fail_stage(&mut self, stage: Stage, message: String) {
        tracing::warn!(
            "[Enrichment] Run {}: {} stage failed: {}",
            self.run_id,
            stage,
            message
        );
        let status = self.status_mut();
        status.stage_mut(stage).mark_failed(Utc::now(), message.clone());
        status.errors.push(format!("{}: {}", stage, message));
        status.recompute();
        self.persist().await;

        let progress = self.status().progress;
        self.emit(
            ProgressStage::Error,
            format!("{} stage failed: {}", stage, message),
            progress,
        );
    }

    async fn finish(mut self) -> EnrichmentOutcome {
        let status = self.status_mut();
        status.status = status.terminal_state();
        status.current_stage = current_stage_of(status);
        status.recompute();
        self.persist().await;

        let status = self.status().clone();
        let last_error = status.errors.last().cloned().unwrap_or_default();
        tracing::info!(
            "[Enrichment] Run {} finished for session '{}': {} ({}%, cost {:.4})",
            self.run_id,
            self.session.id,
            status.status,
            status.progress,
            status.total_cost
        );

        match status.status {
            EnrichmentState::Completed => {
                self.emit(ProgressStage::Complete, "Enrichment complete", 100.0);
                EnrichmentOutcome::Completed(status)
            }
            EnrichmentState::Partial => {
                self.emit(
                    ProgressStage::Complete,
                    format!("Enrichment partially complete ({})", last_error),
                    status.progress,
                );
                EnrichmentOutcome::Partial(status)
            }
            _ => {
                self.emit(
                    ProgressStage::Error,
                    format!("Enrichment failed ({})", last_error),
                    status.progress,
                );
                EnrichmentOutcome::Failed(status)
            }
        }
    }

    async fn finish_cancelled(mut self, next: Stage) -> EnrichmentOutcome {
        let status = self.status_mut();
        let any_completed = Stage::ALL
            .iter()
            .any(|s| status.stage(*s).status == StageState::Completed);
        status.status = if any_completed {
            EnrichmentState::Partial
        } else {
            EnrichmentState::Idle
        };
        status.current_stage = current_stage_of(status);
        status.warnings.push(format!("cancelled before {} stage", next));
        status.recompute();
        self.persist().await;

        tracing::info!(
            "[Enrichment] Run {} cancelled before {} stage",
            self.run_id,
            next
        );
        let progress = self.status().progress;
        self.emit(ProgressStage::Cancelled, "Enrichment cancelled", progress);
        EnrichmentOutcome::Cancelled(self.status().clone())
    }

    async fn run_audio(&mut self) -> Result<f64> {
        let result = {
            let snapshot = self.status().clone();
            let emitter = &self.emitter;
            let sink = move |fraction: f64, message: &str| {
                emitter.emit(
                    ProgressStage::Audio,
                    message,
                    band_progress(Stage::Audio, fraction),
                    &snapshot,
                );
            };
            call_with_timeout(
                Stage::Audio,
                self.stage_timeout,
                self.collaborators.audio.review_session(&self.session, &sink),
            )
            .await?
        };

        let session = &mut self.session;
        session.full_transcription = Some(result.full_transcription);
        if !result.insights.is_null() {
            session.audio_insights = Some(result.insights);
        }
        if !result.upgraded_segments.is_empty() {
            session.audio_segments = result.upgraded_segments;
        }
        if let Some(attachment_id) = result.full_audio_attachment_id {
            session.full_audio_attachment_id = Some(attachment_id);
        }
        Ok(sanitize_cost(Stage::Audio, result.cost))
    }

    async fn run_video(&mut self) -> Result<f64> {
        let proposals = call_with_timeout(
            Stage::Video,
            self.stage_timeout,
            self.collaborators.video.propose_chapters(&self.session),
        )
        .await?;
        self.emit(
            ProgressStage::Video,
            format!("Proposed {} chapters", proposals.chapters.len()),
            band_progress(Stage::Video, 0.5),
        );

        let chapters = call_with_timeout(
            Stage::Video,
            self.stage_timeout,
            self.collaborators
                .video
                .save_chapters(&self.session.id, &proposals.chapters),
        )
        .await?;

        if let Some(video) = self.session.video.as_mut() {
            video.chapters = chapters;
        }
        Ok(sanitize_cost(Stage::Video, proposals.cost))
    }

    async fn run_summary(&mut self) -> Result<f64> {
        let context = SummaryContext {
            full_transcription: self.session.full_transcription.clone(),
            audio_insights: self.session.audio_insights.clone(),
            video_chapters: self
                .session
                .video
                .as_ref()
                .map(|v| v.chapters.clone())
                .unwrap_or_default(),
        };
        let result = call_with_timeout(
            Stage::Summary,
            self.stage_timeout,
            self.collaborators.summary.generate(
                &self.session,
                &self.session.screenshots,
                &self.session.audio_segments,
                &context,
            ),
        )
        .await?;

        let session = &mut self.session;
        session.summary = Some(SessionSummaryNarrative {
            narrative: result.narrative,
            achievements: result.achievements,
            blockers: result.blockers,
            recommended_tasks: result.recommended_tasks,
            key_insights: result.key_insights,
            focus_areas: result.focus_areas,
            generated_at: Some(Utc::now()),
        });
        if result.category.is_some() {
            session.category = result.category;
        }
        if result.sub_category.is_some() {
            session.sub_category = result.sub_category;
        }
        for tag in result.tags {
            if !session.tags.contains(&tag) {
                session.tags.push(tag);
            }
        }
        Ok(sanitize_cost(Stage::Summary, result.cost))
    }
}
