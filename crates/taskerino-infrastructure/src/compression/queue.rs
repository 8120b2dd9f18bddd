//! Background compression of aged entities.
//!
//! `scan` turns index entries into jobs; a single tokio worker drains them
//! one at a time through `EntityStore::recompress`, which rewrites the entity
//! via the store's atomic path. In `auto` mode the worker samples CPU before
//! every job and defers while usage is above `maxCPU`. In `manual` mode it
//! only runs while resumed.

use super::cpu::CpuSampler;
use chrono::Utc;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;
use taskerino_core::Result;
use taskerino_core::compression::{
    CompressionJob, CompressionMode, CompressionStats, EntityRef, JobState,
};
use taskerino_core::config::CompressionSettings;
use taskerino_core::session::{EnrichmentState, Session};
use taskerino_core::storage::{EntityStore, IndexEntry, StoredEntity};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const SCREENSHOTS: &str = "screenshots";
/// Finished jobs kept for `jobs()` snapshots.
const MAX_FINISHED_JOBS: usize = 1000;

#[derive(Default)]
struct QueueState {
    pending: VecDeque<EntityRef>,
    jobs: Vec<CompressionJob>,
    running: Option<EntityRef>,
    stats: CompressionStats,
}

impl QueueState {
    fn is_tracked(&self, entity_ref: &EntityRef) -> bool {
        self.running.as_ref() == Some(entity_ref) || self.pending.contains(entity_ref)
    }

    fn active_job_mut(&mut self, entity_ref: &EntityRef) -> Option<&mut CompressionJob> {
        self.jobs
            .iter_mut()
            .rev()
            .find(|j| &j.entity_ref == entity_ref && !j.state.is_finished())
    }

    fn finish(&mut self, entity_ref: &EntityRef, state: JobState, error: Option<String>) {
        if let Some(job) = self.active_job_mut(entity_ref) {
            job.state = state;
            job.error = error;
        }
        if self.running.as_ref() == Some(entity_ref) {
            self.running = None;
        }
        self.prune_finished();
    }

    fn prune_finished(&mut self) {
        let finished = self.jobs.iter().filter(|j| j.state.is_finished()).count();
        let mut excess = finished.saturating_sub(MAX_FINISHED_JOBS);
        if excess > 0 {
            self.jobs.retain(|j| {
                if excess > 0 && j.state.is_finished() {
                    excess -= 1;
                    false
                } else {
                    true
                }
            });
        }
    }
}

struct QueueInner {
    store: Arc<dyn EntityStore>,
    sampler: Arc<dyn CpuSampler>,
    settings: RwLock<CompressionSettings>,
    state: Mutex<QueueState>,
    paused: AtomicBool,
    notify: Notify,
    shutdown: CancellationToken,
}

impl QueueInner {
    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn settings(&self) -> CompressionSettings {
        self.settings
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// True when the session is mid-enrichment. Unreadable sessions are
    /// reported as busy so they are never touched. Reads bypass the cache.
    async fn is_session_enriching(&self, id: &str) -> bool {
        match self.store.peek_entity(Session::COLLECTION, id).await {
            Ok(Some(doc)) => doc
                .body
                .pointer("/enrichmentStatus/status")
                .and_then(|v| v.as_str())
                .is_some_and(|s| s == EnrichmentState::InProgress.to_string()),
            Ok(None) => false,
            Err(e) => {
                tracing::warn!("[CompressionQueue] Cannot inspect session '{}': {}", id, e);
                true
            }
        }
    }

    /// Pops the next job and marks it running. `None` while paused or empty.
    fn take_next(&self) -> Option<EntityRef> {
        if self.paused.load(Ordering::SeqCst) {
            return None;
        }
        let mut state = self.state();
        let next = state.pending.pop_front()?;
        if let Some(job) = state.active_job_mut(&next) {
            job.state = JobState::Running;
        }
        state.running = Some(next.clone());
        Some(next)
    }

    async fn process(&self, entity_ref: EntityRef) {
        if entity_ref.collection == Session::COLLECTION
            && self.is_session_enriching(&entity_ref.id).await
        {
            tracing::info!(
                "[CompressionQueue] Skipping {}: enrichment in progress",
                entity_ref
            );
            self.state().finish(
                &entity_ref,
                JobState::Cancelled,
                Some("enrichment in progress".to_string()),
            );
            return;
        }

        match self
            .store
            .recompress(&entity_ref.collection, &entity_ref.id)
            .await
        {
            Ok(outcome) => {
                let mut state = self.state();
                if outcome.rewritten {
                    state
                        .stats
                        .record(outcome.original_size, outcome.compressed_size);
                }
                state.finish(&entity_ref, JobState::Done, None);
                drop(state);
                tracing::info!(
                    "[CompressionQueue] Compressed {}: {} -> {} bytes",
                    entity_ref,
                    outcome.original_size,
                    outcome.compressed_size
                );
            }
            Err(e) => {
                tracing::warn!("[CompressionQueue] Failed to compress {}: {}", entity_ref, e);
                let mut state = self.state();
                state.stats.failed += 1;
                state.finish(&entity_ref, JobState::Failed, Some(e.to_string()));
            }
        }
    }

    /// Waits for a wakeup, a timeout, or shutdown. Returns false on shutdown.
    async fn idle(&self, timeout: Option<Duration>) -> bool {
        match timeout {
            Some(duration) => tokio::select! {
                _ = self.notify.notified() => true,
                _ = tokio::time::sleep(duration) => true,
                _ = self.shutdown.cancelled() => false,
            },
            None => tokio::select! {
                _ = self.notify.notified() => true,
                _ = self.shutdown.cancelled() => false,
            },
        }
    }

    async fn run(self: Arc<Self>) {
        tracing::debug!("[CompressionQueue] Worker started");
        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            let settings = self.settings();
            let has_work = !self.state().pending.is_empty();
            if !settings.enabled || self.paused.load(Ordering::SeqCst) || !has_work {
                if !self.idle(None).await {
                    break;
                }
                continue;
            }

            if settings.mode == CompressionMode::Auto {
                let usage = self.sampler.sample().await;
                if usage > settings.max_cpu {
                    tracing::debug!(
                        "[CompressionQueue] CPU at {:.1}% (cap {:.1}%), deferring",
                        usage,
                        settings.max_cpu
                    );
                    let poll = Duration::from_millis(settings.cpu_poll_interval_ms.max(1));
                    if !self.idle(Some(poll)).await {
                        break;
                    }
                    continue;
                }
            }

            if let Some(entity_ref) = self.take_next() {
                self.process(entity_ref).await;
            }
        }
        tracing::debug!("[CompressionQueue] Worker stopped");
    }
}

pub struct CompressionQueue {
    inner: Arc<QueueInner>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl CompressionQueue {
    /// Creates a stopped queue. `auto` mode starts resumed, `manual` paused.
    pub fn new(
        store: Arc<dyn EntityStore>,
        sampler: Arc<dyn CpuSampler>,
        settings: CompressionSettings,
    ) -> Self {
        let paused = settings.mode == CompressionMode::Manual;
        Self {
            inner: Arc::new(QueueInner {
                store,
                sampler,
                settings: RwLock::new(settings),
                state: Mutex::new(QueueState::default()),
                paused: AtomicBool::new(paused),
                notify: Notify::new(),
                shutdown: CancellationToken::new(),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Spawns the worker task. Calling it again while running is a no-op.
    pub fn start(&self) {
        let mut worker = self.worker.lock().unwrap_or_else(|e| e.into_inner());
        if worker.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }
        if self.inner.shutdown.is_cancelled() {
            tracing::warn!("[CompressionQueue] start() after shutdown ignored");
            return;
        }
        *worker = Some(tokio::spawn(Arc::clone(&self.inner).run()));
    }

    /// Stops the worker after the in-flight job (if any) completes.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let handle = self
            .worker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!("[CompressionQueue] Worker ended abnormally: {}", e);
            }
        }
    }

    /// Enqueues uncompressed entities older than the age threshold.
    ///
    /// # Returns
    ///
    /// The number of newly queued jobs.
    pub async fn scan(&self) -> Result<usize> {
        let settings = self.inner.settings();
        if !settings.enabled {
            tracing::debug!("[CompressionQueue] Disabled, scan skipped");
            return Ok(0);
        }

        let mut collections = vec![Session::COLLECTION];
        if settings.compress_screenshots {
            collections.push(SCREENSHOTS);
        }

        let now = Utc::now();
        let mut candidates: Vec<(EntityRef, IndexEntry)> = Vec::new();
        for collection in collections {
            for entry in self.inner.store.index_entries(collection).await? {
                if entry.compressed || entry.age_in_days(now) < settings.age_threshold_days {
                    continue;
                }
                if collection == Session::COLLECTION
                    && self.inner.is_session_enriching(&entry.id).await
                {
                    tracing::debug!(
                        "[CompressionQueue] Not queueing session '{}': enrichment in progress",
                        entry.id
                    );
                    continue;
                }
                candidates.push((EntityRef::new(collection, entry.id.clone()), entry));
            }
        }

        if settings.process_oldest_first {
            candidates.sort_by_key(|(_, e)| e.timestamp.unwrap_or(e.updated_at));
        }

        let queued = {
            let mut state = self.inner.state();
            let mut queued = 0;
            for (entity_ref, entry) in candidates {
                if state.is_tracked(&entity_ref) {
                    continue;
                }
                state
                    .jobs
                    .push(CompressionJob::new(entity_ref.clone(), entry.age_in_days(now)));
                state.pending.push_back(entity_ref);
                queued += 1;
            }
            queued
        };

        if queued > 0 {
            tracing::info!("[CompressionQueue] Queued {} entities for compression", queued);
            self.inner.notify.notify_one();
        }
        Ok(queued)
    }

    /// Stops dequeuing. An in-flight job still completes.
    pub fn pause(&self) {
        self.inner.paused.store(true, Ordering::SeqCst);
        tracing::info!("[CompressionQueue] Paused");
    }

    pub fn resume(&self) {
        self.inner.paused.store(false, Ordering::SeqCst);
        self.inner.notify.notify_one();
        tracing::info!("[CompressionQueue] Resumed");
    }

    pub fn is_paused(&self) -> bool {
        self.inner.paused.load(Ordering::SeqCst)
    }

    /// Drops every pending job, marking it `cancelled`. The running job is
    /// left alone.
    pub fn cancel_all(&self) -> usize {
        let mut state = self.inner.state();
        let pending: Vec<EntityRef> = state.pending.drain(..).collect();
        for entity_ref in &pending {
            if let Some(job) = state.active_job_mut(entity_ref) {
                job.state = JobState::Cancelled;
            }
        }
        state.prune_finished();
        if !pending.is_empty() {
            tracing::info!("[CompressionQueue] Cancelled {} pending jobs", pending.len());
        }
        pending.len()
    }

    pub fn stats(&self) -> CompressionStats {
        let state = self.inner.state();
        let mut stats = state.stats.clone();
        stats.in_progress = state.running.iter().cloned().collect();
        stats.queued = state.pending.len();
        stats
    }

    /// Snapshot of known jobs, oldest first.
    pub fn jobs(&self) -> Vec<CompressionJob> {
        self.inner.state().jobs.clone()
    }

    /// True when nothing is queued or running.
    pub fn is_idle(&self) -> bool {
        let state = self.inner.state();
        state.pending.is_empty() && state.running.is_none()
    }

    pub fn settings(&self) -> CompressionSettings {
        self.inner.settings()
    }

    /// Applies new settings at runtime. Switching to `manual` pauses the queue.
    pub fn update_settings(&self, settings: CompressionSettings) {
        let switched_to_manual = {
            let mut current = self
                .inner
                .settings
                .write()
                .unwrap_or_else(|e| e.into_inner());
            let switched = current.mode != CompressionMode::Manual
                && settings.mode == CompressionMode::Manual;
            *current = settings;
            switched
        };
        if switched_to_manual {
            self.inner.paused.store(true, Ordering::SeqCst);
        }
        self.inner.notify.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::EntityCache;
    use crate::compression::FixedCpuSampler;
    use crate::storage::ChunkedEntityStore;
    use chrono::Duration as ChronoDuration;
    use taskerino_core::storage::{EntityDocument, EntityStoreExt};
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        store: Arc<ChunkedEntityStore>,
        sampler: Arc<FixedCpuSampler>,
    }

    fn fixture(cpu: f32) -> Fixture {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(
            ChunkedEntityStore::new(dir.path(), Arc::new(EntityCache::new(1 << 20)))
                .with_min_free_space(0),
        );
        Fixture {
            _dir: dir,
            store,
            sampler: Arc::new(FixedCpuSampler::new(cpu)),
        }
    }

    fn settings(mode: CompressionMode) -> CompressionSettings {
        CompressionSettings {
            mode,
            max_cpu: 20.0,
            age_threshold_days: 7,
            cpu_poll_interval_ms: 10,
            ..Default::default()
        }
    }

    fn queue(f: &Fixture, settings: CompressionSettings) -> CompressionQueue {
        CompressionQueue::new(f.store.clone(), f.sampler.clone(), settings)
    }

    async fn save_session(store: &ChunkedEntityStore, id: &str, age_days: i64) -> Session {
        let mut session = Session::new(id, "Old work", Utc::now() - ChronoDuration::days(age_days));
        session.notes = Some("notes ".repeat(500));
        store.save(&session).await.unwrap();
        session
    }

    async fn wait_until<F: Fn() -> bool>(condition: F) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn test_scan_selects_old_uncompressed_oldest_first() {
        let f = fixture(0.0);
        save_session(&f.store, "young", 1).await;
        save_session(&f.store, "old", 10).await;
        save_session(&f.store, "older", 30).await;
        let q = queue(&f, settings(CompressionMode::Manual));

        assert_eq!(q.scan().await.unwrap(), 2);
        let jobs = q.jobs();
        assert_eq!(jobs[0].entity_ref.id, "older");
        assert_eq!(jobs[0].age_in_days, 30);
        assert_eq!(jobs[1].entity_ref.id, "old");
        assert!(jobs.iter().all(|j| j.state == JobState::Queued));

        // already queued entities are not queued twice
        assert_eq!(q.scan().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_scan_skips_sessions_being_enriched() {
        let f = fixture(0.0);
        let mut session = save_session(&f.store, "busy", 10).await;
        session.enrichment_status.status = EnrichmentState::InProgress;
        f.store.save(&session).await.unwrap();

        let q = queue(&f, settings(CompressionMode::Auto));
        assert_eq!(q.scan().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_scan_leaves_the_cache_cold() {
        let f = fixture(0.0);
        for i in 0..20 {
            save_session(&f.store, &format!("old-{}", i), 30).await;
        }
        f.store.cache().clear();
        f.store.cache().reset_stats();

        let q = queue(&f, settings(CompressionMode::Manual));
        assert_eq!(q.scan().await.unwrap(), 20);

        let stats = f.store.cache_stats();
        assert_eq!(stats.items, 0);
        assert_eq!(stats.misses, 0);
    }

    #[tokio::test]
    async fn test_auto_mode_defers_while_cpu_is_high() {
        let f = fixture(50.0);
        save_session(&f.store, "old", 10).await;
        let q = queue(&f, settings(CompressionMode::Auto));
        q.scan().await.unwrap();
        q.start();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(q.jobs().iter().all(|j| j.state == JobState::Queued));
        assert_eq!(q.stats().sessions_processed, 0);

        f.sampler.set(5.0);
        wait_until(|| q.is_idle()).await;
        let stats = q.stats();
        assert_eq!(stats.sessions_processed, 1);
        assert!(stats.bytes_saved > 0);
        assert!(stats.compression_ratio > 0.0 && stats.compression_ratio < 1.0);
        assert_eq!(q.jobs()[0].state, JobState::Done);
        q.shutdown().await;

        let entries = f.store.index_entries("sessions").await.unwrap();
        assert!(entries[0].compressed);
        let loaded: Session = f.store.load("old").await.unwrap().unwrap();
        assert_eq!(loaded.id, "old");
    }

    #[tokio::test]
    async fn test_manual_mode_waits_for_resume() {
        let f = fixture(99.0);
        save_session(&f.store, "old", 10).await;
        let q = queue(&f, settings(CompressionMode::Manual));
        assert!(q.is_paused());
        q.scan().await.unwrap();
        q.start();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(q.jobs()[0].state, JobState::Queued);

        // manual runs ignore the CPU cap once resumed
        q.resume();
        wait_until(|| q.is_idle()).await;
        assert_eq!(q.jobs()[0].state, JobState::Done);
        q.shutdown().await;
    }

    #[tokio::test]
    async fn test_cancel_all_marks_pending_cancelled() {
        let f = fixture(0.0);
        save_session(&f.store, "a", 10).await;
        save_session(&f.store, "b", 11).await;
        let q = queue(&f, settings(CompressionMode::Manual));
        q.scan().await.unwrap();

        assert_eq!(q.cancel_all(), 2);
        assert!(q.jobs().iter().all(|j| j.state == JobState::Cancelled));
        assert_eq!(q.stats().queued, 0);

        // cancelled entities can be queued again
        assert_eq!(q.scan().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_in_progress_guard_rechecked_before_running() {
        let f = fixture(0.0);
        let mut session = save_session(&f.store, "racy", 10).await;
        let q = queue(&f, settings(CompressionMode::Manual));
        q.scan().await.unwrap();

        session.enrichment_status.status = EnrichmentState::InProgress;
        f.store.save(&session).await.unwrap();

        q.start();
        q.resume();
        wait_until(|| q.is_idle()).await;
        let job = &q.jobs()[0];
        assert_eq!(job.state, JobState::Cancelled);
        assert!(!f.store.index_entries("sessions").await.unwrap()[0].compressed);
        q.shutdown().await;
    }

    #[tokio::test]
    async fn test_failed_job_does_not_stop_queue() {
        let f = fixture(0.0);
        let shot = EntityDocument::new(
            "shot-1",
            serde_json::json!({"id": "shot-1", "ocr": "text ".repeat(400)}),
        )
        .with_timestamp(Some(Utc::now() - ChronoDuration::days(20)));
        f.store.save_entity(SCREENSHOTS, &shot).await.unwrap();
        save_session(&f.store, "fine", 10).await;

        let q = queue(
            &f,
            CompressionSettings {
                compress_screenshots: true,
                ..settings(CompressionMode::Manual)
            },
        );
        assert_eq!(q.scan().await.unwrap(), 2);

        // corrupt the oldest entity so recompress fails verification
        let path = f.store.root().join("screenshots/screenshot-shot-1.json");
        let mut bytes = std::fs::read(&path).unwrap();
        let last = bytes.len() - 5;
        bytes[last] ^= 0x01;
        std::fs::write(&path, bytes).unwrap();

        q.start();
        q.resume();
        wait_until(|| q.is_idle()).await;

        let jobs = q.jobs();
        assert_eq!(jobs[0].entity_ref, EntityRef::new(SCREENSHOTS, "shot-1"));
        assert_eq!(jobs[0].state, JobState::Failed);
        assert!(jobs[0].error.as_deref().unwrap().contains("checksum"));
        assert_eq!(jobs[1].state, JobState::Done);
        assert_eq!(q.stats().failed, 1);
        assert_eq!(q.stats().sessions_processed, 1);
        q.shutdown().await;
    }

    #[tokio::test]
    async fn test_disabled_queue_scans_nothing() {
        let f = fixture(0.0);
        save_session(&f.store, "old", 10).await;
        let q = queue(
            &f,
            CompressionSettings {
                enabled: false,
                ..settings(CompressionMode::Auto)
            },
        );
        assert_eq!(q.scan().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_switching_to_manual_pauses() {
        let f = fixture(0.0);
        let q = queue(&f, settings(CompressionMode::Auto));
        assert!(!q.is_paused());
        q.update_settings(settings(CompressionMode::Manual));
        assert!(q.is_paused());
    }
}
