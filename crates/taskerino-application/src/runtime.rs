//! Composition root.
//!
//! Builds cache, store, repository, compression queue and orchestrator once,
//! runs the startup upgrades and owns the teardown. Nothing here is global;
//! hosts keep the runtime and hand out the `Arc`s it exposes.

use crate::active_session::ActiveSession;
use crate::enrichment::EnrichmentOrchestrator;
use std::path::PathBuf;
use std::sync::Arc;
use taskerino_core::Result;
use taskerino_core::config::Settings;
use taskerino_core::enrichment::{AudioReviewService, SummaryGenerator, VideoChapteringService};
use taskerino_core::session::{Screenshot, Session, SessionRepository};
use taskerino_core::storage::{EntityStore, StoredEntity};
use taskerino_infrastructure::migration::{migrate_enrichment_fields, migrate_to_per_entity_files};
use taskerino_infrastructure::{
    ChunkedEntityStore, ChunkedSessionRepository, CompressionQueue, CpuSampler, EntityCache,
    SystemCpuSampler, TaskerinoPaths, init_tracing,
};
use tracing_appender::non_blocking::WorkerGuard;

/// The external AI services the orchestrator drives.
#[derive(Clone)]
pub struct EnrichmentServices {
    pub audio: Arc<dyn AudioReviewService>,
    pub video: Arc<dyn VideoChapteringService>,
    pub summary: Arc<dyn SummaryGenerator>,
}

#[derive(Default)]
pub struct RuntimeOptions {
    /// Install the global tracing subscriber.
    pub init_logging: bool,
    /// Directory with pre-chunked `{collection}.json` files to migrate on start.
    pub legacy_dir: Option<PathBuf>,
    /// Defaults to [`SystemCpuSampler`].
    pub cpu_sampler: Option<Arc<dyn CpuSampler>>,
}

pub struct TaskerinoRuntime {
    settings: Settings,
    cache: Arc<EntityCache>,
    store: Arc<ChunkedEntityStore>,
    sessions: Arc<ChunkedSessionRepository>,
    compression: Arc<CompressionQueue>,
    orchestrator: Arc<EnrichmentOrchestrator>,
    active_session: Arc<ActiveSession>,
    _log_guard: Option<WorkerGuard>,
}

impl TaskerinoRuntime {
    /// Builds every component and brings the data up to date.
    ///
    /// Startup order: logging, legacy per-entity migration (fail-fast),
    /// enrichment field migration, recovery of interrupted runs, then the
    /// compression worker and its first scan.
    pub async fn start(
        settings: Settings,
        services: EnrichmentServices,
        options: RuntimeOptions,
    ) -> Result<Self> {
        settings.validate()?;

        let log_guard = if options.init_logging {
            let fallback = TaskerinoPaths::log_dir().ok();
            init_tracing(&settings.logging, fallback.as_deref())?
        } else {
            None
        };

        let root = TaskerinoPaths::storage_dir(&settings)?;
        tracing::info!("[Runtime] Starting with storage at {}", root.display());

        let cache = Arc::new(EntityCache::new(settings.storage.max_cache_size_bytes));
        let store = Arc::new(
            ChunkedEntityStore::new(root, Arc::clone(&cache))
                .with_min_free_space(settings.storage.min_free_space_bytes)
                .with_zstd_level(settings.compression.zstd_level),
        );
        let entity_store: Arc<dyn EntityStore> = store.clone();
        let sessions = Arc::new(ChunkedSessionRepository::new(Arc::clone(&entity_store)));

        if let Some(legacy_dir) = &options.legacy_dir {
            migrate_to_per_entity_files(
                legacy_dir,
                &*store,
                &[Session::COLLECTION, Screenshot::COLLECTION],
            )
            .await?;
        }
        migrate_enrichment_fields(&*store, &settings.enrichment.default_config).await?;

        let session_repository: Arc<dyn SessionRepository> = sessions.clone();
        let active_session = Arc::new(ActiveSession::new(Arc::clone(&session_repository)));
        let orchestrator = Arc::new(EnrichmentOrchestrator::new(
            session_repository,
            services.audio,
            services.video,
            services.summary,
            &settings.enrichment,
        ));
        let recovered = orchestrator.recover_interrupted().await?;
        if recovered > 0 {
            tracing::warn!("[Runtime] Recovered {} interrupted enrichment runs", recovered);
        }

        let sampler = options
            .cpu_sampler
            .unwrap_or_else(|| Arc::new(SystemCpuSampler::new()));
        let compression = Arc::new(CompressionQueue::new(
            entity_store,
            sampler,
            settings.compression.clone(),
        ));
        compression.start();
        if let Err(e) = compression.scan().await {
            tracing::warn!("[Runtime] Initial compression scan failed: {}", e);
        }

        Ok(Self {
            settings,
            cache,
            store,
            sessions,
            compression,
            orchestrator,
            active_session,
            _log_guard: log_guard,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn cache(&self) -> &Arc<EntityCache> {
        &self.cache
    }

    pub fn store(&self) -> Arc<dyn EntityStore> {
        self.store.clone()
    }

    pub fn sessions(&self) -> Arc<dyn SessionRepository> {
        self.sessions.clone()
    }

    pub fn compression(&self) -> &Arc<CompressionQueue> {
        &self.compression
    }

    pub fn orchestrator(&self) -> &Arc<EnrichmentOrchestrator> {
        &self.orchestrator
    }

    pub fn active_session(&self) -> &Arc<ActiveSession> {
        &self.active_session
    }

    /// Applies user-edited settings that can change while running: the cache
    /// ceiling and the compression queue configuration. Storage location,
    /// enrichment timeouts and logging take effect on the next start.
    pub fn apply_settings(&mut self, settings: Settings) -> Result<()> {
        settings.validate()?;
        self.cache.set_max_size(settings.storage.max_cache_size_bytes);
        self.compression.update_settings(settings.compression.clone());
        self.settings = settings;
        tracing::info!("[Runtime] Settings applied");
        Ok(())
    }

    /// Stops the compression worker after its in-flight job. Enrichment runs
    /// belong to their callers and are not awaited.
    pub async fn shutdown(self) {
        let active = self.orchestrator.active_runs();
        if active > 0 {
            tracing::warn!(
                "[Runtime] Shutting down with {} enrichment runs still active",
                active
            );
        }
        self.compression.shutdown().await;
        tracing::info!("[Runtime] Shut down");
    }
}
