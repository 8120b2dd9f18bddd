//! Adds `enrichmentStatus` / `enrichmentConfig` to sessions written before
//! the staged enrichment pipeline existed.

use chrono::Utc;
use serde_json::{Map, Value};
use taskerino_core::Result;
use taskerino_core::session::{
    CurrentStage, EnrichmentConfig, EnrichmentState, EnrichmentStatus, Session, Stage,
};
use taskerino_core::storage::{EntityStore, StoredEntity};

const LEGACY_AUDIO_FLAG: &str = "audioReviewCompleted";

/// Derives a status from the artifacts a legacy session already carries.
fn derive_status(session: &Map<String, Value>) -> EnrichmentStatus {
    let now = Utc::now();
    let mut status = EnrichmentStatus::default();

    let audio_done = session
        .get(LEGACY_AUDIO_FLAG)
        .and_then(Value::as_bool)
        .unwrap_or(false)
        || session
            .get("fullTranscription")
            .and_then(Value::as_str)
            .is_some_and(|t| !t.trim().is_empty());
    let video_done = session
        .get("video")
        .and_then(|v| v.get("chapters"))
        .and_then(Value::as_array)
        .is_some_and(|chapters| !chapters.is_empty());
    let summary_done = session.get("summary").is_some_and(|s| !s.is_null());

    let done = [
        (Stage::Audio, audio_done),
        (Stage::Video, video_done),
        (Stage::Summary, summary_done),
    ];
    let last_done = done.iter().rposition(|(_, d)| *d);

    for (i, (stage, is_done)) in done.into_iter().enumerate() {
        if is_done {
            // legacy runs did not record cost
            status.stage_mut(stage).mark_completed(now, 0.0);
        } else if last_done.is_some_and(|last| i < last) {
            // a later artifact exists, so this stage never ran for the session
            status.stage_mut(stage).mark_skipped(now);
        }
    }

    if last_done.is_some() {
        status.status = status.terminal_state();
        status.current_stage = status
            .first_unfinished_stage()
            .map(CurrentStage::from)
            .unwrap_or(CurrentStage::Complete);
    } else {
        status.status = EnrichmentState::Idle;
    }
    status.recompute();
    status.last_updated_at = Some(now);
    status
}

/// Upgrades legacy session documents in place.
///
/// Sessions that already have both fields and no legacy flag are left
/// untouched, so the migration can run on every start.
///
/// # Returns
///
/// The number of sessions rewritten.
pub async fn migrate_enrichment_fields(
    store: &dyn EntityStore,
    default_config: &EnrichmentConfig,
) -> Result<usize> {
    let mut upgraded = 0;

    for mut doc in store.load_all(Session::COLLECTION).await? {
        let Some(session) = doc.body.as_object_mut() else {
            tracing::warn!("[Migration] Session '{}' is not a JSON object, skipping", doc.id);
            continue;
        };

        let has_status = session.contains_key("enrichmentStatus");
        let has_config = session.contains_key("enrichmentConfig");
        let has_legacy_flag = session.contains_key(LEGACY_AUDIO_FLAG);
        if has_status && has_config && !has_legacy_flag {
            continue;
        }

        if !has_status {
            let status = derive_status(session);
            session.insert("enrichmentStatus".to_string(), serde_json::to_value(&status)?);
        }
        if !has_config {
            session.insert(
                "enrichmentConfig".to_string(),
                serde_json::to_value(default_config)?,
            );
        }
        session.remove(LEGACY_AUDIO_FLAG);

        store.save_entity(Session::COLLECTION, &doc).await?;
        upgraded += 1;
        tracing::debug!("[Migration] Added enrichment fields to session '{}'", doc.id);
    }

    if upgraded > 0 {
        tracing::info!("[Migration] Upgraded enrichment fields on {} sessions", upgraded);
    }
    Ok(upgraded)
}
