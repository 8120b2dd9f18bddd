//! Building blocks shared by the pipeline stages: the timeout wrapper around
//! collaborator calls and the progress emitter.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;
use taskerino_core::TaskerinoError;
use taskerino_core::enrichment::{ProgressEvent, ProgressStage};
use taskerino_core::session::{EnrichmentStatus, Stage};
use tokio::sync::mpsc;

/// Runs one collaborator call under the stage's hard timeout.
///
/// Collaborator errors become `StageFailure`, expiry becomes `StageTimeout`.
pub(crate) async fn call_with_timeout<T, F>(
    stage: Stage,
    limit: Duration,
    call: F,
) -> Result<T, TaskerinoError>
where
    F: Future<Output = anyhow::Result<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(TaskerinoError::stage_failure(stage.to_string(), format!("{:#}", e))),
        Err(_) => Err(TaskerinoError::StageTimeout {
            stage: stage.to_string(),
            millis: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
        }),
    }
}

/// Message recorded on the stage for a failed call.
pub(crate) fn failure_message(err: &TaskerinoError) -> String {
    match err {
        TaskerinoError::StageFailure { message, .. } => message.clone(),
        TaskerinoError::StageTimeout { millis, .. } => {
            format!("timed out after {}", format_limit(*millis))
        }
        other => other.to_string(),
    }
}

/// Whole seconds read as `600s`, anything finer as `1500ms`.
fn format_limit(millis: u64) -> String {
    if millis >= 1000 && millis % 1000 == 0 {
        format!("{}s", millis / 1000)
    } else {
        format!("{}ms", millis)
    }
}

/// Collaborators report cost as a plain float; anything negative or
/// non-finite is booked as zero.
pub(crate) fn sanitize_cost(stage: Stage, cost: f64) -> f64 {
    if cost.is_finite() && cost >= 0.0 {
        cost
    } else {
        tracing::warn!("[Enrichment] Ignoring invalid {} cost {}", stage, cost);
        0.0
    }
}

/// Overall progress for a fraction of `stage`'s band.
pub(crate) fn band_progress(stage: Stage, fraction: f64) -> f64 {
    let fraction = if fraction.is_finite() {
        fraction.clamp(0.0, 1.0)
    } else {
        0.0
    };
    stage.band_start() + fraction * stage.weight()
}

/// Sends progress events for one run, never letting the reported progress
/// go backwards.
pub(crate) struct ProgressEmitter {
    tx: mpsc::UnboundedSender<ProgressEvent>,
    last: Mutex<f64>,
}

impl ProgressEmitter {
    pub(crate) fn new(tx: mpsc::UnboundedSender<ProgressEvent>) -> Self {
        Self {
            tx,
            last: Mutex::new(0.0),
        }
    }

    pub(crate) fn emit(
        &self,
        stage: ProgressStage,
        message: impl Into<String>,
        progress: f64,
        status: &EnrichmentStatus,
    ) {
        let progress = {
            let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
            let progress = if progress.is_finite() {
                progress.clamp(0.0, 100.0)
            } else {
                *last
            };
            *last = last.max(progress);
            *last
        };

        let event = ProgressEvent::new(stage, message, progress, status);
        if self.tx.send(event).is_err() {
            tracing::trace!("[Enrichment] Progress receiver dropped");
        }
    }
}
