//! Enrichment orchestration.
//!
//! - `orchestrator`: the staged pipeline and its run handle
//! - `run_guard`: one active run per session
//! - `stage`: timeout wrapper and progress emitter used by every stage

mod orchestrator;
mod run_guard;
mod stage;

pub use orchestrator::{EnrichmentOptions, EnrichmentOrchestrator, EnrichmentRun};
pub use run_guard::{ActiveRuns, RunPermit};
