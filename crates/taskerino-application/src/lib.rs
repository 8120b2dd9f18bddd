//! Application layer for Taskerino.
//!
//! Hosts the enrichment orchestrator, active-session tracking and the runtime that wires it to the
//! chunked entity store and the compression queue.

pub mod active_session;
pub mod enrichment;
pub mod runtime;

pub use active_session::ActiveSession;
pub use enrichment::{EnrichmentOptions, EnrichmentOrchestrator, EnrichmentRun};
pub use runtime::{EnrichmentServices, RuntimeOptions, TaskerinoRuntime};
