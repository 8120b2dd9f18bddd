//! Session domain module.
//!
//! # Module Structure
//!
//! - `model`: Session record and its attachments (`Session`, `AudioSegment`, ...)
//! - `enrichment`: Persisted enrichment status and per-session config
//! - `query`: Filtered session queries (`SessionQuery`)
//! - `repository`: Repository trait for session persistence

mod enrichment;
mod model;
mod query;
mod repository;

pub use enrichment::{
    CurrentStage, EnrichmentConfig, EnrichmentState, EnrichmentStatus, Stage, StageSnapshot,
    StageState, StageStatus,
};
pub use model::{
    AudioSegment, RecommendedTask, Screenshot, Session, SessionSummary,
    SessionSummaryNarrative, SessionVideo, VideoChapter,
};
pub use query::{SessionQuery, SessionQueryResult};
pub use repository::SessionRepository;
