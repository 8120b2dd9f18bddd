//! One-shot upgrade paths for data written by older releases.

mod enrichment_fields;
mod per_entity;

pub use enrichment_fields::migrate_enrichment_fields;
pub use per_entity::{CollectionReport, MigrationReport, migrate_to_per_entity_files};
