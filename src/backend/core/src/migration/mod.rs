//! Realm-aware migration orchestration: scripts, registry, records, and the
//! service that runs them.

pub mod script;
pub mod service;

pub use script::{FnMigration, Migration, MigrationRegistry, MigrationRegistryBuilder};
pub use service::{
    progress_channel, MigrationEvent, MigrationOutcome, MigrationRecord, MigrationRunSummary,
    MigrationService,
};
