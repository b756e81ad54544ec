//! # Tessera Core
//!
//! Multi-tenant data security and migration engine.
//!
//! ## Architecture
//!
//! - **Security**: Per-execution-unit context stacks, session guards, and a
//!   priority/specificity rule engine with deny-by-default evaluation
//! - **Store**: Realm-bound document store contracts with an in-memory
//!   reference implementation
//! - **Repository**: Generic authorize-then-filter-then-store CRUD façade
//!   that segments every query by the caller's derived data domain
//! - **Migration**: Per-realm ordered, idempotent migration orchestration
//!   with streamed progress events
//! - **Telemetry**: Structured logging infrastructure

pub mod config;
pub mod error;
pub mod migration;
pub mod model;
pub mod repository;
pub mod security;
pub mod store;
pub mod telemetry;

pub use error::{Result, TesseraError};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::CoreConfig;
    pub use crate::error::{Result, TesseraError};
    pub use crate::migration::{
        progress_channel, FnMigration, Migration, MigrationEvent, MigrationOutcome,
        MigrationRecord, MigrationRegistry, MigrationRunSummary, MigrationService,
    };
    pub use crate::model::UserProfile;
    pub use crate::repository::{DomainEntity, Repository};
    pub use crate::security::{
        Action, ActiveContext, DataDomain, Decision, DomainFilter, PrincipalContext,
        ResourceContext, RuleContext, RuleEngine, RuleScope, RuleSet, RuleSetBuilder,
        SecurityRule, SecuritySession, UserId,
    };
    pub use crate::store::{DataStore, DocFilter, Document, InMemoryDataStore, SortSpec, StoreHandle};
}
