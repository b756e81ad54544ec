//! Security context and rule evaluation.
//!
//! This module provides:
//! - **Domain types**: `DataDomain`, `PrincipalContext`, `ResourceContext`
//! - **Rule engine**: data-driven allow/deny rules with priority and
//!   specificity resolution, plus segmentation filter derivation
//! - **Context stack**: the per-execution-unit `RuleContext` and the RAII
//!   `SecuritySession` guard that owns one stack entry
//!
//! # Usage
//!
//! ```rust,ignore
//! use tessera_core::security::{
//!     Action, PrincipalContext, ResourceContext, RuleContext, RuleSet,
//!     SecuritySession,
//! };
//!
//! let rules = RuleSet::builder().with_system_access().build();
//! let ctx = RuleContext::new(rules);
//!
//! let principal = PrincipalContext::user("u1", ["user"], "r1");
//! let resource = ResourceContext::new("user_profile", Action::Read, "r1");
//! let _session = SecuritySession::open(&ctx, principal, resource);
//!
//! // repository calls made here evaluate against the active entry;
//! // the entry pops when `_session` drops, on every exit path.
//! ```

pub mod context;
pub mod domain;
pub mod rules;

pub use context::{ActiveContext, RuleContext, SecuritySession};
pub use domain::{Action, DataDomain, PrincipalContext, ResourceContext, UserId};
pub use rules::{
    Decision, DomainFilter, RuleEffect, RuleEngine, RuleScope, RuleSet, RuleSetBuilder,
    SecurityRule,
};
