//! Error handling for Tessera Core.
//!
//! This module provides:
//! - Typed errors for every failure class the core can surface
//! - A crate-wide `Result` alias
//! - Convenience constructors for the common cases
//!
//! The taxonomy is deliberately small:
//! - `SecurityCheck`: an authorization denial; recoverable by the caller.
//! - `EntityNotFound`: an id-based lookup on a legitimately scoped but
//!   absent record; not a security failure.
//! - `MigrationRequired`: a realm's schema state is behind; recoverable by
//!   running the pending migrations.
//! - `DuplicateRecord`: the store's unique-id constraint fired.
//! - `Store`: an underlying store failure, surfaced unchanged.

use std::fmt;
use thiserror::Error;

// ═══════════════════════════════════════════════════════════════════════════════
// Result Type Alias
// ═══════════════════════════════════════════════════════════════════════════════

/// A specialized Result type for Tessera operations.
pub type Result<T> = std::result::Result<T, TesseraError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Main Error Type
// ═══════════════════════════════════════════════════════════════════════════════

/// The main error type for Tessera Core.
#[derive(Debug, Error)]
pub enum TesseraError {
    /// An authorization check denied the operation.
    #[error("security check failed for {resource}:{action}: {reason}")]
    SecurityCheck {
        /// The resource type the caller attempted to access.
        resource: String,
        /// The action that was denied.
        action: String,
        /// Why the rule engine denied it (typically the winning rule id,
        /// or "no matching rule").
        reason: String,
    },

    /// An id-based lookup found nothing within the caller's valid scope.
    #[error("{collection} not found: {id} (realm {realm})")]
    EntityNotFound {
        collection: String,
        id: String,
        realm: String,
    },

    /// One or more registered migrations have no Success record for a realm.
    #[error("realm {realm} requires migration; pending: {}", .pending.join(", "))]
    MigrationRequired {
        realm: String,
        /// Ids of registered scripts lacking a Success record, in run order.
        pending: Vec<String>,
    },

    /// A unique-id insert collided with an existing record.
    #[error("duplicate record in {collection}: {id}")]
    DuplicateRecord { collection: String, id: String },

    /// An underlying store failure, propagated unchanged.
    #[error("store error: {0}")]
    Store(String),

    /// Entity (de)serialization at the store boundary failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration loading or validation failed.
    #[error("configuration error: {0}")]
    Configuration(#[from] config::ConfigError),
}

impl TesseraError {
    // ─────────────────────────────────────────────────────────────────────────
    // Constructors
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a security check failure.
    pub fn security_check(
        resource: impl Into<String>,
        action: impl fmt::Display,
        reason: impl Into<String>,
    ) -> Self {
        Self::SecurityCheck {
            resource: resource.into(),
            action: action.to_string(),
            reason: reason.into(),
        }
    }

    /// Create a not found error.
    pub fn not_found(
        collection: impl Into<String>,
        id: impl Into<String>,
        realm: impl Into<String>,
    ) -> Self {
        Self::EntityNotFound {
            collection: collection.into(),
            id: id.into(),
            realm: realm.into(),
        }
    }

    /// Create a migration required error.
    pub fn migration_required(realm: impl Into<String>, pending: Vec<String>) -> Self {
        Self::MigrationRequired {
            realm: realm.into(),
            pending,
        }
    }

    /// Create a store error.
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store(message.into())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Classification
    // ─────────────────────────────────────────────────────────────────────────

    /// Whether the caller can recover without operator intervention.
    ///
    /// Denials can be retried with a different action or realm, a missing
    /// entity can be created, and a behind-schema realm can be migrated.
    /// Store and serialization failures cannot be fixed by the caller.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::SecurityCheck { .. }
                | Self::EntityNotFound { .. }
                | Self::MigrationRequired { .. }
                | Self::DuplicateRecord { .. }
        )
    }

    /// Whether this error is an authorization denial.
    pub fn is_denied(&self) -> bool {
        matches!(self, Self::SecurityCheck { .. })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_security_check_display() {
        let err = TesseraError::security_check("user_profile", "create", "deny-anonymous");
        let msg = err.to_string();
        assert!(msg.contains("user_profile:create"));
        assert!(msg.contains("deny-anonymous"));
        assert!(err.is_denied());
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_migration_required_lists_pending() {
        let err = TesseraError::migration_required(
            "realm-a",
            vec!["m1".to_string(), "m2".to_string()],
        );
        let msg = err.to_string();
        assert!(msg.contains("realm-a"));
        assert!(msg.contains("m1, m2"));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_store_error_not_recoverable() {
        let err = TesseraError::store("connection reset");
        assert!(!err.is_recoverable());
        assert!(!err.is_denied());
    }

    #[test]
    fn test_not_found_display() {
        let err = TesseraError::not_found("user_profile", "abc", "realm-a");
        assert_eq!(
            err.to_string(),
            "user_profile not found: abc (realm realm-a)"
        );
    }
}
