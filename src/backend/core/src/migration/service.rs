//! Per-realm migration orchestration.
//!
//! The service runs registered scripts against one realm at a time, ordered
//! by `(order, id)`, recording each outcome as a persistent record in the
//! realm's own store. Records make runs idempotent: a Success record skips
//! the script on later runs, a Failed record means the script is retried.
//! Orchestration runs under its own system-principal session and never
//! depends on any caller's security context.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, warn};

use super::script::MigrationRegistry;
use crate::error::{Result, TesseraError};
use crate::repository::{DomainEntity, Repository};
use crate::security::{
    Action, DataDomain, PrincipalContext, ResourceContext, RuleContext, RuleSet, SecuritySession,
};
use crate::store::DataStore;

// ═══════════════════════════════════════════════════════════════════════════════
// Migration Record
// ═══════════════════════════════════════════════════════════════════════════════

/// Outcome of one script execution against one realm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationOutcome {
    Success,
    Failed,
}

/// Persistent record of a script run, stored in the realm it ran against.
///
/// The record id is deterministic (`realm:migration_id`). The first write
/// for a script is an insert, so the store's unique-id constraint serializes
/// concurrent runs of the same script: the loser's insert fails with
/// `DuplicateRecord` and the script counts as already run, leaving the
/// winner's record intact. Retrying a recorded Failed script replaces that
/// record instead of accumulating one row per attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationRecord {
    pub id: Option<String>,
    pub realm: String,
    pub migration_id: String,
    pub outcome: MigrationOutcome,
    /// Error rendering for Failed records.
    pub error_detail: Option<String>,
    pub run_at: DateTime<Utc>,
    pub data_domain: Option<DataDomain>,
}

impl MigrationRecord {
    fn record_id(realm: &str, migration_id: &str) -> String {
        format!("{realm}:{migration_id}")
    }

    fn new(realm: &str, migration_id: &str, outcome: MigrationOutcome) -> Self {
        Self {
            id: Some(Self::record_id(realm, migration_id)),
            realm: realm.to_string(),
            migration_id: migration_id.to_string(),
            outcome,
            error_detail: None,
            run_at: Utc::now(),
            data_domain: None,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.outcome == MigrationOutcome::Success
    }
}

impl DomainEntity for MigrationRecord {
    const COLLECTION: &'static str = "migration_records";

    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn set_id(&mut self, id: String) {
        self.id = Some(id);
    }

    fn ref_name(&self) -> &str {
        &self.migration_id
    }

    fn data_domain(&self) -> Option<&DataDomain> {
        self.data_domain.as_ref()
    }

    fn set_data_domain(&mut self, domain: DataDomain) {
        self.data_domain = Some(domain);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Progress Events
// ═══════════════════════════════════════════════════════════════════════════════

/// Progress notification emitted after each script is applied and recorded.
///
/// Skipped scripts (already Success) emit nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationEvent {
    pub realm: String,
    pub migration_id: String,
    pub outcome: MigrationOutcome,
    pub detail: Option<String>,
}

/// A bounded progress channel pre-wrapped as a stream for consumers.
pub fn progress_channel(
    buffer: usize,
) -> (mpsc::Sender<MigrationEvent>, ReceiverStream<MigrationEvent>) {
    let (tx, rx) = mpsc::channel(buffer);
    (tx, ReceiverStream::new(rx))
}

/// What one `run_all_unrun_migrations` call did, in run order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationRunSummary {
    pub applied: Vec<String>,
    pub failed: Vec<String>,
    pub skipped: Vec<String>,
    /// True when a blocking script failed and later scripts were not run.
    pub aborted: bool,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Migration Service
// ═══════════════════════════════════════════════════════════════════════════════

/// Runs registered migrations realm-by-realm and answers whether a realm is
/// fully migrated.
pub struct MigrationService {
    store: Arc<dyn DataStore>,
    rules: Arc<RuleSet>,
    registry: Arc<MigrationRegistry>,
    records: Repository<MigrationRecord>,
}

impl MigrationService {
    pub fn new(
        store: Arc<dyn DataStore>,
        rules: Arc<RuleSet>,
        registry: Arc<MigrationRegistry>,
    ) -> Self {
        Self {
            records: Repository::new(store.clone()),
            store,
            rules,
            registry,
        }
    }

    /// A context carrying the system principal for this realm. Record
    /// reads/writes run under it, not under any caller session.
    fn system_context(&self) -> RuleContext {
        RuleContext::new(self.rules.clone())
    }

    fn system_entry(realm: &str) -> (PrincipalContext, ResourceContext) {
        (
            PrincipalContext::system_principal(realm),
            ResourceContext::new(MigrationRecord::COLLECTION, Action::List, realm),
        )
    }

    /// Outcomes already recorded for this realm, keyed by migration id.
    async fn recorded_outcomes(
        &self,
        ctx: &RuleContext,
        realm: &str,
    ) -> Result<HashMap<String, MigrationOutcome>> {
        let records = self.records.get_all_list(ctx, realm).await?;
        Ok(records
            .into_iter()
            .map(|r| (r.migration_id, r.outcome))
            .collect())
    }

    /// Check whether every registered script has a Success record for the
    /// realm. Pending scripts (never run, or last recorded Failed) make this
    /// fail with `MigrationRequired` listing them in run order.
    pub async fn check_migration_required(&self, realm: &str) -> Result<()> {
        let ctx = self.system_context();
        let (principal, resource) = Self::system_entry(realm);
        let _session = SecuritySession::open(&ctx, principal, resource);

        let outcomes = self.recorded_outcomes(&ctx, realm).await?;
        let pending: Vec<String> = self
            .registry
            .scripts()
            .iter()
            .filter(|script| outcomes.get(script.id()) != Some(&MigrationOutcome::Success))
            .map(|script| script.id().to_string())
            .collect();

        if pending.is_empty() {
            debug!(realm, "Realm is fully migrated");
            Ok(())
        } else {
            Err(TesseraError::migration_required(realm, pending))
        }
    }

    /// Run every registered script that has no Success record for the realm,
    /// in `(order, id)` order, emitting one progress event per script
    /// applied.
    ///
    /// Failures are recorded and reported but do not stop later scripts,
    /// unless the failing script is blocking, in which case the rest of the
    /// run is abandoned. A dropped receiver never fails the run; progress
    /// reporting is best-effort.
    pub async fn run_all_unrun_migrations(
        &self,
        realm: &str,
        sink: mpsc::Sender<MigrationEvent>,
    ) -> Result<MigrationRunSummary> {
        let ctx = self.system_context();
        let (principal, resource) = Self::system_entry(realm);
        let _session = SecuritySession::open(&ctx, principal, resource);

        let outcomes = self.recorded_outcomes(&ctx, realm).await?;
        let mut summary = MigrationRunSummary::default();

        for script in self.registry.scripts() {
            let id = script.id();
            if outcomes.get(id) == Some(&MigrationOutcome::Success) {
                debug!(realm, migration = id, "Skipping already-run migration");
                summary.skipped.push(id.to_string());
                continue;
            }
            if outcomes.contains_key(id) {
                info!(realm, migration = id, "Retrying previously failed migration");
            }

            let handle = self.store.handle(realm)?;
            let (record, event) = match script.apply(handle).await {
                Ok(()) => {
                    info!(realm, migration = id, "Migration applied");
                    summary.applied.push(id.to_string());
                    let record = MigrationRecord::new(realm, id, MigrationOutcome::Success);
                    let event = MigrationEvent {
                        realm: realm.to_string(),
                        migration_id: id.to_string(),
                        outcome: MigrationOutcome::Success,
                        detail: None,
                    };
                    (record, event)
                }
                Err(cause) => {
                    let detail = format!("{cause:#}");
                    error!(realm, migration = id, %detail, "Migration failed");
                    summary.failed.push(id.to_string());
                    let mut record = MigrationRecord::new(realm, id, MigrationOutcome::Failed);
                    record.error_detail = Some(detail.clone());
                    let event = MigrationEvent {
                        realm: realm.to_string(),
                        migration_id: id.to_string(),
                        outcome: MigrationOutcome::Failed,
                        detail: Some(detail),
                    };
                    (record, event)
                }
            };

            let failed = record.outcome == MigrationOutcome::Failed;
            if outcomes.contains_key(id) {
                // A Failed record exists for this script; replace it.
                self.records.save(&ctx, realm, record).await?;
            } else {
                match self.records.insert(&ctx, realm, record).await {
                    Ok(_) => {}
                    Err(TesseraError::DuplicateRecord { .. }) => {
                        info!(realm, migration = id, "Migration already recorded by a concurrent run");
                    }
                    Err(err) => return Err(err),
                }
            }
            // Best-effort: the run proceeds even if nobody is listening.
            let _ = sink.send(event).await;

            if failed && script.blocking() {
                warn!(realm, migration = id, "Blocking migration failed; aborting run");
                summary.aborted = true;
                break;
            }
        }

        Ok(summary)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
