//! Migration scripts and the startup registry.

use async_trait::async_trait;
use futures::future::BoxFuture;
use std::sync::Arc;
use tracing::debug;

use crate::store::StoreHandle;

// ═══════════════════════════════════════════════════════════════════════════════
// Migration Trait
// ═══════════════════════════════════════════════════════════════════════════════

/// A unit of schema/data change applied once per realm.
///
/// Scripts must be idempotent by record: the service skips scripts with a
/// Success record and retries ones recorded Failed, so `apply` may run more
/// than once against a partially-changed realm.
#[async_trait]
pub trait Migration: Send + Sync {
    /// Stable identifier, unique across the registry.
    fn id(&self) -> &str;

    /// Declared position; scripts run ordered by `(order, id)`.
    fn order(&self) -> i32;

    /// A blocking script's failure aborts the remaining scripts for its
    /// realm in that run. Non-blocking failures are recorded and reported
    /// but do not stop independent later scripts.
    fn blocking(&self) -> bool {
        false
    }

    /// Apply the change against the realm's store handle. Any error is
    /// captured as the Failed record's detail.
    async fn apply(&self, handle: Arc<dyn StoreHandle>) -> anyhow::Result<()>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// Closure Adapter
// ═══════════════════════════════════════════════════════════════════════════════

type ApplyFn =
    Box<dyn Fn(Arc<dyn StoreHandle>) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// A [`Migration`] built from a closure; the common way to register small
/// scripts and the test suite's workhorse.
pub struct FnMigration {
    id: String,
    order: i32,
    is_blocking: bool,
    apply: ApplyFn,
}

impl FnMigration {
    pub fn new<F, Fut>(id: impl Into<String>, order: i32, apply: F) -> Self
    where
        F: Fn(Arc<dyn StoreHandle>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            id: id.into(),
            order,
            is_blocking: false,
            apply: Box::new(move |handle| Box::pin(apply(handle))),
        }
    }

    /// Mark this script as blocking.
    pub fn blocking(mut self) -> Self {
        self.is_blocking = true;
        self
    }
}

#[async_trait]
impl Migration for FnMigration {
    fn id(&self) -> &str {
        &self.id
    }

    fn order(&self) -> i32 {
        self.order
    }

    fn blocking(&self) -> bool {
        self.is_blocking
    }

    async fn apply(&self, handle: Arc<dyn StoreHandle>) -> anyhow::Result<()> {
        (self.apply)(handle).await
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Registry
// ═══════════════════════════════════════════════════════════════════════════════

/// The process-wide migration table: registered once at startup, read-only
/// thereafter, ordered by `(order, id)` for determinism under ties.
pub struct MigrationRegistry {
    scripts: Vec<Arc<dyn Migration>>,
}

impl MigrationRegistry {
    pub fn builder() -> MigrationRegistryBuilder {
        MigrationRegistryBuilder::default()
    }

    /// Registered scripts in run order.
    pub fn scripts(&self) -> &[Arc<dyn Migration>] {
        &self.scripts
    }

    pub fn len(&self) -> usize {
        self.scripts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scripts.is_empty()
    }
}

/// Builder for the startup migration table.
#[derive(Default)]
pub struct MigrationRegistryBuilder {
    scripts: Vec<Arc<dyn Migration>>,
}

impl MigrationRegistryBuilder {
    /// Register a script.
    pub fn register(mut self, script: impl Migration + 'static) -> Self {
        debug!(migration = script.id(), order = script.order(), "Registering migration");
        self.scripts.push(Arc::new(script));
        self
    }

    pub fn build(mut self) -> Arc<MigrationRegistry> {
        self.scripts
            .sort_by(|a, b| (a.order(), a.id()).cmp(&(b.order(), b.id())));
        Arc::new(MigrationRegistry {
            scripts: self.scripts,
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(id: &str, order: i32) -> FnMigration {
        FnMigration::new(id, order, |_| async { Ok(()) })
    }

    #[test]
    fn test_registry_orders_by_order_then_id() {
        let registry = MigrationRegistry::builder()
            .register(noop("b", 2))
            .register(noop("c", 1))
            .register(noop("a", 2))
            .build();

        let ids: Vec<&str> = registry.scripts().iter().map(|s| s.id()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_blocking_flag() {
        let script = noop("m1", 1).blocking();
        assert!(Migration::blocking(&script));
        assert!(!Migration::blocking(&noop("m2", 2)));
    }
}
