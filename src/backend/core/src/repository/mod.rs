//! Realm-scoped repository façade over the document store.
//!
//! Every operation follows the same contract:
//! 1. read the active entry from the caller's [`RuleContext`] (no session
//!    means the anonymous principal, which rules deny by default),
//! 2. evaluate the rule engine for the per-operation action; a Deny fails
//!    with a security check error before any store access,
//! 3. on Allow, derive the caller's segmentation filter and intersect it
//!    with any caller-supplied query filter (strict AND; a caller term
//!    conflicting with a derived term matches nothing),
//! 4. only then touch the realm's store handle.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::error::{Result, TesseraError};
use crate::security::rules::Decision;
use crate::security::{Action, ActiveContext, DataDomain, DomainFilter, RuleContext};
use crate::store::{DataStore, DocFilter, SortSpec};

// ═══════════════════════════════════════════════════════════════════════════════
// Domain Entity
// ═══════════════════════════════════════════════════════════════════════════════

/// A persistable entity carrying a data domain.
///
/// Ids are store-assigned strings (uuid v4 on first save). `ref_name` is the
/// human-meaningful unique name within a realm (e.g. a username).
pub trait DomainEntity:
    Serialize + DeserializeOwned + Clone + Send + Sync + 'static
{
    /// Collection the entity persists into; doubles as the resource type for
    /// authorization.
    const COLLECTION: &'static str;

    fn id(&self) -> Option<&str>;
    fn set_id(&mut self, id: String);

    fn ref_name(&self) -> &str;

    fn data_domain(&self) -> Option<&DataDomain>;
    fn set_data_domain(&mut self, domain: DataDomain);
}

// ═══════════════════════════════════════════════════════════════════════════════
// Repository
// ═══════════════════════════════════════════════════════════════════════════════

/// Generic CRUD façade for one entity type.
pub struct Repository<E> {
    store: Arc<dyn DataStore>,
    _entity: PhantomData<fn() -> E>,
}

impl<E> Clone for Repository<E> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            _entity: PhantomData,
        }
    }
}

impl<E: DomainEntity> Repository<E> {
    pub fn new(store: Arc<dyn DataStore>) -> Self {
        Self {
            store,
            _entity: PhantomData,
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Authorization
    // ─────────────────────────────────────────────────────────────────────────

    /// Evaluate the active context for a per-operation action and derive the
    /// segmentation filter. The session's resource entry is overlaid with
    /// this entity's collection, the target realm, and the operation's
    /// action, since one session spans many repository calls.
    fn authorize(
        &self,
        ctx: &RuleContext,
        realm: &str,
        action: Action,
    ) -> Result<(ActiveContext, DomainFilter)> {
        let active = ctx.current();
        let mut effective = active.resource.for_resource(E::COLLECTION, action);
        effective.realm = realm.to_string();

        match ctx.engine().evaluate(&active.principal, &effective) {
            Decision::Allow => {
                let filter = ctx.engine().derive_filter(&active.principal, &effective);
                Ok((active, filter))
            }
            Decision::Deny(reason) => {
                debug!(
                    collection = E::COLLECTION,
                    action = %action,
                    realm,
                    principal = %active.principal.user_id,
                    reason,
                    "Repository operation denied"
                );
                Err(TesseraError::security_check(E::COLLECTION, action, reason))
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Stamp the entity's data domain from the active context if unset.
    /// Non-system callers always stamp their own identity; system callers
    /// may stamp the session's explicit domain.
    fn stamp_domain(&self, active: &ActiveContext, realm: &str, entity: &mut E) {
        if entity.data_domain().is_none() {
            let domain = active
                .resource
                .data_domain
                .clone()
                .filter(|_| active.principal.system)
                .unwrap_or_else(|| DataDomain::for_owner(realm, &active.principal.user_id));
            entity.set_data_domain(domain);
        }
    }

    /// Persist a new entity, under a fresh uuid if it carries no id or under
    /// the caller-chosen one it does. The store's unique-id constraint
    /// surfaces a concurrent insert of the same id as `DuplicateRecord`.
    pub async fn insert(&self, ctx: &RuleContext, realm: &str, mut entity: E) -> Result<E> {
        let (active, _) = self.authorize(ctx, realm, Action::Create)?;

        let id = match entity.id() {
            Some(existing) => existing.to_string(),
            None => {
                let id = Uuid::new_v4().to_string();
                entity.set_id(id.clone());
                id
            }
        };
        self.stamp_domain(&active, realm, &mut entity);

        let doc = serde_json::to_value(&entity)?;
        let handle = self.store.handle(realm)?;
        handle.insert_one(E::COLLECTION, &id, doc).await?;
        debug!(collection = E::COLLECTION, id, realm, "Entity inserted");
        Ok(entity)
    }

    /// Persist an entity: no id means a fresh insert, an id means an update
    /// of an existing record. An update only replaces a record the caller's
    /// derived scope can already see; knowing another owner's id is not
    /// enough to overwrite their record, and updating an id outside that
    /// scope is `EntityNotFound`.
    pub async fn save(&self, ctx: &RuleContext, realm: &str, mut entity: E) -> Result<E> {
        let Some(id) = entity.id().map(str::to_string) else {
            return self.insert(ctx, realm, entity).await;
        };
        let (active, filter) = self.authorize(ctx, realm, Action::Update)?;

        let mut doc_filter = filter.to_doc_filter();
        doc_filter.insert("id".to_string(), id.clone().into());
        let handle = self.store.handle(realm)?;
        if handle.find_one(E::COLLECTION, &doc_filter).await?.is_none() {
            return Err(TesseraError::not_found(E::COLLECTION, id, realm));
        }

        self.stamp_domain(&active, realm, &mut entity);
        let doc = serde_json::to_value(&entity)?;
        handle.replace_one(E::COLLECTION, &id, doc).await?;
        debug!(collection = E::COLLECTION, id, realm, "Entity saved");
        Ok(entity)
    }

    /// Fetch by id. Absence within valid scope is `EntityNotFound`, not a
    /// security failure.
    pub async fn find_by_id(&self, ctx: &RuleContext, id: &str, realm: &str) -> Result<E> {
        let (_, filter) = self.authorize(ctx, realm, Action::Read)?;
        let mut doc_filter = filter.to_doc_filter();
        doc_filter.insert("id".to_string(), id.into());

        let handle = self.store.handle(realm)?;
        match handle.find_one(E::COLLECTION, &doc_filter).await? {
            Some(doc) => Ok(serde_json::from_value(doc)?),
            None => Err(TesseraError::not_found(E::COLLECTION, id, realm)),
        }
    }

    /// Fetch by reference name; absence is `Ok(None)`.
    pub async fn find_by_ref_name(
        &self,
        ctx: &RuleContext,
        ref_name: &str,
        realm: &str,
    ) -> Result<Option<E>> {
        let (_, filter) = self.authorize(ctx, realm, Action::Read)?;
        let mut doc_filter = filter.to_doc_filter();
        doc_filter.insert("ref_name".to_string(), ref_name.into());

        let handle = self.store.handle(realm)?;
        match handle.find_one(E::COLLECTION, &doc_filter).await? {
            Some(doc) => Ok(Some(serde_json::from_value(doc)?)),
            None => Ok(None),
        }
    }

    /// Page through entities within the caller's derived scope. A caller
    /// filter only narrows the result (strict AND with the derived filter);
    /// a term conflicting with the derived scope matches nothing.
    pub async fn get_list(
        &self,
        ctx: &RuleContext,
        realm: &str,
        offset: usize,
        limit: Option<usize>,
        sort: Option<SortSpec>,
        query: Option<DocFilter>,
    ) -> Result<Vec<E>> {
        let (_, filter) = self.authorize(ctx, realm, Action::List)?;
        let Some(doc_filter) = filter.intersect(query) else {
            return Ok(Vec::new());
        };

        let handle = self.store.handle(realm)?;
        let docs = handle
            .find_many(E::COLLECTION, &doc_filter, offset, limit, sort.as_ref())
            .await?;
        docs.into_iter()
            .map(|doc| serde_json::from_value(doc).map_err(Into::into))
            .collect()
    }

    /// Number of entities within the caller's derived scope matching the
    /// optional query filter.
    pub async fn count(
        &self,
        ctx: &RuleContext,
        realm: &str,
        query: Option<DocFilter>,
    ) -> Result<u64> {
        let (_, filter) = self.authorize(ctx, realm, Action::List)?;
        let Some(doc_filter) = filter.intersect(query) else {
            return Ok(0);
        };

        let handle = self.store.handle(realm)?;
        handle.count(E::COLLECTION, &doc_filter).await
    }

    /// All entities within the caller's derived scope, in stable order.
    pub async fn get_all_list(&self, ctx: &RuleContext, realm: &str) -> Result<Vec<E>> {
        self.get_list(ctx, realm, 0, None, None, None).await
    }

    /// Delete by id within the caller's derived scope. Returns the number of
    /// records removed; 0 is not an error.
    pub async fn delete(&self, ctx: &RuleContext, realm: &str, id: &str) -> Result<u64> {
        let (_, filter) = self.authorize(ctx, realm, Action::Delete)?;
        let mut doc_filter = filter.to_doc_filter();
        doc_filter.insert("id".to_string(), id.into());

        let handle = self.store.handle(realm)?;
        let removed = handle.delete_many(E::COLLECTION, &doc_filter).await?;
        debug!(collection = E::COLLECTION, id, realm, removed, "Entity delete");
        Ok(removed)
    }
}
