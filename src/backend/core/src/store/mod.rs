//! Document store contracts.
//!
//! The core never addresses a store by connection string: it asks a
//! [`DataStore`] for a realm-bound [`StoreHandle`] and speaks generic
//! CRUD/query primitives keyed by collection name and equality filter.
//! Realm-to-handle mapping (and any pooling, timeouts, or retries) is the
//! store implementation's concern; store failures are surfaced unchanged.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::Result;

pub mod memory;

pub use memory::InMemoryDataStore;

// ═══════════════════════════════════════════════════════════════════════════════
// Query Types
// ═══════════════════════════════════════════════════════════════════════════════

/// A stored document. Always a JSON object at rest.
pub type Document = serde_json::Value;

/// Equality filter over document fields, combined with AND semantics.
///
/// Keys may use dotted paths to address nested fields, e.g.
/// `data_domain.realm`.
pub type DocFilter = BTreeMap<String, serde_json::Value>;

/// Sort specification for list queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    /// Field to sort by (dotted paths allowed).
    pub field: String,
    /// Descending instead of ascending.
    #[serde(default)]
    pub descending: bool,
}

impl SortSpec {
    pub fn ascending(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: false,
        }
    }

    pub fn descending(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: true,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Store Contracts
// ═══════════════════════════════════════════════════════════════════════════════

/// CRUD/query primitives against one realm's document store.
#[async_trait]
pub trait StoreHandle: Send + Sync {
    /// Insert a document under a unique id. A collision yields
    /// `TesseraError::DuplicateRecord`.
    async fn insert_one(&self, collection: &str, id: &str, doc: Document) -> Result<()>;

    /// Insert or replace the document stored under `id`.
    async fn replace_one(&self, collection: &str, id: &str, doc: Document) -> Result<()>;

    /// First document matching the filter, in insertion order.
    async fn find_one(&self, collection: &str, filter: &DocFilter) -> Result<Option<Document>>;

    /// Documents matching the filter. Without a sort, insertion order is
    /// stable; offset/limit apply after sorting.
    async fn find_many(
        &self,
        collection: &str,
        filter: &DocFilter,
        offset: usize,
        limit: Option<usize>,
        sort: Option<&SortSpec>,
    ) -> Result<Vec<Document>>;

    /// Delete all matching documents, returning how many were removed.
    /// Deleting zero documents is not an error.
    async fn delete_many(&self, collection: &str, filter: &DocFilter) -> Result<u64>;

    /// Number of documents matching the filter.
    async fn count(&self, collection: &str, filter: &DocFilter) -> Result<u64>;
}

/// Supplies realm-bound store handles.
pub trait DataStore: Send + Sync {
    /// Get (or lazily create) the handle for a realm.
    fn handle(&self, realm: &str) -> Result<Arc<dyn StoreHandle>>;
}
