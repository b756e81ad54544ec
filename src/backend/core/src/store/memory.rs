//! In-memory reference implementation of the store contracts.
//!
//! Backs the test suite and single-process deployments. Each realm gets its
//! own isolated handle; collections preserve insertion order so unsorted
//! reads are stable.

use async_trait::async_trait;
use dashmap::DashMap;
use std::cmp::Ordering;
use std::sync::Arc;

use super::{DataStore, DocFilter, Document, SortSpec, StoreHandle};
use crate::error::{Result, TesseraError};

// ═══════════════════════════════════════════════════════════════════════════════
// Data Store
// ═══════════════════════════════════════════════════════════════════════════════

/// Realm-keyed in-memory document store.
#[derive(Debug, Default)]
pub struct InMemoryDataStore {
    realms: DashMap<String, Arc<InMemoryHandle>>,
}

impl InMemoryDataStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DataStore for InMemoryDataStore {
    fn handle(&self, realm: &str) -> Result<Arc<dyn StoreHandle>> {
        let handle = self
            .realms
            .entry(realm.to_string())
            .or_insert_with(|| Arc::new(InMemoryHandle::default()))
            .clone();
        Ok(handle)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Store Handle
// ═══════════════════════════════════════════════════════════════════════════════

/// One realm's collections. Documents are kept as `(id, doc)` pairs in
/// insertion order.
#[derive(Debug, Default)]
pub struct InMemoryHandle {
    collections: DashMap<String, Vec<(String, Document)>>,
}

#[async_trait]
impl StoreHandle for InMemoryHandle {
    async fn insert_one(&self, collection: &str, id: &str, doc: Document) -> Result<()> {
        let mut docs = self.collections.entry(collection.to_string()).or_default();
        if docs.iter().any(|(existing, _)| existing == id) {
            return Err(TesseraError::DuplicateRecord {
                collection: collection.to_string(),
                id: id.to_string(),
            });
        }
        docs.push((id.to_string(), doc));
        Ok(())
    }

    async fn replace_one(&self, collection: &str, id: &str, doc: Document) -> Result<()> {
        let mut docs = self.collections.entry(collection.to_string()).or_default();
        match docs.iter_mut().find(|(existing, _)| existing == id) {
            Some(slot) => slot.1 = doc,
            None => docs.push((id.to_string(), doc)),
        }
        Ok(())
    }

    async fn find_one(&self, collection: &str, filter: &DocFilter) -> Result<Option<Document>> {
        Ok(self.collections.get(collection).and_then(|docs| {
            docs.iter()
                .find(|(_, doc)| matches_filter(doc, filter))
                .map(|(_, doc)| doc.clone())
        }))
    }

    async fn find_many(
        &self,
        collection: &str,
        filter: &DocFilter,
        offset: usize,
        limit: Option<usize>,
        sort: Option<&SortSpec>,
    ) -> Result<Vec<Document>> {
        let mut matched: Vec<Document> = match self.collections.get(collection) {
            Some(docs) => docs
                .iter()
                .filter(|(_, doc)| matches_filter(doc, filter))
                .map(|(_, doc)| doc.clone())
                .collect(),
            None => Vec::new(),
        };

        if let Some(spec) = sort {
            matched.sort_by(|a, b| {
                let ord = compare_values(
                    lookup_path(a, &spec.field),
                    lookup_path(b, &spec.field),
                );
                if spec.descending {
                    ord.reverse()
                } else {
                    ord
                }
            });
        }

        let page = matched
            .into_iter()
            .skip(offset)
            .take(limit.unwrap_or(usize::MAX))
            .collect();
        Ok(page)
    }

    async fn delete_many(&self, collection: &str, filter: &DocFilter) -> Result<u64> {
        let Some(mut docs) = self.collections.get_mut(collection) else {
            return Ok(0);
        };
        let before = docs.len();
        docs.retain(|(_, doc)| !matches_filter(doc, filter));
        Ok((before - docs.len()) as u64)
    }

    async fn count(&self, collection: &str, filter: &DocFilter) -> Result<u64> {
        Ok(self.collections.get(collection).map_or(0, |docs| {
            docs.iter()
                .filter(|(_, doc)| matches_filter(doc, filter))
                .count() as u64
        }))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Filter / Sort Helpers
// ═══════════════════════════════════════════════════════════════════════════════

/// Resolve a possibly-dotted field path inside a document.
fn lookup_path<'a>(doc: &'a Document, path: &str) -> Option<&'a serde_json::Value> {
    let mut current = doc;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

/// All filter terms must match (AND); a missing field never matches.
fn matches_filter(doc: &Document, filter: &DocFilter) -> bool {
    filter
        .iter()
        .all(|(path, expected)| lookup_path(doc, path) == Some(expected))
}

/// Total order over JSON values for sorting: null < bool < number < string,
/// anything else compared by serialized form.
fn compare_values(a: Option<&serde_json::Value>, b: Option<&serde_json::Value>) -> Ordering {
    use serde_json::Value;
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => match (a, b) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
            (Value::Number(x), Value::Number(y)) => x
                .as_f64()
                .partial_cmp(&y.as_f64())
                .unwrap_or(Ordering::Equal),
            (Value::String(x), Value::String(y)) => x.cmp(y),
            _ => a.to_string().cmp(&b.to_string()),
        },
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
