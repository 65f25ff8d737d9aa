//! The document store abstraction.

use crate::document::Document;
use crate::error::StoreResult;
use crate::filter::Filter;
use crate::index::IndexSpec;
use crate::update::Update;
use serde::Serialize;
use serde_json::Value;

/// Identifies the engine behind a store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineInfo {
    /// Engine name (e.g. `memory`).
    pub name: String,
    /// Engine version.
    pub version: String,
    /// Logical database name.
    pub database: String,
}

/// Options for [`DocumentStore::find`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    /// Number of matching documents to skip.
    pub skip: usize,
    /// Maximum number of documents to return.
    pub limit: Option<usize>,
    /// Sort keys, applied in order (`1` ascending, `-1` descending).
    pub sort: Vec<(String, i64)>,
}

impl FindOptions {
    /// Options returning at most `limit` documents.
    #[must_use]
    pub fn limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Self::default()
        }
    }
}

/// Outcome of an update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateOutcome {
    /// Documents matched by the filter.
    pub matched_count: u64,
    /// Documents actually changed.
    pub modified_count: u64,
}

/// Access layer over a document database.
///
/// Implementations are shared across concurrent requests; every method takes
/// `&self`. Reads of unknown collections behave as reads of empty ones, and
/// writes create collections on demand.
pub trait DocumentStore: Send + Sync {
    /// Describes the engine.
    fn engine(&self) -> EngineInfo;

    /// Names of the collections that currently exist.
    fn collection_names(&self) -> StoreResult<Vec<String>>;

    /// Counts documents matching `filter`.
    fn count(&self, collection: &str, filter: &Filter) -> StoreResult<u64>;

    /// Returns documents matching `filter`.
    fn find(
        &self,
        collection: &str,
        filter: &Filter,
        options: &FindOptions,
    ) -> StoreResult<Vec<Document>>;

    /// Inserts documents, assigning `_id` where absent. Returns the ids in order.
    fn insert_many(&self, collection: &str, docs: Vec<Document>) -> StoreResult<Vec<Value>>;

    /// Applies `update` to the first (or, with `multi`, every) matching document.
    fn update(
        &self,
        collection: &str,
        filter: &Filter,
        update: &Update,
        multi: bool,
    ) -> StoreResult<UpdateOutcome>;

    /// Deletes the first (or, with `multi`, every) matching document.
    fn delete(&self, collection: &str, filter: &Filter, multi: bool) -> StoreResult<u64>;

    /// Drops a collection. Returns whether it existed.
    fn drop_collection(&self, collection: &str) -> StoreResult<bool>;

    /// Index definitions of a collection, `_id_` first.
    fn indexes(&self, collection: &str) -> StoreResult<Vec<IndexSpec>>;

    /// Creates an index (idempotent for identical specs). Returns its name.
    fn create_index(&self, collection: &str, spec: IndexSpec) -> StoreResult<String>;
}
