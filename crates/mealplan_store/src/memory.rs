//! In-memory document store.

use crate::document::{compare_values, get_path, oid_value, Document};
use crate::error::{StoreError, StoreResult};
use crate::filter::Filter;
use crate::index::{IndexSpec, ID_INDEX_NAME};
use crate::object_id::ObjectId;
use crate::store::{DocumentStore, EngineInfo, FindOptions, UpdateOutcome};
use crate::update::Update;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::debug;

#[derive(Debug, Clone)]
struct CollectionData {
    docs: Vec<Document>,
    indexes: Vec<IndexSpec>,
}

impl Default for CollectionData {
    fn default() -> Self {
        Self {
            docs: Vec::new(),
            indexes: vec![IndexSpec::id_index()],
        }
    }
}

impl CollectionData {
    /// Rejects `candidate` if it collides with another document on a unique
    /// index. `skip` excludes the document being replaced.
    fn check_unique(
        &self,
        collection: &str,
        candidate: &Document,
        skip: Option<usize>,
    ) -> StoreResult<()> {
        for index in self.indexes.iter().filter(|i| i.unique) {
            let key = index.extract_key(candidate);
            let clash = self.docs.iter().enumerate().any(|(pos, doc)| {
                Some(pos) != skip
                    && index
                        .extract_key(doc)
                        .iter()
                        .zip(key.iter())
                        .all(|(a, b)| compare_values(a, b) == Ordering::Equal)
            });
            if clash {
                return Err(StoreError::DuplicateKey {
                    collection: collection.to_string(),
                    index: index.name.clone(),
                    key: Value::Array(key).to_string(),
                });
            }
        }
        Ok(())
    }
}

/// A document store that keeps every collection in memory.
///
/// Suitable for:
/// - Unit and integration tests
/// - The CLI, which loads and saves JSON snapshot files
/// - Demo deployments without an external database
///
/// # Thread Safety
///
/// The store is guarded by a single reader-writer lock and can be shared
/// across threads behind an `Arc`.
///
/// # Example
///
/// ```rust
/// use mealplan_store::{DocumentStore, Filter, MemoryStore};
/// use serde_json::json;
///
/// let store = MemoryStore::new();
/// let doc = json!({"name": "Pasta"}).as_object().cloned().unwrap();
/// store.insert_many("meals", vec![doc]).unwrap();
/// assert_eq!(store.count("meals", &Filter::All).unwrap(), 1);
/// ```
#[derive(Debug)]
pub struct MemoryStore {
    database: String,
    collections: RwLock<BTreeMap<String, CollectionData>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::with_name("mealplanner")
    }
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty store reporting the given database name.
    #[must_use]
    pub fn with_name(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            collections: RwLock::new(BTreeMap::new()),
        }
    }

    /// Builds a store from a snapshot (`{"<collection>": [documents...]}`).
    pub fn from_snapshot(snapshot: &Value) -> StoreResult<Self> {
        let store = Self::new();
        let map = snapshot
            .as_object()
            .ok_or_else(|| StoreError::invalid_document("snapshot must be an object"))?;
        for (name, docs) in map {
            let docs = docs.as_array().ok_or_else(|| {
                StoreError::invalid_document(format!("snapshot entry {name} must be an array"))
            })?;
            let docs = docs
                .iter()
                .map(|d| {
                    d.as_object().cloned().ok_or_else(|| {
                        StoreError::invalid_document(format!("{name} contains a non-object"))
                    })
                })
                .collect::<StoreResult<Vec<_>>>()?;
            store.insert_many(name, docs)?;
        }
        Ok(store)
    }

    /// Serialises every collection into a snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Value {
        let collections = self.collections.read();
        let mut out = Map::new();
        for (name, data) in collections.iter() {
            let docs = data.docs.iter().cloned().map(Value::Object).collect();
            out.insert(name.clone(), Value::Array(docs));
        }
        Value::Object(out)
    }

    /// Loads a snapshot file.
    pub fn load(path: &Path) -> StoreResult<Self> {
        let text = fs::read_to_string(path)?;
        let value: Value = serde_json::from_str(&text)?;
        debug!("loaded snapshot from {:?}", path);
        Self::from_snapshot(&value)
    }

    /// Writes a snapshot file.
    pub fn save(&self, path: &Path) -> StoreResult<()> {
        let text = serde_json::to_string_pretty(&self.snapshot())?;
        fs::write(path, text)?;
        debug!("saved snapshot to {:?}", path);
        Ok(())
    }
}

fn sort_docs(docs: &mut [Document], sort: &[(String, i64)]) {
    if sort.is_empty() {
        return;
    }
    docs.sort_by(|a, b| {
        for (field, dir) in sort {
            let null = Value::Null;
            let l = get_path(a, field).unwrap_or(&null);
            let r = get_path(b, field).unwrap_or(&null);
            let ord = compare_values(l, r);
            let ord = if *dir < 0 { ord.reverse() } else { ord };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
}

impl DocumentStore for MemoryStore {
    fn engine(&self) -> EngineInfo {
        EngineInfo {
            name: "memory".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            database: self.database.clone(),
        }
    }

    fn collection_names(&self) -> StoreResult<Vec<String>> {
        Ok(self.collections.read().keys().cloned().collect())
    }

    fn count(&self, collection: &str, filter: &Filter) -> StoreResult<u64> {
        let collections = self.collections.read();
        Ok(collections.get(collection).map_or(0, |c| {
            c.docs.iter().filter(|d| filter.matches(d)).count() as u64
        }))
    }

    fn find(
        &self,
        collection: &str,
        filter: &Filter,
        options: &FindOptions,
    ) -> StoreResult<Vec<Document>> {
        debug!("find in {} ({:?})", collection, options);
        let collections = self.collections.read();
        let Some(data) = collections.get(collection) else {
            return Ok(Vec::new());
        };

        let mut docs: Vec<Document> = data
            .docs
            .iter()
            .filter(|d| filter.matches(d))
            .cloned()
            .collect();
        sort_docs(&mut docs, &options.sort);

        Ok(docs
            .into_iter()
            .skip(options.skip)
            .take(options.limit.unwrap_or(usize::MAX))
            .collect())
    }

    fn insert_many(&self, collection: &str, docs: Vec<Document>) -> StoreResult<Vec<Value>> {
        let mut collections = self.collections.write();
        let data = collections.entry(collection.to_string()).or_default();

        // Validate the whole batch before touching the collection.
        let mut staged = data.clone();
        let mut ids = Vec::with_capacity(docs.len());
        for mut doc in docs {
            let id = doc
                .entry("_id".to_string())
                .or_insert_with(|| oid_value(ObjectId::new()))
                .clone();
            staged.check_unique(collection, &doc, None)?;
            staged.docs.push(doc);
            ids.push(id);
        }
        *data = staged;
        debug!("inserted {} documents into {}", ids.len(), collection);
        Ok(ids)
    }

    fn update(
        &self,
        collection: &str,
        filter: &Filter,
        update: &Update,
        multi: bool,
    ) -> StoreResult<UpdateOutcome> {
        let mut collections = self.collections.write();
        let Some(data) = collections.get_mut(collection) else {
            return Ok(UpdateOutcome::default());
        };

        let mut outcome = UpdateOutcome::default();
        let mut staged = data.clone();
        for pos in 0..staged.docs.len() {
            if !filter.matches(&staged.docs[pos]) {
                continue;
            }
            outcome.matched_count += 1;
            let mut doc = staged.docs[pos].clone();
            if update.apply(&mut doc)? {
                staged.check_unique(collection, &doc, Some(pos))?;
                staged.docs[pos] = doc;
                outcome.modified_count += 1;
            }
            if !multi {
                break;
            }
        }
        *data = staged;
        Ok(outcome)
    }

    fn delete(&self, collection: &str, filter: &Filter, multi: bool) -> StoreResult<u64> {
        let mut collections = self.collections.write();
        let Some(data) = collections.get_mut(collection) else {
            return Ok(0);
        };

        if multi {
            let before = data.docs.len();
            data.docs.retain(|d| !filter.matches(d));
            Ok((before - data.docs.len()) as u64)
        } else {
            match data.docs.iter().position(|d| filter.matches(d)) {
                Some(pos) => {
                    data.docs.remove(pos);
                    Ok(1)
                }
                None => Ok(0),
            }
        }
    }

    fn drop_collection(&self, collection: &str) -> StoreResult<bool> {
        Ok(self.collections.write().remove(collection).is_some())
    }

    fn indexes(&self, collection: &str) -> StoreResult<Vec<IndexSpec>> {
        let collections = self.collections.read();
        Ok(collections
            .get(collection)
            .map_or_else(|| vec![IndexSpec::id_index()], |c| c.indexes.clone()))
    }

    fn create_index(&self, collection: &str, spec: IndexSpec) -> StoreResult<String> {
        let mut collections = self.collections.write();
        let data = collections.entry(collection.to_string()).or_default();

        if let Some(existing) = data.indexes.iter().find(|i| i.name == spec.name) {
            if existing.keys == spec.keys && existing.unique == spec.unique {
                return Ok(spec.name);
            }
            return Err(StoreError::invalid_document(format!(
                "index {} already exists with a different definition",
                spec.name
            )));
        }
        if spec.name == ID_INDEX_NAME {
            return Err(StoreError::invalid_document("cannot redefine the _id_ index"));
        }

        let mut staged = data.clone();
        staged.indexes.push(spec.clone());
        for (pos, doc) in staged.docs.iter().enumerate() {
            staged.check_unique(collection, doc, Some(pos))?;
        }
        *data = staged;
        Ok(spec.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    fn filter(value: Value) -> Filter {
        Filter::parse(&value).unwrap()
    }

    fn seeded() -> MemoryStore {
        let store = MemoryStore::new();
        store
            .insert_many(
                "meals",
                vec![
                    doc(json!({"name": "Soup", "servings": 2})),
                    doc(json!({"name": "Pasta", "servings": 4})),
                    doc(json!({"name": "Salad", "servings": 1})),
                ],
            )
            .unwrap();
        store
    }

    #[test]
    fn insert_assigns_ids() {
        let store = seeded();
        let docs = store.find("meals", &Filter::All, &FindOptions::default()).unwrap();
        assert_eq!(docs.len(), 3);
        for d in &docs {
            assert!(crate::document::as_object_id(&d["_id"]).is_some());
        }
    }

    #[test]
    fn missing_collection_reads_empty() {
        let store = MemoryStore::new();
        assert_eq!(store.count("nothing", &Filter::All).unwrap(), 0);
        assert!(store
            .find("nothing", &Filter::All, &FindOptions::default())
            .unwrap()
            .is_empty());
        assert_eq!(store.indexes("nothing").unwrap(), vec![IndexSpec::id_index()]);
    }

    #[test]
    fn find_sort_skip_limit() {
        let store = seeded();
        let opts = FindOptions {
            skip: 1,
            limit: Some(1),
            sort: vec![("servings".into(), -1)],
        };
        let docs = store.find("meals", &Filter::All, &opts).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0]["name"], json!("Soup"));
    }

    #[test]
    fn duplicate_id_rejected_atomically() {
        let store = MemoryStore::new();
        let result = store.insert_many(
            "meals",
            vec![doc(json!({"_id": 1, "name": "a"})), doc(json!({"_id": 1, "name": "b"}))],
        );
        assert!(matches!(result, Err(StoreError::DuplicateKey { .. })));
        assert_eq!(store.count("meals", &Filter::All).unwrap(), 0);
    }

    #[test]
    fn update_one_and_many() {
        let store = seeded();
        let inc = Update::parse(&json!({"$inc": {"servings": 1}})).unwrap();

        let one = store.update("meals", &Filter::All, &inc, false).unwrap();
        assert_eq!(one.matched_count, 1);

        let many = store
            .update("meals", &filter(json!({"servings": {"$gte": 2}})), &inc, true)
            .unwrap();
        assert_eq!(many.matched_count, 2);
        assert_eq!(many.modified_count, 2);
    }

    #[test]
    fn delete_one_and_many() {
        let store = seeded();
        assert_eq!(store.delete("meals", &Filter::All, false).unwrap(), 1);
        assert_eq!(store.delete("meals", &Filter::All, true).unwrap(), 2);
        assert_eq!(store.count("meals", &Filter::All).unwrap(), 0);
    }

    #[test]
    fn unique_index_enforced() {
        let store = seeded();
        let spec = IndexSpec::from_json(&json!({"name": 1}), Some(&json!({"unique": true}))).unwrap();
        assert_eq!(store.create_index("meals", spec.clone()).unwrap(), "name_1");
        assert_eq!(store.create_index("meals", spec).unwrap(), "name_1");

        let err = store
            .insert_many("meals", vec![doc(json!({"name": "Soup"}))])
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateKey { .. }));
        assert_eq!(store.indexes("meals").unwrap().len(), 2);
    }

    #[test]
    fn unique_index_creation_fails_on_existing_duplicates() {
        let store = MemoryStore::new();
        store
            .insert_many("stores", vec![doc(json!({"name": "A"})), doc(json!({"name": "A"}))])
            .unwrap();
        let spec = IndexSpec::from_json(&json!({"name": 1}), Some(&json!({"unique": true}))).unwrap();
        assert!(store.create_index("stores", spec).is_err());
        assert_eq!(store.indexes("stores").unwrap().len(), 1);
    }

    #[test]
    fn drop_collection() {
        let store = seeded();
        assert!(store.drop_collection("meals").unwrap());
        assert!(!store.drop_collection("meals").unwrap());
        assert!(store.collection_names().unwrap().is_empty());
    }

    #[test]
    fn snapshot_file_roundtrip() {
        let store = seeded();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");
        store.save(&path).unwrap();

        let loaded = MemoryStore::load(&path).unwrap();
        assert_eq!(loaded.snapshot(), store.snapshot());
    }

    #[test]
    fn snapshot_rejects_non_objects() {
        assert!(MemoryStore::from_snapshot(&json!([])).is_err());
        assert!(MemoryStore::from_snapshot(&json!({"meals": [1]})).is_err());
    }
}
