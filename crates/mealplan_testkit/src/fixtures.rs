//! Test fixtures and store helpers.
//!
//! Provides a small, realistic meal planner data set and a store double that
//! simulates an unreachable database.

use mealplan_store::{
    Document, DocumentStore, EngineInfo, Filter, FindOptions, IndexSpec, MemoryStore, StoreError,
    StoreResult, Update, UpdateOutcome,
};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

fn doc(value: Value) -> Document {
    value.as_object().cloned().expect("fixture documents are objects")
}

/// The seed data set as a snapshot value.
pub fn seed_snapshot() -> Value {
    json!({
        "users": [
            {"_id": {"$oid": "65f000000000000000000001"}, "name": "Admin", "email": "admin@example.com", "role": "admin"},
            {"_id": {"$oid": "65f000000000000000000002"}, "name": "Sam", "email": "sam@example.com", "role": "user"}
        ],
        "meals": [
            {"_id": {"$oid": "65f000000000000000000101"}, "name": "Tomato Soup", "servings": 4, "tags": ["vegan", "warm"],
             "createdAt": {"$date": "2024-03-01T12:00:00.000Z"}},
            {"_id": {"$oid": "65f000000000000000000102"}, "name": "Pasta Bake", "servings": 6, "tags": ["family"],
             "createdAt": {"$date": "2024-03-02T12:00:00.000Z"}},
            {"_id": {"$oid": "65f000000000000000000103"}, "name": "Green Salad", "servings": 2, "tags": ["vegan", "quick"],
             "createdAt": {"$date": "2024-03-03T12:00:00.000Z"}}
        ],
        "ingredients": [
            {"_id": {"$oid": "65f000000000000000000201"}, "name": "Tomato", "category": "produce", "unit": "kg", "price": 3.5},
            {"_id": {"$oid": "65f000000000000000000202"}, "name": "Pasta", "category": "dry goods", "unit": "g",
             "stock": {"$numberLong": "9007199254740993"}}
        ],
        "stores": [
            {"_id": {"$oid": "65f000000000000000000301"}, "name": "Corner Market", "address": "1 Main St \"North\"\nUnit 2"}
        ],
        "familymembers": [
            {"_id": {"$oid": "65f000000000000000000401"}, "name": "Alex", "dietaryRestrictions": ["nuts"]},
            {"_id": {"$oid": "65f000000000000000000402"}, "name": "Jo", "dietaryRestrictions": []}
        ],
        "mealplans": [
            {"_id": {"$oid": "65f000000000000000000501"}, "date": {"$date": "2024-03-04T00:00:00.000Z"},
             "mealType": "dinner", "meal": {"$oid": "65f000000000000000000101"}}
        ]
    })
}

/// Creates a seeded in-memory store with a unique index on `users.email`.
pub fn seeded_memory_store() -> Arc<MemoryStore> {
    let store = MemoryStore::from_snapshot(&seed_snapshot()).expect("seed snapshot is valid");
    let spec = IndexSpec::from_json(&json!({"email": 1}), Some(&json!({"unique": true})))
        .expect("valid index spec");
    store.create_index("users", spec).expect("seed users are unique");
    let spec = IndexSpec::from_json(&json!({"date": -1}), None).expect("valid index spec");
    store.create_index("mealplans", spec).expect("index creation");
    Arc::new(store)
}

/// Seeded store behind the trait object used by the services.
pub fn seeded_store() -> Arc<dyn DocumentStore> {
    seeded_memory_store()
}

/// A single test document, for ad-hoc inserts.
pub fn meal(name: &str, servings: i64) -> Document {
    doc(json!({"name": name, "servings": servings}))
}

/// A store whose every operation fails as if the database were down.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableStore;

fn down<T>() -> StoreResult<T> {
    Err(StoreError::unavailable("connection refused"))
}

impl DocumentStore for UnavailableStore {
    fn engine(&self) -> EngineInfo {
        EngineInfo {
            name: "unavailable".to_string(),
            version: "0.0.0".to_string(),
            database: "none".to_string(),
        }
    }

    fn collection_names(&self) -> StoreResult<Vec<String>> {
        down()
    }

    fn count(&self, _collection: &str, _filter: &Filter) -> StoreResult<u64> {
        down()
    }

    fn find(&self, _: &str, _: &Filter, _: &FindOptions) -> StoreResult<Vec<Document>> {
        down()
    }

    fn insert_many(&self, _: &str, _: Vec<Document>) -> StoreResult<Vec<Value>> {
        down()
    }

    fn update(&self, _: &str, _: &Filter, _: &Update, _: bool) -> StoreResult<UpdateOutcome> {
        down()
    }

    fn delete(&self, _: &str, _: &Filter, _: bool) -> StoreResult<u64> {
        down()
    }

    fn drop_collection(&self, _: &str) -> StoreResult<bool> {
        down()
    }

    fn indexes(&self, _: &str) -> StoreResult<Vec<IndexSpec>> {
        down()
    }

    fn create_index(&self, _: &str, _: IndexSpec) -> StoreResult<String> {
        down()
    }
}

/// A snapshot file in a temporary directory, removed on drop.
pub struct SnapshotFile {
    path: PathBuf,
    _dir: TempDir,
}

impl SnapshotFile {
    /// Writes the seed data set to a fresh temporary file.
    pub fn seeded() -> Self {
        let dir = TempDir::new().expect("Failed to create temp directory");
        let path = dir.path().join("mealplanner.json");
        seeded_memory_store().save(&path).expect("Failed to write snapshot");
        Self { path, _dir: dir }
    }

    /// Path of the snapshot file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}
