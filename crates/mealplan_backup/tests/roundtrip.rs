//! Restoring a script dump through the sandbox reproduces the source data.

use std::sync::Arc;

use mealplan_backup::{
    BackupConfig, CollectionRegistry, ExportFormat, ExportRequest, Exporter, ScriptSandbox,
};
use mealplan_store::{
    document::values_equal, Document, DocumentStore, Filter, FindOptions, MemoryStore,
};
use mealplan_testkit::fixtures::seeded_store;
use mealplan_testkit::generators::documents_strategy;
use proptest::prelude::*;
use serde_json::Value;

fn exporter(store: Arc<dyn DocumentStore>) -> Exporter {
    Exporter::new(
        store,
        Arc::new(CollectionRegistry::meal_planner()),
        BackupConfig::default(),
    )
}

fn all(store: &dyn DocumentStore, collection: &str) -> Vec<Document> {
    store
        .find(collection, &Filter::All, &FindOptions::default())
        .unwrap()
}

fn assert_same_documents(expected: &[Document], actual: &[Document]) {
    assert_eq!(expected.len(), actual.len());
    for doc in expected {
        let found = actual
            .iter()
            .find(|other| values_equal(&doc["_id"], &other["_id"]))
            .unwrap_or_else(|| panic!("missing document {}", doc["_id"]));
        assert!(
            values_equal(&Value::Object(doc.clone()), &Value::Object(found.clone())),
            "expected {doc:?}, restored {found:?}"
        );
    }
}

fn restore(script: &str) -> Arc<MemoryStore> {
    let target = Arc::new(MemoryStore::new());
    let result = ScriptSandbox::new(target.clone()).execute(script);
    assert!(result.success, "restore failed: {:?}", result.error);
    target
}

#[test]
fn test_script_dump_restores_every_collection() {
    let source = seeded_store();
    let payload = exporter(source.clone())
        .generate(&ExportRequest::all(ExportFormat::ScriptDump))
        .unwrap();

    let target = restore(&payload.body);

    for def in CollectionRegistry::meal_planner().iter() {
        assert_same_documents(
            &all(source.as_ref(), def.collection),
            &all(target.as_ref(), def.collection),
        );
    }
}

#[test]
fn test_script_dump_restores_indexes() {
    let source = seeded_store();
    let payload = exporter(source.clone())
        .generate(&ExportRequest::all(ExportFormat::ScriptDump).with_indexes(true))
        .unwrap();

    let target = restore(&payload.body);

    assert_eq!(
        source.indexes("users").unwrap(),
        target.indexes("users").unwrap()
    );
    assert_eq!(
        source.indexes("mealplans").unwrap(),
        target.indexes("mealplans").unwrap()
    );
}

#[test]
fn test_restore_replaces_existing_data() {
    let source = seeded_store();
    let payload = exporter(source.clone())
        .generate(&ExportRequest::all(ExportFormat::ScriptDump).with_collections(["Meal"]))
        .unwrap();

    let target = Arc::new(MemoryStore::new());
    target
        .insert_many("meals", vec![mealplan_testkit::fixtures::meal("Stale", 1)])
        .unwrap();
    let result = ScriptSandbox::new(target.clone()).execute(&payload.body);
    assert!(result.success, "restore failed: {:?}", result.error);

    assert_same_documents(&all(source.as_ref(), "meals"), &all(target.as_ref(), "meals"));
}

#[test]
fn test_restore_output_reports_progress() {
    let payload = exporter(seeded_store())
        .generate(&ExportRequest::all(ExportFormat::ScriptDump))
        .unwrap();

    let result = ScriptSandbox::new(Arc::new(MemoryStore::new())).execute(&payload.body);
    assert!(result.success);
    assert!(result.output[0].starts_with("Script execution initiated at "));
    assert!(result.output.len() > 1);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_generated_documents_survive_restore(docs in documents_strategy(8)) {
        let source = Arc::new(MemoryStore::new());
        if !docs.is_empty() {
            source.insert_many("meals", docs).unwrap();
        }
        let payload = exporter(source.clone())
            .generate(&ExportRequest::all(ExportFormat::ScriptDump).with_collections(["Meal"]))
            .unwrap();

        let target = restore(&payload.body);

        let expected = all(source.as_ref(), "meals");
        let restored = all(target.as_ref(), "meals");
        prop_assert_eq!(expected.len(), restored.len());
        assert_same_documents(&expected, &restored);
    }
}
