//! Property-based test generators using proptest.
//!
//! Provides strategies for generating documents and version strings that
//! stay within the shapes the store and the exporter accept.

use mealplan_store::{Document, ObjectId};
use proptest::prelude::*;
use serde_json::{json, Value};

/// Strategy for generating object ids.
pub fn object_id_strategy() -> impl Strategy<Value = ObjectId> {
    prop::array::uniform12(any::<u8>()).prop_map(ObjectId::from_bytes)
}

/// Strategy for field names (never `_id`, never `$`-prefixed).
pub fn field_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-zA-Z0-9]{0,11}").expect("Invalid regex")
}

/// Strategy for scalar JSON values, including tricky strings.
pub fn scalar_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        (-1_000_000i64..1_000_000).prop_map(Value::from),
        (-1000i32..1000).prop_map(|n| json!(f64::from(n) / 8.0)),
        prop::string::string_regex("[ -~]{0,16}")
            .expect("Invalid regex")
            .prop_map(Value::String),
        Just(json!("line\nbreak \"quoted\" \\ tab\t")),
        Just(json!("unicode: caf\u{e9} \u{1f35d}")),
        any::<i64>().prop_map(|n| json!({"$numberLong": n.to_string()})),
        Just(json!({"$date": "2024-03-01T12:00:00.000Z"})),
    ]
}

/// Strategy for JSON values nested up to two levels.
pub fn value_strategy() -> impl Strategy<Value = Value> {
    scalar_strategy().prop_recursive(2, 16, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::btree_map(field_name_strategy(), inner, 0..4)
                .prop_map(|m| Value::Object(m.into_iter().collect())),
        ]
    })
}

/// Strategy for documents with an object id and a few fields.
pub fn document_strategy() -> impl Strategy<Value = Document> {
    (
        object_id_strategy(),
        prop::collection::btree_map(field_name_strategy(), value_strategy(), 0..6),
    )
        .prop_map(|(id, fields)| {
            let mut doc: Document = fields.into_iter().collect();
            doc.insert("_id".into(), json!({"$oid": id.to_hex()}));
            doc
        })
}

/// Strategy for batches of documents with distinct ids.
pub fn documents_strategy(max: usize) -> impl Strategy<Value = Vec<Document>> {
    prop::collection::vec(document_strategy(), 0..max).prop_map(|docs| {
        let mut seen = std::collections::HashSet::new();
        docs.into_iter()
            .filter(|d| seen.insert(d["_id"].to_string()))
            .collect()
    })
}

/// Strategy for well-formed `MAJOR.MINOR.PATCH` strings.
pub fn version_string_strategy() -> impl Strategy<Value = String> {
    (0u64..10, 0u64..30, 0u64..30).prop_map(|(a, b, c)| format!("{a}.{b}.{c}"))
}
