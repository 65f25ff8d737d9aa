//! JSON documents and extended-JSON helpers.
//!
//! Documents are plain JSON objects. Values that JSON cannot express natively
//! use the MongoDB extended-JSON wrappers:
//!
//! ```text
//! {"$oid": "65f0c0ffee0123456789abcd"}      ObjectId
//! {"$date": "2024-03-01T12:00:00.000Z"}     date
//! {"$numberLong": "9007199254740993"}       64-bit integer
//! ```

use crate::object_id::ObjectId;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};
use std::cmp::Ordering;

/// A stored record.
pub type Document = Map<String, Value>;

/// Wraps an object id as extended JSON.
#[must_use]
pub fn oid_value(id: ObjectId) -> Value {
    let mut map = Map::new();
    map.insert("$oid".into(), Value::String(id.to_hex()));
    Value::Object(map)
}

/// Wraps a timestamp as extended JSON.
#[must_use]
pub fn date_value(dt: DateTime<Utc>) -> Value {
    let mut map = Map::new();
    map.insert(
        "$date".into(),
        Value::String(dt.to_rfc3339_opts(SecondsFormat::Millis, true)),
    );
    Value::Object(map)
}

/// Wraps a 64-bit integer as extended JSON.
#[must_use]
pub fn long_value(n: i64) -> Value {
    let mut map = Map::new();
    map.insert("$numberLong".into(), Value::String(n.to_string()));
    Value::Object(map)
}

fn single_key<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    match value {
        Value::Object(map) if map.len() == 1 => map.get(key).and_then(Value::as_str),
        _ => None,
    }
}

/// Reads an extended-JSON object id.
#[must_use]
pub fn as_object_id(value: &Value) -> Option<ObjectId> {
    single_key(value, "$oid").and_then(ObjectId::parse)
}

/// Reads an extended-JSON date.
#[must_use]
pub fn as_date(value: &Value) -> Option<DateTime<Utc>> {
    single_key(value, "$date")
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

/// Reads an extended-JSON 64-bit integer.
#[must_use]
pub fn as_long(value: &Value) -> Option<i64> {
    single_key(value, "$numberLong").and_then(|s| s.parse().ok())
}

/// Numeric view of a value, accepting plain numbers and `$numberLong`.
#[must_use]
pub fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        other => as_long(other).map(|n| n as f64),
    }
}

/// Looks up a dotted path (`address.city`) in a document.
#[must_use]
pub fn get_path<'a>(doc: &'a Document, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let first = parts.next()?;
    let mut current = doc.get(first)?;
    for part in parts {
        current = match current {
            Value::Object(map) => map.get(part)?,
            Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Sets a dotted path, creating intermediate objects as needed.
///
/// Returns false when an intermediate segment exists but is not an object.
pub fn set_path(doc: &mut Document, path: &str, value: Value) -> bool {
    match path.split_once('.') {
        None => {
            doc.insert(path.to_string(), value);
            true
        }
        Some((head, rest)) => {
            let child = doc
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            match child {
                Value::Object(map) => set_path(map, rest, value),
                _ => false,
            }
        }
    }
}

/// Removes a dotted path. Returns the removed value, if any.
pub fn remove_path(doc: &mut Document, path: &str) -> Option<Value> {
    match path.split_once('.') {
        None => doc.remove(path),
        Some((head, rest)) => match doc.get_mut(head)? {
            Value::Object(map) => remove_path(map, rest),
            _ => None,
        },
    }
}

/// Type rank used to order values of different kinds.
fn type_rank(value: &Value) -> u8 {
    if as_f64(value).is_some() {
        return 2;
    }
    if as_object_id(value).is_some() {
        return 6;
    }
    if as_date(value).is_some() {
        return 8;
    }
    match value {
        Value::Null => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Object(_) => 4,
        Value::Array(_) => 5,
        Value::Bool(_) => 7,
    }
}

/// Total ordering over JSON values, following the store's sort order:
/// null < numbers < strings < objects < arrays < object ids < booleans < dates.
#[must_use]
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    let (ra, rb) = (type_rank(a), type_rank(b));
    if ra != rb {
        return ra.cmp(&rb);
    }
    match ra {
        2 => {
            let (x, y) = (as_f64(a).unwrap_or(0.0), as_f64(b).unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        6 => as_object_id(a).cmp(&as_object_id(b)),
        8 => as_date(a).cmp(&as_date(b)),
        _ => match (a, b) {
            (Value::String(x), Value::String(y)) => x.cmp(y),
            (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
            (Value::Array(x), Value::Array(y)) => {
                for (l, r) in x.iter().zip(y.iter()) {
                    let ord = compare_values(l, r);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                x.len().cmp(&y.len())
            }
            (Value::Object(x), Value::Object(y)) => {
                for ((lk, lv), (rk, rv)) in x.iter().zip(y.iter()) {
                    let ord = lk.cmp(rk).then_with(|| compare_values(lv, rv));
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                x.len().cmp(&y.len())
            }
            _ => Ordering::Equal,
        },
    }
}

/// Equality with numeric normalisation (`1 == 1.0 == {"$numberLong": "1"}`).
#[must_use]
pub fn values_equal(a: &Value, b: &Value) -> bool {
    if let (Some(x), Some(y)) = (as_f64(a), as_f64(b)) {
        return x == y;
    }
    match (a, b) {
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y.iter()).all(|(l, r)| values_equal(l, r))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x.iter()
                    .zip(y.iter())
                    .all(|((lk, lv), (rk, rv))| lk == rk && values_equal(lv, rv))
        }
        _ => a == b,
    }
}

/// Sorted field names of a document.
#[must_use]
pub fn field_names(doc: &Document) -> Vec<String> {
    let mut names: Vec<String> = doc.keys().cloned().collect();
    names.sort();
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn extended_json_roundtrip() {
        let id = ObjectId::new();
        assert_eq!(as_object_id(&oid_value(id)), Some(id));
        assert_eq!(as_long(&long_value(-42)), Some(-42));

        let now = Utc::now();
        let back = as_date(&date_value(now)).unwrap();
        assert_eq!(back.timestamp_millis(), now.timestamp_millis());
    }

    #[test]
    fn wrappers_require_single_key() {
        assert!(as_object_id(&json!({"$oid": "65f0c0ffee0123456789abcd", "x": 1})).is_none());
        assert!(as_date(&json!({"$date": 5})).is_none());
    }

    #[test]
    fn dotted_paths() {
        let mut d = doc(json!({"address": {"city": "Oslo"}, "tags": ["a", "b"]}));
        assert_eq!(get_path(&d, "address.city"), Some(&json!("Oslo")));
        assert_eq!(get_path(&d, "tags.1"), Some(&json!("b")));
        assert_eq!(get_path(&d, "address.zip"), None);

        assert!(set_path(&mut d, "address.zip", json!("0150")));
        assert!(set_path(&mut d, "meta.source", json!("import")));
        assert_eq!(get_path(&d, "meta.source"), Some(&json!("import")));
        assert!(!set_path(&mut d, "tags.x", json!(1)));

        assert_eq!(remove_path(&mut d, "address.city"), Some(json!("Oslo")));
        assert_eq!(get_path(&d, "address.city"), None);
    }

    #[test]
    fn numeric_equality() {
        assert!(values_equal(&json!(1), &json!(1.0)));
        assert!(values_equal(&json!(7), &long_value(7)));
        assert!(!values_equal(&json!("1"), &json!(1)));
    }

    #[test]
    fn cross_type_order() {
        assert_eq!(compare_values(&Value::Null, &json!(0)), Ordering::Less);
        assert_eq!(compare_values(&json!(10), &json!("a")), Ordering::Less);
        assert_eq!(compare_values(&json!(2), &json!(10)), Ordering::Less);
        assert_eq!(compare_values(&json!("b"), &json!("a")), Ordering::Greater);
    }

    #[test]
    fn field_names_sorted() {
        let d = doc(json!({"z": 1, "a": 2, "_id": 3}));
        assert_eq!(field_names(&d), vec!["_id", "a", "z"]);
    }

    fn leaf() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            (-50i64..50).prop_map(|n| json!(n)),
            (-50.0f64..50.0).prop_map(|n| json!(n)),
            "[a-c]{0,3}".prop_map(Value::String),
            any::<[u8; 12]>().prop_map(|b| oid_value(ObjectId::from_bytes(b))),
            (-5i64..5).prop_map(long_value),
        ]
    }

    fn value() -> impl Strategy<Value = Value> {
        leaf().prop_recursive(2, 12, 3, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..3).prop_map(Value::Array),
                prop::collection::btree_map("[a-b]", inner, 0..3)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        })
    }

    proptest! {
        #[test]
        fn ordering_is_a_total_order(a in value(), b in value(), c in value()) {
            prop_assert_eq!(compare_values(&a, &a), Ordering::Equal);
            prop_assert_eq!(compare_values(&a, &b), compare_values(&b, &a).reverse());
            if compare_values(&a, &b) != Ordering::Greater && compare_values(&b, &c) != Ordering::Greater {
                prop_assert_ne!(compare_values(&a, &c), Ordering::Greater);
            }
        }

        #[test]
        fn equal_values_compare_equal(a in value(), b in value()) {
            if values_equal(&a, &b) {
                prop_assert_eq!(compare_values(&a, &b), Ordering::Equal);
            }
        }
    }
}
