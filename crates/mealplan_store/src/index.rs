//! Index definitions.

use crate::document::{get_path, Document};
use crate::error::{StoreError, StoreResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Name of the implicit primary-key index.
pub const ID_INDEX_NAME: &str = "_id_";

/// Sort direction of an index key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// Ascending (`1`).
    Ascending,
    /// Descending (`-1`).
    Descending,
}

impl Direction {
    /// Numeric form used in key documents.
    #[must_use]
    pub fn as_i64(self) -> i64 {
        match self {
            Direction::Ascending => 1,
            Direction::Descending => -1,
        }
    }
}

/// Definition of an index on a collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSpec {
    /// Index name.
    pub name: String,
    /// Ordered key fields.
    pub keys: Vec<(String, Direction)>,
    /// Whether the index enforces uniqueness.
    pub unique: bool,
}

impl IndexSpec {
    /// The implicit unique index on `_id`.
    #[must_use]
    pub fn id_index() -> Self {
        Self {
            name: ID_INDEX_NAME.to_string(),
            keys: vec![("_id".to_string(), Direction::Ascending)],
            unique: true,
        }
    }

    /// Builds a spec from a key document (`{"name": 1, "date": -1}`) and an
    /// optional options document (`{"name": "...", "unique": true}`).
    pub fn from_json(keys: &Value, options: Option<&Value>) -> StoreResult<Self> {
        let key_map = match keys {
            Value::Object(map) if !map.is_empty() => map,
            _ => {
                return Err(StoreError::invalid_document(
                    "index keys must be a non-empty object",
                ))
            }
        };

        let mut parsed = Vec::with_capacity(key_map.len());
        for (field, dir) in key_map {
            let direction = match dir.as_f64() {
                Some(d) if d > 0.0 => Direction::Ascending,
                Some(d) if d < 0.0 => Direction::Descending,
                _ => {
                    return Err(StoreError::invalid_document(format!(
                        "index direction for {field} must be 1 or -1"
                    )))
                }
            };
            parsed.push((field.clone(), direction));
        }

        let name = options
            .and_then(|o| o.get("name"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| default_name(&parsed));
        let unique = options
            .and_then(|o| o.get("unique"))
            .and_then(Value::as_bool)
            .unwrap_or(false);

        Ok(Self {
            name,
            keys: parsed,
            unique,
        })
    }

    /// Key document form (`{"name": 1}`).
    #[must_use]
    pub fn key_document(&self) -> Value {
        let mut map = Map::new();
        for (field, dir) in &self.keys {
            map.insert(field.clone(), Value::from(dir.as_i64()));
        }
        Value::Object(map)
    }

    /// Shell-style description (`{v: 2, key: {...}, name, unique?}`).
    #[must_use]
    pub fn to_json(&self) -> Value {
        let mut map = Map::new();
        map.insert("v".into(), Value::from(2));
        map.insert("key".into(), self.key_document());
        map.insert("name".into(), Value::String(self.name.clone()));
        if self.unique && self.name != ID_INDEX_NAME {
            map.insert("unique".into(), Value::Bool(true));
        }
        Value::Object(map)
    }

    /// Extracts the key tuple of a document for uniqueness checks.
    #[must_use]
    pub fn extract_key(&self, doc: &Document) -> Vec<Value> {
        self.keys
            .iter()
            .map(|(field, _)| get_path(doc, field).cloned().unwrap_or(Value::Null))
            .collect()
    }
}

fn default_name(keys: &[(String, Direction)]) -> String {
    keys.iter()
        .map(|(field, dir)| format!("{field}_{}", dir.as_i64()))
        .collect::<Vec<_>>()
        .join("_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn default_names() {
        let spec = IndexSpec::from_json(&json!({"date": -1, "meal": 1}), None).unwrap();
        assert_eq!(spec.name, "date_-1_meal_1");
        assert!(!spec.unique);
    }

    #[test]
    fn explicit_options() {
        let spec =
            IndexSpec::from_json(&json!({"email": 1}), Some(&json!({"name": "by_email", "unique": true})))
                .unwrap();
        assert_eq!(spec.name, "by_email");
        assert!(spec.unique);
        assert_eq!(
            spec.to_json(),
            json!({"v": 2, "key": {"email": 1}, "name": "by_email", "unique": true})
        );
    }

    #[test]
    fn rejects_bad_keys() {
        assert!(IndexSpec::from_json(&json!({}), None).is_err());
        assert!(IndexSpec::from_json(&json!({"a": "text"}), None).is_err());
    }
}
