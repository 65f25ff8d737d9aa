//! Query filters.
//!
//! Filters are parsed from JSON objects in the familiar document-database
//! shape:
//!
//! ```text
//! {"name": "Pasta"}                              equality
//! {"servings": {"$gte": 2, "$lt": 6}}            comparison
//! {"tags": {"$in": ["vegan", "quick"]}}          membership
//! {"$or": [{"a": 1}, {"b": {"$exists": false}}]} logical
//! ```

use crate::document::{as_date, as_f64, as_object_id, get_path, values_equal, Document};
use crate::error::{StoreError, StoreResult};
use serde_json::Value;
use std::cmp::Ordering;

/// A parsed query filter.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Matches every document.
    All,
    /// All sub-filters must match.
    And(Vec<Filter>),
    /// At least one sub-filter must match.
    Or(Vec<Filter>),
    /// A condition on one (possibly dotted) field.
    Field {
        /// Dotted field path.
        path: String,
        /// Condition applied to the field value.
        condition: Condition,
    },
}

/// A condition on a single field.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// `$eq` or a bare value.
    Eq(Value),
    /// `$ne`.
    Ne(Value),
    /// `$gt`.
    Gt(Value),
    /// `$gte`.
    Gte(Value),
    /// `$lt`.
    Lt(Value),
    /// `$lte`.
    Lte(Value),
    /// `$in`.
    In(Vec<Value>),
    /// `$nin`.
    Nin(Vec<Value>),
    /// `$exists`.
    Exists(bool),
}

/// Extended-JSON wrappers that denote a literal, not an operator document.
const LITERAL_WRAPPERS: &[&str] = &["$oid", "$date", "$numberLong"];

fn is_operator_doc(value: &Value) -> bool {
    match value {
        Value::Object(map) if !map.is_empty() => map
            .keys()
            .all(|k| k.starts_with('$') && !LITERAL_WRAPPERS.contains(&k.as_str())),
        _ => false,
    }
}

impl Filter {
    /// Parses a filter from JSON. `null` and `{}` match everything.
    pub fn parse(value: &Value) -> StoreResult<Self> {
        let map = match value {
            Value::Null => return Ok(Filter::All),
            Value::Object(map) => map,
            other => {
                return Err(StoreError::invalid_filter(format!(
                    "filter must be an object, got {other}"
                )))
            }
        };

        let mut clauses = Vec::with_capacity(map.len());
        for (key, val) in map {
            match key.as_str() {
                "$and" => clauses.push(Filter::And(Self::parse_list(key, val)?)),
                "$or" => clauses.push(Filter::Or(Self::parse_list(key, val)?)),
                op if op.starts_with('$') => {
                    return Err(StoreError::invalid_filter(format!(
                        "unknown top-level operator {op}"
                    )))
                }
                path => {
                    if is_operator_doc(val) {
                        if let Value::Object(ops) = val {
                            for (op, arg) in ops {
                                clauses.push(Filter::Field {
                                    path: path.to_string(),
                                    condition: Condition::parse(op, arg)?,
                                });
                            }
                        }
                    } else {
                        clauses.push(Filter::Field {
                            path: path.to_string(),
                            condition: Condition::Eq(val.clone()),
                        });
                    }
                }
            }
        }

        Ok(match clauses.len() {
            0 => Filter::All,
            1 => clauses.remove(0),
            _ => Filter::And(clauses),
        })
    }

    fn parse_list(op: &str, value: &Value) -> StoreResult<Vec<Filter>> {
        match value {
            Value::Array(items) if !items.is_empty() => items.iter().map(Self::parse).collect(),
            _ => Err(StoreError::invalid_filter(format!(
                "{op} requires a non-empty array"
            ))),
        }
    }

    /// Returns true if the document satisfies this filter.
    #[must_use]
    pub fn matches(&self, doc: &Document) -> bool {
        match self {
            Filter::All => true,
            Filter::And(parts) => parts.iter().all(|f| f.matches(doc)),
            Filter::Or(parts) => parts.iter().any(|f| f.matches(doc)),
            Filter::Field { path, condition } => condition.test(get_path(doc, path)),
        }
    }
}

impl Condition {
    fn parse(op: &str, arg: &Value) -> StoreResult<Self> {
        let list = |arg: &Value| match arg {
            Value::Array(items) => Ok(items.clone()),
            _ => Err(StoreError::invalid_filter(format!("{op} requires an array"))),
        };
        Ok(match op {
            "$eq" => Condition::Eq(arg.clone()),
            "$ne" => Condition::Ne(arg.clone()),
            "$gt" => Condition::Gt(arg.clone()),
            "$gte" => Condition::Gte(arg.clone()),
            "$lt" => Condition::Lt(arg.clone()),
            "$lte" => Condition::Lte(arg.clone()),
            "$in" => Condition::In(list(arg)?),
            "$nin" => Condition::Nin(list(arg)?),
            "$exists" => Condition::Exists(match arg {
                Value::Bool(b) => *b,
                Value::Null => false,
                Value::Number(n) => n.as_f64().unwrap_or(0.0) != 0.0,
                _ => true,
            }),
            other => {
                return Err(StoreError::invalid_filter(format!(
                    "unknown operator {other}"
                )))
            }
        })
    }

    fn test(&self, field: Option<&Value>) -> bool {
        match self {
            Condition::Eq(expected) => eq_matches(field, expected),
            Condition::Ne(expected) => !eq_matches(field, expected),
            Condition::Gt(bound) => cmp_matches(field, bound, |o| o == Ordering::Greater),
            Condition::Gte(bound) => cmp_matches(field, bound, |o| o != Ordering::Less),
            Condition::Lt(bound) => cmp_matches(field, bound, |o| o == Ordering::Less),
            Condition::Lte(bound) => cmp_matches(field, bound, |o| o != Ordering::Greater),
            Condition::In(options) => options.iter().any(|o| eq_matches(field, o)),
            Condition::Nin(options) => !options.iter().any(|o| eq_matches(field, o)),
            Condition::Exists(expected) => field.is_some() == *expected,
        }
    }
}

fn eq_matches(field: Option<&Value>, expected: &Value) -> bool {
    match field {
        None => expected.is_null(),
        Some(actual) => {
            values_equal(actual, expected)
                || matches!(actual, Value::Array(items) if items.iter().any(|i| values_equal(i, expected)))
        }
    }
}

/// Orders two values of the same kind; values of different kinds never compare.
fn comparable(a: &Value, b: &Value) -> Option<Ordering> {
    if let (Some(x), Some(y)) = (as_f64(a), as_f64(b)) {
        return x.partial_cmp(&y);
    }
    if let (Some(x), Some(y)) = (as_date(a), as_date(b)) {
        return Some(x.cmp(&y));
    }
    if let (Some(x), Some(y)) = (as_object_id(a), as_object_id(b)) {
        return Some(x.cmp(&y));
    }
    match (a, b) {
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn cmp_matches(field: Option<&Value>, bound: &Value, pred: impl Fn(Ordering) -> bool) -> bool {
    match field {
        None => false,
        Some(Value::Array(items)) => items
            .iter()
            .any(|i| comparable(i, bound).map_or(false, &pred)),
        Some(actual) => comparable(actual, bound).map_or(false, pred),
    }
}
