//! Update documents (`$set`, `$unset`, `$inc`, `$push`).

use crate::document::{as_f64, get_path, long_value, remove_path, set_path, Document};
use crate::error::{StoreError, StoreResult};
use serde_json::{Number, Value};

/// A single field modification.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOp {
    /// Assigns a value.
    Set(String, Value),
    /// Removes a field.
    Unset(String),
    /// Adds to a numeric field (missing fields start at zero).
    Inc(String, Value),
    /// Appends to an array field (missing fields start empty).
    Push(String, Value),
}

/// A parsed update document.
#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    ops: Vec<UpdateOp>,
}

impl Update {
    /// Parses an update document. At least one operator is required.
    pub fn parse(value: &Value) -> StoreResult<Self> {
        let map = match value {
            Value::Object(map) if !map.is_empty() => map,
            _ => {
                return Err(StoreError::invalid_update(
                    "update must be a non-empty object",
                ))
            }
        };

        let mut ops = Vec::new();
        for (op, fields) in map {
            let fields = match (op.starts_with('$'), fields) {
                (true, Value::Object(fields)) => fields,
                (false, _) => {
                    return Err(StoreError::invalid_update(
                        "update document requires atomic operators",
                    ))
                }
                (true, _) => {
                    return Err(StoreError::invalid_update(format!(
                        "{op} requires an object argument"
                    )))
                }
            };
            for (path, arg) in fields {
                if path == "_id" {
                    return Err(StoreError::invalid_update("field _id is immutable"));
                }
                let path = path.clone();
                ops.push(match op.as_str() {
                    "$set" => UpdateOp::Set(path, arg.clone()),
                    "$unset" => UpdateOp::Unset(path),
                    "$inc" => {
                        if as_f64(arg).is_none() {
                            return Err(StoreError::invalid_update(format!(
                                "$inc on {path} requires a number"
                            )));
                        }
                        UpdateOp::Inc(path, arg.clone())
                    }
                    "$push" => UpdateOp::Push(path, arg.clone()),
                    other => {
                        return Err(StoreError::invalid_update(format!(
                            "unknown update operator {other}"
                        )))
                    }
                });
            }
        }
        Ok(Self { ops })
    }

    /// Returns the parsed operations.
    #[must_use]
    pub fn ops(&self) -> &[UpdateOp] {
        &self.ops
    }

    /// Applies the update in place. Returns true if the document changed.
    pub fn apply(&self, doc: &mut Document) -> StoreResult<bool> {
        let before = doc.clone();
        for op in &self.ops {
            match op {
                UpdateOp::Set(path, value) => {
                    if !set_path(doc, path, value.clone()) {
                        return Err(StoreError::invalid_update(format!(
                            "cannot create field {path}"
                        )));
                    }
                }
                UpdateOp::Unset(path) => {
                    remove_path(doc, path);
                }
                UpdateOp::Inc(path, delta) => {
                    let current = match get_path(doc, path) {
                        None => None,
                        Some(v) => Some(as_f64(v).ok_or_else(|| {
                            StoreError::invalid_update(format!("cannot $inc non-numeric {path}"))
                        })?),
                    };
                    let next = add_numbers(current.unwrap_or(0.0), get_path(doc, path), delta);
                    set_path(doc, path, next);
                }
                UpdateOp::Push(path, value) => match get_path(doc, path).cloned() {
                    None => {
                        set_path(doc, path, Value::Array(vec![value.clone()]));
                    }
                    Some(Value::Array(mut items)) => {
                        items.push(value.clone());
                        set_path(doc, path, Value::Array(items));
                    }
                    Some(_) => {
                        return Err(StoreError::invalid_update(format!(
                            "cannot $push to non-array {path}"
                        )))
                    }
                },
            }
        }
        Ok(*doc != before)
    }
}

/// Adds `delta` to `current`, keeping integers integral and preserving
/// `$numberLong` wrappers.
fn add_numbers(current: f64, existing: Option<&Value>, delta: &Value) -> Value {
    let is_long = |v: &Value| matches!(v, Value::Object(_));
    let as_int = |v: &Value| match v {
        Value::Number(n) => n.as_i64(),
        other => crate::document::as_long(other),
    };

    match (existing.map(as_int).unwrap_or(Some(0)), as_int(delta)) {
        (Some(a), Some(b)) => {
            let sum = a.saturating_add(b);
            if existing.map_or(false, is_long) || is_long(delta) {
                long_value(sum)
            } else {
                Value::Number(sum.into())
            }
        }
        _ => {
            let sum = current + as_f64(delta).unwrap_or(0.0);
            Number::from_f64(sum).map_or(Value::Null, Value::Number)
        }
    }
}
