//! Runtime values of the script language.

use super::ast::FunctionDef;
use super::builtins::Builtin;
use super::db::Cursor;
use super::interp::Env;
use crate::shell;
pub(crate) use crate::shell::number_to_string;
use chrono::{DateTime, SecondsFormat, Utc};
use mealplan_store::document::{as_date, as_long, as_object_id, date_value, long_value, oid_value};
use mealplan_store::ObjectId;
use serde_json::{Map, Number, Value as Json};
use std::cell::RefCell;
use std::rc::Rc;

/// Nesting depth at which JSON conversion assumes a cycle.
const MAX_JSON_DEPTH: usize = 100;

/// Largest integer a double represents exactly.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

/// A user-defined function together with its defining scope.
pub(crate) struct Closure {
    pub def: Rc<FunctionDef>,
    pub env: Rc<Env>,
}

/// A method looked up on a value but not yet called (`const f = arr.push`).
pub(crate) struct BoundMethod {
    pub this: Value,
    pub name: String,
}

/// Object flavour, used by `instanceof` and string conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ObjectClass {
    Plain,
    Error,
}

/// An object: ordered properties plus a class tag.
pub(crate) struct Object {
    pub props: Vec<(String, Value)>,
    pub class: ObjectClass,
}

impl Object {
    pub fn new(props: Vec<(String, Value)>) -> Self {
        Self {
            props,
            class: ObjectClass::Plain,
        }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.props.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.props.iter().any(|(k, _)| k == key)
    }

    pub fn set(&mut self, key: &str, value: Value) {
        match self.props.iter_mut().find(|(k, _)| k == key) {
            Some(slot) => slot.1 = value,
            None => self.props.push((key.to_string(), value)),
        }
    }

    pub fn remove(&mut self, key: &str) -> bool {
        let before = self.props.len();
        self.props.retain(|(k, _)| k != key);
        self.props.len() != before
    }
}

/// A script value.
#[derive(Clone)]
pub(crate) enum Value {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    Str(String),
    Array(Rc<RefCell<Vec<Value>>>),
    Object(Rc<RefCell<Object>>),
    Function(Rc<Closure>),
    Builtin(Builtin),
    Method(Rc<BoundMethod>),
    ObjectId(ObjectId),
    Date(DateTime<Utc>),
    Int32(i32),
    Long(i64),
    /// The database handle.
    Db,
    /// A collection handle.
    Collection(Rc<str>),
    Cursor(Rc<RefCell<Cursor>>),
}

impl Value {
    pub fn str(s: impl Into<String>) -> Self {
        Value::Str(s.into())
    }

    pub fn array(items: Vec<Value>) -> Self {
        Value::Array(Rc::new(RefCell::new(items)))
    }

    pub fn object(props: Vec<(String, Value)>) -> Self {
        Value::Object(Rc::new(RefCell::new(Object::new(props))))
    }

    /// An error object (`new Error(message)`).
    pub fn error(name: &str, message: impl Into<String>) -> Self {
        let object = Object {
            props: vec![
                ("name".to_string(), Value::str(name)),
                ("message".to_string(), Value::Str(message.into())),
            ],
            class: ObjectClass::Error,
        };
        Value::Object(Rc::new(RefCell::new(object)))
    }

    pub fn method(this: Value, name: &str) -> Self {
        Value::Method(Rc::new(BoundMethod {
            this,
            name: name.to_string(),
        }))
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    pub fn is_callable(&self) -> bool {
        matches!(self, Value::Function(_) | Value::Builtin(_) | Value::Method(_))
    }

    /// Name and message of an error object.
    pub fn error_parts(&self) -> Option<(String, String)> {
        let Value::Object(obj) = self else {
            return None;
        };
        let obj = obj.borrow();
        if obj.class != ObjectClass::Error {
            return None;
        }
        let name = obj.get("name").map(|v| v.to_display()).unwrap_or_else(|| "Error".into());
        let message = obj.get("message").map(|v| v.to_display()).unwrap_or_default();
        Some((name, message))
    }

    pub fn type_of(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::Function(_) | Value::Builtin(_) | Value::Method(_) => "function",
            _ => "object",
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::Str(s) => !s.is_empty(),
            _ => true,
        }
    }

    pub fn to_number(&self) -> f64 {
        match self {
            Value::Undefined => f64::NAN,
            Value::Null => 0.0,
            Value::Bool(b) => f64::from(u8::from(*b)),
            Value::Number(n) => *n,
            Value::Str(s) => string_to_number(s),
            Value::Int32(n) => f64::from(*n),
            Value::Long(n) => *n as f64,
            Value::Date(d) => d.timestamp_millis() as f64,
            Value::Array(items) => {
                let items = items.borrow();
                match items.as_slice() {
                    [] => 0.0,
                    [only] => only.to_number(),
                    _ => f64::NAN,
                }
            }
            _ => f64::NAN,
        }
    }

    /// Whether `+` treats the value as a string operand.
    pub fn is_stringish(&self) -> bool {
        matches!(
            self,
            Value::Str(_)
                | Value::Array(_)
                | Value::Object(_)
                | Value::ObjectId(_)
                | Value::Date(_)
                | Value::Function(_)
                | Value::Builtin(_)
                | Value::Method(_)
                | Value::Collection(_)
                | Value::Db
                | Value::Cursor(_)
        )
    }

    /// String conversion used by concatenation, templates and `String(x)`.
    pub fn to_display(&self) -> String {
        match self {
            Value::Undefined => "undefined".into(),
            Value::Null => "null".into(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => number_to_string(*n),
            Value::Str(s) => s.clone(),
            Value::Array(items) => items
                .borrow()
                .iter()
                .map(|v| if v.is_nullish() { String::new() } else { v.to_display() })
                .collect::<Vec<_>>()
                .join(","),
            Value::Object(_) => match self.error_parts() {
                Some((name, message)) if message.is_empty() => name,
                Some((name, message)) => format!("{name}: {message}"),
                None => "[object Object]".into(),
            },
            Value::Function(f) => format!("[Function: {}]", f.def.name.as_deref().unwrap_or("anonymous")),
            Value::Builtin(b) => format!("[Function: {}]", b.name()),
            Value::Method(m) => format!("[Function: {}]", m.name),
            Value::ObjectId(id) => id.to_hex(),
            Value::Date(d) => d.to_rfc3339_opts(SecondsFormat::Millis, true),
            Value::Int32(n) => n.to_string(),
            Value::Long(n) => n.to_string(),
            Value::Db => "db".into(),
            Value::Collection(name) => name.to_string(),
            Value::Cursor(c) => format!("Cursor({})", c.borrow().collection),
        }
    }

    /// Shell notation used by `print` for non-string values.
    pub fn inspect(&self) -> String {
        let mut out = String::new();
        self.write_inspect(&mut out, 0);
        out
    }

    fn write_inspect(&self, out: &mut String, depth: usize) {
        if depth > MAX_JSON_DEPTH {
            out.push_str("[Circular]");
            return;
        }
        match self {
            Value::Str(s) => out.push_str(&shell::quote(s)),
            Value::Number(n) => out.push_str(&number_to_string(*n)),
            Value::Undefined => out.push_str("undefined"),
            Value::Int32(n) => out.push_str(&format!("NumberInt({n})")),
            Value::Function(_)
            | Value::Builtin(_)
            | Value::Method(_)
            | Value::Db
            | Value::Collection(_)
            | Value::Cursor(_) => out.push_str(&self.to_display()),
            Value::Object(_) if self.error_parts().is_some() => out.push_str(&self.to_display()),
            Value::Array(items) => {
                out.push('[');
                for (i, item) in items.borrow().iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    item.write_inspect(out, depth + 1);
                }
                out.push(']');
            }
            Value::Object(obj) => {
                let obj = obj.borrow();
                let visible = obj
                    .props
                    .iter()
                    .filter(|(_, v)| !matches!(v, Value::Undefined) && !v.is_callable());
                out.push('{');
                for (i, (key, item)) in visible.enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    out.push_str(&shell::quote(key));
                    out.push_str(": ");
                    item.write_inspect(out, depth + 1);
                }
                out.push('}');
            }
            Value::Null | Value::Bool(_) | Value::ObjectId(_) | Value::Date(_) | Value::Long(_) => {
                match to_json(self) {
                    Ok(json) => out.push_str(&shell::to_shell(&json)),
                    Err(_) => out.push_str("[Circular]"),
                }
            }
        }
    }
}

fn string_to_number(s: &str) -> f64 {
    let t = s.trim();
    if t.is_empty() {
        return 0.0;
    }
    if let Some(hex) = t.strip_prefix("0x").or_else(|| t.strip_prefix("0X")) {
        return u64::from_str_radix(hex, 16).map_or(f64::NAN, |n| n as f64);
    }
    match t {
        "Infinity" | "+Infinity" => f64::INFINITY,
        "-Infinity" => f64::NEG_INFINITY,
        _ if t
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '+' | '-')) =>
        {
            t.parse().unwrap_or(f64::NAN)
        }
        _ => f64::NAN,
    }
}

/// `===`
pub(crate) fn strict_equals(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) | (Value::Db, Value::Db) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Number(x), Value::Number(y)) => x == y,
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::Array(x), Value::Array(y)) => Rc::ptr_eq(x, y),
        (Value::Object(x), Value::Object(y)) => Rc::ptr_eq(x, y),
        (Value::Function(x), Value::Function(y)) => Rc::ptr_eq(x, y),
        (Value::Cursor(x), Value::Cursor(y)) => Rc::ptr_eq(x, y),
        (Value::Builtin(x), Value::Builtin(y)) => x == y,
        (Value::ObjectId(x), Value::ObjectId(y)) => x == y,
        (Value::Date(x), Value::Date(y)) => x == y,
        (Value::Int32(x), Value::Int32(y)) => x == y,
        (Value::Long(x), Value::Long(y)) => x == y,
        (Value::Collection(x), Value::Collection(y)) => x == y,
        _ => false,
    }
}

/// `==`
pub(crate) fn loose_equals(a: &Value, b: &Value) -> bool {
    if a.is_nullish() || b.is_nullish() {
        return a.is_nullish() && b.is_nullish();
    }
    let numeric = |v: &Value| {
        matches!(
            v,
            Value::Number(_) | Value::Int32(_) | Value::Long(_) | Value::Bool(_)
        )
    };
    match (a, b) {
        (Value::ObjectId(id), Value::Str(s)) | (Value::Str(s), Value::ObjectId(id)) => {
            id.to_hex() == *s
        }
        (Value::Str(_), Value::Str(_)) => strict_equals(a, b),
        _ if (numeric(a) || matches!(a, Value::Str(_)))
            && (numeric(b) || matches!(b, Value::Str(_))) =>
        {
            a.to_number() == b.to_number()
        }
        _ => strict_equals(a, b),
    }
}

/// Converts a value to extended JSON. Functions and `undefined` properties
/// are dropped; `undefined` array slots become `null`.
pub(crate) fn to_json(value: &Value) -> Result<Json, String> {
    to_json_at(value, 0)
}

fn to_json_at(value: &Value, depth: usize) -> Result<Json, String> {
    if depth > MAX_JSON_DEPTH {
        return Err("Converting circular structure to JSON".into());
    }
    Ok(match value {
        Value::Undefined
        | Value::Null
        | Value::Function(_)
        | Value::Builtin(_)
        | Value::Method(_)
        | Value::Db
        | Value::Cursor(_) => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Number(n) => number_json(*n),
        Value::Str(s) => Json::String(s.clone()),
        Value::Array(items) => Json::Array(
            items
                .borrow()
                .iter()
                .map(|v| to_json_at(v, depth + 1))
                .collect::<Result<_, _>>()?,
        ),
        Value::Object(obj) => {
            let obj = obj.borrow();
            let mut map = Map::new();
            for (key, v) in &obj.props {
                if matches!(v, Value::Undefined) || v.is_callable() {
                    continue;
                }
                map.insert(key.clone(), to_json_at(v, depth + 1)?);
            }
            Json::Object(map)
        }
        Value::ObjectId(id) => oid_value(*id),
        Value::Date(d) => date_value(*d),
        Value::Int32(n) => Json::from(*n),
        Value::Long(n) => long_value(*n),
        Value::Collection(name) => Json::String(name.to_string()),
    })
}

fn number_json(n: f64) -> Json {
    if n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER {
        Json::from(n as i64)
    } else {
        Number::from_f64(n).map_or(Json::Null, Json::Number)
    }
}

/// Converts extended JSON to a value, reviving `$oid`, `$date` and
/// `$numberLong` wrappers.
pub(crate) fn from_json(json: &Json) -> Value {
    if let Some(id) = as_object_id(json) {
        return Value::ObjectId(id);
    }
    if let Some(d) = as_date(json) {
        return Value::Date(d);
    }
    if let Some(n) = as_long(json) {
        return Value::Long(n);
    }
    match json {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Bool(*b),
        Json::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
        Json::String(s) => Value::Str(s.clone()),
        Json::Array(items) => Value::array(items.iter().map(from_json).collect()),
        Json::Object(map) => Value::object(
            map.iter()
                .map(|(k, v)| (k.clone(), from_json(v)))
                .collect(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_number_formatting() {
        assert_eq!(number_to_string(3.0), "3");
        assert_eq!(number_to_string(-0.0), "0");
        assert_eq!(number_to_string(0.5), "0.5");
        assert_eq!(number_to_string(1e21), "1e+21");
        assert_eq!(number_to_string(f64::NAN), "NaN");
        assert_eq!(number_to_string(f64::NEG_INFINITY), "-Infinity");
    }

    #[test]
    fn test_string_to_number() {
        assert_eq!(Value::str(" 42 ").to_number(), 42.0);
        assert_eq!(Value::str("").to_number(), 0.0);
        assert_eq!(Value::str("0x10").to_number(), 16.0);
        assert!(Value::str("inf").to_number().is_nan());
        assert!(Value::str("12px").to_number().is_nan());
    }

    #[test]
    fn test_equality() {
        assert!(loose_equals(&Value::Null, &Value::Undefined));
        assert!(!strict_equals(&Value::Null, &Value::Undefined));
        assert!(loose_equals(&Value::Number(1.0), &Value::str("1")));
        assert!(loose_equals(&Value::Long(5), &Value::Number(5.0)));
        let arr = Value::array(vec![]);
        assert!(strict_equals(&arr, &arr.clone()));
        assert!(!strict_equals(&arr, &Value::array(vec![])));
    }

    #[test]
    fn test_json_bridge() {
        let json = json!({
            "_id": {"$oid": "65f000000000000000000101"},
            "at": {"$date": "2024-03-01T12:00:00.000Z"},
            "big": {"$numberLong": "9007199254740993"},
            "n": 2,
            "f": 2.5,
            "tags": ["a", null]
        });
        let value = from_json(&json);
        let Value::Object(obj) = &value else {
            panic!("not an object");
        };
        assert!(matches!(obj.borrow().get("_id"), Some(Value::ObjectId(_))));
        assert!(matches!(obj.borrow().get("at"), Some(Value::Date(_))));
        assert!(matches!(obj.borrow().get("big"), Some(Value::Long(9_007_199_254_740_993))));
        assert_eq!(to_json(&value).unwrap(), json);
    }

    #[test]
    fn test_json_drops_undefined_properties() {
        let value = Value::object(vec![
            ("a".into(), Value::Undefined),
            ("b".into(), Value::array(vec![Value::Undefined])),
        ]);
        assert_eq!(to_json(&value).unwrap(), json!({"b": [null]}));
    }

    #[test]
    fn test_circular_structure() {
        let arr = Value::array(vec![]);
        if let Value::Array(items) = &arr {
            items.borrow_mut().push(arr.clone());
        }
        assert!(to_json(&arr).is_err());
        if let Value::Array(items) = &arr {
            items.borrow_mut().clear();
        }
    }

    #[test]
    fn test_display_and_inspect() {
        assert_eq!(Value::error("TypeError", "bad").to_display(), "TypeError: bad");
        assert_eq!(
            Value::array(vec![Value::Number(1.0), Value::Null, Value::str("x")]).to_display(),
            "1,,x"
        );
        assert_eq!(Value::str("x").inspect(), "\"x\"");
        let id = ObjectId::parse("65f000000000000000000101").unwrap();
        assert_eq!(Value::ObjectId(id).inspect(), "ObjectId(\"65f000000000000000000101\")");
    }

    #[test]
    fn test_inspect_numbers() {
        let nested = Value::object(vec![
            ("n".into(), Value::Number(f64::NAN)),
            ("list".into(), Value::array(vec![Value::Number(f64::INFINITY), Value::Number(2f64.powi(60))])),
            ("skip".into(), Value::Undefined),
        ]);
        assert_eq!(nested.inspect(), r#"{"n": NaN, "list": [Infinity, 1152921504606847000]}"#);
        assert_eq!(Value::Number(2f64.powi(53)).inspect(), "9007199254740992");
        assert_eq!(Value::Number(-0.5).inspect(), "-0.5");
        assert_eq!(Value::array(vec![Value::Undefined, Value::Null]).inspect(), "[undefined, null]");
    }
}
