//! Shell-literal rendering of JSON documents.
//!
//! Extended-JSON wrappers are rendered as the shell's constructor calls so
//! that the output can be pasted into a shell (or fed back to the sandbox):
//!
//! ```text
//! {"$oid": "65f0..."}          -> ObjectId("65f0...")
//! {"$date": "2024-03-01T..."}  -> ISODate("2024-03-01T...")
//! {"$numberLong": "42"}        -> NumberLong("42")
//! ```

use mealplan_store::document::{as_date, as_long, as_object_id};
use serde_json::Value;
use std::fmt::Write;

/// Quotes a string as a double-quoted literal.
#[must_use]
pub fn quote(s: &str) -> String {
    // JSON string syntax is a subset of the shell's string syntax.
    Value::String(s.to_string()).to_string()
}

/// Renders a value on one line.
#[must_use]
pub fn to_shell(value: &Value) -> String {
    let mut out = String::new();
    write_value(&mut out, value, None, 0);
    out
}

/// Renders a value across several lines, indenting nested containers by
/// two spaces.
#[must_use]
pub fn to_shell_pretty(value: &Value) -> String {
    let mut out = String::new();
    write_value(&mut out, value, Some(2), 0);
    out
}

/// Formats a number the way the shell prints it (`NaN`, `Infinity`, `1e+21`,
/// integers without a fraction).
#[must_use]
pub fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        return "NaN".into();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity" } else { "-Infinity" }.into();
    }
    if n == 0.0 {
        return "0".into();
    }
    let abs = n.abs();
    if abs >= 1e21 || abs < 1e-6 {
        let s = format!("{n:e}");
        return match s.split_once('e') {
            Some((mantissa, exp)) if !exp.starts_with('-') => format!("{mantissa}e+{exp}"),
            _ => s,
        };
    }
    format!("{n}")
}

fn wrapper(value: &Value) -> Option<String> {
    if let Some(id) = as_object_id(value) {
        return Some(format!("ObjectId(\"{id}\")"));
    }
    if let Some(date) = value.get("$date").and_then(Value::as_str) {
        if as_date(value).is_some() {
            return Some(format!("ISODate({})", quote(date)));
        }
    }
    as_long(value).map(|n| format!("NumberLong(\"{n}\")"))
}

fn newline(out: &mut String, indent: Option<usize>, depth: usize) {
    if let Some(step) = indent {
        out.push('\n');
        out.extend(std::iter::repeat(' ').take(step * depth));
    }
}

fn write_value(out: &mut String, value: &Value, indent: Option<usize>, depth: usize) {
    if let Some(rendered) = wrapper(value) {
        out.push_str(&rendered);
        return;
    }
    match value {
        Value::Null | Value::Bool(_) => {
            let _ = write!(out, "{value}");
        }
        Value::Number(n) => match (n.as_i64(), n.as_u64(), n.as_f64()) {
            (Some(i), _, _) => {
                let _ = write!(out, "{i}");
            }
            (_, Some(u), _) => {
                let _ = write!(out, "{u}");
            }
            (_, _, Some(f)) => out.push_str(&number_to_string(f)),
            _ => {
                let _ = write!(out, "{n}");
            }
        },
        Value::String(s) => out.push_str(&quote(s)),
        Value::Array(items) => {
            if items.is_empty() {
                out.push_str("[]");
                return;
            }
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                    if indent.is_none() {
                        out.push(' ');
                    }
                }
                newline(out, indent, depth + 1);
                write_value(out, item, indent, depth + 1);
            }
            newline(out, indent, depth);
            out.push(']');
        }
        Value::Object(map) => {
            if map.is_empty() {
                out.push_str("{}");
                return;
            }
            out.push('{');
            for (i, (key, item)) in map.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                    if indent.is_none() {
                        out.push(' ');
                    }
                }
                newline(out, indent, depth + 1);
                out.push_str(&quote(key));
                out.push_str(": ");
                write_value(out, item, indent, depth + 1);
            }
            newline(out, indent, depth);
            out.push('}');
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wrappers_render_as_constructors() {
        let value = json!({
            "_id": {"$oid": "65f000000000000000000101"},
            "at": {"$date": "2024-03-01T12:00:00.000Z"},
            "big": {"$numberLong": "9007199254740993"}
        });
        assert_eq!(
            to_shell(&value),
            r#"{"_id": ObjectId("65f000000000000000000101"), "at": ISODate("2024-03-01T12:00:00.000Z"), "big": NumberLong("9007199254740993")}"#
        );
    }

    #[test]
    fn strings_are_escaped() {
        assert_eq!(quote("a \"b\"\n"), r#""a \"b\"\n""#);
    }

    #[test]
    fn pretty_layout() {
        let value = json!({"a": [1, 2], "b": {}});
        assert_eq!(to_shell_pretty(&value), "{\n  \"a\": [\n    1,\n    2\n  ],\n  \"b\": {}\n}");
    }

    #[test]
    fn numbers_render_like_the_shell() {
        let value = json!([2f64.powi(53), 1e21, 0.25, -3, 12345678901234567890u64]);
        assert_eq!(to_shell(&value), "[9007199254740992, 1e+21, 0.25, -3, 12345678901234567890]");
        assert_eq!(number_to_string(f64::NAN), "NaN");
        assert_eq!(number_to_string(f64::NEG_INFINITY), "-Infinity");
        assert_eq!(number_to_string(1e-7), "1e-7");
    }

    #[test]
    fn malformed_wrappers_render_as_objects() {
        let value = json!({"$date": "not a date"});
        assert_eq!(to_shell(&value), r#"{"$date": "not a date"}"#);
    }
}
