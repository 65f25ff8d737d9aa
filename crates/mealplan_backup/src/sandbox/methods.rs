//! Methods of strings, arrays, numbers, dates and the other primitive values.

use super::builtins::arg;
use super::interp::{throw, Eval, Interp, MAX_STRING_LENGTH};
use super::value::{number_to_string, strict_equals, Value};
use chrono::{Datelike, SecondsFormat, Timelike};
use std::cmp::Ordering;

const STRING_METHODS: &[&str] = &[
    "toUpperCase", "toLowerCase", "trim", "trimStart", "trimEnd", "split", "includes",
    "startsWith", "endsWith", "indexOf", "lastIndexOf", "slice", "substring", "replace",
    "replaceAll", "padStart", "padEnd", "repeat", "charAt", "at", "concat", "localeCompare",
    "toString", "valueOf",
];

const ARRAY_METHODS: &[&str] = &[
    "push", "pop", "shift", "unshift", "map", "filter", "forEach", "reduce", "find",
    "findIndex", "some", "every", "includes", "indexOf", "join", "slice", "concat", "reverse",
    "sort", "flat", "at", "toString",
];

const NUMBER_METHODS: &[&str] = &["toFixed", "toString", "valueOf"];

const DATE_METHODS: &[&str] = &[
    "toISOString", "toJSON", "getTime", "valueOf", "getFullYear", "getMonth", "getDate",
    "getDay", "getHours", "getMinutes", "getSeconds", "getMilliseconds", "toString",
];

const OBJECT_ID_METHODS: &[&str] = &["toString", "toHexString", "getTimestamp", "equals", "valueOf"];

const WRAPPER_METHODS: &[&str] = &["toString", "toNumber", "valueOf"];

const OBJECT_METHODS: &[&str] = &["hasOwnProperty", "toString"];

const FUNCTION_METHODS: &[&str] = &["call", "apply"];

/// Whether `this.<name>` resolves to a built-in method.
pub(crate) fn has_method(this: &Value, name: &str) -> bool {
    let table = match this {
        Value::Str(_) => STRING_METHODS,
        Value::Array(_) => ARRAY_METHODS,
        Value::Number(_) | Value::Bool(_) => NUMBER_METHODS,
        Value::Date(_) => DATE_METHODS,
        Value::ObjectId(_) => OBJECT_ID_METHODS,
        Value::Int32(_) | Value::Long(_) => WRAPPER_METHODS,
        Value::Object(_) => OBJECT_METHODS,
        Value::Function(_) | Value::Builtin(_) | Value::Method(_) => FUNCTION_METHODS,
        _ => &[],
    };
    table.contains(&name)
}

/// Calls a built-in method on a primitive, array or plain object.
pub(crate) fn call(interp: &mut Interp<'_>, this: &Value, name: &str, args: Vec<Value>) -> Eval<Value> {
    match this {
        Value::Str(s) => string_method(interp, s, name, &args),
        Value::Array(_) => array_method(interp, this, name, args),
        Value::Number(n) => number_method(*n, name, &args),
        Value::Bool(b) => Ok(match name {
            "valueOf" => Value::Bool(*b),
            _ => Value::Str(b.to_string()),
        }),
        Value::Date(d) => Ok(match name {
            "toISOString" | "toJSON" => Value::Str(d.to_rfc3339_opts(SecondsFormat::Millis, true)),
            "getTime" | "valueOf" => Value::Number(d.timestamp_millis() as f64),
            "getFullYear" => Value::Number(f64::from(d.year())),
            "getMonth" => Value::Number(f64::from(d.month0())),
            "getDate" => Value::Number(f64::from(d.day())),
            "getDay" => Value::Number(f64::from(d.weekday().num_days_from_sunday())),
            "getHours" => Value::Number(f64::from(d.hour())),
            "getMinutes" => Value::Number(f64::from(d.minute())),
            "getSeconds" => Value::Number(f64::from(d.second())),
            "getMilliseconds" => Value::Number(f64::from(d.timestamp_subsec_millis())),
            _ => Value::Str(d.format("%a %b %d %Y %H:%M:%S GMT+0000 (Coordinated Universal Time)").to_string()),
        }),
        Value::ObjectId(id) => Ok(match name {
            "getTimestamp" => Value::Date(id.timestamp()),
            "equals" => Value::Bool(match arg(&args, 0) {
                Value::ObjectId(other) => other == *id,
                Value::Str(s) => s == id.to_hex(),
                _ => false,
            }),
            _ => Value::Str(id.to_hex()),
        }),
        Value::Int32(_) | Value::Long(_) => Ok(match name {
            "toString" => Value::Str(this.to_display()),
            _ => Value::Number(this.to_number()),
        }),
        Value::Object(obj) => Ok(match name {
            "hasOwnProperty" => Value::Bool(obj.borrow().contains(&arg(&args, 0).to_display())),
            _ => Value::Str(this.to_display()),
        }),
        Value::Function(_) | Value::Builtin(_) | Value::Method(_) => {
            let this_arg = arg(&args, 0);
            let rest = match name {
                "apply" => match arg(&args, 1) {
                    Value::Array(items) => items.borrow().clone(),
                    _ => Vec::new(),
                },
                _ => args.into_iter().skip(1).collect(),
            };
            interp.call_function(this, this_arg, rest)
        }
        other => Err(throw(
            "TypeError",
            format!("{}.{name} is not a function", other.to_display()),
        )),
    }
}

/// Resolves a relative index (`-1` is the last element) against `len`.
fn relative(n: f64, len: usize) -> usize {
    if n.is_nan() {
        0
    } else if n < 0.0 {
        (len as f64 + n).max(0.0) as usize
    } else {
        n.min(len as f64) as usize
    }
}

fn char_index(s: &str, byte: usize) -> f64 {
    s[..byte].chars().count() as f64
}

fn string_method(interp: &mut Interp<'_>, s: &str, name: &str, args: &[Value]) -> Eval<Value> {
    let text = |i: usize| arg(args, i).to_display();
    let chars: Vec<char> = s.chars().collect();
    Ok(match name {
        "toUpperCase" => Value::Str(s.to_uppercase()),
        "toLowerCase" => Value::Str(s.to_lowercase()),
        "trim" => Value::str(s.trim()),
        "trimStart" => Value::str(s.trim_start()),
        "trimEnd" => Value::str(s.trim_end()),
        "split" => {
            let parts: Vec<Value> = match arg(args, 0) {
                Value::Undefined => vec![Value::str(s)],
                sep => {
                    let sep = sep.to_display();
                    if sep.is_empty() {
                        chars.iter().map(|c| Value::Str(c.to_string())).collect()
                    } else {
                        s.split(sep.as_str()).map(Value::str).collect()
                    }
                }
            };
            let limit = match arg(args, 1) {
                Value::Undefined => parts.len(),
                n => relative(n.to_number(), parts.len()),
            };
            Value::array(parts.into_iter().take(limit).collect())
        }
        "includes" => Value::Bool(s.contains(&text(0))),
        "startsWith" => Value::Bool(s.starts_with(&text(0))),
        "endsWith" => Value::Bool(s.ends_with(&text(0))),
        "indexOf" => Value::Number(s.find(&text(0)).map_or(-1.0, |b| char_index(s, b))),
        "lastIndexOf" => Value::Number(s.rfind(&text(0)).map_or(-1.0, |b| char_index(s, b))),
        "slice" => {
            let start = relative(arg(args, 0).to_number(), chars.len());
            let end = match arg(args, 1) {
                Value::Undefined => chars.len(),
                n => relative(n.to_number(), chars.len()),
            };
            Value::Str(chars.get(start..end.max(start)).unwrap_or_default().iter().collect())
        }
        "substring" => {
            let clamp = |v: Value, default: usize| match v {
                Value::Undefined => default,
                v => relative(v.to_number().max(0.0), chars.len()),
            };
            let a = clamp(arg(args, 0), 0);
            let b = clamp(arg(args, 1), chars.len());
            let (start, end) = if a <= b { (a, b) } else { (b, a) };
            Value::Str(chars[start..end].iter().collect())
        }
        "replace" | "replaceAll" => {
            let pattern = text(0);
            let replacement = arg(args, 1);
            let all = name == "replaceAll";
            let mut out = String::new();
            let mut rest = s;
            while let Some(pos) = rest.find(&pattern) {
                out.push_str(&rest[..pos]);
                let piece = if replacement.is_callable() {
                    interp
                        .call_function(&replacement, Value::Undefined, vec![Value::str(pattern.as_str())])?
                        .to_display()
                } else {
                    replacement.to_display()
                };
                out.push_str(&piece);
                rest = &rest[pos + pattern.len()..];
                if !all || pattern.is_empty() {
                    break;
                }
            }
            out.push_str(rest);
            Value::Str(out)
        }
        "padStart" | "padEnd" => {
            let width = arg(args, 0).to_number();
            let fill = match arg(args, 1) {
                Value::Undefined => " ".to_string(),
                v => v.to_display(),
            };
            if width > MAX_STRING_LENGTH as f64 {
                return Err(throw("RangeError", "Invalid string length"));
            }
            let missing = if width.is_finite() { (width as usize).saturating_sub(chars.len()) } else { 0 };
            if missing == 0 || fill.is_empty() {
                Value::str(s)
            } else {
                let pad: String = fill.chars().cycle().take(missing).collect();
                Value::Str(if name == "padStart" { pad + s } else { format!("{s}{pad}") })
            }
        }
        "repeat" => {
            let n = arg(args, 0).to_number();
            if !(0.0..=1e6).contains(&n) {
                return Err(throw("RangeError", format!("Invalid count value: {}", number_to_string(n))));
            }
            if s.len().saturating_mul(n as usize) > MAX_STRING_LENGTH {
                return Err(throw("RangeError", "Invalid string length"));
            }
            Value::Str(s.repeat(n as usize))
        }
        "charAt" => {
            let i = arg(args, 0).to_number();
            let i = if i.is_nan() { 0.0 } else { i };
            Value::Str(if i >= 0.0 {
                chars.get(i as usize).map(char::to_string).unwrap_or_default()
            } else {
                String::new()
            })
        }
        "at" => {
            let i = arg(args, 0).to_number();
            let index = if i < 0.0 { chars.len() as f64 + i } else { i };
            if index >= 0.0 {
                chars.get(index as usize).map_or(Value::Undefined, |c| Value::Str(c.to_string()))
            } else {
                Value::Undefined
            }
        }
        "concat" => Value::Str(args.iter().fold(s.to_string(), |mut acc, v| {
            acc.push_str(&v.to_display());
            acc
        })),
        "localeCompare" => Value::Number(match s.cmp(text(0).as_str()) {
            Ordering::Less => -1.0,
            Ordering::Equal => 0.0,
            Ordering::Greater => 1.0,
        }),
        _ => Value::str(s),
    })
}

fn number_method(n: f64, name: &str, args: &[Value]) -> Eval<Value> {
    Ok(match name {
        "toFixed" => {
            let digits = arg(args, 0).to_number();
            let digits = if digits.is_nan() { 0.0 } else { digits };
            if !(0.0..=100.0).contains(&digits) {
                return Err(throw("RangeError", "toFixed() digits argument must be between 0 and 100"));
            }
            if !n.is_finite() {
                Value::Str(number_to_string(n))
            } else {
                Value::Str(format!("{n:.*}", digits as usize))
            }
        }
        "toString" => match arg(args, 0) {
            Value::Undefined => Value::Str(number_to_string(n)),
            radix => {
                let radix = radix.to_number();
                if !(2.0..=36.0).contains(&radix) {
                    return Err(throw("RangeError", "toString() radix must be between 2 and 36"));
                }
                Value::Str(to_radix(n, radix as u32))
            }
        },
        _ => Value::Number(n),
    })
}

fn to_radix(n: f64, radix: u32) -> String {
    if radix == 10 || !n.is_finite() || n.fract() != 0.0 || n.abs() > 9_007_199_254_740_991.0 {
        return number_to_string(n);
    }
    let mut value = n.abs() as u64;
    let mut digits = Vec::new();
    loop {
        let d = (value % u64::from(radix)) as u32;
        digits.push(char::from_digit(d, radix).unwrap_or('0'));
        value /= u64::from(radix);
        if value == 0 {
            break;
        }
    }
    if n < 0.0 {
        digits.push('-');
    }
    digits.iter().rev().collect()
}

/// `SameValueZero`: like `===` but `NaN` equals itself.
fn same_value_zero(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) if x.is_nan() && y.is_nan() => true,
        _ => strict_equals(a, b),
    }
}

fn array_method(interp: &mut Interp<'_>, this: &Value, name: &str, args: Vec<Value>) -> Eval<Value> {
    let Value::Array(cell) = this else {
        return Ok(Value::Undefined);
    };
    let snapshot = || cell.borrow().clone();
    let callback = |args: &[Value]| {
        let f = arg(args, 0);
        if f.is_callable() {
            Ok(f)
        } else {
            Err(throw("TypeError", format!("{} is not a function", f.to_display())))
        }
    };

    Ok(match name {
        "push" => {
            let mut items = cell.borrow_mut();
            items.extend(args);
            Value::Number(items.len() as f64)
        }
        "pop" => cell.borrow_mut().pop().unwrap_or(Value::Undefined),
        "shift" => {
            let mut items = cell.borrow_mut();
            if items.is_empty() {
                Value::Undefined
            } else {
                items.remove(0)
            }
        }
        "unshift" => {
            let mut items = cell.borrow_mut();
            items.splice(0..0, args);
            Value::Number(items.len() as f64)
        }
        "map" | "filter" | "forEach" | "find" | "findIndex" | "some" | "every" => {
            let f = callback(&args)?;
            let mut mapped = Vec::new();
            for (i, item) in snapshot().into_iter().enumerate() {
                let result = interp.call_function(
                    &f,
                    Value::Undefined,
                    vec![item.clone(), Value::Number(i as f64), this.clone()],
                )?;
                match name {
                    "map" => mapped.push(result),
                    "filter" if result.truthy() => mapped.push(item),
                    "find" if result.truthy() => return Ok(item),
                    "findIndex" if result.truthy() => return Ok(Value::Number(i as f64)),
                    "some" if result.truthy() => return Ok(Value::Bool(true)),
                    "every" if !result.truthy() => return Ok(Value::Bool(false)),
                    _ => {}
                }
            }
            match name {
                "map" | "filter" => Value::array(mapped),
                "find" => Value::Undefined,
                "findIndex" => Value::Number(-1.0),
                "some" => Value::Bool(false),
                "every" => Value::Bool(true),
                _ => Value::Undefined,
            }
        }
        "reduce" => {
            let f = callback(&args)?;
            let mut items = snapshot().into_iter().enumerate();
            let mut acc = match args.get(1) {
                Some(init) => init.clone(),
                None => match items.next() {
                    Some((_, first)) => first,
                    None => return Err(throw("TypeError", "Reduce of empty array with no initial value")),
                },
            };
            for (i, item) in items {
                acc = interp.call_function(
                    &f,
                    Value::Undefined,
                    vec![acc, item, Value::Number(i as f64), this.clone()],
                )?;
            }
            acc
        }
        "includes" => {
            let needle = arg(&args, 0);
            Value::Bool(cell.borrow().iter().any(|v| same_value_zero(v, &needle)))
        }
        "indexOf" => {
            let needle = arg(&args, 0);
            Value::Number(
                cell.borrow()
                    .iter()
                    .position(|v| strict_equals(v, &needle))
                    .map_or(-1.0, |i| i as f64),
            )
        }
        "join" => {
            let sep = match arg(&args, 0) {
                Value::Undefined => ",".to_string(),
                v => v.to_display(),
            };
            let parts: Vec<String> = cell
                .borrow()
                .iter()
                .map(|v| if v.is_nullish() { String::new() } else { v.to_display() })
                .collect();
            Value::Str(parts.join(&sep))
        }
        "slice" => {
            let items = snapshot();
            let start = relative(arg(&args, 0).to_number(), items.len());
            let end = match arg(&args, 1) {
                Value::Undefined => items.len(),
                n => relative(n.to_number(), items.len()),
            };
            Value::array(items.get(start..end.max(start)).unwrap_or_default().to_vec())
        }
        "concat" => {
            let mut items = snapshot();
            for extra in args {
                match extra {
                    Value::Array(other) => items.extend(other.borrow().iter().cloned()),
                    v => items.push(v),
                }
            }
            Value::array(items)
        }
        "reverse" => {
            cell.borrow_mut().reverse();
            this.clone()
        }
        "sort" => {
            let cmp = arg(&args, 0);
            if !cmp.is_nullish() && !cmp.is_callable() {
                return Err(throw("TypeError", "The comparison function must be either a function or undefined"));
            }
            let sorted = merge_sort(interp, snapshot(), &cmp)?;
            *cell.borrow_mut() = sorted;
            this.clone()
        }
        "flat" => {
            let mut out = Vec::new();
            for item in snapshot() {
                match item {
                    Value::Array(inner) => out.extend(inner.borrow().iter().cloned()),
                    v => out.push(v),
                }
            }
            Value::array(out)
        }
        "at" => {
            let items = cell.borrow();
            let i = arg(&args, 0).to_number();
            let index = if i < 0.0 { items.len() as f64 + i } else { i };
            if index >= 0.0 {
                items.get(index as usize).cloned().unwrap_or(Value::Undefined)
            } else {
                Value::Undefined
            }
        }
        _ => Value::Str(this.to_display()),
    })
}

fn compare(interp: &mut Interp<'_>, cmp: &Value, a: &Value, b: &Value) -> Eval<Ordering> {
    match (a, b) {
        (Value::Undefined, Value::Undefined) => return Ok(Ordering::Equal),
        (Value::Undefined, _) => return Ok(Ordering::Greater),
        (_, Value::Undefined) => return Ok(Ordering::Less),
        _ => {}
    }
    if cmp.is_nullish() {
        return Ok(a.to_display().cmp(&b.to_display()));
    }
    let n = interp
        .call_function(cmp, Value::Undefined, vec![a.clone(), b.clone()])?
        .to_number();
    Ok(if n < 0.0 {
        Ordering::Less
    } else if n > 0.0 {
        Ordering::Greater
    } else {
        Ordering::Equal
    })
}

/// Stable sort with a fallible comparator.
fn merge_sort(interp: &mut Interp<'_>, mut items: Vec<Value>, cmp: &Value) -> Eval<Vec<Value>> {
    if items.len() <= 1 {
        return Ok(items);
    }
    let right = items.split_off(items.len() / 2);
    let left = merge_sort(interp, items, cmp)?;
    let right = merge_sort(interp, right, cmp)?;

    let mut out = Vec::with_capacity(left.len() + right.len());
    let mut left = left.into_iter().peekable();
    let mut right = right.into_iter().peekable();
    while let (Some(a), Some(b)) = (left.peek(), right.peek()) {
        if compare(interp, cmp, b, a)? == Ordering::Less {
            out.extend(right.next());
        } else {
            out.extend(left.next());
        }
    }
    out.extend(left);
    out.extend(right);
    Ok(out)
}
