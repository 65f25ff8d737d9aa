//! Native functions injected into the global scope.

use super::interp::{throw, Env, Eval, Interp, MAX_ARRAY_INDEX};
use super::value::{from_json, to_json, Value};
use crate::shell;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use mealplan_store::ObjectId;
use std::rc::Rc;

/// Error constructors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ErrorCtor {
    Error,
    TypeError,
    RangeError,
}

impl ErrorCtor {
    pub fn name(self) -> &'static str {
        match self {
            ErrorCtor::Error => "Error",
            ErrorCtor::TypeError => "TypeError",
            ErrorCtor::RangeError => "RangeError",
        }
    }
}

/// `Math` functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MathFn {
    Abs,
    Ceil,
    Floor,
    Round,
    Trunc,
    Sign,
    Sqrt,
    Pow,
    Min,
    Max,
    Random,
}

impl MathFn {
    const ALL: [(&'static str, MathFn); 11] = [
        ("abs", MathFn::Abs),
        ("ceil", MathFn::Ceil),
        ("floor", MathFn::Floor),
        ("round", MathFn::Round),
        ("trunc", MathFn::Trunc),
        ("sign", MathFn::Sign),
        ("sqrt", MathFn::Sqrt),
        ("pow", MathFn::Pow),
        ("min", MathFn::Min),
        ("max", MathFn::Max),
        ("random", MathFn::Random),
    ];

    fn name(self) -> &'static str {
        Self::ALL
            .iter()
            .find(|(_, f)| *f == self)
            .map_or("math", |(name, _)| name)
    }
}

/// A native function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Builtin {
    Print,
    PrintJson,
    ConsoleLog,
    Show,
    ObjectId,
    IsoDate,
    Date,
    DateNow,
    NumberInt,
    NumberLong,
    JsonStringify,
    JsonParse,
    Math(MathFn),
    ObjectCtor,
    ObjectKeys,
    ObjectValues,
    ObjectEntries,
    ObjectAssign,
    ArrayCtor,
    ArrayIsArray,
    ParseInt,
    ParseFloat,
    IsNaN,
    String,
    Number,
    Boolean,
    Error(ErrorCtor),
}

impl Builtin {
    pub fn name(self) -> &'static str {
        match self {
            Builtin::Print => "print",
            Builtin::PrintJson => "printjson",
            Builtin::ConsoleLog => "log",
            Builtin::Show => "show",
            Builtin::ObjectId => "ObjectId",
            Builtin::IsoDate => "ISODate",
            Builtin::Date => "Date",
            Builtin::DateNow => "now",
            Builtin::NumberInt => "NumberInt",
            Builtin::NumberLong => "NumberLong",
            Builtin::JsonStringify => "stringify",
            Builtin::JsonParse => "parse",
            Builtin::Math(f) => f.name(),
            Builtin::ObjectCtor => "Object",
            Builtin::ObjectKeys => "keys",
            Builtin::ObjectValues => "values",
            Builtin::ObjectEntries => "entries",
            Builtin::ObjectAssign => "assign",
            Builtin::ArrayCtor => "Array",
            Builtin::ArrayIsArray => "isArray",
            Builtin::ParseInt => "parseInt",
            Builtin::ParseFloat => "parseFloat",
            Builtin::IsNaN => "isNaN",
            Builtin::String => "String",
            Builtin::Number => "Number",
            Builtin::Boolean => "Boolean",
            Builtin::Error(e) => e.name(),
        }
    }
}

/// Populates the global scope. Nothing outside this list is reachable.
pub(crate) fn install(globals: &Rc<Env>) {
    let functions = [
        ("print", Builtin::Print),
        ("printjson", Builtin::PrintJson),
        ("show", Builtin::Show),
        ("ObjectId", Builtin::ObjectId),
        ("ISODate", Builtin::IsoDate),
        ("Date", Builtin::Date),
        ("NumberInt", Builtin::NumberInt),
        ("NumberLong", Builtin::NumberLong),
        ("Object", Builtin::ObjectCtor),
        ("Array", Builtin::ArrayCtor),
        ("parseInt", Builtin::ParseInt),
        ("parseFloat", Builtin::ParseFloat),
        ("isNaN", Builtin::IsNaN),
        ("String", Builtin::String),
        ("Number", Builtin::Number),
        ("Boolean", Builtin::Boolean),
        ("Error", Builtin::Error(ErrorCtor::Error)),
        ("TypeError", Builtin::Error(ErrorCtor::TypeError)),
        ("RangeError", Builtin::Error(ErrorCtor::RangeError)),
    ];
    for (name, builtin) in functions {
        globals.declare(name, Value::Builtin(builtin), false);
    }

    let console = ["log", "info", "warn", "error", "debug"]
        .into_iter()
        .map(|level| (level.to_string(), Value::Builtin(Builtin::ConsoleLog)))
        .collect();
    globals.declare("console", Value::object(console), false);

    let json = vec![
        ("stringify".to_string(), Value::Builtin(Builtin::JsonStringify)),
        ("parse".to_string(), Value::Builtin(Builtin::JsonParse)),
    ];
    globals.declare("JSON", Value::object(json), false);

    let mut math: Vec<(String, Value)> = MathFn::ALL
        .iter()
        .map(|(name, f)| (name.to_string(), Value::Builtin(Builtin::Math(*f))))
        .collect();
    math.push(("PI".into(), Value::Number(std::f64::consts::PI)));
    math.push(("E".into(), Value::Number(std::f64::consts::E)));
    globals.declare("Math", Value::object(math), false);

    globals.declare("db", Value::Db, false);
    globals.declare("undefined", Value::Undefined, false);
    globals.declare("NaN", Value::Number(f64::NAN), false);
    globals.declare("Infinity", Value::Number(f64::INFINITY), false);
}

/// Properties of a native function object (`Date.now`, `Object.keys`).
pub(crate) fn static_member(builtin: Builtin, key: &str) -> Value {
    let member = match (builtin, key) {
        (_, "name") => return Value::str(builtin.name()),
        (Builtin::Date, "now") => Builtin::DateNow,
        (Builtin::ObjectCtor, "keys") => Builtin::ObjectKeys,
        (Builtin::ObjectCtor, "values") => Builtin::ObjectValues,
        (Builtin::ObjectCtor, "entries") => Builtin::ObjectEntries,
        (Builtin::ObjectCtor, "assign") => Builtin::ObjectAssign,
        (Builtin::ArrayCtor, "isArray") => Builtin::ArrayIsArray,
        _ => return Value::Undefined,
    };
    Value::Builtin(member)
}

pub(crate) fn arg(args: &[Value], index: usize) -> Value {
    args.get(index).cloned().unwrap_or(Value::Undefined)
}

/// Line written by `print` and `console.*`.
pub(crate) fn format_line(args: &[Value]) -> String {
    args.iter()
        .map(|v| match v {
            Value::Str(s) => s.clone(),
            other => other.inspect(),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Calls a native function.
pub(crate) fn call(interp: &mut Interp<'_>, builtin: Builtin, args: Vec<Value>) -> Eval<Value> {
    let first = arg(&args, 0);
    Ok(match builtin {
        Builtin::Print | Builtin::ConsoleLog => {
            interp.emit(format_line(&args));
            Value::Undefined
        }
        Builtin::PrintJson => {
            let line = match &first {
                Value::Undefined => "undefined".to_string(),
                Value::Str(s) => shell::quote(s),
                other => shell::to_shell_pretty(&to_json(other).map_err(|m| throw("TypeError", m))?),
            };
            interp.emit(line);
            Value::Undefined
        }
        Builtin::Show => show(interp, &first)?,
        Builtin::ObjectId => object_id(&first)?,
        Builtin::IsoDate => match &first {
            Value::Undefined => Value::Date(Utc::now()),
            other => Value::Date(
                date_from(other).ok_or_else(|| throw("Error", format!("invalid ISO date: {}", other.to_display())))?,
            ),
        },
        // Called without `new`, Date returns a string.
        Builtin::Date => Value::Str(Value::Date(Utc::now()).to_display()),
        Builtin::DateNow => Value::Number(Utc::now().timestamp_millis() as f64),
        Builtin::NumberInt => Value::Int32(to_int32(first.to_number())),
        Builtin::NumberLong => number_long(&first)?,
        Builtin::JsonStringify => json_stringify(&first, &arg(&args, 2))?,
        Builtin::JsonParse => {
            let text = first.to_display();
            let json: serde_json::Value = serde_json::from_str(&text)
                .map_err(|e| throw("SyntaxError", format!("Unexpected token in JSON: {e}")))?;
            from_json(&json)
        }
        Builtin::Math(f) => Value::Number(math(f, &args)),
        Builtin::ObjectCtor => match first {
            Value::Object(_) | Value::Array(_) => first,
            _ => Value::object(Vec::new()),
        },
        Builtin::ObjectKeys => Value::array(entries(&first).into_iter().map(|(k, _)| Value::Str(k)).collect()),
        Builtin::ObjectValues => Value::array(entries(&first).into_iter().map(|(_, v)| v).collect()),
        Builtin::ObjectEntries => Value::array(
            entries(&first)
                .into_iter()
                .map(|(k, v)| Value::array(vec![Value::Str(k), v]))
                .collect(),
        ),
        Builtin::ObjectAssign => {
            let Value::Object(target) = &first else {
                return Err(throw("TypeError", "Cannot convert undefined or null to object"));
            };
            for source in args.iter().skip(1) {
                for (k, v) in entries(source) {
                    target.borrow_mut().set(&k, v);
                }
            }
            first
        }
        Builtin::ArrayCtor => match args.as_slice() {
            [Value::Number(n)] => {
                if n.fract() != 0.0 || !(0.0..=MAX_ARRAY_INDEX as f64).contains(n) {
                    return Err(throw("RangeError", "Invalid array length"));
                }
                Value::array(vec![Value::Undefined; *n as usize])
            }
            _ => Value::array(args),
        },
        Builtin::ArrayIsArray => Value::Bool(matches!(first, Value::Array(_))),
        Builtin::ParseInt => Value::Number(parse_int(&first.to_display(), arg(&args, 1).to_number())),
        Builtin::ParseFloat => Value::Number(parse_float(&first.to_display())),
        Builtin::IsNaN => Value::Bool(first.to_number().is_nan()),
        Builtin::String => match args.first() {
            None => Value::str(""),
            Some(v) => Value::Str(v.to_display()),
        },
        Builtin::Number => match args.first() {
            None => Value::Number(0.0),
            Some(v) => Value::Number(v.to_number()),
        },
        Builtin::Boolean => Value::Bool(first.truthy()),
        Builtin::Error(kind) => {
            let message = match first {
                Value::Undefined => String::new(),
                other => other.to_display(),
            };
            Value::error(kind.name(), message)
        }
    })
}

/// `new <builtin>(...)`.
pub(crate) fn construct(interp: &mut Interp<'_>, builtin: Builtin, args: Vec<Value>) -> Eval<Value> {
    match builtin {
        Builtin::Date => new_date(&args),
        Builtin::ObjectId
        | Builtin::IsoDate
        | Builtin::NumberInt
        | Builtin::NumberLong
        | Builtin::ObjectCtor
        | Builtin::ArrayCtor
        | Builtin::String
        | Builtin::Number
        | Builtin::Boolean
        | Builtin::Error(_) => call(interp, builtin, args),
        other => Err(throw("TypeError", format!("{} is not a constructor", other.name()))),
    }
}

/// `value instanceof builtin`.
pub(crate) fn instance_of(value: &Value, builtin: Builtin) -> bool {
    match builtin {
        Builtin::Error(ErrorCtor::Error) => value.error_parts().is_some(),
        Builtin::Error(kind) => value
            .error_parts()
            .is_some_and(|(name, _)| name == kind.name()),
        Builtin::Date => matches!(value, Value::Date(_)),
        Builtin::ObjectId => matches!(value, Value::ObjectId(_)),
        Builtin::ArrayCtor => matches!(value, Value::Array(_)),
        Builtin::ObjectCtor => matches!(
            value,
            Value::Object(_) | Value::Array(_) | Value::Date(_) | Value::ObjectId(_)
        ) || value.is_callable(),
        _ => false,
    }
}

fn show(interp: &mut Interp<'_>, what: &Value) -> Eval<Value> {
    match what.to_display().as_str() {
        "collections" | "tables" => {
            let names = interp
                .store
                .collection_names()
                .map_err(|e| throw("MongoServerError", e.to_string()))?;
            for name in names {
                interp.emit(name);
            }
        }
        "dbs" | "databases" => {
            let database = interp.store.engine().database;
            interp.emit(database);
        }
        other => {
            return Err(throw("Error", format!("Don't know how to show {other}")));
        }
    }
    Ok(Value::Undefined)
}

fn object_id(arg: &Value) -> Eval<Value> {
    match arg {
        Value::Undefined | Value::Null => Ok(Value::ObjectId(ObjectId::new())),
        Value::ObjectId(id) => Ok(Value::ObjectId(*id)),
        Value::Str(s) => ObjectId::parse(s).map(Value::ObjectId).ok_or_else(|| {
            throw(
                "BSONError",
                "input must be a 24 character hex string, 12 byte Uint8Array, or an integer",
            )
        }),
        other => Err(throw(
            "BSONError",
            format!("Argument passed in must be a string, got {}", other.type_of()),
        )),
    }
}

fn number_long(arg: &Value) -> Eval<Value> {
    match arg {
        Value::Undefined => Ok(Value::Long(0)),
        Value::Str(s) => s
            .trim()
            .parse::<i64>()
            .map(Value::Long)
            .map_err(|_| throw("TypeError", format!("Invalid NumberLong value: {s}"))),
        Value::Long(n) => Ok(Value::Long(*n)),
        other => {
            let n = other.to_number();
            if n.is_finite() {
                Ok(Value::Long(n.trunc() as i64))
            } else {
                Err(throw("TypeError", format!("Invalid NumberLong value: {}", other.to_display())))
            }
        }
    }
}

fn to_int32(n: f64) -> i32 {
    if n.is_finite() {
        (n.trunc() as i64) as i32
    } else {
        0
    }
}

/// Parses the date strings accepted by `ISODate` and `new Date`.
pub(crate) fn parse_date(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(d) = DateTime::parse_from_rfc3339(s) {
        return Some(d.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn date_from(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Date(d) => Some(*d),
        Value::Str(s) => parse_date(s),
        other => {
            let ms = other.to_number();
            if ms.is_finite() {
                Utc.timestamp_millis_opt(ms as i64).single()
            } else {
                None
            }
        }
    }
}

fn new_date(args: &[Value]) -> Eval<Value> {
    let date = match args {
        [] => Some(Utc::now()),
        [single] => date_from(single),
        parts => {
            let part = |i: usize, default: f64| parts.get(i).map_or(default, Value::to_number);
            let year = part(0, 1970.0);
            let month = part(1, 0.0);
            if !year.is_finite() || !month.is_finite() {
                None
            } else {
                let january = Utc.with_ymd_and_hms(year as i32, 1, 1, 0, 0, 0).single();
                january.and_then(|base| {
                    let total_months = month as i64;
                    let shifted = if total_months >= 0 {
                        base.checked_add_months(chrono::Months::new(total_months as u32))
                    } else {
                        base.checked_sub_months(chrono::Months::new(total_months.unsigned_abs() as u32))
                    }?;
                    let offset_ms = (part(2, 1.0) - 1.0) * 86_400_000.0
                        + part(3, 0.0) * 3_600_000.0
                        + part(4, 0.0) * 60_000.0
                        + part(5, 0.0) * 1_000.0
                        + part(6, 0.0);
                    if !offset_ms.is_finite() {
                        return None;
                    }
                    shifted.checked_add_signed(chrono::Duration::milliseconds(offset_ms as i64))
                })
            }
        }
    };
    date.map(Value::Date)
        .ok_or_else(|| throw("RangeError", "Invalid time value"))
}

fn json_stringify(value: &Value, space: &Value) -> Eval<Value> {
    if matches!(value, Value::Undefined) || value.is_callable() {
        return Ok(Value::Undefined);
    }
    let json = to_json(value).map_err(|m| throw("TypeError", m))?;
    let indent = match space {
        Value::Number(n) if *n >= 1.0 => " ".repeat(n.min(10.0) as usize),
        Value::Str(s) => s.chars().take(10).collect(),
        _ => String::new(),
    };
    let text = if indent.is_empty() {
        serde_json::to_string(&json)
    } else {
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(indent.as_bytes());
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
        serde::Serialize::serialize(&json, &mut ser)
            .map(|()| String::from_utf8_lossy(&buf).into_owned())
    };
    text.map(Value::Str).map_err(|e| throw("TypeError", e.to_string()))
}

fn math(f: MathFn, args: &[Value]) -> f64 {
    let x = arg(args, 0).to_number();
    match f {
        MathFn::Abs => x.abs(),
        MathFn::Ceil => x.ceil(),
        MathFn::Floor => x.floor(),
        MathFn::Round => (x + 0.5).floor(),
        MathFn::Trunc => x.trunc(),
        MathFn::Sign => {
            if x.is_nan() || x == 0.0 {
                x
            } else {
                x.signum()
            }
        }
        MathFn::Sqrt => x.sqrt(),
        MathFn::Pow => x.powf(arg(args, 1).to_number()),
        MathFn::Min => args.iter().map(Value::to_number).fold(f64::INFINITY, |acc, n| {
            if acc.is_nan() || n.is_nan() {
                f64::NAN
            } else {
                acc.min(n)
            }
        }),
        MathFn::Max => args.iter().map(Value::to_number).fold(f64::NEG_INFINITY, |acc, n| {
            if acc.is_nan() || n.is_nan() {
                f64::NAN
            } else {
                acc.max(n)
            }
        }),
        MathFn::Random => rand::random::<f64>(),
    }
}

/// Own enumerable entries of a value, as used by `Object.keys` and `for..in`.
pub(crate) fn entries(value: &Value) -> Vec<(String, Value)> {
    match value {
        Value::Object(obj) => obj.borrow().props.clone(),
        Value::Array(items) => items
            .borrow()
            .iter()
            .enumerate()
            .map(|(i, v)| (i.to_string(), v.clone()))
            .collect(),
        Value::Str(s) => s
            .chars()
            .enumerate()
            .map(|(i, c)| (i.to_string(), Value::Str(c.to_string())))
            .collect(),
        _ => Vec::new(),
    }
}

fn parse_int(s: &str, radix: f64) -> f64 {
    let mut s = s.trim_start();
    let negative = s.starts_with('-');
    if negative || s.starts_with('+') {
        s = &s[1..];
    }
    let explicit = radix.is_finite() && radix != 0.0;
    let mut radix = if explicit { radix as u32 } else { 10 };
    if (!explicit || radix == 16) && (s.starts_with("0x") || s.starts_with("0X")) {
        s = &s[2..];
        radix = 16;
    }
    if !(2..=36).contains(&radix) {
        return f64::NAN;
    }
    let digits: Vec<u32> = s.chars().map_while(|c| c.to_digit(radix)).collect();
    if digits.is_empty() {
        return f64::NAN;
    }
    let n = digits
        .iter()
        .fold(0.0, |acc, d| acc * f64::from(radix) + f64::from(*d));
    if negative {
        -n
    } else {
        n
    }
}

fn parse_float(s: &str) -> f64 {
    let s = s.trim_start();
    for prefix in ["Infinity", "+Infinity"] {
        if s.starts_with(prefix) {
            return f64::INFINITY;
        }
    }
    if s.starts_with("-Infinity") {
        return f64::NEG_INFINITY;
    }
    let bytes = s.as_bytes();
    let mut end = 0;
    if matches!(bytes.first(), Some(b'+' | b'-')) {
        end = 1;
    }
    let digits_start = end;
    while bytes.get(end).is_some_and(u8::is_ascii_digit) {
        end += 1;
    }
    if bytes.get(end) == Some(&b'.') {
        end += 1;
        while bytes.get(end).is_some_and(u8::is_ascii_digit) {
            end += 1;
        }
    }
    if end == digits_start || &s[digits_start..end] == "." {
        return f64::NAN;
    }
    if matches!(bytes.get(end), Some(b'e' | b'E')) {
        let mut exp_end = end + 1;
        if matches!(bytes.get(exp_end), Some(b'+' | b'-')) {
            exp_end += 1;
        }
        let exp_digits = exp_end;
        while bytes.get(exp_end).is_some_and(u8::is_ascii_digit) {
            exp_end += 1;
        }
        if exp_end > exp_digits {
            end = exp_end;
        }
    }
    s[..end].parse().unwrap_or(f64::NAN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_int() {
        assert_eq!(parse_int("42px", f64::NAN), 42.0);
        assert_eq!(parse_int("  -17", f64::NAN), -17.0);
        assert_eq!(parse_int("0x1f", f64::NAN), 31.0);
        assert_eq!(parse_int("ff", 16.0), 255.0);
        assert!(parse_int("abc", f64::NAN).is_nan());
    }

    #[test]
    fn test_parse_float() {
        assert_eq!(parse_float("3.5kg"), 3.5);
        assert_eq!(parse_float("-.5"), -0.5);
        assert_eq!(parse_float("1e3x"), 1000.0);
        assert_eq!(parse_float("2e"), 2.0);
        assert!(parse_float("kg").is_nan());
        assert!(parse_float(".").is_nan());
    }

    #[test]
    fn test_parse_date() {
        let d = parse_date("2024-03-01T12:00:00Z").unwrap();
        assert_eq!(d.timestamp(), 1_709_294_400);
        assert_eq!(parse_date("2024-03-01").unwrap().timestamp(), 1_709_251_200);
        assert!(parse_date("yesterday").is_none());
    }

    #[test]
    fn test_new_date_components() {
        let Ok(Value::Date(d)) = new_date(&[Value::Number(2024.0), Value::Number(2.0), Value::Number(1.0)])
        else {
            panic!("expected a date");
        };
        assert_eq!(d, parse_date("2024-03-01").unwrap());
        assert!(new_date(&[Value::str("garbage")]).is_err());
    }

    #[test]
    fn test_math() {
        assert_eq!(math(MathFn::Round, &[Value::Number(2.5)]), 3.0);
        assert_eq!(math(MathFn::Round, &[Value::Number(-2.5)]), -2.0);
        assert_eq!(math(MathFn::Max, &[]), f64::NEG_INFINITY);
        assert_eq!(
            math(MathFn::Min, &[Value::Number(3.0), Value::str("1")]),
            1.0
        );
        let r = math(MathFn::Random, &[]);
        assert!((0.0..1.0).contains(&r));
    }

    #[test]
    fn test_format_line() {
        let line = format_line(&[Value::str("count:"), Value::Number(3.0), Value::str("x")]);
        assert_eq!(line, "count: 3 x");
    }
}
