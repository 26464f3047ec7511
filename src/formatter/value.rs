//! Dynamic values seen by format strings and expressions
//!
//! Kwdict values arrive as JSON; while a field is evaluated they are lifted
//! into [`Val`], which adds datetimes and follows the usual scripting-language
//! rules for truthiness, `str()`/`repr()` output and comparisons.

use crate::types::{Kwdict, Value};
use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use std::cmp::Ordering;
use std::fmt::Write as _;

/// A value flowing through a compiled field
#[derive(Clone, Debug, PartialEq)]
pub enum Val {
    /// Absent / null
    None,
    /// Boolean
    Bool(bool),
    /// Integer
    Int(i64),
    /// Floating point number
    Float(f64),
    /// Text
    Str(String),
    /// Ordered list
    List(Vec<Val>),
    /// Ordered string-keyed map
    Map(Vec<(String, Val)>),
    /// Naive datetime (UTC unless offset by a format spec)
    DateTime(NaiveDateTime),
}

impl Val {
    /// Truthiness: empty, zero and none are false
    pub fn truthy(&self) -> bool {
        match self {
            Val::None => false,
            Val::Bool(b) => *b,
            Val::Int(i) => *i != 0,
            Val::Float(f) => *f != 0.0,
            Val::Str(s) => !s.is_empty(),
            Val::List(l) => !l.is_empty(),
            Val::Map(m) => !m.is_empty(),
            Val::DateTime(_) => true,
        }
    }

    /// Short type name used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Val::None => "NoneType",
            Val::Bool(_) => "bool",
            Val::Int(_) => "int",
            Val::Float(_) => "float",
            Val::Str(_) => "str",
            Val::List(_) => "list",
            Val::Map(_) => "dict",
            Val::DateTime(_) => "datetime",
        }
    }

    /// Borrow the text of a `Str`
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Val::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric view of booleans, integers and floats
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Val::Bool(b) => Some(f64::from(u8::from(*b))),
            Val::Int(i) => Some(*i as f64),
            Val::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Integer view of booleans and integers
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Val::Bool(b) => Some(i64::from(*b)),
            Val::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Look up `key` in a map
    pub fn get(&self, key: &str) -> Option<&Val> {
        match self {
            Val::Map(entries) => entries.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    /// Lift a whole kwdict into a map value
    pub fn from_kwdict(kwdict: &Kwdict) -> Val {
        Val::Map(
            kwdict
                .iter()
                .map(|(k, v)| (k.clone(), Val::from(v)))
                .collect(),
        )
    }

    /// Convert back into JSON; datetimes become their `str()` form
    pub fn to_value(&self) -> Value {
        match self {
            Val::None => Value::Null,
            Val::Bool(b) => Value::Bool(*b),
            Val::Int(i) => Value::from(*i),
            Val::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Val::Str(s) => Value::String(s.clone()),
            Val::List(items) => Value::Array(items.iter().map(Val::to_value).collect()),
            Val::Map(entries) => Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_value()))
                    .collect(),
            ),
            Val::DateTime(dt) => Value::String(datetime_str(dt)),
        }
    }

    /// `str()` rendering
    pub fn to_str(&self) -> String {
        match self {
            Val::Str(s) => s.clone(),
            Val::DateTime(dt) => datetime_str(dt),
            other => other.repr(),
        }
    }

    /// `repr()` rendering
    pub fn repr(&self) -> String {
        let mut out = String::new();
        self.write_repr(&mut out, false);
        out
    }

    /// `ascii()` rendering: `repr()` with non-ASCII characters escaped
    pub fn ascii(&self) -> String {
        let mut out = String::new();
        self.write_repr(&mut out, true);
        out
    }

    fn write_repr(&self, out: &mut String, ascii: bool) {
        match self {
            Val::None => out.push_str("None"),
            Val::Bool(true) => out.push_str("True"),
            Val::Bool(false) => out.push_str("False"),
            Val::Int(i) => {
                let _ = write!(out, "{i}");
            }
            Val::Float(f) => out.push_str(&float_repr(*f)),
            Val::Str(s) => write_str_repr(out, s, ascii),
            Val::List(items) => {
                out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    item.write_repr(out, ascii);
                }
                out.push(']');
            }
            Val::Map(entries) => {
                out.push('{');
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    write_str_repr(out, k, ascii);
                    out.push_str(": ");
                    v.write_repr(out, ascii);
                }
                out.push('}');
            }
            Val::DateTime(dt) => {
                let _ = write!(
                    out,
                    "datetime.datetime({}, {}, {}, {}, {}",
                    dt.year(),
                    dt.month(),
                    dt.day(),
                    dt.hour(),
                    dt.minute()
                );
                let micro = dt.nanosecond() / 1000;
                if dt.second() != 0 || micro != 0 {
                    let _ = write!(out, ", {}", dt.second());
                }
                if micro != 0 {
                    let _ = write!(out, ", {micro}");
                }
                out.push(')');
            }
        }
    }

    /// JSON text with `", "`/`": "` separators and non-ASCII escaped
    pub fn to_json(&self) -> String {
        let mut out = String::new();
        self.write_json(&mut out);
        out
    }

    fn write_json(&self, out: &mut String) {
        match self {
            Val::None => out.push_str("null"),
            Val::Bool(true) => out.push_str("true"),
            Val::Bool(false) => out.push_str("false"),
            Val::Int(i) => {
                let _ = write!(out, "{i}");
            }
            Val::Float(f) if f.is_nan() => out.push_str("NaN"),
            Val::Float(f) if f.is_infinite() => {
                out.push_str(if *f > 0.0 { "Infinity" } else { "-Infinity" })
            }
            Val::Float(f) => out.push_str(&float_repr(*f)),
            Val::Str(s) => write_json_str(out, s),
            Val::DateTime(dt) => write_json_str(out, &datetime_str(dt)),
            Val::List(items) => {
                out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    item.write_json(out);
                }
                out.push(']');
            }
            Val::Map(entries) => {
                out.push('{');
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    write_json_str(out, k);
                    out.push_str(": ");
                    v.write_json(out);
                }
                out.push('}');
            }
        }
    }

    /// Equality across numeric types (`1 == 1.0 == True`)
    pub fn loose_eq(&self, other: &Val) -> bool {
        match (self.as_f64(), other.as_f64()) {
            (Some(a), Some(b)) => a == b,
            _ => match (self, other) {
                (Val::List(a), Val::List(b)) => {
                    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.loose_eq(y))
                }
                _ => self == other,
            },
        }
    }

    /// Ordering; `None` when the two values cannot be compared
    pub fn compare(&self, other: &Val) -> Option<Ordering> {
        if let (Some(a), Some(b)) = (self.as_f64(), other.as_f64()) {
            if let (Some(a), Some(b)) = (self.as_i64(), other.as_i64()) {
                return Some(a.cmp(&b));
            }
            return a.partial_cmp(&b);
        }
        match (self, other) {
            (Val::Str(a), Val::Str(b)) => Some(a.cmp(b)),
            (Val::DateTime(a), Val::DateTime(b)) => Some(a.cmp(b)),
            (Val::List(a), Val::List(b)) => {
                for (x, y) in a.iter().zip(b) {
                    if x.loose_eq(y) {
                        continue;
                    }
                    return x.compare(y);
                }
                Some(a.len().cmp(&b.len()))
            }
            _ => None,
        }
    }

    /// Length of strings (in characters), lists and maps
    pub fn len(&self) -> Option<usize> {
        match self {
            Val::Str(s) => Some(s.chars().count()),
            Val::List(l) => Some(l.len()),
            Val::Map(m) => Some(m.len()),
            _ => None,
        }
    }
}

impl From<&Value> for Val {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => Val::None,
            Value::Bool(b) => Val::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Val::Int(i),
                None => Val::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => Val::Str(s.clone()),
            Value::Array(items) => Val::List(items.iter().map(Val::from).collect()),
            Value::Object(map) => Val::Map(
                map.iter()
                    .map(|(k, v)| (k.clone(), Val::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<&str> for Val {
    fn from(s: &str) -> Self {
        Val::Str(s.to_string())
    }
}

impl From<String> for Val {
    fn from(s: String) -> Self {
        Val::Str(s)
    }
}

/// `str()` of a datetime: `YYYY-MM-DD HH:MM:SS[.ffffff]`
pub fn datetime_str(dt: &NaiveDateTime) -> String {
    let micro = dt.nanosecond() / 1000;
    let mut out = String::with_capacity(26);
    let _ = write!(out, "{}", dt.format("%Y-%m-%d %H:%M:%S"));
    if micro != 0 {
        let _ = write!(out, ".{micro:06}");
    }
    out
}

/// Parse the common textual datetime layouts found in metadata
pub fn parse_datetime_text(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(text) {
        return Some(dt.naive_utc());
    }
    const LAYOUTS: [&str; 4] = [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S",
    ];
    for layout in LAYOUTS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, layout) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// Shortest round-trip float rendering (`1.0`, `1e+16`, `inf`)
pub fn float_repr(f: f64) -> String {
    if f.is_nan() {
        return "nan".to_string();
    }
    if f.is_infinite() {
        return if f > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    let abs = f.abs();
    if abs != 0.0 && !(1e-4..1e16).contains(&abs) {
        return exponent_style(&format!("{f:e}"));
    }
    let mut s = format!("{f}");
    if !s.contains('.') {
        s.push_str(".0");
    }
    s
}

/// Rewrite Rust exponent output (`1.5e7`, `2e-5`) as `1.5e+07`, `2e-05`
pub(crate) fn exponent_style(s: &str) -> String {
    match s.split_once(['e', 'E']) {
        Some((mantissa, exp)) => {
            let marker = if s.contains('E') { 'E' } else { 'e' };
            let (sign, digits) = match exp.strip_prefix('-') {
                Some(d) => ('-', d),
                None => ('+', exp.trim_start_matches('+')),
            };
            format!("{mantissa}{marker}{sign}{digits:0>2}")
        }
        None => s.to_string(),
    }
}

fn write_str_repr(out: &mut String, s: &str, ascii: bool) {
    let quote = if s.contains('\'') && !s.contains('"') {
        '"'
    } else {
        '\''
    };
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                let _ = write!(out, "\\x{:02x}", c as u32);
            }
            c if ascii && !c.is_ascii() => escape_non_ascii(out, c),
            c => out.push(c),
        }
    }
    out.push(quote);
}

fn escape_non_ascii(out: &mut String, c: char) {
    let code = c as u32;
    let _ = if code < 0x100 {
        write!(out, "\\x{code:02x}")
    } else if code < 0x10000 {
        write!(out, "\\u{code:04x}")
    } else {
        write!(out, "\\U{code:08x}")
    };
}

fn write_json_str(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0c}' => out.push_str("\\f"),
            c if c.is_ascii() && (c as u32) >= 0x20 => out.push(c),
            c => {
                let mut units = [0u16; 2];
                for unit in c.encode_utf16(&mut units) {
                    let _ = write!(out, "\\u{unit:04x}");
                }
            }
        }
    }
    out.push('"');
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn str_and_repr_of_containers() {
        let v = Val::from(&json!(["a", "b", "c"]));
        assert_eq!(v.to_str(), "['a', 'b', 'c']");
        let v = Val::from(&json!({"a": "foo", "b": 0, "c": null}));
        assert_eq!(v.to_str(), "{'a': 'foo', 'b': 0, 'c': None}");
    }

    #[test]
    fn repr_picks_quotes() {
        assert_eq!(Val::from("it's").repr(), "\"it's\"");
        assert_eq!(Val::from("a\nb").repr(), "'a\\nb'");
    }

    #[test]
    fn ascii_escapes() {
        assert_eq!(Val::from("äöü").ascii(), "'\\xe4\\xf6\\xfc'");
        assert_eq!(Val::from("€").ascii(), "'\\u20ac'");
    }

    #[test]
    fn json_uses_spaced_separators() {
        let v = Val::from(&json!({"a": [1, 2.5], "b": "ü"}));
        assert_eq!(v.to_json(), r#"{"a": [1, 2.5], "b": "\u00fc"}"#);
    }

    #[test]
    fn float_rendering() {
        assert_eq!(float_repr(1.0), "1.0");
        assert_eq!(float_repr(0.5), "0.5");
        assert_eq!(float_repr(1e16), "1e+16");
        assert_eq!(float_repr(1.5e-7), "1.5e-07");
        assert_eq!(float_repr(f64::INFINITY), "inf");
    }

    #[test]
    fn datetime_rendering() {
        let dt = NaiveDate::from_ymd_opt(2010, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        assert_eq!(Val::DateTime(dt).to_str(), "2010-01-01 00:00:00");
        assert_eq!(
            Val::DateTime(dt).repr(),
            "datetime.datetime(2010, 1, 1, 0, 0)"
        );
    }

    #[test]
    fn truthiness() {
        assert!(!Val::None.truthy());
        assert!(!Val::Int(0).truthy());
        assert!(!Val::from("").truthy());
        assert!(Val::from("x").truthy());
        assert!(!Val::List(vec![]).truthy());
    }

    #[test]
    fn comparisons_cross_numeric_types() {
        assert!(Val::Int(1).loose_eq(&Val::Float(1.0)));
        assert!(Val::Bool(true).loose_eq(&Val::Int(1)));
        assert_eq!(Val::Int(2).compare(&Val::Float(2.5)), Some(Ordering::Less));
        assert_eq!(Val::from("a").compare(&Val::Int(1)), None);
    }

    #[test]
    fn parses_iso_datetimes() {
        assert!(parse_datetime_text("2010-01-01T12:00:00").is_some());
        assert!(parse_datetime_text("2010-01-01 12:00:00").is_some());
        assert!(parse_datetime_text("2010-01-01T12:00:00+02:00").is_some());
        assert!(parse_datetime_text("2010-01-01").is_some());
        assert!(parse_datetime_text("yesterday").is_none());
    }
}
