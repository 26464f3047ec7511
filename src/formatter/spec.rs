//! Chained format specifiers
//!
//! Each specifier consumes its `/`-terminated arguments and hands the rest of
//! the spec to the next link; whatever is left at the end is a standard format
//! spec (or strftime pattern for datetimes).

use super::BaseFormat;
use super::conversion::Conversion;
use super::standard;
use super::value::Val;
use chrono::{Duration, Local, NaiveDateTime, Offset};

/// Arithmetic operator of an `A` specifier
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArithOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
}

/// Offset of an `O` specifier
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UtcOffset {
    /// The local timezone offset at call time
    Local,
    /// A fixed offset in seconds
    Fixed(i64),
}

/// A compiled specifier chain
#[derive(Clone, Debug, PartialEq)]
pub enum Spec {
    /// `?before/after/`: wrap truthy values, blank out falsy ones
    Optional {
        /// Text put before the value
        before: String,
        /// Text put after the value
        after: String,
        /// Rest of the chain
        next: Box<Spec>,
    },
    /// `L<max>/<replacement>/`
    MaxLen {
        /// Maximum length in characters
        max: usize,
        /// Replacement for over-long output
        replacement: String,
        /// Rest of the chain
        next: Box<Spec>,
    },
    /// `J<separator>/`
    Join {
        /// Separator between elements
        separator: String,
        /// Rest of the chain
        next: Box<Spec>,
    },
    /// `R<old>/<new>/`
    Replace {
        /// Text to replace
        old: String,
        /// Replacement
        new: String,
        /// Rest of the chain
        next: Box<Spec>,
    },
    /// `D<strptime>/`
    ParseDate {
        /// Parse pattern
        pattern: String,
        /// Rest of the chain
        next: Box<Spec>,
    },
    /// `O<offset>/`
    Offset {
        /// Offset to add
        offset: UtcOffset,
        /// Rest of the chain
        next: Box<Spec>,
    },
    /// `A<op><n>/`
    Arithmetic {
        /// Operator
        op: ArithOp,
        /// Right-hand operand
        operand: Val,
        /// Rest of the chain
        next: Box<Spec>,
    },
    /// `S<order>/`
    Sort {
        /// Sort descending
        descending: bool,
        /// Rest of the chain
        next: Box<Spec>,
    },
    /// `X<max>/<ellipsis>/`
    Limit {
        /// Maximum length in characters, ellipsis included
        max: usize,
        /// Text appended to shortened values
        ellipsis: String,
        /// Rest of the chain
        next: Box<Spec>,
    },
    /// `C<conversions>/`
    Convert {
        /// Conversions applied in order
        conversions: Vec<Conversion>,
        /// Rest of the chain
        next: Box<Spec>,
    },
    /// Standard spec or strftime pattern; empty means the base format
    Standard(String),
}

/// Errors while compiling a spec chain
#[derive(Debug, PartialEq)]
pub(crate) enum SpecError {
    /// Malformed spec
    Syntax(String),
    /// Unknown letter in a `C` specifier
    Conversion(char),
}

fn take_args<'a>(spec: &'a str, count: usize, name: char) -> Result<Vec<&'a str>, SpecError> {
    let parts: Vec<&str> = spec.splitn(count + 1, '/').collect();
    if parts.len() < count + 1 {
        return Err(SpecError::Syntax(format!(
            "missing '/' terminator in '{name}' format specifier"
        )));
    }
    Ok(parts)
}

/// Integer parse that yields 0 for anything invalid
fn lenient_int(s: &str) -> usize {
    s.trim().parse().unwrap_or(0)
}

fn parse_offset(text: &str) -> Result<UtcOffset, SpecError> {
    if text == "local" {
        return Ok(UtcOffset::Local);
    }
    let invalid = || SpecError::Syntax(format!("invalid offset '{text}'"));
    let (sign, rest) = match text.chars().next() {
        Some('-') => (-1, &text[1..]),
        Some('+') => (1, &text[1..]),
        _ => (1, text),
    };
    let (hours, minutes) = match rest.split_once(':') {
        Some((h, m)) => (h, m),
        None if rest.len() > 2 => rest.split_at(2),
        None => (rest, "0"),
    };
    let hours: i64 = hours.parse().map_err(|_| invalid())?;
    let minutes: i64 = minutes.parse().map_err(|_| invalid())?;
    Ok(UtcOffset::Fixed(sign * (hours * 3600 + minutes * 60)))
}

impl Spec {
    /// Compile a spec string
    pub(crate) fn parse(spec: &str) -> Result<Spec, SpecError> {
        let Some(first) = spec.chars().next() else {
            return Ok(Spec::Standard(String::new()));
        };
        let body = &spec[first.len_utf8()..];

        let parsed = match first {
            '?' => {
                let args = take_args(body, 2, '?')?;
                Spec::Optional {
                    before: args[0].to_string(),
                    after: args[1].to_string(),
                    next: Box::new(Spec::parse(args[2])?),
                }
            }
            'L' => {
                let args = take_args(body, 2, 'L')?;
                Spec::MaxLen {
                    max: lenient_int(args[0]),
                    replacement: args[1].to_string(),
                    next: Box::new(Spec::parse(args[2])?),
                }
            }
            'J' => {
                let (separator, rest) = body.split_once('/').unwrap_or((body, ""));
                Spec::Join {
                    separator: separator.to_string(),
                    next: Box::new(Spec::parse(rest)?),
                }
            }
            'R' => {
                let args = take_args(body, 2, 'R')?;
                Spec::Replace {
                    old: args[0].to_string(),
                    new: args[1].to_string(),
                    next: Box::new(Spec::parse(args[2])?),
                }
            }
            'D' => {
                let args = take_args(body, 1, 'D')?;
                Spec::ParseDate {
                    pattern: args[0].to_string(),
                    next: Box::new(Spec::parse(args[1])?),
                }
            }
            'O' => {
                let args = take_args(body, 1, 'O')?;
                Spec::Offset {
                    offset: parse_offset(args[0])?,
                    next: Box::new(Spec::parse(args[1])?),
                }
            }
            'A' => {
                let args = take_args(body, 1, 'A')?;
                let mut chars = args[0].chars();
                let op = match chars.next() {
                    Some('+') => ArithOp::Add,
                    Some('-') => ArithOp::Sub,
                    Some('*') => ArithOp::Mul,
                    Some('/') => ArithOp::Div,
                    _ => {
                        return Err(SpecError::Syntax(format!(
                            "invalid arithmetic operator in 'A{}'",
                            args[0]
                        )));
                    }
                };
                let text = chars.as_str().trim();
                let operand = match text.parse::<i64>() {
                    Ok(i) => Val::Int(i),
                    Err(_) => Val::Float(text.parse().map_err(|_| {
                        SpecError::Syntax(format!("invalid arithmetic operand '{text}'"))
                    })?),
                };
                Spec::Arithmetic {
                    op,
                    operand,
                    next: Box::new(Spec::parse(args[1])?),
                }
            }
            'S' => {
                let args = take_args(body, 1, 'S')?;
                Spec::Sort {
                    descending: args[0].contains(['d', 'r']),
                    next: Box::new(Spec::parse(args[1])?),
                }
            }
            'X' => {
                let args = take_args(body, 2, 'X')?;
                Spec::Limit {
                    max: args[0].trim().parse().map_err(|_| {
                        SpecError::Syntax(format!("invalid length '{}' in 'X' specifier", args[0]))
                    })?,
                    ellipsis: args[1].to_string(),
                    next: Box::new(Spec::parse(args[2])?),
                }
            }
            'C' => {
                let args = take_args(body, 1, 'C')?;
                let conversions = args[0]
                    .chars()
                    .map(|c| Conversion::from_char(c).ok_or(SpecError::Conversion(c)))
                    .collect::<Result<Vec<_>, _>>()?;
                Spec::Convert {
                    conversions,
                    next: Box::new(Spec::parse(args[1])?),
                }
            }
            _ => Spec::Standard(spec.to_string()),
        };
        Ok(parsed)
    }

    /// Render `value` through the chain
    pub fn apply(&self, value: Val, base: BaseFormat) -> Result<String, String> {
        match self {
            Spec::Optional {
                before,
                after,
                next,
            } => {
                if value.truthy() {
                    Ok(format!("{before}{}{after}", next.apply(value, base)?))
                } else {
                    Ok(String::new())
                }
            }
            Spec::MaxLen {
                max,
                replacement,
                next,
            } => {
                let out = next.apply(value, base)?;
                if out.chars().count() <= *max {
                    Ok(out)
                } else {
                    Ok(replacement.clone())
                }
            }
            Spec::Join { separator, next } => {
                let joined = match value {
                    Val::List(items) => items
                        .iter()
                        .map(Val::to_str)
                        .collect::<Vec<_>>()
                        .join(separator),
                    Val::Str(s) => s
                        .chars()
                        .map(String::from)
                        .collect::<Vec<_>>()
                        .join(separator),
                    other => return Err(format!("can only join an iterable, not {}", other.type_name())),
                };
                next.apply(Val::Str(joined), base)
            }
            Spec::Replace { old, new, next } => match value {
                Val::Str(s) => next.apply(Val::Str(s.replace(old.as_str(), new)), base),
                other => Err(format!("'{}' object has no attribute 'replace'", other.type_name())),
            },
            Spec::ParseDate { pattern, next } => {
                let dt = match value {
                    Val::DateTime(dt) => dt,
                    Val::Str(s) => NaiveDateTime::parse_from_str(&s, pattern)
                        .or_else(|_| {
                            chrono::NaiveDate::parse_from_str(&s, pattern)
                                .map(|d| d.and_time(chrono::NaiveTime::MIN))
                        })
                        .map_err(|e| format!("time data '{s}' does not match '{pattern}': {e}"))?,
                    other => return Err(format!("cannot parse {} as datetime", other.type_name())),
                };
                next.apply(Val::DateTime(dt), base)
            }
            Spec::Offset { offset, next } => {
                let Val::DateTime(dt) = value else {
                    return Err(format!("cannot offset {}", value.type_name()));
                };
                let seconds = match offset {
                    UtcOffset::Local => i64::from(Local::now().offset().fix().local_minus_utc()),
                    UtcOffset::Fixed(s) => *s,
                };
                let shifted = dt
                    .checked_add_signed(Duration::seconds(seconds))
                    .ok_or_else(|| "datetime offset out of range".to_string())?;
                next.apply(Val::DateTime(shifted), base)
            }
            Spec::Arithmetic { op, operand, next } => {
                next.apply(arithmetic(&value, *op, operand)?, base)
            }
            Spec::Sort { descending, next } => {
                let mut items = match value {
                    Val::List(items) => items,
                    Val::Map(entries) => entries.into_iter().map(|(k, _)| Val::Str(k)).collect(),
                    Val::Str(s) => s.chars().map(|c| Val::Str(c.to_string())).collect(),
                    other => return Err(format!("'{}' object is not iterable", other.type_name())),
                };
                let mut failed = false;
                items.sort_by(|a, b| {
                    a.compare(b).unwrap_or_else(|| {
                        failed = true;
                        std::cmp::Ordering::Equal
                    })
                });
                if failed {
                    return Err("'<' not supported between mixed types".to_string());
                }
                if *descending {
                    items.reverse();
                }
                next.apply(Val::List(items), base)
            }
            Spec::Limit {
                max,
                ellipsis,
                next,
            } => {
                let text = value.to_str();
                if text.chars().count() > *max {
                    let keep = max.saturating_sub(ellipsis.chars().count());
                    let mut short: String = text.chars().take(keep).collect();
                    short.push_str(ellipsis);
                    next.apply(Val::Str(short), base)
                } else {
                    next.apply(Val::Str(text), base)
                }
            }
            Spec::Convert { conversions, next } => {
                let mut value = value;
                for conversion in conversions {
                    value = conversion.apply(value)?;
                }
                next.apply(value, base)
            }
            Spec::Standard(spec) if spec.is_empty() => Ok(match base {
                BaseFormat::Str => value.to_str(),
                BaseFormat::Json => value.to_json(),
            }),
            Spec::Standard(spec) => standard::format_value(&value, spec),
        }
    }
}

fn arithmetic(value: &Val, op: ArithOp, operand: &Val) -> Result<Val, String> {
    if let (Some(a), Some(b)) = (value.as_i64(), operand.as_i64()) {
        let result = match op {
            ArithOp::Add => a.checked_add(b),
            ArithOp::Sub => a.checked_sub(b),
            ArithOp::Mul => a.checked_mul(b),
            ArithOp::Div => {
                if b == 0 {
                    return Err("division by zero".to_string());
                }
                return Ok(Val::Float(a as f64 / b as f64));
            }
        };
        return result
            .map(Val::Int)
            .ok_or_else(|| "integer overflow".to_string());
    }
    match (value, operand.as_f64()) {
        (Val::DateTime(dt), Some(seconds)) if matches!(op, ArithOp::Add | ArithOp::Sub) => {
            let delta = Duration::milliseconds((seconds * 1000.0) as i64);
            let shifted = match op {
                ArithOp::Add => dt.checked_add_signed(delta),
                _ => dt.checked_sub_signed(delta),
            };
            shifted
                .map(Val::DateTime)
                .ok_or_else(|| "datetime out of range".to_string())
        }
        (value, Some(b)) => {
            let a = value
                .as_f64()
                .ok_or_else(|| format!("unsupported operand type '{}'", value.type_name()))?;
            let result = match op {
                ArithOp::Add => a + b,
                ArithOp::Sub => a - b,
                ArithOp::Mul => a * b,
                ArithOp::Div if b == 0.0 => return Err("division by zero".to_string()),
                ArithOp::Div => a / b,
            };
            Ok(Val::Float(result))
        }
        (_, None) => Err("unsupported arithmetic operand".to_string()),
    }
}
