//! Standard format specifications: `[[fill]align][sign][#][0][width][,][.precision][type]`
//!
//! Datetimes (and strings that parse as one when the spec contains `%`) are
//! rendered with strftime patterns instead.

use super::value::{Val, exponent_style, float_repr, parse_datetime_text};
use chrono::NaiveDateTime;
use std::fmt::Write as _;

/// Render `value` according to `spec`
pub fn format_value(value: &Val, spec: &str) -> Result<String, String> {
    if spec.is_empty() {
        return Ok(value.to_str());
    }
    match value {
        Val::DateTime(dt) => strftime(dt, spec),
        Val::Str(s) if spec.contains('%') => match parse_datetime_text(s) {
            Some(dt) => strftime(&dt, spec),
            None => format_str(s, &Spec::parse(spec)?),
        },
        Val::Str(s) => format_str(s, &Spec::parse(spec)?),
        Val::Bool(b) => format_int(i64::from(*b), &Spec::parse(spec)?),
        Val::Int(i) => format_int(*i, &Spec::parse(spec)?),
        Val::Float(f) => format_float(*f, &Spec::parse(spec)?),
        other => Err(format!(
            "unsupported format string passed to {}.__format__",
            other.type_name()
        )),
    }
}

/// strftime rendering that reports bad patterns instead of panicking
pub fn strftime(dt: &NaiveDateTime, pattern: &str) -> Result<String, String> {
    let mut out = String::new();
    write!(out, "{}", dt.format(pattern))
        .map_err(|_| format!("invalid datetime format '{pattern}'"))?;
    Ok(out)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Align {
    Left,
    Right,
    Center,
    AfterSign,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Sign {
    Minus,
    Plus,
    Space,
}

#[derive(Clone, Debug, PartialEq)]
struct Spec {
    fill: char,
    align: Option<Align>,
    sign: Option<Sign>,
    alternate: bool,
    zero: bool,
    width: usize,
    grouping: Option<char>,
    precision: Option<usize>,
    kind: Option<char>,
}

fn align_of(c: char) -> Option<Align> {
    match c {
        '<' => Some(Align::Left),
        '>' => Some(Align::Right),
        '^' => Some(Align::Center),
        '=' => Some(Align::AfterSign),
        _ => None,
    }
}

impl Spec {
    fn parse(spec: &str) -> Result<Self, String> {
        let chars: Vec<char> = spec.chars().collect();
        let mut pos = 0;
        let mut parsed = Spec {
            fill: ' ',
            align: None,
            sign: None,
            alternate: false,
            zero: false,
            width: 0,
            grouping: None,
            precision: None,
            kind: None,
        };

        if chars.len() >= 2
            && let Some(align) = align_of(chars[1])
        {
            parsed.fill = chars[0];
            parsed.align = Some(align);
            pos = 2;
        } else if let Some(align) = chars.first().copied().and_then(align_of) {
            parsed.align = Some(align);
            pos = 1;
        }

        if let Some(&c) = chars.get(pos) {
            parsed.sign = match c {
                '+' => Some(Sign::Plus),
                '-' => Some(Sign::Minus),
                ' ' => Some(Sign::Space),
                _ => None,
            };
            if parsed.sign.is_some() {
                pos += 1;
            }
        }
        if chars.get(pos) == Some(&'#') {
            parsed.alternate = true;
            pos += 1;
        }
        if chars.get(pos) == Some(&'0') {
            parsed.zero = true;
            pos += 1;
        }

        let digits = |pos: &mut usize| -> Option<usize> {
            let start = *pos;
            while chars.get(*pos).is_some_and(char::is_ascii_digit) {
                *pos += 1;
            }
            (start != *pos).then(|| chars[start..*pos].iter().collect::<String>().parse().ok())?
        };

        if let Some(width) = digits(&mut pos) {
            parsed.width = width;
        }
        if let Some(&c @ (',' | '_')) = chars.get(pos) {
            parsed.grouping = Some(c);
            pos += 1;
        }
        if chars.get(pos) == Some(&'.') {
            pos += 1;
            parsed.precision =
                Some(digits(&mut pos).ok_or_else(|| "format specifier missing precision".to_string())?);
        }
        if let Some(&c) = chars.get(pos) {
            parsed.kind = Some(c);
            pos += 1;
        }
        if pos != chars.len() {
            return Err(format!("invalid format specifier '{spec}'"));
        }

        if parsed.zero && parsed.align.is_none() {
            parsed.fill = '0';
        }
        Ok(parsed)
    }

    fn pad(&self, sign: &str, body: &str, default: Align) -> String {
        let len = sign.chars().count() + body.chars().count();
        if len >= self.width {
            return format!("{sign}{body}");
        }
        let pad = self.width - len;
        let fill = |n: usize| std::iter::repeat_n(self.fill, n).collect::<String>();
        let align = self
            .align
            .unwrap_or(if self.zero && default == Align::Right {
                Align::AfterSign
            } else {
                default
            });
        match align {
            Align::Left => format!("{sign}{body}{}", fill(pad)),
            Align::Right => format!("{}{sign}{body}", fill(pad)),
            Align::Center => format!("{}{sign}{body}{}", fill(pad / 2), fill(pad - pad / 2)),
            Align::AfterSign => format!("{sign}{}{body}", fill(pad)),
        }
    }
}

fn format_str(s: &str, spec: &Spec) -> Result<String, String> {
    if !matches!(spec.kind, None | Some('s')) {
        return Err(format!(
            "unknown format code '{}' for object of type 'str'",
            spec.kind.unwrap_or_default()
        ));
    }
    if spec.sign.is_some() {
        return Err("sign not allowed in string format specifier".to_string());
    }
    if spec.alternate {
        return Err("alternate form (#) not allowed in string format specifier".to_string());
    }
    if spec.align == Some(Align::AfterSign) {
        return Err("'=' alignment not allowed in string format specifier".to_string());
    }
    let body: String = match spec.precision {
        Some(p) => s.chars().take(p).collect(),
        None => s.to_string(),
    };
    Ok(spec.pad("", &body, Align::Left))
}

fn sign_str(negative: bool, sign: Option<Sign>) -> &'static str {
    match (negative, sign) {
        (true, _) => "-",
        (false, Some(Sign::Plus)) => "+",
        (false, Some(Sign::Space)) => " ",
        _ => "",
    }
}

fn group_digits(digits: &str, separator: char, every: usize) -> String {
    let count = digits.chars().count();
    let mut out = String::with_capacity(count + count / every);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (count - i) % every == 0 {
            out.push(separator);
        }
        out.push(c);
    }
    out
}

fn format_int(value: i64, spec: &Spec) -> Result<String, String> {
    if matches!(spec.kind, Some('e' | 'E' | 'f' | 'F' | 'g' | 'G' | '%')) {
        return format_float(value as f64, spec);
    }
    if spec.precision.is_some() {
        return Err("precision not allowed in integer format specifier".to_string());
    }

    let magnitude = value.unsigned_abs();
    let (prefix, digits, group_every) = match spec.kind {
        None | Some('d') | Some('n') => ("", magnitude.to_string(), 3),
        Some('b') => ("0b", format!("{magnitude:b}"), 4),
        Some('o') => ("0o", format!("{magnitude:o}"), 4),
        Some('x') => ("0x", format!("{magnitude:x}"), 4),
        Some('X') => ("0X", format!("{magnitude:X}"), 4),
        Some('c') => {
            let c = u32::try_from(value)
                .ok()
                .and_then(char::from_u32)
                .ok_or_else(|| "%c arg not in range(0x110000)".to_string())?;
            return Ok(spec.pad("", &c.to_string(), Align::Right));
        }
        Some(other) => {
            return Err(format!("unknown format code '{other}' for object of type 'int'"));
        }
    };

    let digits = match spec.grouping {
        Some(sep) => group_digits(&digits, sep, group_every),
        None => digits,
    };
    let mut lead = sign_str(value < 0, spec.sign).to_string();
    if spec.alternate {
        lead.push_str(prefix);
    }
    Ok(spec.pad(&lead, &digits, Align::Right))
}

fn format_float(value: f64, spec: &Spec) -> Result<String, String> {
    let negative = value.is_sign_negative() && !value.is_nan();
    let magnitude = value.abs();
    let upper = matches!(spec.kind, Some('E' | 'F' | 'G'));

    let body = if !magnitude.is_finite() {
        let text = if magnitude.is_nan() { "nan" } else { "inf" };
        if upper {
            text.to_uppercase()
        } else {
            text.to_string()
        }
    } else {
        match spec.kind {
            Some('f' | 'F') => fixed(magnitude, spec.precision.unwrap_or(6), spec),
            Some('e' | 'E') => {
                let s = exponent_style(&format!("{magnitude:.*e}", spec.precision.unwrap_or(6)));
                if upper { s.to_uppercase() } else { s }
            }
            Some('%') => format!("{}%", fixed(magnitude * 100.0, spec.precision.unwrap_or(6), spec)),
            Some('g' | 'G') => {
                let s = general(magnitude, spec.precision.unwrap_or(6), spec.alternate, false);
                if upper { s.to_uppercase() } else { s }
            }
            None | Some('n') => match spec.precision {
                Some(p) => general(magnitude, p, spec.alternate, true),
                None => group_float(&float_repr(magnitude), spec),
            },
            Some(other) => {
                return Err(format!(
                    "unknown format code '{other}' for object of type 'float'"
                ));
            }
        }
    };
    Ok(spec.pad(sign_str(negative, spec.sign), &body, Align::Right))
}

fn fixed(magnitude: f64, precision: usize, spec: &Spec) -> String {
    let mut s = format!("{magnitude:.precision$}");
    if spec.alternate && precision == 0 {
        s.push('.');
    }
    group_float(&s, spec)
}

fn group_float(s: &str, spec: &Spec) -> String {
    match spec.grouping {
        Some(sep) => {
            let (int_part, rest) = s.split_at(s.find(['.', 'e']).unwrap_or(s.len()));
            format!("{}{rest}", group_digits(int_part, sep, 3))
        }
        None => s.to_string(),
    }
}

/// `g` formatting; `keep_point` renders integral values as `x.0` like an untyped spec
fn general(magnitude: f64, precision: usize, alternate: bool, keep_point: bool) -> String {
    let p = precision.max(1);
    if magnitude == 0.0 {
        return if keep_point { "0.0".to_string() } else { "0".to_string() };
    }
    let sci = format!("{magnitude:.*e}", p - 1);
    let exp: i32 = sci
        .split_once('e')
        .and_then(|(_, e)| e.parse().ok())
        .unwrap_or(0);

    if exp >= -4 && (exp as i64) < p as i64 {
        let decimals = (p as i64 - 1 - exp as i64).max(0) as usize;
        let mut s = format!("{magnitude:.decimals$}");
        if !alternate && s.contains('.') {
            s = s.trim_end_matches('0').trim_end_matches('.').to_string();
        }
        if keep_point && !s.contains('.') {
            s.push_str(".0");
        }
        s
    } else {
        let (mantissa, _) = sci.split_once('e').unwrap_or((&sci, ""));
        let mantissa = if !alternate && mantissa.contains('.') {
            mantissa.trim_end_matches('0').trim_end_matches('.')
        } else {
            mantissa
        };
        exponent_style(&format!("{mantissa}e{exp}"))
    }
}
