//! `!x` conversions and the text helpers behind them

use super::value::{Val, parse_datetime_text};
use chrono::{DateTime, NaiveDateTime};
use regex::Regex;
use std::sync::LazyLock;

/// A single-letter conversion applied before the format spec
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Conversion {
    /// `l`
    Lower,
    /// `u`
    Upper,
    /// `c`
    Capitalize,
    /// `C`
    CapWords,
    /// `t`
    Strip,
    /// `s`
    Str,
    /// `r`
    Repr,
    /// `a`
    Ascii,
    /// `S`
    ToString,
    /// `j`
    Json,
    /// `d`
    Datetime,
    /// `T`
    Timestamp,
    /// `U`
    Unescape,
    /// `H`
    RemoveHtml,
    /// `g`
    Slugify,
    /// `i`
    Int,
    /// `f`
    Float,
    /// `n`
    Len,
    /// `q`
    Quote,
    /// `Q`
    Unquote,
}

impl Conversion {
    /// Look up the conversion for a letter
    pub fn from_char(c: char) -> Option<Self> {
        let conversion = match c {
            'l' => Conversion::Lower,
            'u' => Conversion::Upper,
            'c' => Conversion::Capitalize,
            'C' => Conversion::CapWords,
            't' => Conversion::Strip,
            's' => Conversion::Str,
            'r' => Conversion::Repr,
            'a' => Conversion::Ascii,
            'S' => Conversion::ToString,
            'j' => Conversion::Json,
            'd' => Conversion::Datetime,
            'T' => Conversion::Timestamp,
            'U' => Conversion::Unescape,
            'H' => Conversion::RemoveHtml,
            'g' => Conversion::Slugify,
            'i' => Conversion::Int,
            'f' => Conversion::Float,
            'n' => Conversion::Len,
            'q' => Conversion::Quote,
            'Q' => Conversion::Unquote,
            _ => return None,
        };
        Some(conversion)
    }

    /// Apply the conversion
    pub fn apply(self, value: Val) -> Result<Val, String> {
        let converted = match self {
            Conversion::Lower => Val::Str(text(&value, 'l')?.to_lowercase()),
            Conversion::Upper => Val::Str(text(&value, 'u')?.to_uppercase()),
            Conversion::Capitalize => Val::Str(capitalize(text(&value, 'c')?)),
            Conversion::CapWords => Val::Str(
                text(&value, 'C')?
                    .split_whitespace()
                    .map(capitalize)
                    .collect::<Vec<_>>()
                    .join(" "),
            ),
            Conversion::Strip => Val::Str(text(&value, 't')?.trim().to_string()),
            Conversion::Str => Val::Str(value.to_str()),
            Conversion::Repr => Val::Str(value.repr()),
            Conversion::Ascii => Val::Str(value.ascii()),
            Conversion::ToString => Val::Str(to_string(&value)),
            Conversion::Json => Val::Str(value.to_json()),
            Conversion::Datetime => parse_timestamp(&value).map_or(Val::None, Val::DateTime),
            Conversion::Timestamp => Val::Int(to_timestamp(&value)),
            Conversion::Unescape => match value {
                Val::Str(s) => Val::Str(unescape_html(&s)),
                other => other,
            },
            Conversion::RemoveHtml => Val::Str(remove_html(&value.to_str())),
            Conversion::Slugify => Val::Str(slugify(&value.to_str())),
            Conversion::Int => Val::Int(to_int(&value)?),
            Conversion::Float => Val::Float(to_float(&value)?),
            Conversion::Len => Val::Int(
                value
                    .len()
                    .ok_or_else(|| format!("object of type '{}' has no len()", value.type_name()))?
                    as i64,
            ),
            Conversion::Quote => Val::Str(quote(&value.to_str())),
            Conversion::Unquote => Val::Str(
                urlencoding::decode(&value.to_str())
                    .map(|s| s.into_owned())
                    .unwrap_or_else(|_| value.to_str()),
            ),
        };
        Ok(converted)
    }
}

fn text(value: &Val, letter: char) -> Result<&str, String> {
    value.as_str().ok_or_else(|| {
        format!(
            "conversion '!{letter}' requires a string, got '{}'",
            value.type_name()
        )
    })
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

/// `S`: empty for falsy values, `", "`-joined lists, `str()` otherwise
pub fn to_string(value: &Val) -> String {
    match value {
        v if !v.truthy() => String::new(),
        Val::List(items) => items
            .iter()
            .map(Val::to_str)
            .collect::<Vec<_>>()
            .join(", "),
        other => other.to_str(),
    }
}

/// UNIX timestamp → datetime; `None` for anything unparseable
pub fn parse_timestamp(value: &Val) -> Option<NaiveDateTime> {
    let seconds = match value {
        Val::Int(i) => *i,
        Val::Float(f) if f.is_finite() => f.trunc() as i64,
        Val::Str(s) => s.trim().parse::<i64>().ok()?,
        _ => return None,
    };
    DateTime::from_timestamp(seconds, 0).map(|dt| dt.naive_utc())
}

/// Datetime → UNIX timestamp; `0` for anything that is not a datetime
pub fn to_timestamp(value: &Val) -> i64 {
    match value {
        Val::DateTime(dt) => dt.and_utc().timestamp(),
        Val::Str(s) => parse_datetime_text(s).map_or(0, |dt| dt.and_utc().timestamp()),
        _ => 0,
    }
}

fn to_int(value: &Val) -> Result<i64, String> {
    match value {
        Val::Bool(b) => Ok(i64::from(*b)),
        Val::Int(i) => Ok(*i),
        Val::Float(f) if f.is_finite() => Ok(f.trunc() as i64),
        Val::Str(s) => s
            .trim()
            .parse()
            .map_err(|_| format!("invalid literal for int(): '{s}'")),
        other => Err(format!(
            "int() argument must be a string or a number, not '{}'",
            other.type_name()
        )),
    }
}

fn to_float(value: &Val) -> Result<f64, String> {
    match value {
        Val::Str(s) => s
            .trim()
            .parse()
            .map_err(|_| format!("could not convert string to float: '{s}'")),
        other => other.as_f64().ok_or_else(|| {
            format!(
                "float() argument must be a string or a number, not '{}'",
                other.type_name()
            )
        }),
    }
}

/// Percent-encode everything except unreserved characters and `/`
pub fn quote(s: &str) -> String {
    urlencoding::encode(s).replace("%2F", "/")
}

#[allow(clippy::expect_used)]
static ENTITY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"&(#[0-9]+|#[xX][0-9a-fA-F]+|[A-Za-z][A-Za-z0-9]*);").expect("valid entity regex")
});

/// Named entities recognised by [`unescape_html`]
const NAMED_ENTITIES: &[(&str, &str)] = &[
    ("amp", "&"),
    ("lt", "<"),
    ("gt", ">"),
    ("quot", "\""),
    ("apos", "'"),
    ("nbsp", "\u{a0}"),
    ("copy", "©"),
    ("reg", "®"),
    ("trade", "™"),
    ("hellip", "…"),
    ("mdash", "—"),
    ("ndash", "–"),
    ("lsquo", "‘"),
    ("rsquo", "’"),
    ("ldquo", "“"),
    ("rdquo", "”"),
    ("laquo", "«"),
    ("raquo", "»"),
    ("middot", "·"),
    ("bull", "•"),
    ("deg", "°"),
    ("times", "×"),
    ("euro", "€"),
    ("pound", "£"),
    ("yen", "¥"),
    ("cent", "¢"),
    ("sect", "§"),
    ("para", "¶"),
    ("shy", "\u{ad}"),
];

/// Replace HTML character references with the characters they name
pub fn unescape_html(s: &str) -> String {
    if !s.contains('&') {
        return s.to_string();
    }
    ENTITY_RE
        .replace_all(s, |caps: &regex::Captures<'_>| {
            let body = &caps[1];
            let decoded = if let Some(hex) = body
                .strip_prefix("#x")
                .or_else(|| body.strip_prefix("#X"))
            {
                u32::from_str_radix(hex, 16).ok().and_then(char::from_u32)
            } else if let Some(dec) = body.strip_prefix('#') {
                dec.parse::<u32>().ok().and_then(char::from_u32)
            } else {
                NAMED_ENTITIES
                    .iter()
                    .find(|(name, _)| *name == body)
                    .and_then(|(_, text)| text.chars().next())
            };
            match decoded {
                Some(c) => c.to_string(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Strip tags, unescape entities and collapse whitespace
pub fn remove_html(s: &str) -> String {
    let mut clean = String::with_capacity(s.len());
    let mut in_tag = false;
    for c in s.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => clean.push(c),
            _ => {}
        }
    }
    unescape_html(&clean)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Lowercase, drop punctuation and join words with `-`
pub fn slugify(s: &str) -> String {
    let kept: String = s
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-' || c.is_whitespace())
        .collect();

    let mut slug = String::with_capacity(kept.len());
    let mut pending_dash = false;
    for c in kept.chars() {
        if c == '-' || c.is_whitespace() {
            pending_dash = true;
        } else {
            if pending_dash {
                slug.push('-');
                pending_dash = false;
            }
            slug.push(c);
        }
    }
    if pending_dash {
        slug.push('-');
    }
    slug.trim_matches(['-', '_']).to_string()
}
