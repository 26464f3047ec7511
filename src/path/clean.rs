//! Character restriction and removal for path segments

use crate::config::PathRestrict;
use crate::error::{Error, Result};
use crate::types::Value;
use regex::Regex;
use std::borrow::Cow;
use std::collections::HashMap;

/// Characters not allowed in Windows path segments
pub(crate) const WINDOWS_RESTRICT: &str = r#"\\|/<>:"?*"#;
/// Characters not allowed in Unix path segments
pub(crate) const UNIX_RESTRICT: &str = "/";
const ASCII_RESTRICT: &str = "^0-9A-Za-z_.";
const ASCII_PLUS_RESTRICT: &str = r"^0-9@-[\]-{ #-)+-.;=!}~";
/// Control characters removed from every path unless configured otherwise
pub(crate) const DEFAULT_REMOVE: &str = "\u{0}-\u{1f}\u{7f}";

/// Replaces or removes a set of characters
#[derive(Clone, Debug)]
pub(crate) enum Cleaner {
    /// Leave text untouched
    Identity,
    /// Replace one literal character
    Char(char, String),
    /// Replace every match of a character class
    Class(Regex, String),
    /// Per-character translation table
    Table(HashMap<char, String>),
}

impl Cleaner {
    /// Cleaner for the `path-restrict` / `path-replace` pair
    pub(crate) fn restrict(setting: &PathRestrict, replacement: &str) -> Result<Self> {
        match setting {
            PathRestrict::Table(table) => Self::table(table),
            PathRestrict::Named(name) => {
                let chars = match name.as_str() {
                    "auto" if cfg!(windows) => WINDOWS_RESTRICT,
                    "auto" | "unix" => UNIX_RESTRICT,
                    "windows" => WINDOWS_RESTRICT,
                    "ascii" => ASCII_RESTRICT,
                    "ascii+" => ASCII_PLUS_RESTRICT,
                    custom => custom,
                };
                Self::chars(chars, replacement, "path-restrict")
            }
        }
    }

    /// Cleaner deleting every character of the class `chars` (`path-remove`)
    pub(crate) fn remove(chars: &str) -> Result<Self> {
        Self::chars(chars, "", "path-remove")
    }

    fn chars(chars: &str, replacement: &str, key: &str) -> Result<Self> {
        let mut iter = chars.chars();
        match (iter.next(), iter.next()) {
            (None, _) => Ok(Cleaner::Identity),
            (Some(c), None) => Ok(Cleaner::Char(c, replacement.to_string())),
            _ => {
                let pattern = format!("[{}]", char_class(chars));
                let regex = Regex::new(&pattern).map_err(|e| {
                    Error::config(key, format!("invalid character class '{chars}': {e}"))
                })?;
                Ok(Cleaner::Class(regex, replacement.to_string()))
            }
        }
    }

    fn table(table: &serde_json::Map<String, Value>) -> Result<Self> {
        let mut map = HashMap::new();
        for (key, value) in table {
            let replacement = match value {
                Value::Null => String::new(),
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            let chars: Vec<char> = key.chars().collect();
            match chars.as_slice() {
                [] => {}
                [first, '-', last] => {
                    if first > last {
                        return Err(Error::config(
                            "path-restrict",
                            format!("invalid character range '{key}'"),
                        ));
                    }
                    for c in *first..=*last {
                        map.insert(c, replacement.clone());
                    }
                }
                chars => {
                    for c in chars {
                        map.insert(*c, replacement.clone());
                    }
                }
            }
        }
        Ok(Cleaner::Table(map))
    }

    /// Apply the cleaner to `text`
    pub(crate) fn apply<'a>(&self, text: &'a str) -> Cow<'a, str> {
        match self {
            Cleaner::Identity => Cow::Borrowed(text),
            Cleaner::Char(c, replacement) => {
                if text.contains(*c) {
                    Cow::Owned(text.replace(*c, replacement))
                } else {
                    Cow::Borrowed(text)
                }
            }
            Cleaner::Class(regex, replacement) => {
                regex.replace_all(text, regex::NoExpand(replacement.as_str()))
            }
            Cleaner::Table(map) => {
                if !text.chars().any(|c| map.contains_key(&c)) {
                    return Cow::Borrowed(text);
                }
                let mut out = String::with_capacity(text.len());
                for c in text.chars() {
                    match map.get(&c) {
                        Some(replacement) => out.push_str(replacement),
                        None => out.push(c),
                    }
                }
                Cow::Owned(out)
            }
        }
    }
}

/// Characters stripped from the end of directory segments (`path-strip`)
pub(crate) fn strip_chars(setting: &str) -> String {
    match setting {
        "auto" if cfg!(windows) => ". ".to_string(),
        "auto" | "unix" => String::new(),
        "windows" => ". ".to_string(),
        custom => custom.to_string(),
    }
}

/// Translate a bracket-less character class into regex crate syntax
///
/// Unescaped `[` would open a nested class and doubled `&`, `~` or `-`
/// are set operators there, so those are escaped. Control characters are
/// written as hex escapes.
fn char_class(chars: &str) -> String {
    let mut out = String::with_capacity(chars.len() + 8);
    let mut prev: Option<char> = None;
    let mut escaped = false;

    for c in chars.chars() {
        if escaped {
            out.push(c);
            escaped = false;
            prev = None;
            continue;
        }
        match c {
            '\\' => {
                out.push(c);
                escaped = true;
            }
            '[' => out.push_str(r"\["),
            '&' | '~' | '-' if prev == Some(c) => {
                out.push('\\');
                out.push(c);
            }
            c if c.is_control() => out.push_str(&format!("\\x{{{:x}}}", c as u32)),
            c => out.push(c),
        }
        prev = Some(c);
    }
    out
}
