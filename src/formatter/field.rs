//! Template scanning and field-name access paths

use super::value::Val;
use crate::types::Kwdict;
use chrono::{Datelike, Timelike};

/// One piece of a scanned template
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Piece {
    /// Literal text with `{{`/`}}` already unescaped
    Literal(String),
    /// A replacement field
    Field(RawField),
}

/// Unparsed parts of a `{name!c:spec}` field
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct RawField {
    pub name: String,
    pub conversion: Option<char>,
    pub spec: String,
}

/// Split a template into literal runs and replacement fields
pub(crate) fn scan(template: &str) -> Result<Vec<Piece>, String> {
    let mut pieces = Vec::new();
    let mut literal = String::new();
    let mut chars = template.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        match c {
            '{' if chars.peek().is_some_and(|&(_, n)| n == '{') => {
                chars.next();
                literal.push('{');
            }
            '}' if chars.peek().is_some_and(|&(_, n)| n == '}') => {
                chars.next();
                literal.push('}');
            }
            '}' => return Err("single '}' encountered".to_string()),
            '{' => {
                let start = i + c.len_utf8();
                let end = field_end(template, start)?;
                while chars.peek().is_some_and(|&(j, _)| j <= end) {
                    chars.next();
                }
                if !literal.is_empty() {
                    pieces.push(Piece::Literal(std::mem::take(&mut literal)));
                }
                let field = split_field(&template[start..end])?;
                if !field.name.is_empty() {
                    pieces.push(Piece::Field(field));
                }
            }
            c => literal.push(c),
        }
    }

    if !literal.is_empty() {
        pieces.push(Piece::Literal(literal));
    }
    Ok(pieces)
}

/// Byte offset of the `}` closing the field starting at `start`
fn field_end(template: &str, start: usize) -> Result<usize, String> {
    let mut brackets = 0usize;
    let mut braces = 0usize;
    let mut in_name = true;
    let mut quote: Option<char> = None;

    for (offset, c) in template[start..].char_indices() {
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' if in_name && offset == 0 => quote = Some(c),
            '[' if in_name => brackets += 1,
            ']' if in_name => brackets = brackets.saturating_sub(1),
            ':' | '!' if in_name && brackets == 0 => in_name = false,
            '{' => braces += 1,
            '}' if braces > 0 => braces -= 1,
            '}' => return Ok(start + offset),
            _ => {}
        }
    }
    Err("expected '}' before end of string".to_string())
}

/// Split `name!c:spec` at the first top-level `!` or `:`
fn split_field(text: &str) -> Result<RawField, String> {
    let mut brackets = 0usize;
    let mut quote: Option<char> = None;

    for (i, c) in text.char_indices() {
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' if i == 0 => quote = Some(c),
            '[' => brackets += 1,
            ']' => brackets = brackets.saturating_sub(1),
            ':' if brackets == 0 => {
                return Ok(RawField {
                    name: text[..i].to_string(),
                    conversion: None,
                    spec: text[i + 1..].to_string(),
                });
            }
            '!' if brackets == 0 => {
                let mut rest = text[i + 1..].chars();
                let conversion = rest.next().ok_or_else(|| {
                    "end of string while looking for conversion specifier".to_string()
                })?;
                let spec = match rest.next() {
                    None => String::new(),
                    Some(':') => rest.collect(),
                    Some(_) => return Err("expected ':' after conversion specifier".to_string()),
                };
                return Ok(RawField {
                    name: text[..i].to_string(),
                    conversion: Some(conversion),
                    spec,
                });
            }
            _ => {}
        }
    }

    Ok(RawField {
        name: text.to_string(),
        conversion: None,
        spec: String::new(),
    })
}

/// Split `a|b[x|y]|c` into alternatives at top-level `|`
pub(crate) fn split_alternatives(name: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut brackets = 0usize;
    let mut last = 0;
    for (i, c) in name.char_indices() {
        match c {
            '[' => brackets += 1,
            ']' => brackets = brackets.saturating_sub(1),
            '|' if brackets == 0 => {
                parts.push(&name[last..i]);
                last = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&name[last..]);
    parts
}

/// One piece of a template whose fields are expressions
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum ExprPiece {
    Literal(String),
    Field {
        expression: String,
        conversion: Option<char>,
        spec: String,
    },
}

/// Split a template whose fields hold expressions (`{width * 2:>6}`)
pub(crate) fn scan_expressions(template: &str) -> Result<Vec<ExprPiece>, String> {
    let mut pieces = Vec::new();
    let mut literal = String::new();
    let chars: Vec<char> = template.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '{' if chars.get(i + 1) == Some(&'{') => {
                literal.push('{');
                i += 2;
            }
            '}' if chars.get(i + 1) == Some(&'}') => {
                literal.push('}');
                i += 2;
            }
            '}' => return Err("single '}' encountered".to_string()),
            '{' => {
                if !literal.is_empty() {
                    pieces.push(ExprPiece::Literal(std::mem::take(&mut literal)));
                }
                let (piece, next) = expression_field(&chars, i + 1)?;
                pieces.push(piece);
                i = next;
            }
            c => {
                literal.push(c);
                i += 1;
            }
        }
    }

    if !literal.is_empty() {
        pieces.push(ExprPiece::Literal(literal));
    }
    Ok(pieces)
}

/// Parse one expression field starting after its `{`; returns the index after its `}`
fn expression_field(chars: &[char], start: usize) -> Result<(ExprPiece, usize), String> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut i = start;
    let mut expression_end = None;
    let mut conversion = None;

    while i < chars.len() {
        let c = chars[i];
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            i += 1;
            continue;
        }
        match c {
            '\'' | '"' => quote = Some(c),
            '(' | '[' | '{' => depth += 1,
            ')' | ']' if depth > 0 => depth -= 1,
            '}' if depth > 0 => depth -= 1,
            '!' if depth == 0 && chars.get(i + 1) != Some(&'=') => {
                expression_end = Some(i);
                conversion = Some(
                    *chars
                        .get(i + 1)
                        .ok_or_else(|| "end of string while looking for conversion specifier".to_string())?,
                );
                i += 2;
                break;
            }
            ':' | '}' if depth == 0 => {
                expression_end = Some(i);
                break;
            }
            _ => {}
        }
        i += 1;
    }

    let end = expression_end.ok_or_else(|| "expected '}' before end of string".to_string())?;
    let expression: String = chars[start..end].iter().collect();
    if expression.trim().is_empty() {
        return Err("empty expression not allowed".to_string());
    }

    let mut spec = String::new();
    match chars.get(i) {
        Some('}') => {}
        Some(':') => {
            i += 1;
            let mut braces = 0usize;
            loop {
                match chars.get(i) {
                    None => return Err("expected '}' before end of string".to_string()),
                    Some('{') => braces += 1,
                    Some('}') if braces == 0 => break,
                    Some('}') => braces -= 1,
                    Some(_) => {}
                }
                spec.push(chars[i]);
                i += 1;
            }
        }
        _ => return Err("expected ':' or '}' after conversion specifier".to_string()),
    }

    Ok((
        ExprPiece::Field {
            expression,
            conversion,
            spec,
        },
        i + 1,
    ))
}

/// Where a field's value comes from
#[derive(Clone, Debug, PartialEq)]
enum Root {
    /// Kwdict entry
    Key(String),
    /// `'text'` or `_lit[text]`
    Literal(String),
    /// `_env[NAME]`
    Env(String),
    /// `_now`
    Now,
    /// `_nul`
    Nul,
}

/// Python-style slice bounds
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct SliceSpec {
    pub start: Option<i64>,
    pub stop: Option<i64>,
    pub step: Option<i64>,
}

impl SliceSpec {
    fn parse(text: &str) -> Option<Self> {
        let mut parts = text.splitn(3, ':');
        let mut bound = || -> Option<Option<i64>> {
            match parts.next().map(str::trim) {
                None | Some("") => Some(None),
                Some(n) => n.parse().ok().map(Some),
            }
        };
        Some(Self {
            start: bound()?,
            stop: bound()?,
            step: bound()?,
        })
    }

    /// Element positions selected from a sequence of `len` items
    pub fn indices(&self, len: usize) -> Result<Vec<usize>, String> {
        let len = len as i64;
        let step = self.step.unwrap_or(1);
        if step == 0 {
            return Err("slice step cannot be zero".to_string());
        }
        let adjust = |bound: Option<i64>, default: i64| -> i64 {
            match bound {
                None => default,
                Some(b) if b < 0 => {
                    let b = b + len;
                    if b < 0 {
                        if step < 0 { -1 } else { 0 }
                    } else {
                        b
                    }
                }
                Some(b) if b >= len => {
                    if step < 0 {
                        len - 1
                    } else {
                        len
                    }
                }
                Some(b) => b,
            }
        };

        let mut out = Vec::new();
        if step > 0 {
            let (mut i, stop) = (adjust(self.start, 0), adjust(self.stop, len));
            while i < stop {
                out.push(i as usize);
                i += step;
            }
        } else {
            let (mut i, stop) = (adjust(self.start, len - 1), adjust(self.stop, -1));
            while i > stop {
                out.push(i as usize);
                i += step;
            }
        }
        Ok(out)
    }
}

/// One step of an access path
#[derive(Clone, Debug, PartialEq)]
enum Accessor {
    Attr(String),
    Key(String),
    Index(i64),
    Slice(SliceSpec),
    Bytes(SliceSpec),
}

/// Parsed field name: a root plus a chain of accessors
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct FieldName {
    root: Root,
    accessors: Vec<Accessor>,
}

impl FieldName {
    /// Parse `key.attr[0][1:5]`, `'literal'`, `_lit[..]`, `_env[..]`, `_now`, `_nul`
    pub fn parse(name: &str) -> Result<Self, String> {
        let (root, rest) = match name.chars().next() {
            Some(q @ ('\'' | '"')) => {
                let body = &name[1..];
                let close = body
                    .find(q)
                    .ok_or_else(|| "unterminated string literal in field name".to_string())?;
                (Root::Literal(body[..close].to_string()), &body[close + 1..])
            }
            _ => {
                let split = name.find(['.', '[']).unwrap_or(name.len());
                (Root::Key(name[..split].to_string()), &name[split..])
            }
        };

        let mut accessors = parse_accessors(rest)?;
        let root = match root {
            Root::Key(key) => match key.as_str() {
                "_now" => Root::Now,
                "_nul" => Root::Nul,
                "_lit" | "_env" if !accessors.is_empty() => {
                    let arg = match accessors.remove(0) {
                        Accessor::Attr(s) | Accessor::Key(s) => s,
                        Accessor::Index(i) => i.to_string(),
                        Accessor::Slice(_) | Accessor::Bytes(_) => {
                            return Err(format!("invalid argument for '{key}'"));
                        }
                    };
                    if key == "_lit" {
                        Root::Literal(arg)
                    } else {
                        Root::Env(arg)
                    }
                }
                _ => Root::Key(key),
            },
            other => other,
        };

        Ok(Self { root, accessors })
    }

    /// Resolve the value; `None` when a key is missing or an access fails
    pub fn resolve(&self, kwdict: &Kwdict) -> Option<Val> {
        let mut value = match &self.root {
            Root::Key(key) => Val::from(kwdict.get(key)?),
            Root::Literal(text) => Val::Str(text.clone()),
            Root::Env(name) => Val::Str(std::env::var(name).ok()?),
            Root::Now => Val::DateTime(chrono::Local::now().naive_local()),
            Root::Nul => Val::None,
        };
        for accessor in &self.accessors {
            value = access(value, accessor)?;
        }
        Some(value)
    }
}

fn parse_accessors(mut rest: &str) -> Result<Vec<Accessor>, String> {
    let mut accessors = Vec::new();
    while !rest.is_empty() {
        if let Some(after) = rest.strip_prefix('.') {
            let end = after.find(['.', '[']).unwrap_or(after.len());
            if end == 0 {
                return Err("empty attribute in format string".to_string());
            }
            accessors.push(Accessor::Attr(after[..end].to_string()));
            rest = &after[end..];
        } else if let Some(after) = rest.strip_prefix('[') {
            let end = after
                .find(']')
                .ok_or_else(|| "missing ']' in format string".to_string())?;
            accessors.push(item_accessor(&after[..end]));
            rest = &after[end + 1..];
            if !rest.is_empty() && !rest.starts_with(['.', '[']) {
                return Err("only '.' or '[' may follow ']' in format field specifier".to_string());
            }
        } else {
            return Err(format!("unexpected '{rest}' in field name"));
        }
    }
    Ok(accessors)
}

fn item_accessor(key: &str) -> Accessor {
    if key.contains(':') {
        if let Some(bytes) = key.strip_prefix('b')
            && let Some(slice) = SliceSpec::parse(bytes)
        {
            return Accessor::Bytes(slice);
        }
        if let Some(slice) = SliceSpec::parse(key) {
            return Accessor::Slice(slice);
        }
    }
    match key.parse::<i64>() {
        Ok(index) => Accessor::Index(index),
        Err(_) => Accessor::Key(key.to_string()),
    }
}

fn access(value: Val, accessor: &Accessor) -> Option<Val> {
    match (accessor, value) {
        (Accessor::Attr(name), Val::DateTime(dt)) => {
            let n = match name.as_str() {
                "year" => i64::from(dt.year()),
                "month" => i64::from(dt.month()),
                "day" => i64::from(dt.day()),
                "hour" => i64::from(dt.hour()),
                "minute" => i64::from(dt.minute()),
                "second" => i64::from(dt.second()),
                "microsecond" => i64::from(dt.nanosecond() / 1000),
                _ => return None,
            };
            Some(Val::Int(n))
        }
        (Accessor::Key(key), Val::Map(entries)) => entries
            .into_iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v),
        (Accessor::Index(i), Val::Map(entries)) => {
            let key = i.to_string();
            entries.into_iter().find(|(k, _)| *k == key).map(|(_, v)| v)
        }
        (Accessor::Index(i), Val::List(items)) => {
            let idx = normalize_index(*i, items.len())?;
            items.into_iter().nth(idx)
        }
        (Accessor::Index(i), Val::Str(s)) => {
            let idx = normalize_index(*i, s.chars().count())?;
            s.chars().nth(idx).map(|c| Val::Str(c.to_string()))
        }
        (Accessor::Slice(slice), Val::List(items)) => {
            let idx = slice.indices(items.len()).ok()?;
            Some(Val::List(idx.into_iter().map(|i| items[i].clone()).collect()))
        }
        (Accessor::Slice(slice), Val::Str(s)) => {
            let chars: Vec<char> = s.chars().collect();
            let idx = slice.indices(chars.len()).ok()?;
            Some(Val::Str(idx.into_iter().map(|i| chars[i]).collect()))
        }
        (Accessor::Bytes(slice), Val::Str(s)) => {
            let bytes = s.as_bytes();
            let idx = slice.indices(bytes.len()).ok()?;
            let picked: Vec<u8> = idx.into_iter().map(|i| bytes[i]).collect();
            Some(Val::Str(decode_ignoring_errors(&picked)))
        }
        _ => None,
    }
}

fn normalize_index(index: i64, len: usize) -> Option<usize> {
    let len = len as i64;
    let index = if index < 0 { index + len } else { index };
    (0..len).contains(&index).then_some(index as usize)
}

/// UTF-8 decode that drops invalid sequences
fn decode_ignoring_errors(bytes: &[u8]) -> String {
    bytes.utf8_chunks().map(|chunk| chunk.valid()).collect()
}
