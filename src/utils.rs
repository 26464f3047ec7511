//! Utility functions for file operations and path manipulation

use crate::types::{Kwdict, Value};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Longest suffix still accepted as a file extension by [`nameext_from_url`]
const MAX_EXTENSION_LEN: usize = 16;

/// Expand a leading `~` and `$VAR` / `${VAR}` references in a user supplied path
///
/// Unknown variables are left untouched.
///
/// # Examples
///
/// ```
/// use gallery_pipeline::utils::expand_path;
///
/// let path = expand_path("relative/file.txt");
/// assert_eq!(path.to_str(), Some("relative/file.txt"));
/// ```
pub fn expand_path(path: &str) -> PathBuf {
    let path = path.trim();
    let expanded = match path.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') || rest.starts_with('\\') => {
            match std::env::var("HOME").or_else(|_| std::env::var("USERPROFILE")) {
                Ok(home) => format!("{home}{rest}"),
                Err(_) => path.to_string(),
            }
        }
        _ => path.to_string(),
    };
    PathBuf::from(expand_vars(&expanded))
}

fn expand_vars(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        let (name, consumed) = if let Some(braced) = after.strip_prefix('{') {
            match braced.find('}') {
                Some(end) => (&braced[..end], end + 2),
                None => ("", 0),
            }
        } else {
            let end = after
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .unwrap_or(after.len());
            (&after[..end], end)
        };

        match std::env::var(name) {
            Ok(value) if !name.is_empty() => out.push_str(&value),
            _ => {
                out.push('$');
                out.push_str(&after[..consumed]);
            }
        }
        rest = &after[consumed..];
    }

    out.push_str(rest);
    out
}

/// Last path segment of `url`, percent-decoded
///
/// Falls back to splitting the raw string when `url` does not parse.
pub fn filename_from_url(url: &str) -> String {
    let segment = match url::Url::parse(url) {
        Ok(parsed) => parsed
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .unwrap_or("")
            .to_string(),
        Err(_) => {
            let path = url.split(['?', '#']).next().unwrap_or("");
            path.rsplit('/').next().unwrap_or("").to_string()
        }
    };

    match urlencoding::decode(&segment) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => segment,
    }
}

/// Fill `filename` and `extension` in `kwdict` from the last segment of `url`
///
/// A suffix only counts as an extension when it is short and alphanumeric;
/// otherwise the whole segment becomes the filename and `extension` is empty.
pub fn nameext_from_url(url: &str, kwdict: &mut Kwdict) {
    let name = filename_from_url(url);
    let (filename, extension) = match name.rsplit_once('.') {
        Some((stem, ext))
            if !ext.is_empty()
                && ext.len() <= MAX_EXTENSION_LEN
                && ext.chars().all(|c| c.is_ascii_alphanumeric()) =>
        {
            (stem.to_string(), ext.to_ascii_lowercase())
        }
        _ => (name, String::new()),
    };
    kwdict.insert("filename".to_string(), Value::String(filename));
    kwdict.insert("extension".to_string(), Value::String(extension));
}

/// Delete a file, ignoring the case where it does not exist
pub fn remove_file(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Interpret an `_mtime` value as a point in time
///
/// Accepts Unix timestamps (numbers or numeric strings) and HTTP dates as
/// found in `Last-Modified` headers.
pub fn parse_mtime(value: &Value) -> Option<SystemTime> {
    let seconds = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => {
            let s = s.trim();
            match s.parse::<f64>() {
                Ok(seconds) => seconds,
                Err(_) => chrono::DateTime::parse_from_rfc2822(s)
                    .or_else(|_| chrono::DateTime::parse_from_rfc3339(s))
                    .ok()?
                    .timestamp() as f64,
            }
        }
        _ => return None,
    };

    UNIX_EPOCH.checked_add(Duration::try_from_secs_f64(seconds).ok()?)
}

/// Set the modification time of `path` from an `_mtime` value
///
/// Returns `Ok(false)` when the value is not a usable time.
pub fn set_mtime(path: &Path, value: &Value) -> std::io::Result<bool> {
    let Some(mtime) = parse_mtime(value) else {
        return Ok(false);
    };
    let file = std::fs::File::options().write(true).open(path)?;
    file.set_modified(mtime)?;
    Ok(true)
}
