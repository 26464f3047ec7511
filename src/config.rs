//! Configuration types for gallery-pipeline
//!
//! Configuration is a JSON tree. Options are looked up per extractor along the
//! path `extractor.<category>.<subcategory>`: a key set at the root always wins,
//! otherwise the deepest definition along the path is used.
//!
//! ```
//! use gallery_pipeline::Config;
//! use serde_json::json;
//!
//! let config = Config::from_value(json!({
//!     "extractor": {
//!         "sleep": 1,
//!         "test": { "sleep": 2, "image": { "skip": false } }
//!     }
//! })).unwrap();
//!
//! let view = config.scoped(["extractor", "test", "image"]);
//! assert_eq!(view.get("sleep"), Some(&json!(2)));
//! assert_eq!(view.get("skip"), Some(&json!(false)));
//! ```

use crate::error::{Error, Result};
use crate::types::Value;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

/// Global configuration tree
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Config {
    root: serde_json::Map<String, Value>,
}

impl Config {
    /// Build a configuration from a JSON object
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(root) => Ok(Self { root }),
            other => Err(Error::Config {
                message: format!("configuration root must be an object, got {other}"),
                key: None,
            }),
        }
    }

    /// Load a JSON configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let value: Value = serde_json::from_str(&text)?;
        Self::from_value(value)
    }

    /// Set `key` to `value` inside the object at `path`, creating objects on the way
    pub fn set<I, S>(&mut self, path: I, key: &str, value: Value)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut node = &mut self.root;
        for segment in path {
            let entry = node
                .entry(segment.as_ref().to_string())
                .or_insert_with(|| Value::Object(serde_json::Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(serde_json::Map::new());
            }
            let Value::Object(map) = entry else {
                return;
            };
            node = map;
        }
        node.insert(key.to_string(), value);
    }

    /// Look up `key` along `path`
    ///
    /// A root-level definition wins; otherwise the deepest definition found
    /// while walking `path` is returned.
    pub fn interpolate<S: AsRef<str>>(&self, path: &[S], key: &str) -> Option<&Value> {
        if let Some(value) = self.root.get(key) {
            return Some(value);
        }

        let mut found = None;
        let mut node = &self.root;
        for segment in path {
            match node.get(segment.as_ref()) {
                Some(Value::Object(map)) => {
                    node = map;
                    if let Some(value) = node.get(key) {
                        found = Some(value);
                    }
                }
                _ => break,
            }
        }
        found
    }

    /// Scoped view for one configuration path
    pub fn scoped<I, S>(&self, path: I) -> ExtractorConfig
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ExtractorConfig {
            config: Arc::new(self.clone()),
            path: path.into_iter().map(Into::into).collect(),
        }
    }
}

/// Configuration view scoped to one extractor path
#[derive(Clone, Debug)]
pub struct ExtractorConfig {
    config: Arc<Config>,
    path: Vec<String>,
}

impl ExtractorConfig {
    /// Create a view of `config` for `path`
    pub fn new(config: Arc<Config>, path: Vec<String>) -> Self {
        Self { config, path }
    }

    /// Create the view used by extractors of `category`/`subcategory`
    pub fn for_extractor(config: Arc<Config>, category: &str, subcategory: &str) -> Self {
        let mut path = vec!["extractor".to_string(), category.to_string()];
        if !subcategory.is_empty() {
            path.push(subcategory.to_string());
        }
        Self { config, path }
    }

    /// Configuration path of this view
    pub fn path(&self) -> &[String] {
        &self.path
    }

    /// Underlying configuration tree
    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    /// Raw value of `key`; JSON `null` counts as unset
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.config
            .interpolate(&self.path, key)
            .filter(|value| !value.is_null())
    }

    /// Deserialize `key` into `T`
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key) {
            None => Ok(None),
            Some(value) => T::deserialize(value)
                .map(Some)
                .map_err(|e| Error::config(key, format!("invalid value for '{key}': {e}"))),
        }
    }

    /// Boolean option with a default; non-boolean values use JSON truthiness
    pub fn bool(&self, key: &str, default: bool) -> bool {
        match self.get(key) {
            None => default,
            Some(Value::Bool(b)) => *b,
            Some(Value::Number(n)) => n.as_f64().is_some_and(|n| n != 0.0),
            Some(Value::String(s)) => !s.is_empty(),
            Some(Value::Array(a)) => !a.is_empty(),
            Some(Value::Object(o)) => !o.is_empty(),
            Some(Value::Null) => default,
        }
    }

    /// String option; `None` when unset or not a string
    pub fn string(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }
}

/// `skip` option as written in the configuration
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum SkipSetting {
    /// `true` skips existing files, `false` overwrites them
    Flag(bool),
    /// `"enumerate"`, `"abort:N[:D]"`, `"terminate:N"` or `"exit:N"`
    Mode(String),
}

/// Skip-streak breaker parsed from the `skip` option
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipBreaker {
    /// Stop the current job and `depth - 1` ancestors
    Abort {
        /// Consecutive skips before triggering
        threshold: u32,
        /// Number of job frames to end
        depth: u32,
    },
    /// Stop the current job and all ancestors
    Terminate {
        /// Consecutive skips before triggering
        threshold: u32,
    },
    /// Request process exit
    Exit {
        /// Consecutive skips before triggering
        threshold: u32,
    },
}

impl SkipBreaker {
    /// Consecutive skips needed to trigger the breaker
    pub fn threshold(&self) -> u32 {
        match self {
            SkipBreaker::Abort { threshold, .. }
            | SkipBreaker::Terminate { threshold }
            | SkipBreaker::Exit { threshold } => *threshold,
        }
    }
}

/// What to do when the target file already exists
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictPolicy {
    /// Skip the download
    #[default]
    Skip,
    /// Download again and overwrite
    Overwrite,
    /// Find the next free numeric prefix for the extension
    Enumerate,
}

/// Parsed `skip` option
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SkipMode {
    /// Existing file policy
    pub conflict: ConflictPolicy,
    /// Optional skip-streak breaker
    pub breaker: Option<SkipBreaker>,
}

impl SkipSetting {
    /// Interpret the setting
    pub fn parse(&self) -> Result<SkipMode> {
        let mode = match self {
            SkipSetting::Flag(true) => SkipMode::default(),
            SkipSetting::Flag(false) => SkipMode {
                conflict: ConflictPolicy::Overwrite,
                breaker: None,
            },
            SkipSetting::Mode(mode) => {
                let mut parts = mode.split(':');
                let kind = parts.next().unwrap_or_default();
                let threshold = |value: Option<&str>| -> Result<u32> {
                    match value {
                        None | Some("") => Ok(1),
                        Some(n) => n
                            .trim()
                            .parse()
                            .map_err(|_| Error::config("skip", format!("invalid count '{n}'"))),
                    }
                };
                let breaker = match kind {
                    "enumerate" => {
                        return Ok(SkipMode {
                            conflict: ConflictPolicy::Enumerate,
                            breaker: None,
                        });
                    }
                    "true" => None,
                    "false" => {
                        return Ok(SkipMode {
                            conflict: ConflictPolicy::Overwrite,
                            breaker: None,
                        });
                    }
                    "abort" => {
                        let threshold = threshold(parts.next())?;
                        let depth = threshold_or_one(parts.next())?;
                        Some(SkipBreaker::Abort { threshold, depth })
                    }
                    "terminate" => Some(SkipBreaker::Terminate {
                        threshold: threshold(parts.next())?,
                    }),
                    "exit" => Some(SkipBreaker::Exit {
                        threshold: threshold(parts.next())?,
                    }),
                    other => {
                        return Err(Error::config("skip", format!("unknown skip mode '{other}'")));
                    }
                };
                SkipMode {
                    conflict: ConflictPolicy::Skip,
                    breaker,
                }
            }
        };
        Ok(mode)
    }
}

fn threshold_or_one(value: Option<&str>) -> Result<u32> {
    match value {
        None | Some("") => Ok(1),
        Some(n) => n
            .trim()
            .parse::<u32>()
            .map(|n| n.max(1))
            .map_err(|_| Error::config("skip", format!("invalid depth '{n}'"))),
    }
}

/// `sleep` option: a fixed number of seconds or a range to draw from
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum SleepSetting {
    /// Fixed delay in seconds
    Seconds(f64),
    /// `[min, max]`
    Pair(f64, f64),
    /// `"min-max"` or `"secs"`
    Text(String),
}

impl SleepSetting {
    /// Normalize into `(min, max)` seconds; `None` when the delay is zero
    pub fn bounds(&self) -> Result<Option<(f64, f64)>> {
        let (lo, hi) = match self {
            SleepSetting::Seconds(s) => (*s, *s),
            SleepSetting::Pair(a, b) => (*a, *b),
            SleepSetting::Text(text) => {
                let parse = |s: &str| {
                    s.trim()
                        .parse::<f64>()
                        .map_err(|_| Error::config("sleep", format!("invalid duration '{text}'")))
                };
                match text.split_once('-') {
                    Some((a, b)) => (parse(a)?, parse(b)?),
                    None => {
                        let s = parse(text)?;
                        (s, s)
                    }
                }
            }
        };
        let (lo, hi) = if lo <= hi { (lo, hi) } else { (hi, lo) };
        if hi <= 0.0 {
            return Ok(None);
        }
        Ok(Some((lo.max(0.0), hi)))
    }
}

/// Archive storage mode
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveMode {
    /// Every `add` writes through to the store
    #[default]
    File,
    /// Buffer new entries and write them on `finalize`
    Memory,
}

/// Events at which archive entries are written
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ArchiveEvents {
    /// After the file has been moved into place
    pub file: bool,
    /// When a file is skipped because it already exists
    pub skip: bool,
    /// After the `after` hooks ran
    pub after: bool,
}

impl Default for ArchiveEvents {
    fn default() -> Self {
        Self {
            file: true,
            skip: false,
            after: false,
        }
    }
}

impl ArchiveEvents {
    /// Parse `"file,skip"` or `["file", "skip"]`
    pub fn from_value(value: &Value) -> Result<Self> {
        let names: Vec<String> = match value {
            Value::String(s) => s.split(',').map(|s| s.trim().to_string()).collect(),
            Value::Array(items) => items
                .iter()
                .map(|v| v.as_str().map(str::to_string))
                .collect::<Option<_>>()
                .ok_or_else(|| Error::config("archive-event", "expected a list of strings"))?,
            _ => {
                return Err(Error::config(
                    "archive-event",
                    "expected a string or a list of strings",
                ));
            }
        };

        let mut events = Self {
            file: false,
            skip: false,
            after: false,
        };
        for name in names.iter().filter(|n| !n.is_empty()) {
            match name.as_str() {
                "file" => events.file = true,
                "skip" => events.skip = true,
                "after" => events.after = true,
                other => {
                    return Err(Error::config(
                        "archive-event",
                        format!("unsupported archive event '{other}'"),
                    ));
                }
            }
        }
        Ok(events)
    }
}

/// Character restriction table for path segments (`path-restrict`)
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum PathRestrict {
    /// `"auto"`, `"unix"`, `"windows"`, `"ascii"`, `"ascii+"` or a custom character class
    Named(String),
    /// Explicit character → replacement table
    Table(serde_json::Map<String, Value>),
}

impl Default for PathRestrict {
    fn default() -> Self {
        PathRestrict::Named("auto".to_string())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config() -> Config {
        Config::from_value(json!({
            "extractor": {
                "sleep": 1,
                "skip": true,
                "test": {
                    "sleep": 2,
                    "image": { "skip": "abort:3" }
                }
            }
        }))
        .unwrap()
    }

    #[test]
    fn deepest_definition_wins() {
        let view = ExtractorConfig::for_extractor(Arc::new(config()), "test", "image");
        assert_eq!(view.get("sleep"), Some(&json!(2)));
        assert_eq!(view.get("skip"), Some(&json!("abort:3")));
        assert_eq!(view.get("missing"), None);
    }

    #[test]
    fn root_definition_overrides_everything() {
        let mut config = config();
        config.set(Vec::<&str>::new(), "sleep", json!(9));
        let view = ExtractorConfig::for_extractor(Arc::new(config), "test", "image");
        assert_eq!(view.get("sleep"), Some(&json!(9)));
    }

    #[test]
    fn set_creates_intermediate_objects() {
        let mut config = Config::default();
        config.set(["extractor", "a", "b"], "key", json!("v"));
        assert_eq!(
            config.interpolate(&["extractor", "a", "b"], "key"),
            Some(&json!("v"))
        );
    }

    #[test]
    fn root_must_be_object() {
        assert!(Config::from_value(json!([1, 2])).is_err());
    }

    #[test]
    fn null_counts_as_unset() {
        let config = Config::from_value(json!({"extractor": {"archive": null}})).unwrap();
        let view = config.scoped(["extractor"]);
        assert_eq!(view.get("archive"), None);
        assert!(view.get_as::<String>("archive").unwrap().is_none());
    }

    #[test]
    fn skip_setting_parses_breakers() {
        let parse = |v: Value| {
            serde_json::from_value::<SkipSetting>(v)
                .unwrap()
                .parse()
                .unwrap()
        };
        assert_eq!(parse(json!(true)), SkipMode::default());
        assert_eq!(parse(json!(false)).conflict, ConflictPolicy::Overwrite);
        assert_eq!(parse(json!("enumerate")).conflict, ConflictPolicy::Enumerate);
        assert_eq!(
            parse(json!("abort:5")).breaker,
            Some(SkipBreaker::Abort {
                threshold: 5,
                depth: 1
            })
        );
        assert_eq!(
            parse(json!("abort:2:3")).breaker,
            Some(SkipBreaker::Abort {
                threshold: 2,
                depth: 3
            })
        );
        assert_eq!(
            parse(json!("terminate:4")).breaker,
            Some(SkipBreaker::Terminate { threshold: 4 })
        );
        assert_eq!(
            parse(json!("exit")).breaker,
            Some(SkipBreaker::Exit { threshold: 1 })
        );
        assert!(
            serde_json::from_value::<SkipSetting>(json!("bogus:1"))
                .unwrap()
                .parse()
                .is_err()
        );
    }

    #[test]
    fn sleep_setting_bounds() {
        let bounds = |v: Value| {
            serde_json::from_value::<SleepSetting>(v)
                .unwrap()
                .bounds()
                .unwrap()
        };
        assert_eq!(bounds(json!(1.5)), Some((1.5, 1.5)));
        assert_eq!(bounds(json!("2-4")), Some((2.0, 4.0)));
        assert_eq!(bounds(json!([3, 1])), Some((1.0, 3.0)));
        assert_eq!(bounds(json!(0)), None);
    }

    #[test]
    fn archive_events_parse() {
        let events = ArchiveEvents::from_value(&json!("file,skip")).unwrap();
        assert!(events.file && events.skip && !events.after);

        let events = ArchiveEvents::from_value(&json!(["after"])).unwrap();
        assert!(!events.file && events.after);

        assert!(ArchiveEvents::from_value(&json!("download")).is_err());
    }

    #[test]
    fn typed_access_reports_key() {
        let config = Config::from_value(json!({"archive-mode": "tape"})).unwrap();
        let err = config
            .scoped(["extractor"])
            .get_as::<ArchiveMode>("archive-mode")
            .unwrap_err();
        assert!(matches!(err, Error::Config { key: Some(ref k), .. } if k == "archive-mode"));
    }
}
