//! Output path construction
//!
//! [`PathFormat`] turns an item's metadata into a target directory and
//! filename using compiled format strings, sanitizes every segment, and moves
//! the downloaded temporary file into place once it is complete.
//!
//! Directory, filename and base directory may each be given as a plain value
//! or as an object mapping condition expressions to values; the first
//! condition that holds wins and the `""` key supplies the fallback.

mod clean;

use crate::config::{ConflictPolicy, ExtractorConfig, PathRestrict, SkipSetting};
use crate::error::{Error, FormatError, Result};
use crate::extractor::ExtractorInfo;
use crate::formatter::{BaseFormat, Expression, Formatter, FormatterCache};
use crate::types::{Kwdict, Value};
use crate::utils;
use clean::Cleaner;
use std::collections::HashMap;
use std::fmt;
use std::path::{MAIN_SEPARATOR, MAIN_SEPARATOR_STR, Path};
use std::sync::Arc;
use tracing::debug;

/// Extension normalization applied when no `extension-map` is configured
pub const EXTENSION_MAP: [(&str, &str); 5] = [
    ("jpeg", "jpg"),
    ("jpe", "jpg"),
    ("jfif", "jpg"),
    ("jif", "jpg"),
    ("jfi", "jpg"),
];

/// Value selected by the first matching condition expression
#[derive(Clone, Debug)]
struct Rules<T> {
    conditions: Vec<(Expression, T)>,
    default: T,
}

impl<T> Rules<T> {
    fn plain(default: T) -> Self {
        Self {
            conditions: Vec::new(),
            default,
        }
    }

    /// Build from an optional config value
    ///
    /// Objects are conditional; anything else goes through `build` directly.
    fn from_config(
        value: Option<&Value>,
        fallback: impl FnOnce() -> std::result::Result<T, FormatError>,
        build: impl Fn(&Value) -> std::result::Result<T, FormatError>,
    ) -> std::result::Result<Self, FormatError> {
        let Some(value) = value else {
            return Ok(Self::plain(fallback()?));
        };
        let Value::Object(map) = value else {
            return Ok(Self::plain(build(value)?));
        };

        let mut conditions = Vec::new();
        let mut default = None;
        for (condition, value) in map {
            if condition.is_empty() {
                default = Some(build(value)?);
            } else {
                conditions.push((Expression::parse(condition)?, build(value)?));
            }
        }
        let default = match default {
            Some(default) => default,
            None => fallback()?,
        };
        Ok(Self {
            conditions,
            default,
        })
    }

    fn select(&self, kwdict: &Kwdict) -> std::result::Result<&T, FormatError> {
        for (condition, value) in &self.conditions {
            let matched = condition
                .eval_bool(kwdict)
                .map_err(|reason| FormatError::Condition {
                    expression: condition.source().to_string(),
                    reason,
                })?;
            if matched {
                return Ok(value);
            }
        }
        Ok(&self.default)
    }
}

/// Target path state for the current directory and item
pub struct PathFormat {
    kwdict: Kwdict,
    delete: bool,
    prefix: String,

    filename: String,
    extension: String,
    directory: String,
    realdirectory: String,
    path: String,
    realpath: String,
    temppath: String,

    basedirectory: Rules<String>,
    filename_rules: Rules<Arc<Formatter>>,
    directory_rules: Rules<Vec<Arc<Formatter>>>,
    extension_map: HashMap<String, String>,
    clean_segment: Cleaner,
    clean_path: Cleaner,
    strip: String,
    conflict: ConflictPolicy,
    mtime: bool,
    #[cfg_attr(not(windows), allow(dead_code))]
    extended: bool,
}

impl fmt::Debug for PathFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PathFormat")
            .field("directory", &self.directory)
            .field("filename", &self.filename)
            .field("extension", &self.extension)
            .field("realpath", &self.realpath)
            .field("temppath", &self.temppath)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for PathFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.realpath.is_empty() {
            f.write_str(&self.realdirectory)
        } else {
            f.write_str(&self.realpath)
        }
    }
}

impl PathFormat {
    /// Build from the extractor's default formats and its configuration
    ///
    /// `parent_directory` replaces `base-directory` for child jobs running
    /// with `parent-directory` enabled.
    pub fn new(
        info: &ExtractorInfo,
        config: &ExtractorConfig,
        formatters: &FormatterCache,
        parent_directory: Option<&str>,
    ) -> Result<Self> {
        let kwdefault = config
            .get("keywords-default")
            .cloned()
            .unwrap_or(Value::Null);
        let compile = |template: &str| formatters.compile(template, &kwdefault, BaseFormat::Str);

        let filename_rules = Rules::from_config(
            config.get("filename"),
            || compile(&info.filename_fmt),
            |value| match value {
                Value::String(template) => compile(template),
                other => Err(not_a_template(other)),
            },
        )
        .map_err(Error::FilenameFormat)?;

        let compile_segments = |segments: &[String]| {
            segments
                .iter()
                .map(|s| compile(s))
                .collect::<std::result::Result<Vec<_>, _>>()
        };
        let directory_rules = Rules::from_config(
            config.get("directory"),
            || compile_segments(&info.directory_fmt),
            |value| match value {
                Value::String(template) => Ok(vec![compile(template)?]),
                Value::Array(items) => items
                    .iter()
                    .map(|item| match item {
                        Value::String(template) => compile(template),
                        other => Err(not_a_template(other)),
                    })
                    .collect(),
                other => Err(not_a_template(other)),
            },
        )
        .map_err(Error::DirectoryFormat)?;

        let extension_map = match config.get_as::<HashMap<String, String>>("extension-map")? {
            Some(map) => map,
            None => EXTENSION_MAP
                .iter()
                .map(|(from, to)| (from.to_string(), to.to_string()))
                .collect(),
        };

        let restrict = config
            .get_as::<PathRestrict>("path-restrict")?
            .unwrap_or_default();
        let replace = config.string("path-replace").unwrap_or("_");
        let clean_segment = Cleaner::restrict(&restrict, replace)?;
        let clean_path = Cleaner::remove(config.string("path-remove").unwrap_or(clean::DEFAULT_REMOVE))?;
        let strip = clean::strip_chars(config.string("path-strip").unwrap_or("auto"));

        let normalize = |raw: &str| normalize_base(raw, &clean_path);
        let basedirectory = match parent_directory {
            Some(parent) => Rules::plain(normalize(parent)),
            None => Rules::from_config(
                config.get("base-directory"),
                || Ok(format!(".{MAIN_SEPARATOR}downloads{MAIN_SEPARATOR}")),
                |value| match value {
                    Value::String(raw) => Ok(normalize(raw)),
                    other => Err(not_a_template(other)),
                },
            )
            .map_err(Error::DirectoryFormat)?,
        };

        let conflict = match config.get_as::<SkipSetting>("skip")? {
            Some(setting) => setting.parse()?.conflict,
            None => ConflictPolicy::default(),
        };

        Ok(Self {
            kwdict: Kwdict::new(),
            delete: false,
            prefix: String::new(),
            filename: String::new(),
            extension: String::new(),
            directory: String::new(),
            realdirectory: String::new(),
            path: String::new(),
            realpath: String::new(),
            temppath: String::new(),
            basedirectory,
            filename_rules,
            directory_rules,
            extension_map,
            clean_segment,
            clean_path,
            strip,
            conflict,
            mtime: config.bool("mtime", true),
            extended: config.bool("path-extended", true),
        })
    }

    /// Metadata of the current item
    pub fn kwdict(&self) -> &Kwdict {
        &self.kwdict
    }

    /// Mutable metadata of the current item
    pub fn kwdict_mut(&mut self) -> &mut Kwdict {
        &mut self.kwdict
    }

    /// Take the current item's metadata, leaving an empty map behind
    pub fn take_kwdict(&mut self) -> Kwdict {
        std::mem::take(&mut self.kwdict)
    }

    /// Filename of the current item, after [`build_path`](Self::build_path)
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Normalized extension of the current item
    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// Current directory, ending in a separator unless empty
    pub fn directory(&self) -> &str {
        &self.directory
    }

    /// Current directory as used for filesystem access
    pub fn realdirectory(&self) -> &str {
        &self.realdirectory
    }

    /// `directory + filename`
    pub fn path(&self) -> &str {
        &self.path
    }

    /// `realdirectory + filename`
    pub fn realpath(&self) -> &str {
        &self.realpath
    }

    /// File the downloader writes to
    pub fn temppath(&self) -> &str {
        &self.temppath
    }

    /// Point the downloader at another temporary file; empty means nothing to finalize
    pub fn set_temppath(&mut self, temppath: impl Into<String>) {
        self.temppath = temppath.into();
    }

    /// Enumeration prefix chosen by [`exists`](Self::exists) under `skip: "enumerate"`
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Policy applied when the target file already exists
    pub fn conflict(&self) -> ConflictPolicy {
        self.conflict
    }

    /// Whether [`finalize`](Self::finalize) deletes the temporary file instead
    pub fn delete(&self) -> bool {
        self.delete
    }

    /// Make [`finalize`](Self::finalize) delete the temporary file
    pub fn set_delete(&mut self, delete: bool) {
        self.delete = delete;
    }

    /// Evaluate the directory rules for `kwdict` and update the directory
    pub fn set_directory(&mut self, kwdict: &Kwdict) -> Result<()> {
        let base = self
            .basedirectory
            .select(kwdict)
            .map_err(Error::DirectoryFormat)?
            .clone();
        let segments = self.build_directory(kwdict)?;

        let directory = if segments.is_empty() {
            base
        } else {
            let mut joined = segments.join(MAIN_SEPARATOR_STR);
            joined.push(MAIN_SEPARATOR);
            format!("{base}{}", self.clean_path.apply(&joined))
        };

        #[cfg(windows)]
        let realdirectory = if self.extended {
            extended_path(&directory)
        } else {
            directory.clone()
        };
        #[cfg(not(windows))]
        let realdirectory = directory.clone();

        self.directory = directory;
        self.realdirectory = realdirectory;
        Ok(())
    }

    /// Cleaned directory segments for `kwdict`, without the base directory
    pub fn build_directory(&self, kwdict: &Kwdict) -> Result<Vec<String>> {
        let formatters = self
            .directory_rules
            .select(kwdict)
            .map_err(Error::DirectoryFormat)?;

        let mut segments = Vec::with_capacity(formatters.len());
        for formatter in formatters {
            let text = formatter.format_map(kwdict);
            let mut segment = text.trim();
            if !self.strip.is_empty() && segment != "." && segment != ".." {
                segment = segment.trim_end_matches(|c| self.strip.contains(c));
            }
            if !segment.is_empty() {
                segments.push(self.clean_segment.apply(segment).into_owned());
            }
        }
        Ok(segments)
    }

    /// Start a new item: store its metadata and normalize its extension
    pub fn set_filename(&mut self, kwdict: Kwdict) {
        self.kwdict = kwdict;
        self.filename.clear();
        self.path.clear();
        self.realpath.clear();
        self.temppath.clear();
        self.prefix.clear();

        let extension = self
            .kwdict
            .get("extension")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        let extension = self.map_extension(&extension);
        self.kwdict
            .insert("extension".to_string(), Value::String(extension.clone()));
        self.extension = extension;
    }

    /// Replace the extension, e.g. after the downloader saw the real file type
    pub fn set_extension(&mut self, extension: &str) -> Result<()> {
        let extension = self.map_extension(extension);
        self.kwdict.insert(
            "extension".to_string(),
            Value::String(format!("{}{extension}", self.prefix)),
        );
        self.extension = extension;
        self.build_path()
    }

    /// Make sure the path is built, dropping a trailing dot when no extension is known
    pub fn fix_extension(&mut self) -> Result<()> {
        if self.extension.is_empty() {
            let extension = self.map_extension("");
            self.kwdict.insert(
                "extension".to_string(),
                Value::String(format!("{}{extension}", self.prefix)),
            );
            self.build_path()?;
            if self.path.ends_with('.') {
                self.path.pop();
                self.realpath.pop();
                self.temppath = self.realpath.clone();
            }
        } else if self.temppath.is_empty() {
            self.build_path()?;
        }
        Ok(())
    }

    /// Apply the filename rules to `kwdict`
    pub fn build_filename(&self, kwdict: &Kwdict) -> Result<String> {
        let formatter = self
            .filename_rules
            .select(kwdict)
            .map_err(Error::FilenameFormat)?;
        let name = formatter.format_map(kwdict);
        let name = self.clean_segment.apply(&name);
        Ok(self.clean_path.apply(&name).into_owned())
    }

    /// Compute `path`, `realpath` and, unless already set, `temppath`
    pub fn build_path(&mut self) -> Result<()> {
        let filename = self.build_filename(&self.kwdict)?;
        self.path = format!("{}{filename}", self.directory);
        self.realpath = format!("{}{filename}", self.realdirectory);
        self.filename = filename;
        if self.temppath.is_empty() {
            self.temppath = self.realpath.clone();
        }
        Ok(())
    }

    /// Download into a `.part` file, optionally inside `part_directory`
    pub fn part_enable(&mut self, part_directory: Option<&Path>) -> Result<()> {
        if self.extension.is_empty() {
            let extension = self.map_extension("part");
            self.kwdict.insert(
                "extension".to_string(),
                Value::String(format!("{}{extension}", self.prefix)),
            );
            self.build_path()?;
            self.temppath = self.realpath.clone();
        } else {
            if self.temppath.is_empty() {
                self.build_path()?;
            }
            self.temppath.push_str(".part");
        }

        if let Some(part_directory) = part_directory {
            let name = Path::new(&self.temppath)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            self.temppath = part_directory.join(name).to_string_lossy().into_owned();
        }
        Ok(())
    }

    /// Whether the target file already exists and should not be downloaded again
    ///
    /// Under `skip: "enumerate"` an existing file makes this pick the next
    /// free `N.` extension prefix and report `false`.
    pub fn exists(&mut self) -> Result<bool> {
        if self.extension.is_empty() || !Path::new(&self.realpath).exists() {
            return Ok(false);
        }
        match self.conflict {
            ConflictPolicy::Skip => Ok(true),
            ConflictPolicy::Overwrite => Ok(false),
            ConflictPolicy::Enumerate => {
                self.enumerate()?;
                Ok(false)
            }
        }
    }

    fn enumerate(&mut self) -> Result<()> {
        let mut num = 1u32;
        loop {
            let prefix = format!("{num}.");
            self.kwdict.insert(
                "extension".to_string(),
                Value::String(format!("{prefix}{}", self.extension)),
            );
            self.temppath.clear();
            self.build_path()?;
            if !Path::new(&self.realpath).exists() {
                self.prefix = prefix;
                return Ok(());
            }
            num += 1;
        }
    }

    /// Create the directory the temporary file lives in
    pub fn ensure_directory(&self) -> std::io::Result<()> {
        if !self.realdirectory.is_empty() {
            std::fs::create_dir_all(&self.realdirectory)?;
        }
        if let Some(parent) = Path::new(&self.temppath).parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }

    /// Move the finished temporary file to `realpath` and apply `_mtime`
    pub fn finalize(&self) -> Result<()> {
        if self.delete {
            utils::remove_file(Path::new(&self.temppath))?;
            return Ok(());
        }

        if self.temppath != self.realpath {
            self.move_into_place()?;
        }

        if self.mtime
            && let Some(mtime) = self.kwdict.get("_mtime")
            && let Err(e) = utils::set_mtime(Path::new(&self.realpath), mtime)
        {
            debug!(path = %self.realpath, error = %e, "failed to set file modification time");
        }
        Ok(())
    }

    fn move_into_place(&self) -> std::io::Result<()> {
        let (temp, real) = (Path::new(&self.temppath), Path::new(&self.realpath));
        match std::fs::rename(temp, real) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                std::fs::create_dir_all(&self.realdirectory)?;
                std::fs::rename(temp, real)
            }
            Err(e) => {
                debug!(from = %self.temppath, to = %self.realpath, error = %e, "rename failed, copying");
                if let Err(e) = std::fs::copy(temp, real) {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        return Err(e);
                    }
                    std::fs::create_dir_all(&self.realdirectory)?;
                    std::fs::copy(temp, real)?;
                }
                std::fs::remove_file(temp)
            }
        }
    }

    fn map_extension(&self, extension: &str) -> String {
        self.extension_map
            .get(extension)
            .cloned()
            .unwrap_or_else(|| extension.to_string())
    }
}

fn not_a_template(value: &Value) -> FormatError {
    FormatError::Syntax {
        template: value.to_string(),
        reason: "expected a format string".to_string(),
    }
}

fn normalize_base(raw: &str, clean_path: &Cleaner) -> String {
    if raw.is_empty() {
        return String::new();
    }
    let mut directory = utils::expand_path(raw).to_string_lossy().into_owned();
    if cfg!(windows) {
        directory = directory.replace('/', MAIN_SEPARATOR_STR);
    }
    if !directory.ends_with(MAIN_SEPARATOR) {
        directory.push(MAIN_SEPARATOR);
    }
    clean_path.apply(&directory).into_owned()
}

#[cfg(windows)]
fn extended_path(path: &str) -> String {
    if path.is_empty() || path.starts_with(r"\\?\") {
        return path.to_string();
    }
    if let Some(unc) = path.strip_prefix(r"\\") {
        return format!(r"\\?\UNC\{unc}");
    }
    match std::path::absolute(path) {
        Ok(absolute) => {
            let mut extended = format!(r"\\?\{}", absolute.display());
            if path.ends_with(MAIN_SEPARATOR) && !extended.ends_with(MAIN_SEPARATOR) {
                extended.push(MAIN_SEPARATOR);
            }
            extended
        }
        Err(_) => path.to_string(),
    }
}
