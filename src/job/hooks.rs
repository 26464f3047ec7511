//! Hook slots and the post-processor contract

use super::control::JobResult;
use crate::config::ExtractorConfig;
use crate::error::{Error, Result};
use crate::path::PathFormat;
use crate::types::{HookEvent, Value};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// Callback attached to a hook slot
pub type Hook = Box<dyn FnMut(&mut PathFormat) -> JobResult<()> + Send>;

/// Callbacks per [`HookEvent`], run in registration order
#[derive(Default)]
pub struct Hooks {
    slots: BTreeMap<HookEvent, Vec<Hook>>,
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.slots.iter().map(|(event, hooks)| (event.as_str(), hooks.len())))
            .finish()
    }
}

impl Hooks {
    /// Create an empty set of slots
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `hook` to the `event` slot
    pub fn register(&mut self, event: HookEvent, hook: Hook) {
        self.slots.entry(event).or_default().push(hook);
    }

    /// Whether any callback listens on `event`
    pub fn contains(&self, event: HookEvent) -> bool {
        self.slots.get(&event).is_some_and(|hooks| !hooks.is_empty())
    }

    /// Number of callbacks on `event`
    pub fn len(&self, event: HookEvent) -> usize {
        self.slots.get(&event).map_or(0, Vec::len)
    }

    /// Whether no callback is registered at all
    pub fn is_empty(&self) -> bool {
        self.slots.values().all(Vec::is_empty)
    }

    /// Run every callback of `event`; the first error stops the slot
    pub fn run(&mut self, event: HookEvent, pathfmt: &mut PathFormat) -> JobResult<()> {
        if let Some(hooks) = self.slots.get_mut(&event) {
            for hook in hooks {
                hook(pathfmt)?;
            }
        }
        Ok(())
    }
}

/// A post-processor attaches callbacks to hook slots
///
/// Its own behavior (writing metadata, converting files, ...) lives in the
/// callbacks; the job only decides when each slot runs.
pub trait PostProcessor: Send {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Attach callbacks to `hooks`
    fn register(self: Box<Self>, hooks: &mut Hooks);
}

/// Builds a post-processor from its options object and the job's configuration
pub type PostProcessorFactory =
    Arc<dyn Fn(&Value, &ExtractorConfig) -> Result<Box<dyn PostProcessor>> + Send + Sync>;

/// Post-processor constructors by name
#[derive(Clone, Default)]
pub struct PostProcessorRegistry {
    factories: HashMap<String, PostProcessorFactory>,
}

impl fmt::Debug for PostProcessorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.factories.keys().collect();
        names.sort();
        f.debug_list().entries(names).finish()
    }
}

impl PostProcessorRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `factory` under `name`
    pub fn register(&mut self, name: impl Into<String>, factory: PostProcessorFactory) {
        self.factories.insert(name.into(), factory);
    }

    /// Build the post-processors listed in the `postprocessors` option
    ///
    /// Each entry is an object with a `name` key, or a bare name string.
    /// Unknown names are logged and skipped.
    pub fn build(&self, config: &ExtractorConfig) -> Result<Vec<Box<dyn PostProcessor>>> {
        let entries = match config.get("postprocessors") {
            None => return Ok(Vec::new()),
            Some(Value::Array(entries)) => entries,
            Some(other) => {
                return Err(Error::config(
                    "postprocessors",
                    format!("expected a list, got {other}"),
                ));
            }
        };

        let mut processors = Vec::with_capacity(entries.len());
        for entry in entries {
            let name = match entry {
                Value::String(name) => name.as_str(),
                Value::Object(options) => options
                    .get("name")
                    .and_then(Value::as_str)
                    .ok_or_else(|| Error::config("postprocessors", "entry without 'name'"))?,
                other => {
                    return Err(Error::config(
                        "postprocessors",
                        format!("invalid entry {other}"),
                    ));
                }
            };
            match self.factories.get(name) {
                Some(factory) => processors.push(factory(entry, config)?),
                None => tracing::warn!(name, "no post-processor with this name"),
            }
        }
        Ok(processors)
    }
}
