//! Scripted extractors for job tests

use super::{ControlFlow, JobError, JobResult};
use crate::error::Error;
use crate::extractor::{Extractor, ExtractorFactory, ExtractorInfo, ExtractorRegistry};
use crate::types::{Kwdict, Message, Value};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

/// One scripted extractor output
#[derive(Clone, Debug)]
pub(crate) enum Item {
    Message(Message),
    Signal(ControlFlow),
    NotFound,
}

pub(crate) fn kw(value: Value) -> Kwdict {
    match value {
        Value::Object(map) => map,
        _ => Kwdict::new(),
    }
}

pub(crate) fn directory(value: Value) -> Item {
    Item::Message(Message::Directory(kw(value)))
}

pub(crate) fn url(url: &str, value: Value) -> Item {
    Item::Message(Message::Url(url.to_string(), kw(value)))
}

pub(crate) fn queue(url: &str, value: Value) -> Item {
    Item::Message(Message::Queue(url.to_string(), kw(value)))
}

pub(crate) fn signal(signal: ControlFlow) -> Item {
    Item::Signal(signal)
}

/// Text file item named `name.txt` with `name` as content
pub(crate) fn text(name: &str) -> Item {
    url(
        &format!("text:{name}"),
        serde_json::json!({"filename": name, "extension": "txt"}),
    )
}

/// Scripts per URL plus a shared event log
///
/// Every extractor built for a URL takes the next queued script; the last
/// one is reused once the queue is down to a single entry.
#[derive(Clone, Default)]
pub(crate) struct Scripts {
    runs: Arc<Mutex<HashMap<String, VecDeque<Vec<Item>>>>>,
    log: Arc<Mutex<Vec<String>>>,
}

impl Scripts {
    pub(crate) fn add(&self, url: &str, items: Vec<Item>) -> &Self {
        self.runs
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push_back(items);
        self
    }

    pub(crate) fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub(crate) fn count(&self, entry: &str) -> usize {
        self.log().iter().filter(|e| *e == entry).count()
    }

    fn next_run(&self, url: &str) -> Vec<Item> {
        let mut runs = self.runs.lock().unwrap();
        match runs.get_mut(url) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or_default(),
            Some(queue) => queue.front().cloned().unwrap_or_default(),
            None => Vec::new(),
        }
    }

    pub(crate) fn factory(&self, info: ExtractorInfo) -> ExtractorFactory {
        let scripts = self.clone();
        Arc::new(move |url: &str| {
            Ok(Box::new(ScriptedExtractor {
                info: info.clone(),
                url: url.to_string(),
                items: scripts.next_run(url).into(),
                log: Arc::clone(&scripts.log),
            }) as Box<dyn Extractor>)
        })
    }

    /// Register `category` for URLs starting with `<category>:`
    pub(crate) fn register(&self, registry: &mut ExtractorRegistry, category: &str) {
        registry
            .register(
                category,
                "",
                &format!("^{category}:"),
                self.factory(ExtractorInfo::new(category, "")),
            )
            .unwrap();
    }
}

pub(crate) struct ScriptedExtractor {
    info: ExtractorInfo,
    url: String,
    items: VecDeque<Item>,
    log: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Extractor for ScriptedExtractor {
    fn info(&self) -> &ExtractorInfo {
        &self.info
    }

    fn url(&self) -> &str {
        &self.url
    }

    async fn initialize(&mut self) -> JobResult<()> {
        self.log.lock().unwrap().push(format!("init {}", self.url));
        Ok(())
    }

    async fn next_message(&mut self) -> Option<JobResult<Message>> {
        let item = self.items.pop_front()?;
        if let Item::Message(Message::Url(url, _)) = &item {
            self.log.lock().unwrap().push(format!("yield {url}"));
        }
        Some(match item {
            Item::Message(message) => Ok(message),
            Item::Signal(signal) => Err(JobError::Signal(signal)),
            Item::NotFound => Err(Error::NotFound(self.url.clone()).into()),
        })
    }

    async fn finalize(&mut self) {
        self.log.lock().unwrap().push(format!("finalize {}", self.url));
    }

    async fn sleep(&mut self, seconds: f64) {
        self.log.lock().unwrap().push(format!("sleep {seconds}"));
    }

    fn skip(&mut self, count: u64) -> u64 {
        let mut skipped = 0;
        while skipped < count
            && matches!(self.items.front(), Some(Item::Message(Message::Url(..))))
        {
            self.items.pop_front();
            skipped += 1;
        }
        skipped
    }
}
