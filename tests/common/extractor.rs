//! A small HTTP gallery extractor backed by a JSON index
//!
//! `<server>/gallery/<id>` is described by `<server>/gallery/<id>.json`:
//!
//! ```json
//! {"title": "...", "images": [{"id": 1, "url": "..."}], "related": ["..."]}
//! ```

use async_trait::async_trait;
use gallery_pipeline::utils::nameext_from_url;
use gallery_pipeline::{
    Error, Extractor, ExtractorFactory, ExtractorInfo, ExtractorRegistry, JobResult, Kwdict,
    Message, Value,
};
use std::collections::VecDeque;
use std::sync::Arc;

/// Category of the JSON gallery extractor
pub const CATEGORY: &str = "jsongallery";

pub struct JsonGallery {
    info: ExtractorInfo,
    url: String,
    client: reqwest::Client,
    messages: VecDeque<Message>,
}

impl JsonGallery {
    pub fn new(url: &str) -> Self {
        Self {
            info: ExtractorInfo::new(CATEGORY, "gallery")
                .with_directory_fmt(["{category}", "{title}"])
                .with_archive_fmt("{gallery_id}_{id}"),
            url: url.to_string(),
            client: reqwest::Client::new(),
            messages: VecDeque::new(),
        }
    }

    async fn index(&self) -> gallery_pipeline::Result<Value> {
        let response = self.client.get(format!("{}.json", self.url)).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::NotFound(self.url.clone()));
        }
        let text = response.error_for_status()?.text().await?;
        Ok(serde_json::from_str(&text)?)
    }
}

#[async_trait]
impl Extractor for JsonGallery {
    fn info(&self) -> &ExtractorInfo {
        &self.info
    }

    fn url(&self) -> &str {
        &self.url
    }

    async fn initialize(&mut self) -> JobResult<()> {
        let index = self.index().await?;
        let gallery_id = self.url.rsplit('/').next().unwrap_or_default().to_string();

        let mut gallery = Kwdict::new();
        gallery.insert("gallery_id".into(), Value::String(gallery_id));
        gallery.insert("title".into(), index["title"].clone());

        self.messages.push_back(Message::Version(1));
        self.messages.push_back(Message::Directory(gallery.clone()));
        for image in index["images"].as_array().into_iter().flatten() {
            let url = image["url"].as_str().unwrap_or_default().to_string();
            let mut kwdict = gallery.clone();
            if let Value::Object(fields) = image {
                kwdict.extend(fields.clone());
            }
            nameext_from_url(&url, &mut kwdict);
            self.messages.push_back(Message::Url(url, kwdict));
        }
        for related in index["related"].as_array().into_iter().flatten() {
            if let Some(url) = related.as_str() {
                self.messages
                    .push_back(Message::Queue(url.to_string(), gallery.clone()));
            }
        }
        Ok(())
    }

    async fn next_message(&mut self) -> Option<JobResult<Message>> {
        self.messages.pop_front().map(Ok)
    }
}

pub fn factory() -> ExtractorFactory {
    Arc::new(|url: &str| Ok(Box::new(JsonGallery::new(url)) as Box<dyn Extractor>))
}

/// Registry with the JSON gallery extractor for `/gallery/<id>` URLs
pub fn registry() -> ExtractorRegistry {
    let mut registry = ExtractorRegistry::new();
    registry
        .register(CATEGORY, "gallery", r"/gallery/\d+$", factory())
        .unwrap();
    registry
}
