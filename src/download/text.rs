//! `text:` URLs carry their file content inline

use super::Downloader;
use crate::error::Result;
use crate::path::PathFormat;
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

/// Writes everything after `text:` into the target file
#[derive(Clone, Copy, Debug, Default)]
pub struct TextDownloader;

#[async_trait]
impl Downloader for TextDownloader {
    async fn download(&self, url: &str, pathfmt: &mut PathFormat) -> Result<bool> {
        let content = url.strip_prefix("text:").unwrap_or(url);
        if pathfmt.extension().is_empty() {
            pathfmt.set_extension("txt")?;
        } else {
            pathfmt.fix_extension()?;
        }
        pathfmt.ensure_directory()?;

        let mut file = tokio::fs::File::create(pathfmt.temppath()).await?;
        file.write_all(content.as_bytes()).await?;
        file.flush().await?;
        Ok(true)
    }
}
