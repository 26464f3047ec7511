//! HTTP(S) downloader

use super::Downloader;
use crate::config::ExtractorConfig;
use crate::error::{Error, Result};
use crate::path::PathFormat;
use crate::types::Value;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::StatusCode;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, LAST_MODIFIED, RANGE};
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// Default request timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: f64 = 30.0;

/// Default `User-Agent` header
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:128.0) Gecko/20100101 Firefox/128.0";

/// Content types with a non-obvious file extension
const MIME_TYPES: &[(&str, &str)] = &[
    ("image/jpeg", "jpg"),
    ("image/jpg", "jpg"),
    ("image/png", "png"),
    ("image/gif", "gif"),
    ("image/bmp", "bmp"),
    ("image/x-bmp", "bmp"),
    ("image/x-ms-bmp", "bmp"),
    ("image/webp", "webp"),
    ("image/avif", "avif"),
    ("image/heic", "heic"),
    ("image/heif", "heif"),
    ("image/svg+xml", "svg"),
    ("image/ico", "ico"),
    ("image/icon", "ico"),
    ("image/x-icon", "ico"),
    ("image/vnd.microsoft.icon", "ico"),
    ("image/x-photoshop", "psd"),
    ("application/x-photoshop", "psd"),
    ("image/vnd.adobe.photoshop", "psd"),
    ("video/webm", "webm"),
    ("video/ogg", "ogg"),
    ("video/mp4", "mp4"),
    ("video/quicktime", "mov"),
    ("audio/wav", "wav"),
    ("audio/x-wav", "wav"),
    ("audio/webm", "webm"),
    ("audio/ogg", "ogg"),
    ("audio/mpeg", "mp3"),
    ("application/zip", "zip"),
    ("application/x-zip", "zip"),
    ("application/x-zip-compressed", "zip"),
    ("application/rar", "rar"),
    ("application/x-rar", "rar"),
    ("application/x-rar-compressed", "rar"),
    ("application/x-7z-compressed", "7z"),
    ("application/pdf", "pdf"),
    ("application/x-pdf", "pdf"),
    ("application/x-shockwave-flash", "swf"),
    ("application/ogg", "ogg"),
    ("application/octet-stream", "bin"),
    ("text/plain", "txt"),
    ("text/html", "html"),
];

/// Settings of the HTTP downloader
#[derive(Clone, Debug, PartialEq)]
pub struct HttpOptions {
    /// Download into `<name>.part` and rename when complete
    pub part: bool,
    /// Directory for `.part` files instead of the target directory
    pub part_directory: Option<PathBuf>,
    /// Connect and read timeout
    pub timeout: Duration,
    /// `User-Agent` header
    pub user_agent: String,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            part: true,
            part_directory: None,
            timeout: Duration::from_secs_f64(DEFAULT_TIMEOUT_SECS),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl HttpOptions {
    /// Read `part`, `part-directory`, `timeout` and `user-agent`
    pub fn from_config(config: &ExtractorConfig) -> Result<Self> {
        let defaults = Self::default();
        let timeout = match config.get_as::<f64>("timeout")? {
            Some(secs) => Duration::try_from_secs_f64(secs)
                .map_err(|e| Error::config("timeout", format!("invalid timeout {secs}: {e}")))?,
            None => defaults.timeout,
        };
        Ok(Self {
            part: config.bool("part", defaults.part),
            part_directory: config
                .string("part-directory")
                .filter(|dir| !dir.is_empty())
                .map(crate::utils::expand_path),
            timeout,
            user_agent: config
                .string("user-agent")
                .map_or(defaults.user_agent, str::to_string),
        })
    }
}

/// Streams HTTP responses to disk with `reqwest`
#[derive(Clone, Debug)]
pub struct HttpDownloader {
    client: reqwest::Client,
    options: HttpOptions,
}

impl HttpDownloader {
    /// Create a downloader with its own connection pool
    pub fn new(options: HttpOptions) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(options.timeout)
            .user_agent(options.user_agent.clone())
            .build()?;
        Ok(Self { client, options })
    }

    /// Create a downloader from the extractor's configuration
    pub fn from_config(config: &ExtractorConfig) -> Result<Self> {
        Self::new(HttpOptions::from_config(config)?)
    }

    /// Settings in effect
    pub fn options(&self) -> &HttpOptions {
        &self.options
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    async fn download(&self, url: &str, pathfmt: &mut PathFormat) -> Result<bool> {
        if self.options.part {
            pathfmt.part_enable(self.options.part_directory.as_deref())?;
        } else {
            pathfmt.fix_extension()?;
        }
        pathfmt.ensure_directory()?;

        let offset = if self.options.part {
            match tokio::fs::metadata(pathfmt.temppath()).await {
                Ok(meta) if meta.is_file() => meta.len(),
                _ => 0,
            }
        } else {
            0
        };

        let mut request = self.client.get(url);
        if offset > 0 {
            request = request.header(RANGE, format!("bytes={offset}-"));
        }
        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(url, error = %e, "request failed");
                return Ok(false);
            }
        };

        let status = response.status();
        let append = match status {
            StatusCode::PARTIAL_CONTENT if offset > 0 => true,
            StatusCode::RANGE_NOT_SATISFIABLE if offset > 0 => {
                debug!(url, offset, "partial file already complete");
                adopt_headers(&response, pathfmt)?;
                return Ok(true);
            }
            s if s.is_success() => false,
            s => {
                warn!(url, status = %s, "download failed");
                return Ok(false);
            }
        };

        if adopt_headers(&response, pathfmt)? {
            // the real extension revealed a file that is already there
            pathfmt.set_temppath("");
            return Ok(true);
        }

        let expected = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());

        let mut file = if append {
            tokio::fs::OpenOptions::new()
                .append(true)
                .open(pathfmt.temppath())
                .await?
        } else {
            tokio::fs::File::create(pathfmt.temppath()).await?
        };

        let mut received: u64 = 0;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    warn!(url, error = %e, received, "download interrupted");
                    file.flush().await?;
                    return Ok(false);
                }
            };
            file.write_all(&chunk).await?;
            received += chunk.len() as u64;
        }
        file.flush().await?;

        if let Some(expected) = expected
            && received < expected
        {
            warn!(url, received, expected, "file size mismatch");
            return Ok(false);
        }

        debug!(url, path = %pathfmt.temppath(), bytes = received, "download complete");
        Ok(true)
    }
}

/// Take the file extension and modification time from response headers
///
/// Returns `true` when the corrected path names a file that already exists
/// and should not be downloaded again.
fn adopt_headers(response: &reqwest::Response, pathfmt: &mut PathFormat) -> Result<bool> {
    let headers = response.headers();

    if !pathfmt.kwdict().contains_key("_mtime")
        && let Some(modified) = headers.get(LAST_MODIFIED).and_then(|v| v.to_str().ok())
    {
        pathfmt
            .kwdict_mut()
            .insert("_mtime".to_string(), Value::String(modified.to_string()));
    }

    if pathfmt.extension().is_empty() {
        let content_type = headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok());
        pathfmt.set_extension(&extension_from_mime(content_type))?;
        return pathfmt.exists();
    }
    Ok(false)
}

/// File extension for a `Content-Type` header value
///
/// A missing header is taken to mean `image/jpeg`; unknown types fall back
/// to their subtype when it looks like an extension, otherwise `txt`.
pub fn extension_from_mime(content_type: Option<&str>) -> String {
    let mime = content_type
        .unwrap_or("image/jpeg")
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();
    let mime = if mime.contains('/') {
        mime
    } else {
        format!("image/{mime}")
    };

    if let Some((_, ext)) = MIME_TYPES.iter().find(|(m, _)| *m == mime) {
        return (*ext).to_string();
    }

    let subtype = mime.rsplit('/').next().unwrap_or("");
    let subtype = subtype.strip_prefix("x-").unwrap_or(subtype);
    if !subtype.is_empty() && subtype.len() <= 8 && subtype.chars().all(|c| c.is_ascii_alphanumeric())
    {
        subtype.to_string()
    } else {
        "txt".to_string()
    }
}
