use anyhow::Context;
use async_trait::async_trait;
use base64::Engine as _;
use image::DynamicImage;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::HttpSettings;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Resource has file id {0} but no file store is configured")]
    NoFileStore(String),

    #[error("File not found in store: {0}")]
    FileNotFound(String),

    #[error("Invalid data URI: {0}")]
    InvalidDataUri(String),

    #[error("HTTP {status} while fetching {url}")]
    Status { url: String, status: u16 },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Failed to decode image: {0}")]
    Decode(#[from] image::ImageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, LoadError>;

/// Content store addressed by opaque file ids.
#[async_trait]
pub trait FileStore: Send + Sync {
    async fn get(&self, file_id: &str) -> Result<Vec<u8>>;
}

/// A directory of files named by the SHA-256 of their content.
pub struct LocalFileDepot {
    root: PathBuf,
}

impl LocalFileDepot {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, file_id: &str) -> Result<PathBuf> {
        let valid = !file_id.is_empty()
            && file_id != "."
            && file_id != ".."
            && file_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.');
        if !valid {
            return Err(LoadError::FileNotFound(file_id.to_string()));
        }
        Ok(self.root.join(file_id))
    }

    /// Store `bytes` and return their file id.
    pub async fn put(&self, bytes: &[u8]) -> Result<String> {
        let file_id = format!("{:x}", Sha256::digest(bytes));
        tokio::fs::create_dir_all(&self.root).await?;
        tokio::fs::write(self.path_for(&file_id)?, bytes).await?;
        debug!("Stored {} bytes as {}", bytes.len(), file_id);
        Ok(file_id)
    }

    pub async fn contains(&self, file_id: &str) -> bool {
        match self.path_for(file_id) {
            Ok(path) => tokio::fs::metadata(path).await.is_ok(),
            Err(_) => false,
        }
    }
}

#[async_trait]
impl FileStore for LocalFileDepot {
    async fn get(&self, file_id: &str) -> Result<Vec<u8>> {
        let path = self.path_for(file_id)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(LoadError::FileNotFound(file_id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Resolves resource identifiers to image bytes.
pub struct ImageLoader {
    client: reqwest::Client,
    file_store: Option<Arc<dyn FileStore>>,
}

impl ImageLoader {
    pub fn new(http: &HttpSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(http.timeout))
            .user_agent(http.user_agent.clone())
            .build()?;

        Ok(Self {
            client,
            file_store: None,
        })
    }

    pub fn with_file_store(mut self, store: Arc<dyn FileStore>) -> Self {
        self.file_store = Some(store);
        self
    }

    /// Bytes for a resource: from the file store when it carries a file id,
    /// otherwise from its location.
    pub async fn load_bytes(&self, location: &str, file_id: Option<&str>) -> Result<Vec<u8>> {
        if let Some(file_id) = file_id {
            let store = self
                .file_store
                .as_ref()
                .ok_or_else(|| LoadError::NoFileStore(file_id.to_string()))?;
            debug!("Loading {} from file store as {}", location, file_id);
            return store.get(file_id).await;
        }

        if let Some(data) = location.strip_prefix("data:") {
            return decode_data_uri(data);
        }

        match url::Url::parse(location) {
            Ok(url) if url.scheme() == "http" || url.scheme() == "https" => self.fetch(url).await,
            Ok(url) if url.scheme() == "file" => {
                let path = url
                    .to_file_path()
                    .map_err(|_| LoadError::FileNotFound(location.to_string()))?;
                Ok(tokio::fs::read(path).await?)
            }
            _ => {
                let path = Path::new(location);
                if tokio::fs::metadata(path).await.is_ok() {
                    Ok(tokio::fs::read(path).await?)
                } else {
                    Err(LoadError::FileNotFound(location.to_string()))
                }
            }
        }
    }

    async fn fetch(&self, url: url::Url) -> Result<Vec<u8>> {
        debug!("Fetching image from {}", url);
        let response = self.client.get(url.clone()).send().await?;

        let status = response.status();
        if !status.is_success() {
            warn!("Image fetch failed with {} for {}", status, url);
            return Err(LoadError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        Ok(response.bytes().await?.to_vec())
    }

    pub async fn load_image(&self, location: &str, file_id: Option<&str>) -> Result<DynamicImage> {
        let bytes = self.load_bytes(location, file_id).await?;
        decode_image(&bytes)
    }
}

pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage> {
    Ok(image::load_from_memory(bytes)?)
}

fn decode_data_uri(data: &str) -> Result<Vec<u8>> {
    let (header, payload) = data
        .split_once(',')
        .ok_or_else(|| LoadError::InvalidDataUri("missing ','".to_string()))?;

    if header.split(';').any(|p| p.eq_ignore_ascii_case("base64")) {
        base64::engine::general_purpose::STANDARD
            .decode(payload.trim())
            .map_err(|e| LoadError::InvalidDataUri(e.to_string()))
    } else {
        Ok(payload.as_bytes().to_vec())
    }
}

/// Read a text file, honoring a byte order mark if present.
pub async fn read_text_file(source: &str) -> anyhow::Result<String> {
    let bytes = tokio::fs::read(source).await
        .with_context(|| format!("Failed to read text file: {}", source))?;

    let encoding = if let Some((enc, _)) = encoding_rs::Encoding::for_bom(&bytes) {
        enc
    } else {
        encoding_rs::UTF_8
    };

    let (text, _, had_errors) = encoding.decode(&bytes);
    if had_errors {
        warn!("Encoding errors detected in file: {}", source);
    }

    Ok(text.into_owned())
}
