//! Resource fetching
//!
//! The host reads images and other resources by locator: `blob:` URLs
//! come from the [`BlobStore`], `file://` URLs and bare paths from disk,
//! and `http(s)` URLs over the network.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::blob::BlobStore;
use crate::error::{HostError, HostResult};

#[async_trait]
pub trait ResourceFetcher: Send + Sync {
    async fn fetch(&self, locator: &str) -> HostResult<Vec<u8>>;
}

/// Fetcher backed by the blob store, the filesystem and `reqwest`
pub struct DefaultFetcher {
    blobs: Arc<BlobStore>,
    client: reqwest::Client,
}

impl DefaultFetcher {
    pub fn new(blobs: Arc<BlobStore>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { blobs, client }
    }

    async fn read_file(path: &std::path::Path) -> HostResult<Vec<u8>> {
        tokio::fs::read(path).await.map_err(|e| {
            HostError::exception(format!("Unable to read '{}': {}", path.display(), e))
        })
    }

    async fn fetch_http(&self, url: &Url) -> HostResult<Vec<u8>> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| HostError::exception(format!("Failed to fetch {}: {}", url, e)))?;
        let status = response.status();
        if !status.is_success() {
            return Err(HostError::exception(format!(
                "Failed to fetch {}: HTTP {}",
                url, status
            )));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| HostError::exception(format!("Failed to fetch {}: {}", url, e)))?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl ResourceFetcher for DefaultFetcher {
    async fn fetch(&self, locator: &str) -> HostResult<Vec<u8>> {
        debug!(locator, "Fetching resource");
        if locator.starts_with("blob:") {
            return self
                .blobs
                .get(locator)
                .map(|bytes| bytes.to_vec())
                .ok_or_else(|| HostError::exception(format!("Failed to fetch {}: no such blob", locator)));
        }

        match Url::parse(locator) {
            Ok(url) if url.scheme() == "file" => {
                let path = url
                    .to_file_path()
                    .map_err(|_| HostError::exception(format!("Invalid file URL: {}", locator)))?;
                Self::read_file(&path).await
            }
            Ok(url) if matches!(url.scheme(), "http" | "https") => self.fetch_http(&url).await,
            Ok(url) if url.scheme().len() > 1 => Err(HostError::exception(format!(
                "Unsupported URL scheme: {}",
                url.scheme()
            ))),
            // Not a URL, or a Windows drive letter parsed as a scheme
            _ => Self::read_file(std::path::Path::new(locator)).await,
        }
    }
}
