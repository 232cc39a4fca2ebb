//! Blob URLs for guest data
//!
//! Some host readers only accept locators. [`as_url`] materialises bytes,
//! a file or an image in the blob store and returns a fresh handle every
//! time it is called, even for identical input.

use image::DynamicImage;
use std::path::{Path, PathBuf};
use url::Url;

use super::image::encode_png;
use crate::error::ConversionError;
use crate::host::{BlobHandle, BlobStore};

/// Data that can be turned into a blob URL
#[derive(Debug, Clone)]
pub enum UrlSource {
    Bytes(Vec<u8>),
    /// A file read at conversion time
    Path(PathBuf),
    /// Stored PNG-encoded
    Image(DynamicImage),
}

impl From<Vec<u8>> for UrlSource {
    fn from(bytes: Vec<u8>) -> Self {
        UrlSource::Bytes(bytes)
    }
}

impl From<&[u8]> for UrlSource {
    fn from(bytes: &[u8]) -> Self {
        UrlSource::Bytes(bytes.to_vec())
    }
}

impl From<PathBuf> for UrlSource {
    fn from(path: PathBuf) -> Self {
        UrlSource::Path(path)
    }
}

impl From<&Path> for UrlSource {
    fn from(path: &Path) -> Self {
        UrlSource::Path(path.to_path_buf())
    }
}

impl From<&str> for UrlSource {
    fn from(path: &str) -> Self {
        UrlSource::Path(PathBuf::from(path))
    }
}

impl From<DynamicImage> for UrlSource {
    fn from(image: DynamicImage) -> Self {
        UrlSource::Image(image)
    }
}

impl From<&DynamicImage> for UrlSource {
    fn from(image: &DynamicImage) -> Self {
        UrlSource::Image(image.clone())
    }
}

/// Store `source` in the blob store and return its locator
pub async fn as_url(store: &BlobStore, source: impl Into<UrlSource>) -> Result<BlobHandle, ConversionError> {
    let bytes = match source.into() {
        UrlSource::Bytes(bytes) => bytes,
        UrlSource::Path(path) => tokio::fs::read(&path).await.map_err(|e| ConversionError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?,
        UrlSource::Image(image) => encode_png(&image)?,
    };
    Ok(store.create(bytes))
}

/// PNG-encode `image` into the blob store
pub(crate) fn image_url(store: &BlobStore, image: &DynamicImage) -> Result<BlobHandle, ConversionError> {
    Ok(store.create(encode_png(image)?))
}

/// Whether `s` parses as an absolute URL of any scheme
pub fn is_url(s: &str) -> bool {
    Url::parse(s).is_ok()
}
