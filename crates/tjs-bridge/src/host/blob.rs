//! Blob store
//!
//! Holds byte ranges addressed by `blob:<origin>/<uuid>` locators, the way
//! the host's object URLs work. There is no release API: every handle
//! lives as long as the store, so callers that mint URLs in a loop grow
//! the store without bound.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Locator for a stored blob
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlobHandle {
    url: String,
    size: usize,
}

impl BlobHandle {
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn into_url(self) -> String {
        self.url
    }
}

impl fmt::Display for BlobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url)
    }
}

/// Process-wide blob registry
pub struct BlobStore {
    origin: String,
    blobs: RwLock<HashMap<String, Arc<[u8]>>>,
}

impl BlobStore {
    pub fn new(origin: &str) -> Self {
        Self {
            origin: origin.trim_end_matches('/').to_string(),
            blobs: RwLock::new(HashMap::new()),
        }
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Store bytes under a fresh locator
    pub fn create(&self, bytes: Vec<u8>) -> BlobHandle {
        let url = format!("blob:{}/{}", self.origin, Uuid::new_v4());
        let size = bytes.len();
        self.blobs.write().insert(url.clone(), bytes.into());
        debug!(url = %url, size, "Created blob");
        BlobHandle { url, size }
    }

    pub fn get(&self, url: &str) -> Option<Arc<[u8]>> {
        self.blobs.read().get(url).cloned()
    }

    pub fn contains(&self, url: &str) -> bool {
        self.blobs.read().contains_key(url)
    }

    /// Number of stored blobs
    pub fn len(&self) -> usize {
        self.blobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn total_bytes(&self) -> usize {
        self.blobs.read().values().map(|b| b.len()).sum()
    }
}

impl Default for BlobStore {
    fn default() -> Self {
        Self::new("tjs-bridge")
    }
}
