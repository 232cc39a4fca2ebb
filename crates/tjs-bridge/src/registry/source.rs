//! Library artifact sources
//!
//! A source turns an [`ArtifactLocator`] into the manifest of the library
//! build it points at. Failures are classified into [`LoadCause`]s so the
//! registry can report them uniformly.

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

use super::ArtifactLocator;
use super::version::LibraryVersion;
use crate::error::LoadCause;

/// Oldest major version the bridge can drive
pub const MIN_SUPPORTED_MAJOR: u32 = 2;

/// The part of a package manifest the bridge reads
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryManifest {
    pub name: String,
    pub version: String,
}

impl LibraryManifest {
    pub fn new(name: &str, version: &str) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
        }
    }

    /// Parsed version, rejecting builds the bridge cannot drive
    pub fn checked_version(&self) -> Result<LibraryVersion, LoadCause> {
        let version = LibraryVersion::parse(&self.version).map_err(LoadCause::Malformed)?;
        if version.major < MIN_SUPPORTED_MAJOR {
            return Err(LoadCause::Unsupported(format!(
                "{}@{} predates {}.0",
                self.name, self.version, MIN_SUPPORTED_MAJOR
            )));
        }
        Ok(version)
    }
}

#[async_trait]
pub trait ArtifactSource: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &str;

    async fn fetch(&self, locator: &ArtifactLocator) -> Result<LibraryManifest, LoadCause>;
}

/// In-memory catalogue of published builds
///
/// Locators are matched by package name and version selector, so
/// `latest` picks the newest published version and `3.*` the newest 3.x.
/// Locators without a package name (arbitrary URLs) must be published
/// under their full URL with [`publish_url`](Self::publish_url).
#[derive(Default)]
pub struct StaticSource {
    packages: RwLock<BTreeMap<String, Vec<LibraryManifest>>>,
    urls: RwLock<BTreeMap<String, LibraryManifest>>,
}

impl StaticSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, package: &str, version: &str) -> &Self {
        self.packages
            .write()
            .entry(package.to_string())
            .or_default()
            .push(LibraryManifest::new(package, version));
        self
    }

    pub fn publish_url(&self, url: &str, manifest: LibraryManifest) -> &Self {
        self.urls.write().insert(url.to_string(), manifest);
        self
    }

    pub fn with(self, package: &str, version: &str) -> Self {
        self.publish(package, version);
        self
    }

    fn newest_matching(&self, package: &str, selector: &str) -> Option<LibraryManifest> {
        let packages = self.packages.read();
        packages
            .get(package)?
            .iter()
            .filter_map(|m| LibraryVersion::parse(&m.version).ok().map(|v| (v, m)))
            .filter(|(v, _)| v.matches(selector))
            .max_by(|(a, _), (b, _)| a.cmp(b))
            .map(|(_, m)| m.clone())
    }
}

#[async_trait]
impl ArtifactSource for StaticSource {
    fn name(&self) -> &str {
        "static"
    }

    async fn fetch(&self, locator: &ArtifactLocator) -> Result<LibraryManifest, LoadCause> {
        if let Some(manifest) = self.urls.read().get(locator.url()) {
            return Ok(manifest.clone());
        }

        let found = match (locator.package(), locator.selector()) {
            (Some(package), Some(selector)) => self.newest_matching(package, selector),
            _ => None,
        };
        found.ok_or_else(|| LoadCause::NotFound(locator.url().to_string()))
    }
}

/// Fetches `{locator}/{manifest_file}` over HTTP
pub struct HttpSource {
    client: Client,
    manifest_file: String,
}

impl HttpSource {
    pub fn new(timeout: Duration) -> Self {
        Self::with_manifest_file(timeout, "package.json")
    }

    pub fn with_manifest_file(timeout: Duration, manifest_file: &str) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            manifest_file: manifest_file.to_string(),
        }
    }

    fn manifest_url(&self, locator: &ArtifactLocator) -> String {
        format!("{}/{}", locator.url().trim_end_matches('/'), self.manifest_file)
    }
}

#[async_trait]
impl ArtifactSource for HttpSource {
    fn name(&self) -> &str {
        "http"
    }

    async fn fetch(&self, locator: &ArtifactLocator) -> Result<LibraryManifest, LoadCause> {
        let url = self.manifest_url(locator);
        debug!(url = %url, "Fetching library manifest");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| LoadCause::Network(format!("{}: {}", url, e)))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(LoadCause::NotFound(url));
        }
        if !status.is_success() {
            return Err(LoadCause::Network(format!("{}: HTTP {}", url, status)));
        }

        let body = response
            .text()
            .await
            .map_err(|e| LoadCause::Network(format!("{}: {}", url, e)))?;
        let manifest: LibraryManifest = serde_json::from_str(&body)
            .map_err(|e| LoadCause::Malformed(format!("{}: {}", url, e)))?;
        manifest.checked_version()?;
        Ok(manifest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn locator(key: &str) -> ArtifactLocator {
        ArtifactLocator::derive(key, "https://cdn.example.org/npm")
    }

    #[tokio::test]
    async fn test_static_source_selectors() {
        let source = StaticSource::new()
            .with("@xenova/transformers", "2.4.2")
            .with("@xenova/transformers", "2.17.2")
            .with("@huggingface/transformers", "3.0.0")
            .with("@huggingface/transformers", "3.1.2");

        let latest = source.fetch(&locator("latest")).await.unwrap();
        assert_eq!(latest.name, "@huggingface/transformers");
        assert_eq!(latest.version, "3.1.2");

        let pinned = source.fetch(&locator("2.4.2")).await.unwrap();
        assert_eq!(pinned.version, "2.4.2");

        let minor = source.fetch(&locator("2.17")).await.unwrap();
        assert_eq!(minor.version, "2.17.2");

        assert!(matches!(
            source.fetch(&locator("9.9.9")).await,
            Err(LoadCause::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_static_source_urls() {
        let source = StaticSource::new();
        let url = "https://mirror.example.org/tjs@2.4.2";
        source.publish_url(url, LibraryManifest::new("@xenova/transformers", "2.4.2"));

        let manifest = source.fetch(&locator(url)).await.unwrap();
        assert_eq!(manifest.version, "2.4.2");
    }

    #[test]
    fn test_manifest_version_checks() {
        assert!(LibraryManifest::new("lib", "2.0.0").checked_version().is_ok());
        assert!(matches!(
            LibraryManifest::new("lib", "1.9.0").checked_version(),
            Err(LoadCause::Unsupported(_))
        ));
        assert!(matches!(
            LibraryManifest::new("lib", "two").checked_version(),
            Err(LoadCause::Malformed(_))
        ));
    }
}
