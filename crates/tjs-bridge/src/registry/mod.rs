//! Version registry
//!
//! Maps version keys to loaded [`ModuleInstance`]s. Keys are compared as
//! exact strings: `"2.4.2"` and the CDN URL of the same build are two
//! different keys and get two isolated instances. Concurrent first
//! requests for one key share a single load, and a failed load leaves
//! nothing behind, so the next request tries again.

pub mod source;
pub mod version;

pub use source::{ArtifactSource, HttpSource, LibraryManifest, MIN_SUPPORTED_MAJOR, StaticSource};
pub use version::LibraryVersion;

use parking_lot::Mutex;
use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::error::{LoadCause, LoadError};
use crate::instance::{InstanceFactory, ModuleInstance};
use crate::marshal::is_url;

/// Package name used for `latest` and 3.x keys
pub const HF_PACKAGE: &str = "@huggingface/transformers";
/// Package name used for every other version key
pub const XENOVA_PACKAGE: &str = "@xenova/transformers";
/// Key used when the caller names no version
pub const LATEST: &str = "latest";

/// Opaque registry key, compared by exact string
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VersionKey(String);

impl VersionKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn latest() -> Self {
        Self::new(LATEST)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VersionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for VersionKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for VersionKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

fn package_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(@[^/@]+/[^/@]+|[^/@]+)@(\d[^/]*)").expect("package pattern is valid")
    })
}

/// Where a library build lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactLocator {
    url: String,
    package: Option<String>,
    selector: Option<String>,
}

impl ArtifactLocator {
    /// A URL key is used as-is; any other key becomes a CDN package
    /// locator, `latest` and any `3.` key on the new package name and
    /// everything else on the old one
    pub fn derive(key: &str, cdn_base: &str) -> Self {
        if is_url(key) {
            let captures = package_pattern().captures(key);
            return Self {
                url: key.to_string(),
                package: captures
                    .as_ref()
                    .and_then(|c| c.get(1))
                    .map(|m| m.as_str().to_string()),
                selector: captures
                    .as_ref()
                    .and_then(|c| c.get(2))
                    .map(|m| m.as_str().to_string()),
            };
        }

        let package = if key == LATEST || key.starts_with("3.") {
            HF_PACKAGE
        } else {
            XENOVA_PACKAGE
        };
        Self {
            url: format!("{}/{}@{}", cdn_base.trim_end_matches('/'), package, key),
            package: Some(package.to_string()),
            selector: Some(key.to_string()),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn package(&self) -> Option<&str> {
        self.package.as_deref()
    }

    /// The version part of the locator (`latest`, `3.*`, `2.4.2`, ...)
    pub fn selector(&self) -> Option<&str> {
        self.selector.as_deref()
    }
}

impl fmt::Display for ArtifactLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url)
    }
}

/// Registry statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Resolutions served by an existing or in-flight load
    pub hits: u64,
    /// Resolutions that started a load
    pub misses: u64,
    pub loads: u64,
    pub failures: u64,
}

type Slot = Arc<OnceCell<Arc<ModuleInstance>>>;

pub struct VersionRegistry {
    source: Arc<dyn ArtifactSource>,
    factory: InstanceFactory,
    cdn_base: String,
    slots: Mutex<HashMap<VersionKey, Slot>>,
    stats: Mutex<RegistryStats>,
}

impl VersionRegistry {
    pub fn new(source: Arc<dyn ArtifactSource>, factory: InstanceFactory, cdn_base: &str) -> Self {
        Self {
            source,
            factory,
            cdn_base: cdn_base.to_string(),
            slots: Mutex::new(HashMap::new()),
            stats: Mutex::new(RegistryStats::default()),
        }
    }

    /// Instance for `key`, loading it on first use
    pub async fn resolve(&self, key: &VersionKey) -> Result<Arc<ModuleInstance>, LoadError> {
        self.resolve_tracked(key).await.map(|(instance, _)| instance)
    }

    /// Like [`resolve`](Self::resolve), also reporting whether this call
    /// performed the load
    pub(crate) async fn resolve_tracked(
        &self,
        key: &VersionKey,
    ) -> Result<(Arc<ModuleInstance>, bool), LoadError> {
        let slot = self.slots.lock().entry(key.clone()).or_default().clone();

        if let Some(instance) = slot.get() {
            self.stats.lock().hits += 1;
            debug!(key = %key, "Version cache hit");
            return Ok((instance.clone(), false));
        }

        let mut loaded_here = false;
        let result = slot
            .get_or_try_init(|| {
                loaded_here = true;
                self.load(key)
            })
            .await
            .cloned();

        let mut stats = self.stats.lock();
        if loaded_here {
            stats.misses += 1;
        } else {
            stats.hits += 1;
        }
        match result {
            Ok(instance) => {
                if loaded_here {
                    stats.loads += 1;
                }
                Ok((instance, loaded_here))
            }
            Err(cause) => {
                stats.failures += 1;
                drop(stats);
                self.forget_failed(key, &slot);
                warn!(key = %key, error = %cause, "Failed to load host library");
                Err(LoadError::new(key.as_str(), cause))
            }
        }
    }

    /// Drops the empty slot a failed load left behind, unless another
    /// caller has since replaced or filled it
    fn forget_failed(&self, key: &VersionKey, slot: &Slot) {
        let mut slots = self.slots.lock();
        if slots
            .get(key)
            .is_some_and(|current| Arc::ptr_eq(current, slot) && !current.initialized())
        {
            slots.remove(key);
        }
    }

    /// Slots held, including in-flight loads
    pub(crate) fn slot_count(&self) -> usize {
        self.slots.lock().len()
    }

    async fn load(&self, key: &VersionKey) -> Result<Arc<ModuleInstance>, LoadCause> {
        let locator = ArtifactLocator::derive(key.as_str(), &self.cdn_base);
        debug!(key = %key, locator = %locator, source = self.source.name(), "Loading host library");

        let manifest = self.source.fetch(&locator).await?;
        let version = manifest.checked_version()?;
        let instance = self.factory.instantiate(key.clone(), locator, manifest, version)?;

        info!(
            key = %key,
            package = %instance.manifest().name,
            version = %instance.version(),
            "Host library loaded"
        );
        Ok(instance)
    }

    /// Whether `key` has a loaded instance
    pub fn contains(&self, key: &VersionKey) -> bool {
        self.slots
            .lock()
            .get(key)
            .is_some_and(|slot| slot.initialized())
    }

    /// Keys with a loaded instance, sorted
    pub fn keys(&self) -> Vec<VersionKey> {
        let mut keys: Vec<VersionKey> = self
            .slots
            .lock()
            .iter()
            .filter(|(_, slot)| slot.initialized())
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.keys().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> RegistryStats {
        self.stats.lock().clone()
    }

    pub fn factory(&self) -> &InstanceFactory {
        &self.factory
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::BlobStore;

    const CDN: &str = "https://cdn.jsdelivr.net/npm";

    fn registry() -> VersionRegistry {
        let source = StaticSource::new()
            .with(XENOVA_PACKAGE, "2.4.2")
            .with(HF_PACKAGE, "3.0.0");
        VersionRegistry::new(
            Arc::new(source),
            InstanceFactory::new(Arc::new(BlobStore::default())),
            CDN,
        )
    }

    #[test]
    fn test_locator_derivation() {
        let latest = ArtifactLocator::derive("latest", CDN);
        assert_eq!(latest.url(), "https://cdn.jsdelivr.net/npm/@huggingface/transformers@latest");

        let three = ArtifactLocator::derive("3.*", CDN);
        assert_eq!(three.package(), Some(HF_PACKAGE));

        for pinned in ["3.0.0", "3.1.2"] {
            let locator = ArtifactLocator::derive(pinned, CDN);
            assert_eq!(locator.package(), Some(HF_PACKAGE));
            assert_eq!(
                locator.url(),
                format!("https://cdn.jsdelivr.net/npm/@huggingface/transformers@{pinned}")
            );
        }

        let pinned = ArtifactLocator::derive("2.4.2", "https://cdn.example.org/npm/");
        assert_eq!(pinned.url(), "https://cdn.example.org/npm/@xenova/transformers@2.4.2");
        assert_eq!(pinned.selector(), Some("2.4.2"));

        let url = "https://cdn.jsdelivr.net/npm/@xenova/transformers@2.4.2";
        let from_url = ArtifactLocator::derive(url, CDN);
        assert_eq!(from_url.url(), url);
        assert_eq!(from_url.package(), Some(XENOVA_PACKAGE));
        assert_eq!(from_url.selector(), Some("2.4.2"));

        let opaque = ArtifactLocator::derive("https://example.org/bundle.js", CDN);
        assert_eq!(opaque.package(), None);
    }

    #[tokio::test]
    async fn test_resolve_reuses_instances() {
        let registry = registry();
        let key = VersionKey::new("2.4.2");

        let first = registry.resolve(&key).await.unwrap();
        let second = registry.resolve(&key).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.version(), "2.4.2");

        let stats = registry.stats();
        assert_eq!((stats.misses, stats.hits, stats.loads), (1, 1, 1));
    }

    #[tokio::test]
    async fn test_failed_load_registers_nothing() {
        let registry = registry();
        let key = VersionKey::new("9.9.9");

        let err = registry.resolve(&key).await.unwrap_err();
        assert_eq!(err.key, "9.9.9");
        assert!(matches!(err.cause, LoadCause::NotFound(_)));
        assert!(!registry.contains(&key));
        assert!(registry.is_empty());
        assert_eq!(registry.stats().failures, 1);
    }

    #[tokio::test]
    async fn test_failed_keys_leave_no_slots() {
        let registry = registry();
        for key in ["9.9.9", "8.8.8", "not-a-version"] {
            assert!(registry.resolve(&VersionKey::new(key)).await.is_err());
        }
        assert_eq!(registry.slot_count(), 0);

        registry.resolve(&VersionKey::new("3.0.0")).await.unwrap();
        assert_eq!(registry.slot_count(), 1);
        assert!(registry.resolve(&VersionKey::new("9.9.9")).await.is_err());
        assert_eq!(registry.slot_count(), 1);
    }
}
