//! Bridge context
//!
//! Ties the version registry, the instance table and the shared blob store
//! together. Most programs use one context for the whole process, either
//! built explicitly or through [`global_context`].

use std::sync::{Arc, OnceLock};
use tracing::debug;

use crate::config::BridgeConfig;
use crate::error::{BridgeResult, ConversionError};
use crate::host::{BlobHandle, BlobStore, DefaultFetcher, ResourceFetcher, TaskHandler, TaskRegistry};
use crate::instance::{InstanceEvent, InstanceFactory, InstanceTable, ModuleInstance};
use crate::marshal::{self, UrlSource};
use crate::proxy::LazyProxy;
use crate::registry::{ArtifactSource, HttpSource, RegistryStats, VersionKey, VersionRegistry};

pub struct BridgeContext {
    config: BridgeConfig,
    registry: VersionRegistry,
    table: InstanceTable,
    blobs: Arc<BlobStore>,
}

impl BridgeContext {
    /// Context fetching manifests over HTTP
    pub fn new(config: BridgeConfig) -> Arc<Self> {
        Self::builder(config).build()
    }

    pub fn builder(config: BridgeConfig) -> BridgeContextBuilder {
        BridgeContextBuilder {
            config,
            source: None,
            fetcher: None,
            tasks: TaskRegistry::new(),
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn registry(&self) -> &VersionRegistry {
        &self.registry
    }

    pub fn table(&self) -> &InstanceTable {
        &self.table
    }

    pub fn blobs(&self) -> &Arc<BlobStore> {
        &self.blobs
    }

    /// Instance for `version`, or for the configured default version
    ///
    /// Only a call without a version writes the default slot; resolving an
    /// explicit version, even the same one, leaves it alone.
    pub async fn resolve_instance(&self, version: Option<&str>) -> BridgeResult<Arc<ModuleInstance>> {
        let key = VersionKey::new(version.unwrap_or(&self.config.default_version));
        let (instance, fresh) = self.registry.resolve_tracked(&key).await?;
        if fresh {
            self.table.loaded(&instance);
        }
        if version.is_none() {
            self.table.set_default(instance.clone());
        }
        Ok(instance)
    }

    /// The default instance, resolving it if no default exists yet
    pub async fn default_instance(&self) -> BridgeResult<Arc<ModuleInstance>> {
        match self.table.default_instance() {
            Some(instance) => Ok(instance),
            None => {
                debug!("No default instance yet, resolving one");
                self.resolve_instance(None).await
            }
        }
    }

    /// Blob URL for bytes, a file or an image
    pub async fn as_url(&self, source: impl Into<UrlSource>) -> Result<BlobHandle, ConversionError> {
        marshal::as_url(&self.blobs, source).await
    }

    /// Module member path resolved against the default instance when called
    pub fn lazy(self: &Arc<Self>, name: &str) -> LazyProxy {
        LazyProxy::new(self.clone(), name)
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<InstanceEvent> {
        self.table.subscribe()
    }

    pub fn registry_stats(&self) -> RegistryStats {
        self.registry.stats()
    }
}

pub struct BridgeContextBuilder {
    config: BridgeConfig,
    source: Option<Arc<dyn ArtifactSource>>,
    fetcher: Option<Arc<dyn ResourceFetcher>>,
    tasks: TaskRegistry,
}

impl BridgeContextBuilder {
    /// Where library manifests come from (HTTP by default)
    pub fn source(mut self, source: Arc<dyn ArtifactSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// How host code reads resources (blob store, disk and HTTP by default)
    pub fn fetcher(mut self, fetcher: Arc<dyn ResourceFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Register a pipeline task in every instance
    pub fn task(mut self, handler: Arc<dyn TaskHandler>) -> Self {
        self.tasks.register(handler);
        self
    }

    pub fn build(self) -> Arc<BridgeContext> {
        let config = self.config;
        let blobs = Arc::new(BlobStore::new(&config.blob_origin));
        let source: Arc<dyn ArtifactSource> = match self.source {
            Some(source) => source,
            None => Arc::new(HttpSource::with_manifest_file(
                config.fetch_timeout(),
                &config.manifest_file,
            )),
        };
        let fetcher: Arc<dyn ResourceFetcher> = match self.fetcher {
            Some(fetcher) => fetcher,
            None => Arc::new(DefaultFetcher::new(blobs.clone(), config.fetch_timeout())),
        };

        let factory = InstanceFactory::new(blobs.clone())
            .with_fetcher(fetcher)
            .with_tasks(self.tasks)
            .with_env_overrides(config.env_overrides());
        let registry = VersionRegistry::new(source, factory, &config.cdn_base);

        Arc::new(BridgeContext {
            config,
            registry,
            table: InstanceTable::new(),
            blobs,
        })
    }
}

static GLOBAL_CONTEXT: OnceLock<Arc<BridgeContext>> = OnceLock::new();

/// Install the process-wide context; fails if one is already in place
pub fn install_global(context: Arc<BridgeContext>) -> Result<(), Arc<BridgeContext>> {
    GLOBAL_CONTEXT.set(context)
}

/// The process-wide context, created from the environment on first use
pub fn global_context() -> Arc<BridgeContext> {
    GLOBAL_CONTEXT
        .get_or_init(|| {
            let config = BridgeConfig::from_env().unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Ignoring invalid bridge environment config");
                BridgeConfig::default()
            });
            BridgeContext::new(config)
        })
        .clone()
}
