//! Loaded library instances
//!
//! A [`ModuleInstance`] is one isolated copy of the host library: its own
//! module namespace, its own `env`, its own handle table and its own async
//! bridge worker. Nothing is shared with other instances except the
//! process blob store.

pub mod table;

pub use table::{InstanceEvent, InstanceTable, TableStats};

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crate::bridge::AsyncBridge;
use crate::error::{BridgeResult, ConversionError, LoadCause};
use crate::host::{
    BlobHandle, BlobStore, DefaultFetcher, EnvConfig, EnvValue, HostRef, LibraryModule,
    ResourceFetcher, TaskRegistry,
};
use crate::marshal::{self, DType, GuestValue, NdArray, Sharing, UrlSource};
use crate::proxy::{HandleTable, Proxy, RawImageClassProxy, TensorProxy};
use crate::registry::{ArtifactLocator, LibraryManifest, LibraryVersion, VersionKey};

/// Shared services every new instance is built with
#[derive(Clone)]
pub struct InstanceFactory {
    blobs: Arc<BlobStore>,
    fetcher: Arc<dyn ResourceFetcher>,
    tasks: TaskRegistry,
    env_overrides: BTreeMap<String, EnvValue>,
}

impl InstanceFactory {
    pub fn new(blobs: Arc<BlobStore>) -> Self {
        let fetcher = Arc::new(DefaultFetcher::new(blobs.clone(), Duration::from_secs(30)));
        Self {
            blobs,
            fetcher,
            tasks: TaskRegistry::new(),
            env_overrides: BTreeMap::new(),
        }
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn ResourceFetcher>) -> Self {
        self.fetcher = fetcher;
        self
    }

    pub fn with_tasks(mut self, tasks: TaskRegistry) -> Self {
        self.tasks = tasks;
        self
    }

    /// `env` values applied to every new instance after its defaults
    pub fn with_env_overrides(mut self, overrides: BTreeMap<String, EnvValue>) -> Self {
        self.env_overrides = overrides;
        self
    }

    pub fn blobs(&self) -> &Arc<BlobStore> {
        &self.blobs
    }

    pub fn tasks(&self) -> &TaskRegistry {
        &self.tasks
    }

    pub(crate) fn instantiate(
        &self,
        key: VersionKey,
        locator: ArtifactLocator,
        manifest: LibraryManifest,
        version: LibraryVersion,
    ) -> Result<Arc<ModuleInstance>, LoadCause> {
        let env = Arc::new(EnvConfig::new(&manifest.version));
        env.apply(&self.env_overrides)
            .map_err(|e| LoadCause::Malformed(format!("env override rejected: {}", e)))?;

        let library = LibraryModule::instantiate(
            &manifest.name,
            &manifest.version,
            env.clone(),
            self.tasks.clone(),
            self.fetcher.clone(),
        );
        let bridge = AsyncBridge::start(key.as_str()).map_err(LoadCause::Unsupported)?;

        Ok(Arc::new(ModuleInstance {
            key,
            locator,
            manifest,
            version,
            library: Arc::new(library),
            env,
            handles: Arc::new(HandleTable::new()),
            blobs: self.blobs.clone(),
            bridge,
            loaded_at: SystemTime::now(),
        }))
    }
}

/// One loaded copy of the host library
pub struct ModuleInstance {
    key: VersionKey,
    locator: ArtifactLocator,
    manifest: LibraryManifest,
    version: LibraryVersion,
    library: Arc<LibraryModule>,
    env: Arc<EnvConfig>,
    handles: Arc<HandleTable>,
    blobs: Arc<BlobStore>,
    bridge: AsyncBridge,
    loaded_at: SystemTime,
}

impl ModuleInstance {
    /// The key this instance was requested under
    pub fn key(&self) -> &VersionKey {
        &self.key
    }

    pub fn locator(&self) -> &ArtifactLocator {
        &self.locator
    }

    pub fn manifest(&self) -> &LibraryManifest {
        &self.manifest
    }

    /// Version the library reports, e.g. `"2.4.2"`
    pub fn version(&self) -> &str {
        &self.manifest.version
    }

    pub fn library_version(&self) -> &LibraryVersion {
        &self.version
    }

    pub fn loaded_at(&self) -> SystemTime {
        self.loaded_at
    }

    /// The instance's `env`, for direct reads in Rust code
    pub fn env_config(&self) -> &Arc<EnvConfig> {
        &self.env
    }

    pub fn handles(&self) -> &Arc<HandleTable> {
        &self.handles
    }

    pub fn blobs(&self) -> &Arc<BlobStore> {
        &self.blobs
    }

    pub fn bridge(&self) -> &AsyncBridge {
        &self.bridge
    }

    /// Proxy to the module namespace
    pub fn module(self: &Arc<Self>) -> Proxy {
        let library: HostRef = self.library.clone();
        Proxy::wrap(self, library)
    }

    /// Proxy to this instance's `env`
    pub fn env(self: &Arc<Self>) -> Proxy {
        let env: HostRef = self.env.clone();
        Proxy::wrap(self, env)
    }

    /// Module member by name
    pub fn get(self: &Arc<Self>, name: &str) -> BridgeResult<GuestValue> {
        self.module().get(name)
    }

    /// `pipeline(task, model)`, awaited
    pub async fn pipeline(self: &Arc<Self>, task: &str, model: Option<&str>) -> BridgeResult<Proxy> {
        let mut args = vec![GuestValue::from(task)];
        if let Some(model) = model {
            args.push(GuestValue::from(model));
        }
        let pipeline = self.module().call_method("pipeline", args)?.await?;
        Ok(pipeline.into_proxy()?)
    }

    /// `new Tensor(dtype, data, dims)`
    pub fn tensor(self: &Arc<Self>, dtype: DType, data: &[f64], dims: &[usize]) -> BridgeResult<TensorProxy> {
        let class = self.module().get_proxy("Tensor")?;
        let value = class.construct(vec![
            GuestValue::from(dtype.name()),
            GuestValue::List(data.iter().copied().map(GuestValue::Float).collect()),
            GuestValue::List(dims.iter().copied().map(GuestValue::from).collect()),
        ])?;
        TensorProxy::new(value.into_proxy()?)
    }

    /// Host tensor over a native array
    pub fn tensor_from_array(self: &Arc<Self>, array: &NdArray, sharing: Sharing) -> BridgeResult<TensorProxy> {
        let tensor: HostRef = Arc::new(marshal::tensor_from_array(array, sharing)?);
        TensorProxy::new(Proxy::wrap(self, tensor))
    }

    /// The `RawImage` class
    pub fn raw_image(self: &Arc<Self>) -> BridgeResult<RawImageClassProxy> {
        RawImageClassProxy::new(self.module().get_proxy("RawImage")?)
    }

    pub async fn as_url(&self, source: impl Into<UrlSource>) -> Result<BlobHandle, ConversionError> {
        marshal::as_url(&self.blobs, source).await
    }
}

impl fmt::Debug for ModuleInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleInstance")
            .field("key", &self.key)
            .field("locator", &self.locator.url())
            .field("package", &self.manifest.name)
            .field("version", &self.manifest.version)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instantiate(factory: &InstanceFactory, key: &str, version: &str) -> Arc<ModuleInstance> {
        let manifest = LibraryManifest::new("@xenova/transformers", version);
        let parsed = manifest.checked_version().unwrap();
        factory
            .instantiate(
                VersionKey::new(key),
                ArtifactLocator::derive(key, "https://cdn.jsdelivr.net/npm"),
                manifest,
                parsed,
            )
            .unwrap()
    }

    #[tokio::test]
    async fn test_env_overrides_apply_per_instance() {
        let mut overrides = BTreeMap::new();
        overrides.insert("allowLocalModels".to_string(), EnvValue::from(true));
        let factory = InstanceFactory::new(Arc::new(BlobStore::default())).with_env_overrides(overrides);

        let a = instantiate(&factory, "2.4.2", "2.4.2");
        let b = instantiate(&factory, "2.17.2", "2.17.2");
        assert_eq!(a.env_config().get_bool("allowLocalModels"), Some(true));

        a.env_config().set("allowRemoteModels", false).unwrap();
        assert_eq!(b.env_config().get_bool("allowRemoteModels"), Some(true));
        assert_eq!(b.env_config().version(), "2.17.2");
    }

    #[tokio::test]
    async fn test_rejected_override_fails_the_load() {
        let mut overrides = BTreeMap::new();
        overrides.insert("allowLocalModels".to_string(), EnvValue::from("yes"));
        let factory = InstanceFactory::new(Arc::new(BlobStore::default())).with_env_overrides(overrides);

        let manifest = LibraryManifest::new("@xenova/transformers", "2.4.2");
        let version = manifest.checked_version().unwrap();
        let result = factory.instantiate(
            VersionKey::new("2.4.2"),
            ArtifactLocator::derive("2.4.2", "https://cdn.jsdelivr.net/npm"),
            manifest,
            version,
        );
        assert!(matches!(result, Err(LoadCause::Malformed(_))));
    }

    #[tokio::test]
    async fn test_module_exports() {
        let factory = InstanceFactory::new(Arc::new(BlobStore::default()));
        let instance = instantiate(&factory, "2.4.2", "2.4.2");

        let module = instance.module();
        for name in ["env", "Tensor", "RawImage", "pipeline"] {
            assert!(module.has(name), "missing export {}", name);
        }
        assert_eq!(
            instance.env().get("version").unwrap().as_str(),
            Some("2.4.2")
        );
    }
}
