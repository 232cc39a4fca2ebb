//! Library module namespace
//!
//! One [`LibraryModule`] per loaded instance. Its exports are built fresh
//! for every instance, so nothing (not even `env`) is shared between two
//! loaded versions.

use parking_lot::RwLock;
use std::any::Any;
use std::sync::Arc;

use super::env::EnvConfig;
use super::fetch::ResourceFetcher;
use super::image::RawImageClass;
use super::object::{Capabilities, Capability, HostObject, HostRef, HostValue};
use super::pipeline::{TaskRegistry, TaskServices, pipeline_function};
use super::tensor::TensorClass;
use crate::error::{HostError, HostResult};

pub struct LibraryModule {
    name: String,
    version: String,
    exports: RwLock<Vec<(String, HostValue)>>,
}

impl LibraryModule {
    pub fn instantiate(
        name: &str,
        version: &str,
        env: Arc<EnvConfig>,
        tasks: TaskRegistry,
        fetcher: Arc<dyn ResourceFetcher>,
    ) -> Self {
        let services = TaskServices::new(env.clone(), fetcher.clone());
        let env: HostRef = env;
        let exports = vec![
            ("env".to_string(), HostValue::Object(env)),
            ("Tensor".to_string(), HostValue::object(TensorClass)),
            ("RawImage".to_string(), HostValue::object(RawImageClass::new(fetcher))),
            ("pipeline".to_string(), HostValue::object(pipeline_function(tasks, services))),
        ];
        Self {
            name: name.to_string(),
            version: version.to_string(),
            exports: RwLock::new(exports),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn export(&self, name: &str) -> Option<HostValue> {
        self.exports
            .read()
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.clone())
    }
}

impl HostObject for LibraryModule {
    fn class_name(&self) -> &str {
        "Module"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::of(&[Capability::Get, Capability::Set, Capability::Iterate])
    }

    fn get(&self, name: &str) -> HostResult<HostValue> {
        self.export(name)
            .ok_or_else(|| HostError::missing(format!("{}@{}", self.name, self.version), name))
    }

    fn set(&self, name: &str, value: HostValue) -> HostResult<()> {
        let mut exports = self.exports.write();
        match exports.iter_mut().find(|(k, _)| k == name) {
            Some(slot) => slot.1 = value,
            None => exports.push((name.to_string(), value)),
        }
        Ok(())
    }

    fn keys(&self) -> Vec<String> {
        self.exports.read().iter().map(|(k, _)| k.clone()).collect()
    }

    fn iterate(&self) -> HostResult<Vec<HostValue>> {
        Ok(self.keys().into_iter().map(HostValue::String).collect())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
