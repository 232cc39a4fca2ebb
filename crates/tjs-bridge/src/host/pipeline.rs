//! Task pipelines
//!
//! `pipeline(task, model)` resolves a [`TaskHandler`] from the
//! [`TaskRegistry`] and produces a callable [`Pipeline`] object. Running
//! models is the handler's business; the bridge only wires inputs,
//! options and results through.

use async_trait::async_trait;
use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

use super::env::EnvConfig;
use super::fetch::ResourceFetcher;
use super::image::RawImage;
use super::object::{
    Capabilities, Capability, HostObject, HostReturn, HostValue, NativeFunction, PlainObject, arg,
};
use crate::error::{HostError, HostResult};

/// Alternative task names accepted by `pipeline`
pub const TASK_ALIASES: &[(&str, &str)] = &[
    ("sentiment-analysis", "text-classification"),
    ("ner", "token-classification"),
    ("vqa", "visual-question-answering"),
    ("asr", "automatic-speech-recognition"),
    ("embeddings", "feature-extraction"),
];

/// Resources a task may use while running
#[derive(Clone)]
pub struct TaskServices {
    env: Arc<EnvConfig>,
    fetcher: Arc<dyn ResourceFetcher>,
}

impl TaskServices {
    pub fn new(env: Arc<EnvConfig>, fetcher: Arc<dyn ResourceFetcher>) -> Self {
        Self { env, fetcher }
    }

    pub fn env(&self) -> &EnvConfig {
        &self.env
    }

    pub fn fetcher(&self) -> &Arc<dyn ResourceFetcher> {
        &self.fetcher
    }

    /// Accept a `RawImage` or a locator the way image pipelines do
    pub async fn read_image(&self, input: &HostValue) -> HostResult<RawImage> {
        match input {
            HostValue::String(locator) => Ok(RawImage::decode(&self.fetcher.fetch(locator).await?)?),
            other => other.downcast::<RawImage>().cloned().ok_or_else(|| {
                HostError::type_error(format!("Unsupported image input: {}", other.type_name()))
            }),
        }
    }
}

/// One invocation of a pipeline
pub struct TaskRequest {
    pub model: String,
    pub input: HostValue,
    pub options: HostValue,
    pub services: TaskServices,
}

#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Canonical task name, e.g. `zero-shot-image-classification`
    fn task(&self) -> &str;

    fn default_model(&self) -> &str;

    /// Initial attributes of a pipeline built for `model`
    fn attributes(&self, model: &str) -> Vec<(String, HostValue)> {
        Vec::new()
    }

    async fn run(&self, request: TaskRequest) -> HostResult<HostValue>;
}

/// Registered task handlers
#[derive(Clone, Default)]
pub struct TaskRegistry {
    handlers: BTreeMap<String, Arc<dyn TaskHandler>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: Arc<dyn TaskHandler>) {
        self.handlers.insert(handler.task().to_string(), handler);
    }

    pub fn with(mut self, handler: Arc<dyn TaskHandler>) -> Self {
        self.register(handler);
        self
    }

    /// Look up a task by name or alias
    pub fn resolve(&self, task: &str) -> Option<Arc<dyn TaskHandler>> {
        let canonical = TASK_ALIASES
            .iter()
            .find(|(alias, _)| *alias == task)
            .map_or(task, |(_, target)| *target);
        self.handlers.get(canonical).cloned()
    }

    pub fn supported(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

fn pipeline_class_name(task: &str) -> String {
    let mut name: String = task
        .split('-')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect();
    name.push_str("Pipeline");
    name
}

/// A constructed pipeline, callable with `(input, options)`
pub struct Pipeline {
    class: String,
    task: String,
    model: String,
    handler: Arc<dyn TaskHandler>,
    services: TaskServices,
    attributes: PlainObject,
}

impl Pipeline {
    pub fn new(task: &str, model: &str, handler: Arc<dyn TaskHandler>, services: TaskServices) -> Self {
        let attributes = handler
            .attributes(model)
            .into_iter()
            .fold(PlainObject::new("Pipeline"), |obj, (k, v)| obj.with_member(&k, v));
        Self {
            class: pipeline_class_name(handler.task()),
            task: task.to_string(),
            model: model.to_string(),
            handler,
            services,
            attributes,
        }
    }

    pub fn task(&self) -> &str {
        &self.task
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

impl HostObject for Pipeline {
    fn class_name(&self) -> &str {
        &self.class
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::of(&[Capability::Get, Capability::Set, Capability::Call])
    }

    fn get(&self, name: &str) -> HostResult<HostValue> {
        match name {
            "task" => Ok(HostValue::String(self.task.clone())),
            "model" => Ok(HostValue::String(self.model.clone())),
            _ => self.attributes.get(name),
        }
    }

    fn set(&self, name: &str, value: HostValue) -> HostResult<()> {
        match name {
            "task" | "model" => Err(HostError::type_error(format!(
                "Cannot assign to read only property '{}' of {}",
                name, self.class
            ))),
            _ => self.attributes.set(name, value),
        }
    }

    fn keys(&self) -> Vec<String> {
        let mut keys = vec!["task".to_string(), "model".to_string()];
        keys.extend(self.attributes.keys());
        keys
    }

    fn call(&self, args: Vec<HostValue>) -> HostResult<HostReturn> {
        let request = TaskRequest {
            model: self.model.clone(),
            input: arg(&args, 0).clone(),
            options: arg(&args, 1).clone(),
            services: self.services.clone(),
        };
        let handler = self.handler.clone();
        Ok(HostReturn::deferred(async move { handler.run(request).await }))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// The `pipeline(task, model?)` factory exported by the library
pub(crate) fn pipeline_function(tasks: TaskRegistry, services: TaskServices) -> NativeFunction {
    NativeFunction::new("pipeline", move |args| {
        let task = arg(&args, 0)
            .as_str()
            .ok_or_else(|| HostError::type_error("pipeline expects a task name"))?
            .to_string();
        let model = arg(&args, 1).as_str().map(str::to_string);
        let tasks = tasks.clone();
        let services = services.clone();

        Ok(HostReturn::deferred(async move {
            let handler = tasks.resolve(&task).ok_or_else(|| {
                HostError::exception(format!(
                    "Unsupported pipeline: {}. Must be one of [{}]",
                    task,
                    tasks.supported().join(",")
                ))
            })?;

            let env = services.env();
            let allow_remote = env.get_bool("allowRemoteModels").unwrap_or(false);
            let allow_local = env.get_bool("allowLocalModels").unwrap_or(false);
            if !allow_remote && !allow_local {
                return Err(HostError::exception(
                    "Invalid configuration detected: both local and remote models are disabled. \
                     Fix by setting `env.allowLocalModels` or `env.allowRemoteModels` to `true`.",
                ));
            }

            let model = model.unwrap_or_else(|| handler.default_model().to_string());
            info!(task = %task, model = %model, "Pipeline created");
            Ok(HostValue::object(Pipeline::new(&task, &model, handler, services)))
        }))
    })
}
