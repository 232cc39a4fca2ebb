//! Shared fixtures for the `tjs-bridge` integration tests.
//!
//! Declared with `mod common;` in each test binary that needs it.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tjs_bridge::host::{HostValue, PlainObject, TaskHandler, TaskRequest};
use tjs_bridge::registry::{ArtifactLocator, HF_PACKAGE, XENOVA_PACKAGE};
use tjs_bridge::{
    ArtifactSource, BridgeConfig, BridgeContext, HostError, HostResult, LibraryManifest, LoadCause,
    StaticSource,
};

pub const CDN: &str = "https://cdn.jsdelivr.net/npm";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("tjs_bridge=debug")),
        )
        .with_test_writer()
        .try_init();
}

/// Published builds of both package names
pub fn catalogue() -> StaticSource {
    StaticSource::new()
        .with(XENOVA_PACKAGE, "2.4.2")
        .with(XENOVA_PACKAGE, "2.17.2")
        .with(HF_PACKAGE, "3.0.0")
        .with(HF_PACKAGE, "3.1.2")
}

/// Context over the catalogue with the fake tasks registered
pub fn context() -> Arc<BridgeContext> {
    context_with(Arc::new(catalogue()))
}

pub fn context_with(source: Arc<dyn ArtifactSource>) -> Arc<BridgeContext> {
    init_tracing();
    BridgeContext::builder(BridgeConfig::default())
        .source(source)
        .task(Arc::new(ZeroShotImageClassifier))
        .task(Arc::new(TextClassifier))
        .build()
}

/// Scores candidate labels by position and the image's mean brightness
pub struct ZeroShotImageClassifier;

#[async_trait]
impl TaskHandler for ZeroShotImageClassifier {
    fn task(&self) -> &str {
        "zero-shot-image-classification"
    }

    fn default_model(&self) -> &str {
        "Xenova/clip-vit-base-patch32"
    }

    fn attributes(&self, model: &str) -> Vec<(String, HostValue)> {
        let tokenizer = PlainObject::new("Tokenizer")
            .with_member("name_or_path", HostValue::from(model))
            .with_member("model_max_length", HostValue::Number(77.0));
        vec![("tokenizer".to_string(), HostValue::object(tokenizer))]
    }

    async fn run(&self, request: TaskRequest) -> HostResult<HostValue> {
        let image = request.services.read_image(&request.input).await?;
        let labels: Vec<String> = match request.options.field("candidate_labels") {
            Some(HostValue::Array(labels)) => labels
                .iter()
                .filter_map(|l| l.as_str().map(str::to_string))
                .collect(),
            _ => return Err(HostError::type_error("candidate_labels must be an array")),
        };
        if labels.is_empty() {
            return Err(HostError::exception("no candidate labels"));
        }

        let brightness = image.data().iter().map(|&p| p as f64).sum::<f64>()
            / (image.data().len().max(1) as f64 * 255.0);
        let weights: Vec<f64> = (0..labels.len())
            .map(|i| (labels.len() - i) as f64 + brightness)
            .collect();
        let total: f64 = weights.iter().sum();

        Ok(HostValue::Array(
            labels
                .into_iter()
                .zip(weights)
                .map(|(label, w)| {
                    HostValue::record([
                        ("label", HostValue::from(label.as_str())),
                        ("score", HostValue::Number(w / total)),
                    ])
                })
                .collect(),
        ))
    }
}

/// Labels text by whether it contains "love"
pub struct TextClassifier;

#[async_trait]
impl TaskHandler for TextClassifier {
    fn task(&self) -> &str {
        "text-classification"
    }

    fn default_model(&self) -> &str {
        "Xenova/distilbert-base-uncased-finetuned-sst-2-english"
    }

    async fn run(&self, request: TaskRequest) -> HostResult<HostValue> {
        let text = request
            .input
            .as_str()
            .ok_or_else(|| HostError::type_error("text input expected"))?;
        let label = if text.contains("love") { "POSITIVE" } else { "NEGATIVE" };
        Ok(HostValue::Array(vec![HostValue::record([
            ("label", HostValue::from(label)),
            ("score", HostValue::Number(0.99)),
        ])]))
    }
}

/// Sleeps for `input` milliseconds, then appends `input` to a shared log
pub struct Recorder {
    pub log: Arc<Mutex<Vec<u64>>>,
}

#[async_trait]
impl TaskHandler for Recorder {
    fn task(&self) -> &str {
        "feature-extraction"
    }

    fn default_model(&self) -> &str {
        "Xenova/all-MiniLM-L6-v2"
    }

    async fn run(&self, request: TaskRequest) -> HostResult<HostValue> {
        let millis = request.input.as_f64().unwrap_or(0.0) as u64;
        tokio::time::sleep(Duration::from_millis(millis)).await;
        self.log.lock().push(millis);
        Ok(HostValue::Number(millis as f64))
    }
}

/// Fails the first `failures` fetches with a network error
pub struct FlakySource {
    inner: StaticSource,
    failures: AtomicUsize,
    pub calls: AtomicUsize,
}

impl FlakySource {
    pub fn new(inner: StaticSource, failures: usize) -> Self {
        Self {
            inner,
            failures: AtomicUsize::new(failures),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ArtifactSource for FlakySource {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn fetch(&self, locator: &ArtifactLocator) -> Result<LibraryManifest, LoadCause> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(LoadCause::Network("connection reset".to_string()));
        }
        self.inner.fetch(locator).await
    }
}

/// Counts fetches and takes a while to answer
pub struct SlowSource {
    inner: StaticSource,
    delay: Duration,
    pub calls: AtomicUsize,
}

impl SlowSource {
    pub fn new(inner: StaticSource, delay: Duration) -> Self {
        Self {
            inner,
            delay,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ArtifactSource for SlowSource {
    fn name(&self) -> &str {
        "slow"
    }

    async fn fetch(&self, locator: &ArtifactLocator) -> Result<LibraryManifest, LoadCause> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.inner.fetch(locator).await
    }
}

/// 16-bit PCM WAV file bytes; `samples` are interleaved
pub fn wav_pcm16(sample_rate: u32, channels: u16, samples: &[i16]) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = std::io::Cursor::new(Vec::new());
    let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
    for &sample in samples {
        writer.write_sample(sample).unwrap();
    }
    writer.finalize().unwrap();
    cursor.into_inner()
}
