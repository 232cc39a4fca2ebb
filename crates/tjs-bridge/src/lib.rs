//! tjs-bridge
//!
//! Drives objects of an embedded transformers.js-style host library
//! through guest-side handles:
//! - [`Proxy`] handles for host objects, released when the last clone drops
//! - deferred host results awaited as ordinary futures ([`Completion`], [`Deferred`])
//! - tensor and pixel-buffer marshalling ([`NdArray`], [`RawImageProxy`])
//! - several library versions loaded side by side, each with its own `env`
//!
//! ```rust,ignore
//! use tjs_bridge::{BridgeConfig, BridgeContext, GuestValue};
//!
//! let ctx = BridgeContext::new(BridgeConfig::default());
//! let tjs = ctx.resolve_instance(Some("2.4.2")).await?;
//! tjs.env().set("allowLocalModels", true)?;
//!
//! let classifier = tjs.pipeline("sentiment-analysis", None).await?;
//! let output = classifier.call(vec![GuestValue::from("I love it")])?.await?;
//! ```

pub mod bridge;
pub mod config;
pub mod context;
pub mod error;
pub mod host;
pub mod instance;
pub mod marshal;
pub mod proxy;
pub mod registry;

pub use bridge::{AsyncBridge, BridgeStats, Completion, Deferred};
pub use crate::config::BridgeConfig;
pub use context::{BridgeContext, BridgeContextBuilder, global_context, install_global};
pub use error::{
    BridgeError, BridgeResult, ConfigError, ConversionError, ForeignCallError, HostError,
    HostResult, LoadCause, LoadError, Operation,
};
pub use instance::{InstanceEvent, InstanceFactory, InstanceTable, ModuleInstance};
pub use marshal::{
    ColorMode, DType, GuestValue, NdArray, Sharing, TypedBuffer, as_url, is_url, read_audio,
};
pub use proxy::{
    ImageSource, LazyProxy, Proxy, ProxyKind, RawImageClassProxy, RawImageProxy, RefId,
    TensorProxy,
};
pub use registry::{
    ArtifactLocator, ArtifactSource, HttpSource, LibraryManifest, LibraryVersion, StaticSource,
    VersionKey, VersionRegistry,
};
