//! In-process host runtime
//!
//! The objects a loaded library exposes: its module namespace, `env`,
//! tensors, raw images, pipelines, and the blob store and fetcher they
//! read resources through.

pub mod blob;
pub mod env;
pub mod fetch;
pub mod image;
pub mod library;
pub mod object;
pub mod pipeline;
pub mod tensor;

pub use blob::{BlobHandle, BlobStore};
pub use env::{EnvConfig, EnvValue};
pub use fetch::{DefaultFetcher, ResourceFetcher};
pub use image::{RawImage, RawImageClass};
pub use library::LibraryModule;
pub use object::{
    Capabilities, Capability, HostCallback, HostFuture, HostObject, HostRef, HostReturn, HostValue,
    IndexKey, NativeFunction, PlainObject,
};
pub use pipeline::{Pipeline, TaskHandler, TaskRegistry, TaskRequest, TaskServices};
pub use tensor::{Tensor, TensorClass};
