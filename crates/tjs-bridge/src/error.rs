//! Bridge error types
//!
//! Every failure that crosses the bridge lands in one of four kinds:
//! loading a library version, a host operation failing, a value that
//! cannot be mapped between runtimes, or an invalid environment write.
//! Host-side code reports [`HostError`], which the proxy layer maps into
//! this taxonomy without rewriting the host's text.

use std::fmt;
use thiserror::Error;

/// Why a library version could not be loaded
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadCause {
    #[error("version not found: {0}")]
    NotFound(String),
    #[error("network failure: {0}")]
    Network(String),
    #[error("malformed artifact: {0}")]
    Malformed(String),
    #[error("unsupported version: {0}")]
    Unsupported(String),
}

/// A library version could not be loaded; nothing was registered
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("failed to load host library '{key}': {cause}")]
pub struct LoadError {
    /// The key exactly as the caller supplied it
    pub key: String,
    pub cause: LoadCause,
}

impl LoadError {
    pub fn new(key: impl Into<String>, cause: LoadCause) -> Self {
        Self {
            key: key.into(),
            cause,
        }
    }
}

/// The guest-visible operation that was being performed on a host object
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Get(String),
    Set(String),
    Index(String),
    SetItem(String),
    Call,
    CallMethod(String),
    Construct,
    Iterate,
    Keys,
    Await,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Get(name) => write!(f, "get '{}'", name),
            Operation::Set(name) => write!(f, "set '{}'", name),
            Operation::Index(key) => write!(f, "index [{}]", key),
            Operation::SetItem(key) => write!(f, "set item [{}]", key),
            Operation::Call => write!(f, "call"),
            Operation::CallMethod(name) => write!(f, "call '{}'", name),
            Operation::Construct => write!(f, "construct"),
            Operation::Iterate => write!(f, "iterate"),
            Operation::Keys => write!(f, "keys"),
            Operation::Await => write!(f, "await"),
        }
    }
}

/// A host operation failed; `message` is the host's own description
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{operation} on {target} failed: {message}")]
pub struct ForeignCallError {
    pub operation: Operation,
    /// Class name (or member path) of the host object involved
    pub target: String,
    pub message: String,
}

impl ForeignCallError {
    pub fn new(operation: Operation, target: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            operation,
            target: target.into(),
            message: message.into(),
        }
    }
}

/// A value could not be mapped between guest and host representations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConversionError {
    #[error("unsupported dtype: {0}")]
    UnsupportedDType(String),

    #[error("unsupported color type: {0}")]
    UnsupportedColorType(String),

    #[error("unsupported color mode: {0}")]
    UnsupportedColorMode(String),

    #[error("invalid channel count {0}, expected 1, 3 or 4")]
    InvalidChannels(usize),

    #[error("buffer of {actual} elements does not match shape {shape:?} ({expected} elements)")]
    ShapeMismatch {
        shape: Vec<usize>,
        expected: usize,
        actual: usize,
    },

    #[error("element count of shape {0:?} overflows usize")]
    SizeOverflow(Vec<usize>),

    #[error("expected {expected}, got {actual}")]
    UnexpectedValue { expected: String, actual: String },

    #[error("cannot read '{path}': {reason}")]
    Read { path: String, reason: String },

    #[error("cannot write '{path}': {reason}")]
    Write { path: String, reason: String },

    #[error("image codec error: {0}")]
    Codec(String),

    #[error("audio decode error: {0}")]
    Audio(String),
}

impl ConversionError {
    pub fn unexpected(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        ConversionError::UnexpectedValue {
            expected: expected.into(),
            actual: actual.into(),
        }
    }
}

/// Invalid configuration: an environment flag write or a config source
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("env flag '{0}' is read-only")]
    ReadOnly(String),

    #[error("env flag '{flag}' holds a {expected} value, cannot assign a {actual}")]
    TypeMismatch {
        flag: String,
        expected: String,
        actual: String,
    },

    #[error("env flag '{flag}' only accepts primitive values, got {actual}")]
    NotPrimitive { flag: String, actual: String },

    #[error("unsupported config format: {0}")]
    UnsupportedFormat(String),

    #[error("config source error: {0}")]
    Source(String),
}

/// Failure raised inside the host runtime
///
/// The `Display` text is what the guest sees verbatim in
/// [`ForeignCallError::message`].
#[derive(Debug, Error)]
pub enum HostError {
    #[error("TypeError: {class}.{name} is not defined")]
    MissingMember { class: String, name: String },

    #[error("TypeError: {0}")]
    Type(String),

    #[error("RangeError: {0}")]
    Range(String),

    #[error("Error: {0}")]
    Exception(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Conversion(#[from] ConversionError),
}

impl HostError {
    pub fn missing(class: impl Into<String>, name: impl Into<String>) -> Self {
        HostError::MissingMember {
            class: class.into(),
            name: name.into(),
        }
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        HostError::Type(message.into())
    }

    pub fn exception(message: impl Into<String>) -> Self {
        HostError::Exception(message.into())
    }
}

/// Result type for host-side operations
pub type HostResult<T> = Result<T, HostError>;

/// Top-level bridge error
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    ForeignCall(#[from] ForeignCallError),

    #[error(transparent)]
    Conversion(#[from] ConversionError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl BridgeError {
    /// Map a host failure raised during `operation` on `target`
    pub fn from_host(operation: Operation, target: &str, err: HostError) -> Self {
        match err {
            HostError::Config(e) => BridgeError::Config(e),
            HostError::Conversion(e) => BridgeError::Conversion(e),
            other => BridgeError::ForeignCall(ForeignCallError::new(
                operation,
                target,
                other.to_string(),
            )),
        }
    }

    pub fn is_load(&self) -> bool {
        matches!(self, BridgeError::Load(_))
    }

    pub fn is_foreign_call(&self) -> bool {
        matches!(self, BridgeError::ForeignCall(_))
    }

    pub fn is_conversion(&self) -> bool {
        matches!(self, BridgeError::Conversion(_))
    }

    pub fn is_config(&self) -> bool {
        matches!(self, BridgeError::Config(_))
    }
}

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;
