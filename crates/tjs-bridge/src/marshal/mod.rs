//! Type marshalling
//!
//! Values cross the bridge by these rules:
//!
//! | guest                  | host                           |
//! |------------------------|--------------------------------|
//! | `None`                 | `undefined`                    |
//! | bool / int / float     | boolean / number               |
//! | string                 | string                         |
//! | bytes                  | `Uint8Array`                   |
//! | list / dict            | array / record (copied)        |
//! | [`NdArray`]            | `Tensor` (copied)              |
//! | `image::DynamicImage`  | blob URL string                |
//! | [`Proxy`]              | the object it refers to        |
//!
//! Going back, integral numbers become ints, typed arrays become 1-d
//! [`NdArray`]s and every host object is wrapped in a new [`Proxy`].

pub mod audio;
pub mod image;
pub mod ndarray;
pub mod url;

pub use self::audio::{WavData, decode_wav, read_audio};
pub use self::image::{ColorMode, decode_image, encode_png, image_to_parts, parts_to_image};
pub use self::ndarray::{DType, Element, NdArray, TypedBuffer, element_count};
pub use self::url::{UrlSource, as_url, is_url};
pub(crate) use self::url::image_url;

use ::image::DynamicImage;
use std::fmt;
use std::sync::Arc;

use crate::error::{BridgeResult, ConversionError};
use crate::host::{HostValue, Tensor};
use crate::instance::ModuleInstance;
use crate::proxy::Proxy;

/// How a guest array's storage is handed to a host tensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Sharing {
    /// The tensor gets its own copy
    #[default]
    Copy,
    /// The tensor views the array's block; a later guest write detaches
    /// the array through copy-on-write, leaving the tensor on the old data
    Alias,
}

/// Host tensor over a guest array
pub fn tensor_from_array(array: &NdArray, sharing: Sharing) -> Result<Tensor, ConversionError> {
    let buffer = match sharing {
        Sharing::Copy => array.buffer().deep_copy(),
        Sharing::Alias => array.buffer().clone(),
    };
    Tensor::new(buffer, array.shape().to_vec())
}

/// Guest array holding a tensor's elements in row-major order
pub fn array_from_tensor(tensor: &Tensor) -> Result<NdArray, ConversionError> {
    NdArray::from_buffer(tensor.to_buffer(), tensor.dims().to_vec())
}

/// Value on the guest side of the bridge
#[derive(Debug, Clone)]
pub enum GuestValue {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<GuestValue>),
    Dict(Vec<(String, GuestValue)>),
    Array(NdArray),
    Image(DynamicImage),
    Proxy(Proxy),
}

impl GuestValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            GuestValue::None => "None",
            GuestValue::Bool(_) => "bool",
            GuestValue::Int(_) => "int",
            GuestValue::Float(_) => "float",
            GuestValue::Str(_) => "str",
            GuestValue::Bytes(_) => "bytes",
            GuestValue::List(_) => "list",
            GuestValue::Dict(_) => "dict",
            GuestValue::Array(_) => "ndarray",
            GuestValue::Image(_) => "image",
            GuestValue::Proxy(_) => "proxy",
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, GuestValue::None)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            GuestValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            GuestValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Ints and floats alike
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            GuestValue::Int(i) => Some(*i as f64),
            GuestValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            GuestValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[GuestValue]> {
        match self {
            GuestValue::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&[(String, GuestValue)]> {
        match self {
            GuestValue::Dict(fields) => Some(fields),
            _ => None,
        }
    }

    /// Entry of a dict value
    pub fn get(&self, key: &str) -> Option<&GuestValue> {
        self.as_dict()?
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    pub fn as_array(&self) -> Option<&NdArray> {
        match self {
            GuestValue::Array(array) => Some(array),
            _ => None,
        }
    }

    pub fn as_proxy(&self) -> Option<&Proxy> {
        match self {
            GuestValue::Proxy(proxy) => Some(proxy),
            _ => None,
        }
    }

    /// Numbers of a list or 1-d array
    pub fn to_f64_vec(&self) -> Option<Vec<f64>> {
        match self {
            GuestValue::List(items) => items.iter().map(GuestValue::as_f64).collect(),
            GuestValue::Array(array) => Some(array.to_f64_vec()),
            _ => None,
        }
    }

    pub fn into_proxy(self) -> Result<Proxy, ConversionError> {
        match self {
            GuestValue::Proxy(proxy) => Ok(proxy),
            other => Err(ConversionError::unexpected("a host object", other.type_name())),
        }
    }

    pub fn into_array(self) -> Result<NdArray, ConversionError> {
        match self {
            GuestValue::Array(array) => Ok(array),
            other => Err(ConversionError::unexpected("an ndarray", other.type_name())),
        }
    }

    pub fn dict<K: Into<String>>(fields: impl IntoIterator<Item = (K, GuestValue)>) -> Self {
        GuestValue::Dict(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

impl fmt::Display for GuestValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GuestValue::None => write!(f, "None"),
            GuestValue::Bool(b) => write!(f, "{}", if *b { "True" } else { "False" }),
            GuestValue::Int(i) => write!(f, "{}", i),
            GuestValue::Float(x) => write!(f, "{}", x),
            GuestValue::Str(s) => write!(f, "{:?}", s),
            GuestValue::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            GuestValue::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            GuestValue::Dict(fields) => {
                write!(f, "{{")?;
                for (i, (k, v)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{:?}: {}", k, v)?;
                }
                write!(f, "}}")
            }
            GuestValue::Array(array) => write!(f, "{:?}", array),
            GuestValue::Image(image) => write!(f, "<image {}x{}>", image.width(), image.height()),
            GuestValue::Proxy(proxy) => write!(f, "{}", proxy),
        }
    }
}

impl From<bool> for GuestValue {
    fn from(v: bool) -> Self {
        GuestValue::Bool(v)
    }
}

impl From<i64> for GuestValue {
    fn from(v: i64) -> Self {
        GuestValue::Int(v)
    }
}

impl From<i32> for GuestValue {
    fn from(v: i32) -> Self {
        GuestValue::Int(v as i64)
    }
}

impl From<usize> for GuestValue {
    fn from(v: usize) -> Self {
        GuestValue::Int(v as i64)
    }
}

impl From<f64> for GuestValue {
    fn from(v: f64) -> Self {
        GuestValue::Float(v)
    }
}

impl From<f32> for GuestValue {
    fn from(v: f32) -> Self {
        GuestValue::Float(v as f64)
    }
}

impl From<&str> for GuestValue {
    fn from(v: &str) -> Self {
        GuestValue::Str(v.to_string())
    }
}

impl From<String> for GuestValue {
    fn from(v: String) -> Self {
        GuestValue::Str(v)
    }
}

impl From<Vec<GuestValue>> for GuestValue {
    fn from(v: Vec<GuestValue>) -> Self {
        GuestValue::List(v)
    }
}

impl From<NdArray> for GuestValue {
    fn from(v: NdArray) -> Self {
        GuestValue::Array(v)
    }
}

impl From<DynamicImage> for GuestValue {
    fn from(v: DynamicImage) -> Self {
        GuestValue::Image(v)
    }
}

impl From<Proxy> for GuestValue {
    fn from(v: Proxy) -> Self {
        GuestValue::Proxy(v)
    }
}

impl<T: Into<GuestValue>> From<Option<T>> for GuestValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(GuestValue::None, Into::into)
    }
}

const MAX_SAFE_INTEGER: f64 = 9007199254740991.0;

/// Converts values for one module instance
pub(crate) struct Marshaller<'a> {
    instance: &'a Arc<ModuleInstance>,
}

impl<'a> Marshaller<'a> {
    pub(crate) fn new(instance: &'a Arc<ModuleInstance>) -> Self {
        Self { instance }
    }

    pub(crate) fn to_host(&self, value: GuestValue) -> BridgeResult<HostValue> {
        Ok(match value {
            GuestValue::None => HostValue::Undefined,
            GuestValue::Bool(b) => HostValue::Bool(b),
            GuestValue::Int(i) if i.unsigned_abs() <= MAX_SAFE_INTEGER as u64 => HostValue::Number(i as f64),
            GuestValue::Int(i) => HostValue::BigInt(i),
            GuestValue::Float(f) => HostValue::Number(f),
            GuestValue::Str(s) => HostValue::String(s),
            GuestValue::Bytes(bytes) => HostValue::TypedArray(TypedBuffer::from_vec(bytes)),
            GuestValue::List(items) => HostValue::Array(
                items
                    .into_iter()
                    .map(|item| self.to_host(item))
                    .collect::<BridgeResult<_>>()?,
            ),
            GuestValue::Dict(fields) => HostValue::Record(
                fields
                    .into_iter()
                    .map(|(k, v)| -> BridgeResult<(String, HostValue)> { Ok((k, self.to_host(v)?)) })
                    .collect::<BridgeResult<_>>()?,
            ),
            GuestValue::Array(array) => {
                HostValue::object(tensor_from_array(&array, Sharing::Copy)?)
            }
            GuestValue::Image(image) => {
                HostValue::String(image_url(self.instance.blobs(), &image)?.into_url())
            }
            GuestValue::Proxy(proxy) => HostValue::Object(proxy.host_object()?),
        })
    }

    pub(crate) fn to_host_all(&self, values: Vec<GuestValue>) -> BridgeResult<Vec<HostValue>> {
        values.into_iter().map(|v| self.to_host(v)).collect()
    }

    pub(crate) fn from_host(&self, value: HostValue) -> GuestValue {
        match value {
            HostValue::Undefined | HostValue::Null => GuestValue::None,
            HostValue::Bool(b) => GuestValue::Bool(b),
            HostValue::Number(n) if n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER => {
                GuestValue::Int(n as i64)
            }
            HostValue::Number(n) => GuestValue::Float(n),
            HostValue::BigInt(n) => GuestValue::Int(n),
            HostValue::String(s) => GuestValue::Str(s),
            HostValue::Array(items) => {
                GuestValue::List(items.into_iter().map(|v| self.from_host(v)).collect())
            }
            HostValue::Record(fields) => GuestValue::Dict(
                fields
                    .into_iter()
                    .map(|(k, v)| (k, self.from_host(v)))
                    .collect(),
            ),
            HostValue::TypedArray(buffer) => GuestValue::Array(NdArray::vector_from(buffer)),
            HostValue::Object(object) => GuestValue::Proxy(Proxy::wrap(self.instance, object)),
        }
    }
}
