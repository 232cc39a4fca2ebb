//! Typed numeric buffers
//!
//! [`TypedBuffer`] is the shared storage behind both host tensors and the
//! guest-native [`NdArray`]. Each variant owns an `Arc<[T]>`, so cloning
//! a buffer aliases the same block; copies only happen on request or on
//! copy-on-write through [`NdArray::data_mut`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::ConversionError;

/// Element types supported on both sides of the bridge
///
/// Names follow the host library's tensor `type` strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    Int8,
    Uint8,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Int64,
    Uint64,
    Float32,
    Float64,
}

impl DType {
    pub const ALL: [DType; 10] = [
        DType::Int8,
        DType::Uint8,
        DType::Int16,
        DType::Uint16,
        DType::Int32,
        DType::Uint32,
        DType::Int64,
        DType::Uint64,
        DType::Float32,
        DType::Float64,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            DType::Int8 => "int8",
            DType::Uint8 => "uint8",
            DType::Int16 => "int16",
            DType::Uint16 => "uint16",
            DType::Int32 => "int32",
            DType::Uint32 => "uint32",
            DType::Int64 => "int64",
            DType::Uint64 => "uint64",
            DType::Float32 => "float32",
            DType::Float64 => "float64",
        }
    }

    /// Size of one element in bytes
    pub fn size_of(&self) -> usize {
        match self {
            DType::Int8 | DType::Uint8 => 1,
            DType::Int16 | DType::Uint16 => 2,
            DType::Int32 | DType::Uint32 | DType::Float32 => 4,
            DType::Int64 | DType::Uint64 | DType::Float64 => 8,
        }
    }

    pub fn is_float(&self) -> bool {
        matches!(self, DType::Float32 | DType::Float64)
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DType {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DType::ALL
            .iter()
            .copied()
            .find(|dtype| dtype.name() == s)
            .ok_or_else(|| ConversionError::UnsupportedDType(s.to_string()))
    }
}

/// A primitive that can live in a [`TypedBuffer`]
pub trait Element: bytemuck::Pod + PartialEq + fmt::Debug + Send + Sync + 'static {
    const DTYPE: DType;

    fn wrap(data: Arc<[Self]>) -> TypedBuffer;
    fn view(buffer: &TypedBuffer) -> Option<&Arc<[Self]>>;
    fn view_mut(buffer: &mut TypedBuffer) -> Option<&mut Arc<[Self]>>;
    fn to_f64(self) -> f64;
    fn from_f64(value: f64) -> Self;
}

/// Shared, immutable block of typed elements
#[derive(Clone, PartialEq)]
pub enum TypedBuffer {
    Int8(Arc<[i8]>),
    Uint8(Arc<[u8]>),
    Int16(Arc<[i16]>),
    Uint16(Arc<[u16]>),
    Int32(Arc<[i32]>),
    Uint32(Arc<[u32]>),
    Int64(Arc<[i64]>),
    Uint64(Arc<[u64]>),
    Float32(Arc<[f32]>),
    Float64(Arc<[f64]>),
}

macro_rules! impl_element {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl Element for $ty {
                const DTYPE: DType = DType::$variant;

                fn wrap(data: Arc<[Self]>) -> TypedBuffer {
                    TypedBuffer::$variant(data)
                }

                fn view(buffer: &TypedBuffer) -> Option<&Arc<[Self]>> {
                    match buffer {
                        TypedBuffer::$variant(data) => Some(data),
                        _ => None,
                    }
                }

                fn view_mut(buffer: &mut TypedBuffer) -> Option<&mut Arc<[Self]>> {
                    match buffer {
                        TypedBuffer::$variant(data) => Some(data),
                        _ => None,
                    }
                }

                fn to_f64(self) -> f64 {
                    self as f64
                }

                fn from_f64(value: f64) -> Self {
                    value as $ty
                }
            }
        )*
    };
}

impl_element!(
    i8 => Int8,
    u8 => Uint8,
    i16 => Int16,
    u16 => Uint16,
    i32 => Int32,
    u32 => Uint32,
    i64 => Int64,
    u64 => Uint64,
    f32 => Float32,
    f64 => Float64,
);

macro_rules! dispatch {
    ($buffer:expr, $data:ident => $body:expr) => {
        match $buffer {
            TypedBuffer::Int8($data) => $body,
            TypedBuffer::Uint8($data) => $body,
            TypedBuffer::Int16($data) => $body,
            TypedBuffer::Uint16($data) => $body,
            TypedBuffer::Int32($data) => $body,
            TypedBuffer::Uint32($data) => $body,
            TypedBuffer::Int64($data) => $body,
            TypedBuffer::Uint64($data) => $body,
            TypedBuffer::Float32($data) => $body,
            TypedBuffer::Float64($data) => $body,
        }
    };
}

macro_rules! with_dtype {
    ($dtype:expr, $t:ident => $body:expr) => {
        match $dtype {
            DType::Int8 => {
                type $t = i8;
                $body
            }
            DType::Uint8 => {
                type $t = u8;
                $body
            }
            DType::Int16 => {
                type $t = i16;
                $body
            }
            DType::Uint16 => {
                type $t = u16;
                $body
            }
            DType::Int32 => {
                type $t = i32;
                $body
            }
            DType::Uint32 => {
                type $t = u32;
                $body
            }
            DType::Int64 => {
                type $t = i64;
                $body
            }
            DType::Uint64 => {
                type $t = u64;
                $body
            }
            DType::Float32 => {
                type $t = f32;
                $body
            }
            DType::Float64 => {
                type $t = f64;
                $body
            }
        }
    };
}

fn dtype_of<T: Element>(_: &Arc<[T]>) -> DType {
    T::DTYPE
}

fn gather_from<T: Element>(data: &Arc<[T]>, offsets: &[usize]) -> TypedBuffer {
    T::wrap(offsets.iter().map(|&i| data[i]).collect::<Vec<T>>().into())
}

fn detach<T: Element>(data: &Arc<[T]>) -> TypedBuffer {
    T::wrap(Arc::from(data.to_vec()))
}

fn same_block<T: Element>(data: &Arc<[T]>, other: &TypedBuffer) -> bool {
    T::view(other).is_some_and(|o| Arc::ptr_eq(data, o))
}

fn read_unaligned<T: Element>(bytes: &[u8]) -> Result<TypedBuffer, ConversionError> {
    let size = std::mem::size_of::<T>();
    if bytes.len() % size != 0 {
        return Err(ConversionError::unexpected(
            format!("a multiple of {} bytes for {}", size, T::DTYPE),
            format!("{} bytes", bytes.len()),
        ));
    }
    let values: Vec<T> = bytes
        .chunks_exact(size)
        .map(bytemuck::pod_read_unaligned::<T>)
        .collect();
    Ok(T::wrap(values.into()))
}

impl TypedBuffer {
    pub fn from_vec<T: Element>(values: Vec<T>) -> Self {
        T::wrap(values.into())
    }

    /// Build a buffer of `dtype` from numbers, casting like a typed-array store
    pub fn from_f64s(dtype: DType, values: &[f64]) -> Self {
        with_dtype!(dtype, T => T::wrap(
            values
                .iter()
                .map(|v| <T as Element>::from_f64(*v))
                .collect::<Vec<T>>()
                .into()
        ))
    }

    /// Reinterpret little-endian bytes as elements of `dtype`
    pub fn from_bytes(dtype: DType, bytes: &[u8]) -> Result<Self, ConversionError> {
        with_dtype!(dtype, T => read_unaligned::<T>(bytes))
    }

    pub fn dtype(&self) -> DType {
        dispatch!(self, data => dtype_of(data))
    }

    pub fn len(&self) -> usize {
        dispatch!(self, data => data.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Raw byte view of the elements
    pub fn as_bytes(&self) -> &[u8] {
        dispatch!(self, data => bytemuck::cast_slice(&data[..]))
    }

    pub fn as_slice<T: Element>(&self) -> Option<&[T]> {
        T::view(self).map(|data| &data[..])
    }

    pub fn get_f64(&self, index: usize) -> Option<f64> {
        dispatch!(self, data => data.get(index).map(|v| Element::to_f64(*v)))
    }

    pub fn to_f64_vec(&self) -> Vec<f64> {
        dispatch!(self, data => data.iter().map(|v| Element::to_f64(*v)).collect())
    }

    /// New buffer holding the elements at `offsets`, in order
    ///
    /// Offsets must be in bounds.
    pub fn gather(&self, offsets: &[usize]) -> TypedBuffer {
        dispatch!(self, data => gather_from(data, offsets))
    }

    /// Copy into a freshly allocated block
    pub fn deep_copy(&self) -> TypedBuffer {
        dispatch!(self, data => detach(data))
    }

    /// Whether both buffers are the same allocation
    pub fn same_block(&self, other: &TypedBuffer) -> bool {
        dispatch!(self, data => same_block(data, other))
    }
}

impl fmt::Debug for TypedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypedBuffer({}, len={})", self.dtype(), self.len())
    }
}

/// Number of elements in `shape`
///
/// Fails when the product of the non-zero dimensions overflows, even if a
/// zero dimension makes the whole shape empty, so that strides over the
/// shape stay representable.
pub fn element_count(shape: &[usize]) -> Result<usize, ConversionError> {
    let nonzero = shape
        .iter()
        .filter(|&&dim| dim != 0)
        .try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
        .ok_or_else(|| ConversionError::SizeOverflow(shape.to_vec()))?;
    Ok(if shape.contains(&0) { 0 } else { nonzero })
}

/// Guest-native n-dimensional numeric array
///
/// An empty shape is a 0-d scalar holding exactly one element, which is
/// not the same thing as shape `[1]`.
#[derive(Clone, PartialEq)]
pub struct NdArray {
    data: TypedBuffer,
    shape: Vec<usize>,
}

impl NdArray {
    pub fn from_buffer(data: TypedBuffer, shape: Vec<usize>) -> Result<Self, ConversionError> {
        let expected = element_count(&shape)?;
        if expected != data.len() {
            return Err(ConversionError::ShapeMismatch {
                shape,
                expected,
                actual: data.len(),
            });
        }
        Ok(Self { data, shape })
    }

    pub fn from_vec<T: Element>(values: Vec<T>, shape: Vec<usize>) -> Result<Self, ConversionError> {
        Self::from_buffer(TypedBuffer::from_vec(values), shape)
    }

    pub fn from_f64s(dtype: DType, values: &[f64], shape: Vec<usize>) -> Result<Self, ConversionError> {
        Self::from_buffer(TypedBuffer::from_f64s(dtype, values), shape)
    }

    pub fn scalar<T: Element>(value: T) -> Self {
        Self {
            data: TypedBuffer::from_vec(vec![value]),
            shape: Vec::new(),
        }
    }

    pub fn vector<T: Element>(values: Vec<T>) -> Self {
        let len = values.len();
        Self {
            data: TypedBuffer::from_vec(values),
            shape: vec![len],
        }
    }

    /// 1-d array over an existing block
    pub fn vector_from(data: TypedBuffer) -> Self {
        let len = data.len();
        Self {
            data,
            shape: vec![len],
        }
    }

    pub fn dtype(&self) -> DType {
        self.data.dtype()
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn buffer(&self) -> &TypedBuffer {
        &self.data
    }

    pub fn into_buffer(self) -> TypedBuffer {
        self.data
    }

    pub fn reshape(self, shape: Vec<usize>) -> Result<Self, ConversionError> {
        Self::from_buffer(self.data, shape)
    }

    pub fn as_slice<T: Element>(&self) -> Option<&[T]> {
        self.data.as_slice()
    }

    pub fn to_f64_vec(&self) -> Vec<f64> {
        self.data.to_f64_vec()
    }

    /// Value of a 0-d array; `None` for any other shape
    pub fn as_scalar(&self) -> Option<f64> {
        if self.shape.is_empty() {
            self.data.get_f64(0)
        } else {
            None
        }
    }

    /// Element at a row-major multi-index
    pub fn get(&self, index: &[usize]) -> Option<f64> {
        if index.len() != self.shape.len() {
            return None;
        }
        let mut offset = 0;
        for (&i, &dim) in index.iter().zip(&self.shape) {
            if i >= dim {
                return None;
            }
            offset = offset * dim + i;
        }
        self.data.get_f64(offset)
    }

    /// Mutable access to the elements
    ///
    /// If the block is shared (for example aliased by a host tensor) it is
    /// copied first, so the alias keeps seeing the old values.
    pub fn data_mut<T: Element>(&mut self) -> Option<&mut [T]> {
        let block = T::view_mut(&mut self.data)?;
        if Arc::get_mut(block).is_none() {
            *block = Arc::from(block.to_vec());
        }
        Arc::get_mut(block)
    }
}

impl fmt::Debug for NdArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NdArray({}, shape={:?})", self.dtype(), self.shape)
    }
}
