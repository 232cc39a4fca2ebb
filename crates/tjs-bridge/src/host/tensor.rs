//! Host tensor objects
//!
//! A [`Tensor`] is a strided view over a shared [`TypedBuffer`]. Slicing
//! produces another view over the same block; nothing is copied until the
//! elements are read out through `data`, `tolist` or `item`.

use std::any::Any;

use super::object::{Capabilities, Capability, HostObject, HostReturn, HostValue, IndexKey, arg};
use crate::error::{ConversionError, HostError, HostResult};
use crate::marshal::{DType, TypedBuffer, element_count};

fn contiguous_strides(dims: &[usize]) -> Vec<usize> {
    let mut strides = vec![1; dims.len()];
    for axis in (0..dims.len().saturating_sub(1)).rev() {
        strides[axis] = strides[axis + 1] * dims[axis + 1];
    }
    strides
}

fn normalize_index(index: i64, dim: usize, axis: usize) -> HostResult<usize> {
    let resolved = if index < 0 { index + dim as i64 } else { index };
    if resolved < 0 || resolved >= dim as i64 {
        return Err(HostError::Range(format!(
            "index {} is out of bounds for dimension {} with size {}",
            index, axis, dim
        )));
    }
    Ok(resolved as usize)
}

/// Element at `offset`; 64-bit integers stay exact
fn element_value(data: &TypedBuffer, offset: usize) -> HostValue {
    let exact = match data {
        TypedBuffer::Int64(values) => values.get(offset).copied(),
        TypedBuffer::Uint64(values) => values.get(offset).and_then(|v| i64::try_from(*v).ok()),
        _ => None,
    };
    match exact {
        Some(n) => HostValue::BigInt(n),
        None => HostValue::Number(data.get_f64(offset).unwrap_or_default()),
    }
}

fn clamp_bound(bound: i64, dim: usize) -> usize {
    let resolved = if bound < 0 { bound + dim as i64 } else { bound };
    resolved.clamp(0, dim as i64) as usize
}

/// Strided tensor view
#[derive(Clone)]
pub struct Tensor {
    data: TypedBuffer,
    dims: Vec<usize>,
    strides: Vec<usize>,
    offset: usize,
}

impl Tensor {
    pub fn new(data: TypedBuffer, dims: Vec<usize>) -> Result<Self, ConversionError> {
        let expected = element_count(&dims)?;
        if expected != data.len() {
            return Err(ConversionError::ShapeMismatch {
                shape: dims,
                expected,
                actual: data.len(),
            });
        }
        let strides = contiguous_strides(&dims);
        Ok(Self {
            data,
            dims,
            strides,
            offset: 0,
        })
    }

    pub fn dtype(&self) -> DType {
        self.data.dtype()
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn ndim(&self) -> usize {
        self.dims.len()
    }

    /// Number of elements in the view
    pub fn size(&self) -> usize {
        self.dims.iter().product()
    }

    /// Whether this tensor covers only part of its storage, or covers it out of order
    pub fn is_view(&self) -> bool {
        self.offset != 0
            || self.size() != self.data.len()
            || self.strides != contiguous_strides(&self.dims)
    }

    /// Whether the storage is the given block
    pub fn shares_storage(&self, buffer: &TypedBuffer) -> bool {
        self.data.same_block(buffer)
    }

    fn element_offsets(&self) -> Vec<usize> {
        let size = self.size();
        let mut offsets = Vec::with_capacity(size);
        if size == 0 {
            return offsets;
        }

        let mut index = vec![0usize; self.dims.len()];
        loop {
            let flat: usize = index
                .iter()
                .zip(&self.strides)
                .map(|(i, stride)| i * stride)
                .sum();
            offsets.push(self.offset + flat);

            let mut axis = self.dims.len();
            loop {
                if axis == 0 {
                    return offsets;
                }
                axis -= 1;
                index[axis] += 1;
                if index[axis] < self.dims[axis] {
                    break;
                }
                index[axis] = 0;
            }
        }
    }

    /// Elements in row-major order; shares storage when the view is the whole block
    pub fn to_buffer(&self) -> TypedBuffer {
        if self.is_view() {
            self.data.gather(&self.element_offsets())
        } else {
            self.data.clone()
        }
    }

    /// View selected by an index or a tuple of per-axis indices
    ///
    /// Integers drop their axis, ranges keep it; unlisted trailing axes are
    /// kept whole.
    pub fn slice(&self, key: &IndexKey) -> HostResult<Tensor> {
        if self.dims.is_empty() {
            return Err(HostError::type_error(
                "cannot index a 0-dimensional tensor, read it with item()",
            ));
        }

        let keys = match key {
            IndexKey::Tuple(keys) => keys.as_slice(),
            single => std::slice::from_ref(single),
        };
        if keys.len() > self.dims.len() {
            return Err(HostError::Range(format!(
                "too many indices for tensor of dimension {}",
                self.dims.len()
            )));
        }

        let mut dims = Vec::with_capacity(self.dims.len());
        let mut strides = Vec::with_capacity(self.dims.len());
        let mut offset = self.offset;

        for (axis, key) in keys.iter().enumerate() {
            let dim = self.dims[axis];
            let stride = self.strides[axis];
            match key {
                IndexKey::Int(i) => {
                    offset += normalize_index(*i, dim, axis)? * stride;
                }
                IndexKey::Range { start, end } => {
                    let start = start.map_or(0, |s| clamp_bound(s, dim));
                    let end = end.map_or(dim, |e| clamp_bound(e, dim)).max(start);
                    offset += start * stride;
                    dims.push(end - start);
                    strides.push(stride);
                }
                other => {
                    return Err(HostError::type_error(format!(
                        "invalid tensor index [{}]",
                        other
                    )));
                }
            }
        }

        for axis in keys.len()..self.dims.len() {
            dims.push(self.dims[axis]);
            strides.push(self.strides[axis]);
        }

        Ok(Tensor {
            data: self.data.clone(),
            dims,
            strides,
            offset,
        })
    }

    /// The single element of a one-element tensor
    pub fn item(&self) -> HostResult<HostValue> {
        if self.size() != 1 {
            return Err(HostError::exception(format!(
                "a Tensor with {} elements cannot be converted to Scalar",
                self.size()
            )));
        }
        let offsets = self.element_offsets();
        Ok(element_value(&self.data, offsets[0]))
    }

    /// Nested arrays of numbers; a 0-d tensor yields a bare number
    pub fn to_list(&self) -> HostValue {
        self.nested(0, self.offset)
    }

    fn nested(&self, axis: usize, base: usize) -> HostValue {
        if axis == self.dims.len() {
            return element_value(&self.data, base);
        }
        HostValue::Array(
            (0..self.dims[axis])
                .map(|i| self.nested(axis + 1, base + i * self.strides[axis]))
                .collect(),
        )
    }

    fn dims_value(&self) -> HostValue {
        HostValue::Array(self.dims.iter().map(|d| HostValue::Number(*d as f64)).collect())
    }
}

fn slice_arg(value: &HostValue) -> HostResult<IndexKey> {
    match value {
        HostValue::Number(n) => Ok(IndexKey::Int(*n as i64)),
        HostValue::Null | HostValue::Undefined => Ok(IndexKey::full()),
        HostValue::Array(bounds) => {
            let bound = |i: usize| bounds.get(i).and_then(HostValue::as_f64).map(|n| n as i64);
            Ok(IndexKey::range(bound(0), bound(1)))
        }
        other => Err(HostError::type_error(format!(
            "invalid slice argument of type {}",
            other.type_name()
        ))),
    }
}

impl HostObject for Tensor {
    fn class_name(&self) -> &str {
        "Tensor"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::of(&[Capability::Get, Capability::Index, Capability::Iterate])
    }

    fn get(&self, name: &str) -> HostResult<HostValue> {
        match name {
            "dims" => Ok(self.dims_value()),
            "type" => Ok(HostValue::String(self.dtype().name().to_string())),
            "size" => Ok(HostValue::Number(self.size() as f64)),
            "data" => Ok(HostValue::TypedArray(self.to_buffer())),
            _ => Err(HostError::missing("Tensor", name)),
        }
    }

    fn keys(&self) -> Vec<String> {
        ["dims", "type", "size", "data"].iter().map(|k| k.to_string()).collect()
    }

    fn invoke(&self, method: &str, args: Vec<HostValue>) -> HostResult<HostReturn> {
        let value = match method {
            "tolist" => self.to_list(),
            "item" => self.item()?,
            "slice" => {
                let keys = args.iter().map(slice_arg).collect::<HostResult<Vec<_>>>()?;
                HostValue::object(self.slice(&IndexKey::Tuple(keys))?)
            }
            "clone" => {
                let copy = Tensor::new(self.to_buffer().deep_copy(), self.dims.clone())?;
                HostValue::object(copy)
            }
            _ => return Err(HostError::missing("Tensor", method)),
        };
        Ok(HostReturn::Value(value))
    }

    fn index(&self, key: &IndexKey) -> HostResult<HostValue> {
        Ok(HostValue::object(self.slice(key)?))
    }

    fn iterate(&self) -> HostResult<Vec<HostValue>> {
        let len = self.dims.first().copied().ok_or_else(|| {
            HostError::type_error("iteration over a 0-dimensional tensor")
        })?;
        (0..len as i64)
            .map(|i| self.slice(&IndexKey::Int(i)).map(HostValue::object))
            .collect()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// The `Tensor` constructor exported by the library
pub struct TensorClass;

impl TensorClass {
    fn buffer_for(dtype: DType, data: &HostValue) -> HostResult<TypedBuffer> {
        match data {
            HostValue::TypedArray(buffer) if buffer.dtype() == dtype => Ok(buffer.clone()),
            HostValue::TypedArray(buffer) => Ok(TypedBuffer::from_f64s(dtype, &buffer.to_f64_vec())),
            HostValue::Array(_) => {
                let values = data.to_f64_vec().ok_or_else(|| {
                    HostError::type_error("Tensor data must contain only numbers")
                })?;
                Ok(TypedBuffer::from_f64s(dtype, &values))
            }
            other => Err(HostError::type_error(format!(
                "Tensor data must be an array, got {}",
                other.type_name()
            ))),
        }
    }
}

impl HostObject for TensorClass {
    fn class_name(&self) -> &str {
        "TensorConstructor"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::of(&[Capability::Construct])
    }

    fn construct(&self, args: Vec<HostValue>) -> HostResult<HostValue> {
        if let Some(tensor) = arg(&args, 0).downcast::<Tensor>() {
            return Ok(HostValue::object(tensor.clone()));
        }

        let dtype: DType = arg(&args, 0)
            .as_str()
            .ok_or_else(|| HostError::type_error("Tensor expects (type, data, dims)"))?
            .parse()?;
        let buffer = Self::buffer_for(dtype, arg(&args, 1))?;
        let dims = match arg(&args, 2) {
            HostValue::Undefined => vec![buffer.len() as f64],
            other => other
                .to_f64_vec()
                .ok_or_else(|| HostError::type_error("Tensor dims must be an array of numbers"))?,
        };
        let dims = dims.into_iter().map(|d| d as usize).collect();

        Ok(HostValue::object(Tensor::new(buffer, dims)?))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
