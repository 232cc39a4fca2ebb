//! Host raw images
//!
//! A [`RawImage`] is a row-major u8 pixel buffer with 1, 3 or 4 channels.
//! Channel conversions always allocate a new buffer.

use std::any::Any;
use std::sync::Arc;
use tracing::debug;

use super::fetch::ResourceFetcher;
use super::object::{Capabilities, Capability, HostObject, HostReturn, HostValue, arg};
use crate::error::{ConversionError, HostError, HostResult};
use crate::marshal::{ColorMode, TypedBuffer, decode_image, element_count, image_to_parts};

#[derive(Clone)]
pub struct RawImage {
    data: Arc<[u8]>,
    width: usize,
    height: usize,
    channels: usize,
}

impl RawImage {
    pub fn new(
        data: impl Into<Arc<[u8]>>,
        width: usize,
        height: usize,
        channels: usize,
    ) -> Result<Self, ConversionError> {
        let data = data.into();
        ColorMode::from_channels(channels)?;
        let expected = element_count(&[height, width, channels])?;
        if data.len() != expected {
            return Err(ConversionError::ShapeMismatch {
                shape: vec![height, width, channels],
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            data,
            width,
            height,
            channels,
        })
    }

    /// Decode an encoded image (PNG, JPEG, ...)
    pub fn decode(bytes: &[u8]) -> Result<Self, ConversionError> {
        let image = decode_image(bytes)?;
        let (data, width, height, mode) = image_to_parts(&image)?;
        Self::new(data, width as usize, height as usize, mode.channels())
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    fn pixels(&self) -> impl Iterator<Item = &[u8]> {
        self.data.chunks_exact(self.channels)
    }

    fn from_pixels(&self, data: Vec<u8>, channels: usize) -> RawImage {
        RawImage {
            data: data.into(),
            width: self.width,
            height: self.height,
            channels,
        }
    }

    pub fn grayscale(&self) -> RawImage {
        let data = match self.channels {
            1 => self.data.to_vec(),
            _ => self
                .pixels()
                .map(|px| {
                    let luma = 0.2989 * px[0] as f64 + 0.5870 * px[1] as f64 + 0.1140 * px[2] as f64;
                    luma.round().clamp(0.0, 255.0) as u8
                })
                .collect(),
        };
        self.from_pixels(data, 1)
    }

    pub fn rgb(&self) -> RawImage {
        let data = match self.channels {
            1 => self.data.iter().flat_map(|&g| [g, g, g]).collect(),
            3 => self.data.to_vec(),
            _ => self.pixels().flat_map(|px| [px[0], px[1], px[2]]).collect(),
        };
        self.from_pixels(data, 3)
    }

    pub fn rgba(&self) -> RawImage {
        let data = match self.channels {
            1 => self.data.iter().flat_map(|&g| [g, g, g, 255]).collect(),
            3 => self.pixels().flat_map(|px| [px[0], px[1], px[2], 255]).collect(),
            _ => self.data.to_vec(),
        };
        self.from_pixels(data, 4)
    }

    pub fn convert(&self, channels: usize) -> Result<RawImage, ConversionError> {
        match ColorMode::from_channels(channels)? {
            ColorMode::Gray => Ok(self.grayscale()),
            ColorMode::Rgb => Ok(self.rgb()),
            ColorMode::Rgba => Ok(self.rgba()),
        }
    }
}

impl HostObject for RawImage {
    fn class_name(&self) -> &str {
        "RawImage"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::of(&[Capability::Get])
    }

    fn get(&self, name: &str) -> HostResult<HostValue> {
        match name {
            "width" => Ok(HostValue::Number(self.width as f64)),
            "height" => Ok(HostValue::Number(self.height as f64)),
            "channels" => Ok(HostValue::Number(self.channels as f64)),
            "size" => Ok(HostValue::Array(vec![
                HostValue::Number(self.width as f64),
                HostValue::Number(self.height as f64),
            ])),
            "data" => Ok(HostValue::TypedArray(TypedBuffer::Uint8(self.data.clone()))),
            _ => Err(HostError::missing("RawImage", name)),
        }
    }

    fn keys(&self) -> Vec<String> {
        ["width", "height", "channels", "size", "data"]
            .iter()
            .map(|k| k.to_string())
            .collect()
    }

    fn invoke(&self, method: &str, args: Vec<HostValue>) -> HostResult<HostReturn> {
        let image = match method {
            "grayscale" => self.grayscale(),
            "rgb" => self.rgb(),
            "rgba" => self.rgba(),
            "convert" => {
                let channels = arg(&args, 0)
                    .as_f64()
                    .ok_or_else(|| HostError::type_error("convert expects a channel count"))?;
                self.convert(channels as usize)?
            }
            "clone" => self.from_pixels(self.data.to_vec(), self.channels),
            _ => return Err(HostError::missing("RawImage", method)),
        };
        Ok(HostReturn::Value(HostValue::object(image)))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// The `RawImage` class exported by the library
pub struct RawImageClass {
    fetcher: Arc<dyn ResourceFetcher>,
}

impl RawImageClass {
    pub fn new(fetcher: Arc<dyn ResourceFetcher>) -> Self {
        Self { fetcher }
    }

    fn load(&self, locator: String) -> HostReturn {
        let fetcher = self.fetcher.clone();
        HostReturn::deferred(async move {
            let bytes = fetcher.fetch(&locator).await?;
            let image = RawImage::decode(&bytes)?;
            debug!(
                locator = %locator,
                width = image.width,
                height = image.height,
                channels = image.channels,
                "Decoded raw image"
            );
            Ok(HostValue::object(image))
        })
    }

    fn pixel_data(data: &HostValue) -> HostResult<Arc<[u8]>> {
        match data {
            HostValue::TypedArray(TypedBuffer::Uint8(bytes)) => Ok(bytes.clone()),
            HostValue::TypedArray(buffer) => Ok(buffer
                .to_f64_vec()
                .into_iter()
                .map(|v| v as u8)
                .collect::<Vec<u8>>()
                .into()),
            HostValue::Array(_) => Ok(data
                .to_f64_vec()
                .ok_or_else(|| HostError::type_error("RawImage data must contain only numbers"))?
                .into_iter()
                .map(|v| v as u8)
                .collect::<Vec<u8>>()
                .into()),
            other => Err(HostError::type_error(format!(
                "RawImage data must be a Uint8Array, got {}",
                other.type_name()
            ))),
        }
    }
}

impl HostObject for RawImageClass {
    fn class_name(&self) -> &str {
        "RawImageConstructor"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::of(&[Capability::Get, Capability::Construct])
    }

    fn invoke(&self, method: &str, args: Vec<HostValue>) -> HostResult<HostReturn> {
        match method {
            "read" => match arg(&args, 0) {
                HostValue::Object(obj) if obj.as_any().is::<RawImage>() => {
                    Ok(HostReturn::Value(HostValue::Object(obj.clone())))
                }
                HostValue::String(locator) => Ok(self.load(locator.clone())),
                other => Err(HostError::type_error(format!(
                    "Unsupported input type: {}",
                    other.type_name()
                ))),
            },
            "fromURL" => match arg(&args, 0) {
                HostValue::String(url) => Ok(self.load(url.clone())),
                other => Err(HostError::type_error(format!(
                    "fromURL expects a string, got {}",
                    other.type_name()
                ))),
            },
            _ => Err(HostError::missing("RawImage", method)),
        }
    }

    fn construct(&self, args: Vec<HostValue>) -> HostResult<HostValue> {
        let data = Self::pixel_data(arg(&args, 0))?;
        let dim = |i: usize, name: &str| {
            arg(&args, i)
                .as_f64()
                .map(|v| v as usize)
                .ok_or_else(|| HostError::type_error(format!("RawImage {} must be a number", name)))
        };
        let image = RawImage::new(data, dim(1, "width")?, dim(2, "height")?, dim(3, "channels")?)?;
        Ok(HostValue::object(image))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
