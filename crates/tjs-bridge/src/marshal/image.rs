//! Pixel buffer conversions
//!
//! Guest images are `image::DynamicImage`. Only 8-bit gray, RGB and RGBA
//! map onto the host's channel counts; everything else is refused rather
//! than silently converted.

use image::{DynamicImage, GrayImage, ImageFormat, RgbImage, RgbaImage};
use std::fmt;
use std::io::Cursor;
use std::str::FromStr;

use crate::error::ConversionError;

/// Color mode names and their channel counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColorMode {
    /// "L", one channel
    Gray,
    /// "RGB", three channels
    Rgb,
    /// "RGBA", four channels
    Rgba,
}

impl ColorMode {
    pub fn channels(&self) -> usize {
        match self {
            ColorMode::Gray => 1,
            ColorMode::Rgb => 3,
            ColorMode::Rgba => 4,
        }
    }

    pub fn from_channels(channels: usize) -> Result<Self, ConversionError> {
        match channels {
            1 => Ok(ColorMode::Gray),
            3 => Ok(ColorMode::Rgb),
            4 => Ok(ColorMode::Rgba),
            other => Err(ConversionError::InvalidChannels(other)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ColorMode::Gray => "L",
            ColorMode::Rgb => "RGB",
            ColorMode::Rgba => "RGBA",
        }
    }
}

impl fmt::Display for ColorMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ColorMode {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "L" => Ok(ColorMode::Gray),
            "RGB" => Ok(ColorMode::Rgb),
            "RGBA" => Ok(ColorMode::Rgba),
            other => Err(ConversionError::UnsupportedColorMode(other.to_string())),
        }
    }
}

/// Split an image into pixels, width, height and mode
///
/// The color type must be exactly 8-bit L, RGB or RGBA.
pub fn image_to_parts(image: &DynamicImage) -> Result<(Vec<u8>, u32, u32, ColorMode), ConversionError> {
    let (width, height) = (image.width(), image.height());
    match image {
        DynamicImage::ImageLuma8(buf) => Ok((buf.as_raw().clone(), width, height, ColorMode::Gray)),
        DynamicImage::ImageRgb8(buf) => Ok((buf.as_raw().clone(), width, height, ColorMode::Rgb)),
        DynamicImage::ImageRgba8(buf) => Ok((buf.as_raw().clone(), width, height, ColorMode::Rgba)),
        other => Err(ConversionError::UnsupportedColorType(format!("{:?}", other.color()))),
    }
}

/// Build an image from row-major pixels
pub fn parts_to_image(
    data: Vec<u8>,
    width: u32,
    height: u32,
    mode: ColorMode,
) -> Result<DynamicImage, ConversionError> {
    let expected = width as usize * height as usize * mode.channels();
    let actual = data.len();
    let mismatch = || ConversionError::ShapeMismatch {
        shape: vec![height as usize, width as usize, mode.channels()],
        expected,
        actual,
    };
    let image = match mode {
        ColorMode::Gray => GrayImage::from_raw(width, height, data).map(DynamicImage::ImageLuma8),
        ColorMode::Rgb => RgbImage::from_raw(width, height, data).map(DynamicImage::ImageRgb8),
        ColorMode::Rgba => RgbaImage::from_raw(width, height, data).map(DynamicImage::ImageRgba8),
    };
    image.ok_or_else(mismatch)
}

/// Decode an encoded image the way the host library's reader does
///
/// Gray+alpha becomes RGBA and deeper channels are reduced to 8 bits.
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage, ConversionError> {
    let image = image::load_from_memory(bytes).map_err(|e| ConversionError::Codec(e.to_string()))?;
    Ok(match image {
        DynamicImage::ImageLuma8(_) | DynamicImage::ImageRgb8(_) | DynamicImage::ImageRgba8(_) => image,
        DynamicImage::ImageLuma16(_) => DynamicImage::ImageLuma8(image.to_luma8()),
        DynamicImage::ImageRgb16(_) | DynamicImage::ImageRgb32F(_) => {
            DynamicImage::ImageRgb8(image.to_rgb8())
        }
        _ => DynamicImage::ImageRgba8(image.to_rgba8()),
    })
}

pub fn encode_png(image: &DynamicImage) -> Result<Vec<u8>, ConversionError> {
    let mut out = Cursor::new(Vec::new());
    image
        .write_to(&mut out, ImageFormat::Png)
        .map_err(|e| ConversionError::Codec(e.to_string()))?;
    Ok(out.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, LumaA};

    #[test]
    fn test_mode_names_are_bijective() {
        for mode in [ColorMode::Gray, ColorMode::Rgb, ColorMode::Rgba] {
            assert_eq!(mode.as_str().parse::<ColorMode>().unwrap(), mode);
            assert_eq!(ColorMode::from_channels(mode.channels()).unwrap(), mode);
        }
        assert!("CMYK".parse::<ColorMode>().is_err());
    }

    #[test]
    fn test_exact_channel_match_only() {
        let la: ImageBuffer<LumaA<u8>, Vec<u8>> = ImageBuffer::new(2, 2);
        let err = image_to_parts(&DynamicImage::ImageLumaA8(la)).unwrap_err();
        assert!(matches!(err, ConversionError::UnsupportedColorType(_)));
    }

    #[test]
    fn test_png_round_trip_keeps_pixels() {
        let image = parts_to_image(vec![1, 2, 3, 4, 5, 6], 2, 1, ColorMode::Rgb).unwrap();
        let decoded = decode_image(&encode_png(&image).unwrap()).unwrap();
        let (data, w, h, mode) = image_to_parts(&decoded).unwrap();
        assert_eq!((data, w, h, mode), (vec![1, 2, 3, 4, 5, 6], 2, 1, ColorMode::Rgb));
    }

    #[test]
    fn test_parts_length_checked() {
        assert!(parts_to_image(vec![0; 3], 2, 1, ColorMode::Rgb).is_err());
    }
}
