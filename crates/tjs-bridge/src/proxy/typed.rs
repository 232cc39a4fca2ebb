//! Typed wrappers over [`Proxy`]
//!
//! Tensors and raw images get native conversions on top of the generic
//! proxy operations. Every accessor still reads through to the host.

use image::DynamicImage;
use std::path::{Path, PathBuf};

use super::{Proxy, ProxyKind};
use crate::bridge::Completion;
use crate::error::{BridgeResult, ConversionError, ForeignCallError, Operation};
use crate::host::IndexKey;
use crate::marshal::{ColorMode, DType, GuestValue, NdArray, as_url, image_to_parts, is_url, parts_to_image};

fn expect_kind(proxy: &Proxy, kind: ProxyKind, expected: &str) -> BridgeResult<()> {
    if proxy.kind() == kind {
        Ok(())
    } else {
        Err(ConversionError::unexpected(expected, proxy.class_name()).into())
    }
}

/// Value of a call that must not be deferred
fn sync_value(proxy: &Proxy, method: &str, completion: Completion) -> BridgeResult<GuestValue> {
    completion.ready().ok_or_else(|| {
        ForeignCallError::new(
            Operation::CallMethod(method.to_string()),
            proxy.class_name(),
            "expected an immediate result",
        )
        .into()
    })
}

fn usize_member(proxy: &Proxy, name: &str) -> BridgeResult<usize> {
    let value = proxy.get(name)?;
    value
        .as_i64()
        .and_then(|v| usize::try_from(v).ok())
        .ok_or_else(|| ConversionError::unexpected(format!("{} as a count", name), value.type_name()).into())
}

/// Proxy to a host `Tensor`
#[derive(Debug, Clone)]
pub struct TensorProxy(Proxy);

impl TensorProxy {
    pub fn new(proxy: Proxy) -> BridgeResult<Self> {
        expect_kind(&proxy, ProxyKind::Tensor, "a Tensor")?;
        Ok(Self(proxy))
    }

    pub fn proxy(&self) -> &Proxy {
        &self.0
    }

    pub fn into_proxy(self) -> Proxy {
        self.0
    }

    pub fn dims(&self) -> BridgeResult<Vec<usize>> {
        let value = self.0.get("dims")?;
        value
            .as_list()
            .and_then(|dims| {
                dims.iter()
                    .map(|d| d.as_i64().and_then(|d| usize::try_from(d).ok()))
                    .collect::<Option<Vec<_>>>()
            })
            .ok_or_else(|| ConversionError::unexpected("a list of dimensions", value.type_name()).into())
    }

    pub fn dtype(&self) -> BridgeResult<DType> {
        let value = self.0.get("type")?;
        let name = value
            .as_str()
            .ok_or_else(|| ConversionError::unexpected("a dtype name", value.type_name()))?;
        Ok(name.parse()?)
    }

    pub fn size(&self) -> BridgeResult<usize> {
        usize_member(&self.0, "size")
    }

    /// Sub-tensor; ints drop an axis, ranges keep it
    ///
    /// Open range bounds are filled in from the tensor's dims by the host.
    pub fn index(&self, key: impl Into<IndexKey>) -> BridgeResult<TensorProxy> {
        TensorProxy::new(self.0.index(key)?.into_proxy()?)
    }

    /// The single element of the tensor
    pub fn item(&self) -> BridgeResult<f64> {
        let value = sync_value(&self.0, "item", self.0.call_method("item", Vec::new())?)?;
        value
            .as_f64()
            .ok_or_else(|| ConversionError::unexpected("a number", value.type_name()).into())
    }

    /// The single element as an exact integer
    pub fn item_i64(&self) -> BridgeResult<i64> {
        let value = sync_value(&self.0, "item", self.0.call_method("item", Vec::new())?)?;
        value
            .as_i64()
            .ok_or_else(|| ConversionError::unexpected("an integer", value.type_name()).into())
    }

    /// Nested lists of numbers
    pub fn tolist(&self) -> BridgeResult<GuestValue> {
        sync_value(&self.0, "tolist", self.0.call_method("tolist", Vec::new())?)
    }

    /// Copy into a native array with the tensor's dtype and shape
    pub fn to_native_array(&self) -> BridgeResult<NdArray> {
        let dims = self.dims()?;
        let data = self.0.get("data")?.into_array()?;
        Ok(data.reshape(dims)?)
    }
}

impl TryFrom<Proxy> for TensorProxy {
    type Error = crate::error::BridgeError;

    fn try_from(proxy: Proxy) -> BridgeResult<Self> {
        TensorProxy::new(proxy)
    }
}

/// Proxy to a host `RawImage`
#[derive(Debug, Clone)]
pub struct RawImageProxy(Proxy);

impl RawImageProxy {
    pub fn new(proxy: Proxy) -> BridgeResult<Self> {
        expect_kind(&proxy, ProxyKind::RawImage, "a RawImage")?;
        Ok(Self(proxy))
    }

    pub fn proxy(&self) -> &Proxy {
        &self.0
    }

    pub fn into_proxy(self) -> Proxy {
        self.0
    }

    pub fn width(&self) -> BridgeResult<usize> {
        usize_member(&self.0, "width")
    }

    pub fn height(&self) -> BridgeResult<usize> {
        usize_member(&self.0, "height")
    }

    pub fn channels(&self) -> BridgeResult<usize> {
        usize_member(&self.0, "channels")
    }

    pub fn mode(&self) -> BridgeResult<ColorMode> {
        Ok(ColorMode::from_channels(self.channels()?)?)
    }

    fn converted(&self, method: &str) -> BridgeResult<RawImageProxy> {
        let value = sync_value(&self.0, method, self.0.call_method(method, Vec::new())?)?;
        RawImageProxy::new(value.into_proxy()?)
    }

    pub fn grayscale(&self) -> BridgeResult<RawImageProxy> {
        self.converted("grayscale")
    }

    pub fn rgb(&self) -> BridgeResult<RawImageProxy> {
        self.converted("rgb")
    }

    pub fn rgba(&self) -> BridgeResult<RawImageProxy> {
        self.converted("rgba")
    }

    /// u8 array of shape `[height, width, channels]`
    pub fn to_native_array(&self) -> BridgeResult<NdArray> {
        let shape = vec![self.height()?, self.width()?, self.channels()?];
        let data = self.0.get("data")?.into_array()?;
        Ok(data.reshape(shape)?)
    }

    /// Single-channel images come back as 8-bit grayscale
    pub fn to_native_image(&self) -> BridgeResult<DynamicImage> {
        let width = self.width()?;
        let height = self.height()?;
        let mode = self.mode()?;
        let data = self.0.get("data")?.into_array()?;
        let pixels = data
            .as_slice::<u8>()
            .ok_or_else(|| ConversionError::unexpected("uint8 pixel data", data.dtype().name()))?
            .to_vec();
        Ok(parts_to_image(pixels, width as u32, height as u32, mode)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> BridgeResult<()> {
        let path = path.as_ref();
        let image = self.to_native_image()?;
        image.save(path).map_err(|e| ConversionError::Write {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Ok(())
    }
}

impl TryFrom<Proxy> for RawImageProxy {
    type Error = crate::error::BridgeError;

    fn try_from(proxy: Proxy) -> BridgeResult<Self> {
        RawImageProxy::new(proxy)
    }
}

/// What `RawImage.read` accepts
#[derive(Debug, Clone)]
pub enum ImageSource {
    /// Passed through unchanged
    Raw(RawImageProxy),
    /// Absolute URL of any scheme
    Url(String),
    /// Local file, staged in the blob store first
    Path(PathBuf),
    /// Encoded to PNG and staged in the blob store
    Image(DynamicImage),
}

impl From<&str> for ImageSource {
    fn from(input: &str) -> Self {
        if is_url(input) {
            ImageSource::Url(input.to_string())
        } else {
            ImageSource::Path(PathBuf::from(input))
        }
    }
}

impl From<String> for ImageSource {
    fn from(input: String) -> Self {
        ImageSource::from(input.as_str())
    }
}

impl From<&Path> for ImageSource {
    fn from(path: &Path) -> Self {
        ImageSource::Path(path.to_path_buf())
    }
}

impl From<PathBuf> for ImageSource {
    fn from(path: PathBuf) -> Self {
        ImageSource::Path(path)
    }
}

impl From<RawImageProxy> for ImageSource {
    fn from(image: RawImageProxy) -> Self {
        ImageSource::Raw(image)
    }
}

impl From<&RawImageProxy> for ImageSource {
    fn from(image: &RawImageProxy) -> Self {
        ImageSource::Raw(image.clone())
    }
}

impl From<DynamicImage> for ImageSource {
    fn from(image: DynamicImage) -> Self {
        ImageSource::Image(image)
    }
}

/// Proxy to the host `RawImage` class
#[derive(Debug, Clone)]
pub struct RawImageClassProxy(Proxy);

impl RawImageClassProxy {
    pub fn new(proxy: Proxy) -> BridgeResult<Self> {
        expect_kind(&proxy, ProxyKind::RawImageClass, "the RawImage class")?;
        Ok(Self(proxy))
    }

    pub fn proxy(&self) -> &Proxy {
        &self.0
    }

    /// `new RawImage(data, width, height, channels)`
    pub fn create(
        &self,
        data: Vec<u8>,
        width: usize,
        height: usize,
        channels: usize,
    ) -> BridgeResult<RawImageProxy> {
        let value = self.0.construct(vec![
            GuestValue::Bytes(data),
            GuestValue::from(width),
            GuestValue::from(height),
            GuestValue::from(channels),
        ])?;
        RawImageProxy::new(value.into_proxy()?)
    }

    pub async fn read(&self, input: impl Into<ImageSource>) -> BridgeResult<RawImageProxy> {
        let arg = match input.into() {
            ImageSource::Raw(image) => GuestValue::Proxy(image.into_proxy()),
            ImageSource::Url(url) => GuestValue::Str(url),
            ImageSource::Path(path) => {
                let handle = as_url(self.0.instance().blobs(), path).await?;
                GuestValue::Str(handle.into_url())
            }
            ImageSource::Image(image) => GuestValue::Image(image),
        };
        let value = self.0.call_method("read", vec![arg])?.await?;
        RawImageProxy::new(value.into_proxy()?)
    }

    pub async fn from_url(&self, url: &str) -> BridgeResult<RawImageProxy> {
        let value = self
            .0
            .call_method("fromURL", vec![GuestValue::from(url)])?
            .await?;
        RawImageProxy::new(value.into_proxy()?)
    }

    /// Host image holding the pixels of a native image
    pub fn from_native_image(&self, image: &DynamicImage) -> BridgeResult<RawImageProxy> {
        let (data, width, height, mode) = image_to_parts(image)?;
        self.create(data, width as usize, height as usize, mode.channels())
    }
}

impl TryFrom<Proxy> for RawImageClassProxy {
    type Error = crate::error::BridgeError;

    fn try_from(proxy: Proxy) -> BridgeResult<Self> {
        RawImageClassProxy::new(proxy)
    }
}
