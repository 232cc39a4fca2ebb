mod common;

use image::{DynamicImage, GenericImageView, Rgb, RgbImage};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use tjs_bridge::marshal::encode_png;
use tjs_bridge::{BridgeError, ColorMode, ConversionError, DType, ProxyKind, read_audio};

fn red_blue() -> Vec<u8> {
    vec![255, 0, 0, 0, 0, 255]
}

fn checker(width: u32, height: u32) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
        if (x + y) % 2 == 0 { Rgb([255, 255, 255]) } else { Rgb([0, 0, 0]) }
    }))
}

#[tokio::test]
async fn test_create_and_convert_channels() {
    let ctx = common::context();
    let tjs = ctx.resolve_instance(Some("2.4.2")).await.unwrap();
    let class = tjs.raw_image().unwrap();
    assert_eq!(class.proxy().kind(), ProxyKind::RawImageClass);

    let image = class.create(red_blue(), 2, 1, 3).unwrap();
    assert_eq!((image.width().unwrap(), image.height().unwrap()), (2, 1));
    assert_eq!(image.mode().unwrap(), ColorMode::Rgb);

    let gray = image.grayscale().unwrap();
    assert_eq!(gray.channels().unwrap(), 1);
    assert_eq!(gray.to_native_array().unwrap().as_slice::<u8>(), Some(&[76u8, 29][..]));

    let rgba = image.rgba().unwrap();
    let pixels = rgba.to_native_array().unwrap();
    assert_eq!(pixels.shape(), &[1, 2, 4]);
    assert_eq!(pixels.as_slice::<u8>(), Some(&[255u8, 0, 0, 255, 0, 0, 255, 255][..]));

    let back = rgba.rgb().unwrap();
    assert_eq!(back.to_native_array().unwrap().as_slice::<u8>(), Some(&red_blue()[..]));
}

#[tokio::test]
async fn test_pixel_array_layout() {
    let ctx = common::context();
    let tjs = ctx.resolve_instance(Some("2.4.2")).await.unwrap();
    let image = tjs.raw_image().unwrap().create(red_blue(), 2, 1, 3).unwrap();

    let array = image.to_native_array().unwrap();
    assert_eq!(array.dtype(), DType::Uint8);
    assert_eq!(array.shape(), &[1, 2, 3]);
    assert_eq!(array.get(&[0, 1, 2]), Some(255.0));
}

#[tokio::test]
async fn test_native_image_round_trip_through_disk() {
    let ctx = common::context();
    let tjs = ctx.resolve_instance(Some("2.4.2")).await.unwrap();
    let class = tjs.raw_image().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("checker.png");

    let image = class.from_native_image(&checker(3, 2)).unwrap();
    image.save(&file).unwrap();

    let reread = class.read(file.as_path()).await.unwrap();
    assert_eq!((reread.width().unwrap(), reread.height().unwrap()), (3, 2));
    assert_eq!(reread.channels().unwrap(), 3);

    let native = reread.to_native_image().unwrap();
    assert_eq!(native.dimensions(), (3, 2));
    assert_eq!(native.to_rgb8().get_pixel(1, 0), &Rgb([0, 0, 0]));
}

#[tokio::test]
async fn test_read_accepts_native_images_and_raw_images() {
    let ctx = common::context();
    let tjs = ctx.resolve_instance(Some("2.4.2")).await.unwrap();
    let class = tjs.raw_image().unwrap();

    let from_native = class.read(checker(4, 4)).await.unwrap();
    assert_eq!(from_native.width().unwrap(), 4);

    let same = class.read(&from_native).await.unwrap();
    assert!(same.proxy().same_object(from_native.proxy()));
}

#[tokio::test]
async fn test_gray_image_comes_back_as_luma() {
    let ctx = common::context();
    let tjs = ctx.resolve_instance(Some("2.4.2")).await.unwrap();
    let gray = tjs
        .raw_image()
        .unwrap()
        .create(vec![0, 128, 255, 64], 2, 2, 1)
        .unwrap();

    let native = gray.to_native_image().unwrap();
    assert!(matches!(native, DynamicImage::ImageLuma8(_)));
    assert_eq!(native.as_bytes(), &[0, 128, 255, 64]);
}

#[tokio::test]
async fn test_invalid_channel_count_is_rejected() {
    let ctx = common::context();
    let tjs = ctx.resolve_instance(Some("2.4.2")).await.unwrap();

    let err = tjs
        .raw_image()
        .unwrap()
        .create(vec![0; 4], 2, 1, 2)
        .unwrap_err();
    assert!(err.is_conversion());
}

#[tokio::test]
async fn test_uniform_gray_survives_rgb_round_trip() {
    let ctx = common::context();
    let tjs = ctx.resolve_instance(Some("2.4.2")).await.unwrap();
    let class = tjs.raw_image().unwrap();

    for level in [0u8, 1, 37, 128, 254, 255] {
        let gray = class.create(vec![level; 6], 3, 2, 1).unwrap();
        let rgb = gray.rgb().unwrap();
        assert_eq!(rgb.channels().unwrap(), 3);

        let back = rgb.grayscale().unwrap();
        assert_eq!(back.channels().unwrap(), 1);
        assert_eq!(back.to_native_array().unwrap().as_slice::<u8>(), Some(&[level; 6][..]));
    }
}

#[tokio::test]
async fn test_oversized_dimensions_are_a_conversion_error() {
    let ctx = common::context();
    let tjs = ctx.resolve_instance(Some("2.4.2")).await.unwrap();
    let side = 1usize << 40;

    let err = tjs.raw_image().unwrap().create(vec![0; 3], side, side, 3).unwrap_err();
    assert!(matches!(err, BridgeError::Conversion(ConversionError::SizeOverflow(_))));
}

#[tokio::test]
async fn test_from_url_fetches_over_http() {
    let server = MockServer::start().await;
    let png = encode_png(&checker(2, 2)).unwrap();
    Mock::given(method("GET"))
        .and(path("/images/checker.png"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(png))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/images/missing.png"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let ctx = common::context();
    let tjs = ctx.resolve_instance(Some("2.4.2")).await.unwrap();
    let class = tjs.raw_image().unwrap();

    let image = class
        .from_url(&format!("{}/images/checker.png", server.uri()))
        .await
        .unwrap();
    assert_eq!(image.width().unwrap(), 2);

    let err = class
        .from_url(&format!("{}/images/missing.png", server.uri()))
        .await
        .unwrap_err();
    assert!(err.is_foreign_call());
    assert!(err.to_string().contains("404"));
}

#[tokio::test]
async fn test_as_url_creates_a_fresh_blob_each_call() {
    let ctx = common::context();
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("bytes.bin");
    std::fs::write(&file, [9u8, 8, 7]).unwrap();

    let first = ctx.as_url(file.as_path()).await.unwrap();
    let second = ctx.as_url(file.as_path()).await.unwrap();

    assert_ne!(first.url(), second.url());
    assert!(first.url().starts_with("blob:tjs-bridge/"));
    assert_eq!(ctx.blobs().get(second.url()).as_deref(), Some(&[9u8, 8, 7][..]));
    assert_eq!(ctx.blobs().len(), 2);

    let err = ctx.as_url(dir.path().join("absent.bin").as_path()).await.unwrap_err();
    assert!(matches!(err, tjs_bridge::ConversionError::Read { .. }));
}

#[test]
fn test_read_audio_mono_and_resampled() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("clip.wav");
    std::fs::write(&file, common::wav_pcm16(16000, 1, &[0, 16384, -32768, 16384])).unwrap();

    let samples = read_audio(&file, 16000).unwrap();
    assert_eq!(samples.dtype(), DType::Float32);
    assert_eq!(samples.as_slice::<f32>(), Some(&[0.0f32, 0.5, -1.0, 0.5][..]));

    let upsampled = read_audio(&file, 32000).unwrap();
    assert_eq!(upsampled.shape(), &[8]);
}

#[test]
fn test_read_audio_merges_stereo() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("stereo.wav");
    std::fs::write(&file, common::wav_pcm16(16000, 2, &[16384, 16384, 0, 0])).unwrap();

    let samples = read_audio(&file, 16000).unwrap().to_f64_vec();
    assert_eq!(samples.len(), 2);
    assert!((samples[0] - std::f64::consts::SQRT_2 * 0.5).abs() < 1e-6);
    assert_eq!(samples[1], 0.0);
}
