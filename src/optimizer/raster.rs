//! Raster image re-encoding
//!
//! Supported rasters are flattened onto white, scaled down to the maximum
//! width and re-encoded as JPEG. Animated or icon formats pass through.

use super::{OptimizeError, Optimized};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ExtendedColorType, ImageFormat, Rgb, RgbImage};

/// Re-encodes a raster image
///
/// # Arguments
///
/// * `bytes` - Original image bytes
/// * `quality` - JPEG quality, 1..=100
/// * `max_width` - Images wider than this are scaled down, keeping aspect ratio
///
/// Returns the original bytes when the format is not re-encoded, or when the
/// re-encoded image would be larger and no resize was needed.
pub fn optimize_image(bytes: &[u8], quality: u32, max_width: u32) -> Result<Optimized, OptimizeError> {
    let format = image::guess_format(bytes)?;
    if !matches!(
        format,
        ImageFormat::Png | ImageFormat::Jpeg | ImageFormat::WebP | ImageFormat::Bmp
    ) {
        return Ok(Optimized::unchanged(bytes, None));
    }

    let decoded = image::load_from_memory_with_format(bytes, format)?;
    let flat = flatten_on_white(&decoded);

    let (width, height) = flat.dimensions();
    let resized = width > max_width;
    let flat = if resized {
        let new_height = ((u64::from(height) * u64::from(max_width)) / u64::from(width)).max(1);
        image::imageops::resize(&flat, max_width, new_height as u32, FilterType::Lanczos3)
    } else {
        flat
    };

    let mut encoded = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut encoded, quality.clamp(1, 100) as u8);
    encoder.encode(
        flat.as_raw(),
        flat.width(),
        flat.height(),
        ExtendedColorType::Rgb8,
    )?;

    if !resized && encoded.len() >= bytes.len() {
        return Ok(Optimized::unchanged(bytes, None));
    }

    Ok(Optimized {
        bytes: encoded,
        content_type: Some("image/jpeg".to_string()),
        soft_failure: None,
    })
}

/// Composites any alpha channel over a white background
fn flatten_on_white(image: &DynamicImage) -> RgbImage {
    if !image.color().has_alpha() {
        return image.to_rgb8();
    }

    let rgba = image.to_rgba8();
    RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let [r, g, b, a] = rgba.get_pixel(x, y).0;
        let alpha = u32::from(a);
        let blend = |c: u8| ((u32::from(c) * alpha + 255 * (255 - alpha) + 127) / 255) as u8;
        Rgb([blend(r), blend(g), blend(b)])
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};
    use std::io::Cursor;

    fn encode(image: DynamicImage, format: ImageFormat) -> Vec<u8> {
        let mut buf = Vec::new();
        image.write_to(&mut Cursor::new(&mut buf), format).unwrap();
        buf
    }

    fn noisy_png(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_fn(width, height, |x, y| {
            let v = (x * 31 + y * 17) ^ (x * y);
            Rgb([(v % 251) as u8, (v % 241) as u8, (v % 239) as u8])
        });
        encode(DynamicImage::ImageRgb8(img), ImageFormat::Png)
    }

    #[test]
    fn test_wide_image_is_scaled() {
        let png = noisy_png(400, 200);
        let out = optimize_image(&png, 80, 100).unwrap();

        assert_eq!(out.content_type.as_deref(), Some("image/jpeg"));
        let decoded = image::load_from_memory(&out.bytes).unwrap();
        assert_eq!(decoded.width(), 100);
        assert_eq!(decoded.height(), 50);
    }

    #[test]
    fn test_deterministic() {
        let png = noisy_png(300, 120);
        let a = optimize_image(&png, 70, 200).unwrap();
        let b = optimize_image(&png, 70, 200).unwrap();
        assert_eq!(a.bytes, b.bytes);
    }

    #[test]
    fn test_tiny_image_keeps_original_when_jpeg_is_larger() {
        let img = RgbImage::from_pixel(2, 2, Rgb([10, 20, 30]));
        let png = encode(DynamicImage::ImageRgb8(img), ImageFormat::Png);
        let out = optimize_image(&png, 85, 1920).unwrap();
        assert_eq!(out.bytes, png);
        assert!(out.content_type.is_none());
    }

    #[test]
    fn test_transparency_flattens_to_white() {
        let img = RgbaImage::from_pixel(1, 1, Rgba([0, 0, 0, 0]));
        let flat = flatten_on_white(&DynamicImage::ImageRgba8(img));
        assert_eq!(flat.get_pixel(0, 0), &Rgb([255, 255, 255]));
    }

    #[test]
    fn test_gif_passes_through() {
        let img = RgbaImage::from_pixel(4, 4, Rgba([200, 0, 0, 255]));
        let gif = encode(DynamicImage::ImageRgba8(img), ImageFormat::Gif);
        let out = optimize_image(&gif, 85, 1).unwrap();
        assert_eq!(out.bytes, gif);
    }

    #[test]
    fn test_garbage_is_error() {
        assert!(optimize_image(b"definitely not an image", 85, 1920).is_err());
    }
}
