//! Transform codec adapter (ambient concern A3).
//!
//! Decode/resize/encode built on the `image` crate (plus the dedicated
//! `webp` crate for WebP output, mirroring the teacher's original split).
//! Resizing always targets an exact `width x height` --- `TransformParams`
//! never carries a partial dimension, unlike the teacher's optional-width/
//! height API.

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{DynamicImage, ExtendedColorType, GenericImageView, ImageEncoder};

use crate::config::ImageFormat;
use crate::error::ServerError;

/// Decode raw source bytes into an in-memory image. Corrupted or
/// unrecognized bytes become `ServerError::CorruptedSource`, never a panic.
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage, ServerError> {
    let guessed =
        image::guess_format(bytes).map_err(|e| ServerError::CorruptedSource(e.to_string()))?;
    image::load_from_memory_with_format(bytes, guessed)
        .map_err(|e| ServerError::CorruptedSource(e.to_string()))
}

/// Resize to exact target dimensions using Lanczos3 resampling, the
/// highest-quality filter the `image` crate offers for downsampling.
/// Dimensions are clamped to a minimum of 1px to avoid degenerate output.
pub fn resize_image(img: DynamicImage, width: u32, height: u32) -> DynamicImage {
    let (orig_w, orig_h) = img.dimensions();
    if orig_w == width && orig_h == height {
        return img;
    }
    img.resize_exact(
        width.max(1),
        height.max(1),
        image::imageops::FilterType::Lanczos3,
    )
}

/// Encode to the requested output format at the requested quality
/// (ignored by PNG, which is lossless).
pub fn encode_image(
    img: &DynamicImage,
    fmt: ImageFormat,
    quality: u8,
) -> Result<Vec<u8>, ServerError> {
    let mut out = Vec::new();
    let q = quality.clamp(1, 100);

    match fmt {
        ImageFormat::jpeg => {
            let rgb = img.to_rgb8();
            let (w, h) = rgb.dimensions();
            let enc = JpegEncoder::new_with_quality(&mut out, q);
            enc.write_image(rgb.as_raw(), w, h, ExtendedColorType::Rgb8)
                .map_err(|e| ServerError::Processing(e.to_string()))?;
        }
        ImageFormat::webp => {
            let rgb = img.to_rgb8();
            let (w, h) = rgb.dimensions();
            let encoder = webp::Encoder::from_rgb(rgb.as_raw(), w, h);
            let encoded = encoder.encode(q as f32);
            out.extend_from_slice(&encoded);
        }
        ImageFormat::png => {
            let rgba = img.to_rgba8();
            let (w, h) = rgba.dimensions();
            let enc = PngEncoder::new(&mut out);
            enc.write_image(rgba.as_raw(), w, h, ExtendedColorType::Rgba8)
                .map_err(|e| ServerError::Processing(e.to_string()))?;
        }
    }

    Ok(out)
}

/// Run the full decode -> resize -> encode pipeline for one job. Kept as a
/// single synchronous entry point so it can be handed to the worker pool's
/// `spawn_blocking` closure as-is (spec §4.6).
pub fn run_transform(
    source_bytes: &[u8],
    width: u32,
    height: u32,
    format: ImageFormat,
    quality: u8,
) -> Result<Vec<u8>, ServerError> {
    let decoded = decode_image(source_bytes)?;
    let resized = resize_image(decoded, width, height);
    encode_image(&resized, format, quality)
}
