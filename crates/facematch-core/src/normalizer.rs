//! Square resize, luminance conversion and contrast stretch.
//!
//! Output pixels stay in the 0–255 integer domain for the whole pipeline.

use crate::types::Image;
use image::{DynamicImage, GrayAlphaImage, GrayImage, RgbImage, RgbaImage};
use image::imageops::FilterType;
use thiserror::Error;

/// Side length of the square the extractor works on.
pub const DEFAULT_TARGET_SIZE: u32 = 160;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResizeError {
    #[error("image has zero width or height ({width}x{height})")]
    EmptyImage { width: u32, height: u32 },
    #[error("image buffer length mismatch: expected {expected} bytes, got {actual}")]
    BufferMismatch { expected: usize, actual: usize },
    #[error("image dimensions {width}x{height}x{channels} overflow the address space")]
    Oversized { width: u32, height: u32, channels: u8 },
    #[error("unsupported channel count: {0}")]
    UnsupportedChannels(u8),
    #[error("target size must be positive")]
    InvalidTarget,
}

/// Resize `image` to `target_size` × `target_size`, convert it to
/// luminance and stretch its contrast to the full 0–255 range.
///
/// Returns a row-major buffer of `target_size²` intensities.
pub fn normalize(image: &Image, target_size: u32) -> Result<Vec<u8>, ResizeError> {
    if target_size == 0 {
        return Err(ResizeError::InvalidTarget);
    }
    let source = to_dynamic(image)?;

    // Lanczos keeps the texture the gradient features depend on;
    // nearest-neighbour would alias it away.
    let resized = source.resize_exact(target_size, target_size, FilterType::Lanczos3);
    let gray = resized.to_luma8().into_raw();

    tracing::debug!(
        src_width = image.width(),
        src_height = image.height(),
        channels = image.channels(),
        target_size,
        "normalized image"
    );

    Ok(stretch_contrast(&gray))
}

/// Linearly map the observed [min, max] of `pixels` onto [0, 255].
///
/// A flat buffer (min == max) has no contrast to stretch and is returned as is.
pub fn stretch_contrast(pixels: &[u8]) -> Vec<u8> {
    let (Some(&min), Some(&max)) = (pixels.iter().min(), pixels.iter().max()) else {
        return Vec::new();
    };
    if min == max {
        return pixels.to_vec();
    }

    let range = (max - min) as u32;
    pixels
        .iter()
        .map(|&p| (((p - min) as u32 * 255 + range / 2) / range) as u8)
        .collect()
}

fn to_dynamic(image: &Image) -> Result<DynamicImage, ResizeError> {
    let (width, height) = (image.width(), image.height());
    if width == 0 || height == 0 {
        return Err(ResizeError::EmptyImage { width, height });
    }
    if !(1..=4).contains(&image.channels()) {
        return Err(ResizeError::UnsupportedChannels(image.channels()));
    }

    let expected = image.expected_len().ok_or(ResizeError::Oversized {
        width,
        height,
        channels: image.channels(),
    })?;
    let actual = image.data().len();
    let mismatch = ResizeError::BufferMismatch { expected, actual };
    if actual != expected {
        return Err(mismatch);
    }

    let data = image.data().to_vec();
    let dynamic = match image.channels() {
        1 => GrayImage::from_raw(width, height, data).map(DynamicImage::ImageLuma8),
        2 => GrayAlphaImage::from_raw(width, height, data).map(DynamicImage::ImageLumaA8),
        3 => RgbImage::from_raw(width, height, data).map(DynamicImage::ImageRgb8),
        _ => RgbaImage::from_raw(width, height, data).map(DynamicImage::ImageRgba8),
    };
    dynamic.ok_or(mismatch)
}
