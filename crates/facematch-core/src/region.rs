//! Region cropping with symmetric margin expansion.
//!
//! Detector boxes are usually tight around the face; the margin pulls in
//! hairline, jaw and ears before the region is clamped to the image.

use crate::types::{Image, Region};
use thiserror::Error;

/// Margin added on every side, as a fraction of the region's width/height.
pub const DEFAULT_MARGIN_RATIO: f32 = 0.2;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegionError {
    #[error("region (x={x}, y={y}, w={width}, h={height}) is empty after clamping to the image")]
    InvalidRegion {
        x: f32,
        y: f32,
        width: f32,
        height: f32,
    },
    #[error("image buffer too short for cropping: expected {expected} bytes, got {actual}")]
    MalformedImage { expected: usize, actual: usize },
    #[error("image dimensions {width}x{height}x{channels} overflow the address space")]
    Oversized { width: u32, height: u32, channels: u8 },
}

/// Pixel rectangle after expansion and clamping. Always non-empty and inside the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Expand `region` by `margin_ratio` on all sides and clamp it to an image
/// of `image_width` × `image_height`.
pub fn expand_and_clamp(
    region: &Region,
    margin_ratio: f32,
    image_width: u32,
    image_height: u32,
) -> Result<PixelRect, RegionError> {
    let invalid = || RegionError::InvalidRegion {
        x: region.x,
        y: region.y,
        width: region.width,
        height: region.height,
    };

    let finite = [region.x, region.y, region.width, region.height, margin_ratio]
        .iter()
        .all(|v| v.is_finite());
    if !finite || region.width <= 0.0 || region.height <= 0.0 {
        return Err(invalid());
    }

    let left = (region.x - region.width * margin_ratio).floor();
    let top = (region.y - region.height * margin_ratio).floor();
    let right = left + (region.width * (1.0 + 2.0 * margin_ratio)).floor();
    let bottom = top + (region.height * (1.0 + 2.0 * margin_ratio)).floor();

    let x0 = left.max(0.0);
    let y0 = top.max(0.0);
    let x1 = right.min(image_width as f32);
    let y1 = bottom.min(image_height as f32);

    if x1 - x0 < 1.0 || y1 - y0 < 1.0 {
        return Err(invalid());
    }

    Ok(PixelRect {
        x: x0 as u32,
        y: y0 as u32,
        width: (x1 - x0) as u32,
        height: (y1 - y0) as u32,
    })
}

/// Crop `image` to `region` expanded by `margin_ratio`.
///
/// Fails with [`RegionError::InvalidRegion`] when nothing of the expanded
/// region lies inside the image. Callers fall back to the whole image.
pub fn crop(image: &Image, region: &Region, margin_ratio: f32) -> Result<Image, RegionError> {
    let expected = image.expected_len().ok_or(RegionError::Oversized {
        width: image.width(),
        height: image.height(),
        channels: image.channels(),
    })?;
    if image.channels() == 0 || image.data().len() < expected {
        return Err(RegionError::MalformedImage {
            expected,
            actual: image.data().len(),
        });
    }

    let rect = expand_and_clamp(region, margin_ratio, image.width(), image.height())?;
    tracing::debug!(?region, ?rect, "cropping region of interest");

    let channels = image.channels() as usize;
    let src_stride = image.width() as usize * channels;
    let row_len = rect.width as usize * channels;
    let x_off = rect.x as usize * channels;

    let mut data = Vec::with_capacity(row_len * rect.height as usize);
    for row in rect.y as usize..(rect.y + rect.height) as usize {
        let start = row * src_stride + x_off;
        data.extend_from_slice(&image.data()[start..start + row_len]);
    }

    Ok(Image::new(data, rect.width, rect.height, image.channels()))
}
