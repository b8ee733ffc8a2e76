//! Pure image primitives: decoding, 2x2 grid splitting, and thumbnail
//! resizing.
//!
//! All functions here are CPU-bound and synchronous; callers run them on
//! the blocking pool.

use image::imageops::FilterType;
use image::DynamicImage;

/// Downscale factor for upscale-result thumbnails (coarse; the source
/// is a full-resolution single image).
pub const THUMBNAIL_FACTOR_UPSCALE: u32 = 8;

/// Downscale factor for split-quadrant thumbnails (finer; quadrants are
/// a quarter of the composite).
pub const THUMBNAIL_FACTOR_QUADRANT: u32 = 4;

/// Errors from image decoding or processing. Always per-artifact.
#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    /// The downloaded bytes are not a decodable image.
    #[error("Decode error: {0}")]
    Decode(String),

    /// The image shape does not permit the requested operation.
    #[error("Split error: {0}")]
    Split(String),

    /// Writing an output file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Decode raw downloaded bytes into an image.
pub fn decode(bytes: &[u8]) -> Result<DynamicImage, MediaError> {
    image::load_from_memory(bytes).map_err(|e| MediaError::Decode(e.to_string()))
}

/// Split a 2x2 composite into its four quadrants, in button order:
/// top-left, top-right, bottom-left, bottom-right.
pub fn split_grid(composite: &DynamicImage) -> Result<[DynamicImage; 4], MediaError> {
    let (width, height) = (composite.width(), composite.height());
    if width < 2 || height < 2 {
        return Err(MediaError::Split(format!(
            "composite too small to split: {width}x{height}"
        )));
    }

    let (half_w, half_h) = (width / 2, height / 2);
    let crop = |x, y| composite.crop_imm(x, y, half_w, half_h);
    Ok([
        crop(0, 0),
        crop(half_w, 0),
        crop(0, half_h),
        crop(half_w, half_h),
    ])
}

/// Produce a reduced-scale preview of `source`, shrinking each dimension
/// by `factor` (minimum output size 1x1).
pub fn thumbnail(source: &DynamicImage, factor: u32) -> DynamicImage {
    let factor = factor.max(1);
    let width = (source.width() / factor).max(1);
    let height = (source.height() / factor).max(1);
    source.resize(width, height, FilterType::Triangle)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
