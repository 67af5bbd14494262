//! Encoder input preparation and prompt coordinate scaling.
//!
//! The encoder sees a square `target_size × target_size` tensor: the image
//! is resized so its width equals `target_size`, normalized per channel,
//! and zero padded at the bottom. Prompt points must be mapped into the
//! same resized space before they reach the decoder.

use ndarray::Array4;
use serde::{Deserialize, Serialize};

use crate::types::{Dimensions, ModelConfig, Point, RgbImage, SegmentError};

/// Resampling filter used for the encoder resize.
///
/// Ordered from fastest/lowest-quality to slowest/highest-quality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ResizeFilter {
    /// Nearest-neighbor: fastest, blocky artifacts.
    Nearest,
    /// Bilinear interpolation: fast, decent quality.
    Triangle,
    /// Bicubic (Catmull-Rom): moderate speed, good quality.
    CatmullRom,
    /// Gaussian: moderate speed, smooth output.
    Gaussian,
    /// Lanczos with 3 lobes: slowest, sharpest.
    #[default]
    Lanczos3,
}

impl ResizeFilter {
    /// Convert to the `image` crate's `FilterType`.
    const fn to_image_filter(self) -> image::imageops::FilterType {
        match self {
            Self::Nearest => image::imageops::FilterType::Nearest,
            Self::Triangle => image::imageops::FilterType::Triangle,
            Self::CatmullRom => image::imageops::FilterType::CatmullRom,
            Self::Gaussian => image::imageops::FilterType::Gaussian,
            Self::Lanczos3 => image::imageops::FilterType::Lanczos3,
        }
    }
}

/// Size of the image after the encoder resize, before padding.
///
/// Width becomes `target_size`; height is `round(height * target_size /
/// width)` with ties to even, never less than one row.
///
/// # Errors
///
/// Returns [`SegmentError::InvalidAspect`] unless `width > height`.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn resized_dimensions(
    dimensions: Dimensions,
    target_size: u32,
) -> Result<Dimensions, SegmentError> {
    dimensions.check_aspect()?;
    let scale = f64::from(target_size) / f64::from(dimensions.width);
    let height = (f64::from(dimensions.height) * scale).round_ties_even();
    Ok(Dimensions {
        width: target_size,
        height: (height as u32).max(1),
    })
}

/// Build the `1 × 3 × target_size × target_size` encoder input.
///
/// # Errors
///
/// Returns [`SegmentError::InvalidAspect`] unless the image is wider than
/// it is tall.
pub fn preprocess(image: &RgbImage, config: &ModelConfig) -> Result<Array4<f32>, SegmentError> {
    let resized_dims = resized_dimensions(Dimensions::of(image), config.target_size)?;
    let resized = image::imageops::resize(
        image,
        resized_dims.width,
        resized_dims.height,
        config.resize_filter.to_image_filter(),
    );

    let side = config.target_size as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, side, side));
    for (col, row, pixel) in resized.enumerate_pixels() {
        for channel in 0..3 {
            let value = (f32::from(pixel[channel]) - config.pixel_mean[channel])
                / config.pixel_std[channel];
            tensor[[0, channel, row as usize, col as usize]] = value;
        }
    }
    Ok(tensor)
}

/// Map original-image prompt points into the encoder's resized space.
///
/// Each axis is scaled by its own `resized / original` ratio, so a point
/// on the last pixel column lands on the last resized column even when
/// the height was rounded.
///
/// # Errors
///
/// Returns [`SegmentError::InvalidAspect`] unless `width > height`.
#[allow(clippy::cast_possible_truncation)]
pub fn scale_points(
    points: &[Point],
    dimensions: Dimensions,
    target_size: u32,
) -> Result<Vec<[f32; 2]>, SegmentError> {
    let resized = resized_dimensions(dimensions, target_size)?;
    let sx = f64::from(resized.width) / f64::from(dimensions.width);
    let sy = f64::from(resized.height) / f64::from(dimensions.height);
    Ok(points
        .iter()
        .map(|p| [(p.x * sx) as f32, (p.y * sy) as f32])
        .collect())
}
