//! Shared types for the samseg segmentation pipeline.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::preprocess::ResizeFilter;

/// Re-export `RgbImage` so downstream crates can hand images to a
/// [`Session`](crate::Session) without depending on `image` directly.
pub use image::RgbImage;

/// Re-export `GrayImage` for callers building a [`Mask`](crate::Mask)
/// from a raster.
pub use image::GrayImage;

/// A 2D point in image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Horizontal position (pixels from left edge).
    pub x: f64,
    /// Vertical position (pixels from top edge).
    pub y: f64,
}

impl Point {
    /// Create a new point.
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// A sub-pixel position on the mask grid, in `(row, col)` order.
///
/// Contours are traced in grid order; [`GridPoint::to_xy`] is the single
/// place where the axis swap to image `(x, y)` happens.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridPoint {
    /// Vertical position (rows from the top edge).
    pub row: f64,
    /// Horizontal position (columns from the left edge).
    pub col: f64,
}

impl GridPoint {
    /// Create a new grid point.
    #[must_use]
    pub const fn new(row: f64, col: f64) -> Self {
        Self { row, col }
    }

    /// Euclidean distance to another grid point.
    #[must_use]
    pub fn distance(self, other: Self) -> f64 {
        let dr = self.row - other.row;
        let dc = self.col - other.col;
        dr.mul_add(dr, dc * dc).sqrt()
    }

    /// Swap axes: `col` becomes `x`, `row` becomes `y`.
    #[must_use]
    pub const fn to_xy(self) -> Point {
        Point::new(self.col, self.row)
    }
}

/// An ordered boundary curve traced from a [`Mask`](crate::Mask).
///
/// Closed contours repeat their first point at the end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contour(Vec<GridPoint>);

impl Contour {
    /// Create a contour from traced points.
    #[must_use]
    pub const fn new(points: Vec<GridPoint>) -> Self {
        Self(points)
    }

    /// Returns `true` if the contour has no points.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the number of points in the contour.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns a slice of all points.
    #[must_use]
    pub fn points(&self) -> &[GridPoint] {
        &self.0
    }

    /// Returns `true` if the last point coincides with the first.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.0.len() > 1 && self.0.first() == self.0.last()
    }

    /// Total length of the boundary, including the edge from the last
    /// point back to the first.
    #[must_use]
    pub fn perimeter(&self) -> f64 {
        let Some(&first) = self.0.first() else {
            return 0.0;
        };
        let open: f64 = self.0.windows(2).map(|w| w[0].distance(w[1])).sum();
        let closing = self.0.last().map_or(0.0, |&last| last.distance(first));
        open + closing
    }

    /// Largest coordinate range over both axes (`max(ptp(row), ptp(col))`).
    #[must_use]
    pub fn extent(&self) -> f64 {
        let Some(&first) = self.0.first() else {
            return 0.0;
        };
        let (mut min_r, mut max_r, mut min_c, mut max_c) = (first.row, first.row, first.col, first.col);
        for p in &self.0[1..] {
            min_r = min_r.min(p.row);
            max_r = max_r.max(p.row);
            min_c = min_c.min(p.col);
            max_c = max_c.max(p.col);
        }
        (max_r - min_r).max(max_c - min_c)
    }
}

/// The externally visible result: `(x, y)` vertices, closed implicitly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polygon(Vec<Point>);

impl Polygon {
    /// Create a new polygon from a vector of vertices.
    #[must_use]
    pub const fn new(points: Vec<Point>) -> Self {
        Self(points)
    }

    /// Returns `true` if the polygon has no vertices.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the number of vertices, counting a repeated closing vertex.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns a slice of all vertices.
    #[must_use]
    pub fn points(&self) -> &[Point] {
        &self.0
    }

    /// Consumes the polygon and returns the underlying vertices.
    #[must_use]
    pub fn into_points(self) -> Vec<Point> {
        self.0
    }

    /// Axis-aligned bounds of the vertices, or `None` when empty.
    #[must_use]
    pub fn bounding_box(&self) -> Option<BoundingBox> {
        let first = self.0.first()?;
        let init = BoundingBox {
            min: *first,
            max: *first,
        };
        Some(self.0[1..].iter().fold(init, |bb, p| BoundingBox {
            min: Point::new(bb.min.x.min(p.x), bb.min.y.min(p.y)),
            max: Point::new(bb.max.x.max(p.x), bb.max.y.max(p.y)),
        }))
    }
}

/// Axis-aligned rectangle in image `(x, y)` coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Top-left corner.
    pub min: Point,
    /// Bottom-right corner.
    pub max: Point,
}

/// Image dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Dimensions {
    /// Dimensions of an RGB image.
    #[must_use]
    pub fn of(image: &RgbImage) -> Self {
        Self {
            width: image.width(),
            height: image.height(),
        }
    }

    /// Enforce the landscape precondition shared by the encoder and decoder.
    ///
    /// # Errors
    ///
    /// Returns [`SegmentError::InvalidAspect`] unless `width > height`.
    pub fn check_aspect(self) -> Result<(), SegmentError> {
        if self.width > self.height {
            Ok(())
        } else {
            Err(SegmentError::InvalidAspect {
                width: self.width,
                height: self.height,
            })
        }
    }
}

/// Model constants for a two-stage encoder/decoder segmentation model.
///
/// Defaults match the SAM ViT ONNX exports: a 1024-pixel encoder input
/// with ImageNet normalization and a 256×256 prior-mask input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Side length of the square encoder input. The long (width) axis of
    /// the image is resized to this, the rest is zero padding.
    pub target_size: u32,

    /// Per-channel mean subtracted before encoding (RGB order).
    pub pixel_mean: [f32; 3],

    /// Per-channel standard deviation divided out after the mean.
    pub pixel_std: [f32; 3],

    /// Side length of the decoder's prior-mask input.
    pub mask_input_size: usize,

    /// Value of the decoder's `has_mask_input` flag. The prior mask is
    /// always zeroed, so this only tells the decoder to ignore it.
    pub has_mask_input: f32,

    /// Decoder logits strictly above this become mask foreground.
    pub mask_threshold: f32,

    /// Simplification tolerance is the contour's largest axis range
    /// divided by this.
    pub simplify_divisor: f64,

    /// Resampling filter for the encoder resize.
    pub resize_filter: ResizeFilter,

    /// Start the embedding on a background thread as soon as an image is
    /// set. When `false` the embedding is computed on the first request.
    pub background_embedding: bool,
}

impl ModelConfig {
    /// Default encoder input side length.
    pub const DEFAULT_TARGET_SIZE: u32 = 1024;
    /// Default per-channel mean.
    pub const DEFAULT_PIXEL_MEAN: [f32; 3] = [123.675, 116.28, 103.53];
    /// Default per-channel standard deviation.
    pub const DEFAULT_PIXEL_STD: [f32; 3] = [58.395, 57.12, 57.375];
    /// Default prior-mask side length.
    pub const DEFAULT_MASK_INPUT_SIZE: usize = 256;
    /// Default "no prior mask" flag.
    pub const DEFAULT_HAS_MASK_INPUT: f32 = -1.0;
    /// Default logit threshold.
    pub const DEFAULT_MASK_THRESHOLD: f32 = 0.0;
    /// Default simplification divisor.
    pub const DEFAULT_SIMPLIFY_DIVISOR: f64 = 100.0;

    /// Check that every constant is usable.
    ///
    /// # Errors
    ///
    /// Returns [`SegmentError::InvalidConfig`] naming the first offending
    /// field.
    pub fn validate(&self) -> Result<(), SegmentError> {
        if self.target_size == 0 {
            return Err(SegmentError::InvalidConfig(
                "target_size must be positive".into(),
            ));
        }
        if self.mask_input_size == 0 {
            return Err(SegmentError::InvalidConfig(
                "mask_input_size must be positive".into(),
            ));
        }
        if self.pixel_mean.iter().any(|m| !m.is_finite()) {
            return Err(SegmentError::InvalidConfig(
                "pixel_mean must be finite".into(),
            ));
        }
        if self.pixel_std.iter().any(|s| !s.is_finite() || *s <= 0.0) {
            return Err(SegmentError::InvalidConfig(
                "pixel_std must be finite and positive".into(),
            ));
        }
        if !self.has_mask_input.is_finite() || !self.mask_threshold.is_finite() {
            return Err(SegmentError::InvalidConfig(
                "has_mask_input and mask_threshold must be finite".into(),
            ));
        }
        if !self.simplify_divisor.is_finite() || self.simplify_divisor <= 0.0 {
            return Err(SegmentError::InvalidConfig(format!(
                "simplify_divisor must be finite and positive, got {}",
                self.simplify_divisor
            )));
        }
        Ok(())
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            target_size: Self::DEFAULT_TARGET_SIZE,
            pixel_mean: Self::DEFAULT_PIXEL_MEAN,
            pixel_std: Self::DEFAULT_PIXEL_STD,
            mask_input_size: Self::DEFAULT_MASK_INPUT_SIZE,
            has_mask_input: Self::DEFAULT_HAS_MASK_INPUT,
            mask_threshold: Self::DEFAULT_MASK_THRESHOLD,
            simplify_divisor: Self::DEFAULT_SIMPLIFY_DIVISOR,
            resize_filter: ResizeFilter::default(),
            background_embedding: true,
        }
    }
}

/// Which inference capability an [`SegmentError::EngineFailure`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    /// Image encoder (embedding computation).
    Encode,
    /// Prompt/mask decoder.
    Decode,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Encode => f.write_str("encode"),
            Self::Decode => f.write_str("decode"),
        }
    }
}

/// Errors that can occur while segmenting.
///
/// `Clone` because one encoder failure is reported to every caller
/// waiting on the same embedding.
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize, Deserialize)]
pub enum SegmentError {
    /// The image is not wider than it is tall.
    #[error("image must be wider than it is tall, got {width}x{height}")]
    InvalidAspect {
        /// Rejected image width.
        width: u32,
        /// Rejected image height.
        height: u32,
    },

    /// A polygon was requested before any image was set.
    #[error("no image has been set")]
    NotReady,

    /// The decoded mask has no usable boundary.
    #[error("no contour found in the decoded mask")]
    NoContourFound,

    /// The inference capability failed.
    #[error("{stage} inference failed: {message}")]
    EngineFailure {
        /// Which capability failed.
        stage: Stage,
        /// The engine's own description of the fault.
        message: String,
    },

    /// A polygon was requested without any prompt points.
    #[error("at least one prompt point is required")]
    EmptyPrompt,

    /// Model configuration is invalid.
    #[error("invalid model configuration: {0}")]
    InvalidConfig(String),
}

impl SegmentError {
    /// Build an [`SegmentError::EngineFailure`] for `stage`.
    pub fn engine(stage: Stage, message: impl Into<String>) -> Self {
        Self::EngineFailure {
            stage,
            message: message.into(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn square_contour() -> Contour {
        Contour::new(vec![
            GridPoint::new(0.0, 0.0),
            GridPoint::new(0.0, 4.0),
            GridPoint::new(3.0, 4.0),
            GridPoint::new(3.0, 0.0),
        ])
    }

    #[test]
    fn perimeter_includes_closing_edge() {
        assert!((square_contour().perimeter() - 14.0).abs() < 1e-12);
    }

    #[test]
    fn perimeter_of_explicitly_closed_contour_is_unchanged() {
        let mut points = square_contour().points().to_vec();
        points.push(GridPoint::new(0.0, 0.0));
        let closed = Contour::new(points);
        assert!(closed.is_closed());
        assert!((closed.perimeter() - 14.0).abs() < 1e-12);
    }

    #[test]
    fn extent_is_largest_axis_range() {
        assert!((square_contour().extent() - 4.0).abs() < 1e-12);
        assert!(Contour::new(vec![]).extent().abs() < f64::EPSILON);
    }

    #[test]
    fn grid_point_swaps_axes() {
        let p = GridPoint::new(2.5, 7.0).to_xy();
        assert_eq!(p, Point::new(7.0, 2.5));
    }

    #[test]
    fn polygon_bounding_box() {
        let polygon = Polygon::new(vec![
            Point::new(3.0, 1.0),
            Point::new(-2.0, 5.0),
            Point::new(4.0, 2.0),
        ]);
        let bb = polygon.bounding_box().unwrap();
        assert_eq!(bb.min, Point::new(-2.0, 1.0));
        assert_eq!(bb.max, Point::new(4.0, 5.0));
        assert!(Polygon::new(vec![]).bounding_box().is_none());
    }

    #[test]
    fn aspect_check_requires_landscape() {
        let landscape = Dimensions {
            width: 200,
            height: 100,
        };
        assert!(landscape.check_aspect().is_ok());
        let square = Dimensions {
            width: 100,
            height: 100,
        };
        assert_eq!(
            square.check_aspect(),
            Err(SegmentError::InvalidAspect {
                width: 100,
                height: 100
            })
        );
    }

    #[test]
    fn default_config_is_valid() {
        assert!(ModelConfig::default().validate().is_ok());
    }

    #[test]
    fn config_rejects_bad_constants() {
        let zero_std = ModelConfig {
            pixel_std: [1.0, 0.0, 1.0],
            ..ModelConfig::default()
        };
        assert!(matches!(
            zero_std.validate(),
            Err(SegmentError::InvalidConfig(_))
        ));

        let zero_target = ModelConfig {
            target_size: 0,
            ..ModelConfig::default()
        };
        assert!(matches!(
            zero_target.validate(),
            Err(SegmentError::InvalidConfig(_))
        ));

        let negative_divisor = ModelConfig {
            simplify_divisor: -1.0,
            ..ModelConfig::default()
        };
        assert!(matches!(
            negative_divisor.validate(),
            Err(SegmentError::InvalidConfig(_))
        ));
    }

    #[test]
    fn config_json_fills_missing_fields_with_defaults() {
        let config: ModelConfig = serde_json::from_str(r#"{"target_size": 512}"#).unwrap();
        assert_eq!(config.target_size, 512);
        assert_eq!(config.mask_input_size, ModelConfig::DEFAULT_MASK_INPUT_SIZE);
        assert!(config.background_embedding);
    }

    #[test]
    fn error_round_trips_through_json() {
        let err = SegmentError::engine(Stage::Decode, "bad shape");
        let json = serde_json::to_string(&err).unwrap();
        let back: SegmentError = serde_json::from_str(&json).unwrap();
        assert_eq!(back, err);
        assert_eq!(err.to_string(), "decode inference failed: bad shape");
    }
}
