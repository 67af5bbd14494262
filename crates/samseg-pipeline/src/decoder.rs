//! Polygon decoding: prompts + embedding in, annotation polygon out.
//!
//! The decoder capability follows the SAM prompt protocol: foreground
//! points carry label `1`, and one padding point at the origin with label
//! `-1` terminates the list. No prior mask is ever supplied. The decoder
//! upsamples its own output back to the original image size.

use std::sync::Arc;
use std::time::Instant;

use ndarray::{Array1, Array2, Array3, Array4, Axis, Ix2};

use crate::encoder::Embedding;
use crate::engine::{InferenceEngine, Tensor};
use crate::mask::Mask;
use crate::polygon;
use crate::preprocess;
use crate::types::{Dimensions, ModelConfig, Point, Polygon, SegmentError, Stage};

/// Decoder input names.
pub mod input_names {
    /// Encoder output for the image.
    pub const IMAGE_EMBEDDINGS: &str = "image_embeddings";
    /// `1 × N × 2` prompt coordinates in resized-image space.
    pub const POINT_COORDS: &str = "point_coords";
    /// `1 × N` prompt labels.
    pub const POINT_LABELS: &str = "point_labels";
    /// `1 × 1 × M × M` prior mask (always zero).
    pub const MASK_INPUT: &str = "mask_input";
    /// `[1]` flag telling the decoder whether `mask_input` is meaningful.
    pub const HAS_MASK_INPUT: &str = "has_mask_input";
    /// `[height, width]` of the original image.
    pub const ORIG_IM_SIZE: &str = "orig_im_size";
}

/// Label for a foreground prompt.
pub const FOREGROUND_LABEL: f32 = 1.0;

/// Label for the terminating padding point.
pub const PADDING_LABEL: f32 = -1.0;

/// Runs the decoder capability and postprocesses its mask.
#[derive(Clone)]
pub struct PolygonDecoder {
    engine: Arc<dyn InferenceEngine>,
    config: ModelConfig,
}

impl PolygonDecoder {
    /// Create a decoder around a decoder engine.
    #[must_use]
    pub fn new(engine: Arc<dyn InferenceEngine>, config: ModelConfig) -> Self {
        Self { engine, config }
    }

    /// The model constants in use.
    #[must_use]
    pub const fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Decode the object mask selected by `points`.
    ///
    /// # Errors
    ///
    /// - [`SegmentError::EmptyPrompt`] if `points` is empty
    /// - [`SegmentError::InvalidAspect`] if the image is not landscape
    /// - [`SegmentError::EngineFailure`] if the embedding was computed for
    ///   a different image size, the decoder fails, or its first output is
    ///   not a `1 × k × height × width` mask
    pub fn decode_mask(
        &self,
        embedding: &Embedding,
        points: &[Point],
        dimensions: Dimensions,
    ) -> Result<Mask, SegmentError> {
        if points.is_empty() {
            return Err(SegmentError::EmptyPrompt);
        }
        if embedding.source != dimensions {
            return Err(SegmentError::engine(
                Stage::Decode,
                format!(
                    "embedding computed for {}x{} used with a {}x{} image",
                    embedding.source.width,
                    embedding.source.height,
                    dimensions.width,
                    dimensions.height
                ),
            ));
        }

        let mut prompts = points.to_vec();
        prompts.push(Point::new(0.0, 0.0));
        let scaled = preprocess::scale_points(&prompts, dimensions, self.config.target_size)?;

        let n = scaled.len();
        let coords = Array3::from_shape_fn((1, n, 2), |(_, i, axis)| scaled[i][axis]);
        let labels = Array2::from_shape_fn((1, n), |(_, i)| {
            if i + 1 == n {
                PADDING_LABEL
            } else {
                FOREGROUND_LABEL
            }
        });
        let side = self.config.mask_input_size;
        let mask_input = Array4::<f32>::zeros((1, 1, side, side));
        let has_mask_input = Array1::from(vec![self.config.has_mask_input]);
        #[allow(clippy::cast_precision_loss)]
        let orig_im_size = Array1::from(vec![dimensions.height as f32, dimensions.width as f32]);

        let coords = coords.into_dyn();
        let labels = labels.into_dyn();
        let mask_input = mask_input.into_dyn();
        let has_mask_input = has_mask_input.into_dyn();
        let orig_im_size = orig_im_size.into_dyn();

        let started = Instant::now();
        let outputs = self
            .engine
            .run(&[
                (input_names::IMAGE_EMBEDDINGS, embedding.tensor.view()),
                (input_names::POINT_COORDS, coords.view()),
                (input_names::POINT_LABELS, labels.view()),
                (input_names::MASK_INPUT, mask_input.view()),
                (input_names::HAS_MASK_INPUT, has_mask_input.view()),
                (input_names::ORIG_IM_SIZE, orig_im_size.view()),
            ])
            .map_err(|e| SegmentError::engine(Stage::Decode, e.to_string()))?;
        let logits = outputs
            .into_iter()
            .next()
            .ok_or_else(|| SegmentError::engine(Stage::Decode, "decoder returned no outputs"))?;

        let mask = first_mask(&logits, dimensions, self.config.mask_threshold)?;
        tracing::debug!(
            prompts = points.len(),
            elapsed_ms = started.elapsed().as_millis(),
            "decoded mask"
        );
        Ok(mask)
    }

    /// Decode `points` into a simplified polygon in image coordinates.
    ///
    /// # Errors
    ///
    /// Everything [`decode_mask`](Self::decode_mask) reports, plus
    /// [`SegmentError::NoContourFound`] when the mask has no usable
    /// boundary.
    pub fn decode(
        &self,
        embedding: &Embedding,
        points: &[Point],
        dimensions: Dimensions,
    ) -> Result<Polygon, SegmentError> {
        let mask = self.decode_mask(embedding, points, dimensions)?;
        polygon::mask_to_polygon(&mask, self.config.simplify_divisor)
    }
}

impl std::fmt::Debug for PolygonDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolygonDecoder")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Take mask `[0, 0]` of a `1 × k × height × width` logits tensor and
/// threshold it.
fn first_mask(
    logits: &Tensor,
    dimensions: Dimensions,
    threshold: f32,
) -> Result<Mask, SegmentError> {
    let shape = logits.shape();
    let expected = [dimensions.height as usize, dimensions.width as usize];
    if shape.len() != 4 || shape[0] == 0 || shape[1] == 0 || shape[2..] != expected {
        return Err(SegmentError::engine(
            Stage::Decode,
            format!(
                "expected masks of shape [1, k, {}, {}], got {shape:?}",
                expected[0], expected[1]
            ),
        ));
    }
    let grid = logits
        .index_axis(Axis(0), 0)
        .index_axis_move(Axis(0), 0)
        .into_dimensionality::<Ix2>()
        .map_err(|e| SegmentError::engine(Stage::Decode, e.to_string()))?;
    Ok(Mask::threshold(grid, threshold))
}
