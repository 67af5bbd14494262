//! samseg-pipeline: click-to-polygon segmentation core (sans-IO).
//!
//! Turns foreground clicks on an image into a simplified annotation
//! polygon using a two-stage promptable segmentation model:
//! image -> preprocess -> encoder (once per image, cached) ->
//! decoder (per click set) -> threshold -> contours -> longest ->
//! simplify -> `(x, y)` polygon.
//!
//! The models themselves are injected through [`InferenceEngine`]; this
//! crate only prepares tensors and interprets results. It has **no I/O
//! dependencies**: images arrive as in-memory buffers and the CLI in
//! `samseg-trace` does the file handling.
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use samseg_pipeline::{InferenceEngine, ModelConfig, Point, RgbImage, Session};
//! # fn demo(encoder: Arc<dyn InferenceEngine>, decoder: Arc<dyn InferenceEngine>, image: RgbImage)
//! # -> Result<(), samseg_pipeline::SegmentError> {
//! let session = Session::new(encoder, decoder, ModelConfig::default())?;
//! session.set_image(image)?; // encoder starts in the background
//! let polygon = session.request_polygon(&[Point::new(120.0, 80.0)])?;
//! # let _ = polygon;
//! # Ok(())
//! # }
//! ```

pub mod contour;
pub mod decoder;
pub mod encoder;
pub mod engine;
pub mod mask;
pub mod polygon;
pub mod preprocess;
pub mod session;
pub mod simplify;
pub mod types;

pub use contour::{Connectivity, find_contours, find_contours_with};
pub use decoder::PolygonDecoder;
pub use encoder::{Embedding, EmbeddingComputer};
pub use engine::{EngineError, InferenceEngine, NamedInput, Tensor};
pub use mask::Mask;
pub use polygon::{longest_contour, mask_to_polygon};
pub use preprocess::{ResizeFilter, preprocess, scale_points};
pub use session::{EmbeddingState, Session};
pub use simplify::approximate_polygon;
pub use types::{
    BoundingBox, Contour, Dimensions, GrayImage, GridPoint, ModelConfig, Point, Polygon, RgbImage,
    SegmentError, Stage,
};
