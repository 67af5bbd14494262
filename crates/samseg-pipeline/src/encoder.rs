//! Embedding computation: image in, opaque encoder features out.

use std::sync::Arc;
use std::time::Instant;

use crate::engine::{InferenceEngine, Tensor};
use crate::preprocess;
use crate::types::{Dimensions, ModelConfig, RgbImage, SegmentError, Stage};

/// Name of the encoder's single image input.
pub const ENCODER_INPUT: &str = "x";

/// Encoder features for one image.
///
/// Only meaningful together with the image it was computed from; the
/// source dimensions are kept so the decoder can check the pairing.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    /// The encoder's first output, untouched.
    pub tensor: Tensor,
    /// Dimensions of the image the tensor was computed from.
    pub source: Dimensions,
}

/// Runs the encoder capability on preprocessed images.
#[derive(Clone)]
pub struct EmbeddingComputer {
    engine: Arc<dyn InferenceEngine>,
    config: ModelConfig,
}

impl EmbeddingComputer {
    /// Create a computer around an encoder engine.
    #[must_use]
    pub fn new(engine: Arc<dyn InferenceEngine>, config: ModelConfig) -> Self {
        Self { engine, config }
    }

    /// The model constants in use.
    #[must_use]
    pub const fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Compute the embedding for `image`.
    ///
    /// # Errors
    ///
    /// Returns [`SegmentError::InvalidAspect`] before touching the engine
    /// if the image is not wider than tall, and
    /// [`SegmentError::EngineFailure`] if the encoder fails or returns no
    /// output.
    pub fn compute(&self, image: &RgbImage) -> Result<Embedding, SegmentError> {
        let source = Dimensions::of(image);
        source.check_aspect()?;

        let started = Instant::now();
        let input = preprocess::preprocess(image, &self.config)?.into_dyn();
        let outputs = self
            .engine
            .run(&[(ENCODER_INPUT, input.view())])
            .map_err(|e| SegmentError::engine(Stage::Encode, e.to_string()))?;
        let tensor = outputs
            .into_iter()
            .next()
            .ok_or_else(|| SegmentError::engine(Stage::Encode, "encoder returned no outputs"))?;

        tracing::debug!(
            width = source.width,
            height = source.height,
            shape = ?tensor.shape(),
            elapsed_ms = started.elapsed().as_millis(),
            "computed image embedding"
        );
        Ok(Embedding { tensor, source })
    }
}

impl std::fmt::Debug for EmbeddingComputer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingComputer")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;

    use ndarray::{Array1, IxDyn};

    use super::*;
    use crate::engine::{EngineError, NamedInput};
    use crate::preprocess::ResizeFilter;

    /// Records input shapes; returns the sum of the input as a 1-element tensor.
    #[derive(Default)]
    struct Recording {
        shapes: Mutex<Vec<(String, Vec<usize>)>>,
    }

    impl InferenceEngine for Recording {
        fn run(&self, inputs: &[NamedInput<'_>]) -> Result<Vec<Tensor>, EngineError> {
            let mut shapes = self.shapes.lock().unwrap();
            for (name, t) in inputs {
                shapes.push(((*name).to_owned(), t.shape().to_vec()));
            }
            let sum: f32 = inputs.iter().map(|(_, t)| t.sum()).sum();
            Ok(vec![Array1::from(vec![sum]).into_dyn()])
        }
    }

    struct Failing;

    impl InferenceEngine for Failing {
        fn run(&self, _inputs: &[NamedInput<'_>]) -> Result<Vec<Tensor>, EngineError> {
            Err("out of memory".into())
        }
    }

    struct Silent;

    impl InferenceEngine for Silent {
        fn run(&self, _inputs: &[NamedInput<'_>]) -> Result<Vec<Tensor>, EngineError> {
            Ok(Vec::new())
        }
    }

    fn config() -> ModelConfig {
        ModelConfig {
            target_size: 32,
            resize_filter: ResizeFilter::Nearest,
            ..ModelConfig::default()
        }
    }

    #[test]
    fn encoder_receives_square_batched_input() {
        let engine = Arc::new(Recording::default());
        let computer = EmbeddingComputer::new(engine.clone(), config());
        let image = RgbImage::from_pixel(40, 20, image::Rgb([200, 100, 50]));
        let embedding = computer.compute(&image).unwrap();

        let shapes = engine.shapes.lock().unwrap();
        assert_eq!(shapes.as_slice(), &[("x".to_owned(), vec![1, 3, 32, 32])]);
        assert_eq!(
            embedding.source,
            Dimensions {
                width: 40,
                height: 20
            }
        );
        assert_eq!(embedding.tensor.shape(), &[1]);
    }

    #[test]
    fn compute_is_deterministic() {
        let computer = EmbeddingComputer::new(Arc::new(Recording::default()), config());
        let image = RgbImage::from_fn(40, 20, |x, y| image::Rgb([x as u8, y as u8, 7]));
        let a = computer.compute(&image).unwrap();
        let b = computer.compute(&image).unwrap();
        assert_eq!(a, b);
        assert!(a.tensor[IxDyn(&[0])].is_finite());
    }

    #[test]
    fn portrait_never_reaches_engine() {
        let engine = Arc::new(Recording::default());
        let computer = EmbeddingComputer::new(engine.clone(), config());
        let err = computer.compute(&RgbImage::new(20, 40)).unwrap_err();
        assert_eq!(
            err,
            SegmentError::InvalidAspect {
                width: 20,
                height: 40
            }
        );
        assert!(engine.shapes.lock().unwrap().is_empty());
    }

    #[test]
    fn engine_errors_are_tagged_encode() {
        let computer = EmbeddingComputer::new(Arc::new(Failing), config());
        let err = computer.compute(&RgbImage::new(40, 20)).unwrap_err();
        assert_eq!(err, SegmentError::engine(Stage::Encode, "out of memory"));
    }

    #[test]
    fn missing_output_is_an_engine_failure() {
        let computer = EmbeddingComputer::new(Arc::new(Silent), config());
        let err = computer.compute(&RgbImage::new(40, 20)).unwrap_err();
        assert!(matches!(
            err,
            SegmentError::EngineFailure {
                stage: Stage::Encode,
                ..
            }
        ));
    }
}
