//! The inference capability seam.
//!
//! Encoder and decoder are both opaque models reached through
//! [`InferenceEngine`]. A backend (ONNX Runtime, a remote service, a test
//! stub returning fixed tensors) implements the trait and is injected
//! into a [`Session`](crate::Session); nothing else in this crate knows
//! which runtime is behind it.

use ndarray::{ArrayD, ArrayViewD};

/// Error type returned by inference backends.
pub type EngineError = Box<dyn std::error::Error + Send + Sync>;

/// A dense `f32` tensor as produced by an engine.
pub type Tensor = ArrayD<f32>;

/// One named input, borrowed for the duration of a call.
pub type NamedInput<'a> = (&'a str, ArrayViewD<'a, f32>);

/// A synchronous, deterministic model invocation.
///
/// Implementations are called from background embedding threads and from
/// the caller's thread. An encoder may see overlapping calls when a new
/// image is set while an older one is still being encoded.
pub trait InferenceEngine: Send + Sync {
    /// Run the model on `inputs`, returning outputs in model order.
    ///
    /// # Errors
    ///
    /// Any backend fault: missing inputs, shape mismatches, runtime
    /// errors.
    fn run(&self, inputs: &[NamedInput<'_>]) -> Result<Vec<Tensor>, EngineError>;
}

impl<T: InferenceEngine + ?Sized> InferenceEngine for std::sync::Arc<T> {
    fn run(&self, inputs: &[NamedInput<'_>]) -> Result<Vec<Tensor>, EngineError> {
        (**self).run(inputs)
    }
}

/// Look up a named input, for engines that dispatch on names.
#[must_use]
pub fn input<'s, 'a>(inputs: &'s [NamedInput<'a>], name: &str) -> Option<&'s ArrayViewD<'a, f32>> {
    inputs.iter().find(|(n, _)| *n == name).map(|(_, t)| t)
}
