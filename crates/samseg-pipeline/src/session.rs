//! Session context: the current image and its memoized embedding.
//!
//! [`Session::set_image`] stores the image and starts the encoder on a
//! background thread. [`Session::request_polygon`] joins that computation
//! and decodes the prompts against the finished embedding.
//!
//! # Generations
//!
//! Every `set_image` call allocates a new generation id. The embedding
//! slot is only ever written under the session lock, and only by a
//! computation whose generation is still current. A slow encode for an
//! older image runs to completion and its result is dropped on arrival,
//! so once the slot is ready its generation always matches the latest
//! `set_image`.
//!
//! Each generation owns one [`EmbeddingTask`]: a single-assignment cell
//! that waiters block on. Superseded tasks are simply never waited on
//! again.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

use parking_lot::{Condvar, Mutex};

use crate::decoder::PolygonDecoder;
use crate::encoder::{Embedding, EmbeddingComputer};
use crate::engine::InferenceEngine;
use crate::types::{Dimensions, ModelConfig, Point, Polygon, RgbImage, SegmentError, Stage};

type Outcome = Result<Arc<Embedding>, SegmentError>;

/// Observable state of the embedding slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingState {
    /// No image has been set.
    Empty,
    /// The last image was rejected by the aspect check.
    Rejected,
    /// An image is set but nothing has been computed yet.
    Deferred,
    /// The encoder is running.
    Computing,
    /// The embedding for the current generation is cached.
    Ready,
    /// The encoder failed for the current image; requests report its
    /// error until a new image is set.
    Failed,
}

/// A click-to-polygon segmentation session over one image at a time.
///
/// Cloning is cheap and shares the same image and cache, so a UI thread
/// and a worker can both hold the session.
#[derive(Clone)]
pub struct Session {
    shared: Arc<Shared>,
}

struct Shared {
    encoder: EmbeddingComputer,
    decoder: PolygonDecoder,
    background: bool,
    state: Mutex<State>,
}

struct State {
    generation: u64,
    image: Option<Arc<RgbImage>>,
    slot: Slot,
}

enum Slot {
    Empty,
    Rejected(SegmentError),
    Deferred,
    Pending(Arc<EmbeddingTask>),
    Ready {
        generation: u64,
        embedding: Arc<Embedding>,
    },
    Failed(SegmentError),
}

/// What a caller has to do to obtain the embedding, decided under the lock.
enum Ticket {
    Ready(Arc<Embedding>),
    Wait(Arc<EmbeddingTask>),
    Compute(Arc<EmbeddingTask>),
}

/// Single-assignment completion cell for one generation's embedding.
struct EmbeddingTask {
    generation: u64,
    outcome: Mutex<Option<Outcome>>,
    done: Condvar,
}

impl EmbeddingTask {
    fn new(generation: u64) -> Arc<Self> {
        Arc::new(Self {
            generation,
            outcome: Mutex::new(None),
            done: Condvar::new(),
        })
    }

    fn complete(&self, outcome: Outcome) {
        let mut slot = self.outcome.lock();
        if slot.is_none() {
            *slot = Some(outcome);
        }
        drop(slot);
        self.done.notify_all();
    }

    fn wait(&self) -> Outcome {
        let mut slot = self.outcome.lock();
        loop {
            if let Some(outcome) = slot.as_ref() {
                return outcome.clone();
            }
            self.done.wait(&mut slot);
        }
    }
}

impl Session {
    /// Create a session from encoder and decoder engines.
    ///
    /// # Errors
    ///
    /// Returns [`SegmentError::InvalidConfig`] if `config` fails
    /// [`ModelConfig::validate`].
    pub fn new(
        encoder: Arc<dyn InferenceEngine>,
        decoder: Arc<dyn InferenceEngine>,
        config: ModelConfig,
    ) -> Result<Self, SegmentError> {
        config.validate()?;
        let background = config.background_embedding;
        Ok(Self {
            shared: Arc::new(Shared {
                encoder: EmbeddingComputer::new(encoder, config.clone()),
                decoder: PolygonDecoder::new(decoder, config),
                background,
                state: Mutex::new(State {
                    generation: 0,
                    image: None,
                    slot: Slot::Empty,
                }),
            }),
        })
    }

    /// Replace the current image and start computing its embedding.
    ///
    /// Returns without waiting for the encoder. A computation still
    /// running for a previous image is left alone; its result will be
    /// discarded.
    ///
    /// # Errors
    ///
    /// Returns [`SegmentError::InvalidAspect`] if the image is not wider
    /// than tall. The previous image is cleared in that case and later
    /// requests report the same error until a valid image is set.
    pub fn set_image(&self, image: RgbImage) -> Result<(), SegmentError> {
        let dimensions = Dimensions::of(&image);
        let mut state = self.shared.state.lock();
        state.generation += 1;
        let generation = state.generation;

        if let Err(err) = dimensions.check_aspect() {
            tracing::debug!(generation, ?dimensions, "rejected image");
            state.image = None;
            state.slot = Slot::Rejected(err.clone());
            return Err(err);
        }

        let image = Arc::new(image);
        state.image = Some(Arc::clone(&image));
        tracing::info!(
            generation,
            width = dimensions.width,
            height = dimensions.height,
            "image set"
        );

        if !self.shared.background {
            state.slot = Slot::Deferred;
            return Ok(());
        }

        // Spawn under the lock so no caller can start waiting on a task
        // that never gets a worker.
        let task = EmbeddingTask::new(generation);
        match self.spawn_worker(image, Arc::clone(&task)) {
            Ok(()) => state.slot = Slot::Pending(task),
            Err(err) => {
                tracing::warn!(generation, %err, "could not spawn embedding worker; deferring");
                state.slot = Slot::Deferred;
            }
        }
        Ok(())
    }

    /// The embedding for the current image, waiting for it if necessary.
    ///
    /// Blocks until the background computation finishes, or computes on
    /// this thread if none was started. Later calls return the cached
    /// value without running the encoder again.
    ///
    /// # Errors
    ///
    /// Returns [`SegmentError::NotReady`] if no image was set,
    /// [`SegmentError::InvalidAspect`] if the last image was rejected, and
    /// the encoder's [`SegmentError::EngineFailure`] if it failed.
    pub fn get_embedding(&self) -> Result<Arc<Embedding>, SegmentError> {
        let (image, ticket) = self.acquire()?;
        self.resolve(&image, ticket)
    }

    /// Turn foreground clicks into a polygon around the clicked object.
    ///
    /// # Errors
    ///
    /// - [`SegmentError::EmptyPrompt`] if `points` is empty
    /// - [`SegmentError::NotReady`] if no image was set
    /// - [`SegmentError::InvalidAspect`] if the last image was rejected
    /// - [`SegmentError::NoContourFound`] if the decoded mask is empty
    /// - [`SegmentError::EngineFailure`] if either model fails
    pub fn request_polygon(&self, points: &[Point]) -> Result<Polygon, SegmentError> {
        if points.is_empty() {
            return Err(SegmentError::EmptyPrompt);
        }
        // Image and embedding are taken from the same generation, even if
        // another image is set while we wait.
        let (image, ticket) = self.acquire()?;
        let embedding = self.resolve(&image, ticket)?;
        self.shared
            .decoder
            .decode(&embedding, points, Dimensions::of(&image))
    }

    /// Generation id of the most recent `set_image` call (0 before any).
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.shared.state.lock().generation
    }

    /// Current state of the embedding slot.
    #[must_use]
    pub fn embedding_state(&self) -> EmbeddingState {
        match self.shared.state.lock().slot {
            Slot::Empty => EmbeddingState::Empty,
            Slot::Rejected(_) => EmbeddingState::Rejected,
            Slot::Deferred => EmbeddingState::Deferred,
            Slot::Pending(_) => EmbeddingState::Computing,
            Slot::Ready { .. } => EmbeddingState::Ready,
            Slot::Failed(_) => EmbeddingState::Failed,
        }
    }

    /// Generation the cached embedding belongs to, once it is ready.
    #[must_use]
    pub fn embedding_generation(&self) -> Option<u64> {
        match self.shared.state.lock().slot {
            Slot::Ready { generation, .. } => Some(generation),
            _ => None,
        }
    }

    /// The model constants in use.
    #[must_use]
    pub fn config(&self) -> &ModelConfig {
        self.shared.encoder.config()
    }

    fn spawn_worker(&self, image: Arc<RgbImage>, task: Arc<EmbeddingTask>) -> std::io::Result<()> {
        let shared = Arc::clone(&self.shared);
        thread::Builder::new()
            .name(format!("samseg-embed-{}", task.generation))
            .spawn(move || {
                tracing::debug!(generation = task.generation, "embedding worker started");
                let outcome = shared.compute(&image);
                shared.publish(&task, outcome);
            })?;
        Ok(())
    }

    fn acquire(&self) -> Result<(Arc<RgbImage>, Ticket), SegmentError> {
        let mut state = self.shared.state.lock();
        let generation = state.generation;

        let ticket = if matches!(state.slot, Slot::Deferred) {
            let task = EmbeddingTask::new(generation);
            state.slot = Slot::Pending(Arc::clone(&task));
            Ticket::Compute(task)
        } else {
            match &state.slot {
                Slot::Empty | Slot::Deferred => return Err(SegmentError::NotReady),
                Slot::Rejected(err) | Slot::Failed(err) => return Err(err.clone()),
                Slot::Pending(task) => Ticket::Wait(Arc::clone(task)),
                Slot::Ready { embedding, .. } => Ticket::Ready(Arc::clone(embedding)),
            }
        };

        let image = state.image.clone().ok_or(SegmentError::NotReady)?;
        Ok((image, ticket))
    }

    fn resolve(&self, image: &RgbImage, ticket: Ticket) -> Outcome {
        match ticket {
            Ticket::Ready(embedding) => Ok(embedding),
            Ticket::Wait(task) => task.wait(),
            Ticket::Compute(task) => {
                let outcome = self.shared.compute(image);
                self.shared.publish(&task, outcome.clone());
                outcome
            }
        }
    }
}

impl Shared {
    /// Run the encoder, turning a panic into an encode failure so that
    /// waiters are always released.
    fn compute(&self, image: &RgbImage) -> Outcome {
        panic::catch_unwind(AssertUnwindSafe(|| self.encoder.compute(image)))
            .unwrap_or_else(|_| Err(SegmentError::engine(Stage::Encode, "encoder panicked")))
            .map(Arc::new)
    }

    /// Store a finished computation if its generation is still current,
    /// then release everyone waiting on the task.
    fn publish(&self, task: &Arc<EmbeddingTask>, outcome: Outcome) {
        {
            let mut state = self.state.lock();
            let current = matches!(&state.slot, Slot::Pending(pending) if Arc::ptr_eq(pending, task));
            if !current {
                tracing::debug!(
                    generation = task.generation,
                    current = state.generation,
                    "discarding stale embedding"
                );
            } else {
                match &outcome {
                    Ok(embedding) => {
                        state.slot = Slot::Ready {
                            generation: task.generation,
                            embedding: Arc::clone(embedding),
                        };
                    }
                    Err(err) => {
                        tracing::debug!(generation = task.generation, %err, "embedding failed");
                        state.slot = Slot::Failed(err.clone());
                    }
                }
            }
        }
        task.complete(outcome);
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("generation", &self.generation())
            .field("embedding_state", &self.embedding_state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::time::{Duration, Instant};

    use ndarray::{Array1, ArrayD, IxDyn};

    use super::*;
    use crate::engine::{EngineError, NamedInput, Tensor, input};
    use crate::preprocess::ResizeFilter;

    /// Returns the first normalized input value; the first call can be
    /// held until the test releases it.
    #[derive(Default)]
    struct GatedEncoder {
        calls: AtomicUsize,
        returned: AtomicUsize,
        gate: std::sync::Mutex<Option<mpsc::Receiver<()>>>,
    }

    impl InferenceEngine for GatedEncoder {
        fn run(&self, inputs: &[NamedInput<'_>]) -> Result<Vec<Tensor>, EngineError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call == 0 {
                let gate = self.gate.lock().unwrap().take();
                if let Some(rx) = gate {
                    rx.recv().ok();
                }
            }
            let x = input(inputs, "x").ok_or("missing x")?;
            let value = x[IxDyn(&[0, 0, 0, 0])];
            self.returned.fetch_add(1, Ordering::SeqCst);
            Ok(vec![Array1::from(vec![value]).into_dyn()])
        }
    }

    struct Panicking;

    impl InferenceEngine for Panicking {
        #[allow(clippy::panic)]
        fn run(&self, _inputs: &[NamedInput<'_>]) -> Result<Vec<Tensor>, EngineError> {
            panic!("encoder exploded");
        }
    }

    struct Failing(AtomicUsize);

    impl InferenceEngine for Failing {
        fn run(&self, _inputs: &[NamedInput<'_>]) -> Result<Vec<Tensor>, EngineError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Err("device lost".into())
        }
    }

    struct NoDecoder;

    impl InferenceEngine for NoDecoder {
        fn run(&self, _inputs: &[NamedInput<'_>]) -> Result<Vec<Tensor>, EngineError> {
            Ok(vec![ArrayD::zeros(IxDyn(&[0]))])
        }
    }

    fn config() -> ModelConfig {
        ModelConfig {
            target_size: 16,
            resize_filter: ResizeFilter::Nearest,
            ..ModelConfig::default()
        }
    }

    fn image(red: u8) -> RgbImage {
        RgbImage::from_pixel(32, 16, image::Rgb([red, 0, 0]))
    }

    fn normalized_red(red: u8) -> f32 {
        let c = ModelConfig::default();
        (f32::from(red) - c.pixel_mean[0]) / c.pixel_std[0]
    }

    #[test]
    fn stale_embedding_never_replaces_newer_image() {
        let (release, gate) = mpsc::channel();
        let encoder = Arc::new(GatedEncoder {
            gate: std::sync::Mutex::new(Some(gate)),
            ..GatedEncoder::default()
        });
        let session = Session::new(encoder.clone(), Arc::new(NoDecoder), config()).unwrap();

        session.set_image(image(10)).unwrap();
        // Wait until the first worker is parked inside the encoder.
        let deadline = Instant::now() + Duration::from_secs(5);
        while encoder.calls.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }

        session.set_image(image(200)).unwrap();
        let embedding = session.get_embedding().unwrap();
        assert!((embedding.tensor[IxDyn(&[0])] - normalized_red(200)).abs() < 1e-6);
        assert_eq!(session.embedding_generation(), Some(2));

        release.send(()).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while encoder.returned.load(Ordering::SeqCst) < 2 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        thread::sleep(Duration::from_millis(50));

        assert_eq!(session.embedding_generation(), Some(2));
        let embedding = session.get_embedding().unwrap();
        assert!((embedding.tensor[IxDyn(&[0])] - normalized_red(200)).abs() < 1e-6);
        assert_eq!(encoder.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn deferred_mode_computes_once_on_first_request() {
        let encoder = Arc::new(GatedEncoder::default());
        let config = ModelConfig {
            background_embedding: false,
            ..config()
        };
        let session = Session::new(encoder.clone(), Arc::new(NoDecoder), config).unwrap();
        session.set_image(image(50)).unwrap();
        assert_eq!(session.embedding_state(), EmbeddingState::Deferred);
        assert_eq!(encoder.calls.load(Ordering::SeqCst), 0);

        let first = session.get_embedding().unwrap();
        let second = session.get_embedding().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(encoder.calls.load(Ordering::SeqCst), 1);
        assert_eq!(session.embedding_state(), EmbeddingState::Ready);
    }

    #[test]
    fn concurrent_waiters_share_one_computation() {
        let encoder = Arc::new(GatedEncoder::default());
        let session = Session::new(encoder.clone(), Arc::new(NoDecoder), config()).unwrap();
        session.set_image(image(90)).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let session = session.clone();
                thread::spawn(move || session.get_embedding().unwrap())
            })
            .collect();
        let embeddings: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(encoder.calls.load(Ordering::SeqCst), 1);
        assert!(embeddings.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }

    #[test]
    fn encoder_panic_is_reported_not_hung() {
        let session = Session::new(Arc::new(Panicking), Arc::new(NoDecoder), config()).unwrap();
        session.set_image(image(1)).unwrap();
        assert_eq!(
            session.get_embedding().unwrap_err(),
            SegmentError::engine(Stage::Encode, "encoder panicked")
        );
        assert_eq!(session.embedding_state(), EmbeddingState::Failed);
    }

    #[test]
    fn new_image_after_failure_retries_encoder() {
        let encoder = Arc::new(Failing(AtomicUsize::new(0)));
        let session = Session::new(encoder.clone(), Arc::new(NoDecoder), config()).unwrap();
        session.set_image(image(1)).unwrap();
        assert!(session.get_embedding().is_err());
        assert_eq!(session.embedding_state(), EmbeddingState::Failed);

        session.set_image(image(2)).unwrap();
        assert!(session.get_embedding().is_err());
        assert_eq!(encoder.0.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn encoder_failure_is_memoized_per_image() {
        let encoder = Arc::new(Failing(AtomicUsize::new(0)));
        let session = Session::new(encoder.clone(), Arc::new(NoDecoder), config()).unwrap();
        session.set_image(image(1)).unwrap();

        let expected = SegmentError::engine(Stage::Encode, "device lost");
        assert_eq!(session.get_embedding().unwrap_err(), expected);
        assert_eq!(session.get_embedding().unwrap_err(), expected);
        assert_eq!(
            session.request_polygon(&[Point::new(1.0, 1.0)]).unwrap_err(),
            expected
        );
        assert_eq!(encoder.0.load(Ordering::SeqCst), 1);
        assert_eq!(session.embedding_state(), EmbeddingState::Failed);
        assert_eq!(session.embedding_generation(), None);
    }

    #[test]
    fn rejected_image_clears_previous_one() {
        let encoder = Arc::new(GatedEncoder::default());
        let session = Session::new(encoder.clone(), Arc::new(NoDecoder), config()).unwrap();
        session.set_image(image(1)).unwrap();
        session.get_embedding().unwrap();

        let err = session.set_image(RgbImage::new(16, 32)).unwrap_err();
        assert!(matches!(err, SegmentError::InvalidAspect { .. }));
        assert_eq!(session.embedding_state(), EmbeddingState::Rejected);
        assert_eq!(session.get_embedding().unwrap_err(), err);
        assert_eq!(session.generation(), 2);
        assert_eq!(encoder.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn invalid_config_is_rejected_at_construction() {
        let config = ModelConfig {
            simplify_divisor: 0.0,
            ..config()
        };
        assert!(matches!(
            Session::new(Arc::new(NoDecoder), Arc::new(NoDecoder), config),
            Err(SegmentError::InvalidConfig(_))
        ));
    }

    #[test]
    fn empty_prompt_is_rejected_before_waiting() {
        let session =
            Session::new(Arc::new(GatedEncoder::default()), Arc::new(NoDecoder), config()).unwrap();
        assert_eq!(
            session.request_polygon(&[]).unwrap_err(),
            SegmentError::EmptyPrompt
        );
    }
}
