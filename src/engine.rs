//! The inference engine interface. This crate owns only the contract; a
//! real production build links an embedded diffusion engine behind it.
//! `StubEngine` is the one test double used by the pipeline's own tests
//! and by the daemon binary when no GPU backend is configured.

/// One-for-one translation of the protocol's numeric parameters, minus
/// anything the pipeline already consumed (the prompt text is passed
/// separately as an owned, null-terminated buffer).
pub struct EngineParams<'a> {
    pub clip_l_prompt: &'a [u8],
    pub width: u32,
    pub height: u32,
    pub steps: u32,
    pub cfg_scale: f32,
    pub seed: u64,
}

/// A generated image, owned by the engine until transferred to the
/// response.
#[derive(Debug)]
pub struct EngineImage {
    pub width: u32,
    pub height: u32,
    pub channels: u32,
    pub bytes: Vec<u8>,
}

/// Failure modes the engine can report. Mapped to `wire::ErrorKind` by the
/// pipeline; never surfaced to a peer verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineError {
    InvalidParameter,
    OutOfMemory,
    Gpu,
    Other,
}

/// The fixed set of operations the pipeline needs from an inference
/// context. The engine commits to single-threaded use: no operation here
/// is safe to call concurrently with another on the same handle.
pub trait GenerationEngine {
    /// Run one generation. Blocking; unbounded wall time.
    fn generate(&mut self, params: &EngineParams<'_>) -> Result<EngineImage, EngineError>;

    /// Tear down and reload the handle, working around the engine's
    /// known compute-scratch-buffer leak between calls. See
    /// `pipeline::GenerationPipeline` for when this is invoked.
    fn reset(&mut self) -> Result<(), EngineError>;
}

/// A deterministic, GPU-free stand-in: returns a solid-color image sized
/// exactly to the request, varying the color with `seed` so tests can
/// distinguish outputs. Exercises the pipeline's full shape without any
/// model weights.
#[derive(Default)]
pub struct StubEngine {
    pub reset_count: u32,
}

impl GenerationEngine for StubEngine {
    fn generate(&mut self, params: &EngineParams<'_>) -> Result<EngineImage, EngineError> {
        if params.clip_l_prompt.is_empty() {
            return Err(EngineError::InvalidParameter);
        }
        let channels = 3u32;
        let pixel = (params.seed % 256) as u8;
        let len = params.width as usize * params.height as usize * channels as usize;
        Ok(EngineImage {
            width: params.width,
            height: params.height,
            channels,
            bytes: vec![pixel; len],
        })
    }

    fn reset(&mut self) -> Result<(), EngineError> {
        self.reset_count += 1;
        Ok(())
    }
}
