//! Converts a validated request into an inference-engine call and a
//! populated response, or an `ErrorKind` on failure.
//!
//! The engine-reset workaround (spec §4.4 step 3, design notes §9 open
//! question (a)) is co-located here with the engine handle rather than
//! kept as a bare global, per §9 open question (b): if the engine is ever
//! replaced or the upstream leak fixed, `generation_performed` and the
//! `reset()` call below are the only things to delete.

use std::time::Instant;

use crate::engine::{EngineError, EngineParams, GenerationEngine};
use crate::wire::{DecodedRequest, ErrorKind, GenerationResponse};

const CLIP_BUF_CAPACITY: usize = 257; // 256 bytes + NUL terminator

/// Owns the "has a generation completed yet" bit for one engine handle.
/// Negative prompts are not part of this surface (spec §4.4 step 2).
pub struct GenerationPipeline {
    generation_performed: bool,
}

impl GenerationPipeline {
    pub fn new() -> Self {
        GenerationPipeline { generation_performed: false }
    }

    /// Run one request through `engine`, returning an owned response
    /// buffer (pixel bytes already validated against the request) or an
    /// `ErrorKind` to report to the peer.
    pub fn run<E: GenerationEngine>(
        &mut self,
        engine: &mut E,
        request: &DecodedRequest<'_>,
    ) -> Result<(Vec<u8>, u32, u32, u32, u32), ErrorKind> {
        let clip_l = request.span_bytes(request.clip_l);
        if clip_l.is_empty() || clip_l.len() > 256 {
            return Err(ErrorKind::InvalidPrompt);
        }
        // Local null-terminated copy, matching the engine's C-string contract.
        let mut clip_l_buf = Vec::with_capacity(CLIP_BUF_CAPACITY);
        clip_l_buf.extend_from_slice(clip_l);
        clip_l_buf.push(0);

        let params = EngineParams {
            clip_l_prompt: &clip_l_buf[..clip_l_buf.len() - 1],
            width: request.width,
            height: request.height,
            steps: request.steps,
            cfg_scale: request.cfg_scale,
            seed: request.seed,
        };

        // Works around a leak in the engine's compute scratch buffers between
        // calls on the same handle. Drop this branch and the flag entirely
        // if the engine is ever replaced or the leak is fixed upstream.
        if self.generation_performed {
            engine.reset().map_err(map_engine_error)?;
        }

        let start = Instant::now();
        let image = engine.generate(&params).map_err(map_engine_error)?;
        let elapsed_ms = start.elapsed().as_millis().min(u32::MAX as u128) as u32;
        self.generation_performed = true;

        if image.width != request.width || image.height != request.height {
            return Err(ErrorKind::Internal);
        }
        if image.channels != 3 && image.channels != 4 {
            return Err(ErrorKind::Internal);
        }
        if image.bytes.len() as u64 > u32::MAX as u64 {
            return Err(ErrorKind::Internal);
        }

        Ok((image.bytes, image.width, image.height, image.channels, elapsed_ms))
    }
}

impl Default for GenerationPipeline {
    fn default() -> Self {
        Self::new()
    }
}

fn map_engine_error(err: EngineError) -> ErrorKind {
    match err {
        EngineError::InvalidParameter => ErrorKind::InvalidPrompt,
        EngineError::OutOfMemory => ErrorKind::OutOfMemory,
        EngineError::Gpu => ErrorKind::GpuError,
        EngineError::Other => ErrorKind::Internal,
    }
}

/// Build the wire response from a pipeline result. Split from `run` so
/// callers can log the pixel buffer's provenance before it is consumed by
/// the encoder.
pub fn build_response<'a>(
    request: &DecodedRequest<'_>,
    elapsed_ms: u32,
    channels: u32,
    image_bytes: &'a [u8],
) -> GenerationResponse<'a> {
    GenerationResponse::from_request(request, elapsed_ms, channels, image_bytes)
}
