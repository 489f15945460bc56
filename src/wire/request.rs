//! Decoding and validating a generation request frame.

use super::header::{FrameHeader, HEADER_LEN, KIND_REQUEST, MAX_PAYLOAD_LEN};
use super::kind::ErrorKind;

const METADATA_LEN: usize = 12;
const PARAMS_LEN: usize = 48;
const MIN_PAYLOAD_LEN: usize = METADATA_LEN + PARAMS_LEN;

const MIN_DIM: u32 = 64;
const MAX_DIM: u32 = 2048;
const DIM_ALIGNMENT: u32 = 64;
const MIN_STEPS: u32 = 1;
const MAX_STEPS: u32 = 100;
const MAX_CFG: f32 = 20.0;
const MIN_PROMPT_LEN: u32 = 1;
const MAX_PROMPT_LEN: u32 = 256;

/// One (offset, length) pair naming a sub-slice of the prompt region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromptSpan {
    pub offset: u32,
    pub length: u32,
}

/// A fully validated generation request. The prompt region is borrowed
/// from the buffer that was decoded; the struct cannot outlive it.
#[derive(Debug, PartialEq)]
pub struct DecodedRequest<'a> {
    pub request_id: u64,
    pub model_id: u32,
    pub width: u32,
    pub height: u32,
    pub steps: u32,
    pub cfg_scale: f32,
    pub seed: u64,
    pub clip_l: PromptSpan,
    pub clip_g: PromptSpan,
    pub t5: PromptSpan,
    prompt_region: &'a [u8],
}

impl<'a> DecodedRequest<'a> {
    /// The bytes named by a validated span. Panics only if `span` was not
    /// produced by this struct's own validation (never true for callers
    /// that only use the `clip_l`/`clip_g`/`t5` fields).
    pub fn span_bytes(&self, span: PromptSpan) -> &'a [u8] {
        let start = span.offset as usize;
        let end = start + span.length as usize;
        &self.prompt_region[start..end]
    }
}

fn validate_dimension(value: u32) -> bool {
    (MIN_DIM..=MAX_DIM).contains(&value) && value % DIM_ALIGNMENT == 0
}

fn validate_span(span: PromptSpan, region_len: u32) -> Result<(), ErrorKind> {
    if !(MIN_PROMPT_LEN..=MAX_PROMPT_LEN).contains(&span.length) {
        return Err(ErrorKind::InvalidPrompt);
    }
    if span.offset > region_len {
        return Err(ErrorKind::InvalidPrompt);
    }
    // region_len - offset cannot underflow: offset <= region_len was just checked.
    if span.length > region_len - span.offset {
        return Err(ErrorKind::InvalidPrompt);
    }
    Ok(())
}

/// Decode and validate a request frame from `buf`.
///
/// `buf` must contain the full frame (16-byte header plus payload); any
/// trailing bytes beyond the declared payload length are ignored. On
/// success, the returned `DecodedRequest` borrows its prompt region from
/// `buf`.
pub fn decode_request(buf: &[u8]) -> Result<DecodedRequest<'_>, ErrorKind> {
    let header = FrameHeader::parse(buf)?;
    header.validate(KIND_REQUEST)?;

    let payload_len = header.payload_len as usize;
    if payload_len > MAX_PAYLOAD_LEN || buf.len() < HEADER_LEN + payload_len {
        return Err(ErrorKind::Internal);
    }
    if payload_len < MIN_PAYLOAD_LEN {
        return Err(ErrorKind::Internal);
    }

    let payload = &buf[HEADER_LEN..HEADER_LEN + payload_len];

    let request_id = u64::from_be_bytes(payload[0..8].try_into().unwrap());
    let model_id = u32::from_be_bytes(payload[8..12].try_into().unwrap());
    if model_id != 0 {
        return Err(ErrorKind::InvalidModelId);
    }

    let params = &payload[METADATA_LEN..METADATA_LEN + PARAMS_LEN];
    let width = u32::from_be_bytes(params[0..4].try_into().unwrap());
    let height = u32::from_be_bytes(params[4..8].try_into().unwrap());
    let steps = u32::from_be_bytes(params[8..12].try_into().unwrap());
    let cfg_bits = u32::from_be_bytes(params[12..16].try_into().unwrap());
    let cfg_scale = f32::from_bits(cfg_bits);
    let seed = u64::from_be_bytes(params[16..24].try_into().unwrap());
    let clip_l = PromptSpan {
        offset: u32::from_be_bytes(params[24..28].try_into().unwrap()),
        length: u32::from_be_bytes(params[28..32].try_into().unwrap()),
    };
    let clip_g = PromptSpan {
        offset: u32::from_be_bytes(params[32..36].try_into().unwrap()),
        length: u32::from_be_bytes(params[36..40].try_into().unwrap()),
    };
    let t5 = PromptSpan {
        offset: u32::from_be_bytes(params[40..44].try_into().unwrap()),
        length: u32::from_be_bytes(params[44..48].try_into().unwrap()),
    };

    if !validate_dimension(width) || !validate_dimension(height) {
        return Err(ErrorKind::InvalidDimensions);
    }
    if !(MIN_STEPS..=MAX_STEPS).contains(&steps) {
        return Err(ErrorKind::InvalidSteps);
    }
    if !cfg_scale.is_finite() || !(0.0..=MAX_CFG).contains(&cfg_scale) {
        return Err(ErrorKind::InvalidCfg);
    }

    let prompt_region = &payload[MIN_PAYLOAD_LEN..];
    let region_len = prompt_region.len() as u32;
    validate_span(clip_l, region_len)?;
    validate_span(clip_g, region_len)?;
    validate_span(t5, region_len)?;

    Ok(DecodedRequest {
        request_id,
        model_id,
        width,
        height,
        steps,
        cfg_scale,
        seed,
        clip_l,
        clip_g,
        t5,
        prompt_region,
    })
}
