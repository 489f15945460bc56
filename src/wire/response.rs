//! Encoding a generation response frame.

use super::header::{FrameHeader, HEADER_LEN, KIND_RESPONSE, MAX_FRAME_LEN};
use super::kind::ErrorKind;
use super::request::DecodedRequest;

const MIN_DIM: u32 = 64;
const MAX_DIM: u32 = 2048;
const DIM_ALIGNMENT: u32 = 64;
const COMMON_FIELDS_LEN: usize = 16; // request_id(8) + status(4) + generation_time_ms(4)
const IMAGE_META_LEN: usize = 16; // width(4) + height(4) + channels(4) + image_byte_length(4)

/// A populated generation response ready to be encoded.
pub struct GenerationResponse<'a> {
    pub request_id: u64,
    pub status: u32,
    pub generation_time_ms: u32,
    pub width: u32,
    pub height: u32,
    pub channels: u32,
    pub image_bytes: &'a [u8],
}

impl<'a> GenerationResponse<'a> {
    /// Build a response echoing the dimensions of the originating request.
    pub fn from_request(
        request: &DecodedRequest<'_>,
        generation_time_ms: u32,
        channels: u32,
        image_bytes: &'a [u8],
    ) -> Self {
        GenerationResponse {
            request_id: request.request_id,
            status: 200,
            generation_time_ms,
            width: request.width,
            height: request.height,
            channels,
            image_bytes,
        }
    }
}

fn validate_dimension(value: u32) -> bool {
    (MIN_DIM..=MAX_DIM).contains(&value) && value % DIM_ALIGNMENT == 0
}

/// Encode `response` into `buf`, returning the number of bytes written.
///
/// Validates dimensions, channel count, and that `width * height * channels`
/// (computed in 64-bit to detect 32-bit overflow) equals the supplied image
/// byte length, per spec. `buf` must be at least as long as the frame;
/// callers size it from `required_len` first.
pub fn encode_response(response: &GenerationResponse<'_>, buf: &mut [u8]) -> Result<usize, ErrorKind> {
    if !validate_dimension(response.width) || !validate_dimension(response.height) {
        return Err(ErrorKind::InvalidDimensions);
    }
    if response.channels != 3 && response.channels != 4 {
        return Err(ErrorKind::InvalidDimensions);
    }

    let expected_len = (response.width as u64) * (response.height as u64) * (response.channels as u64);
    if expected_len > u32::MAX as u64 {
        return Err(ErrorKind::InvalidDimensions);
    }
    if expected_len != response.image_bytes.len() as u64 {
        return Err(ErrorKind::InvalidDimensions);
    }

    let payload_len = COMMON_FIELDS_LEN + IMAGE_META_LEN + response.image_bytes.len();
    let frame_len = HEADER_LEN + payload_len;
    if frame_len > MAX_FRAME_LEN {
        return Err(ErrorKind::Internal);
    }
    if buf.len() < frame_len {
        return Err(ErrorKind::Internal);
    }

    let header = FrameHeader {
        magic: super::header::MAGIC,
        version: super::header::VERSION,
        kind: KIND_RESPONSE,
        payload_len: payload_len as u32,
        reserved: 0,
    };
    header.write_into(&mut buf[..HEADER_LEN]);

    let mut pos = HEADER_LEN;
    buf[pos..pos + 8].copy_from_slice(&response.request_id.to_be_bytes());
    pos += 8;
    buf[pos..pos + 4].copy_from_slice(&response.status.to_be_bytes());
    pos += 4;
    buf[pos..pos + 4].copy_from_slice(&response.generation_time_ms.to_be_bytes());
    pos += 4;
    buf[pos..pos + 4].copy_from_slice(&response.width.to_be_bytes());
    pos += 4;
    buf[pos..pos + 4].copy_from_slice(&response.height.to_be_bytes());
    pos += 4;
    buf[pos..pos + 4].copy_from_slice(&response.channels.to_be_bytes());
    pos += 4;
    buf[pos..pos + 4].copy_from_slice(&(response.image_bytes.len() as u32).to_be_bytes());
    pos += 4;
    buf[pos..pos + response.image_bytes.len()].copy_from_slice(response.image_bytes);
    pos += response.image_bytes.len();

    Ok(pos)
}

/// The number of bytes `encode_response` will need for this response.
pub fn required_len(image_byte_len: usize) -> usize {
    HEADER_LEN + COMMON_FIELDS_LEN + IMAGE_META_LEN + image_byte_len
}
