//! Encoding an error frame.

use super::header::{FrameHeader, HEADER_LEN, KIND_ERROR, MAX_FRAME_LEN};
use super::kind::ErrorKind;

const FIXED_FIELDS_LEN: usize = 8 + 4 + 4 + 2; // request_id + status + error_kind + message_length
const MAX_MESSAGE_LEN: usize = u16::MAX as usize;

/// Encode an error frame for `kind` into `buf`, returning the number of
/// bytes written. `request_id` is 0 if no trusted request id was parsed.
/// `message` is truncated to `MAX_MESSAGE_LEN` bytes; an empty or absent
/// message is accepted.
pub fn encode_error(
    request_id: u64,
    kind: ErrorKind,
    message: &str,
    buf: &mut [u8],
) -> Result<usize, ErrorKind> {
    let message_bytes = &message.as_bytes()[..message.len().min(MAX_MESSAGE_LEN)];
    let payload_len = FIXED_FIELDS_LEN + message_bytes.len();
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
        kind: KIND_ERROR,
        payload_len: payload_len as u32,
        reserved: 0,
    };
    header.write_into(&mut buf[..HEADER_LEN]);

    let mut pos = HEADER_LEN;
    buf[pos..pos + 8].copy_from_slice(&request_id.to_be_bytes());
    pos += 8;
    buf[pos..pos + 4].copy_from_slice(&kind.status().to_be_bytes());
    pos += 4;
    buf[pos..pos + 4].copy_from_slice(&kind.wire_code().to_be_bytes());
    pos += 4;
    buf[pos..pos + 2].copy_from_slice(&(message_bytes.len() as u16).to_be_bytes());
    pos += 2;
    buf[pos..pos + message_bytes.len()].copy_from_slice(message_bytes);
    pos += message_bytes.len();

    Ok(pos)
}

/// The number of bytes `encode_error` will need for this message.
pub fn required_len(message: &str) -> usize {
    HEADER_LEN + FIXED_FIELDS_LEN + message.len().min(MAX_MESSAGE_LEN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_request_id_status_and_kind() {
        let mut buf = vec![0u8; required_len("bad magic")];
        let written = encode_error(0, ErrorKind::InvalidMagic, "bad magic", &mut buf).unwrap();
        assert_eq!(written, buf.len());

        let header = FrameHeader::parse(&buf).unwrap();
        assert_eq!(header.kind, KIND_ERROR);

        let request_id = u64::from_be_bytes(buf[16..24].try_into().unwrap());
        assert_eq!(request_id, 0);
        let status = u32::from_be_bytes(buf[24..28].try_into().unwrap());
        assert_eq!(status, 400);
        let error_kind = u32::from_be_bytes(buf[28..32].try_into().unwrap());
        assert_eq!(error_kind, ErrorKind::InvalidMagic.wire_code());
        let message_len = u16::from_be_bytes(buf[32..34].try_into().unwrap());
        assert_eq!(message_len as usize, "bad magic".len());
        assert_eq!(&buf[34..34 + 9], b"bad magic");
    }

    #[test]
    fn empty_message_accepted() {
        let mut buf = vec![0u8; required_len("")];
        let written = encode_error(99, ErrorKind::Internal, "", &mut buf).unwrap();
        assert_eq!(written, buf.len());
    }

    #[test]
    fn buffer_too_small_is_internal() {
        let mut buf = vec![0u8; 2];
        assert_eq!(
            encode_error(0, ErrorKind::Internal, "x", &mut buf),
            Err(ErrorKind::Internal)
        );
    }
}
