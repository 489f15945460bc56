//! Accept / request loop: server mode (owns the socket, one request per
//! connection model driven by repeated `accept`) and worker mode (one
//! already-connected socket, repeated requests on it).
//!
//! The handler contract classifies failures into two buckets that matter
//! for loop control: connection errors (short read/write) end the loop
//! immediately; protocol errors (malformed requests) report an error
//! frame and let the loop continue. A sloppy client can end its own
//! connection but never the server's or worker's lifetime.

use std::io::{self, Read, Write};
use std::os::unix::net::UnixStream;

use crate::engine::GenerationEngine;
use crate::pipeline::{build_response, GenerationPipeline};
use crate::shutdown::ShutdownFlag;
use crate::socket::{self, SocketEndpoint};
use crate::wire::{self, decode_request, encode_error, encode_response, ErrorKind};

/// What the per-connection handler tells the owning loop to do next.
#[derive(Debug, PartialEq, Eq)]
pub enum LoopSignal {
    /// Keep going: accept the next connection (server mode) or read the
    /// next request on this socket (worker mode).
    Continue,
    /// The peer is gone or unreachable; stop using this connection.
    Exit,
}

/// Run the server loop: accept connections, authenticate, set timeouts,
/// handle one request per connection, repeat until the shutdown flag is
/// observed.
pub fn run_server<E: GenerationEngine>(
    endpoint: &SocketEndpoint,
    engine: &mut E,
    shutdown: &ShutdownFlag,
) -> io::Result<()> {
    let mut pipeline = GenerationPipeline::new();
    while !shutdown.is_set() {
        let stream = match endpoint.accept() {
            Ok(stream) => stream,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                tracing::error!(error = %e, "accept failed");
                continue;
            }
        };

        if !authenticate_and_prepare(&stream) {
            continue;
        }

        if let Err(e) = handle_connection(&stream, engine, &mut pipeline) {
            tracing::warn!(error = %e, "connection error");
        }
    }
    Ok(())
}

/// Run the worker loop on an already-connected, already-authenticated
/// socket: repeat the handler until it signals exit or the shutdown flag
/// is set by a signal or the stdin monitor.
pub fn run_worker<E: GenerationEngine>(
    endpoint: &SocketEndpoint,
    engine: &mut E,
    shutdown: &ShutdownFlag,
) -> io::Result<()> {
    let stream = endpoint.connected_stream()?;
    socket::set_timeouts(&stream, socket::RECV_TIMEOUT, socket::SEND_TIMEOUT)?;

    let mut pipeline = GenerationPipeline::new();
    while !shutdown.is_set() {
        match handle_connection(&stream, engine, &mut pipeline) {
            Ok(LoopSignal::Continue) => continue,
            Ok(LoopSignal::Exit) => break,
            Err(e) => {
                tracing::warn!(error = %e, "connection error");
                break;
            }
        }
    }
    Ok(())
}

fn authenticate_and_prepare(stream: &UnixStream) -> bool {
    match socket::authenticate_peer(stream) {
        Ok(true) => {}
        Ok(false) => return false,
        Err(e) => {
            tracing::debug!(error = %e, "peer credential check failed");
            return false;
        }
    }
    if let Err(e) = socket::set_timeouts(stream, socket::RECV_TIMEOUT, socket::SEND_TIMEOUT) {
        tracing::warn!(error = %e, "failed to set connection timeouts");
        return false;
    }
    true
}

/// One request in, one reply out, per spec §4.3's six-step handler
/// contract.
fn handle_connection<E: GenerationEngine>(
    stream: &UnixStream,
    engine: &mut E,
    pipeline: &mut GenerationPipeline,
) -> io::Result<LoopSignal> {
    let mut reader = stream;
    let mut writer = stream;

    // Step 1: read the 16-byte header, retrying on interrupt.
    let mut header_buf = [0u8; wire::HEADER_LEN];
    if !read_exact_retrying(&mut reader, &mut header_buf)? {
        return Ok(LoopSignal::Exit);
    }

    // Step 2: parse magic and payload length without allocating.
    let header = match wire::FrameHeader::parse(&header_buf) {
        Ok(header) => header,
        Err(kind) => return respond_error(&mut writer, 0, kind, "malformed header"),
    };
    if header.magic != wire::MAGIC {
        return respond_error(&mut writer, 0, ErrorKind::InvalidMagic, "malformed header");
    }
    if header.payload_len as usize > wire::MAX_FRAME_LEN - wire::HEADER_LEN {
        return respond_error(&mut writer, 0, ErrorKind::Internal, "oversized payload");
    }

    // Step 3: allocate exactly header + payload, read the payload.
    let total_len = wire::HEADER_LEN + header.payload_len as usize;
    let mut frame = vec![0u8; total_len];
    frame[..wire::HEADER_LEN].copy_from_slice(&header_buf);
    if !read_exact_retrying(&mut reader, &mut frame[wire::HEADER_LEN..])? {
        return Ok(LoopSignal::Exit);
    }

    // Step 4: decode.
    let request = match decode_request(&frame) {
        Ok(request) => request,
        Err(kind) => return respond_error(&mut writer, 0, kind, "invalid request"),
    };
    let request_id = request.request_id;

    // Step 5: run the generation pipeline.
    let (image_bytes, _width, _height, channels, elapsed_ms) = match pipeline.run(engine, &request) {
        Ok(result) => result,
        Err(kind) => {
            if kind.status() == 500 {
                tracing::error!(request_id, ?kind, "generation failed");
            }
            return respond_error(&mut writer, request_id, kind, "generation failed");
        }
    };

    // Step 6: encode and write the response.
    let response = build_response(&request, elapsed_ms, channels, &image_bytes);
    let mut out = vec![0u8; wire::response::required_len(image_bytes.len())];
    let written = match encode_response(&response, &mut out) {
        Ok(written) => written,
        Err(kind) => return respond_error(&mut writer, request_id, kind, "failed to encode response"),
    };
    if writer.write_all(&out[..written]).is_err() {
        return Ok(LoopSignal::Exit);
    }

    Ok(LoopSignal::Continue)
}

/// Best-effort error reply: write failures here end the connection the
/// same as any other short write, but never panic the handler.
fn respond_error(writer: &mut &UnixStream, request_id: u64, kind: ErrorKind, message: &str) -> io::Result<LoopSignal> {
    let mut buf = vec![0u8; wire::error_frame::required_len(message)];
    if let Ok(written) = encode_error(request_id, kind, message, &mut buf) {
        let _ = writer.write_all(&buf[..written]);
    }
    Ok(LoopSignal::Continue)
}

/// Read exactly `buf.len()` bytes, retrying on `Interrupted`. Returns
/// `Ok(false)` if the peer closes before the buffer is full, whether that
/// happens before or after some bytes arrived — per the handler contract,
/// any short read is a dead connection, not a reportable protocol error.
/// Returns `Err` only for a genuine I/O error other than EOF.
fn read_exact_retrying(stream: &mut &UnixStream, buf: &mut [u8]) -> io::Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        match stream.read(&mut buf[filled..]) {
            Ok(0) => return Ok(false),
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::StubEngine;
    use crate::wire::header::{KIND_REQUEST, MAGIC, VERSION};
    use std::os::unix::net::UnixStream as StdStream;

    fn build_request_bytes(width: u32, height: u32, prompt: &str) -> Vec<u8> {
        let prompt_bytes = prompt.as_bytes();
        let payload_len = (12 + 48 + prompt_bytes.len()) as u32;
        let mut buf = Vec::new();
        buf.extend_from_slice(&MAGIC.to_be_bytes());
        buf.extend_from_slice(&VERSION.to_be_bytes());
        buf.extend_from_slice(&KIND_REQUEST.to_be_bytes());
        buf.extend_from_slice(&payload_len.to_be_bytes());
        buf.extend_from_slice(&0u32.to_be_bytes());
        buf.extend_from_slice(&12345u64.to_be_bytes());
        buf.extend_from_slice(&0u32.to_be_bytes());
        buf.extend_from_slice(&width.to_be_bytes());
        buf.extend_from_slice(&height.to_be_bytes());
        buf.extend_from_slice(&4u32.to_be_bytes());
        buf.extend_from_slice(&4.5f32.to_bits().to_be_bytes());
        buf.extend_from_slice(&42u64.to_be_bytes());
        let length = prompt_bytes.len() as u32;
        for _ in 0..3 {
            buf.extend_from_slice(&0u32.to_be_bytes());
            buf.extend_from_slice(&length.to_be_bytes());
        }
        buf.extend_from_slice(prompt_bytes);
        buf
    }

    #[test]
    fn valid_request_gets_200_response() {
        let (client, server_side) = StdStream::pair().unwrap();
        let mut engine = StubEngine::default();
        let mut pipeline = GenerationPipeline::new();

        let request_bytes = build_request_bytes(512, 512, "a cat in space");
        let writer_thread = std::thread::spawn(move || {
            let mut c = &client;
            c.write_all(&request_bytes).unwrap();
            let mut response_header = [0u8; wire::HEADER_LEN];
            c.read_exact(&mut response_header).unwrap();
            response_header
        });

        let signal = handle_connection(&server_side, &mut engine, &mut pipeline).unwrap();
        assert_eq!(signal, LoopSignal::Continue);

        let header_bytes = writer_thread.join().unwrap();
        let header = wire::FrameHeader::parse(&header_bytes).unwrap();
        assert_eq!(header.kind, wire::KIND_RESPONSE);
    }

    #[test]
    fn invalid_magic_gets_error_frame_and_continue() {
        let (client, server_side) = StdStream::pair().unwrap();
        let mut engine = StubEngine::default();
        let mut pipeline = GenerationPipeline::new();

        let mut bad = build_request_bytes(512, 512, "x");
        bad[0..4].copy_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]);

        let writer_thread = std::thread::spawn(move || {
            let mut c = &client;
            c.write_all(&bad).unwrap();
            let mut response_header = [0u8; wire::HEADER_LEN];
            c.read_exact(&mut response_header).unwrap();
            response_header
        });

        let signal = handle_connection(&server_side, &mut engine, &mut pipeline).unwrap();
        assert_eq!(signal, LoopSignal::Continue);

        let header_bytes = writer_thread.join().unwrap();
        let header = wire::FrameHeader::parse(&header_bytes).unwrap();
        assert_eq!(header.kind, wire::KIND_ERROR);
    }

    #[test]
    fn oversized_payload_gets_internal_error_not_invalid_magic() {
        let (client, server_side) = StdStream::pair().unwrap();
        let mut engine = StubEngine::default();
        let mut pipeline = GenerationPipeline::new();

        let mut header = Vec::new();
        header.extend_from_slice(&MAGIC.to_be_bytes());
        header.extend_from_slice(&VERSION.to_be_bytes());
        header.extend_from_slice(&KIND_REQUEST.to_be_bytes());
        header.extend_from_slice(&u32::MAX.to_be_bytes());
        header.extend_from_slice(&0u32.to_be_bytes());

        let writer_thread = std::thread::spawn(move || {
            let mut c = &client;
            c.write_all(&header).unwrap();
            let mut response_header = [0u8; wire::HEADER_LEN];
            c.read_exact(&mut response_header).unwrap();
            let mut rest = vec![0u8; 16];
            c.read_exact(&mut rest).unwrap();
            [response_header.to_vec(), rest].concat()
        });

        let signal = handle_connection(&server_side, &mut engine, &mut pipeline).unwrap();
        assert_eq!(signal, LoopSignal::Continue);

        let frame = writer_thread.join().unwrap();
        let header = wire::FrameHeader::parse(&frame).unwrap();
        assert_eq!(header.kind, wire::KIND_ERROR);
        let payload = &frame[wire::HEADER_LEN..];
        let error_kind = u32::from_be_bytes(payload[12..16].try_into().unwrap());
        assert_eq!(error_kind, ErrorKind::Internal.wire_code());
        assert_eq!(ErrorKind::Internal.status(), 500);
    }

    #[test]
    fn truncated_header_exits_silently() {
        let (client, server_side) = StdStream::pair().unwrap();
        let mut engine = StubEngine::default();
        let mut pipeline = GenerationPipeline::new();

        let writer_thread = std::thread::spawn(move || {
            let mut c = &client;
            c.write_all(&[1, 2, 3]).unwrap();
            drop(c);
        });

        let signal = handle_connection(&server_side, &mut engine, &mut pipeline).unwrap();
        assert_eq!(signal, LoopSignal::Exit);
        writer_thread.join().unwrap();
    }
}
