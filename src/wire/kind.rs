//! The closed error taxonomy shared by the wire codec, the generation
//! pipeline, and the accept loop.
//!
//! `ErrorKind` is the single source of truth for what can go wrong on the
//! trust boundary. The wire `error_kind` integer and the HTTP-style
//! `status` code are both derived from it by explicit table lookup (never
//! by casting the enum discriminant), so adding a variant here forces a
//! compile error at the match arms below until it is classified.

use thiserror::Error;

/// Machine-readable identifier for a protocol or server-side failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ErrorKind {
    #[error("invalid magic")]
    InvalidMagic,
    #[error("unsupported protocol version")]
    UnsupportedVersion,
    #[error("invalid model id")]
    InvalidModelId,
    #[error("invalid prompt")]
    InvalidPrompt,
    #[error("invalid dimensions")]
    InvalidDimensions,
    #[error("invalid steps")]
    InvalidSteps,
    #[error("invalid cfg_scale")]
    InvalidCfg,
    #[error("out of memory")]
    OutOfMemory,
    #[error("gpu error")]
    GpuError,
    #[error("generation timed out")]
    Timeout,
    #[error("internal error")]
    Internal,
}

impl ErrorKind {
    /// The 32-bit wire code sent in an error frame's `error_kind` field.
    ///
    /// This mapping is part of the wire contract: it must never change for
    /// an existing variant, even if the enum is reordered or renumbered.
    pub fn wire_code(self) -> u32 {
        match self {
            ErrorKind::InvalidMagic => 0x01,
            ErrorKind::UnsupportedVersion => 0x02,
            ErrorKind::InvalidModelId => 0x03,
            ErrorKind::InvalidPrompt => 0x04,
            ErrorKind::InvalidDimensions => 0x05,
            ErrorKind::InvalidSteps => 0x06,
            ErrorKind::InvalidCfg => 0x07,
            ErrorKind::OutOfMemory => 0x08,
            ErrorKind::GpuError => 0x09,
            ErrorKind::Timeout => 0x0A,
            ErrorKind::Internal => 0x0B,
        }
    }

    /// Decode a wire code back into an `ErrorKind`, if recognized.
    pub fn from_wire_code(code: u32) -> Option<Self> {
        Some(match code {
            0x01 => ErrorKind::InvalidMagic,
            0x02 => ErrorKind::UnsupportedVersion,
            0x03 => ErrorKind::InvalidModelId,
            0x04 => ErrorKind::InvalidPrompt,
            0x05 => ErrorKind::InvalidDimensions,
            0x06 => ErrorKind::InvalidSteps,
            0x07 => ErrorKind::InvalidCfg,
            0x08 => ErrorKind::OutOfMemory,
            0x09 => ErrorKind::GpuError,
            0x0A => ErrorKind::Timeout,
            0x0B => ErrorKind::Internal,
            _ => return None,
        })
    }

    /// The HTTP-style status reported to the peer for this kind.
    pub fn status(self) -> u32 {
        match self {
            ErrorKind::InvalidMagic
            | ErrorKind::UnsupportedVersion
            | ErrorKind::InvalidModelId
            | ErrorKind::InvalidPrompt
            | ErrorKind::InvalidDimensions
            | ErrorKind::InvalidSteps
            | ErrorKind::InvalidCfg => 400,
            ErrorKind::OutOfMemory | ErrorKind::GpuError | ErrorKind::Timeout | ErrorKind::Internal => 500,
        }
    }
}
