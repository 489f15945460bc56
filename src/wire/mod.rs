//! Binary wire protocol: frame header, request decoder, response/error
//! encoders, and the closed error taxonomy.
//!
//! Every function in this module is pure: no I/O, no allocation on the
//! error path, no logging. Callers (the accept loop, the pipeline) own
//! buffers and own logging.

pub mod error_frame;
pub mod header;
pub mod kind;
pub mod request;
pub mod response;

pub use error_frame::encode_error;
pub use header::{FrameHeader, HEADER_LEN, KIND_ERROR, KIND_REQUEST, KIND_RESPONSE, MAGIC, MAX_FRAME_LEN, VERSION};
pub use kind::ErrorKind;
pub use request::{decode_request, DecodedRequest, PromptSpan};
pub use response::{encode_response, GenerationResponse};
