//! Body framing for both directions of a connection
//!
//! ## Decoders (request bodies)
//! - [`PayloadDecoder`]: picks one of the strategies below from the request head
//! - `LengthDecoder`: `Content-Length` bodies
//! - `ChunkedDecoder`: `Transfer-Encoding: chunked` bodies, trailers are discarded
//!
//! ## Encoders (response bodies)
//! - [`PayloadEncoder`]: picks one of the strategies below from the response head
//! - `LengthEncoder`: exactly `Content-Length` bytes, extra bytes are dropped
//! - `ChunkedEncoder`: one chunk per non-empty item, then the terminating chunk
//! - raw bytes for close-delimited bodies, nothing at all for bodiless responses

mod chunked_decoder;
mod chunked_encoder;
mod length_decoder;
mod length_encoder;
mod payload_decoder;
mod payload_encoder;

pub use payload_decoder::PayloadDecoder;
pub use payload_encoder::PayloadEncoder;
