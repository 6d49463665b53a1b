//! HTTP codec module for decoding requests and encoding responses
//!
//! The codec works with `tokio_util`'s `FramedRead`/`FramedWrite`: bytes are fed
//! in as they arrive and complete [`Message`](crate::protocol::Message)s come out.
//!
//! - Request side:
//!   - [`RequestDecoder`]: head first, then payload items until EOF
//!   - head parsing by the parser chosen with [`ParserKind`]
//!   - payload decoding for `Content-Length` and chunked bodies
//!
//! - Response side:
//!   - [`ResponseEncoder`]: status line and headers, then framed payload items
//!   - payload encoding for `Content-Length`, chunked and close-delimited bodies
//!
//! ```
//! use bytes::BytesMut;
//! use micro_wsgi_http::codec::RequestDecoder;
//! use tokio_util::codec::Decoder;
//!
//! let mut decoder = RequestDecoder::new();
//! let mut buffer = BytesMut::from(&b"GET / HTT"[..]);
//! // not enough bytes yet
//! assert!(decoder.decode(&mut buffer).unwrap().is_none());
//! ```

mod body;
mod header;
mod request_decoder;
mod response_encoder;

pub use header::ParserKind;
pub use header::UnknownParserKind;
pub use request_decoder::RequestDecoder;
pub use response_encoder::ResponseEncoder;
