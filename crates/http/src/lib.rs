//! The HTTP/1.x parser and framing codec behind `micro-wsgi`
//!
//! This crate owns everything that touches raw bytes on an HTTP/1.x connection.
//! It knows nothing about applications: it turns a byte stream into
//! [`protocol::ParsedRequest`] heads plus body chunks, and turns response heads
//! plus body chunks back into correctly framed bytes.
//!
//! # Architecture
//!
//! - [`protocol`]: the data exchanged with the codec
//!   - [`protocol::ParsedRequest`]: decoded method, target, version and ordered headers
//!   - [`protocol::ResponseHead`]: status and headers of an outgoing response
//!   - [`protocol::Message`], [`protocol::PayloadItem`], [`protocol::PayloadSize`]: head/payload framing
//!   - [`protocol::body::ReqBody`]: a channel-backed request body handle
//! - [`codec`]: `tokio_util` decoders and encoders
//!   - [`codec::RequestDecoder`]: incremental request parsing, fed by `FramedRead`
//!   - [`codec::ResponseEncoder`]: status line, headers and body framing
//!   - [`codec::ParserKind`]: selects the parser implementation
//!
//! # Parser selection
//!
//! Two parsers share one output contract:
//!
//! - [`codec::ParserKind::Fast`] (the default) is backed by `httparse`
//! - [`codec::ParserKind::Plain`] is a small line-based decoder with no
//!   SIMD or unsafe code, useful as a reference and for debugging
//!
//! ```
//! use bytes::BytesMut;
//! use micro_wsgi_http::codec::{ParserKind, RequestDecoder};
//! use micro_wsgi_http::protocol::Message;
//! use tokio_util::codec::Decoder;
//!
//! let mut decoder = RequestDecoder::with_parser(ParserKind::Plain);
//! let mut buf = BytesMut::from(&b"GET /index?a=1 HTTP/1.1\r\nHost: localhost\r\n\r\n"[..]);
//!
//! match decoder.decode(&mut buf).unwrap() {
//!     Some(Message::Header((request, _payload_size))) => assert_eq!(request.target(), "/index?a=1"),
//!     _ => unreachable!(),
//! }
//! ```
//!
//! # Limits
//!
//! - Maximum header size: 8KB
//! - Maximum number of headers: 64
//! - HTTP/1.0 and HTTP/1.1 only

pub mod codec;
pub mod protocol;

mod utils;
pub(crate) use utils::{FastWrite, ensure};
