//! Request head parsing and response head serialization
//!
//! Two interchangeable request-head parsers are available, selected by [`ParserKind`]:
//!
//! - [`ParserKind::Fast`]: backed by `httparse`
//! - [`ParserKind::Plain`]: a line oriented parser with no dependencies beyond `http`
//!
//! Both produce an identical [`ParsedRequest`] and agree on the request body framing,
//! which is decided by [`parse_payload`] from the head alone.
//!
//! [`HeaderEncoder`] writes the response status line and headers.

mod header_decoder;
mod header_encoder;
mod plain_header_decoder;

use std::fmt;
use std::str::FromStr;

use bytes::BytesMut;
use http::HeaderValue;
use http::header::{CONTENT_LENGTH, TRANSFER_ENCODING};
use thiserror::Error;
use tokio_util::codec::Decoder;

use crate::protocol::{ParseError, ParsedRequest, PayloadSize};

pub use header_decoder::FastHeaderDecoder;
pub use header_encoder::HeaderEncoder;
pub use plain_header_decoder::PlainHeaderDecoder;

/// Maximum number of headers allowed in a request
pub(crate) const MAX_HEADER_NUM: usize = 64;

/// Maximum size in bytes allowed for the request line plus headers
pub(crate) const MAX_HEADER_BYTES: usize = 8 * 1024;

/// Which request-head parser a connection uses.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ParserKind {
    /// The `httparse` backed parser
    #[default]
    Fast,
    /// The line oriented parser
    Plain,
}

#[derive(Debug, Error)]
#[error("unknown http parser {0:?}, expected one of: fast, default, plain, python")]
pub struct UnknownParserKind(String);

impl FromStr for ParserKind {
    type Err = UnknownParserKind;

    /// Accepts `fast`/`default` and `plain`/`pure`/`python`, ignoring ASCII case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fast" | "default" => Ok(ParserKind::Fast),
            "plain" | "pure" | "python" => Ok(ParserKind::Plain),
            _ => Err(UnknownParserKind(s.to_string())),
        }
    }
}

impl fmt::Display for ParserKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParserKind::Fast => f.write_str("fast"),
            ParserKind::Plain => f.write_str("plain"),
        }
    }
}

/// Request head decoder dispatching to the configured parser.
#[derive(Debug)]
pub struct HeaderDecoder {
    kind: Kind,
}

#[derive(Debug)]
enum Kind {
    Fast(FastHeaderDecoder),
    Plain(PlainHeaderDecoder),
}

impl HeaderDecoder {
    pub fn new(parser: ParserKind) -> Self {
        let kind = match parser {
            ParserKind::Fast => Kind::Fast(FastHeaderDecoder),
            ParserKind::Plain => Kind::Plain(PlainHeaderDecoder),
        };
        Self { kind }
    }

    pub fn kind(&self) -> ParserKind {
        match &self.kind {
            Kind::Fast(_) => ParserKind::Fast,
            Kind::Plain(_) => ParserKind::Plain,
        }
    }
}

impl Decoder for HeaderDecoder {
    type Item = (ParsedRequest, PayloadSize);
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let request = match &mut self.kind {
            Kind::Fast(decoder) => decoder.decode(src)?,
            Kind::Plain(decoder) => decoder.decode(src)?,
        };

        match request {
            Some(request) => {
                let payload_size = parse_payload(&request)?;
                Ok(Some((request, payload_size)))
            }
            None => Ok(None),
        }
    }
}

/// Decides how the request body is delimited.
///
/// refer: https://www.rfc-editor.org/rfc/rfc9112.html#name-message-body-length
///
/// - `Transfer-Encoding` whose final coding is `chunked`: chunked body
/// - `Transfer-Encoding` with any other final coding: rejected, the length is unknowable
/// - both `Transfer-Encoding` and `Content-Length`: rejected
/// - `Content-Length`: exactly that many bytes, repeated values must agree
/// - neither: no body
pub(crate) fn parse_payload(request: &ParsedRequest) -> Result<PayloadSize, ParseError> {
    let te_values: Vec<&HeaderValue> = request.header_values(&TRANSFER_ENCODING).collect();
    let cl_values: Vec<&HeaderValue> = request.header_values(&CONTENT_LENGTH).collect();

    match (te_values.last(), cl_values.is_empty()) {
        (None, true) => Ok(PayloadSize::Empty),

        (Some(te_value), true) => {
            if is_chunked(te_value) {
                Ok(PayloadSize::Chunked)
            } else {
                Err(ParseError::invalid_transfer_encoding("chunked must be the final transfer coding of a request"))
            }
        }

        (None, false) => {
            let mut length: Option<u64> = None;
            for cl_value in cl_values {
                let current = parse_content_length(cl_value)?;
                if length.is_some_and(|l| l != current) {
                    return Err(ParseError::invalid_content_length("conflicting content-length values"));
                }
                length = Some(current);
            }
            Ok(PayloadSize::Length(length.unwrap_or_default()))
        }

        (Some(_), false) => Err(ParseError::invalid_content_length("transfer-encoding and content-length both present in headers")),
    }
}

fn parse_content_length(value: &HeaderValue) -> Result<u64, ParseError> {
    let cl_str = value.to_str().map_err(|_| ParseError::invalid_content_length("value is not visible ascii"))?.trim();

    // `u64::from_str` accepts a leading '+', a content-length never has one
    if cl_str.is_empty() || !cl_str.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ParseError::invalid_content_length(format!("value {cl_str} is not a number")));
    }

    cl_str.parse::<u64>().map_err(|_| ParseError::invalid_content_length(format!("value {cl_str} is out of range")))
}

/// Whether `chunked` is the final coding of a `Transfer-Encoding` value.
fn is_chunked(value: &HeaderValue) -> bool {
    const CHUNKED: &[u8] = b"chunked";
    match value.as_bytes().rsplit(|b| *b == b',').next() {
        Some(bytes) => bytes.trim_ascii().eq_ignore_ascii_case(CHUNKED),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::HOST;
    use http::{Method, Version};

    fn request_with(headers: &[(&'static str, &'static str)]) -> ParsedRequest {
        headers.iter().fold(ParsedRequest::new(Method::POST, "/", Version::HTTP_11), |request, (name, value)| {
            request.with_header(name.parse().unwrap(), HeaderValue::from_static(value))
        })
    }

    #[test]
    fn check_is_chunked() {
        assert!(is_chunked(&HeaderValue::from_static("gzip, chunked")));
        assert!(is_chunked(&HeaderValue::from_static("Chunked")));
        assert!(!is_chunked(&HeaderValue::from_static("chunked, gzip")));
        assert!(!is_chunked(&HeaderValue::from_static("gzip")));
    }

    #[test]
    fn payload_from_headers() {
        assert_eq!(parse_payload(&request_with(&[("host", "x")])).unwrap(), PayloadSize::Empty);
        assert_eq!(parse_payload(&request_with(&[("content-length", " 12 ")])).unwrap(), PayloadSize::Length(12));
        assert_eq!(parse_payload(&request_with(&[("content-length", "3"), ("content-length", "3")])).unwrap(), PayloadSize::Length(3));
        assert_eq!(parse_payload(&request_with(&[("transfer-encoding", "chunked")])).unwrap(), PayloadSize::Chunked);
    }

    #[test]
    fn ambiguous_payload_is_rejected() {
        let both = request_with(&[("transfer-encoding", "chunked"), ("content-length", "3")]);
        assert!(matches!(parse_payload(&both), Err(ParseError::InvalidContentLength { .. })));

        let conflicting = request_with(&[("content-length", "3"), ("content-length", "4")]);
        assert!(matches!(parse_payload(&conflicting), Err(ParseError::InvalidContentLength { .. })));

        let signed = request_with(&[("content-length", "+3")]);
        assert!(matches!(parse_payload(&signed), Err(ParseError::InvalidContentLength { .. })));

        let gzip_only = request_with(&[("transfer-encoding", "gzip")]);
        assert!(matches!(parse_payload(&gzip_only), Err(ParseError::InvalidTransferEncoding { .. })));
    }

    #[test]
    fn get_with_body_still_frames_the_body() {
        let mut request = ParsedRequest::new(Method::GET, "/", Version::HTTP_11);
        request = request.with_header(HOST, HeaderValue::from_static("x"));
        request = request.with_header(CONTENT_LENGTH, HeaderValue::from_static("5"));
        assert_eq!(parse_payload(&request).unwrap(), PayloadSize::Length(5));
    }

    #[test]
    fn parser_kind_names() {
        assert_eq!("fast".parse::<ParserKind>().unwrap(), ParserKind::Fast);
        assert_eq!("DEFAULT".parse::<ParserKind>().unwrap(), ParserKind::Fast);
        assert_eq!("Plain".parse::<ParserKind>().unwrap(), ParserKind::Plain);
        assert_eq!("pure".parse::<ParserKind>().unwrap(), ParserKind::Plain);
        assert_eq!("python".parse::<ParserKind>().unwrap(), ParserKind::Plain);
        assert!("httptools".parse::<ParserKind>().is_err());
        assert_eq!(ParserKind::Plain.to_string(), "plain");
        assert_eq!(HeaderDecoder::new(ParserKind::Plain).kind(), ParserKind::Plain);
    }
}
