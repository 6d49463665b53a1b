//! Request head decoder backed by `httparse`
//!
//! # Limits
//!
//! - Maximum number of headers: 64
//! - Maximum head size: 8KB
//! - Only HTTP/1.0 and HTTP/1.1
//!
//! The decoder works in three stages:
//!
//! 1. Parse the raw bytes with `httparse`
//! 2. Convert method, target, version and headers into an owned [`ParsedRequest`]
//! 3. Advance the buffer past the head, leaving any body bytes in place

use bytes::{Buf, BytesMut};
use http::{HeaderName, HeaderValue, Method, Version};
use httparse::{Error, Status};
use tokio_util::codec::Decoder;
use tracing::trace;

use super::{MAX_HEADER_BYTES, MAX_HEADER_NUM};
use crate::ensure;
use crate::protocol::{ParseError, ParsedRequest};

/// Shortest possible head: `"GET / HTTP/1.1\r\n\r\n"` minus a few optional bytes
const MIN_HEAD_BYTES: usize = 14;

/// Decoder for request heads using `httparse`.
#[derive(Debug, Default, Clone, Copy)]
pub struct FastHeaderDecoder;

impl Decoder for FastHeaderDecoder {
    type Item = ParsedRequest;
    type Error = ParseError;

    /// - `Ok(Some(request))` if a complete head was parsed, `src` then starts at the body
    /// - `Ok(None)` if more data is needed
    /// - `Err(ParseError)` if the head is malformed or over the limits
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < MIN_HEAD_BYTES {
            return Ok(None);
        }

        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADER_NUM];
        let mut req = httparse::Request::new(&mut headers);

        let status = match req.parse(src) {
            Ok(status) => status,
            Err(Error::TooManyHeaders) => return Err(ParseError::too_many_headers(MAX_HEADER_NUM)),
            Err(Error::Version) => return Err(ParseError::InvalidVersion(request_line_version(&src[..]))),
            Err(Error::Token) => return Err(ParseError::InvalidMethod),
            Err(e) => return Err(ParseError::invalid_header(e.to_string())),
        };

        match status {
            Status::Complete(body_offset) => {
                trace!(head_size = body_offset, "parsed request head");
                ensure!(body_offset <= MAX_HEADER_BYTES, ParseError::too_large_header(body_offset, MAX_HEADER_BYTES));

                let version = match req.version {
                    Some(0) => Version::HTTP_10,
                    Some(1) => Version::HTTP_11,
                    _ => return Err(ParseError::InvalidVersion(request_line_version(&src[..]))),
                };

                let method = req.method.ok_or(ParseError::InvalidMethod)?;
                let method = Method::from_bytes(method.as_bytes()).map_err(|_| ParseError::InvalidMethod)?;

                let target = req.path.filter(|path| !path.is_empty()).ok_or(ParseError::InvalidUri)?;

                let mut request = ParsedRequest::new(method, target, version);
                request.reserve_headers(req.headers.len());
                for header in req.headers.iter() {
                    let name = HeaderName::from_bytes(header.name.as_bytes())
                        .map_err(|_| ParseError::invalid_header(format!("invalid header name {:?}", header.name)))?;
                    let value = HeaderValue::from_bytes(header.value)
                        .map_err(|_| ParseError::invalid_header(format!("invalid value for header {name}")))?;
                    request.push_header(name, value);
                }

                src.advance(body_offset);
                Ok(Some(request))
            }
            Status::Partial => {
                ensure!(src.len() <= MAX_HEADER_BYTES, ParseError::too_large_header(src.len(), MAX_HEADER_BYTES));
                Ok(None)
            }
        }
    }
}

/// The version token of the request line, for error reporting.
fn request_line_version(src: &[u8]) -> String {
    let line_end = src.iter().position(|b| *b == b'\r' || *b == b'\n').unwrap_or(src.len());
    let line = &src[..line_end];
    let version = line.rsplit(|b| *b == b' ').next().unwrap_or_default();
    String::from_utf8_lossy(version).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::{ACCEPT, ACCEPT_LANGUAGE, CONNECTION, HOST, USER_AGENT};
    use indoc::indoc;

    #[test]
    fn leaves_body_bytes_in_buffer() {
        let str = indoc! {"
            GET /index.html HTTP/1.1\r
            Host: 127.0.0.1:8080\r
            User-Agent: curl/7.79.1\r
            Accept: */*\r
            \r
            123"};

        let mut bytes = BytesMut::from(str);
        let request = FastHeaderDecoder.decode(&mut bytes).unwrap().unwrap();

        assert_eq!(request.headers().len(), 3);
        assert_eq!(&bytes[..], &b"123"[..]);
    }

    #[test]
    fn from_curl() {
        let str = indoc! {"
            GET /index.html?a=1&b=2 HTTP/1.1\r
            Host: 127.0.0.1:8080\r
            User-Agent: curl/7.79.1\r
            Accept: */*\r
            \r
        "};

        let mut buf = BytesMut::from(str);
        let request = FastHeaderDecoder.decode(&mut buf).unwrap().unwrap();

        assert_eq!(request.method(), &Method::GET);
        assert_eq!(request.version(), Version::HTTP_11);
        assert_eq!(request.target(), "/index.html?a=1&b=2");
        assert_eq!(request.header(&ACCEPT), Some(&HeaderValue::from_static("*/*")));
        assert_eq!(request.header(&HOST), Some(&HeaderValue::from_static("127.0.0.1:8080")));
        assert_eq!(request.header(&USER_AGENT), Some(&HeaderValue::from_static("curl/7.79.1")));
        assert!(buf.is_empty());
    }

    #[test]
    fn from_edge() {
        let str = indoc! {r##"
            GET /index/?a=1&b=2&a=3 HTTP/1.0
            Host: 127.0.0.1:8080
            Connection: keep-alive
            sec-ch-ua: "#Not_A Brand";v="99", "Microsoft Edge";v="109"
            Accept-Language: zh-CN,zh;q=0.9,en-US;q=0.8,en;q=0.7

        "##};

        let mut buf = BytesMut::from(str);
        let request = FastHeaderDecoder.decode(&mut buf).unwrap().unwrap();

        assert_eq!(request.version(), Version::HTTP_10);
        assert_eq!(request.target(), "/index/?a=1&b=2&a=3");
        assert!(request.keep_alive());
        assert_eq!(request.header(&CONNECTION), Some(&HeaderValue::from_static("keep-alive")));
        assert_eq!(
            request.header(&HeaderName::from_static("sec-ch-ua")),
            Some(&HeaderValue::from_static(r##""#Not_A Brand";v="99", "Microsoft Edge";v="109""##))
        );
        assert_eq!(request.header(&ACCEPT_LANGUAGE), Some(&HeaderValue::from_static("zh-CN,zh;q=0.9,en-US;q=0.8,en;q=0.7")));
    }

    #[test]
    fn partial_head_waits_for_more() {
        let mut buf = BytesMut::from(&b"GET / HTTP/1.1\r\nHost: exa"[..]);
        assert!(FastHeaderDecoder.decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 25);
    }

    #[test]
    fn oversized_head_is_rejected() {
        let mut raw = b"GET / HTTP/1.1\r\nX-Big: ".to_vec();
        raw.extend(std::iter::repeat_n(b'a', MAX_HEADER_BYTES));
        let mut buf = BytesMut::from(&raw[..]);
        assert!(matches!(FastHeaderDecoder.decode(&mut buf), Err(ParseError::TooLargeHeader { .. })));
    }

    #[test]
    fn unsupported_version_is_rejected() {
        let mut buf = BytesMut::from(&b"GET / HTTP/2.0\r\n\r\n"[..]);
        assert!(matches!(FastHeaderDecoder.decode(&mut buf), Err(ParseError::InvalidVersion(_))));
    }

    #[test]
    fn empty_method_is_rejected() {
        let mut buf = BytesMut::from(&b" / HTTP/1.1\r\nHost: x\r\n\r\n"[..]);
        assert!(FastHeaderDecoder.decode(&mut buf).is_err());
    }
}
