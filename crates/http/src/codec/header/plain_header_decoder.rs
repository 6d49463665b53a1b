//! Line oriented request head decoder
//!
//! Splits the head on CRLF (a bare LF is accepted too) and validates each piece with
//! the `http` crate's own parsers. It enforces the same limits as the fast decoder
//! and yields the same [`ParsedRequest`] for the same bytes.

use bytes::{Buf, BytesMut};
use http::{HeaderName, HeaderValue, Method, Version};
use tokio_util::codec::Decoder;
use tracing::trace;

use super::{MAX_HEADER_BYTES, MAX_HEADER_NUM};
use crate::ensure;
use crate::protocol::{ParseError, ParsedRequest};

#[derive(Debug, Default, Clone, Copy)]
pub struct PlainHeaderDecoder;

impl Decoder for PlainHeaderDecoder {
    type Item = ParsedRequest;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // leading empty lines before a request line are ignored
        let leading = src.iter().take_while(|b| **b == b'\r' || **b == b'\n').count();
        if leading > 0 {
            src.advance(leading);
        }

        let Some(head_len) = find_head_end(src) else {
            ensure!(src.len() <= MAX_HEADER_BYTES, ParseError::too_large_header(src.len(), MAX_HEADER_BYTES));
            return Ok(None);
        };
        ensure!(head_len <= MAX_HEADER_BYTES, ParseError::too_large_header(head_len, MAX_HEADER_BYTES));

        let head = src.split_to(head_len).freeze();
        trace!(head_size = head_len, "parsed request head");

        let mut lines = head.split(|b| *b == b'\n').map(|line| line.strip_suffix(b"\r").unwrap_or(line));

        let request_line = lines.next().unwrap_or_default();
        let mut request = parse_request_line(request_line)?;

        for line in lines.filter(|line| !line.is_empty()) {
            ensure!(request.headers().len() < MAX_HEADER_NUM, ParseError::too_many_headers(MAX_HEADER_NUM));

            if line[0] == b' ' || line[0] == b'\t' {
                return Err(ParseError::invalid_header("obsolete line folding is not supported"));
            }

            let Some(colon) = line.iter().position(|b| *b == b':') else {
                return Err(ParseError::invalid_header(format!("missing ':' in header line {:?}", String::from_utf8_lossy(line))));
            };

            let name = HeaderName::from_bytes(&line[..colon])
                .map_err(|_| ParseError::invalid_header(format!("invalid header name {:?}", String::from_utf8_lossy(&line[..colon]))))?;
            let value = HeaderValue::from_bytes(line[colon + 1..].trim_ascii())
                .map_err(|_| ParseError::invalid_header(format!("invalid value for header {name}")))?;
            request.push_header(name, value);
        }

        Ok(Some(request))
    }
}

/// Length of the head including its terminating empty line.
fn find_head_end(src: &[u8]) -> Option<usize> {
    let mut line_start = 0;
    for (i, b) in src.iter().enumerate() {
        if *b != b'\n' {
            continue;
        }
        let line = &src[line_start..i];
        if line.is_empty() || line == b"\r" {
            return Some(i + 1);
        }
        line_start = i + 1;
    }
    None
}

fn parse_request_line(line: &[u8]) -> Result<ParsedRequest, ParseError> {
    let parts: Vec<&[u8]> = line.split(|b| *b == b' ').collect();
    let [method, target, version] = parts[..] else {
        return Err(ParseError::invalid_header(format!("malformed request line {:?}", String::from_utf8_lossy(line))));
    };

    ensure!(!method.is_empty(), ParseError::InvalidMethod);
    let method = Method::from_bytes(method).map_err(|_| ParseError::InvalidMethod)?;

    ensure!(!target.is_empty(), ParseError::InvalidUri);
    ensure!(target.iter().all(|b| b.is_ascii_graphic()), ParseError::InvalidUri);
    // visible ascii only, checked above
    let target = String::from_utf8_lossy(target).into_owned();

    let version = match version {
        b"HTTP/1.1" => Version::HTTP_11,
        b"HTTP/1.0" => Version::HTTP_10,
        other => return Err(ParseError::InvalidVersion(String::from_utf8_lossy(other).into_owned())),
    };

    Ok(ParsedRequest::new(method, target, version))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::header::FastHeaderDecoder;
    use http::header::{CONTENT_LENGTH, HOST};
    use indoc::indoc;

    #[test]
    fn same_result_as_fast_decoder() {
        let raw = indoc! {"
            POST /submit?x=1 HTTP/1.1\r
            Host: example.com\r
            X-Forwarded-For: a\r
            x-forwarded-for: b\r
            Content-Length: 3\r
            \r
            abc"};

        let mut plain_buf = BytesMut::from(raw);
        let mut fast_buf = BytesMut::from(raw);
        let plain = PlainHeaderDecoder.decode(&mut plain_buf).unwrap().unwrap();
        let fast = FastHeaderDecoder.decode(&mut fast_buf).unwrap().unwrap();

        assert_eq!(plain, fast);
        assert_eq!(&plain_buf[..], b"abc");
        assert_eq!(&fast_buf[..], b"abc");
        assert_eq!(plain.header(&CONTENT_LENGTH), Some(&HeaderValue::from_static("3")));
    }

    #[test]
    fn waits_for_complete_head() {
        let mut buf = BytesMut::from(&b"GET / HTTP/1.1\r\nHost: x\r\n"[..]);
        assert!(PlainHeaderDecoder.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(b"\r\n");
        let request = PlainHeaderDecoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(request.header(&HOST), Some(&HeaderValue::from_static("x")));
        assert!(buf.is_empty());
    }

    #[test]
    fn header_without_separator_is_rejected() {
        let mut buf = BytesMut::from(&b"GET / HTTP/1.1\r\nHost x\r\n\r\n"[..]);
        assert!(matches!(PlainHeaderDecoder.decode(&mut buf), Err(ParseError::InvalidHeader { .. })));
    }

    #[test]
    fn folded_header_is_rejected() {
        let mut buf = BytesMut::from(&b"GET / HTTP/1.1\r\nX-A: 1\r\n  continued\r\n\r\n"[..]);
        assert!(matches!(PlainHeaderDecoder.decode(&mut buf), Err(ParseError::InvalidHeader { .. })));
    }

    #[test]
    fn empty_method_is_rejected() {
        let mut buf = BytesMut::from(&b" / HTTP/1.1\r\nHost: x\r\n\r\n"[..]);
        assert!(matches!(PlainHeaderDecoder.decode(&mut buf), Err(ParseError::InvalidMethod)));
    }

    #[test]
    fn bad_version_is_reported() {
        let mut buf = BytesMut::from(&b"GET / HTTP/3\r\n\r\n"[..]);
        match PlainHeaderDecoder.decode(&mut buf) {
            Err(ParseError::InvalidVersion(version)) => assert_eq!(version, "HTTP/3"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn too_many_headers() {
        let mut raw = String::from("GET / HTTP/1.1\r\n");
        for i in 0..=MAX_HEADER_NUM {
            raw.push_str(&format!("X-H{i}: v\r\n"));
        }
        raw.push_str("\r\n");
        let mut buf = BytesMut::from(raw.as_str());
        assert!(matches!(PlainHeaderDecoder.decode(&mut buf), Err(ParseError::TooManyHeaders { .. })));
    }
}
