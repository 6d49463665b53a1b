//! Response head serialization
//!
//! Writes the status line and header block. The framing headers follow the
//! [`PayloadSize`] chosen for the body:
//!
//! - `Length(n)`: `Content-Length: n`
//! - `Chunked`: `Transfer-Encoding: chunked`, any `Content-Length` is removed
//! - `Empty` and `UntilClose`: the headers are written as given

use crate::FastWrite;
use crate::protocol::{PayloadSize, ReasonPhrase, ResponseHead, SendError};

use bytes::{BufMut, BytesMut};

use http::{HeaderValue, Version, header};
use std::io::Write;
use tokio_util::codec::Encoder;
use tracing::error;

/// Initial buffer size allocated for header serialization
const INIT_HEADER_SIZE: usize = 4 * 1024;

#[derive(Debug, Default, Clone, Copy)]
pub struct HeaderEncoder;

impl Encoder<(ResponseHead, PayloadSize)> for HeaderEncoder {
    type Error = SendError;

    fn encode(&mut self, item: (ResponseHead, PayloadSize), dst: &mut BytesMut) -> Result<(), Self::Error> {
        let (mut head, payload_size) = item;

        let version = match head.version() {
            Version::HTTP_11 => "HTTP/1.1",
            Version::HTTP_10 => "HTTP/1.0",
            v => {
                error!(http_version = ?v, "unsupported http version");
                return Err(SendError::UnsupportedVersion(v));
            }
        };

        let reason = match head.extensions().get::<ReasonPhrase>() {
            Some(reason) => reason.as_str(),
            None => head.status().canonical_reason().unwrap_or_default(),
        };

        dst.reserve(INIT_HEADER_SIZE);
        write!(FastWrite(dst), "{version} {} {reason}\r\n", head.status().as_str())?;

        match payload_size {
            PayloadSize::Length(n) => {
                head.headers_mut().insert(header::CONTENT_LENGTH, n.into());
            }
            PayloadSize::Chunked => {
                head.headers_mut().remove(header::CONTENT_LENGTH);
                head.headers_mut().insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
            }
            PayloadSize::Empty | PayloadSize::UntilClose => {}
        }

        for (header_name, header_value) in head.headers().iter() {
            dst.put_slice(header_name.as_ref());
            dst.put_slice(b": ");
            dst.put_slice(header_value.as_ref());
            dst.put_slice(b"\r\n");
        }
        dst.put_slice(b"\r\n");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::StatusCode;

    fn head(version: Version, status: u16) -> ResponseHead {
        let mut head = ResponseHead::new(());
        *head.version_mut() = version;
        *head.status_mut() = StatusCode::from_u16(status).unwrap();
        head
    }

    fn encode(head: ResponseHead, payload_size: PayloadSize) -> String {
        let mut dst = BytesMut::new();
        HeaderEncoder.encode((head, payload_size), &mut dst).unwrap();
        String::from_utf8(dst.to_vec()).unwrap()
    }

    #[test]
    fn status_line_echoes_version() {
        assert_eq!(encode(head(Version::HTTP_10, 404), PayloadSize::Empty), "HTTP/1.0 404 Not Found\r\n\r\n");
        assert_eq!(encode(head(Version::HTTP_11, 204), PayloadSize::Empty), "HTTP/1.1 204 No Content\r\n\r\n");
    }

    #[test]
    fn custom_reason_phrase() {
        let mut response = head(Version::HTTP_11, 299);
        response.extensions_mut().insert(ReasonPhrase::new("Whatever You Like").unwrap());
        assert_eq!(encode(response, PayloadSize::Empty), "HTTP/1.1 299 Whatever You Like\r\n\r\n");

        assert_eq!(encode(head(Version::HTTP_11, 299), PayloadSize::Empty), "HTTP/1.1 299 \r\n\r\n");
    }

    #[test]
    fn chunked_replaces_content_length() {
        let mut response = head(Version::HTTP_11, 200);
        response.headers_mut().insert(header::CONTENT_LENGTH, HeaderValue::from_static("10"));
        assert_eq!(encode(response, PayloadSize::Chunked), "HTTP/1.1 200 OK\r\ntransfer-encoding: chunked\r\n\r\n");
    }

    #[test]
    fn unsupported_version_is_rejected() {
        let mut dst = BytesMut::new();
        let result = HeaderEncoder.encode((head(Version::HTTP_2, 200), PayloadSize::Empty), &mut dst);
        assert!(matches!(result, Err(SendError::UnsupportedVersion(Version::HTTP_2))));
        assert!(dst.is_empty());
    }
}
