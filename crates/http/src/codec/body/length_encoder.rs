use crate::protocol::{PayloadItem, SendError};
use bytes::{Buf, BytesMut};
use tokio_util::codec::Encoder;
use tracing::warn;

/// Writes a body announced with `Content-Length`.
///
/// Bytes beyond the announced length are dropped, and an EOF that arrives
/// before the length is reached fails with [`SendError::IncompleteBody`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LengthEncoder {
    remaining: u64,
}

impl LengthEncoder {
    pub fn new(length: u64) -> Self {
        Self { remaining: length }
    }
}

impl<D: Buf> Encoder<PayloadItem<D>> for LengthEncoder {
    type Error = SendError;

    fn encode(&mut self, item: PayloadItem<D>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            PayloadItem::Chunk(mut bytes) => {
                if !bytes.has_remaining() {
                    return Ok(());
                }

                let available = bytes.remaining() as u64;
                if available > self.remaining {
                    warn!(extra = available - self.remaining, "response body exceeds its content-length, truncating");
                }

                let mut to_write = self.remaining.min(available) as usize;
                dst.reserve(to_write);
                self.remaining -= to_write as u64;
                while to_write > 0 {
                    let chunk = bytes.chunk();
                    let n = chunk.len().min(to_write);
                    dst.extend_from_slice(&chunk[..n]);
                    bytes.advance(n);
                    to_write -= n;
                }
                Ok(())
            }
            PayloadItem::Eof => {
                if self.remaining > 0 {
                    return Err(SendError::incomplete_body(self.remaining));
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn truncates_extra_bytes() {
        let mut encoder = LengthEncoder::new(5);
        let mut dst = BytesMut::new();

        encoder.encode(PayloadItem::Chunk(Bytes::from_static(b"hel")), &mut dst).unwrap();
        encoder.encode(PayloadItem::Chunk(Bytes::from_static(b"lo world")), &mut dst).unwrap();
        encoder.encode(PayloadItem::<Bytes>::Eof, &mut dst).unwrap();

        assert_eq!(&dst[..], b"hello");
    }

    #[test]
    fn short_body_is_an_error() {
        let mut encoder = LengthEncoder::new(10);
        let mut dst = BytesMut::new();

        encoder.encode(PayloadItem::Chunk(Bytes::from_static(b"abc")), &mut dst).unwrap();
        let result = encoder.encode(PayloadItem::<Bytes>::Eof, &mut dst);
        assert!(matches!(result, Err(SendError::IncompleteBody { remaining: 7 })));
    }
}
