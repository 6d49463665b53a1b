use crate::codec::body::chunked_encoder::ChunkedEncoder;
use crate::codec::body::length_encoder::LengthEncoder;
use crate::protocol::{PayloadItem, PayloadSize, SendError};
use bytes::{Buf, BytesMut};
use tracing::warn;

use tokio_util::codec::Encoder;

/// Response body framing, selected from the [`PayloadSize`] written in the head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadEncoder {
    kind: Kind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Kind {
    /// content-length payload
    Length(LengthEncoder),

    /// transfer-encoding chunked payload
    Chunked(ChunkedEncoder),

    /// no body may follow the head
    NoBody,

    /// raw bytes, the body ends when the connection closes
    UntilClose,
}

impl PayloadEncoder {
    pub fn empty() -> Self {
        Self { kind: Kind::NoBody }
    }

    pub fn chunked() -> Self {
        Self { kind: Kind::Chunked(ChunkedEncoder::new()) }
    }

    pub fn fix_length(size: u64) -> Self {
        Self { kind: Kind::Length(LengthEncoder::new(size)) }
    }

    pub fn until_close() -> Self {
        Self { kind: Kind::UntilClose }
    }
}

impl From<PayloadSize> for PayloadEncoder {
    fn from(payload_size: PayloadSize) -> Self {
        match payload_size {
            PayloadSize::Length(size) => PayloadEncoder::fix_length(size),
            PayloadSize::Chunked => PayloadEncoder::chunked(),
            PayloadSize::Empty => PayloadEncoder::empty(),
            PayloadSize::UntilClose => PayloadEncoder::until_close(),
        }
    }
}

impl<D: Buf> Encoder<PayloadItem<D>> for PayloadEncoder {
    type Error = SendError;

    fn encode(&mut self, item: PayloadItem<D>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match &mut self.kind {
            Kind::Length(encoder) => encoder.encode(item, dst),
            Kind::Chunked(encoder) => encoder.encode(item, dst),
            Kind::NoBody => {
                if let PayloadItem::Chunk(bytes) = item
                    && bytes.has_remaining()
                {
                    warn!(size = bytes.remaining(), "dropping body bytes of a response that has no body");
                }
                Ok(())
            }
            Kind::UntilClose => {
                if let PayloadItem::Chunk(mut bytes) = item {
                    dst.reserve(bytes.remaining());
                    while bytes.has_remaining() {
                        let n = bytes.chunk().len();
                        dst.extend_from_slice(bytes.chunk());
                        bytes.advance(n);
                    }
                }
                Ok(())
            }
        }
    }
}
