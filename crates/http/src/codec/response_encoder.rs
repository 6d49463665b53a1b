use crate::codec::body::PayloadEncoder;
use crate::codec::header::HeaderEncoder;
use crate::protocol::{Message, PayloadItem, PayloadSize, ResponseHead, SendError};
use bytes::{Buf, BytesMut};
use std::io;
use std::io::ErrorKind;
use tokio_util::codec::Encoder;
use tracing::error;

/// Encodes a response as a head followed by payload items.
///
/// The [`PayloadSize`] sent with the head fixes the body framing until the
/// payload EOF is encoded, after which the next head may follow.
#[derive(Debug, Default)]
pub struct ResponseEncoder {
    header_encoder: HeaderEncoder,
    payload_encoder: Option<PayloadEncoder>,
}

impl ResponseEncoder {
    pub fn new() -> Self {
        Default::default()
    }

    /// Whether a head was written and its body EOF is still outstanding.
    pub fn in_body(&self) -> bool {
        self.payload_encoder.is_some()
    }
}

impl<D: Buf> Encoder<Message<(ResponseHead, PayloadSize), D>> for ResponseEncoder {
    type Error = SendError;

    fn encode(&mut self, item: Message<(ResponseHead, PayloadSize), D>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            Message::Header((head, payload_size)) => {
                if self.payload_encoder.is_some() {
                    error!("expect payload item but receive response head");
                    return Err(io::Error::from(ErrorKind::InvalidInput).into());
                }

                self.header_encoder.encode((head, payload_size), dst)?;
                self.payload_encoder = Some(payload_size.into());
                Ok(())
            }

            Message::Payload(payload_item) => {
                let Some(payload_encoder) = &mut self.payload_encoder else {
                    error!("expect response header but receive payload item");
                    return Err(io::Error::from(ErrorKind::InvalidInput).into());
                };

                let is_eof = payload_item.is_eof();
                let result = payload_encoder.encode(payload_item, dst);

                if is_eof {
                    self.payload_encoder.take();
                }

                result
            }
        }
    }
}

impl<D: Buf> Encoder<PayloadItem<D>> for ResponseEncoder {
    type Error = SendError;

    fn encode(&mut self, item: PayloadItem<D>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        Encoder::<Message<(ResponseHead, PayloadSize), D>>::encode(self, Message::Payload(item), dst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http::{StatusCode, Version};

    fn head(status: StatusCode) -> ResponseHead {
        let mut head = ResponseHead::new(());
        *head.status_mut() = status;
        *head.version_mut() = Version::HTTP_11;
        head
    }

    #[test]
    fn fixed_length_response() {
        let mut encoder = ResponseEncoder::new();
        let mut dst = BytesMut::new();

        encoder.encode(Message::<_, Bytes>::Header((head(StatusCode::OK), PayloadSize::Length(11))), &mut dst).unwrap();
        assert!(encoder.in_body());
        encoder.encode(PayloadItem::Chunk(Bytes::from_static(b"hello world")), &mut dst).unwrap();
        encoder.encode(PayloadItem::<Bytes>::Eof, &mut dst).unwrap();
        assert!(!encoder.in_body());

        assert_eq!(&dst[..], b"HTTP/1.1 200 OK\r\ncontent-length: 11\r\n\r\nhello world");
    }

    #[test]
    fn payload_before_head_is_rejected() {
        let mut encoder = ResponseEncoder::new();
        let mut dst = BytesMut::new();
        assert!(encoder.encode(PayloadItem::Chunk(Bytes::from_static(b"x")), &mut dst).is_err());
    }

    #[test]
    fn failed_length_check_still_ends_the_body() {
        let mut encoder = ResponseEncoder::new();
        let mut dst = BytesMut::new();

        encoder.encode(Message::<_, Bytes>::Header((head(StatusCode::OK), PayloadSize::Length(4))), &mut dst).unwrap();
        assert!(encoder.encode(PayloadItem::<Bytes>::Eof, &mut dst).is_err());
        assert!(!encoder.in_body());
    }
}
