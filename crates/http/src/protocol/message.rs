use bytes::{Buf, Bytes};

/// A HTTP message as seen by the codec: a head followed by payload items.
///
/// `T` is the head type (a request or response head) and `Data` the payload
/// chunk type, `Bytes` unless an encoder accepts any [`Buf`].
#[derive(Debug)]
pub enum Message<T, Data: Buf = Bytes> {
    /// The head of the message
    Header(T),
    /// A chunk of payload data or the EOF marker
    Payload(PayloadItem<Data>),
}

/// An item of a message payload stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadItem<Data: Buf = Bytes> {
    /// A chunk of payload data
    Chunk(Data),
    /// Marks the end of the payload
    Eof,
}

/// How the payload of a message is delimited on the wire.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PayloadSize {
    /// Exactly this many bytes, announced with `Content-Length`
    Length(u64),
    /// `Transfer-Encoding: chunked`
    Chunked,
    /// No payload bytes follow the head
    Empty,
    /// The payload ends when the connection closes. Only valid for responses.
    UntilClose,
}

impl PayloadSize {
    #[inline]
    pub fn is_empty(&self) -> bool {
        matches!(self, PayloadSize::Empty | PayloadSize::Length(0))
    }
}

impl<T, D: Buf> Message<T, D> {
    #[inline]
    pub fn is_header(&self) -> bool {
        matches!(self, Message::Header(_))
    }

    /// Returns the payload item, or `None` for a head
    pub fn into_payload_item(self) -> Option<PayloadItem<D>> {
        match self {
            Message::Header(_) => None,
            Message::Payload(payload_item) => Some(payload_item),
        }
    }
}

impl<D: Buf> PayloadItem<D> {
    #[inline]
    pub fn is_eof(&self) -> bool {
        matches!(self, PayloadItem::Eof)
    }

    #[inline]
    pub fn is_chunk(&self) -> bool {
        matches!(self, PayloadItem::Chunk(_))
    }
}
