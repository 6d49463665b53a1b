//! HTTP request decoder module
//!
//! [`RequestDecoder`] coordinates head parsing and payload decoding for one
//! connection. Heads are parsed by the selected [`ParserKind`]; payloads by a
//! [`PayloadDecoder`] chosen from the head.

use crate::codec::body::PayloadDecoder;
use crate::codec::header::{HeaderDecoder, ParserKind};
use crate::protocol::{Message, ParseError, ParsedRequest, PayloadItem, PayloadSize};
use bytes::BytesMut;
use tokio_util::codec::Decoder;

/// A decoder for HTTP requests that handles both heads and payload
///
/// The state lives in `payload_decoder`:
/// - `None`: the next bytes belong to a request head
/// - `Some(_)`: the next bytes belong to the current request body
#[derive(Debug)]
pub struct RequestDecoder {
    header_decoder: HeaderDecoder,
    payload_decoder: Option<PayloadDecoder>,
}

impl RequestDecoder {
    /// Creates a decoder backed by the fast parser
    pub fn new() -> Self {
        Default::default()
    }

    pub fn with_parser(parser: ParserKind) -> Self {
        Self { header_decoder: HeaderDecoder::new(parser), payload_decoder: None }
    }

    pub fn parser(&self) -> ParserKind {
        self.header_decoder.kind()
    }
}

impl Default for RequestDecoder {
    fn default() -> Self {
        Self::with_parser(ParserKind::default())
    }
}

impl Decoder for RequestDecoder {
    type Item = Message<(ParsedRequest, PayloadSize)>;
    type Error = ParseError;

    /// - `Ok(Some(Message::Header(_)))`: a request head was decoded
    /// - `Ok(Some(Message::Payload(_)))`: a payload chunk or the payload EOF
    /// - `Ok(None)`: more bytes are needed
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(payload_decoder) = &mut self.payload_decoder {
            let message = match payload_decoder.decode(src)? {
                Some(item @ PayloadItem::Chunk(_)) => Some(Message::Payload(item)),
                Some(item @ PayloadItem::Eof) => {
                    self.payload_decoder.take();
                    Some(Message::Payload(item))
                }
                None => None,
            };

            return Ok(message);
        }

        let message = match self.header_decoder.decode(src)? {
            Some((request, payload_size)) => {
                self.payload_decoder = Some(payload_size.into());
                Some(Message::Header((request, payload_size)))
            }
            None => None,
        };

        Ok(message)
    }
}
