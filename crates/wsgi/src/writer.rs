//! Serializes a recorded response head and its body onto the connection.
//!
//! Framing is chosen when the head is committed, in this order:
//!
//! 1. no body at all for `HEAD` requests and `1xx`, `204` and `304` statuses;
//!    the body is still pulled to the end, its bytes are dropped
//! 2. the application's `Content-Length`; pulling stops once that many bytes
//!    were written and ending short is a framing error
//! 3. the length of the whole body when it is known before the head goes out:
//!    the body ended early, or it was built from produced bytes and its only
//!    chunk was pulled; lazy streams are never sized this way
//! 4. chunked for a persistent HTTP/1.1 connection
//! 5. otherwise the body runs until the connection closes, announced with
//!    `Connection: close`

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use http::header::{CONNECTION, CONTENT_LENGTH, CONTENT_TYPE};
use http::{HeaderValue, StatusCode, Version};
use micro_wsgi_http::codec::ResponseEncoder;
use micro_wsgi_http::protocol::{Message, ParsedRequest, PayloadItem, PayloadSize, ResponseHead};
use tokio::io::AsyncWrite;
use tokio_util::codec::FramedWrite;
use tracing::{debug, trace};

use crate::error::{ConnectionError, ResponseError};
use crate::response::{ResponseBody, StartResponse};

/// What the writer needs to know about the request being answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RequestMeta {
    pub(crate) version: Version,
    pub(crate) is_head: bool,
    pub(crate) keep_alive: bool,
}

impl RequestMeta {
    pub(crate) fn new(request: &ParsedRequest) -> Self {
        Self { version: request.version(), is_head: request.is_head(), keep_alive: request.keep_alive() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Framing {
    Length { declared: u64, sent: u64 },
    Chunked,
    UntilClose,
    NoBody,
}

impl Framing {
    fn payload_size(self) -> PayloadSize {
        match self {
            Framing::Length { declared, .. } => PayloadSize::Length(declared),
            Framing::Chunked => PayloadSize::Chunked,
            Framing::UntilClose => PayloadSize::UntilClose,
            Framing::NoBody => PayloadSize::Empty,
        }
    }
}

/// Writes one response. The head is taken from the collector on the first
/// non-empty chunk, or when the body ends.
#[derive(Debug)]
pub(crate) struct ResponseWriter<'conn, W> {
    framed: &'conn mut FramedWrite<W, ResponseEncoder>,
    collector: StartResponse,
    meta: RequestMeta,
    framing: Option<Framing>,
    keep_alive: bool,
}

impl<'conn, W> ResponseWriter<'conn, W>
where
    W: AsyncWrite + Unpin,
{
    pub(crate) fn new(framed: &'conn mut FramedWrite<W, ResponseEncoder>, collector: StartResponse, meta: RequestMeta) -> Self {
        Self { framed, collector, meta, framing: None, keep_alive: meta.keep_alive }
    }

    /// Whether any part of the response was handed to the encoder.
    pub(crate) fn is_committed(&self) -> bool {
        self.framing.is_some()
    }

    /// Whether the connection can serve another request after this response.
    pub(crate) fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    /// Writes `chunk` and flushes it, committing the head first if needed.
    pub(crate) async fn write_chunk(&mut self, chunk: Bytes) -> Result<(), ConnectionError> {
        if chunk.is_empty() {
            return Ok(());
        }

        if self.framing.is_none() {
            self.commit(None).await?;
        }

        let chunk = match &mut self.framing {
            Some(Framing::Length { declared, sent }) => {
                let remaining = *declared - *sent;
                if remaining == 0 {
                    trace!(dropped = chunk.len(), "response body already complete");
                    return Ok(());
                }
                let n = remaining.min(chunk.len() as u64);
                *sent += n;
                chunk.slice(..usize::try_from(n).unwrap_or(chunk.len()))
            }
            Some(Framing::NoBody) => return Ok(()),
            Some(Framing::Chunked | Framing::UntilClose) | None => chunk,
        };

        self.framed.send(PayloadItem::Chunk(chunk)).await?;
        Ok(())
    }

    /// Pulls `body` to the end, or until the declared length was written, then
    /// finishes the response.
    pub(crate) async fn write_body(&mut self, mut body: ResponseBody) -> Result<(), ConnectionError> {
        while self.wants_more() {
            let item = body.next().await;
            // producing the body may have called start_response after commit
            if self.collector.late_call() {
                return Err(ConnectionError::LateHeader);
            }

            match item {
                Some(Ok(chunk)) => {
                    if !self.is_committed() && !chunk.is_empty() && body.is_exhausted() {
                        self.commit(Some(chunk.len() as u64)).await?;
                    }
                    self.write_chunk(chunk).await?;
                }
                Some(Err(e)) => return Err(ConnectionError::application(e, self.is_committed())),
                None => break,
            }
        }

        self.finish().await
    }

    /// Ends the body, committing an empty response if nothing was written yet.
    pub(crate) async fn finish(&mut self) -> Result<(), ConnectionError> {
        if self.framing.is_none() {
            self.commit(Some(0)).await?;
        }

        self.framed.send(PayloadItem::<Bytes>::Eof).await?;
        Ok(())
    }

    fn wants_more(&self) -> bool {
        !matches!(self.framing, Some(Framing::Length { declared, sent }) if sent >= declared)
    }

    /// Takes the head from the collector, picks the framing and feeds the head.
    /// `body_length` is the size of the whole body when it is already known.
    async fn commit(&mut self, body_length: Option<u64>) -> Result<(), ConnectionError> {
        let mut head = self.collector.take_head().map_err(|e| ConnectionError::application(e, false))?;
        *head.version_mut() = self.meta.version;

        let framing = if self.meta.is_head || forbids_body(head.status()) {
            Framing::NoBody
        } else if let Some(value) = head.headers().get(CONTENT_LENGTH) {
            let declared = parse_content_length(value)
                .ok_or_else(|| ConnectionError::application(ResponseError::invalid_header(CONTENT_LENGTH, "not a number"), false))?;
            Framing::Length { declared, sent: 0 }
        } else if let Some(declared) = body_length {
            Framing::Length { declared, sent: 0 }
        } else if self.meta.version == Version::HTTP_11 && self.keep_alive {
            Framing::Chunked
        } else {
            self.keep_alive = false;
            Framing::UntilClose
        };

        if !self.keep_alive {
            head.headers_mut().insert(CONNECTION, HeaderValue::from_static("close"));
        } else if self.meta.version == Version::HTTP_10 {
            head.headers_mut().insert(CONNECTION, HeaderValue::from_static("keep-alive"));
        }

        debug!(status = %head.status(), framing = ?framing, keep_alive = self.keep_alive, "committing response head");
        self.framing = Some(framing);
        self.framed.feed(Message::<_, Bytes>::Header((head, framing.payload_size()))).await?;
        Ok(())
    }
}

fn forbids_body(status: StatusCode) -> bool {
    status.is_informational() || status == StatusCode::NO_CONTENT || status == StatusCode::NOT_MODIFIED
}

fn parse_content_length(value: &HeaderValue) -> Option<u64> {
    let value = value.to_str().ok()?.trim();
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    value.parse().ok()
}

/// Writes a complete `text/plain` error response that closes the connection.
pub(crate) async fn write_error_response<W>(
    framed: &mut FramedWrite<W, ResponseEncoder>,
    version: Version,
    status: StatusCode,
) -> Result<(), ConnectionError>
where
    W: AsyncWrite + Unpin,
{
    let body = Bytes::from_static(status.canonical_reason().unwrap_or("Error").as_bytes());

    let mut head = ResponseHead::new(());
    *head.status_mut() = status;
    *head.version_mut() = if version == Version::HTTP_10 { Version::HTTP_10 } else { Version::HTTP_11 };
    head.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    head.headers_mut().insert(CONNECTION, HeaderValue::from_static("close"));

    framed.feed(Message::<_, Bytes>::Header((head, PayloadSize::Length(body.len() as u64)))).await?;
    framed.feed(PayloadItem::Chunk(body)).await?;
    framed.send(PayloadItem::<Bytes>::Eof).await?;
    Ok(())
}
