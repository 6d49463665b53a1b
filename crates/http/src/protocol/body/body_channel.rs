use crate::protocol::{Message, ParseError, ParsedRequest, PayloadItem, PayloadSize};
use bytes::Bytes;
use futures::{Sink, SinkExt, Stream, StreamExt, channel::mpsc};
use http_body::{Body, Frame, SizeHint};
use std::pin::Pin;
use std::task::{Context, Poll};
use tracing::{error, trace};

type PayloadStreamItem = Result<Message<(ParsedRequest, PayloadSize)>, ParseError>;

#[derive(Debug)]
enum BodySignal {
    RequestData,
}

/// The producer half of a request body channel.
///
/// It borrows the connection's payload stream for the duration of one request.
pub struct BodySender<'conn, S> {
    payload_stream: &'conn mut S,
    signal_receiver: mpsc::Receiver<BodySignal>,
    data_sender: mpsc::Sender<Result<PayloadItem, ParseError>>,
    eof: bool,
}

impl<S> std::fmt::Debug for BodySender<'_, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BodySender").field("eof", &self.eof).finish_non_exhaustive()
    }
}

impl<'conn, S> BodySender<'conn, S>
where
    S: Stream<Item = PayloadStreamItem> + Unpin,
{
    /// Serves body chunks until the consumer is dropped, then drains what is left.
    ///
    /// Returns an error when the body itself is malformed or the stream ends early.
    /// In that case the connection can no longer find the start of the next request.
    pub async fn start(&mut self) -> Result<(), ParseError> {
        while !self.eof {
            let Some(BodySignal::RequestData) = self.signal_receiver.next().await else {
                break;
            };

            match self.read_data().await {
                Ok(payload_item) => {
                    self.eof = payload_item.is_eof();
                    if self.data_sender.send(Ok(payload_item)).await.is_err() {
                        trace!("request body consumer dropped while sending data");
                        break;
                    }
                }
                Err(e) => {
                    error!(cause = %e, "failed to read request body");
                    // the consumer may already be gone, the error is returned either way
                    let message = e.to_string();
                    let _ignored = self.data_sender.send(Err(ParseError::invalid_body(message))).await;
                    return Err(e);
                }
            }
        }

        self.skip_data().await
    }

    /// Whether the whole body has been read from the connection.
    pub fn is_eof(&self) -> bool {
        self.eof
    }

    async fn read_data(&mut self) -> Result<PayloadItem, ParseError> {
        match self.payload_stream.next().await {
            Some(Ok(Message::Payload(payload_item))) => Ok(payload_item),
            Some(Ok(Message::Header(_))) => Err(ParseError::invalid_body("received a request head while reading a body")),
            Some(Err(e)) => Err(e),
            None => Err(ParseError::invalid_body("connection closed before the request body ended")),
        }
    }

    async fn skip_data(&mut self) -> Result<(), ParseError> {
        let mut skipped: usize = 0;
        while !self.eof {
            match self.read_data().await? {
                PayloadItem::Chunk(bytes) => skipped += bytes.len(),
                PayloadItem::Eof => self.eof = true,
            }
        }

        if skipped > 0 {
            trace!(size = skipped, "skipped unread request body");
        }
        Ok(())
    }
}

/// The consumer half of a request body channel.
#[derive(Debug)]
pub struct ReqBody {
    signal_sender: mpsc::Sender<BodySignal>,
    data_receiver: mpsc::Receiver<Result<PayloadItem, ParseError>>,
    payload_size: PayloadSize,
    in_flight: bool,
    finished: bool,
}

impl ReqBody {
    /// Creates the consumer and producer halves for one request body.
    ///
    /// `payload_size` is what the request head announced; it backs the size hint.
    pub fn channel<S>(payload_stream: &mut S, payload_size: PayloadSize) -> (ReqBody, BodySender<'_, S>)
    where
        S: Stream<Item = PayloadStreamItem> + Unpin,
    {
        let (signal_sender, signal_receiver) = mpsc::channel(1);
        let (data_sender, data_receiver) = mpsc::channel(1);

        let body = ReqBody { signal_sender, data_receiver, payload_size, in_flight: false, finished: payload_size.is_empty() };
        let sender = BodySender { payload_stream, signal_receiver, data_sender, eof: false };
        (body, sender)
    }

    pub fn payload_size(&self) -> PayloadSize {
        self.payload_size
    }
}

impl Body for ReqBody {
    type Data = Bytes;
    type Error = ParseError;

    fn poll_frame(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();

        if this.finished {
            return Poll::Ready(None);
        }

        if !this.in_flight {
            match Pin::new(&mut this.signal_sender).poll_ready(cx) {
                Poll::Ready(Ok(())) => {
                    if let Err(e) = Pin::new(&mut this.signal_sender).start_send(BodySignal::RequestData) {
                        return Poll::Ready(Some(Err(ParseError::invalid_body(e))));
                    }
                    this.in_flight = true;
                }
                Poll::Ready(Err(e)) => return Poll::Ready(Some(Err(ParseError::invalid_body(e)))),
                Poll::Pending => return Poll::Pending,
            }
        }

        match this.data_receiver.poll_next_unpin(cx) {
            Poll::Ready(Some(Ok(PayloadItem::Chunk(bytes)))) => {
                this.in_flight = false;
                Poll::Ready(Some(Ok(Frame::data(bytes))))
            }
            Poll::Ready(Some(Ok(PayloadItem::Eof))) => {
                this.in_flight = false;
                this.finished = true;
                Poll::Ready(None)
            }
            Poll::Ready(Some(Err(e))) => {
                this.in_flight = false;
                this.finished = true;
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                this.in_flight = false;
                this.finished = true;
                Poll::Ready(Some(Err(ParseError::invalid_body("request body is no longer readable"))))
            }
            Poll::Pending => Poll::Pending,
        }
    }

    fn is_end_stream(&self) -> bool {
        self.finished
    }

    fn size_hint(&self) -> SizeHint {
        self.payload_size.into()
    }
}

impl From<PayloadSize> for SizeHint {
    fn from(payload_size: PayloadSize) -> Self {
        match payload_size {
            PayloadSize::Length(length) => SizeHint::with_exact(length),
            PayloadSize::Empty => SizeHint::with_exact(0),
            PayloadSize::Chunked | PayloadSize::UntilClose => SizeHint::new(),
        }
    }
}
