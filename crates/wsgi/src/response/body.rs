use std::collections::VecDeque;
use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt, TryStreamExt};
use http_body::Body;
use http_body_util::BodyExt;

use crate::error::AppError;

/// The body an application returns.
///
/// It is a finite, single-pass sequence of chunks, pulled one at a time by the
/// response writer. A stream item may fail; what happens then depends on whether
/// the response head was already written.
pub struct ResponseBody {
    kind: Kind,
}

enum Kind {
    Once(Option<Bytes>),
    Chunks(VecDeque<Bytes>),
    Stream(BoxStream<'static, Result<Bytes, AppError>>),
}

impl ResponseBody {
    pub fn empty() -> Self {
        Self { kind: Kind::Once(None) }
    }

    pub fn once<B: Into<Bytes>>(bytes: B) -> Self {
        Self { kind: Kind::Once(Some(bytes.into())) }
    }

    /// A body of already produced chunks, written in order.
    pub fn chunks<I, B>(chunks: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<Bytes>,
    {
        Self { kind: Kind::Chunks(chunks.into_iter().map(Into::into).collect()) }
    }

    /// A lazily produced body. Items are pulled only when the writer is ready for them.
    pub fn stream<S, B, E>(stream: S) -> Self
    where
        S: Stream<Item = Result<B, E>> + Send + 'static,
        B: Into<Bytes> + 'static,
        E: Into<AppError> + 'static,
    {
        Self { kind: Kind::Stream(stream.map_ok(Into::<Bytes>::into).map_err(Into::<AppError>::into).boxed()) }
    }

    /// Adapts an `http_body::Body`. Trailers are dropped.
    pub fn from_http_body<B>(body: B) -> Self
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<AppError> + 'static,
    {
        Self::stream(body.into_data_stream())
    }

    /// Whether the body is known to yield nothing more. Only bodies built from
    /// already produced bytes can tell; a lazy stream never claims it.
    pub(crate) fn is_exhausted(&self) -> bool {
        match &self.kind {
            Kind::Once(bytes) => bytes.is_none(),
            Kind::Chunks(chunks) => chunks.is_empty(),
            Kind::Stream(_) => false,
        }
    }
}

impl Stream for ResponseBody {
    type Item = Result<Bytes, AppError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match &mut self.get_mut().kind {
            Kind::Once(bytes) => Poll::Ready(bytes.take().map(Ok)),
            Kind::Chunks(chunks) => Poll::Ready(chunks.pop_front().map(Ok)),
            Kind::Stream(stream) => stream.poll_next_unpin(cx),
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match &self.kind {
            Kind::Once(bytes) => {
                let n = usize::from(bytes.is_some());
                (n, Some(n))
            }
            Kind::Chunks(chunks) => (chunks.len(), Some(chunks.len())),
            Kind::Stream(stream) => stream.size_hint(),
        }
    }
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            Kind::Once(bytes) => f.debug_tuple("ResponseBody::Once").field(bytes).finish(),
            Kind::Chunks(chunks) => f.debug_tuple("ResponseBody::Chunks").field(&chunks.len()).finish(),
            Kind::Stream(_) => f.write_str("ResponseBody::Stream"),
        }
    }
}

impl Default for ResponseBody {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<String> for ResponseBody {
    fn from(value: String) -> Self {
        Self::once(value)
    }
}

impl From<&'static str> for ResponseBody {
    fn from(value: &'static str) -> Self {
        Self::once(value)
    }
}

impl From<Vec<u8>> for ResponseBody {
    fn from(value: Vec<u8>) -> Self {
        Self::once(value)
    }
}

impl From<Bytes> for ResponseBody {
    fn from(value: Bytes) -> Self {
        Self::once(value)
    }
}

impl From<Vec<Bytes>> for ResponseBody {
    fn from(value: Vec<Bytes>) -> Self {
        Self::chunks(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use http_body_util::Full;
    use std::io;

    fn check_send<T: Send>() {}

    #[test]
    fn is_send() {
        check_send::<ResponseBody>();
    }

    #[tokio::test]
    async fn chunks_in_order() {
        let mut body = ResponseBody::chunks(["hello ", "world"]);
        assert_eq!(body.size_hint(), (2, Some(2)));

        assert_eq!(body.next().await.unwrap().unwrap(), "hello ");
        assert_eq!(body.next().await.unwrap().unwrap(), "world");
        assert!(body.next().await.is_none());
    }

    #[tokio::test]
    async fn once_and_empty() {
        let mut body = ResponseBody::from("single");
        assert_eq!(body.next().await.unwrap().unwrap(), "single");
        assert!(body.next().await.is_none());

        let mut body = ResponseBody::empty();
        assert_eq!(body.size_hint(), (0, Some(0)));
        assert!(body.is_exhausted());
        assert!(body.next().await.is_none());
    }

    #[tokio::test]
    async fn only_produced_bodies_report_exhaustion() {
        let mut body = ResponseBody::chunks(["a"]);
        assert!(!body.is_exhausted());
        body.next().await.unwrap().unwrap();
        assert!(body.is_exhausted());

        let body = ResponseBody::stream(stream::empty::<Result<Bytes, io::Error>>());
        assert!(!body.is_exhausted());
    }

    #[tokio::test]
    async fn stream_errors_are_items() {
        let items: Vec<Result<&'static str, io::Error>> = vec![Ok("a"), Err(io::Error::other("generator failed")), Ok("b")];
        let mut body = ResponseBody::stream(stream::iter(items));

        assert_eq!(body.next().await.unwrap().unwrap(), "a");
        assert_eq!(body.next().await.unwrap().unwrap_err().to_string(), "generator failed");
    }

    #[tokio::test]
    async fn adapts_http_body() {
        let mut body = ResponseBody::from_http_body(Full::new(Bytes::from_static(b"full")));
        assert_eq!(body.next().await.unwrap().unwrap(), "full");
        assert!(body.next().await.is_none());
    }
}
