use std::sync::Arc;

use futures::StreamExt;
use http::{StatusCode, Version};
use micro_wsgi_http::codec::{RequestDecoder, ResponseEncoder};
use micro_wsgi_http::protocol::body::ReqBody;
use micro_wsgi_http::protocol::{Message, ParseError, ParsedRequest, PayloadSize};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::select;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, error, info, trace, warn};

use super::ConnectionState;
use crate::application::{AppResult, Application};
use crate::config::ServerConfig;
use crate::environ::{ConnectionInfo, EnvironBuilder, RequestInput};
use crate::error::{ConnectionError, MalformedRequest};
use crate::response::StartResponse;
use crate::writer::{RequestMeta, ResponseWriter, write_error_response};

/// One accepted connection.
///
/// Requests are served strictly one after another: the next head is not parsed
/// before the previous response was written completely, even when the client
/// pipelines them.
pub struct HttpConnection<R, W> {
    framed_read: FramedRead<R, RequestDecoder>,
    framed_write: FramedWrite<W, ResponseEncoder>,
    environ_builder: EnvironBuilder,
    config: Arc<ServerConfig>,
    info: ConnectionInfo,
    state: ConnectionState,
}

/// What happens after a request cycle ended without error.
enum Cycle {
    KeepAlive,
    Close,
}

/// How the invocation of the application ended.
enum Invocation {
    Returned(AppResult),
    WriteFailed(ConnectionError),
}

impl<R, W> HttpConnection<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W, config: Arc<ServerConfig>, info: ConnectionInfo) -> Self {
        let decoder = RequestDecoder::with_parser(config.http_parser());
        Self {
            framed_read: FramedRead::with_capacity(reader, decoder, config.read_buffer_size()),
            framed_write: FramedWrite::new(writer, ResponseEncoder::new()),
            environ_builder: EnvironBuilder::new(&config),
            config,
            info,
            state: ConnectionState::AwaitingRequest,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Serves requests until the connection closes.
    ///
    /// Returns `Ok` when the connection ended normally: the peer closed it, the
    /// idle timeout expired, or a response asked for close. Errors that were
    /// answered with a `400` or `500` are still returned, after the response was
    /// written.
    pub async fn process<A>(mut self, application: Arc<A>) -> Result<(), ConnectionError>
    where
        A: Application + ?Sized,
    {
        let result = self.run(application.as_ref()).await;

        if let Err(e) = self.framed_write.get_mut().shutdown().await {
            trace!(cause = %e, "failed to shut down the connection writer");
        }
        self.state.advance(ConnectionState::Closed);
        result
    }

    async fn run<A>(&mut self, application: &A) -> Result<(), ConnectionError>
    where
        A: Application + ?Sized,
    {
        loop {
            let waiting = if self.framed_read.read_buffer().is_empty() {
                ConnectionState::AwaitingRequest
            } else {
                ConnectionState::Parsing
            };
            self.state.advance(waiting);

            let next = match self.config.keep_alive_timeout() {
                Some(timeout) => match tokio::time::timeout(timeout, self.framed_read.next()).await {
                    Ok(next) => next,
                    Err(_elapsed) => {
                        info!(peer = ?self.info.peer_addr, "idle timeout, closing connection");
                        self.state.advance(ConnectionState::Closing);
                        return Ok(());
                    }
                },
                None => self.framed_read.next().await,
            };

            match next {
                Some(Ok(Message::Header((request, payload_size)))) => {
                    self.state.advance(ConnectionState::Parsing);
                    match self.do_process(request, payload_size, application).await? {
                        Cycle::KeepAlive => {}
                        Cycle::Close => {
                            self.state.advance(ConnectionState::Closing);
                            return Ok(());
                        }
                    }
                }

                Some(Ok(Message::Payload(_))) => {
                    error!("received request body bytes outside of a request");
                    let e = ParseError::invalid_body("body bytes without a request head");
                    return self.reject(Version::HTTP_11, e.into()).await;
                }

                Some(Err(ParseError::Io { source })) => {
                    warn!(cause = %source, "failed to read request");
                    return Err(ConnectionError::Transport(source));
                }

                Some(Err(e)) => {
                    warn!(cause = %e, "malformed request");
                    self.state.advance(ConnectionState::Parsing);
                    return self.reject(Version::HTTP_11, MalformedRequest::from(e).into()).await;
                }

                None => {
                    info!(peer = ?self.info.peer_addr, "peer closed the connection");
                    self.state.advance(ConnectionState::Closing);
                    return Ok(());
                }
            }
        }
    }

    /// Answers a malformed request with `400` and gives up on the connection.
    async fn reject(&mut self, version: Version, e: ConnectionError) -> Result<(), ConnectionError> {
        self.state.advance(ConnectionState::Closing);
        write_error_response(&mut self.framed_write, version, StatusCode::BAD_REQUEST).await?;
        Err(e)
    }

    async fn do_process<A>(
        &mut self,
        request: ParsedRequest,
        payload_size: PayloadSize,
        application: &A,
    ) -> Result<Cycle, ConnectionError>
    where
        A: Application + ?Sized,
    {
        self.state.advance(ConnectionState::BuildingEnvironment);
        debug!(method = %request.method(), target = request.target(), version = ?request.version(), "received request");

        let meta = RequestMeta::new(&request);
        let (req_body, mut body_sender) = ReqBody::channel(&mut self.framed_read, payload_size);

        let mut environ = match self.environ_builder.build(&request, &self.info, RequestInput::new(req_body), meta.keep_alive) {
            Ok(environ) => environ,
            Err(e) => {
                warn!(cause = %e, "malformed request");
                self.state.advance(ConnectionState::Closing);
                write_error_response(&mut self.framed_write, meta.version, StatusCode::BAD_REQUEST).await?;
                return Err(e.into());
            }
        };

        if request.expects_continue() && !payload_size.is_empty() {
            let writer = self.framed_write.get_mut();
            writer.write_all(b"HTTP/1.1 100 Continue\r\n\r\n").await?;
            writer.flush().await?;
            trace!("sent 100 continue");
        }

        self.state.advance(ConnectionState::Invoking);
        let (start_response, mut write_rx) = StartResponse::channel();
        let mut writer = ResponseWriter::new(&mut self.framed_write, start_response.clone(), meta);

        // the application and the request body producer run concurrently: the
        // application may wait for body bytes that only the producer reads
        let body_future = body_sender.start();
        tokio::pin!(body_future);
        let mut body_result = None;

        let mut invocation = {
            let mut app_future = application.call(&mut environ, &start_response);
            loop {
                select! {
                    biased;
                    Some(chunk) = write_rx.next() => {
                        if let Err(e) = writer.write_chunk(chunk).await {
                            break Invocation::WriteFailed(e);
                        }
                    }
                    result = &mut app_future => break Invocation::Returned(result),
                    result = &mut body_future, if body_result.is_none() => body_result = Some(result),
                }
            }
        };

        while let Ok(chunk) = write_rx.try_recv() {
            if let Invocation::Returned(_) = invocation
                && let Err(e) = writer.write_chunk(chunk).await
            {
                invocation = Invocation::WriteFailed(e);
            }
        }

        // the request body is only readable while the application runs, whatever
        // is left is skipped while the response goes out
        environ.close_input();

        if start_response.late_call() {
            error!("start_response called after the response was committed, aborting connection");
            self.state.advance(ConnectionState::Closed);
            return Err(ConnectionError::LateHeader);
        }

        let result = match invocation {
            Invocation::WriteFailed(e) => Err(e),
            Invocation::Returned(Ok(body)) => {
                self.state.advance(ConnectionState::WritingResponse);
                let write_future = writer.write_body(body);
                tokio::pin!(write_future);
                loop {
                    select! {
                        result = &mut write_future => break result,
                        result = &mut body_future, if body_result.is_none() => body_result = Some(result),
                    }
                }
            }
            Invocation::Returned(Err(e)) => Err(ConnectionError::application(e, writer.is_committed())),
        };

        match result {
            Ok(()) => {
                // the next request starts after the skipped body, a closing
                // connection does not wait for it
                let body_result = match body_result {
                    Some(body_result) => body_result,
                    None if writer.keep_alive() => body_future.await,
                    None => {
                        trace!("closing without reading the rest of the request body");
                        Ok(())
                    }
                };
                if let Err(e) = &body_result {
                    warn!(cause = %e, "failed to read request body, closing after the response");
                }

                let keep_alive = writer.keep_alive() && body_result.is_ok();
                trace!(keep_alive, "response complete");
                Ok(if keep_alive { Cycle::KeepAlive } else { Cycle::Close })
            }
            Err(e) if e.is_recoverable() && !writer.is_committed() => {
                error!(cause = %e, "request failed before the response was committed");
                self.state.advance(ConnectionState::Closing);
                write_error_response(&mut self.framed_write, meta.version, StatusCode::INTERNAL_SERVER_ERROR).await?;
                Err(e)
            }
            Err(ConnectionError::LateHeader) => {
                error!("start_response called while the body was produced, aborting connection");
                self.state.advance(ConnectionState::Closed);
                Err(ConnectionError::LateHeader)
            }
            Err(e) => {
                error!(cause = %e, "response failed after it was committed, aborting connection");
                self.state.advance(ConnectionState::Closed);
                Err(e)
            }
        }
    }
}

impl<R, W> std::fmt::Debug for HttpConnection<R, W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpConnection").field("info", &self.info).field("state", &self.state).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::application_fn;
    use crate::environ::Environ;
    use crate::error::ResponseError;
    use crate::response::ResponseBody;
    use async_trait::async_trait;
    use futures::stream;
    use indoc::indoc;
    use micro_wsgi_http::codec::ParserKind;
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::io::AsyncReadExt;

    async fn exchange<A: Application + 'static>(config: ServerConfig, application: Arc<A>, raw: &str) -> (Result<(), ConnectionError>, String) {
        let (mut client, server) = tokio::io::duplex(64 * 1024);
        client.write_all(raw.as_bytes()).await.unwrap();
        client.shutdown().await.unwrap();

        let (reader, writer) = tokio::io::split(server);
        let connection = HttpConnection::new(reader, writer, Arc::new(config), ConnectionInfo::default());
        let result = connection.process(application).await;

        let mut response = String::new();
        client.read_to_string(&mut response).await.unwrap();
        (result, response)
    }

    /// Echoes `PATH_INFO` with a `Content-Length` and counts its invocations.
    struct Echo {
        calls: AtomicUsize,
    }

    impl Echo {
        fn new() -> Arc<Self> {
            Arc::new(Self { calls: AtomicUsize::new(0) })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Application for Echo {
        async fn call(&self, environ: &mut Environ, start_response: &StartResponse) -> AppResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let path = environ.get_str("PATH_INFO").unwrap_or_default().to_owned();
            let length = path.len().to_string();
            start_response.start("200 OK", [("Content-Type", "text/plain"), ("Content-Length", length.as_str())])?;
            Ok(ResponseBody::from(path))
        }
    }

    /// Reads the whole request body and sends it back.
    struct ReadBody;

    #[async_trait]
    impl Application for ReadBody {
        async fn call(&self, environ: &mut Environ, start_response: &StartResponse) -> AppResult {
            let body = environ.input_mut().read_to_end().await?;
            start_response.start("200 OK", Vec::<(&str, &str)>::new())?;
            Ok(ResponseBody::from(body))
        }
    }

    /// Streams through `write()` and returns an empty body.
    struct Streaming;

    #[async_trait]
    impl Application for Streaming {
        async fn call(&self, _environ: &mut Environ, start_response: &StartResponse) -> AppResult {
            let mut writer = start_response.start("200 OK", Vec::<(&str, &str)>::new())?.into_writer();
            writer.write("hello ").await?;
            writer.write("world").await?;
            Ok(ResponseBody::empty())
        }
    }

    /// Writes, then calls `start_response` again and ignores the error.
    struct LateHeader;

    #[async_trait]
    impl Application for LateHeader {
        async fn call(&self, _environ: &mut Environ, start_response: &StartResponse) -> AppResult {
            let mut writer = start_response.start("200 OK", Vec::<(&str, &str)>::new())?.into_writer();
            writer.write("partial").await?;
            let late = start_response.start("500 Internal Server Error", Vec::<(&str, &str)>::new());
            assert!(matches!(late, Err(ResponseError::LateHeader)));
            Ok(ResponseBody::empty())
        }
    }

    /// Records a head, then calls `start_response` again while its body is produced.
    struct LateFromBody;

    #[async_trait]
    impl Application for LateFromBody {
        async fn call(&self, _environ: &mut Environ, start_response: &StartResponse) -> AppResult {
            start_response.start("200 OK", Vec::<(&str, &str)>::new())?;
            let late = start_response.clone();
            Ok(ResponseBody::stream(stream::iter(["first", "second"]).map(move |chunk| {
                if chunk == "second" {
                    let result = late.start("500 Internal Server Error", Vec::<(&str, &str)>::new());
                    assert!(matches!(result, Err(ResponseError::LateHeader)));
                }
                Ok::<_, io::Error>(chunk)
            })))
        }
    }

    #[tokio::test]
    async fn http_11_keeps_connection_open() {
        let app = Echo::new();
        let raw = indoc! {"
            GET /first HTTP/1.1
            Host: localhost

            GET /second HTTP/1.1
            Host: localhost

        "};

        let (result, response) = exchange(ServerConfig::default(), Arc::clone(&app), raw).await;

        result.unwrap();
        assert_eq!(app.calls(), 2);
        assert_eq!(
            response,
            "HTTP/1.1 200 OK\r\ncontent-type: text/plain\r\ncontent-length: 6\r\n\r\n/first\
             HTTP/1.1 200 OK\r\ncontent-type: text/plain\r\ncontent-length: 7\r\n\r\n/second"
        );
    }

    #[tokio::test]
    async fn http_10_closes_after_response() {
        let app = Echo::new();
        let raw = indoc! {"
            GET /first HTTP/1.0

            GET /second HTTP/1.0

        "};

        let (result, response) = exchange(ServerConfig::default(), Arc::clone(&app), raw).await;

        result.unwrap();
        assert_eq!(app.calls(), 1);
        assert_eq!(response, "HTTP/1.0 200 OK\r\ncontent-type: text/plain\r\ncontent-length: 6\r\nconnection: close\r\n\r\n/first");
    }

    #[tokio::test]
    async fn http_11_connection_close() {
        let app = Echo::new();
        let raw = "GET /only HTTP/1.1\r\nConnection: close\r\n\r\nGET /never HTTP/1.1\r\n\r\n";

        let (result, response) = exchange(ServerConfig::default(), Arc::clone(&app), raw).await;

        result.unwrap();
        assert_eq!(app.calls(), 1);
        assert!(response.contains("connection: close\r\n"));
        assert!(response.ends_with("/only"));
    }

    #[tokio::test]
    async fn empty_method_is_rejected_by_both_parsers() {
        for parser in [ParserKind::Fast, ParserKind::Plain] {
            let app = Echo::new();
            let config = ServerConfig::builder().http_parser(parser).build();

            let (result, response) = exchange(config, Arc::clone(&app), " /index HTTP/1.1\r\nHost: localhost\r\n\r\n").await;

            assert!(matches!(result, Err(ConnectionError::Malformed(_))), "{parser}: {result:?}");
            assert_eq!(app.calls(), 0);
            assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"), "{parser}: {response}");
            assert!(response.contains("connection: close\r\n"));
        }
    }

    #[tokio::test]
    async fn header_line_without_colon_is_rejected() {
        let app = Echo::new();
        let (result, response) =
            exchange(ServerConfig::default(), Arc::clone(&app), "GET / HTTP/1.1\r\nno separator here\r\n\r\n").await;

        assert!(matches!(result, Err(ConnectionError::Malformed(_))));
        assert_eq!(app.calls(), 0);
        assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"));
    }

    #[tokio::test]
    async fn unsupported_version_is_rejected() {
        let app = Echo::new();
        let (result, response) = exchange(ServerConfig::default(), Arc::clone(&app), "GET / HTTP/2.0\r\n\r\n").await;

        assert!(matches!(result, Err(ConnectionError::Malformed(_))));
        assert_eq!(app.calls(), 0);
        assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"));
    }

    #[tokio::test]
    async fn application_error_becomes_500() {
        let app = Arc::new(application_fn(|_environ, _start_response| Err("database unavailable".into())));
        let (result, response) = exchange(ServerConfig::default(), app, "GET / HTTP/1.1\r\n\r\n").await;

        assert!(matches!(result, Err(ConnectionError::Application { committed: false, .. })));
        assert_eq!(
            response,
            "HTTP/1.1 500 Internal Server Error\r\ncontent-type: text/plain\r\nconnection: close\r\ncontent-length: 21\r\n\r\nInternal Server Error"
        );
    }

    #[tokio::test]
    async fn error_after_start_response_is_still_recoverable() {
        let app = Arc::new(application_fn(|_environ, start_response| {
            start_response.start("200 OK", [("Content-Length", "2")])?;
            Err("failed after start_response".into())
        }));
        let (result, response) = exchange(ServerConfig::default(), app, "GET / HTTP/1.1\r\n\r\n").await;

        assert!(matches!(result, Err(ConnectionError::Application { committed: false, .. })));
        assert!(response.starts_with("HTTP/1.1 500 Internal Server Error\r\n"));
    }

    #[tokio::test]
    async fn write_streams_before_return() {
        let (result, response) = exchange(ServerConfig::default(), Arc::new(Streaming), "GET / HTTP/1.1\r\n\r\n").await;

        result.unwrap();
        assert_eq!(response, "HTTP/1.1 200 OK\r\ntransfer-encoding: chunked\r\n\r\n6\r\nhello \r\n5\r\nworld\r\n0\r\n\r\n");
    }

    #[tokio::test]
    async fn late_header_aborts() {
        let (result, response) = exchange(ServerConfig::default(), Arc::new(LateHeader), "GET / HTTP/1.1\r\n\r\nGET / HTTP/1.1\r\n\r\n").await;

        assert!(matches!(result, Err(ConnectionError::LateHeader)));
        assert_eq!(response, "HTTP/1.1 200 OK\r\ntransfer-encoding: chunked\r\n\r\n7\r\npartial\r\n");
    }

    #[tokio::test]
    async fn late_header_from_body_aborts() {
        let raw = "GET / HTTP/1.1\r\n\r\nGET / HTTP/1.1\r\n\r\n";
        let (result, response) = exchange(ServerConfig::default(), Arc::new(LateFromBody), raw).await;

        assert!(matches!(result, Err(ConnectionError::LateHeader)));
        assert_eq!(response, "HTTP/1.1 200 OK\r\ntransfer-encoding: chunked\r\n\r\n5\r\nfirst\r\n");
    }

    #[tokio::test]
    async fn responds_before_unread_body_arrives() {
        let app = Echo::new();
        let (mut client, server) = tokio::io::duplex(64 * 1024);
        client.write_all(b"POST /upload HTTP/1.1\r\nContent-Length: 1000\r\n\r\npartial").await.unwrap();

        let (reader, writer) = tokio::io::split(server);
        let connection = HttpConnection::new(reader, writer, Arc::new(ServerConfig::default()), ConnectionInfo::default());

        let expected = "HTTP/1.1 200 OK\r\ncontent-type: text/plain\r\ncontent-length: 7\r\n\r\n/upload";
        let client_side = async move {
            let mut response = vec![0; expected.len()];
            tokio::time::timeout(Duration::from_secs(1), client.read_exact(&mut response))
                .await
                .expect("the response did not wait for the request body")
                .unwrap();
            drop(client);
            String::from_utf8(response).unwrap()
        };

        let (_result, response) = tokio::join!(connection.process(Arc::clone(&app)), client_side);
        assert_eq!(app.calls(), 1);
        assert_eq!(response, expected);
    }

    #[tokio::test]
    async fn request_body_is_readable() {
        let raw = "POST /upload HTTP/1.1\r\nContent-Length: 5\r\n\r\nhelloPOST /upload HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n3\r\nabc\r\n0\r\n\r\n";
        let (result, response) = exchange(ServerConfig::default(), Arc::new(ReadBody), raw).await;

        result.unwrap();
        assert_eq!(
            response,
            "HTTP/1.1 200 OK\r\ncontent-length: 5\r\n\r\nhelloHTTP/1.1 200 OK\r\ncontent-length: 3\r\n\r\nabc"
        );
    }

    #[tokio::test]
    async fn unread_body_is_skipped() {
        let app = Echo::new();
        let raw = "POST /ignored HTTP/1.1\r\nContent-Length: 11\r\n\r\nhello worldGET /next HTTP/1.1\r\n\r\n";

        let (result, response) = exchange(ServerConfig::default(), Arc::clone(&app), raw).await;

        result.unwrap();
        assert_eq!(app.calls(), 2);
        assert!(response.ends_with("\r\n\r\n/next"));
    }

    #[tokio::test]
    async fn expect_continue_gets_interim_response() {
        let raw = "POST / HTTP/1.1\r\nExpect: 100-continue\r\nContent-Length: 2\r\nConnection: close\r\n\r\nhi";
        let (result, response) = exchange(ServerConfig::default(), Arc::new(ReadBody), raw).await;

        result.unwrap();
        assert_eq!(response, "HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 200 OK\r\nconnection: close\r\ncontent-length: 2\r\n\r\nhi");
    }

    #[tokio::test]
    async fn idle_connection_times_out() {
        let app = Echo::new();
        let config = ServerConfig::builder().keep_alive_timeout(Duration::from_millis(20)).build();

        let (mut client, server) = tokio::io::duplex(64 * 1024);
        client.write_all(b"GET /once HTTP/1.1\r\n\r\n").await.unwrap();

        let (reader, writer) = tokio::io::split(server);
        let connection = HttpConnection::new(reader, writer, Arc::new(config), ConnectionInfo::default());
        connection.process(Arc::clone(&app)).await.unwrap();

        let mut response = String::new();
        client.read_to_string(&mut response).await.unwrap();
        assert_eq!(app.calls(), 1);
        assert!(response.ends_with("/once"));
    }
}
