use bytes::Bytes;
use http_body::Body;
use http_body_util::BodyExt;
use micro_wsgi_http::protocol::ParseError;
use micro_wsgi_http::protocol::body::ReqBody;

/// `wsgi.input`: the request body, readable while the application runs.
///
/// Once the application returns the connection closes the input and drains
/// whatever was left unread; reads after that fail.
#[derive(Debug)]
pub struct RequestInput {
    state: InputState,
}

#[derive(Debug)]
enum InputState {
    Open(ReqBody),
    Empty,
    Closed,
}

impl RequestInput {
    /// An input without a body.
    pub fn empty() -> Self {
        Self { state: InputState::Empty }
    }

    pub(crate) fn new(body: ReqBody) -> Self {
        if body.is_end_stream() { Self::empty() } else { Self { state: InputState::Open(body) } }
    }

    /// The body length announced by `Content-Length`, if any.
    pub fn content_length(&self) -> Option<u64> {
        match &self.state {
            InputState::Open(body) => body.size_hint().exact(),
            InputState::Empty => Some(0),
            InputState::Closed => None,
        }
    }

    /// Reads the next chunk of the body, `None` at the end.
    pub async fn read_chunk(&mut self) -> Result<Option<Bytes>, ParseError> {
        let body = match &mut self.state {
            InputState::Open(body) => body,
            InputState::Empty => return Ok(None),
            InputState::Closed => return Err(ParseError::invalid_body("request body is closed")),
        };

        while let Some(frame) = body.frame().await {
            // trailers are not exposed
            if let Ok(data) = frame?.into_data() {
                return Ok(Some(data));
            }
        }

        self.state = InputState::Empty;
        Ok(None)
    }

    /// Reads the rest of the body into one buffer.
    pub async fn read_to_end(&mut self) -> Result<Bytes, ParseError> {
        let body = match &mut self.state {
            InputState::Open(body) => body,
            InputState::Empty => return Ok(Bytes::new()),
            InputState::Closed => return Err(ParseError::invalid_body("request body is closed")),
        };

        let bytes = body.collect().await?.to_bytes();
        self.state = InputState::Empty;
        Ok(bytes)
    }

    pub(crate) fn close(&mut self) {
        self.state = InputState::Closed;
    }
}

impl Default for RequestInput {
    fn default() -> Self {
        Self::empty()
    }
}
