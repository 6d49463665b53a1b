use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use futures::SinkExt;
use futures::channel::mpsc;
use http::header::HeaderName;
use http::{HeaderValue, StatusCode, Version};
use micro_wsgi_http::protocol::{ReasonPhrase, ResponseHead};
use tracing::{trace, warn};

use crate::error::{AppError, ResponseError};

const HOP_BY_HOP: [&str; 8] =
    ["connection", "keep-alive", "proxy-authenticate", "proxy-authorization", "te", "trailers", "transfer-encoding", "upgrade"];

/// The `start_response` handle given to an application.
///
/// It records the status line and headers of one response. The head stays
/// editable until it is committed, which happens when the first body byte is
/// about to be written, or right away when the application uses the
/// [`BodyWriter`] returned by [`start`](Self::start).
///
/// Clones share the same response.
#[derive(Debug, Clone)]
pub struct StartResponse {
    state: Arc<Mutex<State>>,
    write_tx: mpsc::Sender<Bytes>,
}

#[derive(Debug)]
struct State {
    phase: Phase,
    /// `start_response` was called without `exc_info` after commit
    late_call: bool,
    /// bytes were handed to the writer through `write()`
    streaming: bool,
}

#[derive(Debug)]
enum Phase {
    Pending,
    Recorded(ResponseHead),
    Committed(StatusCode),
}

/// A successful `start_response` call.
#[derive(Debug)]
pub enum Started {
    /// First head of the response
    Recorded(BodyWriter),
    /// The head replaced an earlier one, `exc_info` was given
    Replaced(BodyWriter),
}

impl Started {
    pub fn is_replaced(&self) -> bool {
        matches!(self, Started::Replaced(_))
    }

    /// The legacy `write()` callable.
    pub fn into_writer(self) -> BodyWriter {
        match self {
            Started::Recorded(writer) | Started::Replaced(writer) => writer,
        }
    }
}

impl StartResponse {
    /// Creates a handle and the receiver of bytes written through `write()`.
    pub fn channel() -> (StartResponse, mpsc::Receiver<Bytes>) {
        let (write_tx, write_rx) = mpsc::channel(1);
        let state = State { phase: Phase::Pending, late_call: false, streaming: false };
        (StartResponse { state: Arc::new(Mutex::new(state)), write_tx }, write_rx)
    }

    /// Records `status` and `headers`, failing if a head was already recorded.
    pub fn start<S, I, K, V>(&self, status: S, headers: I) -> Result<Started, ResponseError>
    where
        S: AsRef<str>,
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        self.call(status, headers, None)
    }

    /// `start_response(status, headers, exc_info)`.
    ///
    /// - without `exc_info`: records the head unless one was recorded before
    ///   ([`ResponseError::HeadersAlreadySet`]) or committed
    ///   ([`ResponseError::LateHeader`])
    /// - with `exc_info`: replaces any recorded head, or, when the head is already
    ///   committed, hands `exc_info` back as [`ResponseError::Reraised`]
    ///
    /// `status` is `"<code> <reason>"`. Header names must be valid tokens, values
    /// latin-1 text, and hop-by-hop headers are refused since framing belongs to
    /// the server.
    pub fn call<S, I, K, V>(&self, status: S, headers: I, exc_info: Option<AppError>) -> Result<Started, ResponseError>
    where
        S: AsRef<str>,
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        {
            let mut state = self.lock();
            let committed = state.is_committed();
            match (exc_info, committed) {
                (Some(exc_info), true) => return Err(ResponseError::Reraised { source: exc_info }),
                (None, true) => {
                    state.late_call = true;
                    return Err(ResponseError::LateHeader);
                }
                (None, false) if matches!(state.phase, Phase::Recorded(_)) => return Err(ResponseError::HeadersAlreadySet),
                (Some(exc_info), false) => warn!(cause = %exc_info, "start_response called with exc_info"),
                (None, false) => {}
            }
        }

        let head = build_head(status.as_ref(), headers)?;

        let mut state = self.lock();
        // the head may have been committed while it was being built
        if state.is_committed() {
            state.late_call = true;
            return Err(ResponseError::LateHeader);
        }
        let replaced = matches!(state.phase, Phase::Recorded(_));
        trace!(status = %head.status(), replaced, "recorded response head");
        state.phase = Phase::Recorded(head);

        let writer = BodyWriter { state: Arc::clone(&self.state), write_tx: self.write_tx.clone() };
        Ok(if replaced { Started::Replaced(writer) } else { Started::Recorded(writer) })
    }

    /// Edits the recorded head in place. Returns `false` when there is no head
    /// to edit: nothing was recorded yet or it is already committed.
    pub fn update_head<F: FnOnce(&mut ResponseHead)>(&self, f: F) -> bool {
        let mut state = self.lock();
        if state.streaming {
            return false;
        }
        match &mut state.phase {
            Phase::Recorded(head) => {
                f(head);
                true
            }
            Phase::Pending | Phase::Committed(_) => false,
        }
    }

    pub fn is_started(&self) -> bool {
        !matches!(self.lock().phase, Phase::Pending)
    }

    pub fn is_committed(&self) -> bool {
        self.lock().is_committed()
    }

    /// The status of the recorded or committed head.
    pub fn status(&self) -> Option<StatusCode> {
        match &self.lock().phase {
            Phase::Pending => None,
            Phase::Recorded(head) => Some(head.status()),
            Phase::Committed(status) => Some(*status),
        }
    }

    /// Whether `start_response` was called without `exc_info` after commit,
    /// even if the application swallowed the resulting error.
    pub fn late_call(&self) -> bool {
        self.lock().late_call
    }

    /// Takes the recorded head for writing. From here on the head is committed.
    pub(crate) fn take_head(&self) -> Result<ResponseHead, ResponseError> {
        let mut state = self.lock();
        match std::mem::replace(&mut state.phase, Phase::Pending) {
            Phase::Recorded(head) => {
                state.phase = Phase::Committed(head.status());
                Ok(head)
            }
            Phase::Pending => Err(ResponseError::NotStarted),
            phase @ Phase::Committed(_) => {
                state.phase = phase;
                Err(ResponseError::LateHeader)
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl State {
    fn is_committed(&self) -> bool {
        self.streaming || matches!(self.phase, Phase::Committed(_))
    }
}

/// The legacy `write()` callable returned by `start_response`.
///
/// Every non-empty write commits the head and is sent to the client before
/// `write` returns. Meant for use while the application runs; writing after it
/// returned fails with [`ResponseError::Closed`].
#[derive(Debug)]
pub struct BodyWriter {
    state: Arc<Mutex<State>>,
    write_tx: mpsc::Sender<Bytes>,
}

impl BodyWriter {
    pub async fn write<B: Into<Bytes>>(&mut self, data: B) -> Result<(), ResponseError> {
        let data = data.into();
        if data.is_empty() {
            return Ok(());
        }

        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if matches!(state.phase, Phase::Pending) {
                return Err(ResponseError::NotStarted);
            }
            state.streaming = true;
        }

        self.write_tx.send(data).await.map_err(|_closed| ResponseError::Closed)
    }
}

fn build_head<I, K, V>(status: &str, headers: I) -> Result<ResponseHead, ResponseError>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut head = ResponseHead::new(());
    *head.version_mut() = Version::HTTP_11;

    let (code, reason) = status.split_once(' ').unwrap_or((status, ""));
    let invalid_status = || ResponseError::InvalidStatus(status.to_owned());
    if code.len() != 3 {
        return Err(invalid_status());
    }
    let code = StatusCode::from_bytes(code.as_bytes()).map_err(|_e| invalid_status())?;
    *head.status_mut() = code;

    let reason = reason.trim();
    if !reason.is_empty() && code.canonical_reason() != Some(reason) {
        let reason = ReasonPhrase::new(reason).ok_or_else(invalid_status)?;
        head.extensions_mut().insert(reason);
    }

    for (name, value) in headers {
        let (name, value) = (name.as_ref(), value.as_ref());

        let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| ResponseError::invalid_header(name, e))?;
        if HOP_BY_HOP.contains(&header_name.as_str()) {
            return Err(ResponseError::HopByHopHeader(name.to_owned()));
        }

        let bytes = latin1_bytes(value).ok_or_else(|| ResponseError::invalid_header(name, "value is not latin-1"))?;
        let header_value = HeaderValue::from_bytes(&bytes).map_err(|e| ResponseError::invalid_header(name, e))?;
        head.headers_mut().append(header_name, header_value);
    }

    Ok(head)
}

fn latin1_bytes(value: &str) -> Option<Vec<u8>> {
    value.chars().map(|c| u8::try_from(u32::from(c)).ok()).collect()
}
