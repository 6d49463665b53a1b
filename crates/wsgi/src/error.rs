use std::io;

use micro_wsgi_http::codec::UnknownParserKind;
use micro_wsgi_http::protocol::{ParseError, SendError};
use thiserror::Error;

/// The error an application or middleware fails with.
///
/// It plays the role of the exception object: it is what `exc_info` carries
/// into [`StartResponse::call`](crate::StartResponse::call).
pub type AppError = Box<dyn std::error::Error + Send + Sync>;

/// Errors returned by the `start_response` collector and the body writer.
#[derive(Debug, Error)]
pub enum ResponseError {
    #[error("start_response called without exc_info after the response was committed")]
    LateHeader,

    #[error("start_response already called, pass exc_info to replace the recorded headers")]
    HeadersAlreadySet,

    #[error("response already committed, re-raising: {source}")]
    Reraised { source: AppError },

    #[error("invalid status line {0:?}")]
    InvalidStatus(String),

    #[error("invalid response header {name:?}: {reason}")]
    InvalidHeader { name: String, reason: String },

    #[error("hop-by-hop header {0:?} is not allowed in an application response")]
    HopByHopHeader(String),

    #[error("start_response was not called before the response body was produced")]
    NotStarted,

    #[error("the response is closed")]
    Closed,
}

impl ResponseError {
    pub(crate) fn invalid_header<N: ToString, R: ToString>(name: N, reason: R) -> Self {
        Self::InvalidHeader { name: name.to_string(), reason: reason.to_string() }
    }
}

/// A request that reached the server but cannot be turned into an environ.
#[derive(Debug, Error)]
pub enum MalformedRequest {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("unsupported http version {0:?}")]
    UnsupportedVersion(http::Version),

    #[error("invalid request target {0:?}")]
    InvalidTarget(String),
}

/// Why a connection stopped serving requests.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("malformed request: {0}")]
    Malformed(#[from] MalformedRequest),

    #[error("application error (committed: {committed}): {source}")]
    Application { source: AppError, committed: bool },

    #[error("start_response called after the response was committed")]
    LateHeader,

    #[error("response framing error: {0}")]
    Framing(SendError),

    #[error("transport error: {0}")]
    Transport(#[from] io::Error),
}

impl ConnectionError {
    pub(crate) fn application<E: Into<AppError>>(source: E, committed: bool) -> Self {
        Self::Application { source: source.into(), committed }
    }

    /// Whether an error response can still be sent for the current request.
    ///
    /// Only failures that happen before any response byte was written qualify.
    pub fn is_recoverable(&self) -> bool {
        match self {
            ConnectionError::Malformed(_) => true,
            ConnectionError::Application { committed, .. } => !committed,
            ConnectionError::LateHeader | ConnectionError::Framing(_) | ConnectionError::Transport(_) => false,
        }
    }
}

impl From<SendError> for ConnectionError {
    fn from(e: SendError) -> Self {
        match e {
            SendError::Io { source } => ConnectionError::Transport(source),
            e => ConnectionError::Framing(e),
        }
    }
}

impl From<ParseError> for ConnectionError {
    fn from(e: ParseError) -> Self {
        match e {
            ParseError::Io { source } => ConnectionError::Transport(source),
            e => ConnectionError::Malformed(MalformedRequest::Parse(e)),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {source}")]
    InvalidParser {
        key: &'static str,
        #[source]
        source: UnknownParserKind,
    },
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("application must be set")]
    MissingApplication,

    #[error("address must be set")]
    MissingAddress,

    #[error("invalid address: {0}")]
    InvalidAddress(#[source] io::Error),

    #[error("failed to bind listener: {0}")]
    Bind(#[source] io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recoverable_only_before_commit() {
        assert!(ConnectionError::application("boom", false).is_recoverable());
        assert!(!ConnectionError::application("boom", true).is_recoverable());
        assert!(!ConnectionError::from(SendError::incomplete_body(3)).is_recoverable());
        assert!(ConnectionError::from(ParseError::InvalidMethod).is_recoverable());
        assert!(!ConnectionError::LateHeader.is_recoverable());
    }

    #[test]
    fn io_failures_are_transport_errors() {
        let e = ConnectionError::from(SendError::io(io::Error::from(io::ErrorKind::BrokenPipe)));
        assert!(matches!(e, ConnectionError::Transport(_)));

        let e = ConnectionError::from(ParseError::io(io::Error::from(io::ErrorKind::ConnectionReset)));
        assert!(matches!(e, ConnectionError::Transport(_)));
    }
}
