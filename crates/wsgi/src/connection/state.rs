use std::fmt;

use tracing::trace;

/// Where a connection is in its request cycle.
///
/// ```text
/// AwaitingRequest -> Parsing -> BuildingEnvironment -> Invoking -> WritingResponse
///        ^                                                              |
///        +----------------------- keep-alive ---------------------------+
///
/// any state -> Closing -> Closed, and any state -> Closed on an abort
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Idle, waiting for the first byte of the next request
    AwaitingRequest,
    /// Reading a request head
    Parsing,
    BuildingEnvironment,
    /// The application is running
    Invoking,
    WritingResponse,
    /// A final response is being written, no further request is read
    Closing,
    Closed,
}

impl ConnectionState {
    pub fn can_advance_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;

        matches!(
            (self, next),
            (_, Closed)
                | (AwaitingRequest, Parsing | Closing)
                | (Parsing, BuildingEnvironment | Closing)
                | (BuildingEnvironment, Invoking | Closing)
                | (Invoking, WritingResponse | Closing)
                | (WritingResponse, AwaitingRequest | Parsing | Closing)
        )
    }

    pub fn is_closed(self) -> bool {
        self == ConnectionState::Closed
    }

    pub(crate) fn advance(&mut self, next: ConnectionState) {
        if *self == next {
            return;
        }
        debug_assert!(self.can_advance_to(next), "invalid connection state transition {self} -> {next}");
        trace!(from = %self, to = %next, "connection state");
        *self = next;
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::AwaitingRequest => "awaiting_request",
            ConnectionState::Parsing => "parsing",
            ConnectionState::BuildingEnvironment => "building_environment",
            ConnectionState::Invoking => "invoking",
            ConnectionState::WritingResponse => "writing_response",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}
