//! The per-connection driver.
//!
//! An [`HttpConnection`] owns both halves of one transport. For every request it
//! parses the head, builds the environ, invokes the application while feeding it
//! the request body, and writes the response, then decides whether the
//! connection is reused. [`ConnectionState`] names the steps of that cycle.
//!
//! Failures are handled by how far the response got:
//!
//! - nothing written yet: a `400` (malformed request) or `500` (application
//!   failure) is sent and the connection closes
//! - response already committed: the connection is closed without completing it,
//!   so the client never sees a truncated body declared complete

mod http_connection;
mod state;

pub use http_connection::HttpConnection;
pub use state::ConnectionState;
