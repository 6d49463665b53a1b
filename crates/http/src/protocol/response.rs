//! HTTP response head types.

use http::Response;

/// The head of an outgoing response.
///
/// It is a `http::Response<()>`: status, version and headers, with the body
/// attached separately as payload items.
pub type ResponseHead = Response<()>;

/// A custom reason phrase for the status line.
///
/// When a [`ResponseHead`] carries this extension the header encoder writes it
/// instead of the canonical reason of the status code, so `"299 Whatever"`
/// survives the round trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReasonPhrase(String);

impl ReasonPhrase {
    /// Creates a reason phrase, or `None` if it contains CR, LF or other control bytes.
    pub fn new<S: Into<String>>(reason: S) -> Option<Self> {
        let reason = reason.into();
        let valid = reason.bytes().all(|b| b == b'\t' || b == b' ' || (b.is_ascii_graphic()) || b >= 0x80);
        valid.then_some(Self(reason))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}
