//! The parsed head of an HTTP request.

use http::header::{CONNECTION, EXPECT};
use http::{HeaderName, HeaderValue, Method, Version};

/// The head of a request as produced by the request decoder.
///
/// Headers keep their arrival order and duplicates, which a [`http::HeaderMap`]
/// would regroup by name. Names are case-insensitive because [`HeaderName`]
/// normalizes them to lowercase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRequest {
    method: Method,
    target: String,
    version: Version,
    headers: Vec<(HeaderName, HeaderValue)>,
}

impl ParsedRequest {
    pub fn new<T: Into<String>>(method: Method, target: T, version: Version) -> Self {
        Self { method, target: target.into(), version, headers: Vec::new() }
    }

    /// Appends a header, keeping any earlier header with the same name.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.push((name, value));
        self
    }

    pub(crate) fn push_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.headers.push((name, value));
    }

    pub(crate) fn reserve_headers(&mut self, additional: usize) {
        self.headers.reserve(additional);
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The request target exactly as sent: path plus query, `*`, or an absolute URI.
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// All headers in arrival order.
    pub fn headers(&self) -> &[(HeaderName, HeaderValue)] {
        &self.headers
    }

    /// The first value of the named header.
    pub fn header(&self, name: &HeaderName) -> Option<&HeaderValue> {
        self.headers.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Every value of the named header, in arrival order.
    pub fn header_values<'a, 'n>(&'a self, name: &'n HeaderName) -> impl Iterator<Item = &'a HeaderValue> + use<'a, 'n> {
        self.headers.iter().filter(move |(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn is_head(&self) -> bool {
        self.method == Method::HEAD
    }

    /// Whether the client allows the connection to be reused after this request.
    ///
    /// HTTP/1.1 defaults to persistent connections unless `Connection: close` is sent,
    /// HTTP/1.0 only persists with an explicit `Connection: keep-alive`.
    pub fn keep_alive(&self) -> bool {
        match self.version {
            Version::HTTP_11 => !self.has_connection_token("close"),
            Version::HTTP_10 => self.has_connection_token("keep-alive") && !self.has_connection_token("close"),
            _ => false,
        }
    }

    /// Whether the client waits for `100 Continue` before sending the body.
    pub fn expects_continue(&self) -> bool {
        self.version == Version::HTTP_11
            && self.header(&EXPECT).is_some_and(|value| value.as_bytes().eq_ignore_ascii_case(b"100-continue"))
    }

    fn has_connection_token(&self, token: &str) -> bool {
        self.header_values(&CONNECTION)
            .flat_map(|value| value.as_bytes().split(|b| *b == b','))
            .any(|item| item.trim_ascii().eq_ignore_ascii_case(token.as_bytes()))
    }
}
