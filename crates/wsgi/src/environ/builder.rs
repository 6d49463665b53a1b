use std::borrow::Cow;
use std::collections::HashMap;
use std::net::SocketAddr;

use http::header::{CONTENT_LENGTH, CONTENT_TYPE, HOST};
use http::uri::Authority;
use http::{HeaderName, Uri, Version};
use micro_wsgi_http::codec::ParserKind;
use micro_wsgi_http::protocol::ParsedRequest;
use tracing::trace;

use super::{EnvValue, Environ, ErrorStream, RequestInput};
use crate::config::ServerConfig;
use crate::error::MalformedRequest;

pub(crate) const KEEP_ALIVE_KEY: &str = "micro_wsgi.keep_alive";
const HTTP_PARSER_KEY: &str = "micro_wsgi.http_parser";

/// Addresses and transport details of the connection a request arrived on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub peer_addr: Option<SocketAddr>,
    pub local_addr: Option<SocketAddr>,
    /// Whether the transport is encrypted, which makes `wsgi.url_scheme` `https`
    pub secure: bool,
}

impl ConnectionInfo {
    pub fn new(peer_addr: Option<SocketAddr>, local_addr: Option<SocketAddr>) -> Self {
        Self { peer_addr, local_addr, secure: false }
    }

    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    fn scheme(&self) -> &'static str {
        if self.secure { "https" } else { "http" }
    }
}

/// Turns a parsed request into an [`Environ`].
#[derive(Debug, Clone)]
pub struct EnvironBuilder {
    server_name: Option<String>,
    parser: ParserKind,
}

impl EnvironBuilder {
    pub fn new(config: &ServerConfig) -> Self {
        Self { server_name: config.server_name().map(ToOwned::to_owned), parser: config.http_parser() }
    }

    /// Builds the environ of `request`. The body is moved in as `wsgi.input` and not read.
    ///
    /// `keep_alive` is the reuse eligibility of the connection, published as
    /// `micro_wsgi.keep_alive`.
    pub fn build(
        &self,
        request: &ParsedRequest,
        info: &ConnectionInfo,
        input: RequestInput,
        keep_alive: bool,
    ) -> Result<Environ, MalformedRequest> {
        let protocol = match request.version() {
            Version::HTTP_10 => "HTTP/1.0",
            Version::HTTP_11 => "HTTP/1.1",
            v => return Err(MalformedRequest::UnsupportedVersion(v)),
        };

        let (path, query) = split_target(request.target())?;

        let mut vars: HashMap<String, EnvValue> = HashMap::with_capacity(24 + request.headers().len());
        let mut put = |key: &str, value: EnvValue| {
            vars.insert(key.to_owned(), value);
        };

        put("REQUEST_METHOD", request.method().as_str().into());
        put("SCRIPT_NAME", "".into());
        put("PATH_INFO", decode_path(path).into());
        put("QUERY_STRING", query.into());
        put("RAW_URI", request.target().into());
        put("SERVER_PROTOCOL", protocol.into());

        let host = request.header(&HOST).and_then(|value| value.to_str().ok()).and_then(|value| value.parse::<Authority>().ok());
        let server_name = match (&self.server_name, &host, info.local_addr) {
            (Some(name), _, _) => name.clone(),
            (None, Some(authority), _) => authority.host().to_owned(),
            (None, None, Some(local_addr)) => local_addr.ip().to_string(),
            (None, None, None) => "localhost".to_owned(),
        };
        let server_port = match (host.as_ref().and_then(Authority::port_u16), info.local_addr) {
            (Some(port), _) => port,
            (None, Some(local_addr)) if host.is_none() => local_addr.port(),
            _ if info.secure => 443,
            _ => 80,
        };
        put("SERVER_NAME", server_name.into());
        put("SERVER_PORT", server_port.to_string().into());

        if let Some(peer_addr) = info.peer_addr {
            put("REMOTE_ADDR", peer_addr.ip().to_string().into());
            put("REMOTE_PORT", peer_addr.port().to_string().into());
        }

        put("wsgi.version", EnvValue::Version(1, 0));
        put("wsgi.url_scheme", info.scheme().into());
        put("wsgi.input", EnvValue::Input);
        put("wsgi.errors", EnvValue::Errors);
        put("wsgi.multithread", true.into());
        put("wsgi.multiprocess", false.into());
        put("wsgi.run_once", false.into());
        put(KEEP_ALIVE_KEY, keep_alive.into());
        put(HTTP_PARSER_KEY, self.parser.to_string().into());

        for (name, value) in request.headers() {
            let key = header_key(name);
            let value = latin1(value.as_bytes());
            match vars.get_mut(&key) {
                Some(EnvValue::Str(existing)) => {
                    existing.push(',');
                    existing.push_str(&value);
                }
                _ => {
                    vars.insert(key, EnvValue::Str(value));
                }
            }
        }

        trace!(method = %request.method(), target = request.target(), "built environ");
        Ok(Environ::new(vars, input, ErrorStream::new(info.peer_addr)))
    }
}

/// The environ key of a request header.
///
/// `Content-Type` and `Content-Length` map to `CONTENT_TYPE` and `CONTENT_LENGTH`,
/// every other header to `HTTP_` followed by its name uppercased with each
/// non-alphanumeric byte replaced by `_`.
pub fn header_key(name: &HeaderName) -> String {
    if name == CONTENT_TYPE {
        return "CONTENT_TYPE".to_owned();
    }
    if name == CONTENT_LENGTH {
        return "CONTENT_LENGTH".to_owned();
    }

    let name = name.as_str();
    let mut key = String::with_capacity(5 + name.len());
    key.push_str("HTTP_");
    key.extend(name.chars().map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' }));
    key
}

/// Maps each byte to the char with the same code point.
fn latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|b| char::from(*b)).collect()
}

fn decode_path(path: &str) -> String {
    let decoded: Cow<'_, [u8]> = urlencoding::decode_binary(path.as_bytes());
    latin1(&decoded)
}

/// Splits a request target into its path and raw query.
fn split_target(target: &str) -> Result<(&str, &str), MalformedRequest> {
    let invalid = || MalformedRequest::InvalidTarget(target.to_owned());

    if target.is_empty() {
        return Err(invalid());
    }

    if target == "*" {
        return Ok(("*", ""));
    }

    let target = target.split_once('#').map_or(target, |(before, _)| before);

    if target.starts_with('/') {
        return Ok(target.split_once('?').unwrap_or((target, "")));
    }

    // absolute-form, as sent to proxies
    let uri: Uri = target.parse().map_err(|_| invalid())?;
    if uri.scheme().is_none() || uri.authority().is_none() {
        return Err(invalid());
    }

    let path_start = target.find("://").map(|i| i + 3).and_then(|authority_start| {
        target[authority_start..].find(['/', '?']).map(|i| authority_start + i)
    });
    let path_and_query = match path_start {
        Some(start) => &target[start..],
        None => "",
    };
    let (path, query) = path_and_query.split_once('?').unwrap_or((path_and_query, ""));
    Ok((if path.is_empty() { "/" } else { path }, query))
}
