//! Server configuration.
//!
//! A [`ServerConfig`] is built once before the server starts and then shared,
//! read-only, with every connection.

use std::env;
use std::time::Duration;

use micro_wsgi_http::codec::ParserKind;

use crate::error::ConfigError;

/// Environment variable read by [`ServerConfig::from_env`] to pick the HTTP parser.
pub const HTTP_PARSER_ENV: &str = "MICRO_WSGI_HTTP_PARSER";

const DEFAULT_READ_BUFFER_SIZE: usize = 8 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    http_parser: ParserKind,
    keep_alive_timeout: Option<Duration>,
    read_buffer_size: usize,
    server_name: Option<String>,
}

impl ServerConfig {
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::new()
    }

    /// The default configuration with the parser taken from `MICRO_WSGI_HTTP_PARSER`, if set.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::with_parser_setting(env::var(HTTP_PARSER_ENV).ok().as_deref())
    }

    fn with_parser_setting(value: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = Self::builder();
        if let Some(value) = value {
            let parser = value.parse().map_err(|source| ConfigError::InvalidParser { key: HTTP_PARSER_ENV, source })?;
            builder = builder.http_parser(parser);
        }
        Ok(builder.build())
    }

    pub fn http_parser(&self) -> ParserKind {
        self.http_parser
    }

    /// How long an idle connection waits for the next request head. `None` waits forever.
    pub fn keep_alive_timeout(&self) -> Option<Duration> {
        self.keep_alive_timeout
    }

    pub fn read_buffer_size(&self) -> usize {
        self.read_buffer_size
    }

    /// Overrides the `SERVER_NAME` otherwise derived from the `Host` header.
    pub fn server_name(&self) -> Option<&str> {
        self.server_name.as_deref()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_parser: ParserKind::default(),
            keep_alive_timeout: None,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            server_name: None,
        }
    }
}

#[derive(Debug)]
pub struct ServerConfigBuilder {
    config: ServerConfig,
}

impl ServerConfigBuilder {
    fn new() -> Self {
        Self { config: ServerConfig::default() }
    }

    pub fn http_parser(mut self, parser: ParserKind) -> Self {
        self.config.http_parser = parser;
        self
    }

    pub fn keep_alive_timeout(mut self, timeout: Duration) -> Self {
        self.config.keep_alive_timeout = Some(timeout);
        self
    }

    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.config.read_buffer_size = size.max(1024);
        self
    }

    pub fn server_name<S: Into<String>>(mut self, name: S) -> Self {
        self.config.server_name = Some(name.into());
        self
    }

    pub fn build(self) -> ServerConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.http_parser(), ParserKind::Fast);
        assert_eq!(config.read_buffer_size(), 8 * 1024);
        assert_eq!(config.keep_alive_timeout(), None);
        assert_eq!(config.server_name(), None);
    }

    #[test]
    fn parser_setting() {
        assert_eq!(ServerConfig::with_parser_setting(None).unwrap().http_parser(), ParserKind::Fast);
        assert_eq!(ServerConfig::with_parser_setting(Some("plain")).unwrap().http_parser(), ParserKind::Plain);
        assert!(matches!(ServerConfig::with_parser_setting(Some("llhttp")), Err(ConfigError::InvalidParser { .. })));
    }

    #[test]
    fn builder_overrides() {
        let config = ServerConfig::builder()
            .http_parser(ParserKind::Plain)
            .keep_alive_timeout(Duration::from_secs(5))
            .server_name("example.org")
            .read_buffer_size(16)
            .build();

        assert_eq!(config.http_parser(), ParserKind::Plain);
        assert_eq!(config.keep_alive_timeout(), Some(Duration::from_secs(5)));
        assert_eq!(config.server_name(), Some("example.org"));
        assert_eq!(config.read_buffer_size(), 1024);
    }
}
