//! A WSGI-style application server core.
//!
//! An application is one callable: it receives the request [`Environ`] and a
//! [`StartResponse`] handle, records its status and headers through the handle,
//! and returns a [`ResponseBody`]. This crate runs such applications over
//! HTTP/1.x connections:
//!
//! - [`environ`]: builds the per-request environment from a parsed request
//! - [`chain`]: composes middlewares and non-WSGI interceptors in front of one
//!   application
//! - [`response`]: the `start_response` collector, the legacy `write()`
//!   callable and the body type
//! - [`connection`]: the per-connection driver and its state machine
//! - [`Server`]: a TCP accept loop spawning one driver per connection
//!
//! HTTP parsing and framing live in the `micro-wsgi-http` crate.
//!
//! # Example
//!
//! ```no_run
//! use micro_wsgi::{application_fn, ResponseBody, Server};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let app = application_fn(|environ, start_response| {
//!         let body = format!("hello from {}", environ.get_str("PATH_INFO").unwrap_or("/"));
//!         start_response.start("200 OK", [("Content-Type", "text/plain")])?;
//!         Ok(ResponseBody::from(body))
//!     });
//!
//!     Server::builder().bind("127.0.0.1:8080").application(app).build()?.start().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Response commit
//!
//! A recorded head stays replaceable (by calling `start_response` again with
//! `exc_info`) until it is committed. The head commits when the first non-empty
//! body chunk is written, or immediately when the application writes through
//! [`BodyWriter`]. Failures before the commit are answered with a `500`;
//! failures after it close the connection.

mod application;
pub mod chain;
pub mod config;
pub mod connection;
pub mod environ;
mod error;
pub mod response;
mod server;
mod writer;

pub use application::AppResult;
pub use application::Application;
pub use application::FnApplication;
pub use application::application_fn;
pub use chain::HandlerChain;
pub use chain::HandlerChainBuilder;
pub use chain::Interceptor;
pub use chain::Middleware;
pub use chain::Next;
pub use config::ServerConfig;
pub use environ::EnvValue;
pub use environ::Environ;
pub use error::AppError;
pub use error::ConfigError;
pub use error::ConnectionError;
pub use error::MalformedRequest;
pub use error::ResponseError;
pub use error::ServerError;
pub use response::BodyWriter;
pub use response::ResponseBody;
pub use response::StartResponse;
pub use response::Started;
pub use server::Server;
pub use server::ServerBuilder;
