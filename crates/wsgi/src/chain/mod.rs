//! Composition of middlewares around one terminal application.
//!
//! A [`HandlerChain`] is built once and is itself an [`Application`]. Calling it
//! runs the middlewares in order; each one gets a [`Next`] handle for the rest of
//! the chain and decides whether, and how, to call it:
//!
//! - delegate with `next.run(..)` and return or transform its result
//! - short-circuit by calling `start_response` itself and not calling `next`
//! - edit the environ before delegating
//!
//! ```
//! use async_trait::async_trait;
//! use micro_wsgi::{application_fn, AppResult, Environ, HandlerChain, Middleware, Next, ResponseBody, StartResponse};
//!
//! struct Tag;
//!
//! #[async_trait]
//! impl Middleware for Tag {
//!     async fn call(&self, environ: &mut Environ, start_response: &StartResponse, next: Next<'_>) -> AppResult {
//!         environ.insert("app.tag", "tagged");
//!         next.run(environ, start_response).await
//!     }
//! }
//!
//! let chain = HandlerChain::builder().add_last(Tag).build(application_fn(|environ, start_response| {
//!     start_response.start("200 OK", Vec::<(String, String)>::new())?;
//!     Ok(ResponseBody::from(environ.get_str("app.tag").unwrap_or_default().to_owned()))
//! }));
//! # let _ = chain;
//! ```

mod interceptor;

pub use interceptor::Intercepted;
pub use interceptor::Interceptor;

use std::fmt;

use async_trait::async_trait;

use crate::application::{AppResult, Application};
use crate::environ::Environ;
use crate::response::StartResponse;

/// A filter in front of the application. It holds no reference to its
/// successor; the chain passes one in as [`Next`] on every call.
#[async_trait]
pub trait Middleware: Send + Sync {
    async fn call(&self, environ: &mut Environ, start_response: &StartResponse, next: Next<'_>) -> AppResult;
}

/// The rest of a chain, as seen by one middleware.
#[derive(Clone, Copy)]
pub struct Next<'chain> {
    middlewares: &'chain [Box<dyn Middleware>],
    application: &'chain dyn Application,
}

impl Next<'_> {
    /// Runs the remaining middlewares and then the application.
    pub async fn run(self, environ: &mut Environ, start_response: &StartResponse) -> AppResult {
        match self.middlewares.split_first() {
            Some((middleware, middlewares)) => {
                let next = Next { middlewares, application: self.application };
                middleware.call(environ, start_response, next).await
            }
            None => self.application.call(environ, start_response).await,
        }
    }

    /// How many middlewares are left before the application.
    pub fn remaining(&self) -> usize {
        self.middlewares.len()
    }
}

impl fmt::Debug for Next<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next").field("remaining", &self.remaining()).finish_non_exhaustive()
    }
}

/// Middlewares composed around a terminal application.
pub struct HandlerChain {
    middlewares: Vec<Box<dyn Middleware>>,
    application: Box<dyn Application>,
}

impl HandlerChain {
    pub fn builder() -> HandlerChainBuilder {
        HandlerChainBuilder::new()
    }

    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }

    fn entry(&self) -> Next<'_> {
        Next { middlewares: &self.middlewares, application: self.application.as_ref() }
    }
}

impl fmt::Debug for HandlerChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerChain").field("middlewares", &self.middlewares.len()).finish_non_exhaustive()
    }
}

#[async_trait]
impl Application for HandlerChain {
    async fn call(&self, environ: &mut Environ, start_response: &StartResponse) -> AppResult {
        self.entry().run(environ, start_response).await
    }
}

pub struct HandlerChainBuilder {
    middlewares: Vec<Box<dyn Middleware>>,
}

impl HandlerChainBuilder {
    fn new() -> Self {
        Self { middlewares: vec![] }
    }

    /// Appends a middleware, closest to the application so far.
    pub fn add_last<M: Middleware + 'static>(mut self, middleware: M) -> Self {
        self.middlewares.push(Box::new(middleware));
        self
    }

    /// Prepends a middleware, so it runs before every one added so far.
    pub fn add_first<M: Middleware + 'static>(mut self, middleware: M) -> Self {
        self.middlewares.insert(0, Box::new(middleware));
        self
    }

    /// Appends a non-WSGI filter, see [`Interceptor`].
    pub fn intercept<I: Interceptor + 'static>(self, interceptor: I) -> Self {
        self.add_last(Intercepted::new(interceptor))
    }

    /// Finishes the chain with its terminal application.
    pub fn build<A: Application + 'static>(self, application: A) -> HandlerChain {
        HandlerChain { middlewares: self.middlewares, application: Box::new(application) }
    }
}

impl fmt::Debug for HandlerChainBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerChainBuilder").field("middlewares", &self.middlewares.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::application_fn;
    use crate::environ::RequestInput;
    use crate::response::ResponseBody;
    use futures::StreamExt;

    pub(crate) fn environ() -> Environ {
        Environ::new(Default::default(), RequestInput::empty(), Default::default())
    }

    struct Marker(&'static str);

    #[async_trait]
    impl Middleware for Marker {
        async fn call(&self, environ: &mut Environ, start_response: &StartResponse, next: Next<'_>) -> AppResult {
            let markers = environ.get_str("test.markers").unwrap_or_default().to_owned();
            environ.insert("test.markers", markers + self.0);
            next.run(environ, start_response).await
        }
    }

    struct ShortCircuit;

    #[async_trait]
    impl Middleware for ShortCircuit {
        async fn call(&self, _environ: &mut Environ, start_response: &StartResponse, _next: Next<'_>) -> AppResult {
            start_response.start("403 Forbidden", [("Content-Type", "text/plain")])?;
            Ok(ResponseBody::from("denied"))
        }
    }

    fn echo_markers() -> impl Application {
        application_fn(|environ, start_response| {
            start_response.start("200 OK", [("Content-Type", "text/plain")])?;
            Ok(ResponseBody::from(environ.get_str("test.markers").unwrap_or_default().to_owned()))
        })
    }

    async fn body_of(result: AppResult) -> String {
        let chunks: Vec<_> = result.unwrap().collect().await;
        let bytes: Vec<u8> = chunks.into_iter().flat_map(|chunk| chunk.unwrap().to_vec()).collect();
        String::from_utf8(bytes).unwrap()
    }

    #[tokio::test]
    async fn chain_equals_manual_nesting() {
        let chain = HandlerChain::builder().add_last(Marker("b")).add_last(Marker("c")).add_first(Marker("a")).build(echo_markers());
        assert_eq!(chain.len(), 3);

        let (start_response, _rx) = StartResponse::channel();
        let mut env = environ();
        let composed = body_of(chain.call(&mut env, &start_response).await).await;

        let (start_response, _rx) = StartResponse::channel();
        let mut env = environ();
        let app = echo_markers();
        let innermost = Marker("c");
        let middle = Marker("b");
        let outer = Marker("a");
        let inner_list: Vec<Box<dyn Middleware>> = vec![Box::new(middle), Box::new(innermost)];
        let manual = body_of(outer.call(&mut env, &start_response, Next { middlewares: &inner_list, application: &app }).await).await;

        assert_eq!(composed, "abc");
        assert_eq!(composed, manual);
    }

    #[tokio::test]
    async fn middleware_can_short_circuit() {
        let chain = HandlerChain::builder().add_last(ShortCircuit).add_last(Marker("unreachable")).build(echo_markers());

        let (start_response, _rx) = StartResponse::channel();
        let mut env = environ();
        let body = body_of(chain.call(&mut env, &start_response).await).await;

        assert_eq!(body, "denied");
        assert!(!env.contains_key("test.markers"));
        assert_eq!(start_response.status(), Some(http::StatusCode::FORBIDDEN));
    }

    #[tokio::test]
    async fn empty_chain_calls_application() {
        let chain = HandlerChain::builder().build(echo_markers());
        assert!(chain.is_empty());

        let (start_response, _rx) = StartResponse::channel();
        let mut env = environ();
        env.insert("test.markers", "direct");
        assert_eq!(body_of(chain.call(&mut env, &start_response).await).await, "direct");
    }
}
