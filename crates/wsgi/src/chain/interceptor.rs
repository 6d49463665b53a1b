use async_trait::async_trait;
use micro_wsgi_http::protocol::ResponseHead;

use super::{Middleware, Next};
use crate::application::AppResult;
use crate::environ::Environ;
use crate::error::AppError;
use crate::response::StartResponse;

/// A filter that does not take part in the calling convention.
///
/// It sees the environ before the rest of the chain runs and the recorded
/// response head after it returns. Heads already on the wire (the application
/// streamed through `write()`) are not passed to `on_response`.
#[async_trait]
pub trait Interceptor: Send + Sync {
    /// Runs before the rest of the chain. An error aborts the request before any
    /// response is recorded.
    async fn on_request(&self, _environ: &mut Environ) -> Result<(), AppError> {
        Ok(())
    }

    fn on_response(&self, _environ: &Environ, _head: &mut ResponseHead) {}
}

/// Adapts an [`Interceptor`] into a [`Middleware`].
#[derive(Debug)]
pub struct Intercepted<I> {
    interceptor: I,
}

impl<I> Intercepted<I> {
    pub fn new(interceptor: I) -> Self {
        Self { interceptor }
    }
}

#[async_trait]
impl<I: Interceptor> Middleware for Intercepted<I> {
    async fn call(&self, environ: &mut Environ, start_response: &StartResponse, next: Next<'_>) -> AppResult {
        self.interceptor.on_request(environ).await?;
        let result = next.run(environ, start_response).await;
        start_response.update_head(|head| self.interceptor.on_response(environ, head));
        result
    }
}
