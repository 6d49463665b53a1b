use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::environ::Environ;
use crate::error::AppError;
use crate::response::{ResponseBody, StartResponse};

/// What an application returns: the body to send, or the failure to report.
pub type AppResult = Result<ResponseBody, AppError>;

/// A WSGI-style application.
///
/// `call` receives the request environment and the `start_response` handle. It
/// must call [`StartResponse::start`] before its body is consumed, either before
/// returning or lazily while the returned body is produced.
#[async_trait]
pub trait Application: Send + Sync {
    async fn call(&self, environ: &mut Environ, start_response: &StartResponse) -> AppResult;
}

#[async_trait]
impl<A: Application + ?Sized> Application for Arc<A> {
    async fn call(&self, environ: &mut Environ, start_response: &StartResponse) -> AppResult {
        (**self).call(environ, start_response).await
    }
}

#[async_trait]
impl<A: Application + ?Sized> Application for Box<A> {
    async fn call(&self, environ: &mut Environ, start_response: &StartResponse) -> AppResult {
        (**self).call(environ, start_response).await
    }
}

/// An [`Application`] backed by a plain function, see [`application_fn`].
pub struct FnApplication<F> {
    f: F,
}

impl<F> fmt::Debug for FnApplication<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnApplication").finish_non_exhaustive()
    }
}

#[async_trait]
impl<F> Application for FnApplication<F>
where
    F: Fn(&mut Environ, &StartResponse) -> AppResult + Send + Sync,
{
    async fn call(&self, environ: &mut Environ, start_response: &StartResponse) -> AppResult {
        (self.f)(environ, start_response)
    }
}

/// Wraps a synchronous function as an application.
///
/// ```
/// use micro_wsgi::{application_fn, ResponseBody};
///
/// let app = application_fn(|_environ, start_response| {
///     start_response.start("200 OK", [("Content-Type", "text/plain")])?;
///     Ok(ResponseBody::from("hello"))
/// });
/// # let _ = app;
/// ```
pub fn application_fn<F>(f: F) -> FnApplication<F>
where
    F: Fn(&mut Environ, &StartResponse) -> AppResult + Send + Sync,
{
    FnApplication { f }
}
