use std::time::Duration;

use async_trait::async_trait;
use http::HeaderValue;
use micro_wsgi::chain::Interceptor;
use micro_wsgi::{AppResult, Application, Environ, HandlerChain, Middleware, Next, ResponseBody, Server, ServerConfig, StartResponse};
use micro_wsgi_http::protocol::ResponseHead;

/// Answers `/echo` with the request body and everything else with a greeting.
struct Hello;

#[async_trait]
impl Application for Hello {
    async fn call(&self, environ: &mut Environ, start_response: &StartResponse) -> AppResult {
        if environ.get_str("PATH_INFO") == Some("/echo") {
            let body = environ.input_mut().read_to_end().await?;
            start_response.start("200 OK", [("Content-Type", "application/octet-stream")])?;
            return Ok(ResponseBody::from(body));
        }

        let name = environ.get_str("QUERY_STRING").filter(|q| !q.is_empty()).unwrap_or("world").to_owned();
        start_response.start("200 OK", [("Content-Type", "text/plain; charset=utf-8")])?;
        Ok(ResponseBody::chunks([String::from("hello "), name, String::from("\n")]))
    }
}

/// Answers `/health` without reaching the application.
struct Health;

#[async_trait]
impl Middleware for Health {
    async fn call(&self, environ: &mut Environ, start_response: &StartResponse, next: Next<'_>) -> AppResult {
        if environ.get_str("PATH_INFO") == Some("/health") {
            start_response.start("200 OK", [("Content-Length", "2")])?;
            return Ok(ResponseBody::from("ok"));
        }
        next.run(environ, start_response).await
    }
}

struct ServerHeader;

#[async_trait]
impl Interceptor for ServerHeader {
    fn on_response(&self, _environ: &Environ, head: &mut ResponseHead) {
        head.headers_mut().insert(http::header::SERVER, HeaderValue::from_static("micro-wsgi"));
    }
}

// curl -v http://127.0.0.1:8080/?rust
// curl -v -d 'some body' http://127.0.0.1:8080/echo
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = ServerConfig::from_env()?;
    let config = ServerConfig::builder()
        .http_parser(config.http_parser())
        .keep_alive_timeout(Duration::from_secs(30))
        .build();

    let chain = HandlerChain::builder().add_last(Health).intercept(ServerHeader).build(Hello);

    Server::builder().bind("127.0.0.1:8080").config(config).application(chain).build()?.start().await?;
    Ok(())
}
