use std::fmt;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

use crate::application::Application;
use crate::config::ServerConfig;
use crate::connection::HttpConnection;
use crate::environ::ConnectionInfo;
use crate::error::ServerError;

pub struct ServerBuilder {
    address: Option<io::Result<Vec<SocketAddr>>>,
    config: ServerConfig,
    application: Option<Arc<dyn Application>>,
}

impl ServerBuilder {
    fn new() -> Self {
        Self { address: None, config: ServerConfig::default(), application: None }
    }

    pub fn bind<A: ToSocketAddrs>(mut self, address: A) -> Self {
        self.address = Some(address.to_socket_addrs().map(Iterator::collect));
        self
    }

    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// The application every request is handed to. There is no default.
    pub fn application<A: Application + 'static>(mut self, application: A) -> Self {
        self.application = Some(Arc::new(application));
        self
    }

    pub fn build(self) -> Result<Server, ServerError> {
        let application = self.application.ok_or(ServerError::MissingApplication)?;
        let address = self.address.ok_or(ServerError::MissingAddress)?.map_err(ServerError::InvalidAddress)?;
        Ok(Server { address, config: Arc::new(self.config), application })
    }
}

impl fmt::Debug for ServerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerBuilder")
            .field("address", &self.address)
            .field("config", &self.config)
            .field("application", &self.application.is_some())
            .finish()
    }
}

/// Accepts TCP connections and serves each one on its own task.
pub struct Server {
    address: Vec<SocketAddr>,
    config: Arc<ServerConfig>,
    application: Arc<dyn Application>,
}

impl Server {
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Installs a `tracing` subscriber, binds the address and serves forever.
    pub async fn start(self) -> Result<(), ServerError> {
        let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
        if tracing::subscriber::set_global_default(subscriber).is_err() {
            debug!("a global tracing subscriber is already installed");
        }

        info!(address = ?self.address, "start listening");
        let listener = match TcpListener::bind(self.address.as_slice()).await {
            Ok(listener) => listener,
            Err(e) => {
                error!(cause = %e, "bind server error");
                return Err(ServerError::Bind(e));
            }
        };

        self.serve(listener).await;
        Ok(())
    }

    /// Serves connections accepted from `listener`.
    pub async fn serve(&self, listener: TcpListener) {
        loop {
            let (tcp_stream, peer_addr) = match listener.accept().await {
                Ok(stream_and_addr) => stream_and_addr,
                Err(e) => {
                    warn!(cause = %e, "failed to accept");
                    continue;
                }
            };

            let config = Arc::clone(&self.config);
            let application = Arc::clone(&self.application);

            tokio::spawn(async move {
                let info = ConnectionInfo::new(Some(peer_addr), tcp_stream.local_addr().ok());
                let (reader, writer) = tcp_stream.into_split();
                let connection = HttpConnection::new(reader, writer, config, info);

                match connection.process(application).await {
                    Ok(()) => debug!(peer = %peer_addr, "connection closed"),
                    Err(e) if e.is_recoverable() => warn!(peer = %peer_addr, cause = %e, "connection closed after an error response"),
                    Err(e) => error!(peer = %peer_addr, cause = %e, "connection aborted"),
                }
            });
        }
    }
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server").field("address", &self.address).field("config", &self.config).finish_non_exhaustive()
    }
}
