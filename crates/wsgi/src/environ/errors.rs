use std::net::SocketAddr;

use tracing::error;

/// `wsgi.errors`: lines written here become `error` events under the `wsgi.errors` target.
#[derive(Debug, Clone, Default)]
pub struct ErrorStream {
    peer: Option<SocketAddr>,
}

impl ErrorStream {
    pub(crate) fn new(peer: Option<SocketAddr>) -> Self {
        Self { peer }
    }

    /// Logs every non-empty line of `message`.
    pub fn write(&self, message: &str) {
        for line in message.lines().filter(|line| !line.trim().is_empty()) {
            error!(target: "wsgi.errors", peer = ?self.peer, "{line}");
        }
    }

    pub fn writelines<I, S>(&self, lines: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for line in lines {
            self.write(line.as_ref());
        }
    }
}
