//! Proxy client
//!
//! Used by command front ends to route a request through a running monitor
//! instead of opening the port themselves.

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::{default_socket_path, ProxyRequest, ProxyResponse};

/// Slack added on top of the request's own wait
const REPLY_MARGIN: Duration = Duration::from_millis(1500);

/// Write timeout for sending the request
const SEND_TIMEOUT: Duration = Duration::from_millis(500);

/// Talks to a monitor over its Unix socket
#[derive(Debug, Clone)]
pub struct MonitorClient {
    socket_path: PathBuf,
}

impl Default for MonitorClient {
    fn default() -> Self {
        Self::new(default_socket_path())
    }
}

impl MonitorClient {
    /// Client for the socket at `socket_path`
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
        }
    }

    /// Socket this client connects to
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Whether a monitor socket exists
    pub fn is_available(&self) -> bool {
        self.socket_path.exists()
    }

    /// Send one request and wait for the reply.
    ///
    /// Returns `None` when no monitor is running: the socket file is missing,
    /// the connection is refused, or the exchange fails.
    pub fn request(&self, request: &ProxyRequest) -> Option<ProxyResponse> {
        if !self.is_available() {
            return None;
        }
        match self.exchange(request) {
            Ok(response) => Some(response),
            Err(e) => {
                tracing::debug!("monitor at {} unavailable: {}", self.socket_path.display(), e);
                None
            }
        }
    }

    fn exchange(&self, request: &ProxyRequest) -> Result<ProxyResponse, Box<dyn std::error::Error>> {
        let mut stream = UnixStream::connect(&self.socket_path)?;
        stream.set_write_timeout(Some(SEND_TIMEOUT))?;
        stream.write_all(request.to_line()?.as_bytes())?;
        stream.flush()?;

        stream.set_read_timeout(Some(request.wait + REPLY_MARGIN))?;
        let mut line = String::new();
        BufReader::new(&stream).read_line(&mut line)?;
        Ok(serde_json::from_str(&line)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_socket_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let client = MonitorClient::new(dir.path().join("absent.sock"));
        assert!(!client.is_available());
        assert!(client.request(&ProxyRequest::new(1, 0x6A, vec![])).is_none());
    }

    #[test]
    fn test_stale_socket_file_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stale.sock");
        std::fs::write(&path, b"").unwrap();
        let client = MonitorClient::new(&path);
        assert!(client.is_available());
        assert!(client.request(&ProxyRequest::new(1, 0x6A, vec![])).is_none());
    }
}
