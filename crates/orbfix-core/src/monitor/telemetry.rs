//! Telemetry forwarding
//!
//! Lines the monitor does not capture for a request (NMEA sentences and
//! unsolicited text) are handed to a [`TelemetrySink`].

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::path::Path;
use std::sync::Mutex;

use super::MonitorError;

/// Destination for telemetry lines
pub trait TelemetrySink: Send + Sync {
    /// Forward one line (no trailing CR/LF). Must not block for long.
    fn forward(&self, line: &str);
}

/// Sink that discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl TelemetrySink for NullSink {
    fn forward(&self, _line: &str) {}
}

/// Echoes lines to stdout, optionally to a UDP listener and a log file
#[derive(Debug)]
pub struct ForwardingSink {
    echo: bool,
    udp: Option<(UdpSocket, SocketAddr)>,
    log: Option<Mutex<File>>,
}

impl Default for ForwardingSink {
    fn default() -> Self {
        Self::new()
    }
}

impl ForwardingSink {
    /// Sink that echoes to stdout only
    pub fn new() -> Self {
        Self {
            echo: true,
            udp: None,
            log: None,
        }
    }

    /// Disable the stdout echo
    pub fn quiet(mut self) -> Self {
        self.echo = false;
        self
    }

    /// Also send every line as a `line\r\n` datagram to `host:port`
    pub fn with_udp(mut self, host: &str, port: u16) -> Result<Self, MonitorError> {
        let target = (host, port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| MonitorError::Socket(format!("cannot resolve {}:{}", host, port)))?;
        let bind: SocketAddr = if target.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(bind)?;
        tracing::info!("UDP forwarding to {}", target);
        self.udp = Some((socket, target));
        Ok(self)
    }

    /// Also append timestamped lines to `path`, creating parent directories
    pub fn with_log_file(mut self, path: &Path) -> Result<Self, MonitorError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        tracing::info!("appending telemetry to {}", path.display());
        self.log = Some(Mutex::new(file));
        Ok(self)
    }

    fn append_log(&self, line: &str) -> io::Result<()> {
        if let Some(log) = &self.log {
            let mut file = log.lock().unwrap_or_else(|e| e.into_inner());
            let stamp = chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z");
            writeln!(file, "{} {}", stamp, line)?;
        }
        Ok(())
    }
}

impl TelemetrySink for ForwardingSink {
    fn forward(&self, line: &str) {
        if self.echo {
            let mut stdout = io::stdout().lock();
            let _ = writeln!(stdout, "{}", line);
            let _ = stdout.flush();
        }

        if let Some((socket, target)) = &self.udp {
            let datagram = format!("{}\r\n", line);
            if let Err(e) = socket.send_to(datagram.as_bytes(), target) {
                tracing::debug!("UDP send to {} failed: {}", target, e);
            }
        }

        if let Err(e) = self.append_log(line) {
            tracing::warn!("telemetry log write failed: {}", e);
        }
    }
}
