//! Monitor daemon
//!
//! Keeps the serial port open for as long as it runs. A reader thread
//! splits the incoming stream into telemetry lines and RISE frames; a
//! socket-server thread accepts JSON command requests on a Unix socket,
//! writes them to the receiver and replies with whatever came back inside
//! the requested window.
//!
//! ```rust,ignore
//! use orbfix_core::monitor::{ForwardingSink, Monitor, MonitorConfig};
//!
//! let config = MonitorConfig::new("/dev/ttyUSB0");
//! let monitor = Monitor::start(&config, registry, Arc::new(ForwardingSink::new()))?;
//! // ... until Ctrl-C
//! monitor.shutdown();
//! ```

mod capture;
mod client;
mod demux;
mod reader;
mod request;
mod server;
mod telemetry;

use std::os::unix::net::UnixListener;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::protocol::{
    open_port, Channel, InterpreterRegistry, ProtocolError, SerialChannel, DEFAULT_BAUD_RATE,
};

pub use capture::{CaptureBuffer, Captured, MAX_CAPTURED_FRAMES, MAX_CAPTURED_LINES};
pub use client::MonitorClient;
pub use demux::{DemuxEvent, StreamDemux};
pub use request::{ProxyRequest, ProxyResponse, RequestError, MAX_WAIT};
pub use telemetry::{ForwardingSink, NullSink, TelemetrySink};

/// Serial read timeout used by the daemon
pub const MONITOR_READ_TIMEOUT: Duration = Duration::from_millis(50);

/// How long `shutdown` waits for each thread
const JOIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Errors starting or running the daemon
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Socket error: {0}")]
    Socket(String),

    #[error("Serial error: {0}")]
    Serial(#[from] ProtocolError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// `~/.orbfix/monitor.sock`, or a relative fallback without a home directory
pub fn default_socket_path() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".orbfix"))
        .unwrap_or_else(|| PathBuf::from(".orbfix"))
        .join("monitor.sock")
}

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Serial port path
    pub port: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Unix socket the proxy listens on
    pub socket_path: PathBuf,
    /// Per-read serial timeout
    pub read_timeout: Duration,
}

impl MonitorConfig {
    /// Configuration with default baud rate and socket path
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            baud_rate: DEFAULT_BAUD_RATE,
            socket_path: default_socket_path(),
            read_timeout: MONITOR_READ_TIMEOUT,
        }
    }
}

/// State shared by the reader and server threads
pub(crate) struct Shared {
    pub(crate) stop: Arc<AtomicBool>,
    pub(crate) capture: CaptureBuffer,
    pub(crate) writer: Mutex<Box<dyn Channel>>,
    pub(crate) registry: Arc<InterpreterRegistry>,
    pub(crate) sink: Arc<dyn TelemetrySink>,
}

impl Shared {
    pub(crate) fn stopping(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }
}

/// A running monitor
pub struct Monitor {
    shared: Arc<Shared>,
    socket_path: PathBuf,
    reader: Option<JoinHandle<()>>,
    server: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for Monitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Monitor")
            .field("socket_path", &self.socket_path)
            .field("running", &!self.shared.stopping())
            .finish()
    }
}

impl Monitor {
    /// Open the serial port and start both threads
    pub fn start(
        config: &MonitorConfig,
        registry: Arc<InterpreterRegistry>,
        sink: Arc<dyn TelemetrySink>,
    ) -> Result<Self, MonitorError> {
        let port = open_port(&config.port, config.baud_rate, config.read_timeout)?;
        tracing::info!(
            "monitor started on {}@{}, socket={}",
            config.port,
            config.baud_rate,
            config.socket_path.display()
        );
        Self::spawn(
            Box::new(SerialChannel::new(port)),
            &config.socket_path,
            registry,
            sink,
        )
    }

    /// Start both threads on an already-open channel.
    ///
    /// The channel must support `try_clone`; the reader and the writer use
    /// separate handles.
    pub fn spawn(
        channel: Box<dyn Channel>,
        socket_path: &Path,
        registry: Arc<InterpreterRegistry>,
        sink: Arc<dyn TelemetrySink>,
    ) -> Result<Self, MonitorError> {
        let reader_channel = channel.try_clone()?;
        let listener = bind_socket(socket_path)?;

        let shared = Arc::new(Shared {
            stop: Arc::new(AtomicBool::new(false)),
            capture: CaptureBuffer::new(),
            writer: Mutex::new(channel),
            registry,
            sink,
        });

        let reader = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("orbfix-mon-reader".into())
                .spawn(move || reader::run(reader_channel, &shared))?
        };

        let spawned = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("orbfix-mon-server".into())
                .spawn(move || server::run(listener, &shared))
        };
        let server = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                tracing::error!("failed to start server thread: {}", e);
                shared.stop.store(true, Ordering::SeqCst);
                join_with_timeout("reader", reader, JOIN_TIMEOUT);
                let _ = std::fs::remove_file(socket_path);
                return Err(e.into());
            }
        };

        Ok(Self {
            shared,
            socket_path: socket_path.to_path_buf(),
            reader: Some(reader),
            server: Some(server),
        })
    }

    /// Path of the proxy socket
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Flag that stops both threads when set; hand it to a signal handler
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shared.stop)
    }

    /// Whether a stop was requested
    pub fn is_stopping(&self) -> bool {
        self.shared.stopping()
    }

    /// Stop both threads, wait up to a second for each, remove the socket
    pub fn shutdown(mut self) {
        self.stop_threads();
    }

    fn stop_threads(&mut self) {
        self.shared.stop.store(true, Ordering::SeqCst);

        for (name, handle) in [("reader", self.reader.take()), ("server", self.server.take())] {
            if let Some(handle) = handle {
                join_with_timeout(name, handle, JOIN_TIMEOUT);
            }
        }

        match std::fs::remove_file(&self.socket_path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("failed to remove {}: {}", self.socket_path.display(), e),
        }
        tracing::info!("monitor stopped");
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        if self.reader.is_some() || self.server.is_some() {
            self.stop_threads();
        }
    }
}

/// Create the socket directory, replace any stale socket and bind
fn bind_socket(path: &Path) -> Result<UnixListener, MonitorError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    match std::fs::remove_file(path) {
        Ok(()) => tracing::debug!("removed stale socket {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    let listener = UnixListener::bind(path)
        .map_err(|e| MonitorError::Socket(format!("bind {}: {}", path.display(), e)))?;
    listener.set_nonblocking(true)?;
    Ok(listener)
}

fn join_with_timeout(name: &str, handle: JoinHandle<()>, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            tracing::warn!("{} thread did not stop within {:?}", name, timeout);
            return;
        }
        thread::sleep(Duration::from_millis(10));
    }
    if handle.join().is_err() {
        tracing::warn!("{} thread panicked", name);
    }
}
