//! OrbFIX monitor daemon
//!
//! Holds the receiver's serial port, echoes NMEA to stdout (and optionally
//! UDP and a log file), and proxies RISE commands from other processes over
//! a Unix socket until interrupted.
//!
//! ```text
//! orbfix-monitor --port /dev/ttyUSB0 --udp-host 127.0.0.1 --udp-port 10110
//! ```

use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use orbfix_core::monitor::{default_socket_path, ForwardingSink, Monitor, MonitorConfig};
use orbfix_core::protocol::{InterpreterRegistry, DEFAULT_BAUD_RATE};

const MAIN_TICK: Duration = Duration::from_millis(200);

#[derive(Parser, Debug)]
#[command(name = "orbfix-monitor", version)]
#[command(about = "Keep the serial port open, stream NMEA, proxy RISE commands")]
struct Cli {
    /// Serial port path
    #[arg(long, env = "ORBFIX_PORT")]
    port: String,

    /// Baud rate
    #[arg(long, default_value_t = DEFAULT_BAUD_RATE)]
    baud: u32,

    /// Unix socket path for proxied commands [default: ~/.orbfix/monitor.sock]
    #[arg(long, env = "ORBFIX_MONITOR_SOCK")]
    sock: Option<PathBuf>,

    /// Forward NMEA lines to this UDP host
    #[arg(long)]
    udp_host: Option<String>,

    /// UDP port for forwarded NMEA lines
    #[arg(long, default_value_t = 10110)]
    udp_port: u16,

    /// Append monitor output and NMEA to this file
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut sink = ForwardingSink::new();
    if let Some(host) = cli.udp_host.as_deref().filter(|h| !h.is_empty()) {
        sink = sink
            .with_udp(host, cli.udp_port)
            .with_context(|| format!("setting up UDP forwarding to {}:{}", host, cli.udp_port))?;
    }
    if let Some(path) = &cli.log_file {
        sink = sink
            .with_log_file(path)
            .with_context(|| format!("opening log file {}", path.display()))?;
    }

    let mut config = MonitorConfig::new(&cli.port);
    config.baud_rate = cli.baud;
    config.socket_path = cli.sock.unwrap_or_else(default_socket_path);

    let registry = Arc::new(InterpreterRegistry::empty());
    let monitor = Monitor::start(&config, registry, Arc::new(sink))
        .with_context(|| format!("starting monitor on {}", cli.port))?;

    let stop = monitor.stop_handle();
    ctrlc::set_handler(move || {
        stop.store(true, Ordering::SeqCst);
    })
    .context("installing Ctrl-C handler failed")?;

    tracing::info!("proxy listening at {}", monitor.socket_path().display());
    while !monitor.is_stopping() {
        thread::sleep(MAIN_TICK);
    }

    monitor.shutdown();
    Ok(())
}
