//! Command front end
//!
//! Sends a command through a running monitor when one is listening, and
//! opens the serial port directly otherwise. Either way the caller gets the
//! decoded frames that came back.

use std::path::PathBuf;
use std::sync::Arc;

#[cfg(unix)]
use crate::monitor::{default_socket_path, MonitorClient, ProxyRequest, MAX_WAIT};
use crate::protocol::{
    decode, payload::hexdump, send_and_receive, CommandRequest, ExchangeConfig, Frame,
    Interpretation, InterpreterRegistry, ProtocolError, ReopenPolicy, SerialOpener,
    DEFAULT_BAUD_RATE,
};

/// Where and how commands are sent
#[derive(Debug, Clone)]
pub struct CommanderConfig {
    /// Serial port for direct access
    pub port: Option<String>,
    /// Baud rate for direct access
    pub baud_rate: u32,
    /// Monitor socket to try first; `None` always goes direct
    pub socket_path: Option<PathBuf>,
    /// Wait, retry and drain settings
    pub exchange: ExchangeConfig,
    /// Reopen by VID/PID on direct retries
    pub reopen: Option<ReopenPolicy>,
}

impl Default for CommanderConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: DEFAULT_BAUD_RATE,
            #[cfg(unix)]
            socket_path: Some(default_socket_path()),
            #[cfg(not(unix))]
            socket_path: None,
            exchange: ExchangeConfig::default(),
            reopen: None,
        }
    }
}

/// Sends commands and renders the replies
#[derive(Debug, Clone)]
pub struct Commander {
    config: CommanderConfig,
    registry: Arc<InterpreterRegistry>,
}

impl Commander {
    /// Create a commander
    pub fn new(config: CommanderConfig, registry: Arc<InterpreterRegistry>) -> Self {
        Self { config, registry }
    }

    /// Active settings
    pub fn config(&self) -> &CommanderConfig {
        &self.config
    }

    /// Interpreters used by [`interpret`](Self::interpret)
    pub fn registry(&self) -> &InterpreterRegistry {
        &self.registry
    }

    /// Send one command and return every valid frame received.
    ///
    /// A monitor that answers with an error is reported as
    /// [`ProtocolError::Monitor`]; the port is not opened in that case.
    pub fn send(
        &self,
        command_id: u16,
        subsystem_id: u8,
        payload: &[u8],
    ) -> Result<Vec<Frame>, ProtocolError> {
        #[cfg(unix)]
        if let Some(frames) = self.send_via_monitor(command_id, subsystem_id, payload)? {
            return Ok(frames);
        }

        let port = self.config.port.as_deref().ok_or_else(|| {
            ProtocolError::PortNotFound("no monitor running and no serial port configured".into())
        })?;
        let mut opener = SerialOpener::new(port).baud_rate(self.config.baud_rate);
        if let Some(policy) = self.config.reopen {
            opener = opener.reopen(policy);
        }

        let request = CommandRequest::new(command_id, subsystem_id, payload.to_vec());
        send_and_receive(&mut opener, &request, &self.config.exchange)
    }

    /// Render frames through the registry
    pub fn interpret(&self, frames: &[Frame]) -> Vec<Interpretation> {
        frames.iter().map(|f| self.registry.interpret(f)).collect()
    }

    #[cfg(unix)]
    fn send_via_monitor(
        &self,
        command_id: u16,
        subsystem_id: u8,
        payload: &[u8],
    ) -> Result<Option<Vec<Frame>>, ProtocolError> {
        let Some(path) = &self.config.socket_path else {
            return Ok(None);
        };

        let mut request = ProxyRequest::new(command_id, subsystem_id, payload.to_vec());
        request.wait = self.config.exchange.overall_wait.min(MAX_WAIT);
        request.decode = false;

        let Some(response) = MonitorClient::new(path).request(&request) else {
            return Ok(None);
        };
        tracing::debug!("command 0x{:04X} proxied via {}", command_id, path.display());

        if !response.ok {
            return Err(ProtocolError::Monitor(
                response.error.unwrap_or_else(|| "unknown monitor error".into()),
            ));
        }
        for line in response.text_lines.iter().flatten() {
            tracing::info!("monitor text: {}", line);
        }

        let raw_frames = response
            .raw_frames()
            .map_err(|e| ProtocolError::Monitor(format!("bad frames_hex: {}", e)))?;
        Ok(Some(
            raw_frames
                .iter()
                .filter_map(|raw| match decode(raw) {
                    Ok(frame) => Some(frame),
                    Err(e) => {
                        tracing::warn!("skipping proxied frame: {} [{}]", e, hexdump(raw));
                        None
                    }
                })
                .collect(),
        ))
    }
}
