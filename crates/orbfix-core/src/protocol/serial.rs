//! Serial port handling
//!
//! Opens and configures the RS-422 adapter, enumerates attached ports and
//! finds a receiver by USB vendor/product id after it re-enumerates.

use serialport::{SerialPort, SerialPortInfo, SerialPortType};
use std::collections::HashMap;
use std::fmt;
#[cfg(target_os = "linux")]
use std::fs;
use std::str::FromStr;
use std::time::{Duration, Instant};

use super::ProtocolError;

/// Interval between enumerations while waiting for a device
const DEVICE_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Information about an available serial port
#[derive(Debug, Clone)]
pub struct PortInfo {
    /// Port name (e.g., "/dev/ttyUSB0" or "COM3")
    pub name: String,

    /// USB vendor ID (if USB device)
    pub vid: Option<u16>,

    /// USB product ID (if USB device)
    pub pid: Option<u16>,

    /// Manufacturer name (if available)
    pub manufacturer: Option<String>,

    /// Product name (if available)
    pub product: Option<String>,

    /// Serial number (if available)
    pub serial_number: Option<String>,
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        let (vid, pid, manufacturer, product, serial_number) = match info.port_type {
            SerialPortType::UsbPort(usb_info) => (
                Some(usb_info.vid),
                Some(usb_info.pid),
                usb_info.manufacturer,
                usb_info.product,
                usb_info.serial_number,
            ),
            _ => (None, None, None, None, None),
        };

        Self {
            name: info.port_name,
            vid,
            pid,
            manufacturer,
            product,
            serial_number,
        }
    }
}

impl PortInfo {
    fn bare(name: String) -> Self {
        Self {
            name,
            vid: None,
            pid: None,
            manufacturer: None,
            product: None,
            serial_number: None,
        }
    }

    /// Whether this port belongs to the given USB device
    pub fn matches(&self, id: VidPid) -> bool {
        self.vid == Some(id.vid) && self.pid == Some(id.pid)
    }
}

/// USB vendor/product id pair, written `vvvv:pppp` in hex
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VidPid {
    /// Vendor id
    pub vid: u16,
    /// Product id
    pub pid: u16,
}

impl VidPid {
    /// Create from numeric ids
    pub fn new(vid: u16, pid: u16) -> Self {
        Self { vid, pid }
    }
}

impl fmt::Display for VidPid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}:{:04x}", self.vid, self.pid)
    }
}

impl FromStr for VidPid {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ProtocolError::SerialError(format!("invalid VID:PID '{}'", s));
        let (vid, pid) = s.trim().split_once(':').ok_or_else(invalid)?;
        let parse = |part: &str| {
            let part = part.trim_start_matches("0x").trim_start_matches("0X");
            u16::from_str_radix(part, 16).map_err(|_| invalid())
        };
        Ok(Self::new(parse(vid)?, parse(pid)?))
    }
}

/// Helper used to sort port names so that:
///  - ttyACM* ports come first (sorted numerically by suffix)
///  - then ttyUSB* ports (sorted numerically)
///  - then other ports (sorted by name)
fn port_sort_key(name: &str) -> (u8, usize, String) {
    let basename = name.rsplit('/').next().unwrap_or(name);
    if let Some(rest) = basename.strip_prefix("ttyACM") {
        let num = rest.parse::<usize>().unwrap_or(usize::MAX);
        return (0, num, basename.to_string());
    }
    if let Some(rest) = basename.strip_prefix("ttyUSB") {
        let num = rest.parse::<usize>().unwrap_or(usize::MAX);
        return (1, num, basename.to_string());
    }
    (2, 0, basename.to_string())
}

/// List all available serial ports, with /dev fallbacks and deterministic ordering
pub fn list_ports() -> Vec<PortInfo> {
    let mut map: HashMap<String, PortInfo> = HashMap::new();
    for info in serialport::available_ports().unwrap_or_default() {
        let p = PortInfo::from(info);
        map.entry(p.name.clone()).or_insert(p);
    }

    // Linux-only: Add /dev/ttyACM* and /dev/ttyUSB* entries if present but not found by API
    #[cfg(target_os = "linux")]
    if let Ok(entries) = fs::read_dir("/dev") {
        for entry in entries.flatten() {
            if let Some(fname) = entry.file_name().to_str() {
                if fname.starts_with("ttyACM") || fname.starts_with("ttyUSB") {
                    let full = format!("/dev/{}", fname);
                    map.entry(full.clone())
                        .or_insert_with(|| PortInfo::bare(full));
                }
            }
        }
    }

    let mut v: Vec<PortInfo> = map.into_values().collect();
    v.sort_by_key(|p| port_sort_key(&p.name));
    v
}

/// Find the first attached port matching a USB vendor/product id
pub fn find_by_vid_pid(id: VidPid) -> Option<String> {
    list_ports()
        .into_iter()
        .find(|p| p.matches(id))
        .map(|p| p.name)
}

/// Poll [`find_by_vid_pid`] until the device shows up or `timeout` elapses
pub fn wait_for_device(id: VidPid, timeout: Duration) -> Result<String, ProtocolError> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(path) = find_by_vid_pid(id) {
            return Ok(path);
        }
        if Instant::now() >= deadline {
            return Err(ProtocolError::DeviceNotFound(id.to_string()));
        }
        std::thread::sleep(DEVICE_POLL_INTERVAL);
    }
}

/// Open a serial port configured for the RISE link.
///
/// 8 data bits, no parity, one stop bit, no flow control, exclusive access.
/// Both OS buffers are flushed before the handle is returned.
pub fn open_port(
    path: &str,
    baud_rate: u32,
    read_timeout: Duration,
) -> Result<Box<dyn SerialPort>, ProtocolError> {
    let builder = serialport::new(path, baud_rate)
        .data_bits(serialport::DataBits::Eight)
        .parity(serialport::Parity::None)
        .stop_bits(serialport::StopBits::One)
        .flow_control(serialport::FlowControl::None)
        .timeout(read_timeout);

    #[cfg(unix)]
    let mut port: Box<dyn SerialPort> = {
        let mut tty = serialport::TTYPort::open(&builder)?;
        tty.set_exclusive(true)?;
        Box::new(tty)
    };
    #[cfg(not(unix))]
    let mut port = builder.open()?;

    clear_buffers(port.as_mut())?;
    tracing::debug!("opened {} @ {} baud", path, baud_rate);
    Ok(port)
}

/// Wait for a USB device to (re)appear, then open it
pub fn reopen_by_vid_pid(
    id: VidPid,
    wait: Duration,
    baud_rate: u32,
    read_timeout: Duration,
) -> Result<Box<dyn SerialPort>, ProtocolError> {
    let path = wait_for_device(id, wait)?;
    tracing::info!("reopening {} as {}", id, path);
    open_port(&path, baud_rate, read_timeout)
}

/// Clear the serial port buffers
pub fn clear_buffers(port: &mut dyn SerialPort) -> Result<(), ProtocolError> {
    port.clear(serialport::ClearBuffer::All)
        .map_err(|e| ProtocolError::SerialError(e.to_string()))
}
