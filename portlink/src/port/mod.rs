//! Transport abstraction consumed by the transaction engine.
//!
//! The engine never talks to an operating-system port directly. Everything it
//! needs from the link is expressed by the [`Transport`] trait:
//!
//! ```text
//! +-------------------------------+
//! |  Engine (transact / reset)    |
//! +---------------+---------------+
//!                 |
//!                 v
//! +---------------+---------------+
//! |        Transport trait        |
//! +---------------+---------------+
//!                 |
//!                 v
//! +---------------+---------------+
//! |  NativePort (serialport)      |
//! +-------------------------------+
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use portlink::port::Transport;
//!
//! fn poll<T: Transport>(port: &mut T) -> portlink::Result<Vec<u8>> {
//!     port.write_bytes(b"{\"version\":{}}")?;
//!     if port.wait_for_data(Duration::from_millis(100))? {
//!         return port.read_all();
//!     }
//!     Ok(Vec::new())
//! }
//! ```

#[cfg(feature = "native")]
pub mod native;

#[cfg(test)]
pub(crate) mod mock;

use std::fmt;
use std::thread;
use std::time::{Duration, Instant};

use crate::error::Result;

/// Rate the link is opened at before switching to the requested one.
pub const PRIME_BAUD: u32 = 9600;

/// Serial port configuration.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyUSB0", "COM3").
    pub port_name: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Timeout for a single blocking read/write on the OS handle.
    pub timeout: Duration,
    /// Data bits (typically 8).
    pub data_bits: DataBits,
    /// Parity (typically None).
    pub parity: Parity,
    /// Stop bits (typically One).
    pub stop_bits: StopBits,
    /// Flow control (typically None).
    pub flow_control: FlowControl,
    /// How often `wait_for_data` re-checks the input queue.
    pub poll_interval: Duration,
    /// Baud rate applied while opening and before closing, if any.
    pub prime_baud: Option<u32>,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: 115200,
            timeout: Duration::from_millis(100),
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
            flow_control: FlowControl::None,
            poll_interval: Duration::from_millis(1),
            prime_baud: Some(PRIME_BAUD),
        }
    }
}

impl SerialConfig {
    /// Create a new configuration with port name and baud rate.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            ..Default::default()
        }
    }

    /// Set the OS-level read/write timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the input polling interval.
    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Set (or disable) the priming baud rate.
    #[must_use]
    pub fn with_prime_baud(mut self, prime_baud: Option<u32>) -> Self {
        self.prime_baud = prime_baud;
        self
    }
}

/// Number of data bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DataBits {
    /// 5 data bits.
    Five,
    /// 6 data bits.
    Six,
    /// 7 data bits.
    Seven,
    /// 8 data bits.
    #[default]
    Eight,
}

/// Parity checking mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Parity {
    /// No parity.
    #[default]
    None,
    /// Odd parity.
    Odd,
    /// Even parity.
    Even,
}

/// Number of stop bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum StopBits {
    /// 1 stop bit.
    #[default]
    One,
    /// 2 stop bits.
    Two,
}

/// Flow control mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FlowControl {
    /// No flow control.
    #[default]
    None,
    /// Hardware flow control (RTS/CTS).
    Hardware,
    /// Software flow control (XON/XOFF).
    Software,
}

/// Hardware control line driven by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ControlLine {
    /// Request To Send.
    RequestToSend,
    /// Data Terminal Ready.
    DataTerminalReady,
}

impl fmt::Display for ControlLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RequestToSend => f.write_str("RTS"),
            Self::DataTerminalReady => f.write_str("DTR"),
        }
    }
}

/// Serial port information.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PortInfo {
    /// Port name/path.
    pub name: String,
    /// USB vendor ID (if available).
    pub vid: Option<u16>,
    /// USB product ID (if available).
    pub pid: Option<u16>,
    /// Manufacturer string (if available).
    pub manufacturer: Option<String>,
    /// Product string (if available).
    pub product: Option<String>,
    /// Serial number (if available).
    pub serial_number: Option<String>,
}

impl PortInfo {
    /// Whether the USB IDs match. A `None` filter matches any port.
    pub fn matches_usb_id(&self, vid: Option<u16>, pid: Option<u16>) -> bool {
        vid.is_none_or(|v| self.vid == Some(v)) && pid.is_none_or(|p| self.pid == Some(p))
    }
}

/// Polling period of the default [`Transport::wait_for_bytes`].
const BYTES_POLL: Duration = Duration::from_millis(1);

/// Byte channel to the attached device.
///
/// A transport is owned by exactly one engine. Every wait is bounded by the
/// timeout the caller passes in; nothing here may block indefinitely.
pub trait Transport: Send {
    /// Whether the link is currently open.
    fn is_open(&self) -> bool;

    /// Write bytes, returning how many the link accepted.
    ///
    /// A count smaller than `data.len()` is a short write, not an error.
    fn write_bytes(&mut self, data: &[u8]) -> Result<usize>;

    /// Number of bytes that can be read without blocking.
    fn bytes_available(&mut self) -> Result<usize>;

    /// Wait up to `timeout` for at least one byte to become readable.
    fn wait_for_data(&mut self, timeout: Duration) -> Result<bool>;

    /// Wait up to `timeout` until at least `count` bytes are readable.
    ///
    /// Returns `false` if the deadline passes first. Nothing is consumed.
    fn wait_for_bytes(&mut self, count: usize, timeout: Duration) -> Result<bool> {
        match count {
            0 => return Ok(true),
            1 => return self.wait_for_data(timeout),
            _ => {},
        }
        let deadline = Instant::now() + timeout;
        loop {
            if self.bytes_available()? >= count {
                return Ok(true);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            thread::sleep(BYTES_POLL.min(deadline - now));
        }
    }

    /// Read every byte that is currently buffered, without waiting.
    fn read_all(&mut self) -> Result<Vec<u8>>;

    /// Read a single buffered byte, or `None` if nothing is queued.
    fn read_one(&mut self) -> Result<Option<u8>>;

    /// Set DTR (Data Terminal Ready) pin state.
    fn set_dtr(&mut self, level: bool) -> Result<()>;

    /// Set RTS (Request To Send) pin state.
    fn set_rts(&mut self, level: bool) -> Result<()>;

    /// Set the baud rate.
    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<()>;

    /// Get the current baud rate.
    fn baud_rate(&self) -> u32;

    /// Get the port name/path.
    fn name(&self) -> &str;

    /// Open (or reopen) the link on `name` at `baud_rate`.
    fn open(&mut self, name: &str, baud_rate: u32) -> Result<()>;

    /// Close the link and release the OS handle.
    fn close(&mut self) -> Result<()>;

    /// Drive one of the hardware control lines.
    fn set_control_line(&mut self, line: ControlLine, level: bool) -> Result<()> {
        match line {
            ControlLine::RequestToSend => self.set_rts(level),
            ControlLine::DataTerminalReady => self.set_dtr(level),
        }
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn is_open(&self) -> bool {
        (**self).is_open()
    }

    fn write_bytes(&mut self, data: &[u8]) -> Result<usize> {
        (**self).write_bytes(data)
    }

    fn bytes_available(&mut self) -> Result<usize> {
        (**self).bytes_available()
    }

    fn wait_for_data(&mut self, timeout: Duration) -> Result<bool> {
        (**self).wait_for_data(timeout)
    }

    fn wait_for_bytes(&mut self, count: usize, timeout: Duration) -> Result<bool> {
        (**self).wait_for_bytes(count, timeout)
    }

    fn read_all(&mut self) -> Result<Vec<u8>> {
        (**self).read_all()
    }

    fn read_one(&mut self) -> Result<Option<u8>> {
        (**self).read_one()
    }

    fn set_dtr(&mut self, level: bool) -> Result<()> {
        (**self).set_dtr(level)
    }

    fn set_rts(&mut self, level: bool) -> Result<()> {
        (**self).set_rts(level)
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<()> {
        (**self).set_baud_rate(baud_rate)
    }

    fn baud_rate(&self) -> u32 {
        (**self).baud_rate()
    }

    fn name(&self) -> &str {
        (**self).name()
    }

    fn open(&mut self, name: &str, baud_rate: u32) -> Result<()> {
        (**self).open(name, baud_rate)
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }

    fn set_control_line(&mut self, line: ControlLine, level: bool) -> Result<()> {
        (**self).set_control_line(line, level)
    }
}

/// Trait for listing available serial ports.
///
/// This is separated from `Transport` because it's a static operation that
/// doesn't require an open port instance.
pub trait PortEnumerator {
    /// List all available serial ports.
    fn list_ports() -> Result<Vec<PortInfo>>;

    /// Find ports matching the given VID and/or PID.
    fn find_by_vid_pid(vid: Option<u16>, pid: Option<u16>) -> Result<Vec<PortInfo>> {
        let ports = Self::list_ports()?;
        Ok(ports
            .into_iter()
            .filter(|p| p.matches_usb_id(vid, pid))
            .collect())
    }
}

#[cfg(feature = "native")]
pub use native::{NativePort, NativePortEnumerator};
