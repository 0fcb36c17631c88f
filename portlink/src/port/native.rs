//! Native serial port implementation using the `serialport` crate.
//!
//! This module provides the transport for native platforms
//! (Linux, macOS, Windows, FreeBSD, etc.).

use {
    crate::{
        error::{Error, Result},
        port::{
            DataBits, FlowControl, Parity, PortEnumerator, PortInfo, SerialConfig, StopBits,
            Transport,
        },
    },
    log::{debug, trace, warn},
    std::{
        io::{Read, Write},
        thread,
        time::{Duration, Instant},
    },
};

/// Native serial port implementation.
pub struct NativePort {
    port: Option<Box<dyn serialport::SerialPort>>,
    config: SerialConfig,
}

impl NativePort {
    /// Open a serial port with the given configuration.
    pub fn open(config: &SerialConfig) -> Result<Self> {
        let mut port = Self {
            port: None,
            config: config.clone(),
        };
        port.connect()?;
        Ok(port)
    }

    /// Open a serial port with default settings.
    pub fn open_simple(port_name: &str, baud_rate: u32) -> Result<Self> {
        let config = SerialConfig::new(port_name, baud_rate);
        Self::open(&config)
    }

    /// The configuration this port was (last) opened with.
    pub fn config(&self) -> &SerialConfig {
        &self.config
    }

    fn connect(&mut self) -> Result<()> {
        let config = &self.config;
        if config
            .port_name
            .is_empty()
        {
            return Err(Error::Config("no port name given".into()));
        }
        if config.baud_rate == 0 {
            return Err(Error::Config(format!(
                "invalid baud rate 0 for {}",
                config.port_name
            )));
        }
        let initial_baud = config
            .prime_baud
            .unwrap_or(config.baud_rate);

        let mut port = serialport::new(&config.port_name, initial_baud)
            .timeout(config.timeout)
            .data_bits(
                config
                    .data_bits
                    .into(),
            )
            .parity(
                config
                    .parity
                    .into(),
            )
            .stop_bits(
                config
                    .stop_bits
                    .into(),
            )
            .flow_control(
                config
                    .flow_control
                    .into(),
            )
            .open()?;

        if initial_baud != config.baud_rate {
            port.set_baud_rate(config.baud_rate)?;
        }

        debug!(
            "Opened {} at {} baud",
            config.port_name, config.baud_rate
        );
        self.port = Some(port);
        Ok(())
    }

    fn handle(&mut self) -> Result<&mut Box<dyn serialport::SerialPort>> {
        self.port
            .as_mut()
            .ok_or(Error::NotOpen)
    }

    fn queued(&mut self) -> Result<usize> {
        let count = self
            .handle()?
            .bytes_to_read()?;
        Ok(usize::try_from(count).unwrap_or(usize::MAX))
    }
}

impl Transport for NativePort {
    fn is_open(&self) -> bool {
        self.port
            .is_some()
    }

    fn write_bytes(&mut self, data: &[u8]) -> Result<usize> {
        let port = self.handle()?;
        let mut written = 0;
        while written < data.len() {
            match port.write(&data[written..]) {
                Ok(0) => break,
                Ok(n) => written += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {},
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => break,
                Err(e) => return Err(Error::Io(e)),
            }
        }
        port.flush()?;
        Ok(written)
    }

    fn bytes_available(&mut self) -> Result<usize> {
        self.queued()
    }

    fn wait_for_data(&mut self, timeout: Duration) -> Result<bool> {
        let poll = self
            .config
            .poll_interval
            .max(Duration::from_micros(100));
        let deadline = Instant::now() + timeout;

        loop {
            if self.queued()? > 0 {
                return Ok(true);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            thread::sleep(poll.min(deadline - now));
        }
    }

    fn read_all(&mut self) -> Result<Vec<u8>> {
        let count = self.queued()?;
        let mut buf = vec![0u8; count];
        if count > 0 {
            self.handle()?
                .read_exact(&mut buf)?;
        }
        Ok(buf)
    }

    fn read_one(&mut self) -> Result<Option<u8>> {
        if self.queued()? == 0 {
            return Ok(None);
        }
        let mut buf = [0u8; 1];
        match self
            .handle()?
            .read(&mut buf)
        {
            Ok(1) => Ok(Some(buf[0])),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(None),
            Err(e) => Err(Error::Io(e)),
        }
    }

    fn set_dtr(&mut self, level: bool) -> Result<()> {
        trace!("Setting DTR to {level}");
        self.handle()?
            .write_data_terminal_ready(level)?;
        Ok(())
    }

    fn set_rts(&mut self, level: bool) -> Result<()> {
        trace!("Setting RTS to {level}");
        self.handle()?
            .write_request_to_send(level)?;
        Ok(())
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<()> {
        if let Some(ref mut p) = self.port {
            p.set_baud_rate(baud_rate)?;
        }
        self.config
            .baud_rate = baud_rate;
        Ok(())
    }

    fn baud_rate(&self) -> u32 {
        self.config
            .baud_rate
    }

    fn name(&self) -> &str {
        &self
            .config
            .port_name
    }

    fn open(&mut self, name: &str, baud_rate: u32) -> Result<()> {
        if self.is_open() {
            self.close()?;
        }
        self.config
            .port_name = name.to_string();
        self.config
            .baud_rate = baud_rate;
        self.connect()
    }

    fn close(&mut self) -> Result<()> {
        if let Some(mut port) = self
            .port
            .take()
        {
            if let Some(prime) = self
                .config
                .prime_baud
            {
                if let Err(e) = port.set_baud_rate(prime) {
                    warn!("Failed to restore {prime} baud before close: {e}");
                }
            }
            debug!("Closed {}", self.config.port_name);
        }
        Ok(())
    }
}

impl Drop for NativePort {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// Native port enumerator.
pub struct NativePortEnumerator;

impl PortEnumerator for NativePortEnumerator {
    fn list_ports() -> Result<Vec<PortInfo>> {
        let ports = serialport::available_ports().map_err(Error::Serial)?;

        Ok(ports
            .into_iter()
            .map(|p| {
                let (vid, pid, manufacturer, product, serial_number) = match &p.port_type {
                    serialport::SerialPortType::UsbPort(info) => (
                        Some(info.vid),
                        Some(info.pid),
                        info.manufacturer
                            .clone(),
                        info.product
                            .clone(),
                        info.serial_number
                            .clone(),
                    ),
                    _ => (None, None, None, None, None),
                };

                PortInfo {
                    name: p.port_name,
                    vid,
                    pid,
                    manufacturer,
                    product,
                    serial_number,
                }
            })
            .collect())
    }
}

// Type conversions from our types to serialport types

impl From<DataBits> for serialport::DataBits {
    fn from(bits: DataBits) -> Self {
        match bits {
            DataBits::Five => Self::Five,
            DataBits::Six => Self::Six,
            DataBits::Seven => Self::Seven,
            DataBits::Eight => Self::Eight,
        }
    }
}

impl From<Parity> for serialport::Parity {
    fn from(parity: Parity) -> Self {
        match parity {
            Parity::None => Self::None,
            Parity::Odd => Self::Odd,
            Parity::Even => Self::Even,
        }
    }
}

impl From<StopBits> for serialport::StopBits {
    fn from(bits: StopBits) -> Self {
        match bits {
            StopBits::One => Self::One,
            StopBits::Two => Self::Two,
        }
    }
}

impl From<FlowControl> for serialport::FlowControl {
    fn from(flow: FlowControl) -> Self {
        match flow {
            FlowControl::None => Self::None,
            FlowControl::Hardware => Self::Hardware,
            FlowControl::Software => Self::Software,
        }
    }
}
