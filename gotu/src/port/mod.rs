//! Transport abstraction for talking to the logger.
//!
//! The protocol layer only needs a byte-level duplex channel. This module
//! defines that contract as the [`Port`] trait, with two implementations:
//!
//! - **USB** (`usb` feature): HID class control writes and IN endpoint
//!   reads through `rusb`
//! - **Native serial** (`native` feature): pass-through over the `serialport`
//!   crate
//!
//! ## Architecture
//!
//! ```text
//! +------------------------------------------+
//! |        Session (protocol engine)         |
//! +--------------------+---------------------+
//!                      |
//!                      v
//! +--------------------+---------------------+
//! |                Port trait                |
//! +----------+--------------------+----------+
//!            |                    |
//!            v                    v
//! +----------+---------+ +--------+---------+
//! |      UsbPort       | |    NativePort    |
//! |      (rusb)        | |   (serialport)   |
//! +--------------------+ +------------------+
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use gotu::port::Port;
//!
//! fn probe<P: Port>(port: &mut P) -> gotu::Result<()> {
//!     port.flush_input()?;
//!     port.write_frame(&[0x93, 0x0A, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0x63])?;
//!     let header = port.read_bytes(3)?;
//!     println!("Received: {header:02X?}");
//!     Ok(())
//! }
//! ```

#[cfg(feature = "native")]
pub mod native;

#[cfg(feature = "usb")]
pub mod usb;

#[cfg(test)]
pub(crate) mod mock;

use std::time::Duration;

use crate::error::{Error, Result};

/// Default baud rate of the logger's serial link.
pub const DEFAULT_BAUD: u32 = 9600;

/// Serial port configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyUSB0", "COM3").
    pub port_name: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Read/write timeout.
    pub timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: DEFAULT_BAUD,
            timeout: Duration::from_secs(2),
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

    /// Set the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Byte-level duplex channel to one logger.
///
/// The channel is half-duplex in practice: the session never writes a new
/// command while a response is still outstanding.
pub trait Port: Send {
    /// Write one complete command.
    ///
    /// Fails when the transport moves fewer bytes than requested.
    fn write_frame(&mut self, data: &[u8]) -> Result<()>;

    /// Read exactly `n` bytes.
    ///
    /// Blocks until the bytes arrive or the transport's timeout policy gives
    /// up. Any excess received data stays buffered for the next read.
    fn read_bytes(&mut self, n: usize) -> Result<Vec<u8>>;

    /// Discard buffered and in-flight stale input.
    ///
    /// Transport read errors during the discard are tolerated.
    fn flush_input(&mut self) -> Result<()>;

    /// Close the port and release resources.
    ///
    /// After calling this method, the port cannot be used for further I/O.
    fn close(&mut self) -> Result<()>;

    /// Human-readable endpoint name.
    fn name(&self) -> &str;
}

impl<P: Port + ?Sized> Port for Box<P> {
    fn write_frame(&mut self, data: &[u8]) -> Result<()> {
        (**self).write_frame(data)
    }

    fn read_bytes(&mut self, n: usize) -> Result<Vec<u8>> {
        (**self).read_bytes(n)
    }

    fn flush_input(&mut self) -> Result<()> {
        (**self).flush_input()
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Which transport a session runs over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportKind {
    /// Direct USB access.
    #[default]
    Usb,
    /// Serial port pass-through.
    Serial,
}

impl TransportKind {
    /// Get the transport from a string name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "usb" => Some(Self::Usb),
            "serial" => Some(Self::Serial),
            _ => None,
        }
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Usb => write!(f, "usb"),
            Self::Serial => write!(f, "serial"),
        }
    }
}

/// Open a boxed port for the requested transport.
///
/// `serial` is required for [`TransportKind::Serial`] and ignored for USB.
pub fn open_port(transport: TransportKind, serial: Option<&SerialConfig>) -> Result<Box<dyn Port>> {
    match transport {
        #[cfg(feature = "usb")]
        TransportKind::Usb => Ok(Box::new(usb::UsbPort::open()?)),
        #[cfg(not(feature = "usb"))]
        TransportKind::Usb => Err(Error::Config(
            "USB transport support was not compiled in".into(),
        )),
        #[cfg(feature = "native")]
        TransportKind::Serial => {
            let config = serial.ok_or_else(|| {
                Error::Config("serial transport requires a port name".into())
            })?;
            if config.port_name.is_empty() {
                return Err(Error::Config("serial transport requires a port name".into()));
            }
            Ok(Box::new(native::NativePort::open(config)?))
        },
        #[cfg(not(feature = "native"))]
        TransportKind::Serial => {
            let _ = serial;
            Err(Error::Config(
                "serial transport support was not compiled in".into(),
            ))
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serial_config_default() {
        let config = SerialConfig::default();
        assert_eq!(config.baud_rate, 9600);
        assert_eq!(config.timeout, Duration::from_secs(2));
        assert!(config.port_name.is_empty());
    }

    #[test]
    fn test_serial_config_builder() {
        let config = SerialConfig::new("/dev/ttyUSB0", 19200).with_timeout(Duration::from_secs(5));

        assert_eq!(config.port_name, "/dev/ttyUSB0");
        assert_eq!(config.baud_rate, 19200);
        assert_eq!(config.timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_transport_from_name() {
        assert_eq!(TransportKind::from_name("USB"), Some(TransportKind::Usb));
        assert_eq!(TransportKind::from_name("serial"), Some(TransportKind::Serial));
        assert_eq!(TransportKind::from_name("bluetooth"), None);
        assert_eq!(TransportKind::Serial.to_string(), "serial");
    }

    #[cfg(feature = "native")]
    #[test]
    fn test_open_serial_without_name_is_config_error() {
        let result = open_port(TransportKind::Serial, None);
        assert!(matches!(result, Err(Error::Config(_))));

        let empty = SerialConfig::default();
        let result = open_port(TransportKind::Serial, Some(&empty));
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
