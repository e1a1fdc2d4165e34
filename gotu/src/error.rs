//! Error types for gotu.

use std::io;
use thiserror::Error;

/// Result type for gotu operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for gotu operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// USB transfer error.
    #[cfg(feature = "usb")]
    #[error("USB error: {0}")]
    Usb(#[from] rusb::Error),

    /// Communication timeout.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// No logger attached on the requested transport.
    #[error("Device not found")]
    DeviceNotFound,

    /// A response did not start with the 0x93 envelope marker.
    #[error("Unexpected device response: header byte {0:#04x}")]
    UnexpectedResponse(u8),

    /// Malformed reply (size mismatch, short payload, missing data).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The model query returned a code missing from the model table.
    #[error("Unknown model code {0:#04x}")]
    UnknownModel(u8),

    /// A record kind the decoder has no routine for.
    #[error("Unimplemented record kind (flag {0:#04x})")]
    UnimplementedRecordKind(u8),

    /// The busy poll after an erase never reported idle.
    #[error("Device unresponsive during purge (no idle reply after {polls} polls)")]
    DeviceUnresponsive {
        /// Number of polls issued before giving up.
        polls: u32,
    },

    /// The embedding application requested the operation to stop.
    #[error("Operation interrupted")]
    Interrupted,

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}
