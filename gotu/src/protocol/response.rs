//! Response envelope and typed reply layouts.
//!
//! ```text
//! +------+-------------------+----------------------+
//! | 0x93 | size (i16, BE)    |   payload (size)     |
//! +------+-------------------+----------------------+
//! ```
//!
//! A negative size carries no payload and means the device rejected or had
//! nothing to report for the request.

use {
    crate::error::{Error, Result},
    crate::protocol::command::FRAME_MARKER,
    byteorder::{BigEndian, ReadBytesExt},
    std::io::Cursor,
};

/// Envelope header length.
pub const HEADER_LEN: usize = 3;

/// Checkcode the model query answers with on supported loggers.
pub const MODEL_CHECKCODE: u16 = 0xC220;

/// Parse a 3-byte response header.
///
/// Returns the payload length, or `None` when the device signaled an error
/// with a negative size.
pub fn parse_header(header: &[u8]) -> Result<Option<usize>> {
    if header.len() != HEADER_LEN {
        return Err(Error::Protocol(format!(
            "response header must be {HEADER_LEN} bytes, got {}",
            header.len()
        )));
    }
    if header[0] != FRAME_MARKER {
        return Err(Error::UnexpectedResponse(header[0]));
    }
    let size = i16::from_be_bytes([header[1], header[2]]);
    Ok(usize::try_from(size).ok())
}

/// A fixed-width big-endian reply layout.
pub trait Reply: Sized {
    /// Exact payload width of this layout.
    const WIDTH: usize;

    /// Decode from a reader positioned at the start of the payload.
    fn read_fields(cursor: &mut Cursor<&[u8]>) -> std::io::Result<Self>;

    /// Decode a payload, rejecting any length other than [`Self::WIDTH`].
    fn decode(payload: &[u8]) -> Result<Self> {
        if payload.len() != Self::WIDTH {
            return Err(Error::Protocol(format!(
                "reply layout expects {} bytes, got {}",
                Self::WIDTH,
                payload.len()
            )));
        }
        let mut cursor = Cursor::new(payload);
        Ok(Self::read_fields(&mut cursor)?)
    }
}

/// Identify reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct IdentifyInfo {
    /// Device serial number.
    pub serial: u32,
    /// Firmware major version.
    pub version_major: i8,
    /// Firmware minor version.
    pub version_minor: i8,
    /// Model code as reported by identify (not used for model selection).
    pub model: u16,
    /// USB library version.
    pub usb_library: u16,
}

impl Reply for IdentifyInfo {
    const WIDTH: usize = 10;

    fn read_fields(cursor: &mut Cursor<&[u8]>) -> std::io::Result<Self> {
        Ok(Self {
            serial: cursor.read_u32::<BigEndian>()?,
            version_major: cursor.read_i8()?,
            version_minor: cursor.read_i8()?,
            model: cursor.read_u16::<BigEndian>()?,
            usb_library: cursor.read_u16::<BigEndian>()?,
        })
    }
}

/// Model query reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelReply {
    /// Fixed checkcode, [`MODEL_CHECKCODE`] on known loggers.
    pub checkcode: u16,
    /// Model table key.
    pub model_code: u8,
}

impl Reply for ModelReply {
    const WIDTH: usize = 3;

    fn read_fields(cursor: &mut Cursor<&[u8]>) -> std::io::Result<Self> {
        Ok(Self {
            checkcode: cursor.read_u16::<BigEndian>()?,
            model_code: cursor.read_u8()?,
        })
    }
}

/// Record count reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountReply {
    /// High part of the count.
    pub high: u16,
    /// Low byte of the count.
    pub low: u8,
}

impl CountReply {
    /// Total number of stored records.
    pub fn total(&self) -> u32 {
        u32::from(self.high) * 256 + u32::from(self.low)
    }
}

impl Reply for CountReply {
    const WIDTH: usize = 3;

    fn read_fields(cursor: &mut Cursor<&[u8]>) -> std::io::Result<Self> {
        Ok(Self {
            high: cursor.read_u16::<BigEndian>()?,
            low: cursor.read_u8()?,
        })
    }
}
