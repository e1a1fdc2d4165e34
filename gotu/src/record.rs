//! Flash record decoding.
//!
//! Each record occupies one 32-byte slot in flash:
//!
//! ```text
//! +------+-----+---------------+-------------+-------------------------+--------+
//! | flag | y/m | day/hour/min  | ms of day   |   payload (24 bytes)    | unused |
//! +------+-----+---------------+-------------+-------------------------+--------+
//! | 0    | 1   | 2..4 (u16 BE) | 4..6 (u16)  | 6..30                   | 30..32 |
//! +------+-----+---------------+-------------+-------------------------+--------+
//! ```
//!
//! The year byte holds a 4-bit offset into a 16-year cycle in its high
//! nibble and the month in its low nibble. `day/hour/min` packs 5, 5 and 6
//! bits from the top.

use {
    crate::error::{Error, Result},
    bitflags::bitflags,
    byteorder::{BigEndian, ReadBytesExt},
    chrono::{DateTime, Datelike, Local, NaiveDate, NaiveDateTime, TimeZone, Utc},
    log::{debug, warn},
    std::{fmt, io::Cursor, sync::OnceLock},
};

/// Size of one record slot.
pub const RECORD_SIZE: usize = 32;

/// Flag byte of a device log message.
pub const FLAG_LOG: u8 = 0xF1;

/// Flag byte of a heartbeat record.
pub const FLAG_HEARTBEAT: u8 = 0xF5;

/// Flag bit the device sets on points it considers bad.
pub const FLAG_INVALID: u8 = 0x20;

/// Log message that separates tracks.
pub const RESET_COUNTER: &str = "RESET COUNTER";

bitflags! {
    /// Status bits of the flag byte.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize))]
    pub struct StatusFlags: u8 {
        /// Reserved.
        const U0 = 1 << 0;
        /// Reserved.
        const U1 = 1 << 1;
        /// Waypoint marker (button press).
        const WP = 1 << 2;
        /// Reserved.
        const U3 = 1 << 3;
        /// No-data indicator.
        const NDI = 1 << 4;
        /// Track stop.
        const TSTOP = 1 << 5;
        /// Track start.
        const TSTART = 1 << 6;
        /// Reserved.
        const U7 = 1 << 7;
    }
}

impl fmt::Display for StatusFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self
            .iter_names()
            .map(|(name, _)| name)
            .collect();
        write!(f, "{{{}}}", names.join(","))
    }
}

/// Record kind, fixed by the flag byte alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum RecordKind {
    /// GPS fix.
    Waypoint,
    /// Device event message.
    Log,
    /// Heartbeat. No decoder exists for it.
    Heartbeat,
}

impl RecordKind {
    /// Classify a flag byte.
    pub fn from_flag(flag: u8) -> Self {
        match flag {
            FLAG_LOG => Self::Log,
            FLAG_HEARTBEAT => Self::Heartbeat,
            _ => Self::Waypoint,
        }
    }
}

/// Decoded waypoint fields.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Waypoint {
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
    /// GPS elevation in meters.
    pub elevation: f64,
    /// Speed in km/h.
    pub speed: f64,
    /// Course in degrees.
    pub course: f64,
    /// Number of satellites used for the fix.
    pub satellites: u32,
    /// Raw satellite bitmap.
    pub satellite_map: u32,
    /// Estimated horizontal position error in meters.
    pub ehpe: f64,
    /// Top 4 bits of the precision field. Meaning unknown.
    pub unknown_flags: u8,
    /// Status bits of the flag byte.
    pub status: StatusFlags,
}

impl Waypoint {
    /// A fix at exactly 0/0 means the receiver had no position.
    #[allow(clippy::float_cmp)] // raw zeros divide to exact zeros
    pub fn is_null_fix(&self) -> bool {
        self.latitude == 0.0 && self.longitude == 0.0
    }

    fn decode(flag: u8, payload: &[u8]) -> std::io::Result<Self> {
        let mut cursor = Cursor::new(payload);
        let ae = cursor.read_u16::<BigEndian>()?;
        let satellite_map = cursor.read_u32::<BigEndian>()?;
        let lat = cursor.read_i32::<BigEndian>()?;
        let lon = cursor.read_i32::<BigEndian>()?;
        let ele = cursor.read_i32::<BigEndian>()?;
        let speed = cursor.read_u16::<BigEndian>()?;
        let course = cursor.read_u16::<BigEndian>()?;

        Ok(Self {
            latitude: f64::from(lat) / 1e7,
            longitude: f64::from(lon) / 1e7,
            elevation: f64::from(ele) / 100.0,
            speed: f64::from(speed) / 100.0 / 1000.0 * 3600.0,
            course: f64::from(course) / 100.0,
            satellites: satellite_map.count_ones(),
            satellite_map,
            ehpe: f64::from(ae & 0x0FFF) * 1e-2 * 16.0,
            unknown_flags: (ae >> 12) as u8,
            status: StatusFlags::from_bits_retain(flag),
        })
    }
}

/// Record payload.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum RecordBody {
    /// GPS fix.
    Waypoint(Waypoint),
    /// Device event message.
    Log(String),
    /// Timestamp did not form a calendar date; nothing else was decoded.
    Invalid,
}

/// One decoded flash record.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Record {
    /// Position in the record stream, starting at 0.
    pub index: u32,
    /// Raw flag byte.
    pub flag: u8,
    /// Kind according to the flag byte.
    pub kind: RecordKind,
    /// Device timestamp in UTC.
    pub timestamp: Option<NaiveDateTime>,
    /// Whether the record may be used as a track point.
    pub valid: bool,
    /// Decoded payload.
    pub body: RecordBody,
    /// The 32 bytes as stored in flash.
    #[cfg_attr(feature = "serde", serde(skip))]
    pub raw: [u8; RECORD_SIZE],
}

impl Record {
    /// Waypoint fields, if this is a waypoint.
    pub fn waypoint(&self) -> Option<&Waypoint> {
        match &self.body {
            RecordBody::Waypoint(wp) => Some(wp),
            _ => None,
        }
    }

    /// Log message, if this is a log record.
    pub fn message(&self) -> Option<&str> {
        match &self.body {
            RecordBody::Log(msg) => Some(msg),
            _ => None,
        }
    }

    /// Whether this is a valid waypoint.
    pub fn is_valid_waypoint(&self) -> bool {
        self.valid && self.waypoint().is_some()
    }

    /// Whether this record separates two tracks.
    ///
    /// Log records always carry the invalid bit, so validity is ignored.
    pub fn is_reset_marker(&self) -> bool {
        self.message() == Some(RESET_COUNTER)
    }

    /// Timestamp converted to the local time zone.
    pub fn local_time(&self) -> Option<DateTime<Local>> {
        self.timestamp
            .map(|ts| Utc.from_utc_datetime(&ts).with_timezone(&Local))
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.timestamp {
            Some(ts) => write!(f, "{} ", ts.format("%Y/%m/%d %H:%M:%S"))?,
            None => write!(f, "----/--/-- --:--:-- ")?,
        }
        match &self.body {
            RecordBody::Waypoint(wp) => write!(
                f,
                "WP LATLON:({}, {}) ele:{} speed:{:.2} uf={:b} ehpe={:.2} {}",
                wp.latitude,
                wp.longitude,
                wp.elevation,
                wp.speed,
                wp.unknown_flags,
                wp.ehpe,
                wp.status
            ),
            RecordBody::Log(msg) => write!(f, "LOG {msg}"),
            RecordBody::Invalid => write!(f, "INVALID flag={:#04x}", self.flag),
        }
    }
}

/// Recover a full year from a 4-bit offset.
///
/// The result is the latest year not after `current_year` whose position in
/// the 16-year cycle anchored at 2000 equals `offset`.
pub fn year_from_offset(offset: u8, current_year: i32) -> i32 {
    let quotient = (current_year - 2000).div_euclid(16);
    let year = 2000 + 16 * quotient + i32::from(offset & 0x0F);
    if year > current_year { year - 16 } else { year }
}

static CURRENT_YEAR: OnceLock<i32> = OnceLock::new();

fn current_year() -> i32 {
    *CURRENT_YEAR.get_or_init(|| Local::now().year())
}

/// [`year_from_offset`] against the current year, captured once per process.
pub fn get_year(offset: u8) -> i32 {
    year_from_offset(offset, current_year())
}

/// Decoder for raw record slots.
#[derive(Debug, Clone, Copy)]
pub struct RecordDecoder {
    current_year: i32,
}

impl Default for RecordDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordDecoder {
    /// Decoder anchored at this process's current year.
    pub fn new() -> Self {
        Self::with_current_year(current_year())
    }

    /// Decoder anchored at a fixed year.
    pub fn with_current_year(current_year: i32) -> Self {
        Self { current_year }
    }

    /// Decode one 32-byte slot.
    ///
    /// Soft failures (bad dates, device-flagged points, null fixes) produce a
    /// record with `valid == false`. Heartbeat records are an error.
    pub fn decode(&self, index: u32, raw: &[u8]) -> Result<Record> {
        let raw: [u8; RECORD_SIZE] = raw.try_into().map_err(|_| {
            Error::Protocol(format!(
                "record must be {RECORD_SIZE} bytes, got {}",
                raw.len()
            ))
        })?;
        let flag = raw[0];
        let kind = RecordKind::from_flag(flag);
        if kind == RecordKind::Heartbeat {
            return Err(Error::UnimplementedRecordKind(flag));
        }

        let ym = raw[1];
        let dhm = u16::from_be_bytes([raw[2], raw[3]]);
        let ms = u16::from_be_bytes([raw[4], raw[5]]);

        let year = year_from_offset(ym >> 4, self.current_year);
        let month = u32::from(ym & 0x0F) % 13;
        let day = u32::from(dhm >> 11).max(1);
        let hour = u32::from((dhm >> 6) & 0x1F) % 24;
        let minute = u32::from(dhm & 0x3F) % 60;
        let second = u32::from(ms / 1000) % 60;
        let milli = u32::from(ms % 1000);

        let timestamp = NaiveDate::from_ymd_opt(year, month, day)
            .and_then(|d| d.and_hms_milli_opt(hour, minute, second, milli));
        let Some(timestamp) = timestamp else {
            warn!(
                "Record {index}: invalid date {year}-{month}-{day} {hour}:{minute}:{second}.{milli:03}"
            );
            return Ok(Record {
                index,
                flag,
                kind,
                timestamp: None,
                valid: false,
                body: RecordBody::Invalid,
                raw,
            });
        };

        let mut valid = true;
        if flag & FLAG_INVALID != 0 {
            valid = false;
            if kind == RecordKind::Waypoint {
                warn!("Record {index}: device flagged point invalid (flag {flag:#04x})");
            } else {
                debug!("Record {index}: invalid bit set on log record");
            }
        }

        let body = match kind {
            RecordKind::Log => RecordBody::Log(decode_message(&raw[6..30])),
            _ => {
                let wp = Waypoint::decode(flag, &raw[6..30])?;
                if wp.is_null_fix() {
                    debug!("Record {index}: null fix");
                    valid = false;
                }
                RecordBody::Waypoint(wp)
            },
        };

        Ok(Record {
            index,
            flag,
            kind,
            timestamp: Some(timestamp),
            valid,
            body,
            raw,
        })
    }
}

fn decode_message(bytes: &[u8]) -> String {
    let text: Vec<u8> = bytes
        .iter()
        .copied()
        .filter(|&b| b != 0)
        .collect();
    String::from_utf8_lossy(&text)
        .trim()
        .to_string()
}
