//! GT-200 command frames.
//!
//! Every request is a pair of 8-byte halves sent as one 16-byte write. The
//! last byte of the second half carries a checksum over the preceding 15
//! bytes:
//!
//! ```text
//! +------+--------+----------------------+----------------------+----+
//! | 0x93 | opcode |   arguments (cmd1)   |   arguments (cmd2)   | CS |
//! +------+--------+----------------------+----------------------+----+
//! | 1    | 1      | 6                    | 7                    | 1  |
//! +------+--------+----------------------+----------------------+----+
//! ```
//!
//! `CS = ((sum(bytes[0..15]) ^ 0xFF) + 1) & 0xFF`, so the whole frame sums to
//! zero modulo 256.

use byteorder::{BigEndian, ByteOrder};

/// Marker byte that opens every command and every response.
pub const FRAME_MARKER: u8 = 0x93;

/// Size of one command half.
pub const HALF_LEN: usize = 8;

/// Size of a full command on the wire.
pub const FRAME_LEN: usize = 2 * HALF_LEN;

/// Flash block size in bytes.
pub const BLOCK_SIZE: u32 = 0x1000;

/// Opcode bytes (second byte of the first half).
pub mod opcode {
    /// Operating mode switch (NMEA on/off).
    pub const MODE_SWITCH: u8 = 0x01;
    /// Flash read, model query and busy poll share this opcode.
    pub const FLASH_QUERY: u8 = 0x05;
    /// Flash erase and the first unknown write.
    pub const FLASH_WRITE: u8 = 0x06;
    /// Reverse-engineered purge-phase command. Semantics unknown.
    pub const UNK_PURGE2: u8 = 0x08;
    /// Identify (serial number, firmware, model, USB library).
    pub const IDENTIFY: u8 = 0x0A;
    /// Stored record count.
    pub const COUNT: u8 = 0x0B;
    /// Reverse-engineered purge-phase command. Semantics unknown.
    pub const UNK_PURGE1: u8 = 0x0C;
}

/// Sub-command bytes passed to `unk_purge1` while closing a purge.
///
/// These values were observed on the wire; what the device does with each
/// beyond accepting the erase session close is not known.
pub mod purge_phase {
    /// Extra close command required by some models only.
    pub const EXTRA: u8 = 0x1D;
    /// First terminal close command.
    pub const CLOSE_A: u8 = 0x1E;
    /// Second terminal close command.
    pub const CLOSE_B: u8 = 0x1F;
}

/// Erase function byte carried by the block-erase command.
const ERASE_FUNCTION: u8 = 0x20;

/// Device operating personality.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DeviceMode {
    /// GPS dongle (live NMEA output).
    Dongle = 0,
    /// Standalone tracker.
    Tracker = 1,
    /// Configuration/download mode.
    Configure = 3,
}

impl DeviceMode {
    /// Get the mode from a string name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "dongle" => Some(Self::Dongle),
            "tracker" => Some(Self::Tracker),
            "configure" | "config" => Some(Self::Configure),
            _ => None,
        }
    }
}

/// Compute the frame checksum over `bytes`.
pub fn checksum(bytes: &[u8]) -> u8 {
    let sum = bytes
        .iter()
        .fold(0u8, |acc, &b| acc.wrapping_add(b));
    (sum ^ 0xFF).wrapping_add(1)
}

/// A 16-byte command before checksumming.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command {
    cmd1: [u8; HALF_LEN],
    cmd2: [u8; HALF_LEN],
}

impl Command {
    /// Create a command from its two halves.
    ///
    /// The last byte of `cmd2` is replaced by the checksum on [`build`](Self::build).
    pub const fn new(cmd1: [u8; HALF_LEN], cmd2: [u8; HALF_LEN]) -> Self {
        Self { cmd1, cmd2 }
    }

    /// Switch the operating mode.
    pub fn switch_mode(mode: DeviceMode) -> Self {
        Self::new(
            [FRAME_MARKER, opcode::MODE_SWITCH, 0x01, mode as u8, 0, 0, 0, 0],
            [0; HALF_LEN],
        )
    }

    /// Query serial number and firmware versions.
    pub fn identify() -> Self {
        Self::new([FRAME_MARKER, opcode::IDENTIFY, 0, 0, 0, 0, 0, 0], [0; HALF_LEN])
    }

    /// Query the model code.
    pub fn model() -> Self {
        Self::new(
            [FRAME_MARKER, opcode::FLASH_QUERY, 0x04, 0x00, 0x03, 0x01, 0x9F, 0x00],
            [0; HALF_LEN],
        )
    }

    /// Query the stored record count.
    pub fn count() -> Self {
        Self::new(
            [FRAME_MARKER, opcode::COUNT, 0x03, 0x00, 0x1D, 0x00, 0x00, 0x00],
            [0; HALF_LEN],
        )
    }

    /// Read `size` bytes of flash starting at `pos`.
    ///
    /// The 24-bit address is split: its high byte ends cmd1, its low
    /// halfword starts cmd2.
    pub fn flash_read(pos: u32, size: u16) -> Self {
        let mut chpos = [0u8; 4];
        BigEndian::write_u32(&mut chpos, pos);
        let mut chsz = [0u8; 2];
        BigEndian::write_u16(&mut chsz, size);
        Self::new(
            [
                FRAME_MARKER,
                opcode::FLASH_QUERY,
                0x07,
                chsz[0],
                chsz[1],
                0x04,
                0x03,
                chpos[1],
            ],
            [chpos[2], chpos[3], 0, 0, 0, 0, 0, 0],
        )
    }

    /// Erase the flash block containing `pos`.
    pub fn flash_erase(pos: u32) -> Self {
        let aligned = pos - pos % BLOCK_SIZE;
        let mut chpos = [0u8; 4];
        BigEndian::write_u32(&mut chpos, aligned);
        Self::new(
            [
                FRAME_MARKER,
                opcode::FLASH_WRITE,
                0x07,
                0x00,
                0x00,
                0x04,
                ERASE_FUNCTION,
                chpos[1],
            ],
            [chpos[2], chpos[3], 0, 0, 0, 0, 0, 0],
        )
    }

    /// Reverse-engineered control write sent before every block erase.
    ///
    /// Observed with `p1 == 0` only. Its effect on the device is unknown.
    pub fn unk_write1(p1: u8) -> Self {
        Self::new(
            [FRAME_MARKER, opcode::FLASH_WRITE, 0x04, 0x00, p1, 0x01, 0x06, 0x00],
            [0; HALF_LEN],
        )
    }

    /// Reverse-engineered control read used as the busy poll during purge.
    ///
    /// Observed with `p1 == 1`; the device answers a single `0x00` byte once
    /// it is idle. Nothing else about it is known.
    pub fn unk_write2(p1: u16) -> Self {
        let mut p1ch = [0u8; 2];
        BigEndian::write_u16(&mut p1ch, p1);
        Self::new(
            [FRAME_MARKER, opcode::FLASH_QUERY, 0x04, p1ch[0], p1ch[1], 0x01, 0x05, 0x00],
            [0; HALF_LEN],
        )
    }

    /// Reverse-engineered purge-phase command, see [`purge_phase`].
    pub fn unk_purge1(p1: u8) -> Self {
        Self::new(
            [FRAME_MARKER, opcode::UNK_PURGE1, 0x00, p1, 0, 0, 0, 0],
            [0; HALF_LEN],
        )
    }

    /// Second reverse-engineered purge-phase command.
    ///
    /// Present in the command set but absent from every observed purge
    /// sequence.
    pub fn unk_purge2(p1: u8) -> Self {
        Self::new(
            [FRAME_MARKER, opcode::UNK_PURGE2, 0x02, p1, 0, 0, 0, 0],
            [0; HALF_LEN],
        )
    }

    /// Build the 16 bytes to put on the wire, checksum included.
    pub fn build(&self) -> [u8; FRAME_LEN] {
        let mut frame = [0u8; FRAME_LEN];
        frame[..HALF_LEN].copy_from_slice(&self.cmd1);
        frame[HALF_LEN..].copy_from_slice(&self.cmd2);
        frame[FRAME_LEN - 1] = checksum(&frame[..FRAME_LEN - 1]);
        frame
    }
}
