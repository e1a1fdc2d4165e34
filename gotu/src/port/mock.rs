//! Scripted in-memory logger for unit tests.
//!
//! `MockDevice` decodes every frame it receives, checks the checksum and
//! answers the way a GT-200 does. Flash is sparse: untouched bytes read as
//! `0xFF`, like erased NOR flash.

#![allow(clippy::unwrap_used)] // test helper

use {
    crate::{
        error::{Error, Result},
        port::Port,
        protocol::command::{BLOCK_SIZE, FRAME_LEN, FRAME_MARKER},
        protocol::response::MODEL_CHECKCODE,
    },
    std::collections::{HashMap, VecDeque},
};

/// One decoded command as seen by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MockCommand {
    Mode(u8),
    Identify,
    Model,
    Count,
    FlashRead { pos: u32, size: u16 },
    Erase(u32),
    UnkWrite1(u8),
    BusyPoll,
    UnkPurge1(u8),
    UnkPurge2(u8),
    Unknown(u8),
}

pub(crate) struct MockDevice {
    blocks: HashMap<u32, Vec<u8>>,
    pub model_code: u8,
    pub checkcode: u16,
    pub record_count: u32,
    pub identify: [u8; 10],
    /// Busy replies issued after each erase before the device reports idle.
    pub busy_polls: u32,
    pub never_idle: bool,
    /// Answer flash reads with a negative size.
    pub reject_reads: bool,
    busy_remaining: u32,
    pending: VecDeque<u8>,
    sent: Vec<[u8; FRAME_LEN]>,
    closed: bool,
}

impl Default for MockDevice {
    fn default() -> Self {
        Self {
            blocks: HashMap::new(),
            model_code: 0x14,
            checkcode: MODEL_CHECKCODE,
            record_count: 0,
            identify: [0x00, 0x01, 0xE2, 0x40, 0x02, 0x05, 0x00, 0x14, 0x01, 0x00],
            busy_polls: 0,
            never_idle: false,
            reject_reads: false,
            busy_remaining: 0,
            pending: VecDeque::new(),
            sent: Vec::new(),
            closed: false,
        }
    }
}

impl MockDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model(mut self, code: u8) -> Self {
        self.model_code = code;
        self
    }

    /// Store `records` from block 1 onward and set the count to match.
    pub fn with_records(mut self, records: &[[u8; 32]]) -> Self {
        for (i, record) in records.iter().enumerate() {
            self.write_flash(BLOCK_SIZE + (i as u32) * 32, record);
        }
        self.record_count = records.len() as u32;
        self
    }

    /// Mark a block as used by writing a non-blank first byte.
    pub fn dirty_block(&mut self, block: u32) {
        self.write_flash(block * BLOCK_SIZE, &[0x00]);
    }

    pub fn write_flash(&mut self, addr: u32, data: &[u8]) {
        for (i, &byte) in data.iter().enumerate() {
            let a = addr + i as u32;
            let block = self
                .blocks
                .entry(a / BLOCK_SIZE)
                .or_insert_with(|| vec![0xFF; BLOCK_SIZE as usize]);
            block[(a % BLOCK_SIZE) as usize] = byte;
        }
    }

    pub fn read_flash(&self, addr: u32, size: usize) -> Vec<u8> {
        (0..size as u32)
            .map(|i| {
                let a = addr + i;
                self.blocks
                    .get(&(a / BLOCK_SIZE))
                    .map_or(0xFF, |b| b[(a % BLOCK_SIZE) as usize])
            })
            .collect()
    }

    pub fn is_blank(&self, block: u32) -> bool {
        self.blocks
            .get(&block)
            .is_none_or(|b| b.iter().all(|&x| x == 0xFF))
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Every command received, decoded.
    pub fn commands(&self) -> Vec<MockCommand> {
        self.sent
            .iter()
            .map(decode_command)
            .collect()
    }

    /// Blocks erased, in order.
    pub fn erased_blocks(&self) -> Vec<u32> {
        self.commands()
            .into_iter()
            .filter_map(|c| match c {
                MockCommand::Erase(pos) => Some(pos / BLOCK_SIZE),
                _ => None,
            })
            .collect()
    }

    fn reply(&mut self, payload: &[u8]) {
        self.pending.push_back(FRAME_MARKER);
        self.pending.extend((payload.len() as i16).to_be_bytes());
        self.pending.extend(payload.iter().copied());
    }

    fn reply_error(&mut self) {
        self.pending.push_back(FRAME_MARKER);
        self.pending.extend((-1i16).to_be_bytes());
    }

    fn handle(&mut self, frame: [u8; FRAME_LEN]) {
        let sum = frame
            .iter()
            .fold(0u8, |acc, &b| acc.wrapping_add(b));
        assert_eq!(sum, 0, "bad checksum in {frame:02X?}");
        assert_eq!(frame[0], FRAME_MARKER);
        self.sent.push(frame);

        match decode_command(&frame) {
            MockCommand::Mode(_) => self.pending.push_back(0x00),
            MockCommand::Identify => {
                let identify = self.identify;
                self.reply(&identify);
            },
            MockCommand::Model => {
                let mut payload = self.checkcode.to_be_bytes().to_vec();
                payload.push(self.model_code);
                self.reply(&payload);
            },
            MockCommand::Count => {
                let high = (self.record_count / 256) as u16;
                let low = (self.record_count % 256) as u8;
                let mut payload = high.to_be_bytes().to_vec();
                payload.push(low);
                self.reply(&payload);
            },
            MockCommand::FlashRead { pos, size } => {
                if self.reject_reads {
                    self.reply_error();
                } else {
                    let data = self.read_flash(pos, usize::from(size));
                    self.reply(&data);
                }
            },
            MockCommand::Erase(pos) => {
                self.blocks.remove(&(pos / BLOCK_SIZE));
                self.busy_remaining = self.busy_polls;
                self.reply(&[]);
            },
            MockCommand::BusyPoll => {
                if self.never_idle || self.busy_remaining > 0 {
                    self.busy_remaining = self.busy_remaining.saturating_sub(1);
                    self.reply(&[0x01]);
                } else {
                    self.reply(&[0x00]);
                }
            },
            MockCommand::UnkWrite1(_)
            | MockCommand::UnkPurge1(_)
            | MockCommand::UnkPurge2(_) => self.reply(&[]),
            MockCommand::Unknown(_) => self.reply_error(),
        }
    }
}

fn decode_command(frame: &[u8; FRAME_LEN]) -> MockCommand {
    let pos = u32::from_be_bytes([0, frame[7], frame[8], frame[9]]);
    match (frame[1], frame[2], frame[6]) {
        (0x01, _, _) => MockCommand::Mode(frame[3]),
        (0x0A, _, _) => MockCommand::Identify,
        (0x0B, _, _) => MockCommand::Count,
        (0x05, 0x04, 0x9F) => MockCommand::Model,
        (0x05, 0x04, 0x05) => MockCommand::BusyPoll,
        (0x05, 0x07, _) => MockCommand::FlashRead {
            pos,
            size: u16::from_be_bytes([frame[3], frame[4]]),
        },
        (0x06, 0x07, 0x20) => MockCommand::Erase(pos),
        (0x06, 0x04, 0x06) => MockCommand::UnkWrite1(frame[4]),
        (0x0C, _, _) => MockCommand::UnkPurge1(frame[3]),
        (0x08, _, _) => MockCommand::UnkPurge2(frame[3]),
        (op, _, _) => MockCommand::Unknown(op),
    }
}

impl Port for MockDevice {
    fn write_frame(&mut self, data: &[u8]) -> Result<()> {
        let frame: [u8; FRAME_LEN] = data
            .try_into()
            .map_err(|_| Error::Protocol(format!("mock expects 16-byte frames, got {}", data.len())))?;
        self.handle(frame);
        Ok(())
    }

    fn read_bytes(&mut self, n: usize) -> Result<Vec<u8>> {
        if self.pending.len() < n {
            return Err(Error::Timeout(format!(
                "mock has {} of {n} bytes",
                self.pending.len()
            )));
        }
        Ok(self.pending.drain(..n).collect())
    }

    fn flush_input(&mut self) -> Result<()> {
        self.pending.clear();
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// Build a raw waypoint record.
pub(crate) fn waypoint_bytes(flag: u8, ym: u8, dhm: u16, ms: u16, lat: i32, lon: i32) -> [u8; 32] {
    let mut raw = [0u8; 32];
    raw[0] = flag;
    raw[1] = ym;
    raw[2..4].copy_from_slice(&dhm.to_be_bytes());
    raw[4..6].copy_from_slice(&ms.to_be_bytes());
    raw[6..8].copy_from_slice(&0x1010u16.to_be_bytes());
    raw[8..12].copy_from_slice(&0x0000_00FFu32.to_be_bytes());
    raw[12..16].copy_from_slice(&lat.to_be_bytes());
    raw[16..20].copy_from_slice(&lon.to_be_bytes());
    raw[20..24].copy_from_slice(&1234i32.to_be_bytes());
    raw
}

/// Build a raw log record.
pub(crate) fn log_bytes(message: &str) -> [u8; 32] {
    let mut raw = [0u8; 32];
    raw[0] = 0xF1;
    raw[1] = 0x83;
    raw[2..4].copy_from_slice(&0x7A9Eu16.to_be_bytes());
    let bytes = message.as_bytes();
    let n = bytes.len().min(24);
    raw[6..6 + n].copy_from_slice(&bytes[..n]);
    raw
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Command;

    #[test]
    fn test_mock_answers_identify() {
        let mut dev = MockDevice::new();
        dev.write_frame(&Command::identify().build()).unwrap();
        let header = dev.read_bytes(3).unwrap();
        assert_eq!(header, vec![0x93, 0x00, 0x0A]);
        assert_eq!(dev.commands(), vec![MockCommand::Identify]);
    }

    #[test]
    fn test_mock_erase_blanks_block() {
        let mut dev = MockDevice::new();
        dev.dirty_block(3);
        assert!(!dev.is_blank(3));
        dev.write_frame(&Command::flash_erase(3 * BLOCK_SIZE + 5).build()).unwrap();
        assert!(dev.is_blank(3));
        assert_eq!(dev.erased_blocks(), vec![3]);
    }

    #[test]
    #[should_panic(expected = "bad checksum")]
    fn test_mock_rejects_bad_checksum() {
        let mut dev = MockDevice::new();
        let mut frame = Command::identify().build();
        frame[15] ^= 0x01;
        let _ = dev.write_frame(&frame);
    }
}
