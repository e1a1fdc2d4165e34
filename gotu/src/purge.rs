//! Flash purge sequences.
//!
//! A purge walks the flash from the highest block down. Blank blocks
//! (first 16 bytes all `0xFF`) at the top are skipped. From the first used
//! block on, every remaining block is erased without checking it again.
//! Each erase is preceded by `unk_write1(0)`, and the device signals the end
//! of an erase by answering the `unk_write2(1)` poll with a single `0x00`.
//!
//! Two sequences have been observed on the wire. They differ in scan bounds,
//! in where the busy poll sits, and in whether the close commands (`0x1d`,
//! `0x1e`, `0x1f`) are sent at all:
//!
//! | step       | generic                             | legacy                       |
//! |------------|-------------------------------------|------------------------------|
//! | scan       | `n ..= 1`                           | `0x6ff ..= 1`, always        |
//! | per block  | poll (not first), write1, erase     | write1, erase, poll          |
//! | after scan | if dirty: close, poll; then close   | nothing                      |
//!
//! The legacy scan is fixed to a 0x700-block flash whatever the model, so it
//! refuses to run on a model with less flash. Do not merge the two.

use {
    crate::{
        error::{Error, Result},
        model::Model,
        protocol::command::{BLOCK_SIZE, purge_phase},
    },
    log::{debug, info},
    std::fmt,
};

/// Flash size the legacy sequence assumes, in blocks.
pub const LEGACY_BLOCK_COUNT: u32 = 0x700;

/// Default limit on busy polls per wait.
pub const DEFAULT_MAX_BUSY_POLLS: u32 = 10_000;

/// Bytes read from each block to decide whether it is blank.
const PROBE_SIZE: u16 = 0x10;

/// Device commands a purge sequence needs.
///
/// Every method returns the response payload, or `None` when the device
/// answered with a negative size.
pub trait PurgeOps {
    /// Read `size` bytes of flash at `pos`.
    fn flash_read(&mut self, pos: u32, size: u16) -> Result<Option<Vec<u8>>>;

    /// Erase the block containing `pos`.
    fn flash_write_purge(&mut self, pos: u32) -> Result<Option<Vec<u8>>>;

    /// Pre-erase control write.
    fn unk_write1(&mut self, p1: u8) -> Result<Option<Vec<u8>>>;

    /// Busy poll.
    fn unk_write2(&mut self, p1: u16) -> Result<Option<Vec<u8>>>;

    /// Purge-phase close command.
    fn unk_purge1(&mut self, p1: u8) -> Result<Option<Vec<u8>>>;
}

/// Outcome of a purge run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct PurgeReport {
    /// Sequence that ran.
    pub variant: PurgeVariant,
    /// Blocks visited by the scan.
    pub scanned: u32,
    /// Blocks erased.
    pub erased: u32,
    /// Highest used block, if any.
    pub first_dirty: Option<u32>,
}

/// A model-specific purge sequence.
pub trait PurgeStrategy {
    /// Which sequence this is.
    fn variant(&self) -> PurgeVariant;

    /// Run the sequence against `ops`.
    ///
    /// `progress` receives `(scanned_blocks, total_blocks)` after each block.
    fn run(
        &self,
        ops: &mut dyn PurgeOps,
        model: Model,
        progress: &mut dyn FnMut(u32, u32),
    ) -> Result<PurgeReport>;
}

/// Known purge sequences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum PurgeVariant {
    /// Sequence used by every known model.
    #[default]
    Generic,
    /// Older sequence for 0x700-block flash. Explicit request only.
    Legacy,
}

impl PurgeVariant {
    /// Get the variant from a string name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "generic" => Some(Self::Generic),
            "legacy" => Some(Self::Legacy),
            _ => None,
        }
    }

    /// Strategy object for this variant.
    pub fn strategy(self, max_busy_polls: u32) -> Box<dyn PurgeStrategy> {
        match self {
            Self::Generic => Box::new(GenericPurge { max_busy_polls }),
            Self::Legacy => Box::new(LegacyPurge { max_busy_polls }),
        }
    }
}

impl fmt::Display for PurgeVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Generic => write!(f, "generic"),
            Self::Legacy => write!(f, "legacy"),
        }
    }
}

/// Poll until the device reports idle.
///
/// Returns the number of polls issued.
pub fn wait_idle(ops: &mut dyn PurgeOps, max_polls: u32) -> Result<u32> {
    for poll in 1..=max_polls {
        if ops.unk_write2(1)?.as_deref() == Some(&[0x00][..]) {
            return Ok(poll);
        }
        debug!("Waiting for device ({poll}/{max_polls})...");
    }
    Err(Error::DeviceUnresponsive { polls: max_polls })
}

/// Whether the first bytes of `block` are erased.
///
/// A missing or short reply counts as used.
pub fn block_is_blank(ops: &mut dyn PurgeOps, block: u32) -> Result<bool> {
    let probe = ops.flash_read(block * BLOCK_SIZE, PROBE_SIZE)?;
    Ok(probe.is_some_and(|p| p.len() == usize::from(PROBE_SIZE) && p.iter().all(|&b| b == 0xFF)))
}

fn erase_block(ops: &mut dyn PurgeOps, block: u32) -> Result<()> {
    debug!("Erasing block {block:#05x}");
    ops.unk_write1(0)?;
    ops.flash_write_purge(block * BLOCK_SIZE)?;
    Ok(())
}

fn close_session(ops: &mut dyn PurgeOps, model: Model) -> Result<()> {
    if model.needs_extra_purge_command() {
        ops.unk_purge1(purge_phase::EXTRA)?;
    }
    ops.unk_purge1(purge_phase::CLOSE_A)?;
    ops.unk_purge1(purge_phase::CLOSE_B)?;
    Ok(())
}

/// Generic purge sequence.
#[derive(Debug, Clone, Copy)]
pub struct GenericPurge {
    /// Busy-poll limit per wait.
    pub max_busy_polls: u32,
}

impl PurgeStrategy for GenericPurge {
    fn variant(&self) -> PurgeVariant {
        PurgeVariant::Generic
    }

    fn run(
        &self,
        ops: &mut dyn PurgeOps,
        model: Model,
        progress: &mut dyn FnMut(u32, u32),
    ) -> Result<PurgeReport> {
        let total = model.block_count();
        let mut report = PurgeReport {
            variant: self.variant(),
            scanned: 0,
            erased: 0,
            first_dirty: None,
        };

        for block in (1..=total).rev() {
            report.scanned += 1;
            if report.first_dirty.is_some() {
                wait_idle(ops, self.max_busy_polls)?;
            } else if block_is_blank(ops, block)? {
                progress(report.scanned, total);
                continue;
            } else {
                info!("Highest used block: {block:#05x}");
                report.first_dirty = Some(block);
            }
            erase_block(ops, block)?;
            report.erased += 1;
            progress(report.scanned, total);
        }

        if report.first_dirty.is_some() {
            close_session(ops, model)?;
            wait_idle(ops, self.max_busy_polls)?;
        }
        close_session(ops, model)?;

        info!("Purge finished: {} of {total} blocks erased", report.erased);
        Ok(report)
    }
}

/// Legacy purge sequence.
///
/// Scans `0x6ff ..= 1` regardless of the model and polls after every erase
/// instead of before. No close commands are sent.
#[derive(Debug, Clone, Copy)]
pub struct LegacyPurge {
    /// Busy-poll limit per wait.
    pub max_busy_polls: u32,
}

impl PurgeStrategy for LegacyPurge {
    fn variant(&self) -> PurgeVariant {
        PurgeVariant::Legacy
    }

    fn run(
        &self,
        ops: &mut dyn PurgeOps,
        model: Model,
        progress: &mut dyn FnMut(u32, u32),
    ) -> Result<PurgeReport> {
        if model.block_count() < LEGACY_BLOCK_COUNT {
            return Err(Error::Config(format!(
                "the legacy purge scans {LEGACY_BLOCK_COUNT:#05x} blocks, {model} has only {:#05x}",
                model.block_count()
            )));
        }
        let total = LEGACY_BLOCK_COUNT - 1;
        let mut report = PurgeReport {
            variant: self.variant(),
            scanned: 0,
            erased: 0,
            first_dirty: None,
        };

        for block in (1..=total).rev() {
            report.scanned += 1;
            if report.first_dirty.is_none() {
                if block_is_blank(ops, block)? {
                    progress(report.scanned, total);
                    continue;
                }
                info!("Highest used block: {block:#05x}");
                report.first_dirty = Some(block);
            }
            erase_block(ops, block)?;
            wait_idle(ops, self.max_busy_polls)?;
            report.erased += 1;
            progress(report.scanned, total);
        }

        info!("Purge finished: {} of {total} blocks erased", report.erased);
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            port::mock::{MockCommand, MockDevice},
            session::Session,
        },
    };

    fn session(dev: MockDevice, model: Model) -> Session<MockDevice> {
        let mut session = Session::new(dev)
            .unwrap()
            .with_interrupt_checker(|| false);
        session.set_model(model);
        session
    }

    fn dirty(blocks: impl IntoIterator<Item = u32>) -> MockDevice {
        let mut dev = MockDevice::new();
        for block in blocks {
            dev.dirty_block(block);
        }
        dev
    }

    fn close_commands(commands: &[MockCommand]) -> Vec<u8> {
        commands
            .iter()
            .filter_map(|c| match c {
                MockCommand::UnkPurge1(p) => Some(*p),
                _ => None,
            })
            .collect()
    }

    fn count(commands: &[MockCommand], wanted: MockCommand) -> usize {
        commands
            .iter()
            .filter(|&&c| c == wanted)
            .count()
    }

    #[test]
    fn test_generic_scan_boundary() {
        let mut s = session(dirty(1..=500), Model::Gt200);
        let report = s
            .purge_with(&GenericPurge { max_busy_polls: 10 }, &mut |_, _| {})
            .unwrap();

        let dev = s.port();
        let erased = dev.erased_blocks();
        assert_eq!(erased, (1..=500).rev().collect::<Vec<_>>());
        assert_eq!(report.erased, 500);
        assert_eq!(report.scanned, 0x200);
        assert_eq!(report.first_dirty, Some(500));

        // Blocks 512..=501 are probed and skipped, 500 is probed once
        let reads: Vec<u32> = dev
            .commands()
            .into_iter()
            .filter_map(|c| match c {
                MockCommand::FlashRead { pos, size: 0x10 } => Some(pos / BLOCK_SIZE),
                _ => None,
            })
            .collect();
        assert_eq!(reads, (500..=0x200).rev().collect::<Vec<_>>());
        assert!((1..=0x200).all(|b| dev.is_blank(b)));
    }

    #[test]
    fn test_legacy_scan_boundary() {
        let mut dev = dirty(1..=500);
        dev.dirty_block(0x700);
        let mut s = session(dev, Model::Gt200e);
        let report = s
            .purge_with(&LegacyPurge { max_busy_polls: 10 }, &mut |_, _| {})
            .unwrap();

        assert_eq!(report.scanned, 0x6FF);
        assert_eq!(report.first_dirty, Some(500));
        assert_eq!(s.port().erased_blocks(), (1..=500).rev().collect::<Vec<_>>());
        // The top block is outside the legacy scan range
        assert!(!s.port().is_blank(0x700));
    }

    #[test]
    fn test_legacy_scan_starts_at_fixed_top_block() {
        let mut s = session(dirty([1]), Model::Gt200e);
        s.purge_with(&LegacyPurge { max_busy_polls: 10 }, &mut |_, _| {})
            .unwrap();
        assert_eq!(
            s.port().commands().first(),
            Some(&MockCommand::FlashRead { pos: 0x6FF * BLOCK_SIZE, size: 0x10 })
        );
    }

    #[test]
    fn test_legacy_refuses_smaller_flash() {
        for model in [Model::Gt100, Model::Gt120, Model::Gt200] {
            let mut s = session(dirty([1]), model);
            let err = s
                .purge_with(&LegacyPurge { max_busy_polls: 10 }, &mut |_, _| {})
                .unwrap_err();
            assert!(matches!(err, Error::Config(_)), "{model}: {err}");
            assert!(s.port().commands().is_empty());
            assert!(!s.port().is_blank(1));
        }
    }

    #[test]
    fn test_generic_command_order() {
        let mut s = session(dirty([1, 2]), Model::Gt100);
        s.purge_with(&GenericPurge { max_busy_polls: 10 }, &mut |_, _| {})
            .unwrap();

        let commands: Vec<MockCommand> = s
            .port()
            .commands()
            .into_iter()
            .filter(|c| !matches!(c, MockCommand::FlashRead { .. }))
            .collect();
        assert_eq!(
            commands,
            vec![
                MockCommand::UnkWrite1(0),
                MockCommand::Erase(2 * BLOCK_SIZE),
                MockCommand::BusyPoll,
                MockCommand::UnkWrite1(0),
                MockCommand::Erase(BLOCK_SIZE),
                MockCommand::UnkPurge1(0x1E),
                MockCommand::UnkPurge1(0x1F),
                MockCommand::BusyPoll,
                MockCommand::UnkPurge1(0x1E),
                MockCommand::UnkPurge1(0x1F),
            ]
        );
    }

    #[test]
    fn test_legacy_command_order() {
        let mut s = session(dirty([1, 2]), Model::Gt200e);
        s.purge_with(&LegacyPurge { max_busy_polls: 10 }, &mut |_, _| {})
            .unwrap();

        let commands: Vec<MockCommand> = s
            .port()
            .commands()
            .into_iter()
            .filter(|c| !matches!(c, MockCommand::FlashRead { .. }))
            .collect();
        assert_eq!(
            commands,
            vec![
                MockCommand::UnkWrite1(0),
                MockCommand::Erase(2 * BLOCK_SIZE),
                MockCommand::BusyPoll,
                MockCommand::UnkWrite1(0),
                MockCommand::Erase(BLOCK_SIZE),
                MockCommand::BusyPoll,
            ]
        );
    }

    #[test]
    fn test_finalization_per_variant_with_extra_command() {
        let mut s = session(dirty([3]), Model::Gt200e);
        s.purge_with(&GenericPurge { max_busy_polls: 10 }, &mut |_, _| {})
            .unwrap();
        assert_eq!(
            close_commands(&s.port().commands()),
            vec![0x1D, 0x1E, 0x1F, 0x1D, 0x1E, 0x1F]
        );

        let mut s = session(dirty([3]), Model::Gt200e);
        s.purge_with(&LegacyPurge { max_busy_polls: 10 }, &mut |_, _| {})
            .unwrap();
        assert!(close_commands(&s.port().commands()).is_empty());
    }

    #[test]
    fn test_clean_device_only_closes() {
        let mut s = session(MockDevice::new(), Model::Gt120);
        let report = s
            .purge_with(&GenericPurge { max_busy_polls: 10 }, &mut |_, _| {})
            .unwrap();

        let commands = s.port().commands();
        assert_eq!(report.erased, 0);
        assert_eq!(report.first_dirty, None);
        assert_eq!(count(&commands, MockCommand::BusyPoll), 0);
        assert_eq!(close_commands(&commands), vec![0x1E, 0x1F]);
    }

    #[test]
    fn test_busy_device_is_polled_until_idle() {
        let mut dev = dirty([1]);
        dev.busy_polls = 3;
        let mut s = session(dev, Model::Gt200e);
        s.purge_with(&LegacyPurge { max_busy_polls: 10 }, &mut |_, _| {})
            .unwrap();
        assert_eq!(count(&s.port().commands(), MockCommand::BusyPoll), 4);
    }

    #[test]
    fn test_unresponsive_device_fails() {
        let mut dev = dirty([1, 2]);
        dev.never_idle = true;
        let mut s = session(dev, Model::Gt100);
        let err = s
            .purge_with(&GenericPurge { max_busy_polls: 5 }, &mut |_, _| {})
            .unwrap_err();

        assert!(matches!(err, Error::DeviceUnresponsive { polls: 5 }));
        assert_eq!(count(&s.port().commands(), MockCommand::BusyPoll), 5);
    }

    #[test]
    fn test_rejected_probe_counts_as_used() {
        let mut dev = MockDevice::new();
        dev.reject_reads = true;
        let mut s = session(dev, Model::Gt100);
        let report = s
            .purge_with(&GenericPurge { max_busy_polls: 10 }, &mut |_, _| {})
            .unwrap();
        assert_eq!(report.first_dirty, Some(0x80));
        assert_eq!(report.erased, 0x80);
    }

    #[test]
    fn test_progress_reaches_total() {
        let mut s = session(dirty([5]), Model::Gt100);
        let mut calls = Vec::new();
        s.purge_with(&GenericPurge { max_busy_polls: 10 }, &mut |done, total| {
            calls.push((done, total));
        })
        .unwrap();
        assert_eq!(calls.len(), 0x80);
        assert_eq!(calls.last(), Some(&(0x80, 0x80)));
    }

    #[test]
    fn test_variant_from_name() {
        assert_eq!(PurgeVariant::from_name("Legacy"), Some(PurgeVariant::Legacy));
        assert_eq!(PurgeVariant::from_name("generic"), Some(PurgeVariant::Generic));
        assert_eq!(PurgeVariant::from_name("gt900"), None);
        assert_eq!(PurgeVariant::Legacy.strategy(1).variant(), PurgeVariant::Legacy);
    }
}
