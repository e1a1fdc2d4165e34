//! # gotu
//!
//! Protocol engine for iGotU GT-200 family GPS loggers.
//!
//! This crate talks to the logger over USB or a serial link and provides:
//!
//! - Command framing with checksums and response envelope parsing
//! - Flash reads and bit-packed record decoding
//! - Track assembly from the record stream
//! - The model-specific flash purge sequences
//!
//! ## Supported Models
//!
//! - GT-100, GT-120, GT-200
//! - GT-200e / GT-600
//!
//! ## Features
//!
//! - `usb` (default): direct USB access through `rusb`
//! - `native` (default): serial port pass-through through `serialport`
//! - `serde`: Serialization support for data types
//!
//! ## Example
//!
//! ```rust,no_run
//! use gotu::{DeviceMode, Session, TransportKind, open_port};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let port = open_port(TransportKind::Usb, None)?;
//!     let mut session = Session::new(port)?;
//!     session.switch_mode(DeviceMode::Configure)?;
//!     session.identify()?;
//!     session.detect_model()?;
//!
//!     for track in session.tracks()? {
//!         println!("{}", track?);
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::{Arc, OnceLock};

pub mod device;
pub mod error;
pub mod model;
pub mod port;
pub mod protocol;
pub mod purge;
pub mod record;
pub mod session;
pub mod track;

static INTERRUPT_CHECKER: OnceLock<Arc<dyn Fn() -> bool + Send + Sync>> = OnceLock::new();

/// Register a global interruption checker polled while downloading.
///
/// The checker should return `true` when the current download should stop
/// (for example after receiving Ctrl-C in CLI applications). Purge never
/// consults it.
pub fn set_interrupt_checker<F>(checker: F)
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    let _ = INTERRUPT_CHECKER.set(Arc::new(checker));
}

/// Returns whether interruption was requested by the embedding application.
#[must_use]
pub fn is_interrupted_requested() -> bool {
    INTERRUPT_CHECKER
        .get()
        .is_some_and(|checker| checker())
}

#[cfg(test)]
pub(crate) fn test_set_interrupted(value: bool) {
    use std::sync::atomic::{AtomicBool, Ordering};

    static TEST_INTERRUPT_FLAG: OnceLock<Arc<AtomicBool>> = OnceLock::new();

    let flag = TEST_INTERRUPT_FLAG
        .get_or_init(|| {
            let shared = Arc::new(AtomicBool::new(false));
            let checker = Arc::clone(&shared);
            set_interrupt_checker(move || checker.load(Ordering::Relaxed));
            shared
        })
        .clone();

    flag.store(value, Ordering::Relaxed);
}

// Re-exports for convenience
#[cfg(feature = "native")]
pub use port::native::NativePort;
#[cfg(feature = "usb")]
pub use port::usb::UsbPort;
pub use {
    device::{DetectedPort, DeviceKind, detect_ports},
    error::{Error, Result},
    model::Model,
    port::{Port, SerialConfig, TransportKind, open_port},
    protocol::{Command, DeviceMode, IdentifyInfo},
    purge::{PurgeReport, PurgeStrategy, PurgeVariant},
    record::{Record, RecordBody, RecordDecoder, RecordKind, StatusFlags, Waypoint},
    session::{Records, Session},
    track::{Track, TrackPoint, Tracks},
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interrupt_checker_default_false() {
        test_set_interrupted(false);
        assert!(!is_interrupted_requested());
    }

    #[test]
    fn test_interrupt_checker_toggle_true_false() {
        test_set_interrupted(true);
        assert!(is_interrupted_requested());

        test_set_interrupted(false);
        assert!(!is_interrupted_requested());
    }
}
