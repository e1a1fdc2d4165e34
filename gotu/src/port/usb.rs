//! Direct USB transport using `rusb`.
//!
//! The logger enumerates as a HID-class device. Commands go out as two
//! 8-byte class `SET_REPORT` control transfers and responses arrive as
//! 16-byte packets on the first IN endpoint of interface 0.
//!
//! Some loggers answer the first requests of a session slowly, so the read
//! and write timeout starts long and drops to a short value after the first
//! few transfers. See [`TimeoutPolicy`].

use {
    crate::{
        error::{Error, Result},
        port::Port,
        protocol::command::HALF_LEN,
    },
    log::{debug, info, trace},
    rusb::{
        Device, DeviceHandle, Direction, GlobalContext, Recipient, RequestType, TransferType,
    },
    std::time::Duration,
};

/// USB vendor ID of the iGotU loggers.
pub const VENDOR_ID: u16 = 0x0DF7;

/// USB product ID of the iGotU loggers.
pub const PRODUCT_ID: u16 = 0x0900;

/// Interface carrying the protocol.
pub const INTERFACE: u8 = 0;

/// IN endpoint used when the descriptor walk finds none.
pub const DEFAULT_IN_ENDPOINT: u8 = 0x81;

/// Timeout for the first [`CUTOFF_REQUESTS`] transfers.
pub const SLOW_TIMEOUT: Duration = Duration::from_millis(2000);

/// Timeout once the device is warmed up.
pub const FAST_TIMEOUT: Duration = Duration::from_millis(20);

/// Number of slow transfers before switching to [`FAST_TIMEOUT`].
pub const CUTOFF_REQUESTS: u32 = 2;

/// Size of one IN packet.
const PACKET_SIZE: usize = 0x10;

/// HID class request `SET_REPORT`.
const HID_SET_REPORT: u8 = 0x09;

/// `wValue` for an output report with ID 0.
const OUTPUT_REPORT: u16 = 0x0200;

/// Slow-then-fast transfer timeout.
///
/// Every call to [`next`](Self::next) counts as one transfer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimeoutPolicy {
    requests: u32,
}

impl TimeoutPolicy {
    /// Timeout to use for the next transfer.
    pub fn next(&mut self) -> Duration {
        self.requests = self.requests.saturating_add(1);
        if self.requests > CUTOFF_REQUESTS {
            FAST_TIMEOUT
        } else {
            SLOW_TIMEOUT
        }
    }

    /// Transfers issued so far.
    pub fn requests(&self) -> u32 {
        self.requests
    }
}

/// USB port to one logger.
pub struct UsbPort {
    handle: Option<DeviceHandle<GlobalContext>>,
    endpoint: u8,
    transfer_type: TransferType,
    receive_buffer: Vec<u8>,
    timeouts: TimeoutPolicy,
    name: String,
}

/// A logger found on the bus.
#[derive(Debug, Clone)]
pub struct UsbLoggerInfo {
    /// USB bus number.
    pub bus: u8,
    /// USB device address.
    pub address: u8,
}

impl std::fmt::Display for UsbLoggerInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "usb:{:03}:{:03}", self.bus, self.address)
    }
}

/// List attached loggers by VID/PID.
pub fn find_loggers() -> Result<Vec<UsbLoggerInfo>> {
    let devices = rusb::devices()?;
    let mut found = Vec::new();
    for device in devices.iter() {
        let Ok(descriptor) = device.device_descriptor() else {
            continue;
        };
        if descriptor.vendor_id() == VENDOR_ID && descriptor.product_id() == PRODUCT_ID {
            found.push(UsbLoggerInfo {
                bus: device.bus_number(),
                address: device.address(),
            });
        }
    }
    Ok(found)
}

/// Locate the first IN endpoint of [`INTERFACE`].
fn find_in_endpoint(device: &Device<GlobalContext>) -> Option<(u8, TransferType)> {
    let config = device.active_config_descriptor().ok()?;
    for interface in config.interfaces() {
        if interface.number() != INTERFACE {
            continue;
        }
        for setting in interface.descriptors() {
            for endpoint in setting.endpoint_descriptors() {
                if endpoint.direction() == Direction::In {
                    return Some((endpoint.address(), endpoint.transfer_type()));
                }
            }
        }
    }
    None
}

impl UsbPort {
    /// Open the first attached logger.
    pub fn open() -> Result<Self> {
        let devices = rusb::devices()?;
        let device = devices
            .iter()
            .find(|d| {
                d.device_descriptor()
                    .is_ok_and(|desc| desc.vendor_id() == VENDOR_ID && desc.product_id() == PRODUCT_ID)
            })
            .ok_or(Error::DeviceNotFound)?;

        let name = format!("usb:{:03}:{:03}", device.bus_number(), device.address());
        info!("Opening logger at {name}");

        let mut handle = device.open()?;
        // Not every platform supports detaching; the claim reports the real failure
        if let Err(e) = handle.set_auto_detach_kernel_driver(true) {
            debug!("Kernel driver auto-detach unavailable: {e}");
        }
        if let Err(e) = handle.set_active_configuration(1) {
            debug!("Keeping current configuration: {e}");
        }
        handle.claim_interface(INTERFACE)?;

        let (endpoint, transfer_type) = find_in_endpoint(&device)
            .unwrap_or((DEFAULT_IN_ENDPOINT, TransferType::Interrupt));
        debug!("Using IN endpoint {endpoint:#04x} ({transfer_type:?})");

        Ok(Self {
            handle: Some(handle),
            endpoint,
            transfer_type,
            receive_buffer: Vec::new(),
            timeouts: TimeoutPolicy::default(),
            name,
        })
    }

    fn handle(&self) -> Result<&DeviceHandle<GlobalContext>> {
        self.handle
            .as_ref()
            .ok_or_else(|| Error::Io(std::io::Error::new(std::io::ErrorKind::NotConnected, "port closed")))
    }

    fn write_half(&mut self, half: &[u8]) -> Result<()> {
        let timeout = self.timeouts.next();
        let written = self.handle()?.write_control(
            rusb::request_type(Direction::Out, RequestType::Class, Recipient::Interface),
            HID_SET_REPORT,
            OUTPUT_REPORT,
            u16::from(INTERFACE),
            half,
            timeout,
        )?;
        if written != half.len() {
            return Err(Error::Protocol(format!(
                "short control write: {written} of {} bytes",
                half.len()
            )));
        }
        Ok(())
    }

    fn read_packet(&mut self) -> Result<Vec<u8>> {
        let timeout = self.timeouts.next();
        let endpoint = self.endpoint;
        let transfer_type = self.transfer_type;
        let handle = self.handle()?;
        let mut packet = [0u8; PACKET_SIZE];
        let result = match transfer_type {
            TransferType::Bulk => handle.read_bulk(endpoint, &mut packet, timeout),
            _ => handle.read_interrupt(endpoint, &mut packet, timeout),
        };
        match result {
            Ok(n) => Ok(packet[..n].to_vec()),
            Err(rusb::Error::Timeout) => Err(Error::Timeout(format!(
                "no packet on endpoint {endpoint:#04x} within {}ms",
                timeout.as_millis()
            ))),
            Err(e) => Err(e.into()),
        }
    }

    fn fill_receive_buffer(&mut self, size: usize) -> Result<()> {
        while self.receive_buffer.len() < size {
            let packet = self.read_packet()?;
            trace!("usb RX {packet:02X?}");
            self.receive_buffer.extend_from_slice(&packet);
        }
        Ok(())
    }
}

impl Port for UsbPort {
    fn write_frame(&mut self, data: &[u8]) -> Result<()> {
        if data.len() != 2 * HALF_LEN {
            return Err(Error::Protocol(format!(
                "USB commands must be {} bytes, got {}",
                2 * HALF_LEN,
                data.len()
            )));
        }
        trace!("usb TX {data:02X?}");
        self.write_half(&data[..HALF_LEN])?;
        // The device acknowledges the first half before accepting the second
        let _ = self.read_bytes(3)?;
        self.write_half(&data[HALF_LEN..])
    }

    fn read_bytes(&mut self, n: usize) -> Result<Vec<u8>> {
        self.fill_receive_buffer(n)?;
        Ok(self
            .receive_buffer
            .drain(..n)
            .collect())
    }

    fn flush_input(&mut self) -> Result<()> {
        self.receive_buffer.clear();
        if let Err(e) = self.read_packet() {
            trace!("Ignoring flush read error: {e}");
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(mut handle) = self.handle.take() {
            handle.release_interface(INTERFACE)?;
        }
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
