//! Endpoint discovery.
//!
//! Loggers are found two ways: directly on the USB bus by VID/PID (`usb`
//! feature), and as serial ports (`native` feature). Serial ports are
//! classified by the USB bridge behind them when there is one.

use crate::port::TransportKind;

#[cfg(any(feature = "native", feature = "usb"))]
use log::{debug, trace};

/// Kind of hardware behind an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum DeviceKind {
    /// iGotU logger.
    Logger,
    /// Prolific PL2303 USB-to-Serial converter.
    Prolific,
    /// Silicon Labs CP210x USB-to-Serial converter.
    Cp210x,
    /// FTDI USB-to-Serial converter.
    Ftdi,
    /// Anything else.
    Unknown,
}

/// VID/PID table. An empty PID list matches any product of the vendor.
const KNOWN_USB_DEVICES: &[(u16, &[u16], DeviceKind)] = &[
    (0x0DF7, &[0x0900], DeviceKind::Logger),
    (0x067B, &[0x2303, 0x23A3], DeviceKind::Prolific),
    (0x10C4, &[0xEA60], DeviceKind::Cp210x),
    (0x0403, &[], DeviceKind::Ftdi),
];

impl DeviceKind {
    /// Classify a VID/PID pair.
    #[must_use]
    pub fn from_vid_pid(vid: u16, pid: u16) -> Self {
        KNOWN_USB_DEVICES
            .iter()
            .find(|(known_vid, pids, _)| vid == *known_vid && (pids.is_empty() || pids.contains(&pid)))
            .map_or(Self::Unknown, |(_, _, kind)| *kind)
    }

    /// Human-readable name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Logger => "iGotU",
            Self::Prolific => "PL2303",
            Self::Cp210x => "CP210x",
            Self::Ftdi => "FTDI",
            Self::Unknown => "Unknown",
        }
    }
}

/// Discovered endpoint.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct DetectedPort {
    /// Endpoint name: `usb:BBB:AAA` for USB, the device path for serial.
    pub name: String,
    /// Transport the endpoint is reached through.
    #[cfg_attr(feature = "serde", serde(serialize_with = "serialize_transport"))]
    pub transport: TransportKind,
    /// Classified hardware.
    pub device: DeviceKind,
    /// USB Vendor ID (if available).
    pub vid: Option<u16>,
    /// USB Product ID (if available).
    pub pid: Option<u16>,
    /// Device manufacturer string (if available).
    pub manufacturer: Option<String>,
    /// Device product string (if available).
    pub product: Option<String>,
    /// Serial number (if available).
    pub serial: Option<String>,
}

#[cfg(feature = "serde")]
fn serialize_transport<S: serde::Serializer>(
    transport: &TransportKind,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_str(transport)
}

impl DetectedPort {
    /// Whether the endpoint is a logger.
    pub fn is_logger(&self) -> bool {
        self.device == DeviceKind::Logger
    }
}

#[cfg(feature = "usb")]
fn detect_usb_loggers(result: &mut Vec<DetectedPort>) {
    match crate::port::usb::find_loggers() {
        Ok(loggers) => {
            for logger in loggers {
                trace!("Found logger on USB: {logger}");
                result.push(DetectedPort {
                    name: logger.to_string(),
                    transport: TransportKind::Usb,
                    device: DeviceKind::Logger,
                    vid: Some(crate::port::usb::VENDOR_ID),
                    pid: Some(crate::port::usb::PRODUCT_ID),
                    manufacturer: None,
                    product: None,
                    serial: None,
                });
            }
        },
        Err(e) => debug!("Failed to enumerate USB devices: {e}"),
    }
}

#[cfg(feature = "native")]
fn detect_serial_ports(result: &mut Vec<DetectedPort>) {
    match serialport::available_ports() {
        Ok(ports) => {
            for port_info in ports {
                let mut detected = DetectedPort {
                    name: port_info.port_name.clone(),
                    transport: TransportKind::Serial,
                    device: DeviceKind::Unknown,
                    vid: None,
                    pid: None,
                    manufacturer: None,
                    product: None,
                    serial: None,
                };

                if let serialport::SerialPortType::UsbPort(usb_info) = port_info.port_type {
                    detected.vid = Some(usb_info.vid);
                    detected.pid = Some(usb_info.pid);
                    detected.manufacturer = usb_info.manufacturer;
                    detected.product = usb_info.product;
                    detected.serial = usb_info.serial_number;
                    detected.device = DeviceKind::from_vid_pid(usb_info.vid, usb_info.pid);

                    trace!(
                        "Found serial port: {} (VID: {:04X}, PID: {:04X}, Device: {:?})",
                        port_info.port_name, usb_info.vid, usb_info.pid, detected.device
                    );
                }

                result.push(detected);
            }
        },
        Err(e) => debug!("Failed to enumerate serial ports: {e}"),
    }
}

/// Detect all available endpoints.
///
/// USB loggers come first, then serial ports in enumeration order.
/// Enumeration failures are logged and yield an empty contribution.
pub fn detect_ports() -> Vec<DetectedPort> {
    #[allow(unused_mut)]
    let mut result = Vec::new();
    #[cfg(feature = "usb")]
    detect_usb_loggers(&mut result);
    #[cfg(feature = "native")]
    detect_serial_ports(&mut result);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn port(name: &str, transport: TransportKind, vid_pid: Option<(u16, u16)>) -> DetectedPort {
        DetectedPort {
            name: name.to_string(),
            transport,
            device: vid_pid.map_or(DeviceKind::Unknown, |(v, p)| DeviceKind::from_vid_pid(v, p)),
            vid: vid_pid.map(|(v, _)| v),
            pid: vid_pid.map(|(_, p)| p),
            manufacturer: None,
            product: None,
            serial: None,
        }
    }

    #[test]
    fn test_device_kind_from_vid_pid() {
        assert_eq!(DeviceKind::from_vid_pid(0x0DF7, 0x0900), DeviceKind::Logger);
        assert_eq!(DeviceKind::from_vid_pid(0x0DF7, 0x0901), DeviceKind::Unknown);
        assert_eq!(DeviceKind::from_vid_pid(0x067B, 0x2303), DeviceKind::Prolific);
        assert_eq!(DeviceKind::from_vid_pid(0x0403, 0x1234), DeviceKind::Ftdi);
        assert_eq!(DeviceKind::from_vid_pid(0x1234, 0x5678), DeviceKind::Unknown);
    }

    #[test]
    fn test_is_logger() {
        assert!(port("usb:001:004", TransportKind::Usb, Some((0x0DF7, 0x0900))).is_logger());
        assert!(!port("/dev/ttyS0", TransportKind::Serial, None).is_logger());
    }

    #[test]
    fn test_detect_ports_lists_usb_loggers_first() {
        let ports = detect_ports();
        let first_serial = ports
            .iter()
            .position(|p| p.transport == TransportKind::Serial)
            .unwrap_or(ports.len());

        assert!(ports[..first_serial].iter().all(DetectedPort::is_logger));
        assert!(
            ports[first_serial..]
                .iter()
                .all(|p| p.transport == TransportKind::Serial)
        );
    }
}
