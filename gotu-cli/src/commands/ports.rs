//! List-ports command implementation.

use console::style;
use gotu::{DetectedPort, DeviceKind};

/// JSON document for the detected endpoints.
fn ports_json(detected: &[DetectedPort]) -> String {
    serde_json::to_string_pretty(detected).unwrap_or_else(|_| "[]".to_string())
}

/// List ports command implementation.
///
/// JSON goes to stdout. The human-readable listing goes to stderr.
pub(crate) fn cmd_list_ports(json: bool) {
    let detected = gotu::detect_ports();

    if json {
        println!("{}", ports_json(&detected));
        return;
    }

    eprintln!("{}", style("Available ports:").bold().underlined());

    if detected.is_empty() {
        eprintln!("  {}", style("No loggers or serial ports found").dim());
        return;
    }

    for port in &detected {
        let device_type = if port.device != DeviceKind::Unknown {
            format!(" [{}]", style(port.device.name()).yellow())
        } else {
            String::new()
        };

        let vid_pid = if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
            format!(" ({vid:04X}:{pid:04X})")
        } else {
            String::new()
        };

        let product = port
            .product
            .as_deref()
            .map(|p| format!(" - {}", style(p).dim()))
            .unwrap_or_default();

        eprintln!(
            "  {} {} ({}){device_type}{vid_pid}{product}",
            style("•").green(),
            style(&port.name).cyan(),
            port.transport
        );
    }

    if let Some(logger) = detected
        .iter()
        .find(|p| p.is_logger())
    {
        eprintln!(
            "\n{} Logger found: {}",
            style("→").green().bold(),
            style(&logger.name).cyan().bold()
        );
    }
}
