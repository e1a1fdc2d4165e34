//! gotu CLI - Command-line tool for iGotU GPS loggers.
//!
//! ## Features
//!
//! - Download all tracks to a GPX file
//! - Purge the logger memory
//! - Show device information and raw record dumps
//! - USB and serial transports
//! - Shell completion generation
//! - Environment variable support

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use console::style;
use env_logger::Env;
use gotu::{DeviceMode, Port, PurgeVariant, SerialConfig, Session, TransportKind};
use log::{debug, info};
use std::env;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Set by the Ctrl-C handler.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Set while the device memory is being erased.
static PURGE_IN_PROGRESS: AtomicBool = AtomicBool::new(false);

/// Check if emoji/animations should be used (TTY and colors enabled).
fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// Whether the user pressed Ctrl-C.
pub(crate) fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

mod commands;
mod config;
mod gpx;

use config::Config;

/// Session over whichever transport was selected.
pub(crate) type DeviceSession = Session<Box<dyn Port>>;

/// Errors raised by the CLI itself, mapped to dedicated exit codes.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Invalid combination of arguments or configuration.
    #[error("{0}")]
    Usage(String),
    /// The user declined or interrupted the operation.
    #[error("{0}")]
    Cancelled(String),
}

/// gotu - Download tracks from and manage iGotU GPS loggers.
///
/// Environment variables:
///   GOTU_TRANSPORT         - Transport to use (usb, serial)
///   GOTU_PORT              - Serial port (implies the serial transport)
///   GOTU_BAUD              - Serial baud rate (default: 9600)
///   GOTU_NON_INTERACTIVE   - Non-interactive mode (disable prompts)
#[derive(Parser)]
#[command(name = "gotu")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Transport used to reach the logger [default: usb].
    #[arg(long, global = true, value_enum, env = "GOTU_TRANSPORT")]
    transport: Option<Transport>,

    /// Serial port to use (implies `--transport serial`).
    #[arg(short, long, global = true, env = "GOTU_PORT")]
    port: Option<String>,

    /// Baud rate for the serial transport [default: 9600].
    #[arg(short, long, global = true, env = "GOTU_BAUD")]
    baud: Option<u32>,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Non-interactive mode (fail instead of prompting).
    #[arg(long, global = true, env = "GOTU_NON_INTERACTIVE")]
    non_interactive: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Transport selection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Transport {
    /// Direct USB access.
    Usb,
    /// Serial port pass-through.
    Serial,
}

impl From<Transport> for TransportKind {
    fn from(transport: Transport) -> Self {
        match transport {
            Transport::Usb => TransportKind::Usb,
            Transport::Serial => TransportKind::Serial,
        }
    }
}

/// Purge sequence selection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Variant {
    /// Sequence used by current firmware.
    Generic,
    /// Older sequence: fixed 0x6ff..=1 scan on 0x700-block models only, busy
    /// poll after each erase and no close commands.
    Legacy,
}

impl From<Variant> for PurgeVariant {
    fn from(variant: Variant) -> Self {
        match variant {
            Variant::Generic => PurgeVariant::Generic,
            Variant::Legacy => PurgeVariant::Legacy,
        }
    }
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Download all tracks to a GPX file.
    Get {
        /// Destination GPX file.
        dest: PathBuf,
    },

    /// Erase all recorded data from the device.
    Purge {
        /// Skip the confirmation prompt.
        #[arg(short, long)]
        yes: bool,

        /// Force a purge sequence instead of the model's.
        #[arg(long, value_enum)]
        variant: Option<Variant>,
    },

    /// Show device identification, model and record count.
    Info {
        /// Output information as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// List every record stored on the device.
    Dump {
        /// Output records as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// List iGotU USB devices and serial ports.
    ListPorts {
        /// Output port list as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type for completions.
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn main() {
    let code = match run() {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("{} {err:#}", style("Error:").red().bold());
            exit_code(&err)
        },
    };
    std::process::exit(code);
}

/// Exit code for a failed run: 2 for usage errors, 130 for cancellation.
fn exit_code(err: &anyhow::Error) -> i32 {
    if let Some(cli_err) = err.downcast_ref::<CliError>() {
        return match cli_err {
            CliError::Usage(_) => 2,
            CliError::Cancelled(_) => 130,
        };
    }
    match err.downcast_ref::<gotu::Error>() {
        Some(gotu::Error::Interrupted) => 130,
        Some(gotu::Error::Config(_)) => 2,
        _ => 1,
    }
}

fn run() -> Result<()> {
    // --- NO_COLOR and TTY detection ---
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);

    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();

    debug!(
        "gotu v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    install_interrupt_handler();

    let config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    match &cli.command {
        Commands::Get { dest } => commands::download::cmd_get(&cli, &config, dest),
        Commands::Purge { yes, variant } => {
            commands::purge::cmd_purge(&cli, &config, *yes, variant.map(PurgeVariant::from))
        },
        Commands::Info { json } => commands::download::cmd_info(&cli, &config, *json),
        Commands::Dump { json } => commands::download::cmd_dump(&cli, &config, *json),
        Commands::ListPorts { json } => {
            commands::ports::cmd_list_ports(*json);
            Ok(())
        },
        Commands::Completions { shell } => {
            commands::completions::cmd_completions(*shell);
            Ok(())
        },
    }
}

/// Route Ctrl-C into the library's interruption check.
///
/// Downloads stop at the next block. A purge is never interrupted: an
/// erase cut short can leave the logger unusable.
fn install_interrupt_handler() {
    let result = ctrlc::set_handler(|| {
        if PURGE_IN_PROGRESS.load(Ordering::SeqCst) {
            eprintln!(
                "\n{} Purge in progress, waiting for it to finish",
                style("Warning:").yellow().bold()
            );
            return;
        }
        if INTERRUPTED.swap(true, Ordering::SeqCst) {
            // Second Ctrl-C
            std::process::exit(130);
        }
    });
    if let Err(e) = result {
        debug!("Failed to install Ctrl-C handler: {e}");
    }
    gotu::set_interrupt_checker(was_interrupted);
}

/// Marks a purge as running for the lifetime of the guard.
pub(crate) struct PurgeGuard;

impl PurgeGuard {
    pub(crate) fn new() -> Self {
        PURGE_IN_PROGRESS.store(true, Ordering::SeqCst);
        Self
    }
}

impl Drop for PurgeGuard {
    fn drop(&mut self) {
        PURGE_IN_PROGRESS.store(false, Ordering::SeqCst);
    }
}

/// Transport selection merged from flags, environment and config files.
#[derive(Debug, PartialEq, Eq)]
struct Connection {
    transport: TransportKind,
    serial: Option<SerialConfig>,
}

/// Resolve the transport: flags and environment win over config files.
///
/// A serial port name given on the command line implies the serial
/// transport unless `--transport` says otherwise.
fn resolve_connection(cli: &Cli, config: &Config) -> Result<Connection> {
    let transport = match (cli.transport, &cli.port) {
        (Some(transport), _) => transport.into(),
        (None, Some(_)) => TransportKind::Serial,
        (None, None) => config
            .connection
            .transport()
            .unwrap_or_default(),
    };

    if transport == TransportKind::Usb {
        return Ok(Connection {
            transport,
            serial: None,
        });
    }

    let name = cli
        .port
        .clone()
        .or_else(|| config.connection.serial.clone())
        .filter(|name| !name.trim().is_empty())
        .ok_or_else(|| {
            CliError::Usage("the serial transport needs a port name (--port or GOTU_PORT)".to_string())
        })?;
    let baud = cli
        .baud
        .or(config.connection.baud)
        .unwrap_or(gotu::port::DEFAULT_BAUD);

    Ok(Connection {
        transport,
        serial: Some(SerialConfig::new(name, baud)),
    })
}

/// Open the transport and run the common set-up sequence.
///
/// Every device command starts from here: open, switch to configure mode,
/// identify and detect the model.
pub(crate) fn open_session(
    cli: &Cli,
    config: &Config,
    variant: Option<PurgeVariant>,
) -> Result<(DeviceSession, gotu::IdentifyInfo)> {
    let connection = resolve_connection(cli, config)?;
    debug!("Connecting over {}", connection.transport);

    let port = gotu::open_port(connection.transport, connection.serial.as_ref())
        .context("Failed to open the logger")?;
    let mut session = Session::new(port)
        .context("Failed to start a session")?
        .with_purge_variant(variant.or_else(|| config.purge.variant()))
        .with_max_busy_polls(
            config
                .purge
                .max_busy_polls
                .unwrap_or(gotu::purge::DEFAULT_MAX_BUSY_POLLS),
        );

    session
        .switch_mode(DeviceMode::Configure)
        .context("Failed to switch the device to configure mode")?;
    let identity = session
        .identify()
        .context("Failed to identify the device")?;
    let model = session
        .detect_model()
        .context("Failed to detect the device model")?;
    info!(
        "Connected to {model} (serial {}, firmware {}.{:02}) on {}",
        identity.serial,
        identity.version_major,
        identity.version_minor,
        session
            .port()
            .name()
    );

    Ok((session, identity))
}
