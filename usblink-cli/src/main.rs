//! usblink CLI - Command-line tool for USB serial devices.
//!
//! ## Features
//!
//! - List attached USB serial adapters (plain or JSON)
//! - Interactive serial monitor with keyboard or piped input
//! - One-shot writes of text or hex payloads
//! - Interactive device selection
//! - Shell completion generation
//! - Layered configuration and environment variable support

use anyhow::Result;
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use console::style;
use env_logger::Env;
use log::debug;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use usblink::config::DEFAULT_BAUD_RATE;
use usblink::{ErrorKind, Session, SessionConfig};

mod commands;
mod config;
mod display;
mod select;

use config::Config;
use select::{SelectOptions, select_device};

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Set by the Ctrl+C handler while a command that installs one is running.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Check if emoji should be used (TTY and colors enabled).
pub(crate) fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// Whether Ctrl+C was received since the handler was installed.
pub(crate) fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::Relaxed)
}

/// Route SIGINT to [`was_interrupted`] instead of killing the process.
pub(crate) fn install_interrupt_handler() -> Result<()> {
    ctrlc::set_handler(|| INTERRUPTED.store(true, Ordering::Relaxed))?;
    Ok(())
}

/// Errors classified for the process exit code.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Bad invocation; exit code 2.
    #[error("{0}")]
    Usage(String),
    /// The user backed out; exit code 130.
    #[error("{0}")]
    Cancelled(String),
}

/// usblink - Talk to USB serial adapters from the terminal.
///
/// Environment variables:
///   USBLINK_PORT              - Default device
///   USBLINK_BAUD              - Default baud rate (default: 115200)
///   USBLINK_NON_INTERACTIVE   - Non-interactive mode (disable prompts)
#[derive(Parser)]
#[command(name = "usblink")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub(crate) struct Cli {
    /// Device to use (auto-detected if not specified).
    #[arg(short, long, global = true, env = "USBLINK_PORT")]
    port: Option<String>,

    /// Baud rate [default: 115200].
    #[arg(
        short,
        long,
        global = true,
        env = "USBLINK_BAUD",
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    baud: Option<u32>,

    /// Write timeout in milliseconds [default: 1000].
    #[arg(
        long,
        global = true,
        value_name = "MS",
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    write_timeout_ms: Option<u64>,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Non-interactive mode (fail instead of prompting).
    #[arg(long, global = true, env = "USBLINK_NON_INTERACTIVE")]
    non_interactive: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// List attached USB serial devices.
    ListDevices {
        /// Print a JSON array instead of listing lines.
        #[arg(long)]
        json: bool,
    },

    /// Open a device and show what it sends.
    ///
    /// Keyboard input (or piped stdin) is forwarded to the device.
    /// Ctrl+C exits, Ctrl+T toggles timestamps.
    Monitor {
        /// Prefix received lines with a timestamp.
        #[arg(long)]
        timestamp: bool,
    },

    /// Write a payload to a device and disconnect.
    Send {
        /// Text to send, or hex bytes with --hex.
        data: String,

        /// Interpret DATA as hex bytes (e.g. "01 02 ff").
        #[arg(long)]
        hex: bool,

        /// Append "\r\n" to the payload.
        #[arg(long)]
        newline: bool,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell to generate completions for.
        #[arg(value_enum)]
        shell: Shell,
    },
}

impl Cli {
    /// Baud rate after applying config defaults.
    fn resolved_baud(&self, config: &Config) -> u32 {
        self.baud
            .or(config.connection.baud)
            .unwrap_or(DEFAULT_BAUD_RATE)
    }

    /// Library configuration for this invocation.
    fn session_config(&self, config: &Config) -> SessionConfig {
        let baud = self.resolved_baud(config);
        let mut session_config = SessionConfig::default().with_default_baud(baud);
        if let Some(ms) = self.write_timeout_ms.or(config.connection.write_timeout_ms) {
            session_config = session_config.with_write_timeout(Duration::from_millis(ms));
        }
        session_config
    }

    fn select_options(&self, config: &Config) -> SelectOptions {
        SelectOptions {
            port: self.port.clone(),
            configured: config.connection.port.clone(),
            non_interactive: self.non_interactive,
        }
    }
}

/// Start a native session for this invocation.
pub(crate) fn open_session(cli: &Cli, config: &Config) -> Result<Session> {
    let session_config = cli.session_config(config);
    debug!("Session config: {session_config:?}");
    Ok(Session::native(session_config)?)
}

/// Pick the device to connect to.
pub(crate) fn resolve_device(cli: &Cli, config: &Config, session: &Session) -> Result<String> {
    let options = cli.select_options(config);
    // Skip enumeration when the device is already known
    let devices = if options.port.is_some() || options.configured.is_some() {
        Vec::new()
    } else {
        session.list_devices()
    };
    select_device(&options, devices)
}

fn init_logging(cli: &Cli) {
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
}

/// Map an error to the process exit code.
///
/// - 2: usage errors, including arguments the library rejects
/// - 130: cancelled by the user
/// - 1: everything else
fn exit_code_for(err: &anyhow::Error) -> u8 {
    if let Some(cli_err) = err.downcast_ref::<CliError>() {
        return match cli_err {
            CliError::Usage(_) => 2,
            CliError::Cancelled(_) => 130,
        };
    }

    let invalid_argument = err
        .chain()
        .filter_map(|cause| cause.downcast_ref::<usblink::Error>())
        .any(|usb_err| usb_err.kind() == ErrorKind::InvalidArgument);
    if invalid_argument { 2 } else { 1 }
}

fn run(cli: &Cli) -> Result<()> {
    let config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    match &cli.command {
        Commands::ListDevices { json } => {
            let session = open_session(cli, &config)?;
            commands::list::cmd_list_devices(&session, *json)?;
        },
        Commands::Monitor { timestamp } => {
            let session = open_session(cli, &config)?;
            let device = resolve_device(cli, &config, &session)?;
            commands::monitor::cmd_monitor(
                &session,
                &device,
                cli.resolved_baud(&config),
                *timestamp || config.monitor.timestamp,
            )?;
        },
        Commands::Send { data, hex, newline } => {
            // Reject a bad payload before touching any device
            let payload = commands::send::build_payload(data, *hex, *newline)?;
            let session = open_session(cli, &config)?;
            let device = resolve_device(cli, &config, &session)?;
            commands::send::cmd_send(&session, &device, cli.resolved_baud(&config), &payload)?;
        },
        Commands::Completions { shell } => {
            commands::completions::cmd_completions(*shell);
        },
    }

    Ok(())
}

fn main() -> ExitCode {
    // --- NO_COLOR and TTY detection ---
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);

    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();
    init_logging(&cli);

    debug!(
        "usblink v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {err:#}", style("Error:").red().bold());
            ExitCode::from(exit_code_for(&err))
        },
    }
}

#[cfg(test)]
mod cli_tests {
    use super::*;
    use anyhow::Context as _;
    use clap::CommandFactory;

    #[test]
    fn test_cli_command_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cli_parse_list_devices_json() {
        let cli = Cli::try_parse_from(["usblink", "list-devices", "--json"]).unwrap();
        assert!(matches!(cli.command, Commands::ListDevices { json: true }));
    }

    #[test]
    fn test_cli_parse_send() {
        let cli = Cli::try_parse_from([
            "usblink",
            "-p",
            "/dev/ttyUSB0",
            "send",
            "01 02",
            "--hex",
            "--newline",
        ])
        .unwrap();
        assert_eq!(cli.port.as_deref(), Some("/dev/ttyUSB0"));
        match cli.command {
            Commands::Send { data, hex, newline } => {
                assert_eq!(data, "01 02");
                assert!(hex);
                assert!(newline);
            },
            _ => panic!("expected send"),
        }
    }

    #[test]
    fn test_cli_global_options() {
        let cli = Cli::try_parse_from([
            "usblink",
            "--port",
            "COM3",
            "--baud",
            "9600",
            "--write-timeout-ms",
            "250",
            "-vv",
            "--quiet",
            "--non-interactive",
            "--config",
            "/tmp/usblink.toml",
            "monitor",
            "--timestamp",
        ])
        .unwrap();
        assert_eq!(cli.port.as_deref(), Some("COM3"));
        assert_eq!(cli.baud, Some(9600));
        assert_eq!(cli.write_timeout_ms, Some(250));
        assert_eq!(cli.verbose, 2);
        assert!(cli.quiet);
        assert!(cli.non_interactive);
        assert_eq!(cli.config_path, Some(PathBuf::from("/tmp/usblink.toml")));
        assert!(matches!(cli.command, Commands::Monitor { timestamp: true }));
    }

    #[test]
    fn test_cli_rejects_zero_baud() {
        assert!(
            Cli::try_parse_from(["usblink", "--baud", "0", "list-devices"])
                .is_err()
        );
    }

    #[test]
    fn test_cli_missing_subcommand() {
        assert!(Cli::try_parse_from(["usblink"]).is_err());
    }

    #[test]
    fn test_baud_precedence() {
        let mut config = Config::default();
        let cli = Cli::try_parse_from(["usblink", "list-devices"]).unwrap();
        assert_eq!(cli.resolved_baud(&config), DEFAULT_BAUD_RATE);

        config.connection.baud = Some(57600);
        assert_eq!(cli.resolved_baud(&config), 57600);

        let cli = Cli::try_parse_from(["usblink", "-b", "9600", "list-devices"]).unwrap();
        assert_eq!(cli.resolved_baud(&config), 9600);
    }

    #[test]
    fn test_session_config_from_flags_and_file() {
        let mut config = Config::default();
        config.connection.write_timeout_ms = Some(300);
        let cli = Cli::try_parse_from(["usblink", "-b", "230400", "list-devices"]).unwrap();
        let session_config = cli.session_config(&config);
        assert_eq!(session_config.default_baud, 230400);
        assert_eq!(session_config.write_timeout, Duration::from_millis(300));

        let args = ["usblink", "--write-timeout-ms", "20", "list-devices"];
        let cli = Cli::try_parse_from(args).unwrap();
        assert_eq!(
            cli.session_config(&config).write_timeout,
            Duration::from_millis(20)
        );
    }

    #[test]
    fn test_exit_code_mapping() {
        assert_eq!(exit_code_for(&CliError::Usage("bad".into()).into()), 2);
        assert_eq!(
            exit_code_for(&CliError::Cancelled("stop".into()).into()),
            130
        );
        assert_eq!(exit_code_for(&anyhow::anyhow!("boom")), 1);

        let invalid: anyhow::Error = usblink::Error::InvalidArgument("baud".into()).into();
        assert_eq!(exit_code_for(&invalid.context("Failed to connect")), 2);

        let missing = Err::<(), _>(usblink::Error::DeviceMissing("/dev/ttyUSB0".into()))
            .context("Failed to connect")
            .unwrap_err();
        assert_eq!(exit_code_for(&missing), 1);
    }
}
