//! portlink CLI - Command/response transactions with serial-attached devices.
//!
//! ## Features
//!
//! - Send a command and print the framed response (JSON, chunked, or raw)
//! - Pulse RTS/DTR to reset the device
//! - Close and reopen the port in place
//! - Interactive serial port selection
//! - Shell completion generation
//! - Environment variable and config file support

use anyhow::Result;
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use console::style;
use env_logger::Env;
use log::debug;
use std::env;
use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};

mod commands;
mod config;
mod serial;

use config::Config;
use serial::{SerialOptions, ask_remember_port, select_serial_port};

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Check if emoji/animations should be used (TTY and colors enabled).
pub(crate) fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// portlink - Talk to serial devices that answer in JSON or chunked frames.
///
/// Environment variables:
///   PORTLINK_PORT              - Default serial port
///   PORTLINK_BAUD              - Default baud rate (default: 115200)
///   PORTLINK_NON_INTERACTIVE   - Non-interactive mode (disable prompts)
#[derive(Parser)]
#[command(name = "portlink")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
#[command(after_help = "Examples:\n  \
    portlink -p /dev/ttyUSB0 send '{\"status\":{}}'\n  \
    portlink send --plain --newline AT\n  \
    portlink list-ports --vid 10c4\n  \
    portlink reset")]
pub(crate) struct Cli {
    /// Serial port to use (auto-detected if not specified).
    #[arg(short, long, global = true, env = "PORTLINK_PORT")]
    pub(crate) port: Option<String>,

    /// Baud rate (overrides the config file).
    #[arg(short, long, global = true, env = "PORTLINK_BAUD")]
    pub(crate) baud: Option<u32>,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub(crate) verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    pub(crate) quiet: bool,

    /// Non-interactive mode (fail instead of prompting).
    #[arg(long, global = true, env = "PORTLINK_NON_INTERACTIVE")]
    pub(crate) non_interactive: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    pub(crate) config_path: Option<PathBuf>,

    #[command(subcommand)]
    pub(crate) command: Commands,
}

/// Default baud rate when neither flag, environment nor config sets one.
pub(crate) const DEFAULT_BAUD: u32 = 115200;

impl Cli {
    /// Effective baud rate: flag or environment, then config, then default.
    pub(crate) fn baud_rate(&self, config: &Config) -> u32 {
        self.baud
            .or(config
                .connection
                .baud)
            .unwrap_or(DEFAULT_BAUD)
    }
}

/// Available commands.
#[derive(Subcommand)]
pub(crate) enum Commands {
    /// List available serial ports.
    ListPorts {
        /// Output port list as JSON to stdout.
        #[arg(long)]
        json: bool,

        /// Only list USB ports with this vendor ID (hex).
        #[arg(long, value_name = "HEX", value_parser = commands::ports::parse_usb_id)]
        vid: Option<u16>,

        /// Only list USB ports with this product ID (hex).
        #[arg(long, value_name = "HEX", value_parser = commands::ports::parse_usb_id)]
        pid: Option<u16>,
    },

    /// Send one command and print the response.
    Send {
        /// Command to send (text, or hex bytes with --hex).
        data: String,

        /// Wait for the first response byte, in milliseconds.
        #[arg(long, value_name = "MS")]
        delay: Option<u64>,

        /// Silence between bytes that ends the response, in milliseconds.
        #[arg(long, value_name = "MS")]
        timeout: Option<u64>,

        /// Read until the line is quiet, without JSON or chunk framing.
        #[arg(long)]
        plain: bool,

        /// Treat DATA as hex bytes and print the response as a hex dump.
        #[arg(long)]
        hex: bool,

        /// Append CR LF to the command.
        #[arg(long)]
        newline: bool,

        /// Never fall back to silence framing for malformed chunked responses.
        #[arg(long)]
        strict_chunked: bool,

        /// Output the transaction as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Reset the device with the RTS/DTR sequence.
    Reset {
        /// Output the result as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Close and reopen the serial port with the same settings.
    SoftReset {
        /// Output the result as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type for completions (auto-detected if not specified with --install).
        #[arg(value_enum)]
        shell: Option<Shell>,

        /// Automatically install completions to your shell configuration.
        #[arg(long)]
        install: bool,
    },
}

/// Errors with a dedicated exit code.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Invalid invocation or missing setup.
    #[error("{0}")]
    Usage(String),
    /// The device never answered.
    #[error("{0}")]
    NoResponse(String),
    /// The device started answering but the frame never completed.
    #[error("{0}")]
    TimedOut(String),
    /// The user cancelled a prompt.
    #[error("{0}")]
    Cancelled(String),
}

impl CliError {
    /// Process exit code for this error.
    pub(crate) fn exit_code(&self) -> i32 {
        match self {
            Self::Usage(_) => 2,
            Self::NoResponse(_) | Self::TimedOut(_) => 3,
            Self::Cancelled(_) => 130,
        }
    }
}

/// Map any error to a process exit code.
fn exit_code_for(err: &anyhow::Error) -> i32 {
    err.downcast_ref::<CliError>()
        .map_or(1, CliError::exit_code)
}

/// Get serial port from CLI args, config, or interactive selection.
pub(crate) fn get_port(cli: &Cli, config: &mut Config) -> Result<String> {
    let options = SerialOptions {
        port: cli
            .port
            .clone(),
        non_interactive: cli.non_interactive,
    };

    let selected = select_serial_port(&options, config)?;

    if selected.prompted && !cli.non_interactive {
        ask_remember_port(&selected.name, config)?;
    }

    Ok(selected.name)
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

fn run(cli: &Cli) -> Result<()> {
    let mut config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    match &cli.command {
        Commands::ListPorts { json, vid, pid } => {
            commands::ports::cmd_list_ports(*json, *vid, *pid)
        },
        Commands::Send {
            data,
            delay,
            timeout,
            plain,
            hex,
            newline,
            strict_chunked,
            json,
        } => {
            let request = commands::send::SendRequest {
                data,
                delay: *delay,
                timeout: *timeout,
                plain: *plain,
                hex: *hex,
                newline: *newline,
                strict_chunked: *strict_chunked,
                json: *json,
            };
            commands::send::cmd_send(cli, &mut config, &request)
        },
        Commands::Reset { json } => commands::reset::cmd_reset(cli, &mut config, *json),
        Commands::SoftReset { json } => commands::reset::cmd_soft_reset(cli, &mut config, *json),
        Commands::Completions { shell, install } => {
            if *install {
                commands::completions::cmd_completions_install(*shell)
            } else {
                let shell = shell.ok_or_else(|| {
                    CliError::Usage(
                        "specify a shell type, e.g.: portlink completions bash \
                         (or use portlink completions --install)"
                            .to_string(),
                    )
                })?;
                commands::completions::cmd_completions(shell);
                Ok(())
            }
        },
    }
}

fn main() {
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
        "portlink v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    if let Err(e) = run(&cli) {
        eprintln!("{} {e:#}", style("Error:").red().bold());
        process::exit(exit_code_for(&e));
    }
}
