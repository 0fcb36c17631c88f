//! Serial port selection.
//!
//! Resolution order:
//! - an explicit `--port` / `PORTLINK_PORT`
//! - the port stored in the configuration
//! - the only enumerated port
//! - an interactive prompt (never in non-interactive mode or without a TTY)

use {
    crate::{CliError, config::Config},
    anyhow::Result,
    console::style,
    dialoguer::{Confirm, Error as DialoguerError, Select, theme::ColorfulTheme},
    log::{debug, error, info, warn},
    portlink::{NativePortEnumerator, PortEnumerator, PortInfo},
    std::io::IsTerminal,
};

/// Options for serial port selection.
#[derive(Debug, Clone, Default)]
pub struct SerialOptions {
    /// Explicit port specified via CLI.
    pub port: Option<String>,
    /// Non-interactive mode (fail instead of prompting).
    pub non_interactive: bool,
}

/// Result of port selection.
#[derive(Debug)]
pub struct SelectedPort {
    /// Port name/path.
    pub name: String,
    /// Whether the user picked it from a prompt.
    pub prompted: bool,
}

fn usage_err(message: &str) -> anyhow::Error {
    CliError::Usage(message.to_string()).into()
}

/// Select a serial port from options, configuration, or the system.
pub fn select_serial_port(options: &SerialOptions, config: &Config) -> Result<SelectedPort> {
    if let Some(name) = &options.port {
        debug!("Using port from command line: {name}");
        return Ok(SelectedPort {
            name: name.clone(),
            prompted: false,
        });
    }

    if let Some(name) = &config
        .connection
        .serial
    {
        debug!("Using port from config: {name}");
        return Ok(SelectedPort {
            name: name.clone(),
            prompted: false,
        });
    }

    let ports = NativePortEnumerator::list_ports().unwrap_or_else(|e| {
        warn!("Failed to enumerate serial ports: {e}");
        Vec::new()
    });
    choose_port(ports, options.non_interactive)
}

/// Pick one of the enumerated ports.
fn choose_port(ports: Vec<PortInfo>, non_interactive: bool) -> Result<SelectedPort> {
    match ports.len() {
        0 => Err(usage_err(
            "No serial ports found. Connect a device or pass --port",
        )),
        1 => {
            let mut ports = ports;
            let port = ports.remove(0);
            info!("Auto-selected port: {}", port.name);
            Ok(SelectedPort {
                name: port.name,
                prompted: false,
            })
        },
        _ if non_interactive => Err(usage_err(
            "Multiple serial ports found; specify one with --port",
        )),
        _ => {
            ensure_interactive_terminal()?;
            select_port_interactive(ports)
        },
    }
}

fn ensure_interactive_terminal() -> Result<()> {
    if std::io::stdin().is_terminal() && std::io::stderr().is_terminal() {
        Ok(())
    } else {
        Err(usage_err(
            "Port selection needs an interactive terminal; pass --port instead",
        ))
    }
}

fn map_prompt_error(err: DialoguerError) -> anyhow::Error {
    match err {
        DialoguerError::IO(io_err) => {
            if io_err.kind() == std::io::ErrorKind::Interrupted {
                CliError::Cancelled("Port selection cancelled".to_string()).into()
            } else {
                usage_err("Port selection prompt failed")
            }
        },
    }
}

/// One-line description of a port for listings and prompts.
pub fn port_label(port: &PortInfo) -> String {
    let vid_pid = if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
        format!(" ({vid:04X}:{pid:04X})")
    } else {
        String::new()
    };
    let product = port
        .product
        .as_ref()
        .map(|p| format!(" - {p}"))
        .unwrap_or_default();
    format!("{}{vid_pid}{product}", port.name)
}

/// Interactive port selection.
fn select_port_interactive(ports: Vec<PortInfo>) -> Result<SelectedPort> {
    eprintln!(
        "{} Found {} serial ports",
        style("ℹ").blue(),
        ports.len()
    );

    // Truncate labels to fit terminal width to prevent wrapping in narrow
    // terminals.
    let term_width = console::Term::stderr()
        .size()
        .1 as usize;
    let max_item_width = term_width.saturating_sub(4);
    let labels: Vec<String> = ports
        .iter()
        .map(|p| console::truncate_str(&port_label(p), max_item_width, "\u{2026}").into_owned())
        .collect();

    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Select a serial port")
        .items(&labels)
        .default(0)
        .interact_opt()
        .map_err(map_prompt_error)?;

    match selection {
        Some(index) => {
            let port = ports
                .into_iter()
                .nth(index)
                .ok_or_else(|| anyhow::anyhow!("Invalid port index: {index}"))?;
            Ok(SelectedPort {
                name: port.name,
                prompted: true,
            })
        },
        None => Err(CliError::Cancelled("Port selection cancelled".to_string()).into()),
    }
}

/// Ask user if they want to remember this port.
pub fn ask_remember_port(port: &str, config: &mut Config) -> Result<()> {
    let confirmed = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(format!("Remember {port} for this directory?"))
        .default(false)
        .interact_opt()
        .map_err(map_prompt_error)?
        .unwrap_or(false);

    if confirmed {
        if let Err(e) = config.remember_port(port) {
            error!("Failed to save port configuration: {e}");
        }
    }

    Ok(())
}
