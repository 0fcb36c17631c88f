//! Command implementations.
//!
//! Each subcommand is implemented in its own module for clean separation.

pub(crate) mod completions;
pub(crate) mod ports;
pub(crate) mod reset;
pub(crate) mod send;

use anyhow::{Context, Result};
use console::style;
use log::debug;
use portlink::{Engine, EngineConfig, NativePort, SerialConfig};

use crate::Cli;
use crate::config::Config;

/// Resolve the port and open an engine on it.
pub(crate) fn open_engine(
    cli: &Cli,
    config: &mut Config,
    engine_config: EngineConfig,
) -> Result<Engine<NativePort>> {
    let port = crate::get_port(cli, config)?;
    let baud = cli.baud_rate(config);

    if !cli.quiet {
        eprintln!(
            "{} Using port {} at {} baud",
            style("🔌").cyan(),
            style(&port).green(),
            baud
        );
    }

    let transport = NativePort::open(&SerialConfig::new(port.as_str(), baud))
        .with_context(|| format!("Failed to open serial port {port}"))?;
    debug!("Opened {port} at {baud} baud");
    Ok(Engine::with_config(transport, engine_config))
}
