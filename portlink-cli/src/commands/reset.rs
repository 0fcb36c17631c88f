//! Reset and soft-reset command implementations.

use anyhow::{Context, Result};
use console::style;
use portlink::{EngineConfig, ResetOutcome, Transport};

use crate::Cli;
use crate::config::Config;

fn reset_json(port: &str, outcome: ResetOutcome) -> serde_json::Value {
    let stage = match outcome {
        ResetOutcome::Success => None,
        ResetOutcome::Failure(stage) => Some(stage.to_string()),
    };
    serde_json::json!({
        "ok": outcome.is_success(),
        "data": {
            "port": port,
            "failed_stage": stage,
        }
    })
}

/// Reset command implementation.
pub(crate) fn cmd_reset(cli: &Cli, config: &mut Config, json: bool) -> Result<()> {
    let mut engine = super::open_engine(cli, config, EngineConfig::default())?;
    let port = engine
        .transport()
        .name()
        .to_string();

    if !cli.quiet && !json {
        eprintln!("{} Resetting device on {port}", style("🔄").cyan());
    }
    let outcome = engine.assert_reset();

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&reset_json(&port, outcome))?
        );
    }

    match outcome {
        ResetOutcome::Success => {
            if !cli.quiet && !json {
                eprintln!("{} Reset complete", style("✓").green());
            }
            Ok(())
        },
        ResetOutcome::Failure(stage) => anyhow::bail!("Reset failed at step: {stage}"),
    }
}

/// Soft-reset command implementation.
pub(crate) fn cmd_soft_reset(cli: &Cli, config: &mut Config, json: bool) -> Result<()> {
    let mut engine = super::open_engine(cli, config, EngineConfig::default())?;
    let port = engine
        .transport()
        .name()
        .to_string();
    let baud = engine
        .transport()
        .baud_rate();

    let result = engine.soft_reset();

    if json {
        let output = serde_json::json!({
            "ok": result.is_ok(),
            "data": {
                "port": port,
                "baud": baud,
            }
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    }

    result.with_context(|| format!("Failed to reopen {port}"))?;
    if !cli.quiet && !json {
        eprintln!(
            "{} Reopened {} at {} baud",
            style("✓").green(),
            style(&port).green(),
            baud
        );
    }
    Ok(())
}
