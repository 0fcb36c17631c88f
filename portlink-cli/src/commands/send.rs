//! Send command implementation.

use anyhow::{Context, Result};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use portlink::{
    EngineConfig, FallbackPolicy, Framing, Transaction, TransactionOutcome, decode_chunked,
};
use std::fmt::Write as _;
use std::time::{Duration, Instant};

use crate::config::Config;
use crate::{Cli, CliError, use_fancy_output};

/// Parsed `send` arguments.
pub(crate) struct SendRequest<'a> {
    pub(crate) data: &'a str,
    pub(crate) delay: Option<u64>,
    pub(crate) timeout: Option<u64>,
    pub(crate) plain: bool,
    pub(crate) hex: bool,
    pub(crate) newline: bool,
    pub(crate) strict_chunked: bool,
    pub(crate) json: bool,
}

/// Parse hex bytes such as `7B7D`, `7b 7d` or `0x7B,0x7D`.
pub(crate) fn parse_hex_bytes(s: &str) -> Result<Vec<u8>, String> {
    let mut bytes = Vec::new();
    for token in s.split(|c: char| c.is_whitespace() || c == ',') {
        let token = token
            .trim_start_matches("0x")
            .trim_start_matches("0X");
        if token.is_empty() {
            continue;
        }
        if token.len() % 2 != 0 {
            return Err(format!("Invalid hex '{token}': odd number of digits"));
        }
        for pair in token
            .as_bytes()
            .chunks(2)
        {
            let text = std::str::from_utf8(pair).map_err(|e| format!("Invalid hex: {e}"))?;
            let byte = u8::from_str_radix(text, 16).map_err(|e| format!("Invalid hex '{text}': {e}"))?;
            bytes.push(byte);
        }
    }
    if bytes.is_empty() {
        return Err("No bytes to send".to_string());
    }
    Ok(bytes)
}

/// Build the bytes written to the port.
fn encode_command(request: &SendRequest<'_>) -> Result<Vec<u8>> {
    let mut command = if request.hex {
        parse_hex_bytes(request.data).map_err(CliError::Usage)?
    } else {
        request
            .data
            .as_bytes()
            .to_vec()
    };
    if request.newline {
        command.extend_from_slice(b"\r\n");
    }
    Ok(command)
}

/// Space-separated hex dump, 16 bytes per line.
pub(crate) fn hex_dump(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for (i, line) in bytes
        .chunks(16)
        .enumerate()
    {
        if i > 0 {
            out.push('\n');
        }
        for (j, b) in line
            .iter()
            .enumerate()
        {
            if j > 0 {
                out.push(' ');
            }
            let _ = write!(out, "{b:02X}");
        }
    }
    out
}

/// Human-readable form of a response.
///
/// JSON frames are pretty-printed, complete chunked frames are decoded to
/// their payload, anything else is shown as lossy text.
pub(crate) fn render_response(bytes: &[u8], framing: Framing, complete: bool, hex: bool) -> String {
    if hex {
        return hex_dump(bytes);
    }
    match framing {
        Framing::JsonObject if complete => serde_json::from_slice::<serde_json::Value>(bytes)
            .ok()
            .and_then(|v| serde_json::to_string_pretty(&v).ok())
            .unwrap_or_else(|| {
                String::from_utf8_lossy(bytes)
                    .into_owned()
            }),
        Framing::Chunked if complete => decode_chunked(bytes).map_or_else(
            |_| {
                String::from_utf8_lossy(bytes)
                    .into_owned()
            },
            |payload| {
                String::from_utf8_lossy(&payload)
                    .into_owned()
            },
        ),
        _ => String::from_utf8_lossy(bytes)
            .into_owned(),
    }
}

/// JSON envelope for a framed transaction.
fn transaction_json(tx: &Transaction) -> serde_json::Value {
    let bytes = tx.response();
    let complete = tx
        .outcome
        .is_complete();
    let parsed = if complete && tx.framing == Framing::JsonObject {
        serde_json::from_slice::<serde_json::Value>(bytes).ok()
    } else {
        None
    };
    let payload = if complete && tx.framing == Framing::Chunked {
        decode_chunked(bytes)
            .ok()
            .map(|p| {
                String::from_utf8_lossy(&p)
                    .into_owned()
            })
    } else {
        None
    };
    let error = match &tx.outcome {
        TransactionOutcome::TransportError { error, .. } => Some(error.to_string()),
        _ => None,
    };

    serde_json::json!({
        "ok": complete,
        "data": {
            "outcome": tx.outcome.kind(),
            "framing": tx.framing.name(),
            "response": String::from_utf8_lossy(bytes),
            "response_hex": hex_dump(bytes),
            "json": parsed,
            "payload": payload,
            "error": error,
            "command_len": tx.command_len,
            "bytes_written": tx.bytes_written,
            "flushed": tx.flushed,
            "trimmed": tx.noise.len(),
            "noise_hex": hex_dump(&tx.noise),
            "surplus_hex": hex_dump(&tx.surplus),
            "elapsed_ms": u64::try_from(tx.elapsed.as_millis()).unwrap_or(u64::MAX),
        }
    })
}

fn waiting_spinner(cli: &Cli, json: bool) -> ProgressBar {
    if cli.quiet || json || !use_fancy_output() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new_spinner();
    if let Ok(spinner) = ProgressStyle::default_spinner().template("{spinner:.green} {msg} [{elapsed}]") {
        pb.set_style(spinner);
    }
    pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
    pb.set_message("Waiting for response");
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

/// Send command implementation.
pub(crate) fn cmd_send(cli: &Cli, config: &mut Config, request: &SendRequest<'_>) -> Result<()> {
    let command = encode_command(request)?;
    let delay = request
        .delay
        .map_or_else(|| config.delay(), Duration::from_millis);
    let timeout = request
        .timeout
        .map_or_else(|| config.timeout(), Duration::from_millis);
    let fallback = if request.strict_chunked {
        FallbackPolicy::StrictChunked
    } else {
        config.fallback()
    };

    let mut engine = super::open_engine(cli, config, EngineConfig::default().with_fallback(fallback))?;

    if request.plain {
        return send_plain(cli, &mut engine, &command, delay, timeout, request);
    }

    let pb = waiting_spinner(cli, request.json);
    let tx = engine.transact(&command, delay, timeout);
    pb.finish_and_clear();

    if request.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&transaction_json(&tx))?
        );
    } else if !tx
        .response()
        .is_empty()
    {
        println!(
            "{}",
            render_response(
                tx.response(),
                tx.framing,
                tx.outcome
                    .is_complete(),
                request.hex
            )
        );
    }

    let failed = matches!(tx.outcome, TransactionOutcome::TransportError { .. });
    if tx.is_short_write() && !failed && !cli.quiet {
        eprintln!(
            "{} Only {} of {} command bytes were written",
            style("⚠").yellow(),
            tx.bytes_written,
            tx.command_len
        );
    }

    match tx.outcome {
        TransactionOutcome::Complete(_) => {
            if !cli.quiet && !request.json {
                eprintln!(
                    "{} {} response complete in {} ms",
                    style("✓").green(),
                    tx.framing
                        .name(),
                    tx.elapsed
                        .as_millis()
                );
            }
            Ok(())
        },
        TransactionOutcome::NoResponse => Err(CliError::NoResponse(format!(
            "No response within {} ms",
            delay.as_millis()
        ))
        .into()),
        TransactionOutcome::TimedOut(bytes) => Err(CliError::TimedOut(format!(
            "Response incomplete after {} bytes ({} ms without data)",
            bytes.len(),
            timeout.as_millis()
        ))
        .into()),
        TransactionOutcome::TransportError { error, partial } => Err(anyhow::Error::new(error)
            .context(format!("Transaction failed after {} response bytes", partial.len()))),
    }
}

/// `send --plain`: read until the line is quiet, no framing.
fn send_plain(
    cli: &Cli,
    engine: &mut portlink::Engine<portlink::NativePort>,
    command: &[u8],
    delay: Duration,
    timeout: Duration,
    request: &SendRequest<'_>,
) -> Result<()> {
    let pb = waiting_spinner(cli, request.json);
    let start = Instant::now();
    let response = engine
        .plain_transact(command, delay, timeout)
        .context("Plain transaction failed");
    pb.finish_and_clear();
    let response = response?;

    if request.json {
        let outcome = if response.is_empty() {
            "no-response"
        } else {
            "complete"
        };
        let output = serde_json::json!({
            "ok": !response.is_empty(),
            "data": {
                "outcome": outcome,
                "framing": Framing::IdleSilence.name(),
                "response": String::from_utf8_lossy(&response),
                "response_hex": hex_dump(&response),
                "elapsed_ms": u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
            }
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else if !response.is_empty() {
        println!(
            "{}",
            render_response(&response, Framing::IdleSilence, true, request.hex)
        );
    }

    if response.is_empty() {
        return Err(CliError::NoResponse(format!(
            "No response within {} ms",
            delay.as_millis()
        ))
        .into());
    }
    Ok(())
}
