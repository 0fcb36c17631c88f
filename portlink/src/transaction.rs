//! Transaction outcomes and the framing-independent read helpers.

use std::time::Duration;

use log::{debug, trace};

use crate::error::{Error, Result};
use crate::framing::Framing;
use crate::port::Transport;

/// How a transaction ended.
///
/// Every variant that saw bytes carries them; nothing accumulated is ever
/// dropped.
#[derive(Debug)]
pub enum TransactionOutcome {
    /// A complete frame.
    Complete(Vec<u8>),
    /// The line went quiet before the frame completed.
    TimedOut(Vec<u8>),
    /// Nothing arrived within the initial delay.
    NoResponse,
    /// The port was not open or an I/O operation failed.
    TransportError {
        /// Underlying failure.
        error: Error,
        /// Bytes read before the failure.
        partial: Vec<u8>,
    },
}

impl TransactionOutcome {
    /// Whether the response completed.
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete(_))
    }

    /// Bytes accumulated, complete or not.
    pub fn bytes(&self) -> &[u8] {
        match self {
            Self::Complete(bytes) | Self::TimedOut(bytes) => bytes,
            Self::TransportError { partial, .. } => partial,
            Self::NoResponse => &[],
        }
    }

    /// Consume the outcome, keeping its bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Self::Complete(bytes) | Self::TimedOut(bytes) => bytes,
            Self::TransportError { partial, .. } => partial,
            Self::NoResponse => Vec::new(),
        }
    }

    /// Short lowercase name of the variant.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Complete(_) => "complete",
            Self::TimedOut(_) => "timed-out",
            Self::NoResponse => "no-response",
            Self::TransportError { .. } => "transport-error",
        }
    }

    /// Convert into a `Result`, treating only `TransportError` as an error.
    pub fn into_result(self) -> Result<Self> {
        match self {
            Self::TransportError { error, .. } => Err(error),
            other => Ok(other),
        }
    }
}

/// Report of one write-then-read round trip.
#[derive(Debug)]
pub struct Transaction {
    /// How the response ended.
    pub outcome: TransactionOutcome,
    /// Framing style that bounded the response.
    pub framing: Framing,
    /// Length of the command.
    pub command_len: usize,
    /// Bytes the transport accepted.
    pub bytes_written: usize,
    /// Stale bytes discarded before writing.
    pub flushed: usize,
    /// Line noise dropped ahead of a complete chunked response.
    pub noise: Vec<u8>,
    /// Bytes that arrived in the final burst after the frame ended.
    pub surplus: Vec<u8>,
    /// Wall-clock duration of the whole transaction.
    pub elapsed: Duration,
}

impl Transaction {
    /// A transaction that never reached the read phase.
    pub(crate) fn failed(error: Error, command_len: usize, elapsed: Duration) -> Self {
        Self {
            outcome: TransactionOutcome::TransportError {
                error,
                partial: Vec::new(),
            },
            framing: Framing::Unclassified,
            command_len,
            bytes_written: 0,
            flushed: 0,
            noise: Vec::new(),
            surplus: Vec::new(),
            elapsed,
        }
    }

    /// The transport accepted fewer bytes than the command holds.
    pub fn is_short_write(&self) -> bool {
        self.bytes_written < self.command_len
    }

    /// Response bytes.
    pub fn response(&self) -> &[u8] {
        self.outcome
            .bytes()
    }
}

/// Discard everything currently buffered on the input side.
///
/// A single non-blocking drain: bytes that arrive afterwards are left alone.
pub fn flush_input<T: Transport + ?Sized>(transport: &mut T) -> Result<usize> {
    if !transport.is_open() {
        return Err(Error::NotOpen);
    }
    let stale = transport.read_all()?;
    if !stale.is_empty() {
        debug!("Flushed {} stale bytes", stale.len());
        trace!("Flushed: {:02X?}", stale);
    }
    Ok(stale.len())
}

/// Read until the line has been quiet for `timeout`.
///
/// Waits up to `delay` for the first byte and returns an empty buffer if none
/// arrives. No content inspection.
pub fn read_until_idle<T: Transport + ?Sized>(
    transport: &mut T,
    delay: Duration,
    timeout: Duration,
) -> Result<Vec<u8>> {
    let mut response = Vec::new();
    if !transport.wait_for_data(delay)? {
        debug!("No response within {} ms", delay.as_millis());
        return Ok(response);
    }

    response.extend(transport.read_all()?);
    while transport.wait_for_data(timeout)? {
        response.extend(transport.read_all()?);
    }
    debug!(
        "Line idle for {} ms after {} bytes",
        timeout.as_millis(),
        response.len()
    );
    Ok(response)
}
