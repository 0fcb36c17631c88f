//! Transaction engine.
//!
//! The engine owns its transport for its whole lifetime. Every operation takes
//! `&mut self`, so a single owner can never interleave two transactions; for
//! callers on several threads [`SharedEngine`] holds a lock for the full
//! duration of each transaction.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use portlink::{Engine, NativePort, SerialConfig, TransactionOutcome};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let port = NativePort::open(&SerialConfig::new("/dev/ttyUSB0", 115200))?;
//!     let mut engine = Engine::new(port);
//!
//!     let tx = engine.transact(
//!         b"{\"device\":[{\"command\":\"enumerate\"}]}",
//!         Duration::from_millis(500),
//!         Duration::from_millis(100),
//!     );
//!     if let TransactionOutcome::Complete(bytes) = tx.outcome {
//!         println!("{}", String::from_utf8_lossy(&bytes));
//!     }
//!     Ok(())
//! }
//! ```

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError, TryLockError};
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::framing::FrameDetector;
use crate::port::Transport;
use crate::reset::{self, ResetOutcome};
use crate::transaction::{self, Transaction};

/// Notification emitted by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// A framed transaction finished; carries the response bytes.
    ResponseReady(Vec<u8>),
    /// A soft reset finished; carries whether it succeeded.
    ResetComplete(bool),
}

/// Write-then-read engine over an exclusively owned transport.
pub struct Engine<T: Transport> {
    transport: T,
    config: EngineConfig,
    observers: Vec<Sender<EngineEvent>>,
}

impl<T: Transport> Engine<T> {
    /// Create an engine with the default configuration.
    pub fn new(transport: T) -> Self {
        Self::with_config(transport, EngineConfig::default())
    }

    /// Create an engine with a custom configuration.
    pub fn with_config(transport: T, config: EngineConfig) -> Self {
        Self {
            transport,
            config,
            observers: Vec::new(),
        }
    }

    /// Get the engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Replace the engine configuration.
    pub fn set_config(&mut self, config: EngineConfig) {
        self.config = config;
    }

    /// Get a reference to the underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Get a mutable reference to the underlying transport.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Consume the engine and return the underlying transport.
    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Register for notifications. Dropping the receiver unsubscribes.
    pub fn subscribe(&mut self) -> Receiver<EngineEvent> {
        let (tx, rx) = mpsc::channel();
        self.observers
            .push(tx);
        rx
    }

    fn notify(&mut self, event: &EngineEvent) {
        self.observers
            .retain(|tx| {
                tx.send(event.clone())
                    .is_ok()
            });
    }

    /// Discard any bytes waiting on the input side.
    pub fn flush_input(&mut self) -> Result<usize> {
        transaction::flush_input(&mut self.transport)
    }

    /// Send `command` and read one framed response.
    ///
    /// Waits up to `delay` for the first response byte and up to `timeout`
    /// between subsequent bytes. A JSON object or a chunked transfer returns
    /// as soon as it is complete.
    pub fn transact(&mut self, command: &[u8], delay: Duration, timeout: Duration) -> Transaction {
        let start = Instant::now();
        debug!(
            "transact: {} byte command, delay {} ms, timeout {} ms",
            command.len(),
            delay.as_millis(),
            timeout.as_millis()
        );

        let (flushed, bytes_written) = match self.send(command) {
            Ok(sent) => sent,
            Err(e) => {
                warn!("Transaction aborted before read: {e}");
                let tx = Transaction::failed(e, command.len(), start.elapsed());
                self.notify(&EngineEvent::ResponseReady(Vec::new()));
                return tx;
            },
        };

        let frame = FrameDetector::new(self.config.fallback).run(&mut self.transport, delay, timeout);
        let tx = Transaction {
            outcome: frame.outcome,
            framing: frame.framing,
            command_len: command.len(),
            bytes_written,
            flushed,
            noise: frame.noise,
            surplus: frame.surplus,
            elapsed: start.elapsed(),
        };
        debug!(
            "transact: {} ({} bytes, {} framing) in {} ms",
            tx.outcome
                .kind(),
            tx.response()
                .len(),
            tx.framing
                .name(),
            tx.elapsed
                .as_millis()
        );

        self.notify(&EngineEvent::ResponseReady(
            tx.response()
                .to_vec(),
        ));
        tx
    }

    /// Send `command` and read until the line has been quiet for `timeout`.
    ///
    /// No content inspection. Returns an empty buffer if nothing arrives
    /// within `delay`.
    pub fn plain_transact(
        &mut self,
        command: &[u8],
        delay: Duration,
        timeout: Duration,
    ) -> Result<Vec<u8>> {
        self.send(command)?;
        transaction::read_until_idle(&mut self.transport, delay, timeout)
    }

    /// `plain_transact` using `timeout` for both the first byte and the gaps.
    pub fn write_read(&mut self, command: &[u8], timeout: Duration) -> Result<Vec<u8>> {
        self.plain_transact(command, timeout, timeout)
    }

    /// Flush (if configured) and write the command.
    ///
    /// A short write is logged but does not stop the read phase.
    fn send(&mut self, command: &[u8]) -> Result<(usize, usize)> {
        if !self
            .transport
            .is_open()
        {
            return Err(Error::NotOpen);
        }
        let flushed = if self
            .config
            .flush_before_write
        {
            transaction::flush_input(&mut self.transport)?
        } else {
            0
        };

        let written = self
            .transport
            .write_bytes(command)?;
        if written < command.len() {
            warn!(
                "Short write: {written} of {} bytes accepted",
                command.len()
            );
        }
        Ok((flushed, written))
    }

    /// Pulse RTS/DTR to reset the attached device.
    pub fn assert_reset(&mut self) -> ResetOutcome {
        reset::assert_reset(&mut self.transport)
    }

    /// Close and reopen the transport with the same port and baud rate.
    pub fn soft_reset(&mut self) -> Result<()> {
        let result = reset::soft_reset(&mut self.transport);
        self.notify(&EngineEvent::ResetComplete(result.is_ok()));
        result
    }
}

/// An [`Engine`] shared between threads.
///
/// The lock is held for the whole transaction, so concurrent callers are
/// serialized rather than interleaved.
pub struct SharedEngine<T: Transport> {
    inner: Arc<Mutex<Engine<T>>>,
}

impl<T: Transport> Clone for SharedEngine<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Transport> SharedEngine<T> {
    /// Wrap an engine for shared use.
    pub fn new(engine: Engine<T>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(engine)),
        }
    }

    /// Run `f` with exclusive access, waiting for any transaction in flight.
    pub fn with<R>(&self, f: impl FnOnce(&mut Engine<T>) -> R) -> R {
        let mut engine = self
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        f(&mut engine)
    }

    /// Run `f` with exclusive access, or fail with [`Error::Busy`] if a
    /// transaction is already in flight.
    pub fn try_with<R>(&self, f: impl FnOnce(&mut Engine<T>) -> R) -> Result<R> {
        let mut engine = match self
            .inner
            .try_lock()
        {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return Err(Error::Busy),
        };
        Ok(f(&mut engine))
    }

    /// Queue behind any transaction in flight, then transact.
    pub fn transact(&self, command: &[u8], delay: Duration, timeout: Duration) -> Transaction {
        self.with(|engine| engine.transact(command, delay, timeout))
    }

    /// Transact, rejecting the call if another transaction is in flight.
    pub fn try_transact(
        &self,
        command: &[u8],
        delay: Duration,
        timeout: Duration,
    ) -> Result<Transaction> {
        self.try_with(|engine| engine.transact(command, delay, timeout))
    }

    /// Register for notifications.
    pub fn subscribe(&self) -> Receiver<EngineEvent> {
        self.with(Engine::subscribe)
    }
}
