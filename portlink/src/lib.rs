//! # portlink
//!
//! Write-then-read transactions with line-oriented devices over a serial
//! link.
//!
//! A device answers each command with either a JSON object or a chunked
//! transfer, and never says how long its answer is. This crate decides when
//! the answer is complete:
//!
//! - JSON objects end when their braces balance
//! - chunked transfers end at the zero-size chunk, with leading line noise
//!   set aside
//! - anything else ends when the line has been quiet long enough, with every
//!   byte kept
//!
//! It also drives the RTS/DTR reset pulse and can close and reopen a link
//! in place.
//!
//! ## Features
//!
//! - `native` (default): serial port support via the `serialport` crate
//! - `serde`: serialization support for configuration and report types
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use portlink::{Engine, NativePort, SerialConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let port = NativePort::open(&SerialConfig::new("/dev/ttyUSB0", 115200))?;
//!     let mut engine = Engine::new(port);
//!
//!     if !engine.assert_reset().is_success() {
//!         eprintln!("reset failed");
//!     }
//!
//!     let tx = engine.transact(
//!         br#"{"status":{}}"#,
//!         Duration::from_millis(500),
//!         Duration::from_millis(100),
//!     );
//!     println!("{}: {}", tx.outcome.kind(), String::from_utf8_lossy(tx.response()));
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod engine;
pub mod error;
pub mod framing;
pub mod port;
pub mod reset;
pub mod transaction;

// Re-exports for convenience
#[cfg(feature = "native")]
pub use port::{NativePort, NativePortEnumerator};
pub use {
    config::{EngineConfig, FallbackPolicy},
    engine::{Engine, EngineEvent, SharedEngine},
    error::{Error, Result},
    framing::{FrameDetector, Framing, FramingState, decode_chunked},
    port::{ControlLine, PortEnumerator, PortInfo, SerialConfig, Transport},
    reset::{ResetOutcome, ResetStage},
    transaction::{Transaction, TransactionOutcome, flush_input, read_until_idle},
};
