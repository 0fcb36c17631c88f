//! Error types for portlink.

use std::io;
use thiserror::Error;

/// Result type for portlink operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for portlink operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error on the underlying link.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// The transport is not open.
    #[error("Port is not open")]
    NotOpen,

    /// Another transaction currently holds the transport.
    #[error("Transport busy: a transaction is already in flight")]
    Busy,

    /// A chunked response could not be decoded.
    #[error("Invalid chunked data: {0}")]
    InvalidChunk(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}
