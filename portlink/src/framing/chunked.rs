//! Chunked-transfer detection.
//!
//! ```text
//! +------------+------+-----------+------+ ... +---+------+------+
//! | size (hex) | CRLF |   data    | CRLF |     | 0 | CRLF | CRLF |
//! +------------+------+-----------+------+ ... +---+------+------+
//! ```
//!
//! The stream is complete once a zero-size chunk and its terminator have
//! arrived. Anything before the first hex digit is transport noise.

use log::trace;

use crate::error::{Error, Result};

/// Chunk header / trailer terminator.
pub const CRLF: &[u8; 2] = b"\r\n";

/// Result of scanning a buffer for a complete chunk stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkStatus {
    /// More bytes are needed.
    Incomplete,
    /// The terminal chunk ends at this offset (exclusive).
    Complete(usize),
    /// A header or trailer is present but invalid.
    Malformed,
}

/// Remove leading bytes that cannot start a chunk-size header.
///
/// Returns the removed bytes.
pub fn trim_leading_noise(buf: &mut Vec<u8>) -> Vec<u8> {
    let noise = buf
        .iter()
        .position(u8::is_ascii_hexdigit)
        .unwrap_or(buf.len());
    if noise > 0 {
        trace!("Trimming {noise} noise bytes: {:02X?}", &buf[..noise]);
    }
    buf.drain(..noise)
        .collect()
}

/// Position of the first CRLF in `data`.
pub fn find_crlf(data: &[u8]) -> Option<usize> {
    data.windows(2)
        .position(|w| w == CRLF)
}

/// Parse a chunk-size header (without its CRLF).
pub fn parse_chunk_size(header: &[u8]) -> Option<usize> {
    if header.is_empty() || !header
        .iter()
        .all(u8::is_ascii_hexdigit)
    {
        return None;
    }
    let text = std::str::from_utf8(header).ok()?;
    usize::from_str_radix(text, 16).ok()
}

/// Incremental validator for a chunk stream.
///
/// The cursor only moves past chunks that have been fully validated, so a
/// re-scan after new bytes arrive never re-parses finished chunks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChunkScanner {
    cursor: usize,
    chunks: usize,
}

impl ChunkScanner {
    /// Scanner positioned at the start of the buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Offset of the next unparsed chunk header.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Number of data chunks validated so far.
    pub fn chunks(&self) -> usize {
        self.chunks
    }

    /// Scan `buf` from the cursor.
    pub fn scan(&mut self, buf: &[u8]) -> ChunkStatus {
        loop {
            let rest = &buf[self.cursor.min(buf.len())..];
            let Some(header_len) = find_crlf(rest) else {
                return ChunkStatus::Incomplete;
            };
            let Some(size) = parse_chunk_size(&rest[..header_len]) else {
                return ChunkStatus::Malformed;
            };

            let data_start = header_len + CRLF.len();
            let Some(chunk_len) = data_start
                .checked_add(size)
                .and_then(|n| n.checked_add(CRLF.len()))
            else {
                return ChunkStatus::Malformed;
            };
            if rest.len() < chunk_len {
                return ChunkStatus::Incomplete;
            }
            if &rest[data_start + size..chunk_len] != CRLF {
                return ChunkStatus::Malformed;
            }

            if size == 0 {
                return ChunkStatus::Complete(self.cursor + chunk_len);
            }
            trace!("Valid {size} byte chunk at offset {}", self.cursor);
            self.cursor += chunk_len;
            self.chunks += 1;
        }
    }
}

/// Reassemble the payload carried by a complete chunk stream.
///
/// Leading noise is skipped; bytes after the terminal chunk are ignored.
pub fn decode_chunked(data: &[u8]) -> Result<Vec<u8>> {
    let start = data
        .iter()
        .position(u8::is_ascii_hexdigit)
        .ok_or_else(|| Error::InvalidChunk("no chunk header".into()))?;
    let mut rest = &data[start..];
    let mut payload = Vec::new();

    loop {
        let header_len = find_crlf(rest)
            .ok_or_else(|| Error::InvalidChunk("unterminated chunk header".into()))?;
        let size = parse_chunk_size(&rest[..header_len]).ok_or_else(|| {
            Error::InvalidChunk(format!(
                "bad chunk size {:?}",
                String::from_utf8_lossy(&rest[..header_len])
            ))
        })?;
        let data_start = header_len + CRLF.len();
        let data_end = data_start
            .checked_add(size)
            .filter(|&end| end + CRLF.len() <= rest.len())
            .ok_or_else(|| Error::InvalidChunk(format!("truncated {size} byte chunk")))?;
        if &rest[data_end..data_end + CRLF.len()] != CRLF {
            return Err(Error::InvalidChunk(format!(
                "{size} byte chunk not followed by CRLF"
            )));
        }
        if size == 0 {
            return Ok(payload);
        }
        payload.extend_from_slice(&rest[data_start..data_end]);
        rest = &rest[data_end + CRLF.len()..];
    }
}
