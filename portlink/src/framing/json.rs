//! Brace-depth tracking for JSON object responses.
//!
//! A response whose first byte is `{` is complete once every `{` has been
//! matched by a `}`. Braces inside string literals are counted like any other
//! brace: there is no string-literal awareness.

/// Opening brace.
pub const OPEN: u8 = b'{';
/// Closing brace.
pub const CLOSE: u8 = b'}';

/// Running count of unmatched `{`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BraceDepth {
    depth: usize,
}

impl BraceDepth {
    /// Fresh tracker, no bytes seen.
    pub fn new() -> Self {
        Self::default()
    }

    /// Unmatched open braces so far.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Feed one byte. Returns `true` when this byte closes the outermost
    /// object.
    pub fn feed(&mut self, byte: u8) -> bool {
        match byte {
            OPEN => {
                self.depth += 1;
                false
            },
            CLOSE => {
                self.depth = self
                    .depth
                    .saturating_sub(1);
                self.depth == 0
            },
            _ => false,
        }
    }

    /// Feed a slice and return the length of the complete object, if the
    /// object closes inside `bytes`.
    pub fn feed_slice(&mut self, bytes: &[u8]) -> Option<usize> {
        bytes
            .iter()
            .position(|&b| self.feed(b))
            .map(|i| i + 1)
    }
}
