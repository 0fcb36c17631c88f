//! Engine configuration.

/// What to do when a non-JSON response cannot be parsed as a chunk stream.
///
/// Devices disagree here: some always speak chunked transfer, others send
/// free-form text and simply go quiet. The policy picks which interpretation
/// wins once a chunk header or trailer turns out to be malformed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum FallbackPolicy {
    /// Stop validating and end the frame after an idle window; the outcome
    /// is `Complete`.
    #[default]
    IdleSilence,
    /// Keep treating the stream as chunked; a malformed stream can only end
    /// in `TimedOut`.
    StrictChunked,
}

impl FallbackPolicy {
    /// Parse a policy name as used in config files and on the command line.
    pub fn from_name(name: &str) -> Option<Self> {
        match name
            .trim()
            .to_ascii_lowercase()
            .as_str()
        {
            "idle-silence" | "idle" | "silence" => Some(Self::IdleSilence),
            "strict-chunked" | "strict" | "chunked" => Some(Self::StrictChunked),
            _ => None,
        }
    }

    /// Canonical name.
    pub fn name(self) -> &'static str {
        match self {
            Self::IdleSilence => "idle-silence",
            Self::StrictChunked => "strict-chunked",
        }
    }
}

impl std::fmt::Display for FallbackPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Transaction engine configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct EngineConfig {
    /// Fallback for non-JSON responses whose chunk framing is malformed.
    pub fallback: FallbackPolicy,
    /// Discard stale inbound bytes before each command is written.
    pub flush_before_write: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fallback: FallbackPolicy::default(),
            flush_before_write: true,
        }
    }
}

impl EngineConfig {
    /// Set the chunk fallback policy.
    #[must_use]
    pub fn with_fallback(mut self, fallback: FallbackPolicy) -> Self {
        self.fallback = fallback;
        self
    }

    /// Enable or disable the idle flush before each write.
    #[must_use]
    pub fn with_flush_before_write(mut self, flush: bool) -> Self {
        self.flush_before_write = flush;
        self
    }
}
