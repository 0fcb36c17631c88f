//! Response framing.
//!
//! A device response carries no length prefix. The [`FrameDetector`] decides
//! when it is complete from the bytes themselves:
//!
//! - first byte `{`: a JSON object, complete when its braces balance
//!   ([`json`]);
//! - anything else: a chunked transfer, complete at the zero-size chunk
//!   ([`chunked`]), with leading noise trimmed;
//! - otherwise: whatever arrived before the line went quiet for `timeout`.
//!
//! Waiting for the first byte (`delay`) and between bytes (`timeout`) are
//! the only suspension points, and both are bounded.

pub mod chunked;
pub mod json;

use std::time::Duration;

use log::{debug, trace};

use crate::config::FallbackPolicy;
use crate::error::Result;
use crate::port::Transport;
use crate::transaction::TransactionOutcome;

pub use chunked::{ChunkScanner, ChunkStatus, decode_chunked};
pub use json::BraceDepth;

/// How the current response is being interpreted.
///
/// Chosen once from the first byte of the response and never changed for the
/// rest of the transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FramingState {
    /// No bytes seen yet.
    #[default]
    Unclassified,
    /// First byte was `{`.
    JsonObject(BraceDepth),
    /// First byte was not `{`.
    ChunkedOrUnknown {
        /// Chunk validation progress.
        scanner: ChunkScanner,
        /// The chunk stream was malformed and the frame now ends on silence.
        silence: bool,
    },
}

impl FramingState {
    /// Classify a response from its first byte.
    pub fn classify(first: u8) -> Self {
        if first == json::OPEN {
            Self::JsonObject(BraceDepth::new())
        } else {
            Self::ChunkedOrUnknown {
                scanner: ChunkScanner::new(),
                silence: false,
            }
        }
    }

    /// Unmatched open braces, for JSON responses.
    pub fn depth(&self) -> Option<usize> {
        match self {
            Self::JsonObject(depth) => Some(depth.depth()),
            _ => None,
        }
    }

    /// Offset of the next unparsed chunk header, for chunked responses.
    pub fn cursor(&self) -> Option<usize> {
        match self {
            Self::ChunkedOrUnknown { scanner, .. } => Some(scanner.cursor()),
            _ => None,
        }
    }

    /// The framing style this state reports.
    pub fn framing(&self) -> Framing {
        match self {
            Self::Unclassified => Framing::Unclassified,
            Self::JsonObject(_) => Framing::JsonObject,
            Self::ChunkedOrUnknown { silence: false, .. } => Framing::Chunked,
            Self::ChunkedOrUnknown { silence: true, .. } => Framing::IdleSilence,
        }
    }
}

/// Framing style that bounded a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Framing {
    /// Nothing arrived.
    Unclassified,
    /// Balanced braces.
    JsonObject,
    /// Chunked transfer.
    Chunked,
    /// A silence window.
    IdleSilence,
}

impl Framing {
    /// Short lowercase name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Unclassified => "none",
            Self::JsonObject => "json",
            Self::Chunked => "chunked",
            Self::IdleSilence => "idle",
        }
    }
}

/// A framed response together with what the detector observed.
#[derive(Debug)]
pub struct Frame {
    /// Outcome and accumulated bytes.
    pub outcome: TransactionOutcome,
    /// Framing style of the response.
    pub framing: Framing,
    /// Leading bytes dropped before the first chunk header of a
    /// `Complete` chunked frame. Empty whenever the outcome already holds
    /// them.
    pub noise: Vec<u8>,
    /// Bytes that arrived in the same burst after the frame ended.
    pub surplus: Vec<u8>,
}

enum Completion {
    NoResponse,
    Complete,
    TimedOut,
}

/// Drives a [`Transport`] until a response is complete or times out.
#[derive(Debug, Default)]
pub struct FrameDetector {
    fallback: FallbackPolicy,
    state: FramingState,
    buffer: Vec<u8>,
    noise: Vec<u8>,
    surplus: Vec<u8>,
}

impl FrameDetector {
    /// New detector using `fallback` for malformed chunk streams.
    pub fn new(fallback: FallbackPolicy) -> Self {
        Self {
            fallback,
            ..Self::default()
        }
    }

    /// Current framing state.
    pub fn state(&self) -> &FramingState {
        &self.state
    }

    /// Read one response.
    ///
    /// Waits up to `delay` for the first byte, then up to `timeout` between
    /// bytes. Every byte read is returned in the outcome, including on
    /// timeout or transport failure.
    pub fn run<T: Transport + ?Sized>(
        mut self,
        transport: &mut T,
        delay: Duration,
        timeout: Duration,
    ) -> Frame {
        let result = self.drive(transport, delay, timeout);
        if !matches!(result, Ok(Completion::Complete)) {
            restore_noise(&mut self.noise, &mut self.buffer);
        }
        let bytes = std::mem::take(&mut self.buffer);
        let outcome = match result {
            Ok(Completion::NoResponse) => TransactionOutcome::NoResponse,
            Ok(Completion::Complete) => TransactionOutcome::Complete(bytes),
            Ok(Completion::TimedOut) => TransactionOutcome::TimedOut(bytes),
            Err(error) => TransactionOutcome::TransportError {
                error,
                partial: bytes,
            },
        };
        Frame {
            outcome,
            framing: self
                .state
                .framing(),
            noise: self.noise,
            surplus: self.surplus,
        }
    }

    fn drive<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        delay: Duration,
        timeout: Duration,
    ) -> Result<Completion> {
        if !transport.wait_for_data(delay)? {
            debug!("No response within {} ms", delay.as_millis());
            return Ok(Completion::NoResponse);
        }

        self.buffer = transport.read_all()?;
        let Some(&first) = self
            .buffer
            .first()
        else {
            debug!("Data signalled but nothing readable");
            return Ok(Completion::NoResponse);
        };
        trace!("First burst: {} bytes", self.buffer.len());

        self.state = FramingState::classify(first);
        if matches!(self.state, FramingState::JsonObject(_)) {
            debug!("Response looks like JSON");
            self.read_json(transport, timeout)
        } else {
            debug!("Response is not JSON, assuming chunked");
            self.read_chunked(transport, timeout)
        }
    }

    fn read_json<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        timeout: Duration,
    ) -> Result<Completion> {
        let FramingState::JsonObject(ref mut depth) = self.state else {
            return Ok(Completion::TimedOut);
        };

        if let Some(end) = depth.feed_slice(&self.buffer) {
            self.surplus = self
                .buffer
                .split_off(end);
            debug!("JSON object complete in first burst ({end} bytes)");
            return Ok(Completion::Complete);
        }

        while transport.wait_for_data(timeout)? {
            while let Some(byte) = transport.read_one()? {
                self.buffer
                    .push(byte);
                if depth.feed(byte) {
                    debug!("JSON object complete ({} bytes)", self.buffer.len());
                    return Ok(Completion::Complete);
                }
            }
        }

        debug!(
            "Timed out with JSON depth {} after {} bytes",
            depth.depth(),
            self.buffer
                .len()
        );
        Ok(Completion::TimedOut)
    }

    fn read_chunked<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        timeout: Duration,
    ) -> Result<Completion> {
        let fallback = self.fallback;
        let FramingState::ChunkedOrUnknown {
            ref mut scanner,
            ref mut silence,
        } = self.state
        else {
            return Ok(Completion::TimedOut);
        };

        self.noise = chunked::trim_leading_noise(&mut self.buffer);
        match scanner.scan(&self.buffer) {
            ChunkStatus::Complete(end) => {
                self.surplus = self
                    .buffer
                    .split_off(end);
                debug!("Chunked transfer complete in first burst ({end} bytes)");
                return Ok(Completion::Complete);
            },
            ChunkStatus::Malformed if fallback == FallbackPolicy::IdleSilence => {
                debug!("Malformed chunk stream, falling back to idle framing");
                *silence = true;
                restore_noise(&mut self.noise, &mut self.buffer);
            },
            ChunkStatus::Malformed | ChunkStatus::Incomplete => {},
        }

        while transport.wait_for_data(timeout)? {
            if *silence {
                let burst = transport.read_all()?;
                self.buffer
                    .extend_from_slice(&burst);
                continue;
            }

            while let Some(byte) = transport.read_one()? {
                if self
                    .buffer
                    .is_empty()
                    && !byte.is_ascii_hexdigit()
                {
                    trace!("Trimming 0x{byte:02X} from start of response");
                    self.noise
                        .push(byte);
                    continue;
                }
                self.buffer
                    .push(byte);
                if byte != b'\n' {
                    continue;
                }
                match scanner.scan(&self.buffer) {
                    ChunkStatus::Complete(_) => {
                        debug!(
                            "Chunked transfer complete ({} chunks, {} bytes)",
                            scanner.chunks(),
                            self.buffer
                                .len()
                        );
                        return Ok(Completion::Complete);
                    },
                    ChunkStatus::Malformed if fallback == FallbackPolicy::IdleSilence => {
                        debug!("Malformed chunk stream, falling back to idle framing");
                        *silence = true;
                        restore_noise(&mut self.noise, &mut self.buffer);
                        break;
                    },
                    ChunkStatus::Malformed | ChunkStatus::Incomplete => {},
                }
            }
        }

        // A bad trailer is only seen once enough bytes are in, not on `\n`.
        // A reply with no hex digit at all never reaches a header.
        if !*silence && fallback == FallbackPolicy::IdleSilence {
            let headerless = self
                .buffer
                .is_empty()
                && !self
                    .noise
                    .is_empty();
            if headerless || scanner.scan(&self.buffer) == ChunkStatus::Malformed {
                debug!("No valid chunk stream, falling back to idle framing");
                *silence = true;
                restore_noise(&mut self.noise, &mut self.buffer);
            }
        }

        if *silence {
            debug!(
                "Line idle for {} ms, response complete ({} bytes)",
                timeout.as_millis(),
                self.buffer
                    .len()
            );
            Ok(Completion::Complete)
        } else {
            debug!(
                "Timed out waiting for chunked transfer after {} bytes",
                self.buffer
                    .len()
            );
            Ok(Completion::TimedOut)
        }
    }
}

/// Put trimmed noise back in front of the response.
fn restore_noise(noise: &mut Vec<u8>, buffer: &mut Vec<u8>) {
    if noise.is_empty() {
        return;
    }
    let mut restored = std::mem::take(noise);
    restored.append(buffer);
    *buffer = restored;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::mock::MockTransport;

    const DELAY: Duration = Duration::from_millis(50);
    const TIMEOUT: Duration = Duration::from_millis(100);

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn detect(port: &mut MockTransport, fallback: FallbackPolicy) -> Frame {
        port.write_bytes(b"cmd")
            .unwrap();
        FrameDetector::new(fallback).run(port, DELAY, TIMEOUT)
    }

    #[test]
    fn test_classify() {
        assert!(matches!(
            FramingState::classify(b'{'),
            FramingState::JsonObject(_)
        ));
        assert!(matches!(
            FramingState::classify(b'4'),
            FramingState::ChunkedOrUnknown { silence: false, .. }
        ));
        assert_eq!(FramingState::classify(b'{').depth(), Some(0));
        assert_eq!(FramingState::classify(0x01).cursor(), Some(0));
        assert_eq!(FramingState::default().framing(), Framing::Unclassified);
    }

    #[test]
    fn test_json_split_across_bursts() {
        let mut port = MockTransport::new()
            .then(ms(5), br#"{"ok":tr"#)
            .then(ms(20), b"ue}");
        let frame = detect(&mut port, FallbackPolicy::default());

        assert_eq!(frame.framing, Framing::JsonObject);
        match frame.outcome {
            TransactionOutcome::Complete(bytes) => assert_eq!(bytes, br#"{"ok":true}"#),
            other => panic!("expected Complete, got {other:?}"),
        }
        // Completion is immediate: no idle window after the last brace.
        assert_eq!(port.elapsed(), ms(25));
    }

    #[test]
    fn test_json_single_burst_returns_without_waiting() {
        let mut port = MockTransport::new().then(ms(3), br#"{"a":{"b":1}}"#);
        let frame = detect(&mut port, FallbackPolicy::default());

        assert!(frame.outcome.is_complete());
        assert_eq!(port.elapsed(), ms(3));
    }

    #[test]
    fn test_json_surplus_is_kept() {
        let mut port = MockTransport::new().then(ms(1), b"{}\r\nextra");
        let frame = detect(&mut port, FallbackPolicy::default());

        assert_eq!(frame.outcome.bytes(), b"{}");
        assert_eq!(frame.surplus, b"\r\nextra");
    }

    #[test]
    fn test_json_does_not_over_read_later_bursts() {
        let mut port = MockTransport::new()
            .then(ms(1), b"{\"a\":")
            .then(ms(1), b"1}{\"next\":2}");
        let frame = detect(&mut port, FallbackPolicy::default());

        assert_eq!(frame.outcome.bytes(), b"{\"a\":1}");
        assert!(frame.surplus.is_empty());
        assert_eq!(port.unread(), b"{\"next\":2}".len());
    }

    #[test]
    fn test_json_trickle_never_times_out_early() {
        let body = br#"{"device":[{"id":1,"cfg":{"x":[1,2,3]}}]}"#;
        // Gaps just under the idle window must never end the frame.
        let mut port = MockTransport::new()
            .then(ms(1), &body[..1])
            .trickle(ms(99), &body[1..]);
        let frame = detect(&mut port, FallbackPolicy::default());

        assert_eq!(frame.outcome.bytes(), body);
        assert!(frame.outcome.is_complete());
    }

    #[test]
    fn test_json_partial_times_out_with_bytes() {
        let mut port = MockTransport::new().then(ms(2), br#"{"ok":tr"#);
        let frame = detect(&mut port, FallbackPolicy::default());

        match frame.outcome {
            TransactionOutcome::TimedOut(bytes) => assert_eq!(bytes, br#"{"ok":tr"#),
            other => panic!("expected TimedOut, got {other:?}"),
        }
        assert_eq!(port.elapsed(), ms(2) + TIMEOUT);
    }

    #[test]
    fn test_no_response() {
        let mut port = MockTransport::new();
        let frame = detect(&mut port, FallbackPolicy::default());

        assert!(matches!(frame.outcome, TransactionOutcome::NoResponse));
        assert!(frame.outcome.bytes().is_empty());
        assert_eq!(frame.framing, Framing::Unclassified);
        assert_eq!(port.elapsed(), DELAY);
    }

    #[test]
    fn test_response_after_delay_is_no_response() {
        let mut port = MockTransport::new().then(ms(51), b"{}");
        let frame = detect(&mut port, FallbackPolicy::default());

        assert!(matches!(frame.outcome, TransactionOutcome::NoResponse));
    }

    #[test]
    fn test_chunked_one_byte_at_a_time() {
        let data = b"4\r\ndata\r\n0\r\n\r\n";
        let mut port = MockTransport::new().trickle(ms(1), data);
        let frame = detect(&mut port, FallbackPolicy::default());

        assert_eq!(frame.framing, Framing::Chunked);
        assert!(frame.outcome.is_complete());
        assert_eq!(frame.outcome.bytes(), data);
        assert_eq!(decode_chunked(frame.outcome.bytes()).unwrap(), b"data");
    }

    #[test]
    fn test_chunked_single_burst_completes() {
        let data = b"5\r\nhello\r\n0\r\n\r\n";
        let mut port = MockTransport::new().then(ms(4), data);
        let frame = detect(&mut port, FallbackPolicy::default());

        assert!(frame.outcome.is_complete());
        assert_eq!(frame.outcome.bytes(), data);
        assert_eq!(port.elapsed(), ms(4));
    }

    #[test]
    fn test_chunked_leading_noise_trimmed() {
        let mut port = MockTransport::new()
            .then(ms(1), &[0x01, 0x02])
            .then(ms(1), b"5\r\nhello\r\n0\r\n\r\n");
        let frame = detect(&mut port, FallbackPolicy::default());

        assert!(frame.outcome.is_complete());
        assert_eq!(frame.noise, [0x01, 0x02]);
        assert_eq!(frame.outcome.bytes(), b"5\r\nhello\r\n0\r\n\r\n");
        assert_eq!(decode_chunked(frame.outcome.bytes()).unwrap(), b"hello");
    }

    #[test]
    fn test_chunked_split_at_every_position() {
        let data = b"3\r\nabc\r\n2\r\nde\r\n0\r\n\r\n";
        for split in 1..data.len() {
            let mut port = MockTransport::new()
                .then(ms(1), &data[..split])
                .then(ms(10), &data[split..]);
            let frame = detect(&mut port, FallbackPolicy::StrictChunked);
            assert!(frame.outcome.is_complete(), "split at {split}");
            assert_eq!(frame.outcome.bytes(), data, "split at {split}");
        }
    }

    #[test]
    fn test_chunked_incomplete_times_out() {
        let mut port = MockTransport::new().then(ms(1), b"8\r\nshort");
        let frame = detect(&mut port, FallbackPolicy::IdleSilence);

        match frame.outcome {
            TransactionOutcome::TimedOut(bytes) => assert_eq!(bytes, b"8\r\nshort"),
            other => panic!("expected TimedOut, got {other:?}"),
        }
    }

    #[test]
    fn test_malformed_strict_times_out() {
        let mut port = MockTransport::new().then(ms(1), b"abc xyz\r\nmore text\r\n");
        let frame = detect(&mut port, FallbackPolicy::StrictChunked);

        assert_eq!(frame.framing, Framing::Chunked);
        assert!(matches!(frame.outcome, TransactionOutcome::TimedOut(_)));
        assert_eq!(frame.outcome.bytes(), b"abc xyz\r\nmore text\r\n");
    }

    #[test]
    fn test_malformed_idle_silence_completes_on_quiet() {
        let mut port = MockTransport::new()
            .then(ms(1), b"abc xyz\r\n")
            .then(ms(30), b"more text\r\n");
        let frame = detect(&mut port, FallbackPolicy::IdleSilence);

        assert_eq!(frame.framing, Framing::IdleSilence);
        assert!(frame.outcome.is_complete());
        assert_eq!(frame.outcome.bytes(), b"abc xyz\r\nmore text\r\n");
        assert_eq!(port.elapsed(), ms(31) + TIMEOUT);
    }

    #[test]
    fn test_malformed_detected_mid_stream() {
        let mut port = MockTransport::new()
            .then(ms(1), b"2\r\nok\r\n")
            .then(ms(5), b"zz\r\ntail");
        let frame = detect(&mut port, FallbackPolicy::IdleSilence);

        assert_eq!(frame.framing, Framing::IdleSilence);
        assert_eq!(frame.outcome.bytes(), b"2\r\nok\r\nzz\r\ntail");
    }

    #[test]
    fn test_bad_trailer_without_newline_uses_fallback() {
        let script = || {
            MockTransport::new()
                .then(ms(1), b"2\r\n")
                .trickle(ms(2), b"abcd")
        };

        let mut port = script();
        let frame = detect(&mut port, FallbackPolicy::IdleSilence);
        assert_eq!(frame.framing, Framing::IdleSilence);
        assert!(frame.outcome.is_complete());
        assert_eq!(frame.outcome.bytes(), b"2\r\nabcd");

        let mut port = script();
        let frame = detect(&mut port, FallbackPolicy::StrictChunked);
        assert_eq!(frame.framing, Framing::Chunked);
        assert!(matches!(frame.outcome, TransactionOutcome::TimedOut(_)));
    }

    #[test]
    fn test_text_reply_is_kept_whole_on_idle_fallback() {
        let reply = b"Invalid command\r\n";
        let mut port = MockTransport::new().then(ms(1), reply);
        let frame = detect(&mut port, FallbackPolicy::IdleSilence);

        assert_eq!(frame.framing, Framing::IdleSilence);
        assert!(frame.outcome.is_complete());
        assert_eq!(frame.outcome.bytes(), reply);
        assert_eq!(frame.outcome.bytes().len(), 17);
        assert!(frame.noise.is_empty());
    }

    #[test]
    fn test_text_reply_is_kept_whole_when_strict() {
        let reply = b"Invalid command\r\n";
        let mut port = MockTransport::new().then(ms(1), reply);
        let frame = detect(&mut port, FallbackPolicy::StrictChunked);

        match frame.outcome {
            TransactionOutcome::TimedOut(bytes) => assert_eq!(bytes, reply),
            other => panic!("expected TimedOut, got {other:?}"),
        }
        assert!(frame.noise.is_empty());
    }

    #[test]
    fn test_reply_without_hex_digits() {
        let mut port = MockTransport::new().then(ms(1), b"OK");
        let frame = detect(&mut port, FallbackPolicy::IdleSilence);
        assert_eq!(frame.framing, Framing::IdleSilence);
        assert!(frame.outcome.is_complete());
        assert_eq!(frame.outcome.bytes(), b"OK");

        let mut port = MockTransport::new().then(ms(1), b"OK");
        let frame = detect(&mut port, FallbackPolicy::StrictChunked);
        assert_eq!(frame.framing, Framing::Chunked);
        assert!(matches!(frame.outcome, TransactionOutcome::TimedOut(ref b) if b == b"OK"));
    }

    #[test]
    fn test_noise_only_reply_completes_on_silence() {
        let noise = [0x00, 0xFF, b'\r', b'\n'];
        let mut port = MockTransport::new().then(ms(1), &noise);
        let frame = detect(&mut port, FallbackPolicy::default());

        assert_eq!(frame.framing, Framing::IdleSilence);
        assert_eq!(frame.outcome.bytes(), noise);
        assert_eq!(port.elapsed(), ms(1) + TIMEOUT);
    }

    #[test]
    fn test_noise_returned_with_incomplete_chunk() {
        let mut port = MockTransport::new()
            .then(ms(1), &[0x01])
            .then(ms(2), &[0x02])
            .then(ms(2), b"3\r\nab");
        let frame = detect(&mut port, FallbackPolicy::default());

        match frame.outcome {
            TransactionOutcome::TimedOut(bytes) => assert_eq!(bytes, b"\x01\x023\r\nab"),
            other => panic!("expected TimedOut, got {other:?}"),
        }
        assert!(frame.noise.is_empty());
    }

    #[test]
    fn test_noise_returned_with_transport_error() {
        let mut port = MockTransport::new()
            .then(ms(1), b"\x01\x023\r\n")
            .then(ms(1), b"abc")
            .fail_reads_after(5);
        let frame = detect(&mut port, FallbackPolicy::default());

        match frame.outcome {
            TransactionOutcome::TransportError { partial, .. } => {
                assert_eq!(partial, b"\x01\x023\r\n");
            },
            other => panic!("expected TransportError, got {other:?}"),
        }
    }

    #[test]
    fn test_transport_error_keeps_partial() {
        let mut port = MockTransport::new()
            .then(ms(1), b"{\"a\":")
            .then(ms(1), b"1}")
            .fail_reads_after(5);
        let frame = detect(&mut port, FallbackPolicy::default());

        match frame.outcome {
            TransactionOutcome::TransportError { partial, .. } => assert_eq!(partial, b"{\"a\":"),
            other => panic!("expected TransportError, got {other:?}"),
        }
    }
}
