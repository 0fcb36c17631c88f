//! Device reset over the hardware control lines, and link soft reset.
//!
//! ```text
//! RTS  ___/‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾
//! DTR  ___/‾‾‾‾‾‾‾‾‾‾\_______/‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾
//!         |  100 ms  | 50 ms |   100 ms  |
//! ```
//!
//! The pulse widths are the attached device's minimums and are not
//! configurable.

use std::fmt;
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};

use crate::error::Result;
use crate::port::{ControlLine, Transport};

/// Hold time after asserting RTS and DTR.
pub const ASSERT_HOLD: Duration = Duration::from_millis(100);

/// Width of the DTR low pulse.
pub const DTR_LOW_PULSE: Duration = Duration::from_millis(50);

/// Settle time after DTR is reasserted.
pub const RELEASE_SETTLE: Duration = Duration::from_millis(100);

/// Step of the reset sequence that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ResetStage {
    /// Setting RTS and DTR high.
    AssertBoth,
    /// Pulling DTR low.
    DeassertDtr,
    /// Bringing DTR back high.
    ReassertDtr,
}

impl fmt::Display for ResetStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AssertBoth => f.write_str("assert RTS/DTR"),
            Self::DeassertDtr => f.write_str("deassert DTR"),
            Self::ReassertDtr => f.write_str("reassert DTR"),
        }
    }
}

/// Result of a reset sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ResetOutcome {
    /// All three steps succeeded.
    Success,
    /// The sequence stopped at this step.
    Failure(ResetStage),
}

impl ResetOutcome {
    /// Whether the sequence ran to completion.
    pub fn is_success(self) -> bool {
        self == Self::Success
    }
}

/// Pulse the control lines to reset the attached device.
pub fn assert_reset<T: Transport + ?Sized>(transport: &mut T) -> ResetOutcome {
    assert_reset_with(transport, thread::sleep)
}

/// Reset sequence with a caller-supplied delay function.
///
/// Stops at the first failed line change without waiting further.
pub fn assert_reset_with<T, S>(transport: &mut T, mut sleep: S) -> ResetOutcome
where
    T: Transport + ?Sized,
    S: FnMut(Duration),
{
    debug!("Asserting reset on {}", transport.name());

    let asserted = set_line(transport, ControlLine::RequestToSend, true)
        .and_then(|()| set_line(transport, ControlLine::DataTerminalReady, true));
    if asserted.is_err() {
        return ResetOutcome::Failure(ResetStage::AssertBoth);
    }
    sleep(ASSERT_HOLD);

    if set_line(transport, ControlLine::DataTerminalReady, false).is_err() {
        return ResetOutcome::Failure(ResetStage::DeassertDtr);
    }
    sleep(DTR_LOW_PULSE);

    if set_line(transport, ControlLine::DataTerminalReady, true).is_err() {
        return ResetOutcome::Failure(ResetStage::ReassertDtr);
    }
    sleep(RELEASE_SETTLE);

    debug!("Reset sequence complete");
    ResetOutcome::Success
}

fn set_line<T: Transport + ?Sized>(transport: &mut T, line: ControlLine, level: bool) -> Result<()> {
    transport
        .set_control_line(line, level)
        .inspect_err(|e| warn!("Failed to set {line} {}: {e}", if level { "high" } else { "low" }))
}

/// Close the link and reopen it with the same port and baud rate.
pub fn soft_reset<T: Transport + ?Sized>(transport: &mut T) -> Result<()> {
    let name = transport
        .name()
        .to_string();
    let baud_rate = transport.baud_rate();

    transport.close()?;
    match transport.open(&name, baud_rate) {
        Ok(()) => {
            info!("Soft reset of {name} at {baud_rate} baud succeeded");
            Ok(())
        },
        Err(e) => {
            warn!("Soft reset of {name} failed: {e}");
            Err(e)
        },
    }
}
