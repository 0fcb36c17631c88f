//! Scripted in-memory transport for unit tests.
//!
//! Time is virtual: `wait_for_data` advances an internal clock instead of
//! sleeping, unless the mock is switched to real time. Responses are queued
//! as bursts that become readable a given gap after the command is written.

use std::collections::VecDeque;
use std::thread;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::port::{ControlLine, Transport};

#[derive(Debug)]
struct Burst {
    due: Duration,
    bytes: Vec<u8>,
}

/// Mock transport with a virtual clock.
pub(crate) struct MockTransport {
    open: bool,
    name: String,
    baud_rate: u32,
    now: Duration,
    script: Vec<(Duration, Vec<u8>)>,
    pending: VecDeque<Burst>,
    rx: VecDeque<u8>,
    written: Vec<u8>,
    accept_limit: Option<usize>,
    control_log: Vec<(ControlLine, bool)>,
    fail_control: Option<(ControlLine, bool)>,
    fail_control_at: Option<usize>,
    control_calls: usize,
    fail_after: Option<usize>,
    read_total: usize,
    fail_open: bool,
    opens: Vec<(String, u32)>,
    closes: usize,
    real_time: bool,
}

impl MockTransport {
    pub(crate) fn new() -> Self {
        Self {
            open: true,
            name: "/dev/ttyMOCK0".to_string(),
            baud_rate: 115200,
            now: Duration::ZERO,
            script: Vec::new(),
            pending: VecDeque::new(),
            rx: VecDeque::new(),
            written: Vec::new(),
            accept_limit: None,
            control_log: Vec::new(),
            fail_control: None,
            fail_control_at: None,
            control_calls: 0,
            fail_after: None,
            read_total: 0,
            fail_open: false,
            opens: Vec::new(),
            closes: 0,
            real_time: false,
        }
    }

    pub(crate) fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub(crate) fn closed(mut self) -> Self {
        self.open = false;
        self
    }

    /// Bytes already sitting in the input buffer before any command.
    pub(crate) fn with_stale(mut self, bytes: &[u8]) -> Self {
        self.rx
            .extend(bytes);
        self
    }

    /// Queue a burst `gap` after the previous one (or after the write).
    pub(crate) fn then(mut self, gap: Duration, bytes: &[u8]) -> Self {
        self.script
            .push((gap, bytes.to_vec()));
        self
    }

    /// Queue every byte as its own burst, `gap` apart.
    pub(crate) fn trickle(mut self, gap: Duration, bytes: &[u8]) -> Self {
        for b in bytes {
            self.script
                .push((gap, vec![*b]));
        }
        self
    }

    /// Accept at most `limit` bytes per write.
    pub(crate) fn accept_at_most(mut self, limit: usize) -> Self {
        self.accept_limit = Some(limit);
        self
    }

    /// Fail the control-line call that sets `line` to `level`.
    pub(crate) fn fail_control(mut self, line: ControlLine, level: bool) -> Self {
        self.fail_control = Some((line, level));
        self
    }

    /// Fail the `index`-th control-line call (0-based).
    pub(crate) fn fail_control_at(mut self, index: usize) -> Self {
        self.fail_control_at = Some(index);
        self
    }

    /// Fail every read once `count` bytes have been read.
    pub(crate) fn fail_reads_after(mut self, count: usize) -> Self {
        self.fail_after = Some(count);
        self
    }

    pub(crate) fn fail_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    /// Sleep for real whenever the virtual clock advances.
    pub(crate) fn real_time(mut self) -> Self {
        self.real_time = true;
        self
    }

    /// Inject bytes that arrive `gap` from now, outside any script.
    pub(crate) fn inject_later(&mut self, gap: Duration, bytes: &[u8]) {
        self.pending
            .push_back(Burst {
                due: self.now + gap,
                bytes: bytes.to_vec(),
            });
    }

    pub(crate) fn written(&self) -> &[u8] {
        &self.written
    }

    pub(crate) fn elapsed(&self) -> Duration {
        self.now
    }

    pub(crate) fn control_log(&self) -> &[(ControlLine, bool)] {
        &self.control_log
    }

    pub(crate) fn opens(&self) -> &[(String, u32)] {
        &self.opens
    }

    pub(crate) fn closes(&self) -> usize {
        self.closes
    }

    pub(crate) fn unread(&self) -> usize {
        self.rx
            .len()
            + self
                .pending
                .iter()
                .map(|b| {
                    b.bytes
                        .len()
                })
                .sum::<usize>()
    }

    fn deliver(&mut self) {
        while let Some(burst) = self
            .pending
            .front()
        {
            if burst.due > self.now {
                break;
            }
            if let Some(burst) = self
                .pending
                .pop_front()
            {
                self.rx
                    .extend(burst.bytes);
            }
        }
    }

    fn advance_to(&mut self, t: Duration) {
        if t > self.now {
            if self.real_time {
                thread::sleep(t - self.now);
            }
            self.now = t;
        }
    }

    fn check_open(&self) -> Result<()> {
        if self.open { Ok(()) } else { Err(Error::NotOpen) }
    }

    fn control(&mut self, line: ControlLine, level: bool) -> Result<()> {
        self.check_open()?;
        let call = self.control_calls;
        self.control_calls += 1;
        if self.fail_control == Some((line, level)) || self.fail_control_at == Some(call) {
            return Err(Error::Io(std::io::Error::other(format!("{line} rejected"))));
        }
        self.control_log
            .push((line, level));
        Ok(())
    }

    fn check_reads(&self) -> Result<()> {
        self.check_open()?;
        if self
            .fail_after
            .is_some_and(|limit| self.read_total >= limit)
        {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "device unplugged",
            )));
        }
        Ok(())
    }
}

impl Transport for MockTransport {
    fn is_open(&self) -> bool {
        self.open
    }

    fn write_bytes(&mut self, data: &[u8]) -> Result<usize> {
        self.check_open()?;
        let accepted = self
            .accept_limit
            .map_or(data.len(), |limit| limit.min(data.len()));
        self.written
            .extend_from_slice(&data[..accepted]);

        let mut due = self.now;
        for (gap, bytes) in self
            .script
            .drain(..)
        {
            due += gap;
            self.pending
                .push_back(Burst { due, bytes });
        }
        Ok(accepted)
    }

    fn bytes_available(&mut self) -> Result<usize> {
        self.check_reads()?;
        self.deliver();
        Ok(self
            .rx
            .len())
    }

    fn wait_for_data(&mut self, timeout: Duration) -> Result<bool> {
        self.check_reads()?;
        self.deliver();
        if !self
            .rx
            .is_empty()
        {
            return Ok(true);
        }
        let deadline = self.now + timeout;
        match self
            .pending
            .front()
            .map(|b| b.due)
        {
            Some(due) if due <= deadline => {
                self.advance_to(due);
                self.deliver();
                Ok(true)
            },
            _ => {
                self.advance_to(deadline);
                Ok(false)
            },
        }
    }

    fn wait_for_bytes(&mut self, count: usize, timeout: Duration) -> Result<bool> {
        self.check_reads()?;
        let deadline = self.now + timeout;
        loop {
            self.deliver();
            if self
                .rx
                .len()
                >= count
            {
                return Ok(true);
            }
            match self
                .pending
                .front()
                .map(|b| b.due)
            {
                Some(due) if due <= deadline => self.advance_to(due),
                _ => {
                    self.advance_to(deadline);
                    return Ok(false);
                },
            }
        }
    }

    fn read_all(&mut self) -> Result<Vec<u8>> {
        self.check_reads()?;
        self.deliver();
        let bytes: Vec<u8> = self
            .rx
            .drain(..)
            .collect();
        self.read_total += bytes.len();
        Ok(bytes)
    }

    fn read_one(&mut self) -> Result<Option<u8>> {
        self.check_reads()?;
        self.deliver();
        let byte = self
            .rx
            .pop_front();
        if byte.is_some() {
            self.read_total += 1;
        }
        Ok(byte)
    }

    fn set_dtr(&mut self, level: bool) -> Result<()> {
        self.control(ControlLine::DataTerminalReady, level)
    }

    fn set_rts(&mut self, level: bool) -> Result<()> {
        self.control(ControlLine::RequestToSend, level)
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<()> {
        self.baud_rate = baud_rate;
        Ok(())
    }

    fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn open(&mut self, name: &str, baud_rate: u32) -> Result<()> {
        if self.fail_open {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "no such port",
            )));
        }
        self.name = name.to_string();
        self.baud_rate = baud_rate;
        self.open = true;
        self.opens
            .push((name.to_string(), baud_rate));
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.open = false;
        self.closes += 1;
        Ok(())
    }
}
