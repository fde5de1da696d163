//! Line-protocol session with a connected controller: greeting, capability
//! and memory queries, echo-checked command transmission, goodbye.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use lightctl_traits::{Clock, LineLink};

use crate::compiler::CompiledProgram;
use crate::device::{
    DeviceCapabilities, MemoryReport, check_capabilities, check_pulse_mode, parse_greeting,
    parse_memory,
};
use crate::error::{LightError, Result};

/// Greetings resent after unexpected lines before giving up.
const MAX_GREETING_RESENDS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTimeouts {
    /// Per-command echo (and memory query) deadline.
    pub command: Duration,
    pub greeting: Duration,
    /// Sleep between non-blocking reads.
    pub poll: Duration,
}

impl Default for SessionTimeouts {
    fn default() -> Self {
        Self {
            command: Duration::from_secs(5),
            greeting: Duration::from_secs(10),
            poll: Duration::from_millis(10),
        }
    }
}

/// Poll `link` until `accept` returns `Some`, the deadline passes (`Ok(None)`),
/// or `cancel` is raised. Lines `accept` rejects are logged and skipped.
pub(crate) fn poll_until<T, L, C>(
    link: &mut L,
    clock: &C,
    timeout: Duration,
    poll: Duration,
    cancel: Option<&AtomicBool>,
    mut accept: impl FnMut(&str) -> Option<T>,
) -> Result<Option<T>>
where
    L: LineLink + ?Sized,
    C: Clock + ?Sized,
{
    let start = clock.now();
    loop {
        if cancel.is_some_and(|c| c.load(Ordering::Relaxed)) {
            return Err(LightError::Cancelled);
        }
        while let Some(line) = link.try_read_line()? {
            if let Some(v) = accept(&line) {
                return Ok(Some(v));
            }
            tracing::debug!(line = %line, "skipping unexpected line");
        }
        if clock.now().saturating_duration_since(start) >= timeout {
            return Ok(None);
        }
        clock.sleep(poll);
    }
}

pub struct DeviceSession<L: LineLink, C: Clock> {
    link: L,
    clock: C,
    timeouts: SessionTimeouts,
    caps: Option<DeviceCapabilities>,
}

impl<L: LineLink, C: Clock> DeviceSession<L, C> {
    pub const fn new(link: L, clock: C, timeouts: SessionTimeouts) -> Self {
        Self {
            link,
            clock,
            timeouts,
            caps: None,
        }
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    pub const fn clock(&self) -> &C {
        &self.clock
    }

    pub fn into_inner(self) -> L {
        self.link
    }

    pub const fn capabilities(&self) -> Option<&DeviceCapabilities> {
        self.caps.as_ref()
    }

    /// Send `Hello` and wait for `Salve[;...]`.
    ///
    /// Any other line triggers a resend and restarts the wait; boards that
    /// reset on connect print boot noise before they are ready.
    pub fn greet(&mut self) -> Result<DeviceCapabilities> {
        self.link.clear_input()?;
        let mut resends = 0;
        loop {
            self.link.write_line("Hello")?;
            let mut noise = None;
            let got = poll_until(
                &mut self.link,
                &self.clock,
                self.timeouts.greeting,
                self.timeouts.poll,
                None,
                |line| match parse_greeting(line) {
                    Some(caps) => Some(Some(caps)),
                    None => {
                        noise = Some(line.to_string());
                        Some(None)
                    }
                },
            )?;
            match got {
                Some(Some(caps)) => {
                    tracing::info!(
                        pattern_length = ?caps.pattern_length,
                        max_pattern_num = ?caps.max_pattern_num,
                        max_channel_num = ?caps.max_channel_num,
                        "device greeted"
                    );
                    self.caps = Some(caps);
                    return Ok(caps);
                }
                Some(None) if resends < MAX_GREETING_RESENDS => {
                    resends += 1;
                    tracing::warn!(line = ?noise, resends, "unexpected reply to greeting, resending");
                }
                _ => {
                    return Err(LightError::Timeout(format!(
                        "no greeting from the device within {:?} (after {resends} resends)",
                        self.timeouts.greeting
                    )));
                }
            }
        }
    }

    /// Query memory and pulse support. A silent device yields `Ok(None)`.
    pub fn memory(&mut self) -> Result<Option<MemoryReport>> {
        self.link.write_line("GET_MEMORY")?;
        let report = poll_until(
            &mut self.link,
            &self.clock,
            self.timeouts.command,
            self.timeouts.poll,
            None,
            parse_memory,
        )?;
        match &report {
            Some(r) => tracing::info!(free = r.free, total = ?r.total, pulse_mode = r.pulse_mode, "device memory"),
            None => tracing::warn!("device did not answer GET_MEMORY; assuming compatible firmware"),
        }
        Ok(report)
    }

    /// Send one command and require an exact echo.
    pub fn send_command(&mut self, line: &str) -> Result<()> {
        let line = line.trim();
        self.link.write_line(line)?;
        let echo = poll_until(
            &mut self.link,
            &self.clock,
            self.timeouts.command,
            self.timeouts.poll,
            None,
            |l| Some(l.to_string()),
        )?;
        match echo {
            Some(e) if e == line => {
                tracing::debug!(command = line, "command acknowledged");
                Ok(())
            }
            Some(e) => Err(LightError::Transport(format!(
                "command \"{line}\" was not received correctly; device echoed \"{e}\""
            ))),
            None => Err(LightError::Timeout(format!(
                "no echo for \"{line}\" within {:?}; check the connection",
                self.timeouts.command
            ))),
        }
    }

    /// Greet (if needed) and check the program against the device. Returns warnings.
    pub fn verify(&mut self, program: &CompiledProgram) -> Result<Vec<String>> {
        let caps = match self.caps {
            Some(c) => c,
            None => self.greet()?,
        };
        let mut warnings = check_capabilities(&caps, &program.requirements())?;
        let report = self.memory()?;
        warnings.extend(check_pulse_mode(report.as_ref(), program.requires_pulse())?);
        for w in &warnings {
            tracing::warn!("{w}");
        }
        Ok(warnings)
    }

    /// Send every line of a verified program in order. Returns the number sent.
    pub fn transmit(&mut self, program: &CompiledProgram) -> Result<usize> {
        let lines = program.lines();
        for (i, line) in lines.iter().enumerate() {
            self.send_command(line)?;
            tracing::info!(sent = i + 1, total = lines.len(), "command sent");
        }
        Ok(lines.len())
    }

    /// Say goodbye and wait for `Arrivederci`.
    pub fn bye(&mut self) -> Result<()> {
        self.link.write_line("Bye")?;
        let ok = poll_until(
            &mut self.link,
            &self.clock,
            self.timeouts.command,
            self.timeouts.poll,
            None,
            |l| (l == "Arrivederci").then_some(()),
        )?;
        ok.ok_or_else(|| {
            LightError::Timeout(format!(
                "device did not answer Bye within {:?}",
                self.timeouts.command
            ))
        })
    }
}
