//! In-process stand-in for a controller board.
//!
//! Replies follow the firmware's line protocol. Time-dependent replies
//! (calibration) are scheduled on the shared [`Clock`], so a
//! `ManualClock` makes whole calibration runs deterministic and instant.

use std::time::{Duration, Instant};

use lightctl_traits::{Clock, LineLink, LinkError, PortInfo};

#[derive(Debug, Clone, PartialEq)]
pub struct SimConfig {
    /// `(PATTERN_LENGTH, MAX_PATTERN_NUM, MAX_CHANNEL_NUM)`; `None` sends a
    /// bare legacy `Salve`.
    pub capabilities: Option<(u32, u32, u32)>,
    /// Full `MEMORY;...` reply; `None` leaves `GET_MEMORY` unanswered.
    pub memory: Option<String>,
    /// Lines sent instead of the first greetings, like a board printing boot
    /// output after a reset.
    pub boot_noise: Vec<String>,
    /// Host seconds per device second. Above 1.0 the device clock runs fast.
    pub clock_factor: f64,
    /// Echo pattern commands with their last character altered.
    pub corrupt_echo: bool,
    /// Never reply to anything.
    pub silent: bool,
    pub port: PortInfo,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            capabilities: Some((8, 32, 4)),
            memory: Some("MEMORY;FREE:50000;TOTAL:98304;PULSE_MODE:1;PULSE_COMPILE:enabled".to_string()),
            boot_noise: Vec::new(),
            clock_factor: 1.0,
            corrupt_echo: false,
            silent: false,
            port: PortInfo {
                port: "SIM0".to_string(),
                description: Some("Simulated light controller".to_string()),
                manufacturer: Some("lightctl".to_string()),
                serial_number: Some("SIM-0001".to_string()),
                vid: None,
                pid: None,
                location: None,
            },
        }
    }
}

pub struct SimulatedDevice<C: Clock> {
    cfg: SimConfig,
    clock: C,
    noise_left: usize,
    outbox: Vec<(Instant, String)>,
    received: Vec<String>,
    programmed: Vec<String>,
}

impl<C: Clock> SimulatedDevice<C> {
    pub fn new(cfg: SimConfig, clock: C) -> Self {
        Self {
            noise_left: cfg.boot_noise.len(),
            cfg,
            clock,
            outbox: Vec::new(),
            received: Vec::new(),
            programmed: Vec::new(),
        }
    }

    /// Every line written to the device, in order.
    pub fn received(&self) -> &[String] {
        &self.received
    }

    /// Pattern and wait commands the device accepted.
    pub fn programmed(&self) -> &[String] {
        &self.programmed
    }

    fn reply_now(&mut self, line: String) {
        self.outbox.push((self.clock.now(), line));
    }

    // Device milliseconds to the host instant at which they elapse.
    fn after_device_ms(&self, ms: u64) -> Instant {
        let host = Duration::from_secs_f64(ms as f64 / 1000.0 * self.cfg.clock_factor);
        self.clock.now() + host
    }

    fn greeting(&mut self) -> String {
        if self.noise_left > 0 {
            let idx = self.cfg.boot_noise.len() - self.noise_left;
            self.noise_left -= 1;
            return self.cfg.boot_noise[idx].clone();
        }
        match self.cfg.capabilities {
            Some((len, num, ch)) => {
                format!("Salve;PATTERN_LENGTH:{len};MAX_PATTERN_NUM:{num};MAX_CHANNEL_NUM:{ch}")
            }
            None => "Salve".to_string(),
        }
    }

    fn handle(&mut self, line: &str) {
        if line == "Hello" {
            let g = self.greeting();
            self.reply_now(g);
        } else if line == "GET_MEMORY" {
            if let Some(m) = self.cfg.memory.clone() {
                self.reply_now(m);
            }
        } else if line == "Bye" {
            self.reply_now("Arrivederci".to_string());
        } else if line.starts_with("PATTERN:") {
            self.programmed.push(line.to_string());
            let mut echo = line.to_string();
            if self.cfg.corrupt_echo {
                echo.pop();
                echo.push('#');
            }
            self.reply_now(echo);
        } else if let Some(ms) = line.strip_prefix("calibrate_v11_") {
            if let Ok(ms) = ms.parse::<u64>() {
                let due = self.after_device_ms(ms);
                self.outbox.push((due, format!("calibration_v11_{ms}")));
            }
        } else if let Some(args) = line.strip_prefix("calibrate_timestamps_") {
            let parsed = args
                .split_once('_')
                .and_then(|(d, n)| Some((d.parse::<u64>().ok()?, n.parse::<u64>().ok()?)));
            if let Some((duration_s, samples)) = parsed {
                let samples = samples.max(1);
                for i in 0..=samples {
                    let device_ms = duration_s * 1000 * i / samples;
                    let due = self.after_device_ms(device_ms);
                    self.outbox.push((due, format!("calib_timestamp_{device_ms}")));
                }
            }
        } else {
            tracing::debug!(line, "simulated device ignoring unknown command");
        }
    }
}

impl<C: Clock> LineLink for SimulatedDevice<C> {
    fn write_line(&mut self, line: &str) -> Result<(), LinkError> {
        let line = line.trim();
        tracing::trace!(line, "sim <- host");
        self.received.push(line.to_string());
        if !self.cfg.silent {
            self.handle(line);
        }
        Ok(())
    }

    fn try_read_line(&mut self) -> Result<Option<String>, LinkError> {
        let now = self.clock.now();
        let next = self
            .outbox
            .iter()
            .enumerate()
            .filter(|(_, (due, _))| *due <= now)
            .min_by_key(|(_, (due, _))| *due)
            .map(|(i, _)| i);
        Ok(next.map(|i| self.outbox.remove(i).1))
    }

    fn port_info(&self) -> PortInfo {
        self.cfg.port.clone()
    }
}
