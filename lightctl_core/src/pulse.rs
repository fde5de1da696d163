//! Pulse parameter resolution.
//!
//! A row may describe its pulse train as any of (frequency, pulse width),
//! (frequency, duty cycle), (period, pulse width) or (period, duty cycle).
//! All four collapse to the canonical integer pair `(period_ms, pulse_width_ms)`.

use crate::error::{LightError, Result};
use crate::util::{parse_non_negative, round_to_device};

/// Raw pulse inputs of one row. Zero means absent.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PulseInputs {
    pub frequency_hz: f64,
    pub period_ms: f64,
    pub pulse_width_ms: f64,
    /// Duty cycle in percent, already normalized by [`parse_duty`].
    pub duty_pct: f64,
}

/// Canonical pulse of one timeline entry. `(0, 0)` means no pulsing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Pulse {
    pub period_ms: u32,
    pub pulse_width_ms: u32,
}

impl Pulse {
    pub const NONE: Self = Self {
        period_ms: 0,
        pulse_width_ms: 0,
    };

    pub const fn new(period_ms: u32, pulse_width_ms: u32) -> Self {
        Self {
            period_ms,
            pulse_width_ms,
        }
    }

    pub const fn is_none(&self) -> bool {
        self.period_ms == 0 && self.pulse_width_ms == 0
    }
}

/// Parse a duty-cycle cell into percent.
///
/// Accepts `10`, `10%`, `10.5%` and fractions in `(0, 1]` (`0.1` is 10%).
/// A value written with `%` is always a percentage.
pub fn parse_duty(raw: &str, at: &str) -> Result<f64> {
    let t = raw.trim();
    let (num, explicit_pct) = match t.strip_suffix('%') {
        Some(n) => (n.trim(), true),
        None => (t, false),
    };
    let mut dc = parse_non_negative(num, at)?;
    if !explicit_pct && dc > 0.0 && dc <= 1.0 {
        dc *= 100.0;
    }
    if dc > 100.0 {
        return Err(LightError::PulseConsistency(format!(
            "{at}: duty_cycle {dc}% is above 100% (pulse width cannot exceed the period)"
        )));
    }
    Ok(dc)
}

fn period_from_frequency(freq_hz: f64, at: &str) -> Result<u32> {
    let period = round_to_device(1000.0 / freq_hz, at)?;
    if period == 0 {
        return Err(LightError::PulseConsistency(format!(
            "{at}: frequency {freq_hz} Hz is too high, its period rounds to 0 ms"
        )));
    }
    Ok(period)
}

fn width_from_duty(period: u32, duty_pct: f64, at: &str) -> Result<u32> {
    let pw = round_to_device(f64::from(period) * duty_pct / 100.0, at)?;
    if pw == 0 {
        return Err(LightError::PulseConsistency(format!(
            "{at}: duty_cycle {duty_pct}% of a {period} ms period rounds to a 0 ms pulse"
        )));
    }
    Ok(pw)
}

fn check_width(period: u32, pw: u32, at: &str) -> Result<()> {
    if period == 0 {
        return Err(LightError::PulseConsistency(format!(
            "{at}: period rounds to 0 ms"
        )));
    }
    if pw == 0 {
        return Err(LightError::PulseConsistency(format!(
            "{at}: pulse_width rounds to 0 ms under a {period} ms period"
        )));
    }
    if pw > period {
        return Err(LightError::PulseConsistency(format!(
            "{at}: pulse_width ({pw} ms) cannot exceed period ({period} ms)"
        )));
    }
    Ok(())
}

/// Resolve one row's inputs to a canonical pulse.
///
/// Precedence: frequency+width, frequency+duty, period+width, period+duty.
/// A single determinant without its partner is an error; all absent is no pulse.
pub fn resolve(inputs: PulseInputs, at: &str) -> Result<Pulse> {
    let PulseInputs {
        frequency_hz: f,
        period_ms: t,
        pulse_width_ms: pw,
        duty_pct: dc,
    } = inputs;

    if f > 0.0 && pw > 0.0 {
        let period = period_from_frequency(f, at)?;
        let width = round_to_device(pw, at)?;
        check_width(period, width, at)?;
        return Ok(Pulse::new(period, width));
    }
    if f > 0.0 && dc > 0.0 {
        let period = period_from_frequency(f, at)?;
        return Ok(Pulse::new(period, width_from_duty(period, dc, at)?));
    }
    if t > 0.0 && pw > 0.0 {
        let period = round_to_device(t, at)?;
        let width = round_to_device(pw, at)?;
        check_width(period, width, at)?;
        return Ok(Pulse::new(period, width));
    }
    if t > 0.0 && dc > 0.0 {
        let period = round_to_device(t, at)?;
        return Ok(Pulse::new(period, width_from_duty(period, dc, at)?));
    }
    if f > 0.0 || t > 0.0 || pw > 0.0 || dc > 0.0 {
        return Err(LightError::PulseConsistency(format!(
            "{at}: incomplete pulse parameters (frequency={f}, period={t}, pulse_width={pw}, duty_cycle={dc}); \
             give frequency or period together with pulse_width or duty_cycle, or leave all empty"
        )));
    }
    Ok(Pulse::NONE)
}
