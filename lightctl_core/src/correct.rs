//! Clock-drift correction of device-bound durations.
//!
//! `factor` is the slope of host time over device time. A device whose clock
//! runs slow (factor > 1) must be asked for proportionally shorter waits, so
//! every duration is divided by the factor and floored.

use crate::error::{LightError, Result};
use crate::timeline::{ChannelTimeline, TimelineEntry};
use crate::util::to_device;

/// Reject factors that cannot scale a duration.
pub fn check_factor(factor: f64) -> Result<f64> {
    if !factor.is_finite() || factor <= 0.0 {
        return Err(LightError::Range(format!(
            "calibration factor {factor} must be finite and > 0"
        )));
    }
    Ok(factor)
}

/// `floor(value / factor)`, narrowed to the device width.
pub fn correct_ms(value: u64, factor: f64) -> Result<u64> {
    let factor = check_factor(factor)?;
    let v = (value as f64 / factor).floor();
    if v > u64::MAX as f64 {
        return Err(LightError::Range(format!(
            "corrected value {v} for {value} ms / {factor} is out of range"
        )));
    }
    Ok(v as u64)
}

fn correct_u32(value: u32, factor: f64, what: &str) -> Result<u32> {
    to_device(correct_ms(u64::from(value), factor)?, what)
}

// A live pulse never floors to a zero period or width; the firmware reads
// `T<p>pw0` as "no pulse" only when both are zero.
fn correct_pulse_u32(value: u32, factor: f64, what: &str) -> Result<u32> {
    let v = correct_u32(value, factor, what)?;
    Ok(if value > 0 { v.max(1) } else { v })
}

pub fn correct_entry(entry: &TimelineEntry, factor: f64) -> Result<TimelineEntry> {
    Ok(TimelineEntry {
        status: entry.status,
        time_ms: correct_u32(entry.time_ms, factor, "time_ms")?,
        period_ms: correct_pulse_u32(entry.period_ms, factor, "period_ms")?,
        pulse_width_ms: correct_pulse_u32(entry.pulse_width_ms, factor, "pulse_width_ms")?,
    })
}

pub fn correct_timeline(timeline: &ChannelTimeline, factor: f64) -> Result<ChannelTimeline> {
    let entries = timeline
        .entries
        .iter()
        .map(|e| correct_entry(e, factor))
        .collect::<Result<Vec<_>>>()?;
    Ok(ChannelTimeline {
        channel: timeline.channel,
        entries,
    })
}

/// Corrected countdown of a wait command.
pub fn correct_countdown(countdown_ms: u64, factor: f64) -> Result<u32> {
    let v = correct_ms(countdown_ms, factor)?;
    to_device(v, "start countdown (ms)")
}
