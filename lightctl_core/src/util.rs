//! Common numeric and time helpers for lightctl_core.

use crate::error::{LightError, Result};

/// Number of milliseconds in one second.
pub const MILLIS_PER_SEC: u64 = 1_000;

/// Largest value the device's 32-bit time fields can hold.
pub const DEVICE_MAX: u64 = u32::MAX as u64;

/// Parse a numeric cell. Rejects non-finite and negative values.
///
/// `at` names the location for error messages, e.g. `column "CH1_time_s" row 4`.
pub fn parse_non_negative(raw: &str, at: &str) -> Result<f64> {
    let v: f64 = raw
        .trim()
        .parse()
        .map_err(|_| LightError::Format(format!("{at}: \"{raw}\" is not a number")))?;
    if !v.is_finite() {
        return Err(LightError::Format(format!("{at}: \"{raw}\" is not finite")));
    }
    if v < 0.0 {
        return Err(LightError::Format(format!(
            "{at}: negative value {v} is not allowed"
        )));
    }
    Ok(v)
}

/// Round a non-negative millisecond value to the device integer width.
pub fn round_to_device(ms: f64, at: &str) -> Result<u32> {
    let r = ms.round();
    if !(0.0..=DEVICE_MAX as f64).contains(&r) {
        return Err(LightError::Range(format!(
            "{at}: value {r} exceeds the maximum of 2^32 - 1"
        )));
    }
    Ok(r as u32)
}

/// Narrow a millisecond count to the device integer width.
pub fn to_device(ms: u64, at: &str) -> Result<u32> {
    u32::try_from(ms).map_err(|_| {
        LightError::Range(format!("{at}: value {ms} exceeds the maximum of 2^32 - 1"))
    })
}

/// Human-readable duration: `0ms`, `250ms`, `1.5s`, `2.0min`, `1.0hr`.
pub fn fmt_ms(ms: u64) -> String {
    match ms {
        0 => "0ms".to_string(),
        1..=999 => format!("{ms}ms"),
        1_000..=59_999 => format!("{:.1}s", ms as f64 / 1_000.0),
        60_000..=3_599_999 => format!("{:.1}min", ms as f64 / 60_000.0),
        _ => format!("{:.1}hr", ms as f64 / 3_600_000.0),
    }
}

/// Seconds the device clock drifts over 12 hours for a given factor
/// (positive: the device runs slow).
#[inline]
pub fn drift_per_12h_s(factor: f64) -> f64 {
    (factor - 1.0) * 12.0 * 3600.0
}
