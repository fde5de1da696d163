//! Device capabilities and the checks a compiled program must pass before
//! it is sent.

use crate::error::{LightError, Result};

/// Limits reported in the greeting. `None` means the firmware did not say
/// (legacy `Salve` greeting).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceCapabilities {
    pub pattern_length: Option<u32>,
    pub max_pattern_num: Option<u32>,
    pub max_channel_num: Option<u32>,
}

impl DeviceCapabilities {
    pub const fn is_legacy(&self) -> bool {
        self.pattern_length.is_none() && self.max_pattern_num.is_none() && self.max_channel_num.is_none()
    }
}

/// Parse a greeting reply. Returns `None` when the line is not a greeting.
///
/// `Salve;PATTERN_LENGTH:8;MAX_PATTERN_NUM:32;MAX_CHANNEL_NUM:4`
pub fn parse_greeting(line: &str) -> Option<DeviceCapabilities> {
    let mut parts = line.trim().split(';');
    if parts.next()? != "Salve" {
        return None;
    }
    let mut caps = DeviceCapabilities::default();
    for part in parts {
        let Some((key, value)) = part.split_once(':') else {
            continue;
        };
        let value = value.trim().parse::<u32>().ok();
        match key.trim() {
            "PATTERN_LENGTH" => caps.pattern_length = value,
            "MAX_PATTERN_NUM" => caps.max_pattern_num = value,
            "MAX_CHANNEL_NUM" => caps.max_channel_num = value,
            other => tracing::debug!(key = other, "ignoring unknown greeting field"),
        }
    }
    Some(caps)
}

/// Reply to `GET_MEMORY`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryReport {
    pub free: u64,
    /// `None` when the firmware reports `unknown`.
    pub total: Option<u64>,
    pub pulse_mode: bool,
    pub pulse_compile: String,
}

/// `MEMORY;FREE:<n>;TOTAL:<n|unknown>;PULSE_MODE:<0|1>;PULSE_COMPILE:<s>`
pub fn parse_memory(line: &str) -> Option<MemoryReport> {
    let mut parts = line.trim().split(';');
    if parts.next()? != "MEMORY" {
        return None;
    }
    let mut free = None;
    let mut total = None;
    let mut pulse_mode = false;
    let mut pulse_compile = String::new();
    for part in parts {
        let Some((key, value)) = part.split_once(':') else {
            continue;
        };
        match key {
            "FREE" => free = value.parse().ok(),
            "TOTAL" => total = value.parse().ok(),
            "PULSE_MODE" => pulse_mode = value == "1",
            "PULSE_COMPILE" => pulse_compile = value.to_string(),
            _ => {}
        }
    }
    Some(MemoryReport {
        free: free?,
        total,
        pulse_mode,
        pulse_compile,
    })
}

/// What a compiled program needs from the device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Requirements {
    /// Widest pattern (STATUS slots) among the pattern commands.
    pub pattern_length: u32,
    /// Most pattern commands sent to any single channel.
    pub patterns_per_channel: u32,
    /// Highest channel number used.
    pub max_channel: u32,
}

/// Compare requirements against the device. Returns warnings; violations are
/// [`LightError::Capability`].
pub fn check_capabilities(caps: &DeviceCapabilities, req: &Requirements) -> Result<Vec<String>> {
    let mut warnings = Vec::new();
    if caps.is_legacy() {
        warnings.push(
            "device sent a legacy greeting without capabilities; limits cannot be checked".to_string(),
        );
        return Ok(warnings);
    }

    if let Some(dev_len) = caps.pattern_length {
        if req.pattern_length > dev_len {
            return Err(LightError::Capability(format!(
                "protocol needs PATTERN_LENGTH {} but the device supports {dev_len}; \
                 recompile with pattern_length <= {dev_len} or flash firmware built with PATTERN_LENGTH >= {}",
                req.pattern_length, req.pattern_length
            )));
        }
        if req.pattern_length < dev_len {
            warnings.push(format!(
                "protocol uses PATTERN_LENGTH {} while the device supports {dev_len}; unused slots waste device memory",
                req.pattern_length
            ));
        }
    }
    if let Some(max) = caps.max_pattern_num {
        if req.patterns_per_channel > max {
            return Err(LightError::Capability(format!(
                "a channel needs {} pattern commands but the device holds at most {max} (MAX_PATTERN_NUM)",
                req.patterns_per_channel
            )));
        }
    }
    if let Some(max) = caps.max_channel_num {
        if req.max_channel > max {
            return Err(LightError::Capability(format!(
                "protocol uses channel CH{} but the device has {max} channels (MAX_CHANNEL_NUM)",
                req.max_channel
            )));
        }
    }
    Ok(warnings)
}

/// Pulse support check. An unknown memory report is assumed compatible.
pub fn check_pulse_mode(report: Option<&MemoryReport>, requires_pulse: bool) -> Result<Vec<String>> {
    match report {
        None => Ok(vec![
            "device did not report its memory or pulse mode; assuming compatible firmware".to_string(),
        ]),
        Some(r) if requires_pulse && !r.pulse_mode => Err(LightError::Capability(format!(
            "protocol uses pulses but the firmware was built without pulse support (PULSE_COMPILE: {})",
            if r.pulse_compile.is_empty() { "unknown" } else { &r.pulse_compile }
        ))),
        Some(r) if !requires_pulse && r.pulse_mode => Ok(vec![
            "firmware has pulse support enabled but the protocol uses no pulses".to_string(),
        ]),
        Some(_) => Ok(Vec::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(l: u32) -> DeviceCapabilities {
        DeviceCapabilities {
            pattern_length: Some(l),
            max_pattern_num: Some(32),
            max_channel_num: Some(4),
        }
    }

    fn req(l: u32) -> Requirements {
        Requirements {
            pattern_length: l,
            patterns_per_channel: 1,
            max_channel: 1,
        }
    }

    #[test]
    fn greeting_forms() {
        assert_eq!(
            parse_greeting("Salve;PATTERN_LENGTH:4;MAX_PATTERN_NUM:32;MAX_CHANNEL_NUM:4"),
            Some(caps(4))
        );
        assert!(parse_greeting("Salve").unwrap().is_legacy());
        assert_eq!(parse_greeting("Ready"), None);
    }

    #[test]
    fn longer_patterns_than_device_is_an_error() {
        assert!(matches!(
            check_capabilities(&caps(4), &req(8)),
            Err(LightError::Capability(_))
        ));
    }

    #[test]
    fn shorter_patterns_than_device_is_a_warning() {
        let w = check_capabilities(&caps(4), &req(2)).unwrap();
        assert_eq!(w.len(), 1);
    }

    #[test]
    fn pattern_count_and_channels_are_limited() {
        let r = Requirements {
            pattern_length: 4,
            patterns_per_channel: 33,
            max_channel: 1,
        };
        assert!(check_capabilities(&caps(4), &r).is_err());
        let r = Requirements {
            pattern_length: 4,
            patterns_per_channel: 1,
            max_channel: 5,
        };
        assert!(check_capabilities(&caps(4), &r).is_err());
    }

    #[test]
    fn memory_report() {
        let m = parse_memory("MEMORY;FREE:2048;TOTAL:unknown;PULSE_MODE:0;PULSE_COMPILE:disabled").unwrap();
        assert_eq!(m.free, 2048);
        assert_eq!(m.total, None);
        assert!(matches!(
            check_pulse_mode(Some(&m), true),
            Err(LightError::Capability(_))
        ));
        assert!(check_pulse_mode(Some(&m), false).unwrap().is_empty());
        assert_eq!(check_pulse_mode(None, true).unwrap().len(), 1);
    }
}
