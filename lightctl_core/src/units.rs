//! Typed column headers.
//!
//! Protocol tables name their columns `CH{n}_{param}[_{unit}]`. Each header is
//! parsed exactly once into a [`ColumnSpec`]; everything downstream works on
//! the typed form and never looks at the header text again.
//!
//! Parameter synonyms are matched case-insensitively, except for the bare
//! letters: capital `T` means period, lowercase `t` is rejected because it
//! could equally mean time.

use crate::error::{LightError, Result};

/// Time-unit suffix of an elapsed-time or pulse column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeUnit {
    Millis,
    Seconds,
    Minutes,
    Hours,
}

impl TimeUnit {
    pub fn parse(suffix: &str) -> Option<Self> {
        match suffix {
            "ms" | "msec" | "millisecond" | "milliseconds" => Some(Self::Millis),
            "s" | "sec" | "second" | "seconds" => Some(Self::Seconds),
            "m" | "min" | "minute" | "minutes" => Some(Self::Minutes),
            "h" | "hr" | "hour" | "hours" => Some(Self::Hours),
            _ => None,
        }
    }

    /// Milliseconds in one unit.
    pub const fn millis(self) -> u64 {
        match self {
            Self::Millis => 1,
            Self::Seconds => 1_000,
            Self::Minutes => 60_000,
            Self::Hours => 3_600_000,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Millis => "ms",
            Self::Seconds => "sec",
            Self::Minutes => "min",
            Self::Hours => "hr",
        }
    }
}

/// Canonical pulse parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PulseParam {
    Period,
    PulseWidth,
    DutyCycle,
    Frequency,
}

impl PulseParam {
    /// Map a parameter spelling to its canonical parameter.
    ///
    /// `Ok(None)` means the name is not a pulse parameter at all.
    pub fn from_synonym(name: &str) -> Result<Option<Self>> {
        if name == "T" {
            return Ok(Some(Self::Period));
        }
        if name == "t" {
            return Err(LightError::Format(
                "lowercase 't' is ambiguous (time or period); use capital 'T' or 'period'"
                    .to_string(),
            ));
        }
        let p = match name.to_ascii_lowercase().as_str() {
            "period" | "cycle_time" | "cycletime" => Self::Period,
            "pulse_width" | "pulsewidth" | "pulsewdith" | "pulse_wdith" | "pw" | "on_time"
            | "ontime" => Self::PulseWidth,
            "duty_cycle" | "dutycycle" | "dc" | "duty" => Self::DutyCycle,
            "frequency" | "freq" | "frq" | "f" | "hz" => Self::Frequency,
            _ => return Ok(None),
        };
        Ok(Some(p))
    }

    /// Whether a time-unit suffix is meaningful for this parameter.
    pub const fn takes_time_unit(self) -> bool {
        matches!(self, Self::Period | Self::PulseWidth)
    }

    pub const fn canonical_name(self) -> &'static str {
        match self {
            Self::Period => "period",
            Self::PulseWidth => "pulse_width",
            Self::DutyCycle => "duty_cycle",
            Self::Frequency => "frequency",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Status,
    /// Elapsed time of each state, in the given unit.
    Time(TimeUnit),
    /// Pulse parameter. Period and pulse width default to milliseconds.
    Pulse {
        param: PulseParam,
        unit: Option<TimeUnit>,
    },
    /// Anything else: the row-elapsed column, unrecognized channel columns.
    Other,
}

/// A parsed column header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    /// Zero-based position in the table.
    pub index: usize,
    pub header: String,
    /// Channel number when the header starts with `CH{n}`.
    pub channel: Option<u32>,
    pub kind: ColumnKind,
}

impl ColumnSpec {
    /// Canonical header after synonym and unit normalization, e.g. `CH1_period`.
    pub fn canonical_name(&self) -> String {
        let Some(ch) = self.channel else {
            return self.header.clone();
        };
        match self.kind {
            ColumnKind::Status => format!("CH{ch}_status"),
            ColumnKind::Time(_) => format!("CH{ch}_time_ms"),
            ColumnKind::Pulse { param, .. } => format!("CH{ch}_{}", param.canonical_name()),
            ColumnKind::Other => self.header.clone(),
        }
    }

    /// Pulse parameter of this column, if it is one.
    pub const fn param(&self) -> Option<PulseParam> {
        match self.kind {
            ColumnKind::Pulse { param, .. } => Some(param),
            _ => None,
        }
    }

    /// Multiplier converting cell values of this column to milliseconds.
    pub fn to_millis(&self) -> Option<u64> {
        match self.kind {
            ColumnKind::Time(u) => Some(u.millis()),
            ColumnKind::Pulse { param, unit } if param.takes_time_unit() => {
                Some(unit.map_or(1, TimeUnit::millis))
            }
            _ => None,
        }
    }
}

fn channel_number(prefix: &str) -> Option<u32> {
    let digits = prefix.strip_prefix("CH")?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Parse one header into its typed form.
pub fn parse_header(index: usize, header: &str) -> Result<ColumnSpec> {
    let header = header.trim();
    let other = |channel| ColumnSpec {
        index,
        header: header.to_string(),
        channel,
        kind: ColumnKind::Other,
    };

    let parts: Vec<&str> = header.split('_').collect();
    if parts.len() < 2 {
        return Ok(other(None));
    }
    let Some(channel) = channel_number(parts[0]) else {
        return Ok(other(None));
    };
    let params = &parts[1..];
    let spec = |kind| ColumnSpec {
        index,
        header: header.to_string(),
        channel: Some(channel),
        kind,
    };

    if params.len() == 1 && params[0].eq_ignore_ascii_case("status") {
        return Ok(spec(ColumnKind::Status));
    }
    if params[0].eq_ignore_ascii_case("time") {
        return match params {
            [_] => Err(LightError::Format(format!(
                "column {index} \"{header}\": elapsed-time column needs a unit suffix, e.g. \"CH{channel}_time_s\""
            ))),
            [_, unit] => TimeUnit::parse(&unit.to_ascii_lowercase())
                .map(|u| spec(ColumnKind::Time(u)))
                .ok_or_else(|| {
                    LightError::Format(format!(
                        "column {index} \"{header}\": time unit \"{unit}\" is not recognized; use millisecond(msec, ms), second(sec, s), minute(min, m), or hour(hr, h)"
                    ))
                }),
            _ => Ok(other(Some(channel))),
        };
    }

    // Trailing unit suffix, only when something is left in front of it.
    let (name_parts, unit) = match params.split_last() {
        Some((last, rest)) if !rest.is_empty() => match TimeUnit::parse(&last.to_ascii_lowercase()) {
            Some(u) => (rest, Some(u)),
            None => (params, None),
        },
        _ => (params, None),
    };
    let name = name_parts.join("_");
    let param = PulseParam::from_synonym(&name).map_err(|_| {
        LightError::Format(format!(
            "column {index} \"{header}\": lowercase 't' is ambiguous (time or period); use \"CH{channel}_T\" or \"CH{channel}_period\""
        ))
    })?;
    let Some(param) = param else {
        return Ok(other(Some(channel)));
    };
    if unit.is_some() && !param.takes_time_unit() {
        return Err(LightError::Format(format!(
            "column {index} \"{header}\": a time unit only applies to period or pulse_width, not {}",
            param.canonical_name()
        )));
    }
    Ok(spec(ColumnKind::Pulse { param, unit }))
}

/// Parse every header of a table.
pub fn parse_headers(headers: &[String]) -> Result<Vec<ColumnSpec>> {
    headers
        .iter()
        .enumerate()
        .map(|(i, h)| parse_header(i, h))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("CH1_T_s", PulseParam::Period, Some(TimeUnit::Seconds))]
    #[case("CH1_period", PulseParam::Period, None)]
    #[case("CH3_Cycle_Time_ms", PulseParam::Period, Some(TimeUnit::Millis))]
    #[case("CH1_PW", PulseParam::PulseWidth, None)]
    #[case("CH1_pulse_width_ms", PulseParam::PulseWidth, Some(TimeUnit::Millis))]
    #[case("CH1_pulsewdith", PulseParam::PulseWidth, None)]
    #[case("CH2_on_time_min", PulseParam::PulseWidth, Some(TimeUnit::Minutes))]
    #[case("CH1_DutyCycle", PulseParam::DutyCycle, None)]
    #[case("CH1_duty_cycle", PulseParam::DutyCycle, None)]
    #[case("CH1_Hz", PulseParam::Frequency, None)]
    #[case("CH1_f", PulseParam::Frequency, None)]
    fn pulse_synonyms(
        #[case] header: &str,
        #[case] param: PulseParam,
        #[case] unit: Option<TimeUnit>,
    ) {
        let spec = parse_header(3, header).unwrap();
        assert_eq!(spec.kind, ColumnKind::Pulse { param, unit });
    }

    #[test]
    fn capital_t_seconds_is_period_times_thousand() {
        let spec = parse_header(3, "CH1_T_s").unwrap();
        assert_eq!(spec.canonical_name(), "CH1_period");
        assert_eq!(spec.to_millis(), Some(1000));
    }

    #[test]
    fn lowercase_t_is_ambiguous() {
        let err = parse_header(5, "CH2_t_s").unwrap_err();
        assert!(matches!(err, LightError::Format(ref m) if m.contains("CH2_t_s")));
    }

    #[rstest]
    #[case("CH1_time_s", TimeUnit::Seconds)]
    #[case("CH1_time_msec", TimeUnit::Millis)]
    #[case("CH4_time_minutes", TimeUnit::Minutes)]
    #[case("CH1_time_hr", TimeUnit::Hours)]
    #[case("CH1_Time_S", TimeUnit::Seconds)]
    fn elapsed_time_units(#[case] header: &str, #[case] unit: TimeUnit) {
        assert_eq!(parse_header(2, header).unwrap().kind, ColumnKind::Time(unit));
    }

    #[rstest]
    #[case("CH1_time_days")]
    #[case("CH1_time")]
    #[case("CH1_frequency_s")]
    fn rejected_headers(#[case] header: &str) {
        assert!(matches!(parse_header(2, header), Err(LightError::Format(_))));
    }

    #[rstest]
    #[case("Sections", None)]
    #[case("CHx_status", None)]
    #[case("CH1_voltage", Some(1))]
    fn unrelated_headers_are_other(#[case] header: &str, #[case] channel: Option<u32>) {
        let spec = parse_header(0, header).unwrap();
        assert_eq!(spec.kind, ColumnKind::Other);
        assert_eq!(spec.channel, channel);
    }
}
