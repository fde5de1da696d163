//! Canonical per-channel timelines built from a validated protocol table.

use lightctl_config::RawTable;

use crate::error::{LightError, Result};
use crate::pulse::{self, Pulse, PulseInputs};
use crate::schema::{ChannelColumns, TableSchema};
use crate::units::{ColumnSpec, PulseParam};
use crate::util::{parse_non_negative, round_to_device};

/// One state of a channel: logic level held for `time_ms`, optionally pulsed.
///
/// Invariants: `pulse_width_ms <= period_ms`, and `period_ms == 0` exactly
/// when `pulse_width_ms == 0`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct TimelineEntry {
    pub status: u8,
    pub time_ms: u32,
    pub period_ms: u32,
    pub pulse_width_ms: u32,
}

impl TimelineEntry {
    pub const fn new(status: u8, time_ms: u32) -> Self {
        Self {
            status,
            time_ms,
            period_ms: 0,
            pulse_width_ms: 0,
        }
    }

    pub const fn pulsed(status: u8, time_ms: u32, pulse: Pulse) -> Self {
        Self {
            status,
            time_ms,
            period_ms: pulse.period_ms,
            pulse_width_ms: pulse.pulse_width_ms,
        }
    }

    pub const fn pulse(&self) -> Pulse {
        Pulse::new(self.period_ms, self.pulse_width_ms)
    }

    pub const fn has_pulse(&self) -> bool {
        self.period_ms != 0 || self.pulse_width_ms != 0
    }

    /// A zero-length off state carries no information for the device.
    pub const fn is_dead(&self) -> bool {
        self.status == 0 && self.time_ms == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelTimeline {
    pub channel: u32,
    pub entries: Vec<TimelineEntry>,
}

impl ChannelTimeline {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn has_pulse(&self) -> bool {
        self.entries.iter().any(TimelineEntry::has_pulse)
    }

    /// Total duration of the timeline in milliseconds.
    pub fn total_ms(&self) -> u64 {
        self.entries.iter().map(|e| u64::from(e.time_ms)).sum()
    }
}

// Spreadsheet row number: header is row 1, first data row is row 2.
fn at(header: &str, row: usize) -> String {
    format!("column \"{header}\" row {}", row + 2)
}

fn cell<'a>(table: &'a RawTable, row: usize, col: usize) -> Option<&'a str> {
    table.rows.get(row).and_then(|r| r.get(col)).and_then(|c| c.as_deref())
}

fn parse_status(raw: &str, at: &str) -> Result<u8> {
    let v = parse_non_negative(raw, at)?;
    if v == 0.0 {
        Ok(0)
    } else if v == 1.0 {
        Ok(1)
    } else {
        Err(LightError::Format(format!(
            "{at}: status must be 0 or 1, got \"{raw}\""
        )))
    }
}

fn pulse_inputs(
    table: &RawTable,
    row: usize,
    columns: &[ColumnSpec],
) -> Result<PulseInputs> {
    let mut inputs = PulseInputs::default();
    for spec in columns {
        let Some(raw) = cell(table, row, spec.index) else {
            continue;
        };
        let loc = at(&spec.header, row);
        match spec.param() {
            Some(PulseParam::DutyCycle) => inputs.duty_pct = pulse::parse_duty(raw, &loc)?,
            Some(PulseParam::Frequency) => {
                inputs.frequency_hz = parse_non_negative(raw, &loc)?;
            }
            Some(PulseParam::Period) => {
                let scale = spec.to_millis().unwrap_or(1) as f64;
                inputs.period_ms = parse_non_negative(raw, &loc)? * scale;
            }
            Some(PulseParam::PulseWidth) => {
                let scale = spec.to_millis().unwrap_or(1) as f64;
                inputs.pulse_width_ms = parse_non_negative(raw, &loc)? * scale;
            }
            None => {}
        }
    }
    Ok(inputs)
}

fn build_channel(table: &RawTable, ch: &ChannelColumns, headers: &[String]) -> Result<ChannelTimeline> {
    let status_header = &headers[ch.status];
    let time_header = &headers[ch.time];
    let scale = ch.unit.millis() as f64;
    let mut entries = Vec::with_capacity(ch.populated);

    for row in 0..ch.populated {
        let status = match cell(table, row, ch.status) {
            Some(raw) => parse_status(raw, &at(status_header, row))?,
            None => 0,
        };
        let time_ms = match cell(table, row, ch.time) {
            Some(raw) => {
                let loc = at(time_header, row);
                round_to_device(parse_non_negative(raw, &loc)? * scale, &loc)?
            }
            None => 0,
        };
        let pulse = if ch.pulse.is_empty() {
            Pulse::NONE
        } else {
            let loc = format!("CH{} row {}", ch.channel, row + 2);
            pulse::resolve(pulse_inputs(table, row, &ch.pulse)?, &loc)?
        };
        entries.push(TimelineEntry::pulsed(status, time_ms, pulse));
    }

    Ok(ChannelTimeline {
        channel: ch.channel,
        entries,
    })
}

/// Build one timeline per channel (empty channels yield empty timelines).
pub fn build(table: &RawTable, schema: &TableSchema) -> Result<Vec<ChannelTimeline>> {
    let timelines = schema
        .channels
        .iter()
        .map(|ch| build_channel(table, ch, &table.headers))
        .collect::<Result<Vec<_>>>()?;
    for tl in &timelines {
        tracing::debug!(
            channel = tl.channel,
            states = tl.entries.len(),
            total_ms = tl.total_ms(),
            pulsed = tl.has_pulse(),
            "timeline built"
        );
    }
    Ok(timelines)
}
