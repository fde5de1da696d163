//! Channel start times and idle levels.
//!
//! A start cell is either a countdown in seconds or a wall-clock deadline
//! (`HH:MM`, `HH:MM:SS` today, or a full `YYYY-MM-DD HH:MM[:SS]`). Until its
//! start, each channel holds its idle level, optionally pulsed.

use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use lightctl_config::RawTable;

use crate::error::{LightError, Result};
use crate::pulse::Pulse;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StartSpec {
    /// Seconds from the moment the program is compiled.
    Countdown(f64),
    Deadline(NaiveDateTime),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelStart {
    pub start: StartSpec,
    pub idle: u8,
    pub pulse: Pulse,
}

/// Start configuration of every channel that has one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StartPlan {
    pub channels: BTreeMap<u32, ChannelStart>,
}

/// A channel's wait, resolved against "now".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedWait {
    pub channel: u32,
    pub idle: u8,
    pub countdown_ms: u64,
    pub pulse: Pulse,
}

/// `CH12` -> 12. Only the exact `CH<digits>` form is a channel name.
pub fn channel_from_name(name: &str) -> Option<u32> {
    let digits = name.trim().strip_prefix("CH")?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok().filter(|&n| n > 0)
}

fn list(channels: &[u32]) -> String {
    channels
        .iter()
        .map(|c| format!("CH{c}"))
        .collect::<Vec<_>>()
        .join(", ")
}

const DATETIME_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
];

/// Parse a start cell. `today` anchors time-of-day values.
pub fn parse_start_cell(raw: &str, today: NaiveDate) -> Result<StartSpec> {
    let s = raw.trim();
    if let Ok(secs) = s.parse::<f64>() {
        if !secs.is_finite() || secs < 0.0 {
            return Err(LightError::StartTime(format!(
                "countdown \"{raw}\" must be a non-negative number of seconds"
            )));
        }
        return Ok(StartSpec::Countdown(secs));
    }
    for fmt in ["%H:%M:%S", "%H:%M"] {
        if let Ok(t) = NaiveTime::parse_from_str(s, fmt) {
            return Ok(StartSpec::Deadline(today.and_time(t)));
        }
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(StartSpec::Deadline(dt));
        }
    }
    Err(LightError::StartTime(format!(
        "start time \"{raw}\" is not recognized; use seconds, HH:MM[:SS] or YYYY-MM-DD HH:MM[:SS]"
    )))
}

/// Wait-status cell: any non-zero number is level 1.
pub fn parse_wait_cell(raw: &str, at: &str) -> Result<u8> {
    let v = raw
        .trim()
        .parse::<f64>()
        .map_err(|_| LightError::StartTime(format!("{at}: wait status \"{raw}\" is not a number")))?;
    Ok(u8::from(v != 0.0))
}

fn normalize(header: &str) -> String {
    header
        .to_ascii_lowercase()
        .chars()
        .filter(|c| *c != '_' && !c.is_whitespace())
        .collect()
}

struct ColumnLayout {
    channels: usize,
    start: usize,
    wait: usize,
}

fn detect_column_layout(table: &RawTable) -> Option<ColumnLayout> {
    let mut channels = None;
    let mut start = None;
    let mut wait = None;
    for (i, h) in table.headers.iter().enumerate() {
        match normalize(h).as_str() {
            "channels" => channels = Some(i),
            "starttime" | "start" => start = Some(i),
            "waitstatus" | "wait" => wait = Some(i),
            _ => {}
        }
    }
    Some(ColumnLayout {
        channels: channels?,
        start: start?,
        wait: wait?,
    })
}

type RawStart<'a> = (u32, Option<&'a str>, Option<&'a str>);

fn column_layout_cells<'a>(table: &'a RawTable, layout: &ColumnLayout) -> Result<Vec<RawStart<'a>>> {
    let mut out = Vec::new();
    for row in &table.rows {
        let cell = |i: usize| row.get(i).and_then(|c| c.as_deref());
        let Some(name) = cell(layout.channels) else {
            continue;
        };
        let ch = channel_from_name(name).ok_or_else(|| {
            LightError::StartTime(format!(
                "channel name \"{name}\" does not match CH<number> (CH1, CH2, ...)"
            ))
        })?;
        out.push((ch, cell(layout.start), cell(layout.wait)));
    }
    Ok(out)
}

fn row_layout_cells(table: &RawTable) -> Result<Vec<RawStart<'_>>> {
    if table.height() != 2 {
        return Err(LightError::StartTime(format!(
            "the start-time table needs exactly two rows (start time, wait status), found {}",
            table.height()
        )));
    }
    let out: Vec<RawStart<'_>> = table
        .headers
        .iter()
        .enumerate()
        .filter_map(|(i, h)| channel_from_name(h).map(|ch| (i, ch)))
        .map(|(i, ch)| {
            let mut col = table.column(i);
            let start = col.next().flatten();
            let wait = col.next().flatten();
            (ch, start, wait)
        })
        .collect();
    if out.is_empty() {
        return Err(LightError::StartTime(format!(
            "no channel columns (CH1, CH2, ...) in the start-time table; headers: {:?}",
            table.headers
        )));
    }
    Ok(out)
}

/// Read a start-time table in either layout:
///
/// - rows: headers `CH1, CH2, ...`, first row start times, second row wait status;
/// - columns: `Channels | Start_time | Wait_status`, one row per channel.
pub fn parse_start_table(table: &RawTable, today: NaiveDate) -> Result<StartPlan> {
    let cells = match detect_column_layout(table) {
        Some(layout) => {
            tracing::debug!("start-time table uses the column layout");
            column_layout_cells(table, &layout)?
        }
        None => row_layout_cells(table)?,
    };

    let mut plan = StartPlan::default();
    let mut incomplete = Vec::new();
    for (ch, start, wait) in cells {
        match (start, wait) {
            (Some(start), Some(wait)) => {
                let start = parse_start_cell(start, today)
                    .map_err(|e| LightError::StartTime(format!("CH{ch}: {}", strip_kind(&e))))?;
                let idle = parse_wait_cell(wait, &format!("CH{ch}"))?;
                plan.channels.insert(
                    ch,
                    ChannelStart {
                        start,
                        idle,
                        pulse: Pulse::NONE,
                    },
                );
            }
            (None, None) => {}
            _ => incomplete.push(ch),
        }
    }
    if !incomplete.is_empty() {
        return Err(LightError::StartTime(format!(
            "a channel needs both or neither start time and wait status: {}",
            list(&incomplete)
        )));
    }
    Ok(plan)
}

fn strip_kind(e: &LightError) -> String {
    match e {
        LightError::StartTime(m) => m.clone(),
        other => other.to_string(),
    }
}

impl StartPlan {
    /// Resolve the waits of `active` channels against `now`.
    ///
    /// Every active channel needs a start, and no deadline may lie in the past.
    pub fn resolve(&self, active: &[u32], now: NaiveDateTime) -> Result<Vec<ResolvedWait>> {
        let missing: Vec<u32> = active
            .iter()
            .copied()
            .filter(|ch| !self.channels.contains_key(ch))
            .collect();
        if !missing.is_empty() {
            return Err(LightError::StartTime(format!(
                "start time is missing for {}",
                list(&missing)
            )));
        }

        let mut past = Vec::new();
        let mut waits = Vec::with_capacity(active.len());
        for &ch in active {
            let Some(cs) = self.channels.get(&ch) else {
                continue;
            };
            let countdown_ms = match cs.start {
                // Truncating, like the deadline difference below. Rounding to
                // microseconds first absorbs decimal-to-float noise.
                StartSpec::Countdown(secs) => ((secs * 1_000_000.0).round() / 1000.0) as u64,
                StartSpec::Deadline(at) => {
                    let ms = (at - now).num_milliseconds();
                    if ms < 0 {
                        past.push(ch);
                        continue;
                    }
                    ms.unsigned_abs()
                }
            };
            waits.push(ResolvedWait {
                channel: ch,
                idle: cs.idle,
                countdown_ms,
                pulse: cs.pulse,
            });
        }
        if !past.is_empty() {
            return Err(LightError::StartTime(format!(
                "start time is earlier than now for {}",
                list(&past)
            )));
        }
        for w in &waits {
            tracing::debug!(channel = w.channel, countdown_ms = w.countdown_ms, idle = w.idle, "wait resolved");
        }
        Ok(waits)
    }

    /// Channels whose countdown is given in seconds rather than a deadline.
    pub fn countdown_channels(&self) -> Vec<u32> {
        self.channels
            .iter()
            .filter(|(_, c)| matches!(c.start, StartSpec::Countdown(_)))
            .map(|(ch, _)| *ch)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 14).unwrap()
    }

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        day().and_hms_opt(h, m, s).unwrap()
    }

    #[test]
    fn start_cells() {
        assert_eq!(parse_start_cell("90", day()).unwrap(), StartSpec::Countdown(90.0));
        assert_eq!(parse_start_cell("10:30", day()).unwrap(), StartSpec::Deadline(at(10, 30, 0)));
        assert_eq!(
            parse_start_cell("10:30:15", day()).unwrap(),
            StartSpec::Deadline(at(10, 30, 15))
        );
        assert_eq!(
            parse_start_cell("2025-03-15 08:00", day()).unwrap(),
            StartSpec::Deadline(NaiveDate::from_ymd_opt(2025, 3, 15).unwrap().and_hms_opt(8, 0, 0).unwrap())
        );
        assert!(matches!(parse_start_cell("soon", day()), Err(LightError::StartTime(_))));
        assert!(matches!(parse_start_cell("-5", day()), Err(LightError::StartTime(_))));
    }

    #[test]
    fn row_layout() {
        let t = RawTable::from_rows(
            &["", "CH1", "CH2", "CH3", "note"],
            &[&["start", "10", "12:00", "", "x"], &["wait", "1", "0", "", ""]],
        );
        let plan = parse_start_table(&t, day()).unwrap();
        assert_eq!(plan.channels.len(), 2);
        assert_eq!(plan.channels[&1].start, StartSpec::Countdown(10.0));
        assert_eq!(plan.channels[&1].idle, 1);
        assert_eq!(plan.channels[&2].start, StartSpec::Deadline(at(12, 0, 0)));
        assert_eq!(plan.countdown_channels(), vec![1]);
    }

    #[test]
    fn column_layout_with_loose_headers() {
        let t = RawTable::from_rows(
            &["Channels", "Start Time", "wait_status"],
            &[&["CH1", "5", "0"], &["CH2", "7.5", "2"], &["", "", ""]],
        );
        let plan = parse_start_table(&t, day()).unwrap();
        assert_eq!(plan.channels[&2].start, StartSpec::Countdown(7.5));
        assert_eq!(plan.channels[&2].idle, 1);
    }

    #[test]
    fn column_layout_rejects_bad_channel_names() {
        let t = RawTable::from_rows(&["Channels", "Start", "Wait"], &[&["Ch1", "5", "0"]]);
        assert!(matches!(parse_start_table(&t, day()), Err(LightError::StartTime(_))));
    }

    #[test]
    fn start_without_wait_is_incomplete() {
        let t = RawTable::from_rows(&["", "CH1", "CH2"], &[&["start", "10", "5"], &["wait", "1", ""]]);
        let err = parse_start_table(&t, day()).unwrap_err();
        assert!(matches!(err, LightError::StartTime(ref m) if m.contains("CH2")));
    }

    #[test]
    fn row_layout_needs_two_rows() {
        let t = RawTable::from_rows(&["", "CH1"], &[&["start", "10"]]);
        assert!(matches!(parse_start_table(&t, day()), Err(LightError::StartTime(_))));
    }

    #[test]
    fn resolve_countdowns_and_deadlines() {
        let t = RawTable::from_rows(
            &["", "CH1", "CH2"],
            &[&["start", "1.2345", "10:00:30"], &["wait", "0", "1"]],
        );
        let plan = parse_start_table(&t, day()).unwrap();
        let waits = plan.resolve(&[1, 2], at(10, 0, 0)).unwrap();
        assert_eq!(waits[0].countdown_ms, 1234);
        assert_eq!(waits[1].countdown_ms, 30_000);
        assert_eq!(waits[1].idle, 1);
    }

    #[test]
    fn resolve_reports_missing_and_past() {
        let t = RawTable::from_rows(&["", "CH1"], &[&["start", "09:00"], &["wait", "0"]]);
        let plan = parse_start_table(&t, day()).unwrap();
        let err = plan.resolve(&[1, 2], at(10, 0, 0)).unwrap_err();
        assert!(matches!(err, LightError::StartTime(ref m) if m.contains("missing") && m.contains("CH2")));
        let err = plan.resolve(&[1], at(10, 0, 0)).unwrap_err();
        assert!(matches!(err, LightError::StartTime(ref m) if m.contains("earlier") && m.contains("CH1")));
    }
}
