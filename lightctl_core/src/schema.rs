//! Channel layout inference and validation for protocol tables.
//!
//! Layout: one row-elapsed column, then `N` contiguous channel groups of
//! `CH{i}_status`, `CH{i}_time_{unit}` and, when the table carries pulse
//! parameters, the same number of pulse columns as channel 1 has.

use lightctl_config::RawTable;

use crate::error::{LightError, Result};
use crate::units::{ColumnKind, ColumnSpec, TimeUnit, parse_headers};

/// Column positions of one channel group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelColumns {
    pub channel: u32,
    pub status: usize,
    pub time: usize,
    pub unit: TimeUnit,
    /// Pulse parameter columns of this channel, in table order.
    pub pulse: Vec<ColumnSpec>,
    /// Number of populated status (and time) cells.
    pub populated: usize,
}

impl ChannelColumns {
    pub const fn is_active(&self) -> bool {
        self.populated > 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub columns: Vec<ColumnSpec>,
    pub channels: Vec<ChannelColumns>,
    pub columns_per_channel: usize,
    pub has_pulse: bool,
}

impl TableSchema {
    pub fn active_channels(&self) -> impl Iterator<Item = &ChannelColumns> {
        self.channels.iter().filter(|c| c.is_active())
    }
}

/// Reject columns with a leading empty run followed by data, or an empty run
/// between populated cells. All offending columns are reported together.
pub fn check_data_gaps(table: &RawTable) -> Result<()> {
    let mut columns = Vec::new();
    for (idx, header) in table.headers.iter().enumerate() {
        let cells: Vec<bool> = table.column(idx).map(|c| c.is_some()).collect();
        let Some(first) = cells.iter().position(|&p| p) else {
            continue;
        };
        let last = cells.iter().rposition(|&p| p).unwrap_or(first);
        if first != 0 || cells[first..=last].iter().any(|&p| !p) {
            columns.push(header.clone());
        }
    }
    if columns.is_empty() {
        Ok(())
    } else {
        Err(LightError::DataGap { columns })
    }
}

fn schema_err(index: usize, header: &str, expected: &str) -> LightError {
    LightError::Schema(format!(
        "column {index} \"{header}\" does not match the expected form \"{expected}\""
    ))
}

/// Infer and validate the channel layout of a protocol table.
pub fn validate(table: &RawTable) -> Result<TableSchema> {
    check_data_gaps(table)?;
    let columns = parse_headers(&table.headers)?;

    let has_pulse = columns
        .iter()
        .any(|c| matches!(c.kind, ColumnKind::Pulse { .. }));
    let ch1_pulse = columns
        .iter()
        .filter(|c| c.channel == Some(1) && matches!(c.kind, ColumnKind::Pulse { .. }))
        .count();
    let per = 2 + ch1_pulse;

    let channel_cols = columns.len().saturating_sub(1);
    if channel_cols == 0 {
        return Err(LightError::Schema(
            "the table has no channel columns after the row-elapsed column".to_string(),
        ));
    }
    if channel_cols % per != 0 {
        let pulse_note = if has_pulse {
            format!(", plus {ch1_pulse} pulse parameters")
        } else {
            String::new()
        };
        return Err(LightError::Schema(format!(
            "{channel_cols} channel columns cannot be split into groups of {per} (status, time{pulse_note})"
        )));
    }

    let n = channel_cols / per;
    let mut channels = Vec::with_capacity(n);
    for i in 0..n {
        let ch = u32::try_from(i + 1)
            .map_err(|_| LightError::Schema(format!("too many channels ({n})")))?;
        let base = 1 + i * per;

        let status = &columns[base];
        if status.channel != Some(ch) || status.kind != ColumnKind::Status {
            return Err(schema_err(base, &status.header, &format!("CH{ch}_status")));
        }
        let time = &columns[base + 1];
        let unit = match (time.channel, time.kind) {
            (Some(c), ColumnKind::Time(u)) if c == ch => u,
            _ => {
                return Err(schema_err(
                    base + 1,
                    &time.header,
                    &format!("CH{ch}_time_[unit]"),
                ));
            }
        };

        let mut pulse = Vec::with_capacity(per - 2);
        for spec in &columns[base + 2..base + per] {
            if spec.channel != Some(ch) {
                return Err(LightError::Schema(format!(
                    "column {} \"{}\" does not belong to channel CH{ch}",
                    spec.index, spec.header
                )));
            }
            if !matches!(spec.kind, ColumnKind::Pulse { .. }) {
                return Err(LightError::Schema(format!(
                    "column {} \"{}\" is not a recognized pulse parameter (expected CH{ch}_period, CH{ch}_pulse_width, CH{ch}_frequency or CH{ch}_duty_cycle)",
                    spec.index, spec.header
                )));
            }
            if pulse.iter().any(|p: &ColumnSpec| p.param() == spec.param()) {
                return Err(LightError::Schema(format!(
                    "column {} \"{}\" repeats a pulse parameter of CH{ch}",
                    spec.index, spec.header
                )));
            }
            pulse.push(spec.clone());
        }

        let populated = table.column(base).filter(Option::is_some).count();
        let time_populated = table.column(base + 1).filter(Option::is_some).count();
        if populated != time_populated {
            return Err(LightError::Schema(format!(
                "channel CH{ch} has {populated} status values but {time_populated} time values"
            )));
        }
        if populated == 0 {
            tracing::info!(channel = ch, "channel is empty and stays inactive");
        }

        channels.push(ChannelColumns {
            channel: ch,
            status: base,
            time: base + 1,
            unit,
            pulse,
            populated,
        });
    }

    Ok(TableSchema {
        columns,
        channels,
        columns_per_channel: per,
        has_pulse,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_channels_without_pulse() {
        let t = RawTable::from_rows(
            &["Sections", "CH1_status", "CH1_time_s", "CH2_status", "CH2_time_ms"],
            &[&["1", "1", "10", "", ""], &["2", "0", "10", "", ""]],
        );
        let s = validate(&t).unwrap();
        assert_eq!(s.columns_per_channel, 2);
        assert_eq!(s.channels.len(), 2);
        assert_eq!(s.channels[0].unit, TimeUnit::Seconds);
        assert_eq!(s.channels[0].populated, 2);
        assert!(!s.channels[1].is_active());
        assert_eq!(s.active_channels().count(), 1);
    }

    #[test]
    fn leading_and_embedded_gaps_are_reported_together() {
        let t = RawTable::from_rows(
            &["Sections", "CH1_status", "CH1_time_s", "CH2_status", "CH2_time_s"],
            &[
                &["1", "1", "10", "", "5"],
                &["2", "", "10", "1", "5"],
                &["3", "1", "10", "0", "5"],
            ],
        );
        match validate(&t).unwrap_err() {
            LightError::DataGap { columns } => {
                assert_eq!(columns, vec!["CH1_status", "CH2_status"]);
            }
            e => panic!("unexpected {e:?}"),
        }
    }

    #[test]
    fn trailing_empty_cells_are_not_a_gap() {
        let t = RawTable::from_rows(
            &["Sections", "CH1_status", "CH1_time_s"],
            &[&["1", "1", "10"], &["2", "", ""]],
        );
        assert!(check_data_gaps(&t).is_ok());
    }

    #[test]
    fn mismatched_group_width() {
        let t = RawTable::from_rows(
            &["Sections", "CH1_status", "CH1_time_s", "CH2_status"],
            &[&["1", "1", "10", "0"]],
        );
        assert!(matches!(validate(&t), Err(LightError::Schema(_))));
    }

    #[test]
    fn out_of_order_channel_names_the_column() {
        let t = RawTable::from_rows(
            &["Sections", "CH1_status", "CH1_time_s", "CH3_status", "CH3_time_s"],
            &[&["1", "1", "10", "1", "10"]],
        );
        let err = validate(&t).unwrap_err();
        assert!(
            matches!(err, LightError::Schema(ref m) if m.contains("column 3") && m.contains("CH3_status") && m.contains("CH2_status"))
        );
    }

    #[test]
    fn pulse_columns_must_belong_to_the_channel() {
        let t = RawTable::from_rows(
            &[
                "Sections",
                "CH1_status",
                "CH1_time_s",
                "CH1_period",
                "CH1_pw",
                "CH2_status",
                "CH2_time_s",
                "CH1_period",
                "CH2_pw",
            ],
            &[&["1", "1", "10", "", "", "1", "10", "", ""]],
        );
        let err = validate(&t).unwrap_err();
        assert!(matches!(err, LightError::Schema(ref m) if m.contains("does not belong")));
    }

    #[test]
    fn unrecognized_pulse_parameter() {
        let t = RawTable::from_rows(
            &["Sections", "CH1_status", "CH1_time_s", "CH1_period", "CH1_voltage"],
            &[&["1", "1", "10", "", ""]],
        );
        let err = validate(&t).unwrap_err();
        assert!(matches!(err, LightError::Schema(ref m) if m.contains("not a recognized pulse parameter")));
    }

    #[test]
    fn status_and_time_lengths_must_agree() {
        let t = RawTable::from_rows(
            &["Sections", "CH1_status", "CH1_time_s"],
            &[&["1", "1", "10"], &["2", "0", ""]],
        );
        assert!(matches!(validate(&t), Err(LightError::Schema(_))));
    }

    #[test]
    fn three_column_groups_with_one_pulse_parameter() {
        let t = RawTable::from_rows(
            &[
                "Sections",
                "CH1_status",
                "CH1_time_s",
                "CH1_freq",
                "CH2_status",
                "CH2_time_s",
                "CH2_freq",
            ],
            &[&["1", "1", "10", "", "1", "10", ""]],
        );
        // A single pulse parameter per channel is accepted by the layout;
        // the pulse resolver rejects rows that actually use it alone.
        let s = validate(&t).unwrap();
        assert_eq!(s.columns_per_channel, 3);
        assert!(s.has_pulse);
    }
}
