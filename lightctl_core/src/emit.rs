//! Device line commands.
//!
//! ```text
//! PATTERN:<idx>;CH:<n>;STATUS:<s,...>;TIME_MS:<t,...>;REPEATS:<r>[;PULSE:T<p>pw<w>,...,]
//! ```
//!
//! `idx` is the 1-based position of a pattern in its channel's compressed
//! list; `idx = 0` is the wait command that holds the idle level until the
//! channel starts.

use std::fmt;

use crate::compress::CompressedPattern;
use crate::error::{LightError, Result};
use crate::pulse::Pulse;
use crate::timeline::TimelineEntry;
use crate::util::{fmt_ms, parse_non_negative, round_to_device};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternCommand {
    pub index: u32,
    pub channel: u32,
    pub entries: Vec<TimelineEntry>,
    pub repeats: u32,
}

impl PatternCommand {
    pub fn has_pulse(&self) -> bool {
        self.entries.iter().any(TimelineEntry::has_pulse)
    }

    /// Number of slots the device must hold for this command.
    pub fn width(&self) -> usize {
        self.entries.len()
    }

    pub const fn is_wait(&self) -> bool {
        self.index == 0
    }

    /// Parse a command line, as written in text protocols or saved command logs.
    ///
    /// Inline `# ...` comments and all spaces are ignored. `TIME_S`, `TIME_M`
    /// and `TIME_H` are accepted in place of `TIME_MS`.
    pub fn parse(line: &str) -> Result<Self> {
        let body: String = strip_comment(line)
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();
        let err = |msg: String| LightError::Format(format!("command \"{body}\": {msg}"));

        let mut index = None;
        let mut channel = None;
        let mut status: Option<Vec<u8>> = None;
        let mut times: Option<Vec<u32>> = None;
        let mut repeats = None;
        let mut pulses: Option<Vec<Pulse>> = None;

        for part in body.split(';').filter(|p| !p.is_empty()) {
            let Some((key, value)) = part.split_once(':') else {
                return Err(err(format!("\"{part}\" is not KEY:VALUE")));
            };
            match key {
                "PATTERN" => index = Some(parse_int(value, key).map_err(&err)?),
                "CH" => channel = Some(parse_int(value, key).map_err(&err)?),
                "REPEATS" => repeats = Some(parse_int(value, key).map_err(&err)?),
                "STATUS" => {
                    let v = split_list(value)
                        .map(|s| match s {
                            "0" => Ok(0),
                            "1" => Ok(1),
                            other => Err(err(format!("status \"{other}\" must be 0 or 1"))),
                        })
                        .collect::<Result<Vec<u8>>>()?;
                    status = Some(v);
                }
                "TIME_MS" | "TIME_S" | "TIME_M" | "TIME_H" => {
                    if times.is_some() {
                        return Err(err("more than one TIME field".to_string()));
                    }
                    let scale = match key {
                        "TIME_S" => 1_000.0,
                        "TIME_M" => 60_000.0,
                        "TIME_H" => 3_600_000.0,
                        _ => 1.0,
                    };
                    let v = split_list(value)
                        .map(|s| round_to_device(parse_non_negative(s, key)? * scale, key))
                        .collect::<Result<Vec<u32>>>()?;
                    times = Some(v);
                }
                "PULSE" => {
                    let v = split_list(value)
                        .map(|s| parse_pulse_item(s).map_err(&err))
                        .collect::<Result<Vec<Pulse>>>()?;
                    pulses = Some(v);
                }
                other => return Err(err(format!("unknown field \"{other}\""))),
            }
        }

        let index = index.ok_or_else(|| err("missing PATTERN".to_string()))?;
        let channel = channel.ok_or_else(|| err("missing CH".to_string()))?;
        let status = status.ok_or_else(|| err("missing STATUS".to_string()))?;
        let times = times.ok_or_else(|| err("missing TIME_MS".to_string()))?;
        let repeats = repeats.ok_or_else(|| err("missing REPEATS".to_string()))?;

        if channel == 0 {
            return Err(err("channels are numbered from 1".to_string()));
        }
        if repeats == 0 {
            return Err(err("REPEATS must be >= 1".to_string()));
        }
        if status.is_empty() || status.len() != times.len() {
            return Err(err(format!(
                "{} STATUS values but {} TIME values",
                status.len(),
                times.len()
            )));
        }
        let pulses = match pulses {
            Some(p) if !p.is_empty() => {
                if p.len() != status.len() {
                    return Err(err(format!(
                        "{} PULSE values but {} STATUS values",
                        p.len(),
                        status.len()
                    )));
                }
                p
            }
            _ => vec![Pulse::NONE; status.len()],
        };

        let entries = status
            .iter()
            .zip(&times)
            .zip(&pulses)
            .map(|((&s, &t), &p)| TimelineEntry::pulsed(s, t, p))
            .collect();
        Ok(Self {
            index,
            channel,
            entries,
            repeats,
        })
    }
}

fn join<T: fmt::Display>(items: impl Iterator<Item = T>) -> String {
    items.map(|v| v.to_string()).collect::<Vec<_>>().join(",")
}

impl fmt::Display for PatternCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PATTERN:{};CH:{};STATUS:{};TIME_MS:{};REPEATS:{}",
            self.index,
            self.channel,
            join(self.entries.iter().map(|e| e.status)),
            join(self.entries.iter().map(|e| e.time_ms)),
            self.repeats
        )?;
        if self.has_pulse() {
            f.write_str(";PULSE:")?;
            for e in &self.entries {
                write!(f, "T{}pw{},", e.period_ms, e.pulse_width_ms)?;
            }
        }
        Ok(())
    }
}

/// Idle level held until a channel's countdown elapses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitCommand {
    pub channel: u32,
    pub idle: u8,
    pub countdown_ms: u32,
    pub pulse: Pulse,
}

impl From<&WaitCommand> for PatternCommand {
    fn from(w: &WaitCommand) -> Self {
        Self {
            index: 0,
            channel: w.channel,
            entries: vec![TimelineEntry::pulsed(w.idle, w.countdown_ms, w.pulse)],
            repeats: 1,
        }
    }
}

impl fmt::Display for WaitCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        PatternCommand::from(self).fmt(f)
    }
}

/// Turn a channel's compressed patterns into commands, skipping dead ones.
/// Indices keep the pattern's position in the compressed list.
pub fn emit_patterns(channel: u32, patterns: &[CompressedPattern]) -> Vec<PatternCommand> {
    patterns
        .iter()
        .zip(1u32..)
        .filter(|(p, _)| {
            if p.is_dead() {
                tracing::debug!(channel, "skipping dead pattern");
            }
            !p.is_dead()
        })
        .map(|(p, index)| PatternCommand {
            index,
            channel,
            entries: p.pattern.clone(),
            repeats: p.repeats,
        })
        .collect()
}

/// Text before an inline `#` comment.
pub fn strip_comment(line: &str) -> &str {
    line.split_once('#').map_or(line, |(cmd, _)| cmd).trim()
}

fn split_list(value: &str) -> impl Iterator<Item = &str> {
    value.split(',').filter(|s| !s.is_empty())
}

fn parse_int(value: &str, key: &str) -> std::result::Result<u32, String> {
    value
        .parse::<u32>()
        .map_err(|_| format!("{key} \"{value}\" is not a non-negative integer"))
}

fn parse_pulse_item(item: &str) -> std::result::Result<Pulse, String> {
    let bad = || format!("pulse \"{item}\" does not match T<period>pw<width>");
    let rest = item.strip_prefix('T').ok_or_else(bad)?;
    let (period, width) = rest.split_once("pw").ok_or_else(bad)?;
    let all_digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    if !all_digits(period) || !all_digits(width) {
        return Err(bad());
    }
    let period: u32 = period.parse().map_err(|_| bad())?;
    let width: u32 = width.parse().map_err(|_| bad())?;
    if width > period {
        return Err(format!(
            "pulse \"{item}\": width ({width} ms) cannot exceed period ({period} ms)"
        ));
    }
    if (period == 0) != (width == 0) {
        return Err(format!(
            "pulse \"{item}\": period and width must both be zero or both non-zero"
        ));
    }
    Ok(Pulse::new(period, width))
}

fn describe_pulse(e: &TimelineEntry) -> String {
    if !e.has_pulse() {
        return "No pulse".to_string();
    }
    let period = f64::from(e.period_ms);
    let freq = 1000.0 / period;
    let duty = f64::from(e.pulse_width_ms) / period * 100.0;
    format!("{freq:.2}Hz DC={duty:.1}%")
}

impl PatternCommand {
    /// Human-readable summary, e.g.
    /// `Pattern #1, Channel 1, Status: 1 → 0, Time: 1.0s → 1.0s, 2 cycles`.
    pub fn describe(&self) -> String {
        let mut parts = Vec::with_capacity(6);
        parts.push(if self.is_wait() {
            "Wait pattern".to_string()
        } else {
            format!("Pattern #{}", self.index)
        });
        parts.push(format!("Channel {}", self.channel));
        let status: Vec<String> = self.entries.iter().map(|e| e.status.to_string()).collect();
        parts.push(format!("Status: {}", status.join(" → ")));
        let times: Vec<String> = self
            .entries
            .iter()
            .map(|e| fmt_ms(u64::from(e.time_ms)))
            .collect();
        parts.push(format!("Time: {}", times.join(" → ")));
        parts.push(if self.repeats == 1 {
            "1 cycle".to_string()
        } else {
            format!("{} cycles", self.repeats)
        });
        if self.has_pulse() {
            let pulses: Vec<String> = self.entries.iter().map(describe_pulse).collect();
            parts.push(format!("Pulse: {}", pulses.join(" → ")));
        }
        parts.join(", ")
    }
}

/// Describe a raw command line.
pub fn describe_line(line: &str) -> Result<String> {
    PatternCommand::parse(line).map(|c| c.describe())
}

/// `line # description`, the form used in saved command files.
pub fn annotate(cmd: &PatternCommand) -> String {
    format!("{cmd} # {}", cmd.describe())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn cmd(line: &str) -> PatternCommand {
        PatternCommand::parse(line).unwrap()
    }

    #[test]
    fn pulse_clause_lists_every_slot_with_trailing_comma() {
        let c = PatternCommand {
            index: 2,
            channel: 3,
            entries: vec![
                TimelineEntry::pulsed(1, 10_000, Pulse::new(1000, 100)),
                TimelineEntry::new(0, 5_000),
            ],
            repeats: 4,
        };
        assert_eq!(
            c.to_string(),
            "PATTERN:2;CH:3;STATUS:1,0;TIME_MS:10000,5000;REPEATS:4;PULSE:T1000pw100,T0pw0,"
        );
        assert_eq!(cmd(&c.to_string()), c);
    }

    #[test]
    fn wait_line_format() {
        let w = WaitCommand {
            channel: 1,
            idle: 1,
            countdown_ms: 5000,
            pulse: Pulse::NONE,
        };
        assert_eq!(w.to_string(), "PATTERN:0;CH:1;STATUS:1;TIME_MS:5000;REPEATS:1");
        let pw = WaitCommand {
            pulse: Pulse::new(500, 50),
            ..w
        };
        assert_eq!(
            pw.to_string(),
            "PATTERN:0;CH:1;STATUS:1;TIME_MS:5000;REPEATS:1;PULSE:T500pw50,"
        );
    }

    #[test]
    fn time_units_spaces_and_comments() {
        let c = cmd("PATTERN: 1; CH: 2; STATUS: 1,0; TIME_S: 1.5,2; REPEATS: 3 # Pattern #1");
        assert_eq!(
            c.entries,
            vec![TimelineEntry::new(1, 1500), TimelineEntry::new(0, 2000)]
        );
        assert_eq!(cmd("PATTERN:1;CH:1;STATUS:1;TIME_M:2;REPEATS:1").entries[0].time_ms, 120_000);
        assert_eq!(cmd("PATTERN:1;CH:1;STATUS:1;TIME_H:1;REPEATS:1").entries[0].time_ms, 3_600_000);
    }

    #[rstest]
    #[case("PATTERN:1;CH:1;STATUS:1,0;TIME_MS:1000;REPEATS:1")]
    #[case("PATTERN:1;CH:1;STATUS:2;TIME_MS:1000;REPEATS:1")]
    #[case("PATTERN:1;CH:1;STATUS:1;TIME_MS:1000;REPEATS:0")]
    #[case("PATTERN:1;CH:0;STATUS:1;TIME_MS:1000;REPEATS:1")]
    #[case("PATTERN:1;CH:1;STATUS:1;TIME_MS:1000")]
    #[case("PATTERN:1;CH:1;STATUS:1;TIME_MS:1000;REPEATS:1;PULSE:P100w10,")]
    #[case("PATTERN:1;CH:1;STATUS:1;TIME_MS:1000;REPEATS:1;PULSE:T10pw100,")]
    #[case("PATTERN:1;CH:1;STATUS:1,1;TIME_MS:1,1;REPEATS:1;PULSE:T10pw1,")]
    #[case("PATTERN:1;CH:1;STATUS:1;TIME_MS:1000;REPEATS:1;COLOR:red")]
    fn malformed_lines_are_format_errors(#[case] line: &str) {
        assert!(matches!(PatternCommand::parse(line), Err(LightError::Format(_))));
    }

    #[test]
    fn describe_matches_saved_file_comments() {
        let c = cmd("PATTERN:1;CH:1;STATUS:1,0;TIME_MS:1000,1000;REPEATS:2");
        assert_eq!(
            annotate(&c),
            "PATTERN:1;CH:1;STATUS:1,0;TIME_MS:1000,1000;REPEATS:2 # Pattern #1, Channel 1, Status: 1 → 0, Time: 1.0s → 1.0s, 2 cycles"
        );
        assert_eq!(
            describe_line("PATTERN:0;CH:2;STATUS:0;TIME_MS:500;REPEATS:1;PULSE:T1000pw100,").unwrap(),
            "Wait pattern, Channel 2, Status: 0, Time: 500ms, 1 cycle, Pulse: 1.00Hz DC=10.0%"
        );
    }

    #[test]
    fn dead_patterns_are_skipped_but_keep_numbering() {
        let patterns = vec![
            CompressedPattern {
                pattern: vec![TimelineEntry::new(0, 0)],
                repeats: 1,
            },
            CompressedPattern {
                pattern: vec![TimelineEntry::new(1, 10)],
                repeats: 2,
            },
        ];
        let cmds = emit_patterns(4, &patterns);
        assert_eq!(cmds.len(), 1);
        assert_eq!(cmds[0].index, 2);
        assert_eq!(cmds[0].channel, 4);
    }
}
