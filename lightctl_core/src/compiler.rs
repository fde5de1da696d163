//! Protocol compilation: normalize, resolve, validate, build, correct,
//! compress, emit.
//!
//! Compilation either succeeds completely or fails before anything is sent.

use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveDateTime};
use lightctl_config::RawTable;

use crate::compress::{LengthReport, candidate_set, choose_pattern_length, compress};
use crate::correct::{check_factor, correct_countdown, correct_entry, correct_timeline};
use crate::device::Requirements;
use crate::emit::{PatternCommand, WaitCommand, annotate, emit_patterns};
use crate::error::Result;
use crate::pulse::Pulse;
use crate::schema;
use crate::start::{ResolvedWait, StartPlan, parse_start_table};
use crate::timeline::{self, ChannelTimeline, TimelineEntry};
use crate::txt::{TextProtocol, parse_text_protocol};
use crate::util::{drift_per_12h_s, fmt_ms};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileOptions {
    pub pattern_length: usize,
    pub candidate_lengths: Vec<usize>,
    /// Use the most compact candidate instead of `pattern_length`.
    pub auto_pattern_length: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            pattern_length: 2,
            candidate_lengths: vec![2, 4, 8],
            auto_pattern_length: false,
        }
    }
}

/// A protocol read from a table pair (protocol + start time).
#[derive(Debug, Clone, PartialEq)]
pub struct TableProtocol {
    pub timelines: Vec<ChannelTimeline>,
    pub start: StartPlan,
    /// Columns removed during ingestion.
    pub dropped: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Protocol {
    Table(TableProtocol),
    Text(TextProtocol),
}

impl Protocol {
    pub fn from_tables(protocol: &RawTable, start: &RawTable, today: NaiveDate) -> Result<Self> {
        for col in &protocol.dropped {
            tracing::info!(column = %col, "removed unnamed column from the protocol table");
        }
        let schema = schema::validate(protocol)?;
        let timelines = timeline::build(protocol, &schema)?;
        let start = parse_start_table(start, today)?;
        tracing::info!(
            channels = timelines.len(),
            active = schema.active_channels().count(),
            pulse = schema.has_pulse,
            "protocol table loaded"
        );
        Ok(Self::Table(TableProtocol {
            timelines,
            start,
            dropped: protocol.dropped.clone(),
        }))
    }

    pub fn from_text(src: &str, today: NaiveDate) -> Result<Self> {
        let p = parse_text_protocol(src, today)?;
        tracing::info!(commands = p.commands.len(), channels = ?p.active_channels(), "text protocol loaded");
        Ok(Self::Text(p))
    }

    /// Channels with something to play, ascending.
    pub fn active_channels(&self) -> Vec<u32> {
        match self {
            Self::Table(t) => t
                .timelines
                .iter()
                .filter(|tl| !tl.is_empty())
                .map(|tl| tl.channel)
                .collect(),
            Self::Text(t) => t.active_channels(),
        }
    }

    /// All channels the protocol names, active or not.
    pub fn total_channels(&self) -> usize {
        match self {
            Self::Table(t) => t.timelines.len(),
            Self::Text(t) => {
                let mut chans = t.active_channels();
                chans.extend(t.start.channels.keys().copied());
                chans.sort_unstable();
                chans.dedup();
                chans.len()
            }
        }
    }

    pub fn override_factor(&self) -> Option<f64> {
        match self {
            Self::Table(_) => None,
            Self::Text(t) => t.override_factor,
        }
    }

    pub fn requires_pulse(&self) -> bool {
        match self {
            Self::Table(t) => {
                t.timelines.iter().any(ChannelTimeline::has_pulse)
                    || t.start.channels.values().any(|c| !c.pulse.is_none())
            }
            Self::Text(t) => t.requires_pulse(),
        }
    }

    pub const fn start_plan(&self) -> &StartPlan {
        match self {
            Self::Table(t) => &t.start,
            Self::Text(t) => &t.start,
        }
    }
}

/// Everything needed to program the device, already corrected.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledProgram {
    /// Pattern length used for compression (text protocols: widest command).
    pub pattern_length: usize,
    /// Candidate evaluation; absent for text protocols.
    pub length_report: Option<LengthReport>,
    pub patterns: Vec<PatternCommand>,
    pub waits: Vec<WaitCommand>,
    pub factor: f64,
    pub total_channels: usize,
}

impl CompiledProgram {
    /// Lines in transmission order: pattern commands, then wait commands.
    pub fn lines(&self) -> Vec<String> {
        self.patterns
            .iter()
            .map(ToString::to_string)
            .chain(self.waits.iter().map(ToString::to_string))
            .collect()
    }

    /// Widest STATUS list among the pattern commands.
    pub fn required_pattern_length(&self) -> usize {
        self.patterns.iter().map(PatternCommand::width).max().unwrap_or(0)
    }

    pub fn patterns_per_channel(&self) -> BTreeMap<u32, usize> {
        let mut m = BTreeMap::new();
        for p in &self.patterns {
            *m.entry(p.channel).or_insert(0) += 1;
        }
        m
    }

    pub fn max_channel(&self) -> u32 {
        self.patterns
            .iter()
            .map(|p| p.channel)
            .chain(self.waits.iter().map(|w| w.channel))
            .max()
            .unwrap_or(0)
    }

    pub fn active_channels(&self) -> Vec<u32> {
        self.patterns_per_channel().into_keys().collect()
    }

    pub fn requires_pulse(&self) -> bool {
        self.patterns.iter().any(PatternCommand::has_pulse)
            || self.waits.iter().any(|w| !w.pulse.is_none())
    }

    pub fn requirements(&self) -> Requirements {
        let sat = |v: usize| u32::try_from(v).unwrap_or(u32::MAX);
        Requirements {
            pattern_length: sat(self.required_pattern_length()),
            patterns_per_channel: sat(self.patterns_per_channel().values().copied().max().unwrap_or(0)),
            max_channel: self.max_channel(),
        }
    }

    /// Annotated command file: header, wait lines, start schedule, pattern
    /// lines, footer.
    ///
    /// The file parses back as a text protocol. Its values are already
    /// corrected, so compiling it again with factor 1.0 reproduces `self`.
    pub fn command_log(&self, source: &str, generated: NaiveDateTime) -> String {
        let rule = "# ".to_string() + &"=".repeat(70);
        let dict = |f: &dyn Fn(&WaitCommand) -> String| {
            let items: Vec<String> = self
                .waits
                .iter()
                .map(|w| format!("'CH{}': {}", w.channel, f(w)))
                .collect();
            format!("{{{}}}", items.join(", "))
        };

        let mut lines = vec![
            rule.clone(),
            "# Light controller commands".to_string(),
            format!("# Protocol file: {source}"),
            format!("# Generated: {}", generated.format("%Y-%m-%d %H:%M:%S")),
            format!(
                "# Channels: {} total, {} active",
                self.total_channels,
                self.active_channels().len()
            ),
            format!("# Pattern length: {}", self.pattern_length),
            format!(
                "# Calibration factor: {:.6} (drift {:+.2} s per 12 h)",
                self.factor,
                drift_per_12h_s(self.factor)
            ),
            rule.clone(),
            String::new(),
            "# Wait commands".to_string(),
        ];
        lines.extend(self.waits.iter().map(|w| annotate(&PatternCommand::from(w))));
        lines.push(String::new());
        lines.push("# Start schedule (corrected)".to_string());
        lines.push(format!(
            "START_TIME: {}",
            dict(&|w| format!("{}.{:03}", w.countdown_ms / 1000, w.countdown_ms % 1000))
        ));
        lines.push(format!("WAIT_STATUS: {}", dict(&|w| w.idle.to_string())));
        if self.waits.iter().any(|w| !w.pulse.is_none()) {
            lines.push(format!(
                "WAIT_PULSE: {}",
                dict(&|w| if w.pulse.is_none() {
                    "None".to_string()
                } else {
                    format!("{{'period': {}, 'pw': {}}}", w.pulse.period_ms, w.pulse.pulse_width_ms)
                })
            ));
        }
        lines.push(String::new());
        lines.push("# Pattern commands".to_string());
        lines.extend(self.patterns.iter().map(annotate));
        lines.push(String::new());

        lines.push(rule.clone());
        lines.push("# Start times".to_string());
        lines.extend(self.waits.iter().map(|w| {
            format!(
                "#   CH{}: starts in {}, wait status {}",
                w.channel,
                fmt_ms(u64::from(w.countdown_ms)),
                w.idle
            )
        }));
        lines.push(rule);

        let mut out = lines.join("\n");
        out.push('\n');
        out
    }
}

fn correct_pulse(p: Pulse, factor: f64) -> Result<Pulse> {
    let e = correct_entry(&TimelineEntry::pulsed(0, 0, p), factor)?;
    Ok(e.pulse())
}

fn wait_commands(waits: &[ResolvedWait], factor: f64) -> Result<Vec<WaitCommand>> {
    waits
        .iter()
        .map(|w| -> Result<WaitCommand> {
            Ok(WaitCommand {
                channel: w.channel,
                idle: w.idle,
                countdown_ms: correct_countdown(w.countdown_ms, factor)?,
                pulse: correct_pulse(w.pulse, factor)?,
            })
        })
        .collect()
}

fn compile_table(
    t: &TableProtocol,
    factor: f64,
    opts: &CompileOptions,
) -> Result<(usize, LengthReport, Vec<PatternCommand>)> {
    let corrected = t
        .timelines
        .iter()
        .filter(|tl| !tl.is_empty())
        .map(|tl| correct_timeline(tl, factor))
        .collect::<Result<Vec<_>>>()?;

    let candidates = candidate_set(opts.pattern_length, &opts.candidate_lengths);
    let report = choose_pattern_length(&corrected, &candidates);
    let length = if opts.auto_pattern_length {
        report.best
    } else {
        opts.pattern_length.max(1)
    };
    if let (Some(used), Some(best)) = (report.count_for(length), report.count_for(report.best)) {
        if best < used {
            tracing::info!(
                pattern_length = length,
                commands = used,
                better_length = report.best,
                better_commands = best,
                "a different pattern length would need fewer commands"
            );
        }
    }

    let mut patterns = Vec::new();
    for tl in &corrected {
        let compressed = compress(&tl.entries, length);
        tracing::debug!(channel = tl.channel, patterns = compressed.len(), "channel compressed");
        patterns.extend(emit_patterns(tl.channel, &compressed));
    }
    Ok((length, report, patterns))
}

/// Compile a protocol into device commands.
///
/// `factor` is the device calibration factor; `now` resolves start deadlines.
pub fn compile(
    protocol: &Protocol,
    factor: f64,
    opts: &CompileOptions,
    now: NaiveDateTime,
) -> Result<CompiledProgram> {
    let factor = check_factor(factor)?;
    let active = protocol.active_channels();
    let resolved = protocol.start_plan().resolve(&active, now)?;
    let waits = wait_commands(&resolved, factor)?;

    let (pattern_length, length_report, mut patterns) = match protocol {
        Protocol::Table(t) => {
            let (l, report, patterns) = compile_table(t, factor, opts)?;
            (l, Some(report), patterns)
        }
        Protocol::Text(t) => {
            let patterns = t
                .commands
                .iter()
                .map(|c| -> Result<PatternCommand> {
                    let entries = c
                        .entries
                        .iter()
                        .map(|e| correct_entry(e, factor))
                        .collect::<Result<Vec<_>>>()?;
                    Ok(PatternCommand {
                        entries,
                        ..c.clone()
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            let width = patterns.iter().map(PatternCommand::width).max().unwrap_or(0);
            (width, None, patterns)
        }
    };
    patterns.sort_by_key(|p| p.channel);

    let program = CompiledProgram {
        pattern_length,
        length_report,
        patterns,
        waits,
        factor,
        total_channels: protocol.total_channels(),
    };
    tracing::info!(
        pattern_length = program.pattern_length,
        patterns = program.patterns.len(),
        waits = program.waits.len(),
        factor,
        "protocol compiled"
    );
    Ok(program)
}
