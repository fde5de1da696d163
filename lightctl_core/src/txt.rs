//! Text protocol files.
//!
//! ```text
//! # comment
//! PATTERN:1;CH:1;STATUS:1,0;TIME_S:10,10;REPEATS:4;PULSE:T1000pw50,T0pw0,
//! START_TIME: {'CH1': '14:30', 'CH2': 60}
//! WAIT_STATUS: {'CH1': 0, 'CH2': 1}
//! WAIT_PULSE: {'CH2': {'period': 1000, 'pw': 100}}
//! CALIBRATION_FACTOR: 1.0012
//! ```
//!
//! Dictionaries use Python literal syntax and may span several lines.

use std::collections::BTreeMap;

use chrono::NaiveDate;

use crate::emit::PatternCommand;
use crate::error::{LightError, Result};
use crate::pulse::Pulse;
use crate::start::{ChannelStart, StartPlan, StartSpec, channel_from_name, parse_start_cell};

#[derive(Debug, Clone, PartialEq)]
pub struct TextProtocol {
    /// Pattern commands (index >= 1), uncorrected.
    pub commands: Vec<PatternCommand>,
    pub start: StartPlan,
    /// Legacy `CALIBRATION_FACTOR` line.
    pub override_factor: Option<f64>,
}

impl TextProtocol {
    /// Channels that carry at least one pattern command, ascending.
    pub fn active_channels(&self) -> Vec<u32> {
        let mut v: Vec<u32> = self.commands.iter().map(|c| c.channel).collect();
        v.sort_unstable();
        v.dedup();
        v
    }

    pub fn requires_pulse(&self) -> bool {
        self.commands.iter().any(PatternCommand::has_pulse)
            || self.start.channels.values().any(|c| !c.pulse.is_none())
    }
}

/// Parse a text protocol. `today` anchors `HH:MM` start times.
pub fn parse_text_protocol(src: &str, today: NaiveDate) -> Result<TextProtocol> {
    let lines: Vec<&str> = src.lines().collect();
    let mut commands = Vec::new();
    let mut wait_lines = Vec::new();
    let mut start_time: Option<BTreeMap<String, literal::Value>> = None;
    let mut wait_status: Option<BTreeMap<String, literal::Value>> = None;
    let mut wait_pulse: Option<BTreeMap<String, literal::Value>> = None;
    let mut override_factor = None;

    let mut i = 0;
    while i < lines.len() {
        let lineno = i + 1;
        let line = lines[i].trim();
        i += 1;
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let at = |e: LightError| LightError::Format(format!("line {lineno}: {}", inner(&e)));

        if line.starts_with("PATTERN:") {
            let cmd = PatternCommand::parse(line).map_err(at)?;
            if cmd.is_wait() {
                wait_lines.push(cmd);
            } else {
                commands.push(cmd);
            }
            continue;
        }

        if let Some((key, rest)) = line.split_once(':') {
            let key = key.trim();
            let slot = match key {
                "START_TIME" => Some(&mut start_time),
                "WAIT_STATUS" => Some(&mut wait_status),
                "WAIT_PULSE" => Some(&mut wait_pulse),
                _ => None,
            };
            if let Some(slot) = slot {
                // Gather lines until the braces balance.
                let mut text = rest.to_string();
                while depth(&text) > 0 && i < lines.len() {
                    text.push('\n');
                    text.push_str(lines[i]);
                    i += 1;
                }
                let dict = literal::parse_dict(&text)
                    .map_err(|m| LightError::Format(format!("line {lineno}: {key}: {m}")))?;
                *slot = Some(dict);
                continue;
            }
            if key == "CALIBRATION_FACTOR" {
                let raw: String = rest.chars().filter(|c| !c.is_whitespace()).collect();
                if raw.is_empty() {
                    continue;
                }
                match raw.parse::<f64>() {
                    Ok(f) if f.is_finite() && f > 0.0 => {
                        tracing::warn!(
                            factor = f,
                            "CALIBRATION_FACTOR in a protocol file is deprecated; stored per-device calibration is used otherwise"
                        );
                        override_factor = Some(f);
                    }
                    _ => {
                        tracing::warn!(
                            line = lineno,
                            value = %raw,
                            "invalid CALIBRATION_FACTOR ignored; the device will be calibrated"
                        );
                    }
                }
                continue;
            }
        }
        tracing::warn!(line = lineno, text = line, "unrecognized line ignored");
    }

    let start = build_plan(
        start_time.unwrap_or_default(),
        wait_status,
        wait_pulse.unwrap_or_default(),
        &wait_lines,
        today,
    )?;
    Ok(TextProtocol {
        commands,
        start,
        override_factor,
    })
}

fn inner(e: &LightError) -> String {
    match e {
        LightError::Format(m) => m.clone(),
        other => other.to_string(),
    }
}

fn depth(text: &str) -> i64 {
    text.chars().fold(0, |d, c| match c {
        '{' => d + 1,
        '}' => d - 1,
        _ => d,
    })
}

fn channel_key(key: &str, what: &str) -> Result<u32> {
    channel_from_name(key).ok_or_else(|| {
        LightError::Format(format!(
            "{what}: key \"{key}\" does not match CH<number> (CH1, CH2, ...)"
        ))
    })
}

fn build_plan(
    start_time: BTreeMap<String, literal::Value>,
    wait_status: Option<BTreeMap<String, literal::Value>>,
    wait_pulse: BTreeMap<String, literal::Value>,
    wait_lines: &[PatternCommand],
    today: NaiveDate,
) -> Result<StartPlan> {
    use literal::Value;

    let mut idle: BTreeMap<u32, u8> = BTreeMap::new();
    match wait_status {
        Some(ws) => {
            for (key, v) in ws {
                let ch = channel_key(&key, "WAIT_STATUS")?;
                match v {
                    Value::None => {}
                    Value::Num(n) => {
                        idle.insert(ch, u8::from(n != 0.0));
                    }
                    Value::Bool(b) => {
                        idle.insert(ch, u8::from(b));
                    }
                    other => {
                        return Err(LightError::Format(format!(
                            "WAIT_STATUS: {key} must be 0, 1 or None, got {other:?}"
                        )));
                    }
                }
            }
        }
        // Without WAIT_STATUS, the idle level comes from PATTERN:0 lines.
        None => {
            for w in wait_lines {
                if let Some(e) = w.entries.first() {
                    idle.insert(w.channel, e.status);
                }
            }
        }
    }

    let mut pulses: BTreeMap<u32, Pulse> = BTreeMap::new();
    for (key, v) in wait_pulse {
        let ch = channel_key(&key, "WAIT_PULSE")?;
        match v {
            Value::None => {}
            Value::Dict(d) => {
                let field = |name: &str| match d.get(name) {
                    Some(Value::Num(n)) if *n >= 0.0 && n.fract() == 0.0 && *n <= f64::from(u32::MAX) => {
                        Ok(*n as u32)
                    }
                    _ => Err(LightError::Format(format!(
                        "WAIT_PULSE: {key} needs integer 'period' and 'pw' values"
                    ))),
                };
                let (period, pw) = (field("period")?, field("pw")?);
                if pw > period || (period == 0) != (pw == 0) {
                    return Err(LightError::PulseConsistency(format!(
                        "WAIT_PULSE: {key} pw ({pw} ms) and period ({period} ms) are inconsistent"
                    )));
                }
                pulses.insert(ch, Pulse::new(period, pw));
            }
            other => {
                return Err(LightError::Format(format!(
                    "WAIT_PULSE: {key} must be a dict with 'period' and 'pw' or None, got {other:?}"
                )));
            }
        }
    }

    let mut plan = StartPlan::default();
    for (key, v) in start_time {
        let ch = channel_key(&key, "START_TIME")?;
        let start = match v {
            Value::None => continue,
            Value::Str(s) if s.trim().is_empty() => continue,
            Value::Num(secs) if secs >= 0.0 => StartSpec::Countdown(secs),
            Value::Str(s) => parse_start_cell(&s, today)?,
            other => {
                return Err(LightError::StartTime(format!(
                    "START_TIME: {key} must be seconds, a time string or None, got {other:?}"
                )));
            }
        };
        plan.channels.insert(
            ch,
            ChannelStart {
                start,
                idle: idle.get(&ch).copied().unwrap_or(0),
                pulse: pulses.get(&ch).copied().unwrap_or(Pulse::NONE),
            },
        );
    }
    Ok(plan)
}

/// Just enough of Python's literal syntax for protocol dictionaries.
mod literal {
    use std::collections::BTreeMap;
    use std::iter::Peekable;
    use std::str::Chars;

    #[derive(Debug, Clone, PartialEq)]
    pub enum Value {
        None,
        Bool(bool),
        Num(f64),
        Str(String),
        Dict(BTreeMap<String, Value>),
    }

    pub fn parse_dict(src: &str) -> Result<BTreeMap<String, Value>, String> {
        let mut p = Parser {
            chars: src.chars().peekable(),
        };
        p.skip_ws();
        let Value::Dict(d) = p.value()? else {
            return Err("expected a {...} dictionary".to_string());
        };
        p.skip_ws();
        if let Some(c) = p.chars.peek() {
            return Err(format!("unexpected '{c}' after the dictionary"));
        }
        Ok(d)
    }

    struct Parser<'a> {
        chars: Peekable<Chars<'a>>,
    }

    impl Parser<'_> {
        fn skip_ws(&mut self) {
            while self.chars.peek().is_some_and(|c| c.is_whitespace()) {
                self.chars.next();
            }
        }

        fn expect(&mut self, want: char) -> Result<(), String> {
            self.skip_ws();
            match self.chars.next() {
                Some(c) if c == want => Ok(()),
                Some(c) => Err(format!("expected '{want}', found '{c}'")),
                None => Err(format!("expected '{want}', found end of input")),
            }
        }

        fn value(&mut self) -> Result<Value, String> {
            self.skip_ws();
            match self.chars.peek().copied() {
                Some('{') => self.dict(),
                Some(q @ ('\'' | '"')) => {
                    self.chars.next();
                    self.string(q).map(Value::Str)
                }
                Some(c) if c.is_ascii_digit() || c == '-' || c == '+' || c == '.' => self.number(),
                Some(c) if c.is_ascii_alphabetic() => {
                    let word = self.word();
                    match word.as_str() {
                        "None" => Ok(Value::None),
                        "True" => Ok(Value::Bool(true)),
                        "False" => Ok(Value::Bool(false)),
                        _ => Err(format!("unknown name \"{word}\"")),
                    }
                }
                Some(c) => Err(format!("unexpected '{c}'")),
                None => Err("unexpected end of input".to_string()),
            }
        }

        fn dict(&mut self) -> Result<Value, String> {
            self.expect('{')?;
            let mut out = BTreeMap::new();
            loop {
                self.skip_ws();
                if self.chars.peek() == Some(&'}') {
                    self.chars.next();
                    return Ok(Value::Dict(out));
                }
                let key = match self.value()? {
                    Value::Str(s) => s,
                    other => return Err(format!("dictionary keys must be strings, got {other:?}")),
                };
                self.expect(':')?;
                let v = self.value()?;
                out.insert(key, v);
                self.skip_ws();
                match self.chars.next() {
                    Some(',') => {}
                    Some('}') => return Ok(Value::Dict(out)),
                    Some(c) => return Err(format!("expected ',' or '}}', found '{c}'")),
                    None => return Err("unterminated dictionary".to_string()),
                }
            }
        }

        fn string(&mut self, quote: char) -> Result<String, String> {
            let mut s = String::new();
            loop {
                match self.chars.next() {
                    Some(c) if c == quote => return Ok(s),
                    Some('\\') => match self.chars.next() {
                        Some(c) => s.push(c),
                        None => return Err("unterminated string".to_string()),
                    },
                    Some(c) => s.push(c),
                    None => return Err("unterminated string".to_string()),
                }
            }
        }

        fn number(&mut self) -> Result<Value, String> {
            let mut s = String::new();
            while let Some(&c) = self.chars.peek() {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '+' | '_') {
                    s.push(c);
                    self.chars.next();
                } else {
                    break;
                }
            }
            s.replace('_', "")
                .parse::<f64>()
                .map(Value::Num)
                .map_err(|_| format!("\"{s}\" is not a number"))
        }

        fn word(&mut self) -> String {
            let mut s = String::new();
            while let Some(&c) = self.chars.peek() {
                if c.is_ascii_alphanumeric() || c == '_' {
                    s.push(c);
                    self.chars.next();
                } else {
                    break;
                }
            }
            s
        }
    }

}
