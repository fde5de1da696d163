#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schemas and table ingestion for the light controller.
//!
//! - `Config` and sub-structs are deserialized from TOML and validated.
//! - Protocol and start-time tables are read from CSV into a `RawTable` of
//!   trimmed string cells; typing happens in `lightctl_core`.
use serde::Deserialize;
use serde::de::Deserializer;

pub mod table;

pub use table::{RawTable, load_table_csv, parse_table_csv};

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SerialCfg {
    /// Serial device path (e.g. /dev/ttyACM0, COM3). Required unless the CLI
    /// runs with `--simulate`.
    pub port: Option<String>,
    pub baud: u32,
    /// Max wait for each command echo (ms).
    pub command_timeout_ms: u64,
    /// Max wait for the greeting reply (ms).
    pub greeting_timeout_ms: u64,
}

impl Default for SerialCfg {
    fn default() -> Self {
        Self {
            port: None,
            baud: 9600,
            command_timeout_ms: 5_000,
            greeting_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct CompileCfg {
    /// Pattern length used for compression unless `auto_pattern_length` is set.
    pub pattern_length: usize,
    /// Lengths evaluated when reporting (or picking) the most compact encoding.
    pub candidate_lengths: Vec<usize>,
    /// Use the candidate that yields the fewest commands instead of `pattern_length`.
    pub auto_pattern_length: bool,
}

impl Default for CompileCfg {
    fn default() -> Self {
        Self {
            pattern_length: 2,
            candidate_lengths: vec![2, 4, 8],
            auto_pattern_length: false,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationMethod {
    /// Device emits its own clock at intervals; host timestamps arrivals.
    #[default]
    MultiTimestamp,
    /// Host requests nominal waits; device answers when its clock elapses.
    RequestMeasure,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct CalibrationCfg {
    pub method: CalibrationMethod,
    /// A stored record older than this is ignored and the device is recalibrated.
    pub validity_days: u32,
    /// JSON calibration database keyed by device id.
    pub store_path: String,
    /// Nominal waits (seconds) for the request/measure method.
    #[serde(deserialize_with = "de_one_or_many")]
    pub durations_s: Vec<f64>,
    /// Total run time (seconds) for the multi-timestamp method.
    pub duration_s: u32,
    /// Timestamps after t=0 for the multi-timestamp method.
    pub samples: u32,
    /// Extra wait beyond the expected arrival before a sample times out.
    pub grace_s: u64,
    /// Sleep between non-blocking polls of the link.
    pub poll_ms: u64,
    /// Progress log interval during a run (0 disables the countdown).
    pub countdown_step_s: u64,
}

impl Default for CalibrationCfg {
    fn default() -> Self {
        Self {
            method: CalibrationMethod::MultiTimestamp,
            validity_days: 90,
            store_path: "calibration_database.json".to_string(),
            durations_s: vec![60.0, 70.0, 80.0, 90.0],
            duration_s: 300,
            samples: 10,
            grace_s: 10,
            poll_ms: 10,
            countdown_step_s: 10,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub serial: SerialCfg,
    pub compile: CompileCfg,
    pub calibration: CalibrationCfg,
    pub logging: Logging,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

/// Accepts `durations_s = 60` as shorthand for a single-element list.
fn de_one_or_many<'de, D>(deserializer: D) -> Result<Vec<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(f64),
        Many(Vec<f64>),
    }
    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(v) => vec![v],
        OneOrMany::Many(v) => v,
    })
}

impl Config {
    pub fn validate(&self) -> eyre::Result<()> {
        // Serial
        if self.serial.baud == 0 {
            eyre::bail!("serial.baud must be > 0");
        }
        if self.serial.command_timeout_ms == 0 {
            eyre::bail!("serial.command_timeout_ms must be >= 1");
        }
        if self.serial.greeting_timeout_ms == 0 {
            eyre::bail!("serial.greeting_timeout_ms must be >= 1");
        }

        // Compile
        if self.compile.pattern_length == 0 {
            eyre::bail!("compile.pattern_length must be >= 1");
        }
        if self.compile.pattern_length > 64 {
            eyre::bail!("compile.pattern_length is unreasonably large (>64)");
        }
        if self.compile.candidate_lengths.is_empty() {
            eyre::bail!("compile.candidate_lengths must not be empty");
        }
        if self.compile.candidate_lengths.iter().any(|&l| l == 0) {
            eyre::bail!("compile.candidate_lengths must all be >= 1");
        }

        // Calibration
        if self.calibration.validity_days == 0 {
            eyre::bail!("calibration.validity_days must be >= 1");
        }
        if self.calibration.store_path.trim().is_empty() {
            eyre::bail!("calibration.store_path must not be empty");
        }
        if self.calibration.method == CalibrationMethod::RequestMeasure {
            if self.calibration.durations_s.len() < 2 {
                eyre::bail!("calibration.durations_s needs at least two values");
            }
            if self
                .calibration
                .durations_s
                .iter()
                .any(|d| !d.is_finite() || *d <= 0.0)
            {
                eyre::bail!("calibration.durations_s values must be > 0");
            }
            // Repeated durations leave the fit without spread in x.
            let mut sorted = self.calibration.durations_s.clone();
            sorted.sort_by(f64::total_cmp);
            if let Some(w) = sorted.windows(2).find(|w| w[0].total_cmp(&w[1]).is_eq()) {
                eyre::bail!(
                    "calibration.durations_s must not repeat values (duplicate {})",
                    w[0]
                );
            }
        }
        if self.calibration.method == CalibrationMethod::MultiTimestamp {
            if self.calibration.duration_s == 0 {
                eyre::bail!("calibration.duration_s must be >= 1");
            }
            // t=0 is dropped from the fit, so two more samples are needed for a line.
            if self.calibration.samples < 2 {
                eyre::bail!("calibration.samples must be >= 2");
            }
        }
        if self.calibration.poll_ms == 0 || self.calibration.poll_ms > 1_000 {
            eyre::bail!("calibration.poll_ms must be in [1, 1000]");
        }

        // Logging
        if let Some(rot) = self.logging.rotation.as_deref() {
            if !matches!(rot, "never" | "daily" | "hourly") {
                eyre::bail!("logging.rotation must be one of never|daily|hourly");
            }
        }

        Ok(())
    }
}
