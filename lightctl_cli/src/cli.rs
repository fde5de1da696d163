//! CLI argument definitions and shared statics.

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::OnceLock;

pub static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();
/// Whether the user asked for JSON output (controls structured error output).
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();

#[derive(Parser, Debug)]
#[command(name = "lightctl", version, about = "Light stimulus controller CLI")]
pub struct Cli {
    /// Path to config TOML (typed); built-in defaults when omitted
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Log and report as JSON lines instead of pretty
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace)
    #[arg(long = "log-level", value_name = "LEVEL", default_value = "info")]
    pub log_level: String,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

/// Where the controller is reached.
#[derive(clap::Args, Debug, Clone)]
pub struct DeviceArgs {
    /// Serial port (overrides serial.port in the config)
    #[arg(long, value_name = "PORT")]
    pub port: Option<String>,
    /// Talk to the built-in simulated controller instead of a serial port
    #[arg(long, action = ArgAction::SetTrue)]
    pub simulate: bool,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum MethodArg {
    MultiTimestamp,
    RequestMeasure,
}

impl From<MethodArg> for lightctl_config::CalibrationMethod {
    fn from(m: MethodArg) -> Self {
        match m {
            MethodArg::MultiTimestamp => Self::MultiTimestamp,
            MethodArg::RequestMeasure => Self::RequestMeasure,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Compile a protocol into device commands without touching a device
    Compile {
        /// Protocol table (.csv) or text command file (.txt)
        protocol: PathBuf,
        /// Start-time table (.csv); required for table protocols
        #[arg(long, value_name = "FILE")]
        start: Option<PathBuf>,
        /// Calibration factor to apply (default: the file's own, else 1.0)
        #[arg(long, value_name = "FACTOR")]
        factor: Option<f64>,
        /// Override compile.pattern_length
        #[arg(long, value_name = "L")]
        pattern_length: Option<usize>,
        /// Use the most compact candidate pattern length
        #[arg(long, action = ArgAction::SetTrue)]
        auto: bool,
        /// Also write the annotated command file here
        #[arg(long, short, value_name = "FILE")]
        output: Option<PathBuf>,
    },
    /// Calibrate (if needed), compile, verify and send a protocol
    Run {
        protocol: PathBuf,
        #[arg(long, value_name = "FILE")]
        start: Option<PathBuf>,
        #[command(flatten)]
        device: DeviceArgs,
        /// Recalibrate even when a valid stored calibration exists
        #[arg(long, action = ArgAction::SetTrue)]
        force_calibration: bool,
        /// Save the annotated command file after a successful send
        #[arg(long, value_name = "FILE")]
        save: Option<PathBuf>,
    },
    /// Measure the device clock drift and store it
    Calibrate {
        #[command(flatten)]
        device: DeviceArgs,
        /// Override calibration.method
        #[arg(long, value_enum, value_name = "METHOD")]
        method: Option<MethodArg>,
    },
    /// Inspect or remove stored calibrations
    Calibrations {
        #[command(subcommand)]
        cmd: CalibrationsCmd,
    },
    /// Quick health check (config, ports, greeting)
    SelfCheck {
        #[command(flatten)]
        device: DeviceArgs,
    },
}

#[derive(Subcommand, Debug)]
pub enum CalibrationsCmd {
    /// List stored calibration records
    List,
    /// Delete the record of one device
    Delete {
        /// 16-hex-character device id, as shown by `calibrations list`
        device_id: String,
    },
}
