use thiserror::Error;

/// Terminal failures of a compile, calibrate or transmit operation.
///
/// Every message carries the column, row or value needed to locate the
/// problem in the source protocol.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum LightError {
    #[error("format error: {0}")]
    Format(String),
    #[error("schema error: {0}")]
    Schema(String),
    #[error("data gap: columns with empty cells in the middle: {}", .columns.join(", "))]
    DataGap { columns: Vec<String> },
    #[error("range error: {0}")]
    Range(String),
    #[error("pulse consistency error: {0}")]
    PulseConsistency(String),
    #[error("capability error: {0}")]
    Capability(String),
    #[error("timeout: {0}")]
    Timeout(String),
    #[error("insufficient data: {0}")]
    InsufficientData(String),
    #[error("start time error: {0}")]
    StartTime(String),
    #[error("calibration already running for device {0}")]
    CalibrationBusy(String),
    #[error("calibration cancelled")]
    Cancelled,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("calibration store error: {0}")]
    Store(String),
    #[error("configuration error: {0}")]
    Config(String),
}

impl LightError {
    /// Short stable identifier, used in JSON output and logs.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Format(_) => "format",
            Self::Schema(_) => "schema",
            Self::DataGap { .. } => "data_gap",
            Self::Range(_) => "range",
            Self::PulseConsistency(_) => "pulse_consistency",
            Self::Capability(_) => "capability",
            Self::Timeout(_) => "timeout",
            Self::InsufficientData(_) => "insufficient_data",
            Self::StartTime(_) => "start_time",
            Self::CalibrationBusy(_) => "calibration_busy",
            Self::Cancelled => "cancelled",
            Self::Transport(_) => "transport",
            Self::Store(_) => "store",
            Self::Config(_) => "config",
        }
    }

    /// True for errors caused by the protocol source rather than the device or host.
    pub const fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            Self::Format(_)
                | Self::Schema(_)
                | Self::DataGap { .. }
                | Self::Range(_)
                | Self::PulseConsistency(_)
                | Self::StartTime(_)
        )
    }
}

impl From<lightctl_traits::LinkError> for LightError {
    fn from(e: lightctl_traits::LinkError) -> Self {
        Self::Transport(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, LightError>;
