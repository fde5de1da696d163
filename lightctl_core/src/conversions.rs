//! `From` implementations bridging `lightctl_config` types to `lightctl_core` types.

use std::time::Duration;

use crate::calibration::{
    CalibrationPolicy, Method, MultiTimestamp, RequestMeasure, SamplingStrategy, SamplingTiming,
};
use crate::compiler::CompileOptions;
use crate::session::SessionTimeouts;

// ── CompileCfg ───────────────────────────────────────────────────────────────

impl From<&lightctl_config::CompileCfg> for CompileOptions {
    fn from(c: &lightctl_config::CompileCfg) -> Self {
        Self {
            pattern_length: c.pattern_length,
            candidate_lengths: c.candidate_lengths.clone(),
            auto_pattern_length: c.auto_pattern_length,
        }
    }
}

// ── SerialCfg ────────────────────────────────────────────────────────────────

impl From<&lightctl_config::SerialCfg> for SessionTimeouts {
    fn from(c: &lightctl_config::SerialCfg) -> Self {
        Self {
            command: Duration::from_millis(c.command_timeout_ms),
            greeting: Duration::from_millis(c.greeting_timeout_ms),
            ..Self::default()
        }
    }
}

// ── CalibrationCfg ───────────────────────────────────────────────────────────

impl From<lightctl_config::CalibrationMethod> for Method {
    fn from(m: lightctl_config::CalibrationMethod) -> Self {
        match m {
            lightctl_config::CalibrationMethod::MultiTimestamp => Self::MultiTimestamp,
            lightctl_config::CalibrationMethod::RequestMeasure => Self::RequestMeasure,
        }
    }
}

impl From<&lightctl_config::CalibrationCfg> for SamplingTiming {
    fn from(c: &lightctl_config::CalibrationCfg) -> Self {
        Self {
            poll: Duration::from_millis(c.poll_ms),
            grace: Duration::from_secs(c.grace_s),
            countdown_step: Duration::from_secs(c.countdown_step_s),
        }
    }
}

impl From<&lightctl_config::CalibrationCfg> for CalibrationPolicy {
    fn from(c: &lightctl_config::CalibrationCfg) -> Self {
        Self {
            validity_days: c.validity_days,
            ..Self::default()
        }
    }
}

/// Sampling strategy selected by `calibration.method`.
pub fn strategy_from_config(
    c: &lightctl_config::CalibrationCfg,
) -> Box<dyn SamplingStrategy + Send + Sync> {
    match c.method {
        lightctl_config::CalibrationMethod::RequestMeasure => Box::new(RequestMeasure {
            durations_s: c.durations_s.clone(),
        }),
        lightctl_config::CalibrationMethod::MultiTimestamp => Box::new(MultiTimestamp {
            duration_s: c.duration_s,
            samples: c.samples,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_map_through() {
        let cfg = lightctl_config::Config::default();
        let opts = CompileOptions::from(&cfg.compile);
        assert_eq!(opts, CompileOptions::default());
        let t = SessionTimeouts::from(&cfg.serial);
        assert_eq!(t.command, Duration::from_secs(5));
        assert_eq!(t.greeting, Duration::from_secs(10));
        let timing = SamplingTiming::from(&cfg.calibration);
        assert_eq!(timing, SamplingTiming::default());
        assert_eq!(strategy_from_config(&cfg.calibration).method(), Method::MultiTimestamp);
        assert_eq!(Method::from(cfg.calibration.method), Method::MultiTimestamp);
        assert_eq!(CalibrationPolicy::from(&cfg.calibration).validity_days, 90);
    }
}
