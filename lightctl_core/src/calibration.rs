//! Clock-drift calibration.
//!
//! The device's crystal runs slightly fast or slow. A calibration run collects
//! `(device_s, host_s)` pairs and fits `host = factor * device + offset` by
//! ordinary least squares. `factor` is stored per device and every
//! device-bound duration is later divided by it (see [`crate::correct`]).
//!
//! Two sampling protocols are supported:
//!
//! - request/measure: the host asks for a nominal wait, the device answers
//!   when its own clock says it elapsed, and the host times the round trip;
//! - multi-timestamp: the device streams its own millisecond clock at
//!   intervals and the host timestamps each arrival.

use std::collections::HashSet;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration;

use chrono::Utc;
use crossbeam_channel as xch;
use lightctl_traits::{Clock, LineLink};
use serde::{Deserialize, Serialize};

use crate::correct::check_factor;
use crate::error::{LightError, Result};
use crate::session::poll_until;
use crate::store::{CalibrationRecord, CalibrationStore, DeviceIdentity};
use crate::util::drift_per_12h_s;

/// Residuals above this many seconds mark a fit as unstable.
pub const STABILITY_LIMIT_S: f64 = 0.5;

/// Result of a least-squares fit of host time against device time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinearFit {
    pub factor: f64,
    pub offset: f64,
    pub r_squared: f64,
    pub rmse: f64,
    pub max_residual: f64,
    pub stable: bool,
    pub n: usize,
}

impl LinearFit {
    /// Fit `y = factor * x + offset` over `(x, y)` pairs.
    pub fn fit(points: &[(f64, f64)]) -> Result<Self> {
        if points.len() < 2 {
            return Err(LightError::InsufficientData(format!(
                "need at least 2 samples for a fit, got {}",
                points.len()
            )));
        }
        if points.iter().any(|(x, y)| !x.is_finite() || !y.is_finite()) {
            return Err(LightError::InsufficientData(
                "calibration samples contain non-finite values".to_string(),
            ));
        }
        let n = points.len() as f64;
        let mean_x = points.iter().map(|p| p.0).sum::<f64>() / n;
        let mean_y = points.iter().map(|p| p.1).sum::<f64>() / n;
        let (mut sxx, mut sxy, mut syy) = (0.0, 0.0, 0.0);
        for &(x, y) in points {
            let dx = x - mean_x;
            let dy = y - mean_y;
            sxx += dx * dx;
            sxy += dx * dy;
            syy += dy * dy;
        }
        if sxx <= f64::EPSILON * n {
            return Err(LightError::InsufficientData(
                "calibration samples do not vary in device time (degenerate x variance)".to_string(),
            ));
        }
        let factor = sxy / sxx;
        let offset = mean_y - factor * mean_x;

        let mut ss_res = 0.0;
        let mut max_residual: f64 = 0.0;
        for &(x, y) in points {
            let r = y - (factor * x + offset);
            ss_res += r * r;
            max_residual = max_residual.max(r.abs());
        }
        let r_squared = if syy == 0.0 { 1.0 } else { 1.0 - ss_res / syy };
        let rmse = (ss_res / n).sqrt();

        Ok(Self {
            factor,
            offset,
            r_squared,
            rmse,
            max_residual,
            stable: max_residual <= STABILITY_LIMIT_S,
            n: points.len(),
        })
    }
}

/// Which sampling protocol produced a factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    RequestMeasure,
    MultiTimestamp,
    /// Supplied by the protocol file instead of measured.
    Override,
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::RequestMeasure => "request_measure",
            Self::MultiTimestamp => "multi_timestamp",
            Self::Override => "override",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplingTiming {
    /// Sleep between non-blocking reads.
    pub poll: Duration,
    /// Extra wait beyond a sample's expected arrival.
    pub grace: Duration,
    /// Countdown log interval; zero disables the ticker.
    pub countdown_step: Duration,
}

impl Default for SamplingTiming {
    fn default() -> Self {
        Self {
            poll: Duration::from_millis(10),
            grace: Duration::from_secs(10),
            countdown_step: Duration::from_secs(10),
        }
    }
}

/// A calibration protocol: drives the link and returns `(device_s, host_s)`
/// pairs ready for [`LinearFit::fit`].
pub trait SamplingStrategy {
    fn method(&self) -> Method;

    /// Nominal run time, for the countdown.
    fn expected_duration(&self) -> Duration;

    fn sample(
        &self,
        link: &mut dyn LineLink,
        clock: &dyn Clock,
        cancel: &AtomicBool,
        timing: &SamplingTiming,
    ) -> Result<Vec<(f64, f64)>>;
}

/// Host asks for nominal waits; device replies when they elapse on its clock.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestMeasure {
    pub durations_s: Vec<f64>,
}

impl SamplingStrategy for RequestMeasure {
    fn method(&self) -> Method {
        Method::RequestMeasure
    }

    fn expected_duration(&self) -> Duration {
        Duration::from_secs_f64(self.durations_s.iter().copied().filter(|d| *d > 0.0).sum())
    }

    fn sample(
        &self,
        link: &mut dyn LineLink,
        clock: &dyn Clock,
        cancel: &AtomicBool,
        timing: &SamplingTiming,
    ) -> Result<Vec<(f64, f64)>> {
        let mut pairs = Vec::with_capacity(self.durations_s.len());
        for (i, &d) in self.durations_s.iter().enumerate() {
            let ms = (d * 1000.0).round() as u64;
            let expected = format!("calibration_v11_{ms}");
            link.clear_input()?;
            link.write_line(&format!("calibrate_v11_{ms}"))?;
            let t0 = clock.now();
            let got = poll_until(
                link,
                clock,
                Duration::from_millis(ms) + timing.grace,
                timing.poll,
                Some(cancel),
                |l| (l == expected).then_some(()),
            )?;
            if got.is_none() {
                return Err(LightError::Timeout(format!(
                    "no \"{expected}\" reply within {:?}",
                    Duration::from_millis(ms) + timing.grace
                )));
            }
            let host_s = clock.secs_since(t0);
            tracing::info!(
                sample = i + 1,
                of = self.durations_s.len(),
                requested_s = d,
                host_s,
                "calibration sample"
            );
            pairs.push((ms as f64 / 1000.0, host_s));
        }
        Ok(pairs)
    }
}

/// Device streams `samples + 1` timestamps (t = 0 first) over `duration_s`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MultiTimestamp {
    pub duration_s: u32,
    pub samples: u32,
}

fn parse_timestamp(line: &str) -> Option<u64> {
    line.strip_prefix("calib_timestamp_")?.trim().parse().ok()
}

impl SamplingStrategy for MultiTimestamp {
    fn method(&self) -> Method {
        Method::MultiTimestamp
    }

    fn expected_duration(&self) -> Duration {
        Duration::from_secs(u64::from(self.duration_s))
    }

    fn sample(
        &self,
        link: &mut dyn LineLink,
        clock: &dyn Clock,
        cancel: &AtomicBool,
        timing: &SamplingTiming,
    ) -> Result<Vec<(f64, f64)>> {
        let total = self.expected_duration();
        let samples = self.samples.max(1);
        link.clear_input()?;
        link.write_line(&format!(
            "calibrate_timestamps_{}_{}",
            self.duration_s, self.samples
        ))?;
        let t0 = clock.now();

        let mut pairs = Vec::with_capacity(samples as usize + 1);
        for i in 0..=samples {
            let due = total.mul_f64(f64::from(i) / f64::from(samples)) + timing.grace;
            let remaining = due.saturating_sub(clock.now().saturating_duration_since(t0));
            let got = poll_until(link, clock, remaining, timing.poll, Some(cancel), parse_timestamp)?;
            let Some(device_ms) = got else {
                return Err(LightError::Timeout(format!(
                    "timestamp {i} of {samples} did not arrive within {due:?} of the start"
                )));
            };
            let host_s = clock.secs_since(t0);
            tracing::debug!(sample = i, device_ms, host_s, "calibration timestamp");
            pairs.push((device_ms as f64 / 1000.0, host_s));
        }
        // The t=0 sample carries only link latency.
        pairs.remove(0);
        Ok(pairs)
    }
}

/// Logs the remaining time of a run at a fixed interval on a scoped helper
/// thread. Remaining time is read from the run's own clock. Dropping it stops
/// and joins the thread.
struct Countdown<'scope> {
    stop: Option<xch::Sender<()>>,
    join_handle: Option<std::thread::ScopedJoinHandle<'scope, ()>>,
}

impl<'scope> Countdown<'scope> {
    fn spawn<'env>(
        scope: &'scope std::thread::Scope<'scope, 'env>,
        clock: &'env dyn Clock,
        total: Duration,
        step: Duration,
    ) -> Self {
        if step.is_zero() || total.is_zero() {
            return Self {
                stop: None,
                join_handle: None,
            };
        }
        let (tx, rx) = xch::bounded::<()>(1);
        let started = clock.now();
        let join_handle = scope.spawn(move || {
            loop {
                match rx.recv_timeout(step) {
                    Err(xch::RecvTimeoutError::Timeout) => {
                        let left = total.saturating_sub(Duration::from_millis(clock.ms_since(started)));
                        tracing::info!(remaining_s = left.as_secs(), "calibration in progress");
                        if left.is_zero() {
                            break;
                        }
                    }
                    Ok(()) | Err(xch::RecvTimeoutError::Disconnected) => break,
                }
            }
            tracing::trace!("countdown thread exiting");
        });
        Self {
            stop: Some(tx),
            join_handle: Some(join_handle),
        }
    }

    #[cfg(test)]
    fn is_running(&self) -> bool {
        self.join_handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for Countdown<'_> {
    fn drop(&mut self) {
        // Disconnecting wakes the thread immediately.
        drop(self.stop.take());
        if let Some(handle) = self.join_handle.take() {
            if let Err(e) = handle.join() {
                tracing::warn!(?e, "countdown thread panicked");
            }
        }
    }
}

/// Devices with a calibration in progress, process-wide.
#[derive(Debug, Clone, Default)]
pub struct CalibrationRegistry {
    active: Arc<Mutex<HashSet<String>>>,
}

impl CalibrationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn global() -> &'static Self {
        static GLOBAL: OnceLock<CalibrationRegistry> = OnceLock::new();
        GLOBAL.get_or_init(Self::new)
    }

    /// Claim `device_id` until the guard is dropped.
    pub fn try_acquire(&self, device_id: &str) -> Result<CalibrationGuard> {
        let mut set = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if !set.insert(device_id.to_string()) {
            return Err(LightError::CalibrationBusy(device_id.to_string()));
        }
        Ok(CalibrationGuard {
            registry: self.clone(),
            device_id: device_id.to_string(),
        })
    }

    pub fn is_busy(&self, device_id: &str) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(device_id)
    }
}

#[derive(Debug)]
pub struct CalibrationGuard {
    registry: CalibrationRegistry,
    device_id: String,
}

impl Drop for CalibrationGuard {
    fn drop(&mut self) {
        self.registry
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.device_id);
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationPolicy {
    pub validity_days: u32,
    /// Recalibrate even when a valid record exists.
    pub force: bool,
    /// Legacy factor from the protocol file; skips the store entirely.
    pub override_factor: Option<f64>,
}

impl Default for CalibrationPolicy {
    fn default() -> Self {
        Self {
            validity_days: 90,
            force: false,
            override_factor: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FactorSource {
    Override,
    Stored(CalibrationRecord),
    Measured(CalibrationRecord),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedFactor {
    pub factor: f64,
    pub source: FactorSource,
}

pub struct CalibrationManager {
    strategy: Box<dyn SamplingStrategy + Send + Sync>,
    timing: SamplingTiming,
    registry: CalibrationRegistry,
}

impl CalibrationManager {
    pub fn new(strategy: Box<dyn SamplingStrategy + Send + Sync>, timing: SamplingTiming) -> Self {
        Self {
            strategy,
            timing,
            registry: CalibrationRegistry::global().clone(),
        }
    }

    #[must_use]
    pub fn with_registry(mut self, registry: CalibrationRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn method(&self) -> Method {
        self.strategy.method()
    }

    /// Run one calibration and return the record. Nothing is persisted here.
    pub fn run(
        &self,
        link: &mut dyn LineLink,
        clock: &dyn Clock,
        identity: &DeviceIdentity,
        cancel: &AtomicBool,
    ) -> Result<CalibrationRecord> {
        let _guard = self.registry.try_acquire(&identity.id)?;
        let expected = self.strategy.expected_duration();
        tracing::info!(
            device_id = %identity.id,
            method = %self.strategy.method(),
            expected_s = expected.as_secs(),
            "calibration started"
        );

        let pairs = std::thread::scope(|scope| {
            let _countdown = Countdown::spawn(scope, clock, expected, self.timing.countdown_step);
            self.strategy.sample(link, clock, cancel, &self.timing)
        })?;
        let fit = LinearFit::fit(&pairs)?;
        check_factor(fit.factor)?;

        tracing::info!(
            factor = fit.factor,
            offset = fit.offset,
            r_squared = fit.r_squared,
            rmse = fit.rmse,
            drift_per_12h_s = drift_per_12h_s(fit.factor),
            "calibration fit"
        );
        if !fit.stable {
            tracing::warn!(
                max_residual = fit.max_residual,
                limit = STABILITY_LIMIT_S,
                "calibration residuals are large; timing may be unreliable"
            );
        }
        Ok(CalibrationRecord::from_fit(identity, &fit, self.strategy.method(), Utc::now()))
    }

    /// Pick the factor for a device: override, valid stored record, or a
    /// fresh run that is saved on success.
    pub fn resolve_factor(
        &self,
        link: &mut dyn LineLink,
        clock: &dyn Clock,
        identity: &DeviceIdentity,
        store: &dyn CalibrationStore,
        policy: &CalibrationPolicy,
        cancel: &AtomicBool,
    ) -> Result<ResolvedFactor> {
        if let Some(f) = policy.override_factor {
            let factor = check_factor(f)?;
            tracing::warn!(
                factor,
                "using the calibration factor from the protocol file; stored calibration is ignored"
            );
            return Ok(ResolvedFactor {
                factor,
                source: FactorSource::Override,
            });
        }

        if policy.force {
            tracing::info!(device_id = %identity.id, "recalibration forced");
        } else {
            match store.load(&identity.id)? {
                Some(rec) if rec.is_valid(Utc::now(), policy.validity_days) => {
                    tracing::info!(
                        device_id = %identity.id,
                        factor = rec.calib_factor,
                        age_days = rec.age_days(Utc::now()),
                        method = %rec.method,
                        "using stored calibration"
                    );
                    return Ok(ResolvedFactor {
                        factor: check_factor(rec.calib_factor)?,
                        source: FactorSource::Stored(rec),
                    });
                }
                Some(rec) => tracing::warn!(
                    device_id = %identity.id,
                    age_days = rec.age_days(Utc::now()),
                    validity_days = policy.validity_days,
                    "stored calibration expired; recalibrating"
                ),
                None => tracing::info!(device_id = %identity.id, "no stored calibration"),
            }
        }

        let rec = self.run(link, clock, identity, cancel)?;
        store.save(&rec)?;
        Ok(ResolvedFactor {
            factor: rec.calib_factor,
            source: FactorSource::Measured(rec),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lightctl_traits::clock::manual::ManualClock;
    use proptest::prelude::*;

    #[test]
    fn recovers_known_line() {
        let pts: Vec<(f64, f64)> = (1..=10)
            .map(|i| {
                let x = f64::from(i) * 30.0;
                (x, 1.002 * x + 0.05)
            })
            .collect();
        let fit = LinearFit::fit(&pts).unwrap();
        assert!((fit.factor - 1.002).abs() < 1e-9);
        assert!((fit.offset - 0.05).abs() < 1e-9);
        assert!((fit.r_squared - 1.0).abs() < 1e-12);
        assert!(fit.stable);
        assert_eq!(fit.n, 10);
    }

    #[test]
    fn constant_y_has_unit_r_squared() {
        let fit = LinearFit::fit(&[(1.0, 5.0), (2.0, 5.0), (3.0, 5.0)]).unwrap();
        assert_eq!(fit.factor, 0.0);
        assert_eq!(fit.r_squared, 1.0);
    }

    #[test]
    fn too_few_or_degenerate_points() {
        assert!(matches!(
            LinearFit::fit(&[(1.0, 1.0)]),
            Err(LightError::InsufficientData(_))
        ));
        assert!(matches!(
            LinearFit::fit(&[(2.0, 1.0), (2.0, 3.0)]),
            Err(LightError::InsufficientData(_))
        ));
    }

    #[test]
    fn large_residual_is_unstable() {
        let fit = LinearFit::fit(&[(0.0, 0.0), (1.0, 3.0), (2.0, 0.0), (3.0, 3.0)]).unwrap();
        assert!(!fit.stable);
        assert!(fit.max_residual > STABILITY_LIMIT_S);
    }

    #[test]
    fn registry_is_single_flight_per_device() {
        let reg = CalibrationRegistry::new();
        let g = reg.try_acquire("dev").unwrap();
        assert!(matches!(
            reg.try_acquire("dev"),
            Err(LightError::CalibrationBusy(_))
        ));
        assert!(reg.try_acquire("other").is_ok());
        drop(g);
        assert!(!reg.is_busy("dev"));
        assert!(reg.try_acquire("dev").is_ok());
    }

    #[test]
    fn countdown_joins_on_drop() {
        let clock = lightctl_traits::MonotonicClock::new();
        std::thread::scope(|scope| {
            let c = Countdown::spawn(scope, &clock, Duration::from_secs(3600), Duration::from_millis(5));
            std::thread::sleep(Duration::from_millis(20));
            assert!(c.is_running());
            drop(c);
        });
    }

    #[test]
    fn countdown_follows_the_injected_clock() {
        let clock = ManualClock::new();
        std::thread::scope(|scope| {
            let c = Countdown::spawn(scope, &clock, Duration::from_secs(3600), Duration::from_millis(5));
            std::thread::sleep(Duration::from_millis(20));
            // An hour of real time has not passed, so only the manual clock can end it.
            assert!(c.is_running());
            clock.advance(Duration::from_secs(3600));
            let deadline = std::time::Instant::now() + Duration::from_secs(5);
            while c.is_running() && std::time::Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(5));
            }
            assert!(!c.is_running());
        });
    }

    proptest! {
        #[test]
        fn fit_recovers_any_line(factor in 0.9f64..1.1, offset in -1.0f64..1.0, n in 2usize..30) {
            let pts: Vec<(f64, f64)> = (0..n)
                .map(|i| {
                    let x = 10.0 + i as f64 * 7.5;
                    (x, factor * x + offset)
                })
                .collect();
            let fit = LinearFit::fit(&pts).unwrap();
            prop_assert!((fit.factor - factor).abs() < 1e-9);
            prop_assert!((fit.offset - offset).abs() < 1e-7);
        }
    }
}
