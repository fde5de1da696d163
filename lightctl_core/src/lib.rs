#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Host-side protocol compiler and device driver for a multi-channel light
//! stimulus controller (hardware-agnostic).
//!
//! All device I/O goes through `lightctl_traits::LineLink`; all timing goes
//! through `lightctl_traits::Clock`.
//!
//! ## Pipeline
//!
//! - **Normalize**: typed column headers (`units`)
//! - **Resolve**: pulse parameters to `(period_ms, pulse_width_ms)` (`pulse`)
//! - **Validate**: channel layout and data gaps (`schema`)
//! - **Build**: canonical per-channel timelines (`timeline`)
//! - **Correct**: divide by the device calibration factor (`correct`)
//! - **Compress**: fold repeated windows (`compress`)
//! - **Emit**: `PATTERN:` line commands (`emit`)
//!
//! `compiler::compile` runs the whole chain. Calibration (`calibration`,
//! `store`) measures and persists the per-device factor; `session` greets the
//! device, checks capabilities and transmits.
//!
//! ## Integer widths
//!
//! Every device-bound duration is a `u32` millisecond count. Values that do
//! not fit are rejected with `LightError::Range`, never truncated.

pub mod atomic;
pub mod calibration;
pub mod compiler;
pub mod compress;
pub mod conversions;
pub mod correct;
pub mod device;
pub mod emit;
pub mod error;
pub mod pulse;
pub mod schema;
pub mod session;
pub mod start;
pub mod store;
pub mod timeline;
pub mod txt;
pub mod units;
pub mod util;

pub use calibration::{
    CalibrationManager, CalibrationPolicy, CalibrationRegistry, FactorSource, LinearFit, Method,
    MultiTimestamp, RequestMeasure, ResolvedFactor, SamplingStrategy, SamplingTiming,
};
pub use compiler::{CompileOptions, CompiledProgram, Protocol, compile};
pub use device::{DeviceCapabilities, MemoryReport, Requirements};
pub use emit::{PatternCommand, WaitCommand};
pub use error::{LightError, Result};
pub use session::{DeviceSession, SessionTimeouts};
pub use store::{
    CalibrationRecord, CalibrationStore, DeviceIdentity, JsonFileStore, MemoryStore,
};
pub use timeline::{ChannelTimeline, TimelineEntry};
