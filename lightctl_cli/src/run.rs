//! Command execution: protocol loading, device assembly, and the
//! compile / run / calibrate / self-check flows.

use std::path::Path;
use std::sync::atomic::AtomicBool;

use chrono::{Local, NaiveDate};
use eyre::{Result, WrapErr};
use lightctl_config::{Config, load_table_csv};
use lightctl_core::conversions::strategy_from_config;
use lightctl_core::{
    CalibrationManager, CalibrationPolicy, CalibrationStore, CompileOptions, CompiledProgram,
    DeviceIdentity, DeviceSession, FactorSource, JsonFileStore, Protocol, SamplingTiming,
    SessionTimeouts, compile,
};
use lightctl_hardware::{SimConfig, SimulatedDevice};
use lightctl_traits::clock::manual::ManualClock;
use lightctl_traits::{Clock, LineLink};
use serde_json::json;

use crate::cli::{DeviceArgs, JSON_MODE};

fn json_mode() -> bool {
    JSON_MODE.get().copied().unwrap_or(false)
}

/// Print `value` as one JSON line in JSON mode, otherwise the human text.
fn report(value: serde_json::Value, human: impl FnOnce() -> String) {
    if json_mode() {
        println!("{value}");
    } else {
        println!("{}", human());
    }
}

pub fn load_protocol(path: &Path, start: Option<&Path>, today: NaiveDate) -> Result<Protocol> {
    let is_text = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("txt"));
    if is_text {
        let src = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("failed to read protocol {}", path.display()))?;
        return Ok(Protocol::from_text(&src, today)?);
    }
    let Some(start) = start else {
        eyre::bail!(
            "table protocol {} needs a start-time table (--start FILE)",
            path.display()
        );
    };
    let table = load_table_csv(path)?;
    let start_table = load_table_csv(start)?;
    Ok(Protocol::from_tables(&table, &start_table, today)?)
}

/// A link and the clock its timeouts run on.
pub struct Backend {
    pub link: Box<dyn LineLink>,
    pub clock: Box<dyn Clock>,
    pub simulated: bool,
}

// Test hooks for the simulated controller.
fn sim_config() -> SimConfig {
    let mut cfg = SimConfig::default();
    if let Ok(f) = std::env::var("LIGHTCTL_SIM_CLOCK_FACTOR")
        && let Ok(f) = f.parse::<f64>()
    {
        cfg.clock_factor = f;
    }
    if std::env::var("LIGHTCTL_SIM_SILENT").is_ok_and(|v| v == "1") {
        cfg.silent = true;
    }
    if let Ok(len) = std::env::var("LIGHTCTL_SIM_PATTERN_LENGTH")
        && let Ok(len) = len.parse::<u32>()
    {
        cfg.capabilities = Some((len, 32, 4));
    }
    cfg
}

fn simulated() -> Backend {
    let clock = ManualClock::new();
    Backend {
        link: Box::new(SimulatedDevice::new(sim_config(), clock.clone())),
        clock: Box::new(clock),
        simulated: true,
    }
}

pub fn open_backend(cfg: &Config, dev: &DeviceArgs) -> Result<Backend> {
    if dev.simulate {
        return Ok(simulated());
    }
    let Some(port) = dev.port.as_deref().or(cfg.serial.port.as_deref()) else {
        eyre::bail!("no serial port configured; set serial.port, pass --port, or use --simulate");
    };
    open_serial(port, cfg)
}

#[cfg(feature = "hardware")]
fn open_serial(port: &str, cfg: &Config) -> Result<Backend> {
    // Boards reset when the port opens.
    let link = lightctl_hardware::SerialLink::open(
        port,
        cfg.serial.baud,
        std::time::Duration::from_secs(2),
    )
    .map_err(|e| lightctl_core::LightError::Transport(format!("cannot open {port}: {e}")))?;
    Ok(Backend {
        link: Box::new(link),
        clock: Box::new(lightctl_traits::MonotonicClock::new()),
        simulated: false,
    })
}

#[cfg(not(feature = "hardware"))]
fn open_serial(port: &str, _cfg: &Config) -> Result<Backend> {
    eyre::bail!(
        "serial port {port} requested but this build has no serial support; rebuild with --features hardware or pass --simulate"
    )
}

fn source_name(s: &FactorSource) -> &'static str {
    match s {
        FactorSource::Override => "override",
        FactorSource::Stored(_) => "stored",
        FactorSource::Measured(_) => "measured",
    }
}

#[allow(clippy::too_many_arguments)]
pub fn compile_cmd(
    cfg: &Config,
    protocol_path: &Path,
    start: Option<&Path>,
    factor: Option<f64>,
    pattern_length: Option<usize>,
    auto: bool,
    output: Option<&Path>,
) -> Result<()> {
    let now = Local::now().naive_local();
    let protocol = load_protocol(protocol_path, start, now.date())?;
    let mut opts = CompileOptions::from(&cfg.compile);
    if let Some(l) = pattern_length {
        if l == 0 {
            eyre::bail!("--pattern-length must be >= 1");
        }
        opts.pattern_length = l;
    }
    opts.auto_pattern_length |= auto;
    let factor = factor.or_else(|| protocol.override_factor()).unwrap_or(1.0);
    let program = compile(&protocol, factor, &opts, now)?;

    if let Some(out) = output {
        let log = program.command_log(&protocol_path.display().to_string(), now);
        lightctl_core::atomic::write_atomic(out, log.as_bytes())
            .wrap_err_with(|| format!("failed to write {}", out.display()))?;
        tracing::info!(path = %out.display(), "command file written");
    }
    let lines = program.lines();
    report(
        json!({
            "status": "ok",
            "pattern_length": program.pattern_length,
            "factor": program.factor,
            "lines": lines,
        }),
        || {
            let mut text = lines.join("\n");
            if let Some(r) = &program.length_report {
                let counts: Vec<String> = r.counts.iter().map(|(l, n)| format!("L={l}: {n}")).collect();
                text.push_str(&format!(
                    "\n# pattern length {} used; commands per length: {}",
                    program.pattern_length,
                    counts.join(", ")
                ));
            }
            text
        },
    );
    Ok(())
}

fn manager(cfg: &Config) -> CalibrationManager {
    CalibrationManager::new(
        strategy_from_config(&cfg.calibration),
        SamplingTiming::from(&cfg.calibration),
    )
}

pub fn run_cmd(
    cfg: &Config,
    protocol_path: &Path,
    start: Option<&Path>,
    dev: &DeviceArgs,
    force_calibration: bool,
    save: Option<&Path>,
    cancel: &AtomicBool,
) -> Result<()> {
    let today = Local::now().date_naive();
    let protocol = load_protocol(protocol_path, start, today)?;
    let opts = CompileOptions::from(&cfg.compile);
    // Surface protocol errors before the device is touched.
    compile(&protocol, 1.0, &opts, Local::now().naive_local())?;

    let backend = open_backend(cfg, dev)?;
    let clock: &dyn Clock = backend.clock.as_ref();
    let mut session = DeviceSession::new(backend.link, clock, SessionTimeouts::from(&cfg.serial));
    session.greet()?;
    let identity = DeviceIdentity::from_port(&session.link_mut().port_info());
    tracing::info!(device_id = %identity.id, port = %identity.board.port, "device identified");

    let store = JsonFileStore::new(&cfg.calibration.store_path);
    let policy = CalibrationPolicy {
        force: force_calibration,
        override_factor: protocol.override_factor(),
        ..CalibrationPolicy::from(&cfg.calibration)
    };
    let resolved = manager(cfg).resolve_factor(
        session.link_mut(),
        clock,
        &identity,
        &store,
        &policy,
        cancel,
    )?;

    let now = Local::now().naive_local();
    let program: CompiledProgram = compile(&protocol, resolved.factor, &opts, now)?;
    let warnings = session.verify(&program)?;
    let sent = session.transmit(&program)?;
    session.bye()?;

    if let Some(path) = save {
        let log = program.command_log(&protocol_path.display().to_string(), now);
        lightctl_core::atomic::write_atomic(path, log.as_bytes())
            .wrap_err_with(|| format!("failed to write {}", path.display()))?;
    }
    report(
        json!({
            "status": "ok",
            "device_id": identity.id,
            "simulated": backend.simulated,
            "factor": resolved.factor,
            "factor_source": source_name(&resolved.source),
            "commands_sent": sent,
            "warnings": warnings,
        }),
        || {
            format!(
                "Sent {sent} commands to {} (factor {:.6}, {}).",
                identity.board.port,
                resolved.factor,
                source_name(&resolved.source)
            )
        },
    );
    Ok(())
}

pub fn calibrate_cmd(cfg: &Config, dev: &DeviceArgs, cancel: &AtomicBool) -> Result<()> {
    let backend = open_backend(cfg, dev)?;
    let clock: &dyn Clock = backend.clock.as_ref();
    let mut session = DeviceSession::new(backend.link, clock, SessionTimeouts::from(&cfg.serial));
    session.greet()?;
    let identity = DeviceIdentity::from_port(&session.link_mut().port_info());
    let store = JsonFileStore::new(&cfg.calibration.store_path);
    let policy = CalibrationPolicy {
        force: true,
        ..CalibrationPolicy::from(&cfg.calibration)
    };
    let resolved = manager(cfg).resolve_factor(
        session.link_mut(),
        clock,
        &identity,
        &store,
        &policy,
        cancel,
    )?;
    session.bye()?;

    let FactorSource::Measured(rec) = resolved.source else {
        eyre::bail!("calibration did not produce a measurement");
    };
    let drift = lightctl_core::util::drift_per_12h_s(rec.calib_factor);
    report(
        json!({ "status": "ok", "record": rec, "drift_per_12h_s": drift }),
        || {
            format!(
                "Device {} calibrated: factor {:.6}, R² {:.6}, drift {drift:+.2} s per 12 h ({}).",
                rec.device_id, rec.calib_factor, rec.r_squared, rec.method
            )
        },
    );
    Ok(())
}

pub fn list_calibrations(cfg: &Config) -> Result<()> {
    let store = JsonFileStore::new(&cfg.calibration.store_path);
    let records = store.list()?;
    let now = chrono::Utc::now();
    report(json!({ "status": "ok", "records": records }), || {
        if records.is_empty() {
            return format!("No calibrations stored in {}.", store.path().display());
        }
        records
            .iter()
            .map(|r| {
                let state = if r.is_valid(now, cfg.calibration.validity_days) {
                    "valid"
                } else {
                    "expired"
                };
                format!(
                    "{}  factor {:.6}  R² {:.4}  {}  {} days old ({state})  {}",
                    r.device_id,
                    r.calib_factor,
                    r.r_squared,
                    r.method,
                    r.age_days(now),
                    r.board_info.port
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    });
    Ok(())
}

pub fn delete_calibration(cfg: &Config, device_id: &str) -> Result<()> {
    let store = JsonFileStore::new(&cfg.calibration.store_path);
    let removed = store.delete(device_id)?;
    if !removed {
        eyre::bail!("no calibration stored for device {device_id}");
    }
    report(json!({ "status": "ok", "deleted": device_id }), || {
        format!("Deleted calibration of {device_id}.")
    });
    Ok(())
}

pub fn self_check(cfg: &Config, dev: &DeviceArgs) -> Result<()> {
    #[cfg(feature = "hardware")]
    {
        match lightctl_hardware::list_ports() {
            Ok(ports) => {
                for p in &ports {
                    tracing::info!(port = %p.port, serial = ?p.serial_number, "serial port found");
                }
            }
            Err(e) => tracing::warn!(error = %e, "could not enumerate serial ports"),
        }
    }

    let backend = open_backend(cfg, dev)?;
    let clock: &dyn Clock = backend.clock.as_ref();
    let mut session = DeviceSession::new(backend.link, clock, SessionTimeouts::from(&cfg.serial));
    let caps = session.greet()?;
    let memory = session.memory()?;
    session.bye()?;
    let identity = DeviceIdentity::from_port(&session.link_mut().port_info());
    report(
        json!({
            "status": "ok",
            "simulated": backend.simulated,
            "device_id": identity.id,
            "pattern_length": caps.pattern_length,
            "max_pattern_num": caps.max_pattern_num,
            "max_channel_num": caps.max_channel_num,
            "pulse_mode": memory.as_ref().map(|m| m.pulse_mode),
        }),
        || {
            let fmt = |v: Option<u32>| v.map_or_else(|| "?".to_string(), |n| n.to_string());
            format!(
                "OK: device {} ({}) PATTERN_LENGTH={} MAX_PATTERN_NUM={} MAX_CHANNEL_NUM={}",
                identity.id,
                if backend.simulated { "simulated" } else { "serial" },
                fmt(caps.pattern_length),
                fmt(caps.max_pattern_num),
                fmt(caps.max_channel_num)
            )
        },
    );
    Ok(())
}
