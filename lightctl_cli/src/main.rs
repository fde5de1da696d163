mod cli;
mod error_fmt;
mod run;

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::Parser;
use eyre::{Result, WrapErr};
use lightctl_config::{Config, load_toml};
use lightctl_core::LightError;

use crate::cli::{CalibrationsCmd, Cli, Commands, FILE_GUARD, JSON_MODE};
use crate::error_fmt::{exit_code_for_error, format_error_json, humanize};

fn load_config(path: Option<&Path>) -> Result<Config> {
    let Some(path) = path else {
        return Ok(Config::default());
    };
    let text = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("failed to read config {}", path.display()))?;
    let cfg =
        load_toml(&text).map_err(|e| LightError::Config(format!("{}: {e}", path.display())))?;
    cfg.validate()
        .map_err(|e| LightError::Config(format!("{}: {e}", path.display())))?;
    Ok(cfg)
}

fn init_tracing(cli: &Cli, cfg: &Config) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::{EnvFilter, Layer, fmt};

    let console_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    let console = if cli.json {
        fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_filter(console_filter)
            .boxed()
    } else {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_filter(console_filter)
            .boxed()
    };

    let file_layer = cfg.logging.file.as_deref().map(|file| {
        let path = Path::new(file);
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let name = path
            .file_name()
            .map_or_else(|| "lightctl.log".into(), |n| n.to_string_lossy().into_owned());
        let appender = match cfg.logging.rotation.as_deref() {
            Some("daily") => tracing_appender::rolling::daily(dir, name),
            Some("hourly") => tracing_appender::rolling::hourly(dir, name),
            _ => tracing_appender::rolling::never(dir, name),
        };
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let _ = FILE_GUARD.set(guard);
        let level = cfg.logging.level.as_deref().unwrap_or("info");
        fmt::layer()
            .json()
            .with_ansi(false)
            .with_writer(writer)
            .with_filter(EnvFilter::new(level))
    });

    let _ = tracing_subscriber::registry()
        .with(console)
        .with(file_layer)
        .try_init();
}

fn dispatch(cli: Cli, cfg: &mut Config, cancel: &AtomicBool) -> Result<()> {
    match cli.cmd {
        Commands::Compile {
            protocol,
            start,
            factor,
            pattern_length,
            auto,
            output,
        } => run::compile_cmd(
            cfg,
            &protocol,
            start.as_deref(),
            factor,
            pattern_length,
            auto,
            output.as_deref(),
        ),
        Commands::Run {
            protocol,
            start,
            device,
            force_calibration,
            save,
        } => run::run_cmd(
            cfg,
            &protocol,
            start.as_deref(),
            &device,
            force_calibration,
            save.as_deref(),
            cancel,
        ),
        Commands::Calibrate { device, method } => {
            if let Some(m) = method {
                cfg.calibration.method = m.into();
                cfg.validate()
                    .map_err(|e| LightError::Config(e.to_string()))?;
            }
            run::calibrate_cmd(cfg, &device, cancel)
        }
        Commands::Calibrations { cmd } => match cmd {
            CalibrationsCmd::List => run::list_calibrations(cfg),
            CalibrationsCmd::Delete { device_id } => run::delete_calibration(cfg, &device_id),
        },
        Commands::SelfCheck { device } => run::self_check(cfg, &device),
    }
}

fn report_error(err: &eyre::Report) -> ! {
    if JSON_MODE.get().copied().unwrap_or(false) {
        eprintln!("{}", format_error_json(err));
    } else {
        eprintln!("{}", humanize(err));
    }
    tracing::error!(error = %err, "command failed");
    std::process::exit(exit_code_for_error(err));
}

fn main() {
    let cli = Cli::parse();
    let _ = JSON_MODE.set(cli.json);
    if !cli.json {
        let _ = color_eyre::install();
    }

    let mut cfg = match load_config(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            init_tracing(&cli, &Config::default());
            report_error(&e);
        }
    };
    init_tracing(&cli, &cfg);

    let cancel = Arc::new(AtomicBool::new(false));
    let flag = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        flag.store(true, Ordering::Relaxed);
    }) {
        tracing::warn!(error = %e, "failed to install Ctrl-C handler");
    }

    if let Err(e) = dispatch(cli, &mut cfg, &cancel) {
        report_error(&e);
    }
}
