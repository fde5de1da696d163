//! Human-readable error descriptions and structured JSON error formatting.

use lightctl_core::LightError;

/// Map an eyre::Report to a human-readable explanation with likely causes and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    if let Some(le) = err.downcast_ref::<LightError>() {
        return match le {
            LightError::Format(m) => format!(
                "What happened: The protocol could not be parsed ({m}).\nLikely causes: A misspelled column header, a non-numeric cell, or a malformed command line.\nHow to fix: Correct the cell or line named above and rerun."
            ),
            LightError::Schema(m) => format!(
                "What happened: The protocol table layout is invalid ({m}).\nLikely causes: A channel is missing its status or time column, or channels have different pulse columns.\nHow to fix: Give every channel the same set of columns (CHn_status, CHn_time_<unit>, pulse columns)."
            ),
            LightError::DataGap { columns } => format!(
                "What happened: Empty cells inside the data of {}.\nLikely causes: A row was left blank in the middle of a channel.\nHow to fix: Fill the empty cells; only trailing rows of a channel may be empty.",
                columns.join(", ")
            ),
            LightError::Range(m) => format!(
                "What happened: A value is out of range ({m}).\nLikely causes: A negative duration, or a duration longer than the device counter holds.\nHow to fix: Use non-negative values below about 49 days per entry."
            ),
            LightError::PulseConsistency(m) => format!(
                "What happened: Pulse parameters do not agree ({m}).\nLikely causes: Width longer than the period, a duty cycle above 100%, or only one of frequency/period and width/duty given.\nHow to fix: Give frequency or period together with pulse width or duty cycle."
            ),
            LightError::Capability(m) => format!(
                "What happened: The device cannot run this protocol ({m}).\nLikely causes: Firmware built with a smaller PATTERN_LENGTH, fewer patterns or channels, or without pulse support.\nHow to fix: Recompile with a smaller compile.pattern_length or flash matching firmware."
            ),
            LightError::Timeout(m) => format!(
                "What happened: The device did not answer in time ({m}).\nLikely causes: Wrong port, cable unplugged, board still booting, or another program holding the port.\nHow to fix: Check the connection and serial.port, close other serial monitors, or raise serial.*_timeout_ms."
            ),
            LightError::Transport(m) => format!(
                "What happened: Communication with the device failed ({m}).\nLikely causes: Electrical noise, baud-rate mismatch, or a disconnected cable.\nHow to fix: Check serial.baud and the cable, then rerun."
            ),
            LightError::InsufficientData(m) => format!(
                "What happened: Calibration could not fit the device clock ({m}).\nLikely causes: Too few samples or identical sample durations.\nHow to fix: Use at least two distinct calibration.durations_s or more calibration.samples."
            ),
            LightError::StartTime(m) => format!(
                "What happened: Start times are invalid ({m}).\nLikely causes: A missing start for an active channel, or a clock time that already passed.\nHow to fix: Give every active channel a future start time or a countdown in seconds."
            ),
            LightError::CalibrationBusy(id) => format!(
                "What happened: Device {id} is already being calibrated.\nLikely causes: Another run on the same board.\nHow to fix: Wait for the other calibration to finish."
            ),
            LightError::Cancelled => {
                "What happened: The operation was cancelled.\nLikely causes: Ctrl-C was pressed.\nHow to fix: Rerun when ready; nothing was stored.".to_string()
            }
            LightError::Store(m) => format!(
                "What happened: The calibration database could not be used ({m}).\nLikely causes: A corrupt or unwritable calibration.store_path.\nHow to fix: Repair or remove the file, or point calibration.store_path elsewhere."
            ),
            LightError::Config(m) => format!(
                "What happened: Invalid configuration ({m}).\nLikely causes: Missing or out-of-range values in the TOML.\nHow to fix: Edit the config file, then rerun."
            ),
        };
    }

    let msg = err.to_string();
    let lower = msg.to_ascii_lowercase();

    if lower.contains("start-time table") {
        return format!(
            "What happened: {msg}.\nLikely causes: Only the protocol table was given.\nHow to fix: Pass the start-time CSV with --start FILE."
        );
    }
    if lower.contains("no serial port configured") {
        return format!(
            "What happened: {msg}.\nLikely causes: Neither serial.port in the config nor --port was given.\nHow to fix: Set serial.port or pass --port PORT; use --simulate for a dry run."
        );
    }
    if lower.contains("no serial support") {
        return format!(
            "What happened: {msg}.\nLikely causes: The CLI was built without the `hardware` feature.\nHow to fix: Rebuild with --features hardware, or use --simulate."
        );
    }

    let mut cause = String::new();
    if let Some(src) = err.source() {
        cause = format!(" Cause: {src}");
    }
    format!(
        "Something went wrong.{cause}\nHow to fix: Re-run with --log-level=debug for details. Original: {msg}"
    )
}

/// Stable exit codes per error class; anything else returns 1.
pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    let Some(le) = err.downcast_ref::<LightError>() else {
        return 1;
    };
    match le {
        e if e.is_protocol_error() => 3,
        LightError::Capability(_) => 4,
        LightError::Timeout(_) | LightError::Transport(_) => 5,
        LightError::InsufficientData(_) | LightError::CalibrationBusy(_) => 6,
        LightError::Store(_) | LightError::Config(_) => 7,
        LightError::Cancelled => 130,
        _ => 1,
    }
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    use serde_json::json;

    match err.downcast_ref::<LightError>() {
        Some(LightError::DataGap { columns }) => json!({
            "reason": "data_gap",
            "details": { "columns": columns },
            "message": humanize(err),
        })
        .to_string(),
        Some(le) => json!({ "reason": le.kind(), "message": humanize(err) }).to_string(),
        None => json!({ "reason": "error", "message": humanize(err) }).to_string(),
    }
}
