#![no_main]
use chrono::NaiveDate;
use libfuzzer_sys::fuzz_target;
use lightctl_core::{CompileOptions, Protocol, compile};

fuzz_target!(|data: &str| {
    let Some(today) = NaiveDate::from_ymd_opt(2025, 1, 1) else {
        return;
    };
    if let Ok(p) = Protocol::from_text(data, today)
        && let Some(now) = today.and_hms_opt(0, 0, 0)
    {
        let _ = compile(&p, 1.0003, &CompileOptions::default(), now);
    }
});
