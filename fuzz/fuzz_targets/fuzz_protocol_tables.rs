#![no_main]
use chrono::NaiveDate;
use libfuzzer_sys::fuzz_target;
use lightctl_config::parse_table_csv;
use lightctl_core::{CompileOptions, Protocol, compile};

// Input is "<protocol csv>\0<start csv>". Every stage may reject it, none may panic.
fuzz_target!(|data: &[u8]| {
    let mut parts = data.splitn(2, |b| *b == 0);
    let (Some(protocol), Some(start)) = (parts.next(), parts.next()) else {
        return;
    };
    let (Ok(table), Ok(start)) = (parse_table_csv(protocol), parse_table_csv(start)) else {
        return;
    };
    let Some(today) = NaiveDate::from_ymd_opt(2025, 1, 1) else {
        return;
    };
    if let Ok(p) = Protocol::from_tables(&table, &start, today)
        && let Some(now) = today.and_hms_opt(0, 0, 0)
    {
        let _ = compile(&p, 1.0, &CompileOptions::default(), now);
    }
});
