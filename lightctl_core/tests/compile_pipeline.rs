use chrono::{NaiveDate, NaiveDateTime};
use lightctl_config::{RawTable, parse_table_csv};
use lightctl_core::{CompileOptions, LightError, Protocol, compile};
use rstest::rstest;

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 3, 14).unwrap()
}

fn now() -> NaiveDateTime {
    today().and_hms_opt(9, 0, 0).unwrap()
}

fn blink_table() -> RawTable {
    RawTable::from_rows(
        &["Sections", "CH1_status", "CH1_time_s"],
        &[
            &["1", "1", "1"],
            &["2", "0", "1"],
            &["3", "1", "1"],
            &["4", "0", "1"],
        ],
    )
}

fn start_ch1() -> RawTable {
    RawTable::from_rows(&["", "CH1"], &[&["start", "10"], &["wait", "0"]])
}

#[test]
fn four_row_blink_folds_into_one_pattern() {
    let protocol = Protocol::from_tables(&blink_table(), &start_ch1(), today()).unwrap();
    let program = compile(&protocol, 1.0, &CompileOptions::default(), now()).unwrap();
    assert_eq!(
        program.lines(),
        vec![
            "PATTERN:1;CH:1;STATUS:1,0;TIME_MS:1000,1000;REPEATS:2".to_string(),
            "PATTERN:0;CH:1;STATUS:0;TIME_MS:10000;REPEATS:1".to_string(),
        ]
    );
    assert_eq!(program.requirements().pattern_length, 2);
    assert_eq!(program.requirements().patterns_per_channel, 1);
}

#[test]
fn factor_shortens_every_device_duration() {
    let protocol = Protocol::from_tables(&blink_table(), &start_ch1(), today()).unwrap();
    let program = compile(&protocol, 1.001, &CompileOptions::default(), now()).unwrap();
    assert_eq!(program.patterns[0].entries[0].time_ms, 999);
    assert_eq!(program.waits[0].countdown_ms, 9990);
}

#[rstest]
#[case(false, 2)]
#[case(true, 4)]
fn auto_length_picks_the_most_compact_candidate(#[case] auto: bool, #[case] expected_len: usize) {
    // 1,1,0,0 repeated: L=4 folds everything, L=2 needs alternating windows.
    let rows: Vec<[String; 3]> = (0..16)
        .map(|i| [i.to_string(), (if i % 4 < 2 { "1" } else { "0" }).to_string(), "1".to_string()])
        .collect();
    let row_refs: Vec<Vec<&str>> = rows.iter().map(|r| r.iter().map(String::as_str).collect()).collect();
    let slices: Vec<&[&str]> = row_refs.iter().map(Vec::as_slice).collect();
    let table = RawTable::from_rows(&["Sections", "CH1_status", "CH1_time_s"], &slices);
    let protocol = Protocol::from_tables(&table, &start_ch1(), today()).unwrap();
    let opts = CompileOptions {
        auto_pattern_length: auto,
        ..CompileOptions::default()
    };
    let program = compile(&protocol, 1.0, &opts, now()).unwrap();
    assert_eq!(program.pattern_length, expected_len);
    let report = program.length_report.unwrap();
    assert_eq!(report.best, 4);
    assert_eq!(report.count_for(4), Some(1));
}

#[test]
fn csv_pulse_protocol_compiles_with_pulse_clause() {
    let csv = "\
Sections,CH1_status,CH1_time_ms,CH1_period_ms,CH1_pulse_width_ms
1,1,500,100,10
2,0,500,,
";
    let table = parse_table_csv(csv.as_bytes()).unwrap();
    let start = RawTable::from_rows(&["Channels", "Start_time", "Wait_status"], &[&["CH1", "2", "0"]]);
    let protocol = Protocol::from_tables(&table, &start, today()).unwrap();
    assert!(protocol.requires_pulse());
    let program = compile(&protocol, 1.0, &CompileOptions::default(), now()).unwrap();
    assert_eq!(
        program.patterns[0].to_string(),
        "PATTERN:1;CH:1;STATUS:1,0;TIME_MS:500,500;REPEATS:1;PULSE:T100pw10,T0pw0,"
    );
}

#[test]
fn missing_start_for_active_channel_is_rejected() {
    let start = RawTable::from_rows(&["", "CH2"], &[&["start", "10"], &["wait", "0"]]);
    let table = RawTable::from_rows(
        &["Sections", "CH1_status", "CH1_time_s", "CH2_status", "CH2_time_s"],
        &[&["1", "1", "1", "", ""]],
    );
    let protocol = Protocol::from_tables(&table, &start, today()).unwrap();
    let err = compile(&protocol, 1.0, &CompileOptions::default(), now()).unwrap_err();
    assert!(matches!(err, LightError::StartTime(ref m) if m.contains("CH1")));
}

#[test]
fn deadline_start_counts_down_from_now() {
    let start = RawTable::from_rows(&["", "CH1"], &[&["start", "09:01:30"], &["wait", "1"]]);
    let protocol = Protocol::from_tables(&blink_table(), &start, today()).unwrap();
    let program = compile(&protocol, 1.0, &CompileOptions::default(), now()).unwrap();
    assert_eq!(program.waits[0].countdown_ms, 90_000);
    assert_eq!(program.waits[0].idle, 1);
}

#[rstest]
#[case(0.0)]
#[case(-1.0)]
#[case(f64::NAN)]
fn bad_factor_fails_before_anything_is_built(#[case] factor: f64) {
    let protocol = Protocol::from_tables(&blink_table(), &start_ch1(), today()).unwrap();
    assert!(matches!(
        compile(&protocol, factor, &CompileOptions::default(), now()),
        Err(LightError::Range(_))
    ));
}

#[test]
fn text_protocol_is_corrected_but_not_recompressed() {
    let src = "\
PATTERN:1;CH:2;STATUS:1,0,1;TIME_MS:1000,2000,3000;REPEATS:5
START_TIME: {'CH2': 1.5}
WAIT_STATUS: {'CH2': 0}
";
    let protocol = Protocol::from_text(src, today()).unwrap();
    let program = compile(&protocol, 2.0, &CompileOptions::default(), now()).unwrap();
    assert_eq!(program.pattern_length, 3);
    assert!(program.length_report.is_none());
    assert_eq!(
        program.lines(),
        vec![
            "PATTERN:1;CH:2;STATUS:1,0,1;TIME_MS:500,1000,1500;REPEATS:5".to_string(),
            "PATTERN:0;CH:2;STATUS:0;TIME_MS:750;REPEATS:1".to_string(),
        ]
    );
}

#[test]
fn command_log_compiles_back_to_the_same_lines() {
    let start = RawTable::from_rows(&["", "CH1"], &[&["start", "12.345"], &["wait", "1"]]);
    let protocol = Protocol::from_tables(&blink_table(), &start, today()).unwrap();
    let program = compile(&protocol, 1.0003, &CompileOptions::default(), now()).unwrap();
    let log = program.command_log("blink.csv", now());
    assert!(log.contains("# Protocol file: blink.csv"));
    assert!(log.contains("REPEATS:2 # Pattern #1, Channel 1"));

    let reread = Protocol::from_text(&log, today()).unwrap();
    assert_eq!(reread.override_factor(), None);
    let again = compile(&reread, 1.0, &CompileOptions::default(), now()).unwrap();
    assert_eq!(again.lines(), program.lines());
}

fn pulse_protocol(width: &str) -> Result<Protocol, LightError> {
    let csv = format!(
        "Sections,CH1_status,CH1_time_ms,CH1_period_ms,CH1_pulse_width_ms\n1,1,500,1000,{width}\n2,0,500,,\n"
    );
    let table = parse_table_csv(csv.as_bytes()).unwrap();
    Protocol::from_tables(&table, &start_ch1(), today())
}

#[test]
fn sub_millisecond_width_is_a_pulse_error() {
    let err = pulse_protocol("0.4").unwrap_err();
    assert!(matches!(err, LightError::PulseConsistency(ref m) if m.contains("0 ms")), "{err:?}");
}

#[test]
fn one_millisecond_width_survives_correction_and_reloads() {
    let program = compile(&pulse_protocol("1").unwrap(), 1.001, &CompileOptions::default(), now()).unwrap();
    assert!(program.lines()[0].ends_with(";PULSE:T999pw1,T0pw0,"), "{:?}", program.lines());

    let reread = Protocol::from_text(&program.command_log("pulse.csv", now()), today()).unwrap();
    let again = compile(&reread, 1.0, &CompileOptions::default(), now()).unwrap();
    assert_eq!(again.lines(), program.lines());
}
