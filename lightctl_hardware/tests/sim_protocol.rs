use std::time::Duration;

use lightctl_hardware::{SimConfig, SimulatedDevice};
use lightctl_traits::LineLink;
use lightctl_traits::clock::manual::ManualClock;
use rstest::rstest;

fn device(cfg: SimConfig) -> (SimulatedDevice<ManualClock>, ManualClock) {
    let clock = ManualClock::new();
    (SimulatedDevice::new(cfg, clock.clone()), clock)
}

fn drain(dev: &mut SimulatedDevice<ManualClock>) -> Vec<String> {
    let mut out = Vec::new();
    while let Some(l) = dev.try_read_line().unwrap() {
        out.push(l);
    }
    out
}

#[rstest]
#[case(Some((8, 32, 4)), "Salve;PATTERN_LENGTH:8;MAX_PATTERN_NUM:32;MAX_CHANNEL_NUM:4")]
#[case(None, "Salve")]
fn greeting_reflects_capabilities(#[case] caps: Option<(u32, u32, u32)>, #[case] expected: &str) {
    let (mut dev, _) = device(SimConfig {
        capabilities: caps,
        ..SimConfig::default()
    });
    dev.write_line("Hello").unwrap();
    assert_eq!(drain(&mut dev), vec![expected.to_string()]);
}

#[test]
fn boot_noise_precedes_greeting() {
    let (mut dev, _) = device(SimConfig {
        boot_noise: vec!["garbage".into(), "more".into()],
        ..SimConfig::default()
    });
    for expected in ["garbage", "more"] {
        dev.write_line("Hello").unwrap();
        assert_eq!(drain(&mut dev), vec![expected.to_string()]);
    }
    dev.write_line("Hello").unwrap();
    assert!(drain(&mut dev)[0].starts_with("Salve"));
}

#[test]
fn corrupt_echo_differs_from_command() {
    let (mut dev, _) = device(SimConfig {
        corrupt_echo: true,
        ..SimConfig::default()
    });
    let cmd = "PATTERN:1;CH:1;STATUS:1,0;TIME_MS:1000,1000;REPEATS:2";
    dev.write_line(cmd).unwrap();
    let echo = drain(&mut dev);
    assert_eq!(echo.len(), 1);
    assert_ne!(echo[0], cmd);
}

#[test]
fn silent_device_records_but_never_replies() {
    let (mut dev, clock) = device(SimConfig {
        silent: true,
        ..SimConfig::default()
    });
    dev.write_line("Hello").unwrap();
    dev.write_line("GET_MEMORY").unwrap();
    clock.advance(Duration::from_secs(60));
    assert!(drain(&mut dev).is_empty());
    assert_eq!(dev.received(), ["Hello", "GET_MEMORY"]);
}

#[test]
fn timestamps_follow_device_clock() {
    let (mut dev, clock) = device(SimConfig {
        clock_factor: 2.0,
        ..SimConfig::default()
    });
    dev.write_line("calibrate_timestamps_10_2").unwrap();
    assert_eq!(drain(&mut dev), vec!["calib_timestamp_0".to_string()]);
    clock.advance(Duration::from_secs(10));
    assert_eq!(drain(&mut dev), vec!["calib_timestamp_5000".to_string()]);
    clock.advance(Duration::from_secs(10));
    assert_eq!(drain(&mut dev), vec!["calib_timestamp_10000".to_string()]);
}

#[test]
fn port_info_is_configurable() {
    let (dev, _) = device(SimConfig::default());
    assert_eq!(dev.port_info().serial_number.as_deref(), Some("SIM-0001"));
}
