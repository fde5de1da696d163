use assert_cmd::prelude::*;
use predicates::prelude::*;
use rstest::rstest;
use std::fs;
use std::path::PathBuf;
use std::process::Command;
use tempfile::tempdir;

// Config with the calibration store inside the temp dir and a short run.
fn write_config(dir: &tempfile::TempDir) -> PathBuf {
    let store = dir.path().join("calibrations.json");
    let toml = format!(
        r#"
[compile]
pattern_length = 2
candidate_lengths = [2, 4, 8]

[calibration]
method = "multi_timestamp"
store_path = "{}"
duration_s = 60
samples = 6
countdown_step_s = 0
"#,
        store.display().to_string().replace('\\', "/")
    );
    let path = dir.path().join("cfg.toml");
    fs::write(&path, toml).unwrap();
    path
}

fn write_protocol(dir: &tempfile::TempDir) -> (PathBuf, PathBuf) {
    let protocol = dir.path().join("blink.csv");
    fs::write(
        &protocol,
        "Sections,CH1_status,CH1_time_s\n1,1,1\n2,0,1\n3,1,1\n4,0,1\n",
    )
    .unwrap();
    let start = dir.path().join("start.csv");
    fs::write(&start, ",CH1\nstart,10\nwait,0\n").unwrap();
    (protocol, start)
}

fn lightctl(cfg: &PathBuf) -> Command {
    let mut cmd = Command::cargo_bin("lightctl_cli").unwrap();
    cmd.arg("--config").arg(cfg);
    cmd
}

#[rstest]
#[case(&["--help"], 0, "Usage:", "stdout")]
#[case(&["compile"], 2, "required", "stderr")]
#[case(&["self-check", "--simulate"], 0, "OK: device", "stdout")]
#[case(&["calibrations", "list"], 0, "No calibrations stored", "stdout")]
#[case(&["calibrations", "delete", "0123456789abcdef"], 1, "no calibration stored", "stderr")]
fn cli_table_cases(
    #[case] args: &[&str],
    #[case] exit_code: i32,
    #[case] needle: &str,
    #[case] stream: &str,
) {
    let dir = tempdir().unwrap();
    let cfg = write_config(&dir);
    let assert = lightctl(&cfg).args(args).assert().code(exit_code);
    match stream {
        "stdout" => {
            assert.stdout(predicate::str::contains(needle));
        }
        "stderr" => {
            assert.stderr(predicate::str::contains(needle));
        }
        other => panic!("unknown stream: {other}"),
    }
}

#[test]
fn compile_prints_device_lines() {
    let dir = tempdir().unwrap();
    let cfg = write_config(&dir);
    let (protocol, start) = write_protocol(&dir);
    lightctl(&cfg)
        .arg("compile")
        .arg(&protocol)
        .arg("--start")
        .arg(&start)
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "PATTERN:1;CH:1;STATUS:1,0;TIME_MS:1000,1000;REPEATS:2",
        ))
        .stdout(predicate::str::contains("PATTERN:0;CH:1;STATUS:0;TIME_MS:10000;REPEATS:1"));
}

#[test]
fn compile_json_and_command_file() {
    let dir = tempdir().unwrap();
    let cfg = write_config(&dir);
    let (protocol, start) = write_protocol(&dir);
    let out = dir.path().join("commands.txt");
    let output = lightctl(&cfg)
        .arg("--json")
        .arg("compile")
        .arg(&protocol)
        .arg("--start")
        .arg(&start)
        .arg("--factor")
        .arg("2")
        .arg("-o")
        .arg(&out)
        .output()
        .unwrap();
    assert!(output.status.success());
    let v: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(v["status"], "ok");
    assert_eq!(
        v["lines"][0],
        "PATTERN:1;CH:1;STATUS:1,0;TIME_MS:500,500;REPEATS:2"
    );
    let text = fs::read_to_string(&out).unwrap();
    assert!(text.contains("# Pattern commands"));
    assert!(text.contains("START_TIME: {'CH1': 5.000}"));
}

#[test]
fn compile_without_start_table_explains_itself() {
    let dir = tempdir().unwrap();
    let cfg = write_config(&dir);
    let (protocol, _) = write_protocol(&dir);
    lightctl(&cfg)
        .arg("compile")
        .arg(&protocol)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("--start FILE"));
}

#[test]
fn data_gap_is_a_protocol_error() {
    let dir = tempdir().unwrap();
    let cfg = write_config(&dir);
    let (_, start) = write_protocol(&dir);
    let protocol = dir.path().join("gap.csv");
    fs::write(&protocol, "Sections,CH1_status,CH1_time_s\n1,1,1\n2,,1\n3,1,1\n").unwrap();
    let output = lightctl(&cfg)
        .arg("--json")
        .arg("compile")
        .arg(&protocol)
        .arg("--start")
        .arg(&start)
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(3));
    let line = String::from_utf8_lossy(&output.stderr)
        .lines()
        .find(|l| l.contains("\"reason\":\"data_gap\""))
        .map(str::to_string)
        .expect("json error line");
    let v: serde_json::Value = serde_json::from_str(&line).unwrap();
    assert_eq!(v["details"]["columns"][0], "CH1_status");
}

#[test]
fn simulated_run_calibrates_once_then_reuses() {
    let dir = tempdir().unwrap();
    let cfg = write_config(&dir);
    let (protocol, start) = write_protocol(&dir);
    let saved = dir.path().join("sent.txt");
    let run = |expect: &str| {
        lightctl(&cfg)
            .env("LIGHTCTL_SIM_CLOCK_FACTOR", "1.0004")
            .arg("run")
            .arg(&protocol)
            .arg("--start")
            .arg(&start)
            .arg("--simulate")
            .arg("--save")
            .arg(&saved)
            .assert()
            .success()
            .stdout(predicate::str::contains("Sent 2 commands"))
            .stdout(predicate::str::contains(expect));
    };
    run("measured");
    assert!(dir.path().join("calibrations.json").exists());
    run("stored");
    assert!(fs::read_to_string(&saved).unwrap().contains("REPEATS:2"));
}

#[rstest]
#[case("LIGHTCTL_SIM_PATTERN_LENGTH", "1", 4, "cannot run this protocol")]
#[case("LIGHTCTL_SIM_SILENT", "1", 5, "did not answer in time")]
fn device_failures_map_to_exit_codes(
    #[case] var: &str,
    #[case] value: &str,
    #[case] code: i32,
    #[case] needle: &str,
) {
    let dir = tempdir().unwrap();
    let cfg = write_config(&dir);
    let (protocol, start) = write_protocol(&dir);
    lightctl(&cfg)
        .env(var, value)
        .arg("run")
        .arg(&protocol)
        .arg("--start")
        .arg(&start)
        .arg("--simulate")
        .assert()
        .code(code)
        .stderr(predicate::str::contains(needle));
}

#[test]
fn calibrate_then_list_and_delete() {
    let dir = tempdir().unwrap();
    let cfg = write_config(&dir);
    let output = lightctl(&cfg)
        .env("LIGHTCTL_SIM_CLOCK_FACTOR", "0.9995")
        .args(["--json", "calibrate", "--simulate"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let v: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let factor = v["record"]["calib_factor"].as_f64().unwrap();
    assert!((factor - 0.9995).abs() < 1e-3, "factor {factor}");
    let id = v["record"]["device_id"].as_str().unwrap().to_string();

    lightctl(&cfg)
        .args(["calibrations", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains(id.as_str()).and(predicate::str::contains("valid")));
    lightctl(&cfg)
        .args(["calibrations", "delete", id.as_str()])
        .assert()
        .success();
    lightctl(&cfg)
        .args(["calibrations", "delete", id.as_str()])
        .assert()
        .code(1);
}

#[test]
fn invalid_config_is_reported() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("bad.toml");
    fs::write(&path, "[compile]\npattern_length = 0\n").unwrap();
    Command::cargo_bin("lightctl_cli")
        .unwrap()
        .arg("--config")
        .arg(&path)
        .args(["self-check", "--simulate"])
        .assert()
        .code(7)
        .stderr(predicate::str::contains("Invalid configuration"));
}

#[test]
fn device_commands_need_a_port_or_simulate() {
    let dir = tempdir().unwrap();
    let cfg = write_config(&dir);
    let (protocol, start) = write_protocol(&dir);
    lightctl(&cfg)
        .arg("run")
        .arg(&protocol)
        .arg("--start")
        .arg(&start)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("no serial port configured"));
    lightctl(&cfg)
        .arg("calibrate")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("--simulate"));
    assert!(!dir.path().join("calibrations.json").exists());
}
