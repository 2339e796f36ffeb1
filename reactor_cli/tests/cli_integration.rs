use assert_cmd::Command;
use predicates::prelude::*;
use rstest::rstest;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::tempdir;

// Minimal valid config for the simulated chain; every path lives in `dir`.
fn write_valid_config(dir: &tempfile::TempDir) -> PathBuf {
    write_config(dir, "lower = 0.0\nupper = 20.0")
}

fn write_config(dir: &tempfile::TempDir, pid_limits: &str) -> PathBuf {
    let root = dir.path().display().to_string().replace('\\', "/");
    let toml = format!(
        r#"
[serial]
timeout_ms = 10

[pumps]
idle_poll_ms = 10
idle_wait_max_ms = 1000

[[pumps.pump]]
address = 1
vol_per_rev = 0.5
rpm = 100.0
direction = "cw"

[pid]
kp = 0.001
ki = 0.1
kd = 0.0
setpoint = 40.0
{pid_limits}
ceiling_ml = 100.0
track = "Glucose"

[watch]
raw_dir = "{root}/raw"
prediction_dir = "{root}/predictions"
autosave_pattern = "autosave.txt"
settle_ms = 0
status_refresh_ms = 50

[logging]
tick_log = "{root}/pid_log.txt"
"#
    );
    let path = dir.path().join("cfg.toml");
    fs::write(&path, toml).unwrap();
    path
}

fn reactor(cfg: &Path) -> Command {
    let mut cmd = Command::cargo_bin("reactor").unwrap();
    cmd.arg("--config").arg(cfg);
    cmd
}

#[rstest]
#[case(&["--help"], 0, "Usage:", "stdout")]
#[case(&["discover"], 0, "2", "stdout")]
#[case(&["calibrate", "1", "--measured", "12.5"], 0, "vol/rev = 2.5000", "stdout")]
#[case(&["calibrate", "1", "--revolutions", "0", "--measured", "1"], 1, "revolutions must be > 0", "stderr")]
#[case(&["dispense", "VP9", "1.0"], 1, "unknown pump", "stderr")]
#[case(&["speed", "1", "cw", "700"], 1, "RPM out of range", "stderr")]
#[case(&["status"], 0, "pump 1:", "stdout")]
#[case(&["self-check"], 0, "ok", "stdout")]
#[case(&["discover", "--bogus"], 2, "unexpected argument", "stderr")]
fn cli_table_cases(
    #[case] args: &[&str],
    #[case] exit_code: i32,
    #[case] needle: &str,
    #[case] stream: &str,
) {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir);

    let mut cmd = reactor(&cfg);
    for a in args {
        cmd.arg(a);
    }

    let assert = cmd.assert().code(exit_code);
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
fn discover_lists_every_simulated_pump() {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir);

    reactor(&cfg)
        .env("REACTOR_SIM_PUMPS", "3")
        .arg("discover")
        .assert()
        .success()
        .stdout(predicate::str::diff("1\n2\n3\n"));
}

#[rstest]
#[case(false, "No pumps answered")]
#[case(true, "\"reason\":\"NoPumps\"")]
fn empty_chain_exits_with_no_pumps_code(#[case] json: bool, #[case] needle: &str) {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir);

    let mut cmd = reactor(&cfg);
    if json {
        cmd.arg("--json");
    }
    cmd.env("REACTOR_SIM_PUMPS", "0")
        .arg("discover")
        .assert()
        .code(3)
        .stderr(predicate::str::contains(needle));
}

#[test]
fn cli_reports_bad_calibration_header() {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir);

    let bad_csv = dir.path().join("calib.csv");
    let mut f = fs::File::create(&bad_csv).unwrap();
    writeln!(f, "pump,revs,ml").unwrap();
    writeln!(f, "1,5,12.5").unwrap();

    reactor(&cfg)
        .arg("--calibration")
        .arg(&bad_csv)
        .arg("self-check")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid headers"));
}

#[test]
fn good_calibration_is_reported_by_self_check() {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir);

    let csv = dir.path().join("calib.csv");
    fs::write(&csv, "address,revolutions,volume_ml\n1,5,12.5\n1,10,25.0\n").unwrap();

    reactor(&cfg)
        .arg("--calibration")
        .arg(&csv)
        .arg("self-check")
        .assert()
        .success()
        .stdout(predicate::str::contains("calibration: ok"));
}

#[test]
fn invalid_config_is_rejected() {
    let dir = tempdir().unwrap();
    let cfg = write_config(&dir, "lower = 5.0\nupper = 1.0");

    reactor(&cfg)
        .arg("discover")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("pid.lower must be <= pid.upper"));
}

#[test]
fn missing_config_file_is_reported() {
    let dir = tempdir().unwrap();

    reactor(&dir.path().join("nope.toml"))
        .arg("discover")
        .assert()
        .failure()
        .stderr(predicate::str::contains("read config"));
}

#[test]
fn process_spectrum_writes_output_file() {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir);

    let mut raw = String::new();
    for i in 0..23 {
        raw.push_str(&format!("Meta {i}\tx\n"));
    }
    raw.push_str("0\t200.0\t0\t1.5\n1\t201.0\t0\t2.5\n");
    let input = dir.path().join("scan_0001.txt");
    fs::write(&input, raw).unwrap();

    reactor(&cfg)
        .arg("process-spectrum")
        .arg(&input)
        .assert()
        .success()
        .stdout(predicate::str::contains("scan_0001_proc.dat"));

    let out = dir.path().join("Output").join("scan_0001_proc.dat");
    assert_eq!(
        fs::read_to_string(out).unwrap(),
        "#d, 2x1\n#c 200.0, 201.0\n#s, S1, 1.5, 2.5\n"
    );
}

#[test]
fn run_answers_console_commands_until_quit() {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir);

    reactor(&cfg)
        .arg("run")
        .write_stdin("status\nbogus\nquit\n")
        .timeout(std::time::Duration::from_secs(30))
        .assert()
        .success()
        .stdout(predicate::str::contains("controller: Disabled"))
        .stdout(predicate::str::contains("unknown command"))
        .stdout(predicate::str::contains("bye"))
        .stdout(predicate::str::contains("stopped after 0 ticks"));

    assert!(dir.path().join("predictions").is_dir());
    assert!(dir.path().join("pid_log.txt").exists());
}

#[test]
fn run_stops_at_end_of_input() {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir);

    reactor(&cfg)
        .arg("--json")
        .arg("run")
        .arg("--enable")
        .write_stdin("")
        .timeout(std::time::Duration::from_secs(30))
        .assert()
        .success()
        .stdout(predicate::str::contains("\"ticks\":0"));
}
