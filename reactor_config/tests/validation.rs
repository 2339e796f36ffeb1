use reactor_config::{DirectionCfg, TrackCfg, load_toml};
use rstest::rstest;

const BASE: &str = r#"
[serial]
port = "/dev/ttyUSB0"

[pumps]
dispense_to = "VP3"

[[pumps.pump]]
address = 1
vol_per_rev = 2.5
rpm = 450
direction = "cw"

[[pumps.pump]]
address = 2
vol_per_rev = 2.4

[[pumps.virtual]]
pump_1 = 1
pump_2 = 2
ratio = 0.25

[pid]
kp = 0.001
ki = 0.1
kd = 0.0
setpoint = 40.0
lower = 0.0
upper = 20.0
ceiling_ml = 150.0
track = "Glucose"
"#;

#[test]
fn accepts_full_config() {
    let cfg = load_toml(BASE).expect("parse TOML");
    cfg.validate().expect("valid config should pass");
    assert_eq!(cfg.serial.timeout_ms, 60);
    assert_eq!(cfg.pumps.pumps.len(), 2);
    assert_eq!(cfg.pumps.pumps[0].direction, Some(DirectionCfg::Cw));
    assert_eq!(cfg.pumps.virtuals[0].ratio, 0.25);
    assert_eq!(cfg.pid.track, TrackCfg::Label("Glucose".into()));
    assert_eq!(cfg.pid.average_window, 4);
    assert!(!cfg.pid.enabled);
}

#[test]
fn empty_config_uses_defaults() {
    let cfg = load_toml("").expect("parse empty TOML");
    cfg.validate().expect("defaults are valid");
    assert_eq!(cfg.pumps.idle_poll_ms, 1000);
    assert_eq!(cfg.watch.settle_ms, 500);
    assert_eq!(cfg.watch.retries, 3);
    assert_eq!(cfg.pid.track, TrackCfg::Index(0));
    assert_eq!(cfg.logging.tick_log.to_str(), Some("pid_log.txt"));
}

#[test]
fn numeric_track_is_an_index() {
    let cfg = load_toml("[pid]\ntrack = 2\n").expect("parse TOML");
    assert_eq!(cfg.pid.track, TrackCfg::Index(2));
}

#[rstest]
#[case("[serial]\ntimeout_ms = 0\n", "serial.timeout_ms")]
#[case("[[pumps.pump]]\naddress = 0\n", "pumps.pump.address")]
#[case("[[pumps.pump]]\naddress = 26\n", "pumps.pump.address")]
#[case(
    "[[pumps.pump]]\naddress = 1\nrpm = 700\ndirection = \"cw\"\n",
    "rpm must be in"
)]
#[case("[[pumps.pump]]\naddress = 1\nrpm = 100\n", "both rpm and direction")]
#[case("[[pumps.pump]]\naddress = 1\nvol_per_rev = 0.0\n", "vol_per_rev must be > 0")]
#[case(
    "[[pumps.virtual]]\npump_1 = 1\npump_2 = 2\nratio = 1.5\n",
    "ratio must be in"
)]
#[case("[pid]\nlower = 5.0\nupper = 1.0\n", "pid.lower must be <= pid.upper")]
#[case("[pid]\nlower = -20.0\nupper = 20.0\n", "pid.lower must be >= 0")]
#[case("[pid]\nceiling_ml = -1.0\n", "ceiling_ml must be >= 0")]
#[case("[pid]\naverage_window = 0\n", "average_window")]
#[case("[watch]\nretries = 0\n", "watch.retries")]
#[case("[logging]\nrotation = \"weekly\"\n", "logging.rotation")]
fn rejects_out_of_range(#[case] toml: &str, #[case] needle: &str) {
    let cfg = load_toml(toml).expect("parse TOML");
    let err = cfg.validate().expect_err("should reject");
    assert!(
        format!("{err}").contains(needle),
        "expected '{needle}' in '{err}'"
    );
}

#[test]
fn unknown_direction_is_a_parse_error() {
    let toml = "[[pumps.pump]]\naddress = 1\nrpm = 100\ndirection = \"up\"\n";
    assert!(load_toml(toml).is_err());
}
