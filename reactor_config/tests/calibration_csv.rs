use std::fs::File;
use std::io::Write;

use reactor_config::{CalibrationRow, PumpCalibration, load_calibration_csv};
use rstest::rstest;
use tempfile::tempdir;

fn row(address: u8, revolutions: f64, volume_ml: f64) -> CalibrationRow {
    CalibrationRow {
        address,
        revolutions,
        volume_ml,
    }
}

#[rstest]
fn single_point_is_exact_ratio() {
    let c = PumpCalibration::from_rows(vec![row(1, 5.0, 12.5)]).unwrap();
    assert!((c.vol_per_rev[&1] - 2.5).abs() < 1e-12);
}

#[rstest]
fn fits_through_origin_per_pump() {
    // pump 1: exact 2.0 mL/rev; pump 2: slight scatter around 3.0
    let rows = vec![
        row(1, 5.0, 10.0),
        row(1, 10.0, 20.0),
        row(2, 5.0, 14.9),
        row(2, 10.0, 30.1),
    ];
    let c = PumpCalibration::from_rows(rows).unwrap();
    assert!((c.vol_per_rev[&1] - 2.0).abs() < 1e-12);
    // (5*14.9 + 10*30.1) / (25 + 100) = 375.5 / 125
    assert!((c.vol_per_rev[&2] - 3.004).abs() < 1e-9);
}

#[rstest]
#[case(vec![], "at least one row")]
#[case(vec![row(0, 5.0, 10.0)], "outside 1..=25")]
#[case(vec![row(1, -5.0, 10.0)], "negative revolutions")]
#[case(vec![row(1, 5.0, -1.0)], "negative volume")]
#[case(vec![row(1, 0.0, 3.0)], "no non-zero revolutions")]
#[case(vec![row(1, 5.0, 0.0)], "non-positive")]
fn rejects_bad_rows(#[case] rows: Vec<CalibrationRow>, #[case] needle: &str) {
    let err = PumpCalibration::from_rows(rows).expect_err("should fail");
    assert!(format!("{err}").contains(needle), "got: {err}");
}

#[rstest]
fn loads_csv_with_exact_headers() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("cal.csv");
    let mut f = File::create(&path).unwrap();
    writeln!(f, "address,revolutions,volume_ml").unwrap();
    writeln!(f, "1,5,12.0").unwrap();
    writeln!(f, "1,10,24.0").unwrap();
    writeln!(f, "3, 5, 7.5").unwrap();
    drop(f);

    let c = load_calibration_csv(&path).unwrap();
    assert_eq!(c.vol_per_rev.len(), 2);
    assert!((c.vol_per_rev[&1] - 2.4).abs() < 1e-12);
    assert!((c.vol_per_rev[&3] - 1.5).abs() < 1e-12);
}

#[rstest]
fn rejects_wrong_headers() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("cal.csv");
    std::fs::write(&path, "pump,rev,ml\n1,5,10\n").unwrap();
    let err = load_calibration_csv(&path).expect_err("should fail on headers");
    assert!(format!("{err}").contains("must have headers"));
}

#[rstest]
fn reports_bad_row_number() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("cal.csv");
    std::fs::write(&path, "address,revolutions,volume_ml\n1,5,10\n1,abc,10\n").unwrap();
    let err = load_calibration_csv(&path).expect_err("should fail on row");
    assert!(format!("{err}").contains("invalid CSV row 3"), "got: {err}");
}
