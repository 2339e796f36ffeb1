#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schemas and calibration parsing for the bioreactor controller.
//!
//! - `Config` and sub-structs are deserialized from TOML and validated.
//! - Calibration CSV loader enforces headers and fits volume-per-revolution
//!   per pump through the origin.
use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Deserialize;

/// Lowest and highest pump speed the drive accepts.
pub const RPM_MIN: f64 = 10.0;
pub const RPM_MAX: f64 = 600.0;
/// Highest address the daisy chain can carry.
pub const MAX_ADDRESS: u8 = 25;

/// Calibration CSV schema.
///
/// Expected headers:
/// address,revolutions,volume_ml
///
/// Example:
/// address,revolutions,volume_ml
/// 1,5,12.4
/// 1,10,24.9
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct CalibrationRow {
    pub address: u8,
    pub revolutions: f64,
    pub volume_ml: f64,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SerialCfg {
    /// Device path or COM name, e.g. "/dev/ttyUSB0" or "COM4"
    pub port: String,
    /// Per-read timeout in ms
    pub timeout_ms: u64,
    /// Byte budget for ordinary replies
    pub read_budget: usize,
    /// Byte budget for info (status) replies
    pub status_budget: usize,
}

impl Default for SerialCfg {
    fn default() -> Self {
        Self {
            port: String::new(),
            timeout_ms: 60,
            read_budget: 64,
            status_budget: 100,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DirectionCfg {
    Cw,
    Ccw,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PumpEntry {
    pub address: u8,
    pub vol_per_rev: Option<f64>,
    pub rpm: Option<f64>,
    pub direction: Option<DirectionCfg>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct VirtualEntry {
    pub pump_1: u8,
    pub pump_2: u8,
    pub ratio: f64,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PumpsCfg {
    /// Status poll interval while waiting for the first half of a paired dispense
    pub idle_poll_ms: u64,
    /// Upper bound on that wait
    pub idle_wait_max_ms: u64,
    #[serde(rename = "pump")]
    pub pumps: Vec<PumpEntry>,
    #[serde(rename = "virtual")]
    pub virtuals: Vec<VirtualEntry>,
    /// Pump the controller drives, "1" or "VP3"
    pub dispense_to: Option<String>,
}

impl Default for PumpsCfg {
    fn default() -> Self {
        Self {
            idle_poll_ms: 1000,
            idle_wait_max_ms: 600_000,
            pumps: Vec::new(),
            virtuals: Vec::new(),
            dispense_to: None,
        }
    }
}

/// Tracked column: a label once the feed has labels, otherwise an index.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum TrackCfg {
    Index(usize),
    Label(String),
}

impl Default for TrackCfg {
    fn default() -> Self {
        Self::Index(0)
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PidCfg {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    pub setpoint: f64,
    pub lower: f64,
    pub upper: f64,
    pub proportional_on_measurement: bool,
    /// Cumulative volume the controller may hand out over the whole run (mL)
    pub ceiling_ml: f64,
    pub track: TrackCfg,
    /// Number of trailing samples averaged into one PID input
    pub average_window: usize,
    pub enabled: bool,
}

impl Default for PidCfg {
    fn default() -> Self {
        Self {
            kp: 0.001,
            ki: 0.1,
            kd: 0.0,
            setpoint: 40.0,
            lower: 0.0,
            upper: 20.0,
            proportional_on_measurement: true,
            ceiling_ml: 100.0,
            track: TrackCfg::default(),
            average_window: 4,
            enabled: false,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WatchCfg {
    /// Directory the spectrometer writes raw spectra into
    pub raw_dir: PathBuf,
    /// Directory holding the prediction tool's autosave file
    pub prediction_dir: PathBuf,
    /// File name (or suffix) of the autosave file inside `prediction_dir`
    pub autosave_pattern: String,
    pub settle_ms: u64,
    pub retries: u32,
    pub retry_delay_ms: u64,
    pub status_refresh_ms: u64,
}

impl Default for WatchCfg {
    fn default() -> Self {
        Self {
            raw_dir: PathBuf::from("raw"),
            prediction_dir: PathBuf::from("predictions"),
            autosave_pattern: "autosave.txt".into(),
            settle_ms: 500,
            retries: 3,
            retry_delay_ms: 100,
            status_refresh_ms: 2000,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
    /// Per-tick controller record file
    pub tick_log: PathBuf,
}

impl Default for Logging {
    fn default() -> Self {
        Self {
            file: None,
            level: None,
            rotation: None,
            tick_log: PathBuf::from("pid_log.txt"),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub serial: SerialCfg,
    #[serde(default)]
    pub pumps: PumpsCfg,
    #[serde(default)]
    pub pid: PidCfg,
    #[serde(default)]
    pub watch: WatchCfg,
    #[serde(default)]
    pub logging: Logging,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

/// Fitted volume-per-revolution, keyed by pump address.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct PumpCalibration {
    pub vol_per_rev: BTreeMap<u8, f64>,
}

impl PumpCalibration {
    /// Least-squares slope through the origin per address:
    /// `vol_per_rev = Σ(rev·vol) / Σ(rev²)`.
    pub fn from_rows(rows: Vec<CalibrationRow>) -> eyre::Result<Self> {
        if rows.is_empty() {
            eyre::bail!("calibration requires at least one row");
        }

        let mut sums: BTreeMap<u8, (f64, f64)> = BTreeMap::new();
        for (idx, r) in rows.iter().enumerate() {
            if r.address == 0 || r.address > MAX_ADDRESS {
                eyre::bail!(
                    "calibration row {} has address {} outside 1..={MAX_ADDRESS}",
                    idx + 2,
                    r.address
                );
            }
            if !r.revolutions.is_finite() || r.revolutions < 0.0 {
                eyre::bail!("calibration row {} has negative revolutions", idx + 2);
            }
            if !r.volume_ml.is_finite() || r.volume_ml < 0.0 {
                eyre::bail!("calibration row {} has negative volume", idx + 2);
            }
            let e = sums.entry(r.address).or_insert((0.0, 0.0));
            e.0 += r.revolutions * r.volume_ml;
            e.1 += r.revolutions * r.revolutions;
        }

        let mut vol_per_rev = BTreeMap::new();
        for (addr, (sxy, sxx)) in sums {
            if sxx == 0.0 {
                eyre::bail!("calibration for pump {addr} has no non-zero revolutions");
            }
            let slope = sxy / sxx;
            if !slope.is_finite() || slope <= 0.0 {
                eyre::bail!("calibration for pump {addr} produced non-positive vol/rev");
            }
            vol_per_rev.insert(addr, slope);
        }
        Ok(Self { vol_per_rev })
    }
}

impl TryFrom<Vec<CalibrationRow>> for PumpCalibration {
    type Error = eyre::Report;
    fn try_from(rows: Vec<CalibrationRow>) -> Result<Self, Self::Error> {
        Self::from_rows(rows)
    }
}

pub fn load_calibration_csv(path: &std::path::Path) -> eyre::Result<PumpCalibration> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| eyre::eyre!("open calibration CSV {:?}: {}", path, e))?;

    // Enforce exact headers
    let headers = rdr
        .headers()
        .map_err(|e| eyre::eyre!("read CSV headers {:?}: {}", path, e))?
        .clone();
    let expected = ["address", "revolutions", "volume_ml"];
    let actual: Vec<String> = headers.iter().map(|s| s.to_string()).collect();
    if actual != expected {
        eyre::bail!(
            "calibration CSV must have headers 'address,revolutions,volume_ml', got: {}",
            actual.join(",")
        );
    }

    let mut rows = Vec::new();
    for (idx, rec) in rdr.deserialize::<CalibrationRow>().enumerate() {
        match rec {
            Ok(row) => rows.push(row),
            Err(e) => {
                eyre::bail!("invalid CSV row {}: {}", idx + 2, e);
            }
        }
    }

    PumpCalibration::try_from(rows)
}

fn check_address(what: &str, address: u8) -> eyre::Result<()> {
    if address == 0 || address > MAX_ADDRESS {
        eyre::bail!("{what} must be in 1..={MAX_ADDRESS}, got {address}");
    }
    Ok(())
}

impl Config {
    pub fn validate(&self) -> eyre::Result<()> {
        // Serial
        if self.serial.timeout_ms == 0 {
            eyre::bail!("serial.timeout_ms must be >= 1");
        }
        if self.serial.read_budget == 0 {
            eyre::bail!("serial.read_budget must be >= 1");
        }
        if self.serial.status_budget < 5 {
            eyre::bail!("serial.status_budget must be >= 5 to hold a status reply");
        }

        // Pumps
        if self.pumps.idle_poll_ms == 0 {
            eyre::bail!("pumps.idle_poll_ms must be >= 1");
        }
        if self.pumps.idle_wait_max_ms < self.pumps.idle_poll_ms {
            eyre::bail!("pumps.idle_wait_max_ms must be >= pumps.idle_poll_ms");
        }
        for p in &self.pumps.pumps {
            check_address("pumps.pump.address", p.address)?;
            if let Some(v) = p.vol_per_rev
                && !(v.is_finite() && v > 0.0)
            {
                eyre::bail!("pumps.pump[{}].vol_per_rev must be > 0", p.address);
            }
            if let Some(rpm) = p.rpm
                && !(RPM_MIN..=RPM_MAX).contains(&rpm)
            {
                eyre::bail!(
                    "pumps.pump[{}].rpm must be in [{RPM_MIN}, {RPM_MAX}]",
                    p.address
                );
            }
            if p.rpm.is_some() != p.direction.is_some() {
                eyre::bail!(
                    "pumps.pump[{}] needs both rpm and direction, or neither",
                    p.address
                );
            }
        }
        for v in &self.pumps.virtuals {
            check_address("pumps.virtual.pump_1", v.pump_1)?;
            check_address("pumps.virtual.pump_2", v.pump_2)?;
            if !(0.0..=1.0).contains(&v.ratio) {
                eyre::bail!("pumps.virtual.ratio must be in [0.0, 1.0]");
            }
        }

        // PID
        let pid = &self.pid;
        for (name, v) in [
            ("kp", pid.kp),
            ("ki", pid.ki),
            ("kd", pid.kd),
            ("setpoint", pid.setpoint),
        ] {
            if !v.is_finite() {
                eyre::bail!("pid.{name} must be finite");
            }
        }
        if pid.lower > pid.upper {
            eyre::bail!("pid.lower must be <= pid.upper");
        }
        if pid.lower < 0.0 {
            eyre::bail!("pid.lower must be >= 0");
        }
        if pid.ceiling_ml.is_sign_negative() || !pid.ceiling_ml.is_finite() {
            eyre::bail!("pid.ceiling_ml must be >= 0");
        }
        if pid.average_window == 0 {
            eyre::bail!("pid.average_window must be >= 1");
        }

        // Watch
        if self.watch.retries == 0 {
            eyre::bail!("watch.retries must be >= 1");
        }
        if self.watch.status_refresh_ms == 0 {
            eyre::bail!("watch.status_refresh_ms must be >= 1");
        }
        if self.watch.autosave_pattern.is_empty() {
            eyre::bail!("watch.autosave_pattern must not be empty");
        }

        // Logging
        if let Some(r) = self.logging.rotation.as_deref()
            && !matches!(r, "never" | "daily" | "hourly")
        {
            eyre::bail!("logging.rotation must be one of never|daily|hourly, got {r}");
        }

        Ok(())
    }
}
