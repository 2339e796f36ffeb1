//! Append-only per-tick controller record.
//!
//! One header line, then one `", "`-separated record per tick. Opening a file
//! log truncates whatever was there.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::NaiveDateTime;

use crate::util::round_to;

pub const HEADER: [&str; 15] = [
    "Datetime",
    "Elapsed Time",
    "Status",
    "Tracking",
    "Set Point",
    "Prop.",
    "Int",
    "Deriv",
    "Lower Limit",
    "Upper Limit",
    "Max Volume",
    "Prop. on Meas.",
    "Input",
    "Output",
    "Cumulative",
];

pub const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn header_line() -> String {
    HEADER.join(", ")
}

/// Controller parameters at the moment of a tick.
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerStatus {
    pub enabled: bool,
    pub tracking: String,
    pub setpoint: f64,
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    pub lower: f64,
    pub upper: f64,
    pub ceiling: f64,
    pub proportional_on_measurement: bool,
}

fn on_off(b: bool) -> &'static str {
    if b { "Enabled" } else { "Disabled" }
}

impl ControllerStatus {
    pub fn fields(&self) -> Vec<String> {
        vec![
            on_off(self.enabled).to_string(),
            self.tracking.clone(),
            self.setpoint.to_string(),
            self.kp.to_string(),
            self.ki.to_string(),
            self.kd.to_string(),
            self.lower.to_string(),
            self.upper.to_string(),
            self.ceiling.to_string(),
            on_off(self.proportional_on_measurement).to_string(),
        ]
    }
}

impl std::fmt::Display for ControllerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} tracking {} setpoint {} gains ({}, {}, {}) limits [{}, {}] ceiling {} mL, P-on-M {}",
            on_off(self.enabled),
            self.tracking,
            self.setpoint,
            self.kp,
            self.ki,
            self.kd,
            self.lower,
            self.upper,
            self.ceiling,
            on_off(self.proportional_on_measurement),
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TickRecord {
    /// Timestamp of the measurement the tick consumed.
    pub at: NaiveDateTime,
    /// Hours since the experiment mark, when one is set.
    pub elapsed_hours: Option<f64>,
    pub status: ControllerStatus,
    pub input: f64,
    pub output: f64,
    pub cumulative: f64,
}

impl TickRecord {
    pub fn line(&self) -> String {
        let elapsed = self
            .elapsed_hours
            .map_or_else(|| "NaN".to_string(), |h| round_to(h, 3).to_string());
        let mut fields = vec![self.at.format(DATE_FORMAT).to_string(), elapsed];
        fields.extend(self.status.fields());
        fields.push(self.input.to_string());
        fields.push(self.output.to_string());
        fields.push(self.cumulative.to_string());
        fields.join(", ")
    }
}

pub trait TickLog {
    fn append(&mut self, record: &TickRecord) -> io::Result<()>;
}

/// Tick log backed by a text file.
#[derive(Debug)]
pub struct FileTickLog {
    path: PathBuf,
    file: File,
}

impl FileTickLog {
    /// Create or truncate `path` and write the header line.
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = File::create(&path)?;
        writeln!(file, "{}", header_line())?;
        file.flush()?;
        let file = OpenOptions::new().append(true).open(&path)?;
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TickLog for FileTickLog {
    fn append(&mut self, record: &TickRecord) -> io::Result<()> {
        writeln!(self.file, "{}", record.line())?;
        self.file.flush()
    }
}

/// In-memory tick log; clones share the same lines.
#[derive(Debug, Clone)]
pub struct MemoryTickLog {
    lines: Arc<Mutex<Vec<String>>>,
}

impl Default for MemoryTickLog {
    fn default() -> Self {
        Self {
            lines: Arc::new(Mutex::new(vec![header_line()])),
        }
    }
}

impl MemoryTickLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Header plus every record, in order.
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().map(|l| l.clone()).unwrap_or_default()
    }
}

impl TickLog for MemoryTickLog {
    fn append(&mut self, record: &TickRecord) -> io::Result<()> {
        let mut lines = self
            .lines
            .lock()
            .map_err(|_| io::Error::other("tick log poisoned"))?;
        lines.push(record.line());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn record(elapsed: Option<f64>) -> TickRecord {
        TickRecord {
            at: NaiveDate::from_ymd_opt(2019, 8, 27)
                .and_then(|d| d.and_hms_opt(14, 5, 9))
                .unwrap(),
            elapsed_hours: elapsed,
            status: ControllerStatus {
                enabled: true,
                tracking: "Glucose".into(),
                setpoint: 40.0,
                kp: 0.001,
                ki: 0.1,
                kd: 0.0,
                lower: 0.0,
                upper: 20.0,
                ceiling: 100.0,
                proportional_on_measurement: true,
            },
            input: 38.5,
            output: 1.25,
            cumulative: 3.5,
        }
    }

    #[test]
    fn record_line_has_one_field_per_header_column() {
        let line = record(Some(1.23456)).line();
        let fields: Vec<&str> = line.split(", ").collect();
        assert_eq!(fields.len(), HEADER.len());
        assert_eq!(fields[0], "2019-08-27 14:05:09");
        assert_eq!(fields[1], "1.235");
        assert_eq!(fields[2], "Enabled");
        assert_eq!(fields[3], "Glucose");
        assert_eq!(fields[11], "Enabled");
        assert_eq!(&fields[12..], ["38.5", "1.25", "3.5"]);
    }

    #[test]
    fn unmarked_elapsed_is_nan() {
        let line = record(None).line();
        assert_eq!(line.split(", ").nth(1), Some("NaN"));
    }

    #[test]
    fn file_log_truncates_and_writes_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pid_log.txt");
        std::fs::write(&path, "stale\nstale\n").unwrap();

        let mut log = FileTickLog::create(&path).unwrap();
        log.append(&record(None)).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], header_line());
        assert!(lines[1].starts_with("2019-08-27 14:05:09, NaN, Enabled"));
    }
}
