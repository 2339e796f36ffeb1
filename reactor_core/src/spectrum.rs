//! Raw spectrum reformatting for the prediction tool.
//!
//! Raw files are tab-separated with 23 metadata lines; column 1 is the Raman
//! shift and column 3 the dark-subtracted intensity. The reformatted file
//! lands in `<dir>/Output/<stem>_proc.dat`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::SpectrumError;
use crate::util::decimal_text;

pub const METADATA_LINES: usize = 23;
const SHIFT_COLUMN: usize = 1;
const SIGNAL_COLUMN: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Wait before the first attempt so the file can finish copying.
    pub settle: Duration,
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            settle: Duration::from_millis(500),
            attempts: 3,
            delay: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Spectrum {
    pub shift: Vec<f64>,
    pub signal: Vec<f64>,
}

impl Spectrum {
    pub fn parse(text: &str) -> Result<Self, SpectrumError> {
        let data: Vec<&str> = text
            .lines()
            .skip(METADATA_LINES)
            .filter(|l| !l.trim().is_empty())
            .collect();
        if data.is_empty() {
            return Err(SpectrumError::Transient("no data rows yet".into()));
        }
        let widest = data.iter().map(|l| l.split('\t').count()).max().unwrap_or(0);
        if widest <= SIGNAL_COLUMN {
            return Err(SpectrumError::Structural(format!(
                "expected at least {} columns, found {widest}",
                SIGNAL_COLUMN + 1
            )));
        }

        let mut shift = Vec::with_capacity(data.len());
        let mut signal = Vec::with_capacity(data.len());
        for line in data {
            let cols: Vec<&str> = line.split('\t').collect();
            let parsed = cols
                .get(SHIFT_COLUMN)
                .zip(cols.get(SIGNAL_COLUMN))
                .and_then(|(x, y)| {
                    Some((x.trim().parse::<f64>().ok()?, y.trim().parse::<f64>().ok()?))
                });
            // column headers and half-written rows are skipped
            if let Some((x, y)) = parsed {
                shift.push(x);
                signal.push(y);
            }
        }
        if shift.is_empty() {
            return Err(SpectrumError::Transient("no numeric rows yet".into()));
        }
        Ok(Self { shift, signal })
    }

    /// Three-line prediction-tool input: dimensions, shifts, signal.
    pub fn render(&self) -> String {
        let join = |v: &[f64]| {
            v.iter()
                .map(|x| decimal_text(*x))
                .collect::<Vec<_>>()
                .join(", ")
        };
        format!(
            "#d, {}x1\n#c {}\n#s, S1, {}\n",
            self.shift.len(),
            join(&self.shift),
            join(&self.signal)
        )
    }
}

/// `<parent>/Output/<stem>_proc.dat`
pub fn output_path(input: &Path) -> Result<PathBuf, SpectrumError> {
    let parent = input
        .parent()
        .ok_or_else(|| SpectrumError::Structural(format!("{} has no parent", input.display())))?;
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| SpectrumError::Structural(format!("{} has no file name", input.display())))?;
    Ok(parent.join("Output").join(format!("{stem}_proc.dat")))
}

/// One attempt: read, reformat, write. Returns the output path.
pub fn process_file(input: &Path) -> Result<PathBuf, SpectrumError> {
    let text = fs::read_to_string(input)?;
    let spectrum = Spectrum::parse(&text)?;
    let out = output_path(input)?;
    if let Some(dir) = out.parent() {
        fs::create_dir_all(dir)?;
    }
    fs::write(&out, spectrum.render())?;
    Ok(out)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SpectrumProcessor {
    pub policy: RetryPolicy,
}

impl SpectrumProcessor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// Settle, then try up to `attempts` times. Structural failures stop
    /// immediately.
    pub async fn process(&self, input: &Path) -> Result<PathBuf, SpectrumError> {
        tokio::time::sleep(self.policy.settle).await;
        let attempts = self.policy.attempts.max(1);
        let mut attempt = 1;
        loop {
            match process_file(input) {
                Ok(out) => {
                    tracing::info!(input = %input.display(), output = %out.display(), "spectrum processed");
                    return Ok(out);
                }
                Err(e) if e.is_retryable() && attempt < attempts => {
                    tracing::warn!(
                        input = %input.display(),
                        error = %e,
                        remaining = attempts - attempt,
                        "spectrum read failed, retrying"
                    );
                    attempt += 1;
                    tokio::time::sleep(self.policy.delay).await;
                }
                Err(e) => {
                    tracing::warn!(input = %input.display(), error = %e, "spectrum skipped");
                    return Err(e);
                }
            }
        }
    }
}
