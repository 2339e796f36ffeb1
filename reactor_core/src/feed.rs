//! Prediction feed: the stream of predicted concentrations the controller
//! consumes.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;

use crate::error::FeedError;

/// Timestamp format the prediction tool writes (date and time joined by `-`).
pub const AUTOSAVE_DATE_FORMAT: &str = "%m/%d/%Y-%I:%M:%S %p";

pub type Sample = (NaiveDateTime, f64);

pub trait PredictionFeed {
    /// Number of predictions accepted so far.
    fn event_count(&self) -> u64;

    /// Column labels, once known.
    fn labels(&self) -> Option<&[String]>;

    /// Up to the last `n` samples of `column`, oldest first.
    fn latest(&self, column: usize, n: usize) -> Result<Vec<Sample>, FeedError>;

    /// Pick up new data from the source. Returns whether a prediction was added.
    fn refresh(&mut self) -> Result<bool, FeedError> {
        Ok(false)
    }
}

/// In-memory rows shared by the file-backed and test feeds.
#[derive(Debug, Default, Clone)]
pub struct FeedRows {
    labels: Option<Vec<String>>,
    stamps: Vec<NaiveDateTime>,
    rows: Vec<Vec<f64>>,
}

impl FeedRows {
    pub fn set_labels(&mut self, labels: Vec<String>) {
        self.labels = Some(labels);
    }

    pub fn push(&mut self, at: NaiveDateTime, values: Vec<f64>) -> Result<(), FeedError> {
        if let Some(labels) = &self.labels
            && labels.len() != values.len()
        {
            return Err(FeedError::Malformed(format!(
                "{} values for {} labels",
                values.len(),
                labels.len()
            )));
        }
        self.stamps.push(at);
        self.rows.push(values);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn labels(&self) -> Option<&[String]> {
        self.labels.as_deref()
    }

    pub fn latest(&self, column: usize, n: usize) -> Result<Vec<Sample>, FeedError> {
        let start = self.rows.len().saturating_sub(n);
        self.stamps[start..]
            .iter()
            .zip(&self.rows[start..])
            .map(|(at, row)| {
                row.get(column)
                    .map(|v| (*at, *v))
                    .ok_or_else(|| FeedError::Malformed(format!("no column {column}")))
            })
            .collect()
    }
}

/// Parse one autosave record: `name \t date \t time \t v1, v2, ...`.
pub fn parse_record(line: &str) -> Result<(NaiveDateTime, Vec<f64>), FeedError> {
    let fields: Vec<&str> = line.trim_end_matches(['\r', '\n']).split('\t').collect();
    if fields.len() < 4 {
        return Err(FeedError::Missing);
    }
    let stamp = format!("{}-{}", fields[1].trim(), fields[2].trim());
    let at = NaiveDateTime::parse_from_str(&stamp, AUTOSAVE_DATE_FORMAT)
        .map_err(|e| FeedError::Malformed(format!("timestamp {stamp:?}: {e}")))?;
    let values = fields[3]
        .split(", ")
        .map(|v| match v.trim().parse::<f64>() {
            Ok(x) if x.is_finite() => Ok(x),
            _ => Err(FeedError::Malformed(format!("value {v:?}"))),
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok((at, values))
}

pub fn parse_labels(line: &str) -> Vec<String> {
    line.trim_end()
        .split(", ")
        .map(|s| s.trim().to_string())
        .collect()
}

/// Feed over the prediction tool's autosave file. Each refresh reads the
/// header (first time only) and the last line. A repeated notification for
/// an unchanged last line adds nothing.
#[derive(Debug)]
pub struct AutosaveFeed {
    path: PathBuf,
    rows: FeedRows,
    last_line: Option<String>,
}

impl AutosaveFeed {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            rows: FeedRows::default(),
            last_line: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Handle a change notification for the autosave file.
    pub fn on_change(&mut self) -> Result<bool, FeedError> {
        let text = fs::read_to_string(&self.path)?;
        let mut lines = text.lines().filter(|l| !l.trim().is_empty());
        let Some(header) = lines.next() else {
            return Ok(false);
        };
        if self.rows.labels().is_none() {
            let labels = parse_labels(header);
            tracing::info!(labels = ?labels, "prediction labels read");
            self.rows.set_labels(labels);
        }
        let Some(last) = lines.next_back() else {
            return Ok(false);
        };
        if self.last_line.as_deref() == Some(last) {
            return Ok(false);
        }
        let (at, values) = parse_record(last)?;
        self.rows.push(at, values)?;
        self.last_line = Some(last.to_string());
        tracing::debug!(events = self.rows.len(), %at, "prediction recorded");
        Ok(true)
    }
}

impl PredictionFeed for AutosaveFeed {
    fn event_count(&self) -> u64 {
        self.rows.len() as u64
    }

    fn labels(&self) -> Option<&[String]> {
        self.rows.labels()
    }

    fn latest(&self, column: usize, n: usize) -> Result<Vec<Sample>, FeedError> {
        self.rows.latest(column, n)
    }

    fn refresh(&mut self) -> Result<bool, FeedError> {
        self.on_change()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn parses_twelve_hour_timestamps() {
        let (at, values) =
            parse_record("spec_001.txt\t08/27/2019\t02:05:09 PM\t38.5, 1.25\n").unwrap();
        let want = NaiveDate::from_ymd_opt(2019, 8, 27)
            .and_then(|d| d.and_hms_opt(14, 5, 9))
            .unwrap();
        assert_eq!(at, want);
        assert_eq!(values, vec![38.5, 1.25]);
    }

    #[test]
    fn short_record_means_missing_source() {
        assert!(matches!(
            parse_record("File missing"),
            Err(FeedError::Missing)
        ));
    }

    #[test]
    fn bad_value_is_malformed() {
        assert!(matches!(
            parse_record("a\t08/27/2019\t02:05:09 PM\t38.5, x"),
            Err(FeedError::Malformed(_))
        ));
    }

    #[test]
    fn non_finite_values_are_malformed() {
        for v in ["nan", "NaN", "inf", "-inf", "infinity"] {
            let line = format!("a\t08/27/2019\t02:05:09 PM\t38.5, {v}");
            assert!(
                matches!(parse_record(&line), Err(FeedError::Malformed(_))),
                "{v} was accepted"
            );
        }
    }

    #[test]
    fn latest_is_bounded_and_ordered() {
        let mut rows = FeedRows::default();
        let t0 = NaiveDate::from_ymd_opt(2019, 8, 27)
            .and_then(|d| d.and_hms_opt(8, 0, 0))
            .unwrap();
        for i in 0..6 {
            rows.push(t0 + chrono::Duration::minutes(i), vec![i as f64, 0.0])
                .unwrap();
        }
        let last = rows.latest(0, 4).unwrap();
        assert_eq!(
            last.iter().map(|s| s.1).collect::<Vec<_>>(),
            vec![2.0, 3.0, 4.0, 5.0]
        );
        assert!(rows.latest(2, 1).is_err());
    }
}
