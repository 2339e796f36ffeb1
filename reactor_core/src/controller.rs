//! PID-bounded dispense controller.
//!
//! One tick per new prediction: average the tracked column, run the PID (or
//! emit 0 while disabled), clip against the cumulative ceiling, record, log,
//! and publish the cumulative series. Outputs are never removed.

use chrono::NaiveDateTime;
use reactor_traits::Clock;
use tokio::sync::watch;

use crate::error::ControlError;
use crate::feed::PredictionFeed;
use crate::log::{ControllerStatus, TickLog, TickRecord};
use crate::pid::{Pid, Tunings};
use crate::util::round_to;

/// Seconds assumed between samples when the timestamps give no gap.
const NOMINAL_DT: f64 = 1.0;

/// Which prediction column the controller follows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Track {
    Index(usize),
    /// A label not yet resolvable because the feed has no labels yet.
    Label(String),
}

impl Track {
    /// Column index against the feed's labels, when resolvable.
    pub fn resolve(&self, labels: Option<&[String]>) -> Option<usize> {
        match self {
            Self::Index(i) => Some(*i),
            Self::Label(name) => labels?.iter().position(|l| l == name),
        }
    }
}

/// Replacement parameter set applied by [`Controller::update_all`].
#[derive(Debug, Clone, PartialEq)]
pub struct ControlParams {
    pub track: String,
    pub setpoint: f64,
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    pub lower: f64,
    pub upper: f64,
    pub ceiling: f64,
}

/// What one tick produced.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickOutcome {
    pub at: NaiveDateTime,
    pub input: f64,
    pub output: f64,
    pub cumulative: f64,
}

pub struct Controller {
    pub(crate) pid: Pid,
    pub(crate) track: Track,
    pub(crate) ceiling: f64,
    pub(crate) average_window: usize,
    pub(crate) outputs: Vec<f64>,
    pub(crate) stamps: Vec<NaiveDateTime>,
    pub(crate) events_seen: u64,
    pub(crate) last_sample_at: Option<NaiveDateTime>,
    pub(crate) mark: Option<NaiveDateTime>,
    pub(crate) log: Box<dyn TickLog + Send>,
    pub(crate) clock: Box<dyn Clock + Send + Sync>,
    pub(crate) series: watch::Sender<Vec<f64>>,
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("enabled", &self.pid.auto_mode())
            .field("track", &self.track)
            .field("ceiling", &self.ceiling)
            .field("ticks", &self.outputs.len())
            .field("total", &self.total())
            .finish()
    }
}

impl Controller {
    pub fn is_enabled(&self) -> bool {
        self.pid.auto_mode()
    }

    /// Takes effect at the next tick.
    pub fn enable(&mut self) {
        if !self.pid.auto_mode() {
            tracing::info!("controller enabled");
        }
        self.pid.set_auto_mode(true, None);
    }

    pub fn disable(&mut self) {
        if self.pid.auto_mode() {
            tracing::info!("controller disabled");
        }
        self.pid.set_auto_mode(false, None);
    }

    pub fn set_proportional_on_measurement(&mut self, on: bool) {
        self.pid.set_proportional_on_measurement(on);
        tracing::info!(on, "proportional-on-measurement");
    }

    pub fn outputs(&self) -> &[f64] {
        &self.outputs
    }

    pub fn total(&self) -> f64 {
        self.outputs.iter().sum()
    }

    pub fn last_output(&self) -> Option<f64> {
        self.outputs.last().copied()
    }

    /// Running sum of outputs.
    pub fn cumulative(&self) -> Vec<f64> {
        self.outputs
            .iter()
            .scan(0.0, |acc, v| {
                *acc += v;
                Some(*acc)
            })
            .collect()
    }

    /// Measurement timestamps of the recorded ticks, parallel to `outputs`.
    pub fn timestamps(&self) -> &[NaiveDateTime] {
        &self.stamps
    }

    pub fn events_seen(&self) -> u64 {
        self.events_seen
    }

    /// Receiver that sees the cumulative series after every tick.
    pub fn subscribe(&self) -> watch::Receiver<Vec<f64>> {
        self.series.subscribe()
    }

    /// Label of the tracked column when the feed knows it, otherwise the
    /// index (or the pending label).
    pub fn tracking(&self, labels: Option<&[String]>) -> String {
        match (&self.track, labels) {
            (Track::Index(i), Some(labels)) => labels
                .get(*i)
                .cloned()
                .unwrap_or_else(|| i.to_string()),
            (Track::Index(i), None) => i.to_string(),
            (Track::Label(l), _) => l.clone(),
        }
    }

    pub fn status(&self, labels: Option<&[String]>) -> ControllerStatus {
        let Tunings { kp, ki, kd } = self.pid.tunings();
        let (lower, upper) = self.pid.limits();
        ControllerStatus {
            enabled: self.pid.auto_mode(),
            tracking: self.tracking(labels),
            setpoint: self.pid.setpoint,
            kp,
            ki,
            kd,
            lower,
            upper,
            ceiling: self.ceiling,
            proportional_on_measurement: self.pid.proportional_on_measurement(),
        }
    }

    /// Replace tracked column, setpoint, gains, limits and ceiling in one
    /// step. Nothing changes if any value is rejected.
    ///
    /// With labels known, `track` must name one (or be an in-range index);
    /// without labels a number is an index and anything else is kept as a
    /// label to resolve once labels arrive.
    pub fn update_all(
        &mut self,
        params: &ControlParams,
        labels: Option<&[String]>,
    ) -> Result<(), ControlError> {
        for (name, v) in [
            ("setpoint", params.setpoint),
            ("kp", params.kp),
            ("ki", params.ki),
            ("kd", params.kd),
            ("lower", params.lower),
            ("upper", params.upper),
        ] {
            if !v.is_finite() {
                return Err(ControlError::NotFinite(name));
            }
        }
        if params.lower > params.upper {
            return Err(ControlError::InvalidLimits {
                lower: params.lower,
                upper: params.upper,
            });
        }
        if params.lower < 0.0 {
            return Err(ControlError::NegativeLowerLimit(params.lower));
        }
        if !(params.ceiling.is_finite() && params.ceiling >= 0.0) {
            return Err(ControlError::InvalidCeiling(params.ceiling));
        }
        let track = resolve_track(&params.track, labels)?;

        self.track = track;
        self.pid.setpoint = params.setpoint;
        self.pid.set_tunings(Tunings {
            kp: params.kp,
            ki: params.ki,
            kd: params.kd,
        });
        self.pid.set_limits((params.lower, params.upper));
        self.ceiling = params.ceiling;
        tracing::info!(?params, "controller parameters updated");
        Ok(())
    }

    /// Mark the experiment start at the current clock time.
    pub fn mark(&mut self) -> Result<NaiveDateTime, ControlError> {
        if let Some(m) = self.mark {
            return Err(ControlError::MarkAlreadySet(m.to_string()));
        }
        let now = self.clock.now();
        self.mark = Some(now);
        tracing::info!(mark = %now, "experiment start marked");
        Ok(now)
    }

    /// Move an existing mark to now. Earlier log lines keep their old
    /// elapsed times, so the caller must acknowledge that.
    pub fn reset_mark(&mut self, acknowledged: bool) -> Result<NaiveDateTime, ControlError> {
        if !acknowledged {
            return Err(ControlError::AcknowledgementRequired);
        }
        let now = self.clock.now();
        tracing::warn!(
            previous = ?self.mark,
            mark = %now,
            "experiment mark reset; earlier tick log elapsed times no longer match"
        );
        self.mark = Some(now);
        Ok(now)
    }

    pub fn mark_time(&self) -> Option<NaiveDateTime> {
        self.mark
    }

    /// Run one controller step if the feed has something new.
    pub fn tick(&mut self, feed: &dyn PredictionFeed) -> Option<TickOutcome> {
        let available = feed.event_count();
        if self.events_seen >= available {
            return None;
        }
        let labels = feed.labels();
        let Some(column) = self.track.resolve(labels) else {
            tracing::warn!(track = ?self.track, "tracked value not in prediction labels");
            return None;
        };
        let samples = match feed.latest(column, self.average_window) {
            Ok(s) if !s.is_empty() => s,
            Ok(_) => return None,
            Err(e) => {
                tracing::warn!(error = %e, "prediction feed anomaly, skipping tick");
                return None;
            }
        };
        let input = samples.iter().map(|s| s.1).sum::<f64>() / samples.len() as f64;
        let Some(&(at, _)) = samples.last() else {
            return None;
        };
        // First sample, or a timestamp that did not move forward.
        let dt = self
            .last_sample_at
            .map(|prev| at.signed_duration_since(prev).num_milliseconds() as f64 / 1000.0)
            .filter(|dt| *dt > 0.0)
            .unwrap_or(NOMINAL_DT);

        // Pumps only push liquid; a negative step would hide volume from the ceiling.
        let raw = if self.pid.auto_mode() {
            round_to(self.pid.update(input, dt).unwrap_or(0.0), 2).max(0.0)
        } else {
            0.0
        };
        let prior = self.total();
        let output = if raw + prior > self.ceiling {
            (self.ceiling - prior).max(0.0)
        } else {
            raw
        };

        self.outputs.push(output);
        self.stamps.push(at);
        self.events_seen = available;
        self.last_sample_at = Some(at);
        let cumulative = prior + output;

        let record = TickRecord {
            at,
            elapsed_hours: self.mark.map(|m| self.clock.hours_between(m, at)),
            status: self.status(labels),
            input,
            output,
            cumulative,
        };
        if let Err(e) = self.log.append(&record) {
            tracing::warn!(error = %e, "tick log write failed");
        }
        tracing::info!(input, raw, output, cumulative, "controller tick");
        self.series.send_replace(self.cumulative());

        Some(TickOutcome {
            at,
            input,
            output,
            cumulative,
        })
    }
}

fn resolve_track(track: &str, labels: Option<&[String]>) -> Result<Track, ControlError> {
    let track = track.trim();
    match labels {
        Some(labels) => {
            if let Some(i) = labels.iter().position(|l| l == track) {
                Ok(Track::Index(i))
            } else {
                match track.parse::<usize>() {
                    Ok(i) if i < labels.len() => Ok(Track::Index(i)),
                    _ => Err(ControlError::UnknownTrack(track.to_string())),
                }
            }
        }
        None => match track.parse::<usize>() {
            Ok(i) => Ok(Track::Index(i)),
            Err(_) if !track.is_empty() => Ok(Track::Label(track.to_string())),
            Err(_) => Err(ControlError::UnknownTrack(track.to_string())),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels() -> Vec<String> {
        vec!["Glucose".into(), "Lactate".into()]
    }

    #[test]
    fn track_resolution_with_labels() {
        let l = labels();
        assert_eq!(resolve_track("Lactate", Some(&l)), Ok(Track::Index(1)));
        assert_eq!(resolve_track("0", Some(&l)), Ok(Track::Index(0)));
        assert_eq!(
            resolve_track("Ethanol", Some(&l)),
            Err(ControlError::UnknownTrack("Ethanol".into()))
        );
        assert!(resolve_track("5", Some(&l)).is_err());
    }

    #[test]
    fn track_resolution_without_labels() {
        assert_eq!(resolve_track("2", None), Ok(Track::Index(2)));
        assert_eq!(
            resolve_track("Glucose", None),
            Ok(Track::Label("Glucose".into()))
        );
        let l = labels();
        assert_eq!(Track::Label("Glucose".into()).resolve(Some(&l)), Some(0));
        assert_eq!(Track::Label("Glucose".into()).resolve(None), None);
    }
}
