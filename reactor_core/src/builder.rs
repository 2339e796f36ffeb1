//! Type-state builder for `Controller`.
//!
//! The builder enforces at compile time that a tick log and a volume ceiling
//! are provided before `build()` is available. `try_build()` is always
//! available for dynamic checks.

use std::marker::PhantomData;

use reactor_traits::{Clock, SystemClock};
use tokio::sync::watch;

use crate::controller::{Controller, Track};
use crate::error::{BuildError, Result};
use crate::log::TickLog;
use crate::pid::{Pid, Tunings};

// ── Type-state markers ───────────────────────────────────────────────────────

pub struct Missing;
pub struct Set;

/// Builder for `Controller`. All fields are validated on `build()`.
pub struct ControllerBuilder<L, C> {
    log: Option<Box<dyn TickLog + Send>>,
    ceiling: Option<f64>,
    pid: Option<Pid>,
    track: Option<Track>,
    average_window: Option<usize>,
    clock: Option<Box<dyn Clock + Send + Sync>>,
    enabled: bool,
    _l: PhantomData<L>,
    _c: PhantomData<C>,
}

impl Default for ControllerBuilder<Missing, Missing> {
    fn default() -> Self {
        Self {
            log: None,
            ceiling: None,
            pid: None,
            track: None,
            average_window: None,
            clock: None,
            enabled: false,
            _l: PhantomData,
            _c: PhantomData,
        }
    }
}

impl Controller {
    /// Start building a Controller.
    pub fn builder() -> ControllerBuilder<Missing, Missing> {
        ControllerBuilder::default()
    }
}

/// Gains and limits used when none are supplied.
pub fn default_pid() -> Pid {
    Pid::new(
        Tunings {
            kp: 0.001,
            ki: 0.1,
            kd: 0.0,
        },
        40.0,
        (0.0, 20.0),
    )
    .with_proportional_on_measurement(true)
}

fn validate_and_build(
    log: Box<dyn TickLog + Send>,
    ceiling: f64,
    pid: Pid,
    track: Track,
    average_window: usize,
    clock: Box<dyn Clock + Send + Sync>,
    enabled: bool,
) -> Result<Controller> {
    if !(ceiling.is_finite() && ceiling >= 0.0) {
        return Err(eyre::Report::new(BuildError::InvalidConfig(
            "ceiling must be >= 0",
        )));
    }
    if average_window == 0 {
        return Err(eyre::Report::new(BuildError::InvalidConfig(
            "average window must be >= 1",
        )));
    }
    let (lower, upper) = pid.limits();
    if !(lower.is_finite() && upper.is_finite()) {
        return Err(eyre::Report::new(BuildError::InvalidConfig(
            "output limits must be finite",
        )));
    }
    if lower < 0.0 {
        return Err(eyre::Report::new(BuildError::InvalidConfig(
            "lower output limit must be >= 0",
        )));
    }

    let (series, _) = watch::channel(Vec::new());
    let mut controller = Controller {
        pid,
        track,
        ceiling,
        average_window,
        outputs: Vec::new(),
        stamps: Vec::new(),
        events_seen: 0,
        last_sample_at: None,
        mark: None,
        log,
        clock,
        series,
    };
    if enabled {
        controller.enable();
    }
    Ok(controller)
}

impl<L, C> ControllerBuilder<L, C> {
    /// Fallible build available in any type-state; returns detailed error for missing pieces.
    pub fn try_build(self) -> Result<Controller> {
        let log = self
            .log
            .ok_or_else(|| eyre::Report::new(BuildError::MissingLog))?;
        let ceiling = self
            .ceiling
            .ok_or_else(|| eyre::Report::new(BuildError::MissingCeiling))?;
        validate_and_build(
            log,
            ceiling,
            self.pid.unwrap_or_else(default_pid),
            self.track.unwrap_or(Track::Index(0)),
            self.average_window.unwrap_or(4),
            self.clock.unwrap_or_else(|| Box::new(SystemClock::new())),
            self.enabled,
        )
    }
}

/// Chainable setters that do not affect type-state.
impl<L, C> ControllerBuilder<L, C> {
    pub fn with_pid(mut self, pid: Pid) -> Self {
        self.pid = Some(pid);
        self
    }
    pub fn with_track(mut self, track: Track) -> Self {
        self.track = Some(track);
        self
    }
    pub fn with_average_window(mut self, n: usize) -> Self {
        self.average_window = Some(n);
        self
    }
    /// Provide a custom clock implementation; defaults to `SystemClock` when not provided.
    pub fn with_clock(mut self, clock: impl Clock + Send + Sync + 'static) -> Self {
        self.clock = Some(Box::new(clock));
        self
    }
    /// Start in the enabled state.
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

// Setters that advance type-state
impl<C> ControllerBuilder<Missing, C> {
    pub fn with_log(self, log: impl TickLog + Send + 'static) -> ControllerBuilder<Set, C> {
        ControllerBuilder {
            log: Some(Box::new(log)),
            ceiling: self.ceiling,
            pid: self.pid,
            track: self.track,
            average_window: self.average_window,
            clock: self.clock,
            enabled: self.enabled,
            _l: PhantomData,
            _c: PhantomData,
        }
    }
}

impl<L> ControllerBuilder<L, Missing> {
    pub fn with_ceiling(self, ml: f64) -> ControllerBuilder<L, Set> {
        ControllerBuilder {
            log: self.log,
            ceiling: Some(ml),
            pid: self.pid,
            track: self.track,
            average_window: self.average_window,
            clock: self.clock,
            enabled: self.enabled,
            _l: PhantomData,
            _c: PhantomData,
        }
    }
}

impl ControllerBuilder<Set, Set> {
    /// Validate and build the Controller. Only available when the log and ceiling are set.
    pub fn build(self) -> Result<Controller> {
        self.try_build()
    }
}
