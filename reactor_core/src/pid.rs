//! Positional PID controller with output limits, integral anti-windup and
//! optional proportional-on-measurement.
//!
//! - Manual mode (the default) leaves the state untouched; callers decide what
//!   to emit while disabled.
//! - Switching to automatic resets the terms and seeds the integral with the
//!   last output so the transition is bumpless.
//! - `dt` is supplied by the caller (seconds between measurements); a
//!   non-positive step is treated as a tiny positive one.

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tunings {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
}

/// Individual terms of the last update, kept for logging.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Components {
    pub proportional: f64,
    pub integral: f64,
    pub derivative: f64,
}

const MIN_DT: f64 = 1e-16;

#[derive(Debug, Clone)]
pub struct Pid {
    tunings: Tunings,
    pub setpoint: f64,
    limits: (f64, f64),
    proportional_on_measurement: bool,
    auto_mode: bool,
    terms: Components,
    last_input: Option<f64>,
    last_output: Option<f64>,
}

#[inline]
fn clamp(x: f64, (lo, hi): (f64, f64)) -> f64 {
    x.max(lo).min(hi)
}

impl Pid {
    pub fn new(tunings: Tunings, setpoint: f64, limits: (f64, f64)) -> Self {
        Self {
            tunings,
            setpoint,
            limits: order(limits),
            proportional_on_measurement: false,
            auto_mode: false,
            terms: Components::default(),
            last_input: None,
            last_output: None,
        }
    }

    pub fn with_proportional_on_measurement(mut self, on: bool) -> Self {
        self.proportional_on_measurement = on;
        self
    }

    pub fn tunings(&self) -> Tunings {
        self.tunings
    }

    pub fn set_tunings(&mut self, tunings: Tunings) {
        self.tunings = tunings;
    }

    pub fn limits(&self) -> (f64, f64) {
        self.limits
    }

    /// New output limits; integral and last output are pulled inside them.
    pub fn set_limits(&mut self, limits: (f64, f64)) {
        self.limits = order(limits);
        self.terms.integral = clamp(self.terms.integral, self.limits);
        self.last_output = self.last_output.map(|o| clamp(o, self.limits));
    }

    pub fn proportional_on_measurement(&self) -> bool {
        self.proportional_on_measurement
    }

    pub fn set_proportional_on_measurement(&mut self, on: bool) {
        self.proportional_on_measurement = on;
    }

    pub fn auto_mode(&self) -> bool {
        self.auto_mode
    }

    /// Enter or leave automatic mode. Entering resets internal state and
    /// seeds the integral with `last_output` (0 when absent).
    pub fn set_auto_mode(&mut self, enabled: bool, last_output: Option<f64>) {
        if enabled && !self.auto_mode {
            self.reset();
            self.terms.integral = clamp(last_output.unwrap_or(0.0), self.limits);
        }
        self.auto_mode = enabled;
    }

    pub fn reset(&mut self) {
        self.terms = Components::default();
        self.last_input = None;
        self.last_output = None;
    }

    pub fn components(&self) -> Components {
        self.terms
    }

    pub fn last_output(&self) -> Option<f64> {
        self.last_output
    }

    /// Compute the next output for `input` measured `dt` seconds after the
    /// previous one. In manual mode the previous output is returned unchanged.
    pub fn update(&mut self, input: f64, dt: f64) -> Option<f64> {
        if !self.auto_mode {
            return self.last_output;
        }
        let dt = if dt > 0.0 { dt } else { MIN_DT };
        let Tunings { kp, ki, kd } = self.tunings;

        let error = self.setpoint - input;
        let d_input = input - self.last_input.unwrap_or(input);

        if self.proportional_on_measurement {
            self.terms.proportional = clamp(self.terms.proportional - kp * d_input, self.limits);
        } else {
            self.terms.proportional = kp * error;
        }

        self.terms.integral = clamp(self.terms.integral + ki * error * dt, self.limits);
        self.terms.derivative = -kd * d_input / dt;

        let output = clamp(
            self.terms.proportional + self.terms.integral + self.terms.derivative,
            self.limits,
        );
        self.last_output = Some(output);
        self.last_input = Some(input);
        Some(output)
    }
}

fn order((a, b): (f64, f64)) -> (f64, f64) {
    if a <= b { (a, b) } else { (b, a) }
}
