//! `From` implementations bridging `reactor_config` types to `reactor_core` types.

use std::time::Duration;

use reactor_config::{Config, DirectionCfg, PidCfg, TrackCfg, WatchCfg};

use crate::controller::Track;
use crate::link::LinkSettings;
use crate::pid::{Pid, Tunings};
use crate::pump::Direction;
use crate::spectrum::RetryPolicy;

// ── LinkSettings ─────────────────────────────────────────────────────────────

impl From<&Config> for LinkSettings {
    fn from(c: &Config) -> Self {
        Self {
            read_budget: c.serial.read_budget,
            status_budget: c.serial.status_budget,
            idle_poll: Duration::from_millis(c.pumps.idle_poll_ms),
            idle_wait_max: Duration::from_millis(c.pumps.idle_wait_max_ms),
        }
    }
}

// ── Direction ────────────────────────────────────────────────────────────────

impl From<DirectionCfg> for Direction {
    fn from(d: DirectionCfg) -> Self {
        match d {
            DirectionCfg::Cw => Self::Cw,
            DirectionCfg::Ccw => Self::Ccw,
        }
    }
}

// ── PID ──────────────────────────────────────────────────────────────────────

impl From<&PidCfg> for Pid {
    fn from(c: &PidCfg) -> Self {
        Pid::new(
            Tunings {
                kp: c.kp,
                ki: c.ki,
                kd: c.kd,
            },
            c.setpoint,
            (c.lower, c.upper),
        )
        .with_proportional_on_measurement(c.proportional_on_measurement)
    }
}

impl From<&TrackCfg> for Track {
    fn from(t: &TrackCfg) -> Self {
        match t {
            TrackCfg::Index(i) => Self::Index(*i),
            TrackCfg::Label(l) => match l.trim().parse::<usize>() {
                Ok(i) => Self::Index(i),
                Err(_) => Self::Label(l.trim().to_string()),
            },
        }
    }
}

// ── Watch ────────────────────────────────────────────────────────────────────

impl From<&WatchCfg> for RetryPolicy {
    fn from(c: &WatchCfg) -> Self {
        Self {
            settle: Duration::from_millis(c.settle_ms),
            attempts: c.retries,
            delay: Duration::from_millis(c.retry_delay_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_flow_through() {
        let cfg = Config::default();
        let link = LinkSettings::from(&cfg);
        assert_eq!(link, LinkSettings::default());

        let pid = Pid::from(&cfg.pid);
        assert_eq!(pid.limits(), (0.0, 20.0));
        assert!(pid.proportional_on_measurement());
        assert!(!pid.auto_mode());

        assert_eq!(RetryPolicy::from(&cfg.watch), RetryPolicy::default());
    }

    #[test]
    fn numeric_track_label_is_an_index() {
        assert_eq!(Track::from(&TrackCfg::Label("1".into())), Track::Index(1));
        assert_eq!(
            Track::from(&TrackCfg::Label("Glucose".into())),
            Track::Label("Glucose".into())
        );
    }
}
