//! Operator console commands.

use std::str::FromStr;

use thiserror::Error;

use crate::controller::ControlParams;
use crate::pump::{Direction, PumpId};

#[derive(Debug, Clone, PartialEq)]
pub enum OperatorCommand {
    Enable,
    Disable,
    ProportionalOnMeasurement(bool),
    Update(ControlParams),
    Speed {
        address: u8,
        direction: Direction,
        rpm: f64,
    },
    VolPerRev {
        address: u8,
        ml: f64,
    },
    Dispense {
        pump: PumpId,
        ml: f64,
    },
    Halt {
        address: u8,
    },
    AddVirtual {
        pump_1: u8,
        pump_2: u8,
        ratio: f64,
    },
    SetVirtual {
        id: PumpId,
        pump_1: u8,
        pump_2: u8,
        ratio: f64,
    },
    Status,
    Mark,
    ResetMark {
        acknowledged: bool,
    },
    Help,
    Quit,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseCommandError {
    #[error("empty command")]
    Empty,
    #[error("unknown command {0:?}; type `help`")]
    Unknown(String),
    #[error("usage: {0}")]
    Usage(&'static str),
}

pub const HELP: &str = "\
enable | disable | pom on|off
update <track> <setpoint> <kp> <ki> <kd> <lower> <upper> <ceiling>
speed <addr> <cw|ccw> <rpm>
volrev <addr> <ml>
dispense <pump> <ml>
halt <addr>
vpump <p1> <p2> <ratio>
vset <id> <p1> <p2> <ratio>
status | mark | reset-mark confirm | quit";

fn num<T: FromStr>(s: &str, usage: &'static str) -> Result<T, ParseCommandError> {
    s.parse::<T>().map_err(|_| ParseCommandError::Usage(usage))
}

// `f64::from_str` takes "nan" and "inf"; neither is a usable quantity.
fn real(s: &str, usage: &'static str) -> Result<f64, ParseCommandError> {
    let x: f64 = num(s, usage)?;
    if x.is_finite() {
        Ok(x)
    } else {
        Err(ParseCommandError::Usage(usage))
    }
}

impl FromStr for OperatorCommand {
    type Err = ParseCommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let words: Vec<&str> = line.split_whitespace().collect();
        let Some((head, args)) = words.split_first() else {
            return Err(ParseCommandError::Empty);
        };
        let cmd = head.to_ascii_lowercase();
        match (cmd.as_str(), args) {
            ("enable", []) => Ok(Self::Enable),
            ("disable", []) => Ok(Self::Disable),
            ("pom", [flag]) => match flag.to_ascii_lowercase().as_str() {
                "on" => Ok(Self::ProportionalOnMeasurement(true)),
                "off" => Ok(Self::ProportionalOnMeasurement(false)),
                _ => Err(ParseCommandError::Usage("pom on|off")),
            },
            ("update", [track, sp, kp, ki, kd, lo, hi, ceil]) => {
                const U: &str = "update <track> <setpoint> <kp> <ki> <kd> <lower> <upper> <ceiling>";
                Ok(Self::Update(ControlParams {
                    track: (*track).to_string(),
                    setpoint: real(sp, U)?,
                    kp: real(kp, U)?,
                    ki: real(ki, U)?,
                    kd: real(kd, U)?,
                    lower: real(lo, U)?,
                    upper: real(hi, U)?,
                    ceiling: real(ceil, U)?,
                }))
            }
            ("speed", [addr, dir, rpm]) => {
                const U: &str = "speed <addr> <cw|ccw> <rpm>";
                Ok(Self::Speed {
                    address: num(addr, U)?,
                    direction: dir.parse().map_err(|_| ParseCommandError::Usage(U))?,
                    rpm: real(rpm, U)?,
                })
            }
            ("volrev", [addr, ml]) => {
                const U: &str = "volrev <addr> <ml>";
                Ok(Self::VolPerRev {
                    address: num(addr, U)?,
                    ml: real(ml, U)?,
                })
            }
            ("dispense", [pump, ml]) => {
                const U: &str = "dispense <pump> <ml>";
                Ok(Self::Dispense {
                    pump: pump.parse().map_err(|_| ParseCommandError::Usage(U))?,
                    ml: real(ml, U)?,
                })
            }
            ("halt", [addr]) => Ok(Self::Halt {
                address: num(addr, "halt <addr>")?,
            }),
            ("vpump", [p1, p2, ratio]) => {
                const U: &str = "vpump <p1> <p2> <ratio>";
                Ok(Self::AddVirtual {
                    pump_1: num(p1, U)?,
                    pump_2: num(p2, U)?,
                    ratio: real(ratio, U)?,
                })
            }
            ("vset", [id, p1, p2, ratio]) => {
                const U: &str = "vset <id> <p1> <p2> <ratio>";
                Ok(Self::SetVirtual {
                    id: id.parse().map_err(|_| ParseCommandError::Usage(U))?,
                    pump_1: num(p1, U)?,
                    pump_2: num(p2, U)?,
                    ratio: real(ratio, U)?,
                })
            }
            ("status", []) => Ok(Self::Status),
            ("mark", []) => Ok(Self::Mark),
            ("reset-mark", []) => Ok(Self::ResetMark {
                acknowledged: false,
            }),
            ("reset-mark", [ack]) if ack.eq_ignore_ascii_case("confirm") => {
                Ok(Self::ResetMark { acknowledged: true })
            }
            ("help" | "?", []) => Ok(Self::Help),
            ("quit" | "exit", []) => Ok(Self::Quit),
            (
                "enable" | "disable" | "pom" | "update" | "speed" | "volrev" | "dispense" | "halt"
                | "vpump" | "vset" | "status" | "mark" | "reset-mark" | "help" | "quit",
                _,
            ) => Err(ParseCommandError::Usage(usage_for(&cmd))),
            _ => Err(ParseCommandError::Unknown((*head).to_string())),
        }
    }
}

fn usage_for(cmd: &str) -> &'static str {
    HELP.lines()
        .find(|l| l.split_whitespace().next() == Some(cmd) || l.contains(&format!("| {cmd}")))
        .unwrap_or(HELP)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("enable", OperatorCommand::Enable)]
    #[case("  DISABLE ", OperatorCommand::Disable)]
    #[case("pom off", OperatorCommand::ProportionalOnMeasurement(false))]
    #[case("speed 2 ccw 120.5", OperatorCommand::Speed { address: 2, direction: Direction::Ccw, rpm: 120.5 })]
    #[case("dispense VP3 4.5", OperatorCommand::Dispense { pump: PumpId::Virtual(3), ml: 4.5 })]
    #[case("dispense 1 0.25", OperatorCommand::Dispense { pump: PumpId::Physical(1), ml: 0.25 })]
    #[case("vpump 1 2 0.3", OperatorCommand::AddVirtual { pump_1: 1, pump_2: 2, ratio: 0.3 })]
    #[case("vset vp3 2 1 0.5", OperatorCommand::SetVirtual { id: PumpId::Virtual(3), pump_1: 2, pump_2: 1, ratio: 0.5 })]
    #[case("reset-mark", OperatorCommand::ResetMark { acknowledged: false })]
    #[case("reset-mark confirm", OperatorCommand::ResetMark { acknowledged: true })]
    fn parses(#[case] line: &str, #[case] want: OperatorCommand) {
        assert_eq!(line.parse::<OperatorCommand>().unwrap(), want);
    }

    #[test]
    fn parses_update() {
        let cmd: OperatorCommand = "update Glucose 40 0.001 0.1 0 0 20 150".parse().unwrap();
        let OperatorCommand::Update(p) = cmd else {
            panic!("expected update");
        };
        assert_eq!(p.track, "Glucose");
        assert_eq!(p.ceiling, 150.0);
        assert_eq!((p.lower, p.upper), (0.0, 20.0));
    }

    #[rstest]
    #[case("", ParseCommandError::Empty)]
    #[case("fly 1", ParseCommandError::Unknown("fly".into()))]
    #[case("speed 1 up 100", ParseCommandError::Usage("speed <addr> <cw|ccw> <rpm>"))]
    #[case("volrev 1", ParseCommandError::Usage("volrev <addr> <ml>"))]
    #[case("dispense 1 nan", ParseCommandError::Usage("dispense <pump> <ml>"))]
    #[case("dispense VP3 inf", ParseCommandError::Usage("dispense <pump> <ml>"))]
    #[case("speed 1 cw NaN", ParseCommandError::Usage("speed <addr> <cw|ccw> <rpm>"))]
    #[case("vpump 1 2 -inf", ParseCommandError::Usage("vpump <p1> <p2> <ratio>"))]
    fn rejects(#[case] line: &str, #[case] want: ParseCommandError) {
        assert_eq!(line.parse::<OperatorCommand>().unwrap_err(), want);
    }
}
