//! Decoded pump status from the info (`I`) reply.
//!
//! The reply carries five ASCII digits; positions 0, 3 and 4 hold the control
//! mode, run state and last error. Positions 1 and 2 are not interpreted.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMode {
    Local,
    Remote,
}

impl ControlMode {
    fn from_digit(d: u8) -> Option<Self> {
        match d {
            b'0' => Some(Self::Local),
            b'1' => Some(Self::Remote),
            _ => None,
        }
    }
}

impl fmt::Display for ControlMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Local => "Local",
            Self::Remote => "Remote",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    WaitingGo,
    Running,
    StoppedLocally,
    NoMotorFeedback,
    Overload,
    ExcessiveMotorFeedback,
}

impl RunState {
    fn from_digit(d: u8) -> Option<Self> {
        Some(match d {
            b'1' => Self::Idle,
            b'2' => Self::WaitingGo,
            b'3' => Self::Running,
            b'4' => Self::StoppedLocally,
            b'5' => Self::NoMotorFeedback,
            b'6' => Self::Overload,
            b'7' => Self::ExcessiveMotorFeedback,
            _ => return None,
        })
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "Idle",
            Self::WaitingGo => "Waiting Go",
            Self::Running => "Running",
            Self::StoppedLocally => "Stopped Locally",
            Self::NoMotorFeedback => "No Motor Feedback",
            Self::Overload => "Overload",
            Self::ExcessiveMotorFeedback => "Excessive Motor Feedback",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    None,
    Parity,
    Framing,
    Overrun,
    InvalidCommand,
    InvalidData,
}

impl ErrorCode {
    fn from_digit(d: u8) -> Option<Self> {
        Some(match d {
            b'0' => Self::None,
            b'1' => Self::Parity,
            b'2' => Self::Framing,
            b'3' => Self::Overrun,
            b'4' => Self::InvalidCommand,
            b'5' => Self::InvalidData,
            _ => return None,
        })
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::None => "None",
            Self::Parity => "Parity",
            Self::Framing => "Framing",
            Self::Overrun => "Overrun",
            Self::InvalidCommand => "Invalid Command",
            Self::InvalidData => "Invalid Data",
        })
    }
}

/// Outcome of a status query. Never an error: transport failures and
/// unreadable replies become sentinels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusReport {
    Decoded {
        control: ControlMode,
        run: RunState,
        error: ErrorCode,
    },
    /// The serial read or write failed.
    Disconnected,
    /// The pump answered too late, too short, or with digits outside the table.
    Unknown,
}

impl StatusReport {
    /// Find the first run of five ASCII digits in `reply` and decode it.
    pub fn decode(reply: &[u8]) -> Self {
        let Some(digits) = reply
            .windows(5)
            .find(|w| w.iter().all(u8::is_ascii_digit))
        else {
            return Self::Unknown;
        };
        match (
            ControlMode::from_digit(digits[0]),
            RunState::from_digit(digits[3]),
            ErrorCode::from_digit(digits[4]),
        ) {
            (Some(control), Some(run), Some(error)) => Self::Decoded {
                control,
                run,
                error,
            },
            _ => Self::Unknown,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(
            self,
            Self::Decoded {
                run: RunState::Running,
                ..
            }
        )
    }

    /// Human-readable (control, run, error) triple.
    pub fn as_strings(&self) -> [String; 3] {
        match self {
            Self::Decoded {
                control,
                run,
                error,
            } => [control.to_string(), run.to_string(), error.to_string()],
            Self::Disconnected => std::array::from_fn(|_| "Disconnected".to_string()),
            Self::Unknown => std::array::from_fn(|_| "Unknown".to_string()),
        }
    }
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [c, r, e] = self.as_strings();
        write!(f, "{c}, {r}, {e}")
    }
}
