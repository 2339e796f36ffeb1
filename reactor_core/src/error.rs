use thiserror::Error;

/// Rejections and failures from the pump layer. Each variant names the
/// constraint that was violated so the operator sees why.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PumpError {
    #[error("unknown pump {0}")]
    UnknownPump(String),
    #[error("pump {0} is virtual; this operation needs a physical pump")]
    VirtualNotAllowed(String),
    #[error("pump {0} is not a virtual pump")]
    NotVirtual(String),
    #[error("RPM out of range: {0} (allowed 10..=600)")]
    RpmOutOfRange(f64),
    #[error("invalid direction {0:?}, expected cw or ccw")]
    InvalidDirection(String),
    #[error("revolutions must not be negative, got {0}")]
    NegativeRevolutions(f64),
    #[error("volume must not be negative, got {0} mL")]
    NegativeVolume(f64),
    #[error("{0} must be a finite number, got {1}")]
    NotFinite(&'static str, f64),
    #[error("pump {0} has no speed assigned")]
    SpeedNotAssigned(u8),
    #[error("pump {0} has no vol/rev assigned")]
    NotCalibrated(u8),
    #[error("vol/rev must be > 0, got {0}")]
    InvalidVolPerRev(f64),
    #[error("virtual pump ratio must be in [0, 1], got {0}")]
    InvalidRatio(f64),
    #[error("no pumps connected")]
    NoPumps,
    #[error("more than {0} pumps answered discovery")]
    TooManyPumps(u8),
    #[error("pump {address} did not acknowledge address assignment (reply {reply:?})")]
    AssignmentRejected { address: u8, reply: Vec<u8> },
    #[error("pump {0} refused the speed command twice")]
    SpeedRejected(u8),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("timeout waiting for pump reply")]
    Timeout,
    #[error("pump {address} still running after {waited_ms} ms")]
    IdleWaitExceeded { address: u8, waited_ms: u64 },
}

/// Prediction feed anomalies. Caught at the tick boundary and treated as
/// "no update".
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("prediction tool reported the source file missing")]
    Missing,
    #[error("malformed autosave line: {0}")]
    Malformed(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Spectrum reformatting failures, split by whether another attempt can help.
#[derive(Debug, Error)]
pub enum SpectrumError {
    #[error("spectrum not ready: {0}")]
    Transient(String),
    #[error("spectrum unusable: {0}")]
    Structural(String),
}

impl SpectrumError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

impl From<std::io::Error> for SpectrumError {
    fn from(e: std::io::Error) -> Self {
        Self::Transient(e.to_string())
    }
}

/// Operator-facing controller rejections.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ControlError {
    #[error("unknown tracked value {0:?}")]
    UnknownTrack(String),
    #[error("lower limit {lower} exceeds upper limit {upper}")]
    InvalidLimits { lower: f64, upper: f64 },
    #[error("lower output limit must be >= 0, got {0}")]
    NegativeLowerLimit(f64),
    #[error("volume ceiling must be >= 0, got {0}")]
    InvalidCeiling(f64),
    #[error("{0} must be finite")]
    NotFinite(&'static str),
    #[error("experiment start is already marked at {0}")]
    MarkAlreadySet(String),
    #[error("resetting the experiment mark needs an explicit acknowledgement")]
    AcknowledgementRequired,
}

#[derive(Debug, Error, Clone)]
pub enum BuildError {
    #[error("missing tick log")]
    MissingLog,
    #[error("missing volume ceiling")]
    MissingCeiling,
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;
