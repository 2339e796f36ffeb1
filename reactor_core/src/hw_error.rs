//! Maps `Box<dyn Error>` from trait boundaries to typed `PumpError`.
//!
//! The `Transport` trait uses `Box<dyn Error + Send + Sync>` so any backend can
//! plug in; this module converts those to our typed error enum, with an
//! optional feature-gated path for `reactor_hardware::HwError` downcasting.

use crate::error::PumpError;

/// Map a trait-boundary error to a typed `PumpError`.
///
/// Attempts to downcast known hardware error types first, then falls back
/// to string-based heuristics.
pub fn map_hw_error(e: &(dyn std::error::Error + 'static)) -> PumpError {
    #[cfg(feature = "hardware-errors")]
    {
        if let Some(hw) = e.downcast_ref::<reactor_hardware::error::HwError>() {
            // A quiet line is an empty read; only a stalled write surfaces as TimedOut.
            return match hw {
                reactor_hardware::error::HwError::Io(io)
                    if io.kind() == std::io::ErrorKind::TimedOut =>
                {
                    PumpError::Timeout
                }
                other => PumpError::Transport(other.to_string()),
            };
        }
    }

    let s = e.to_string();
    if s.to_lowercase().contains("timed out") || s.to_lowercase().contains("timeout") {
        PumpError::Timeout
    } else {
        PumpError::Transport(s)
    }
}

/// Same as [`map_hw_error`], taking the boxed form returned by `Transport`.
pub fn map_boxed(e: Box<dyn std::error::Error + Send + Sync>) -> PumpError {
    map_hw_error(e.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_fallback_detects_timeouts() {
        let e = std::io::Error::new(std::io::ErrorKind::TimedOut, "operation timed out");
        assert_eq!(map_hw_error(&e), PumpError::Timeout);
        let e = std::io::Error::other("broken pipe");
        assert!(matches!(map_hw_error(&e), PumpError::Transport(s) if s.contains("broken pipe")));
    }

    #[cfg(feature = "hardware-errors")]
    #[test]
    fn downcasts_hardware_errors() {
        use reactor_hardware::error::HwError;
        let stalled = std::io::Error::new(std::io::ErrorKind::TimedOut, "write stalled");
        let boxed: Box<dyn std::error::Error + Send + Sync> = Box::new(HwError::Io(stalled));
        assert_eq!(map_boxed(boxed), PumpError::Timeout);
        let boxed: Box<dyn std::error::Error + Send + Sync> =
            Box::new(HwError::Serial("device disconnected".into()));
        assert_eq!(
            map_boxed(boxed),
            PumpError::Transport("serial error: device disconnected".into())
        );
        let boxed: Box<dyn std::error::Error + Send + Sync> = Box::new(HwError::Closed);
        assert_eq!(
            map_boxed(boxed),
            PumpError::Transport("serial port closed".into())
        );
    }
}
