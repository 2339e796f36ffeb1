//! Human-readable error descriptions and structured JSON error formatting.

use reactor_core::error::{BuildError, ControlError, PumpError, SpectrumError};

/// Map an eyre::Report to a human-readable explanation with likely causes and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    // Typed matches first
    if let Some(be) = err.downcast_ref::<BuildError>() {
        return match be {
            BuildError::MissingLog | BuildError::MissingCeiling => format!(
                "What happened: The controller could not be assembled ({be}).\nLikely causes: Internal wiring error.\nHow to fix: Report this with the command line used."
            ),
            BuildError::InvalidConfig(msg) => format!(
                "What happened: Invalid configuration ({msg}).\nLikely causes: Out-of-range values in the [pid] table.\nHow to fix: Edit the config file, then rerun."
            ),
        };
    }

    if let Some(pe) = err.downcast_ref::<PumpError>() {
        return match pe {
            PumpError::NoPumps => "What happened: No pumps answered on the serial line.\nLikely causes: Pumps powered off, wrong serial.port, or a broken daisy chain.\nHow to fix: Check power and cabling, verify serial.port, then run `discover`.".to_string(),
            PumpError::Timeout | PumpError::Transport(_) => format!(
                "What happened: Serial communication failed ({pe}).\nLikely causes: Cable unplugged, port in use by another program, or wrong line settings.\nHow to fix: Reconnect the adapter and close other programs using the port."
            ),
            PumpError::AssignmentRejected { address, .. } => format!(
                "What happened: Pump {address} did not accept its address.\nLikely causes: Noise on the line or a pump already addressed by another controller.\nHow to fix: Power-cycle the pumps and run `discover` again."
            ),
            PumpError::SpeedNotAssigned(a) => format!(
                "What happened: Pump {a} has no speed.\nLikely causes: No rpm/direction for it in [[pumps.pump]].\nHow to fix: Set a speed (`speed {a} cw 100`) or add rpm and direction to the config."
            ),
            PumpError::NotCalibrated(a) => format!(
                "What happened: Pump {a} has no vol/rev.\nLikely causes: Missing calibration.\nHow to fix: Run `calibrate {a}`, then pass --calibration or set vol_per_rev in the config."
            ),
            PumpError::IdleWaitExceeded { address, waited_ms } => format!(
                "What happened: Pump {address} was still running after {waited_ms} ms, so the second half of the paired dispense was not started.\nLikely causes: Very slow speed or a stalled pump.\nHow to fix: Check the pump, or raise pumps.idle_wait_max_ms."
            ),
            other => format!(
                "What happened: {other}.\nLikely causes: A value outside the allowed range.\nHow to fix: Correct the argument and retry."
            ),
        };
    }

    if let Some(ce) = err.downcast_ref::<ControlError>() {
        return format!(
            "What happened: {ce}.\nLikely causes: Controller parameters rejected; nothing was changed.\nHow to fix: Correct the values and retry."
        );
    }

    if let Some(se) = err.downcast_ref::<SpectrumError>() {
        return match se {
            SpectrumError::Transient(_) => format!(
                "What happened: {se}.\nLikely causes: The spectrometer was still writing the file.\nHow to fix: Retry once the file is complete, or raise watch.retries."
            ),
            SpectrumError::Structural(_) => format!(
                "What happened: {se}.\nLikely causes: Not a raw spectrum export.\nHow to fix: Check the file format."
            ),
        };
    }

    // String-based heuristics for errors coming from init or config
    let msg = format!("{err:#}");
    let lower = msg.to_ascii_lowercase();

    if lower.contains("calibration csv must have headers") {
        return "Invalid headers in calibration CSV. Expected 'address,revolutions,volume_ml'."
            .to_string();
    }

    if lower.contains("open serial port") || lower.contains("serial.port") {
        return format!(
            "What happened: The serial port could not be opened ({msg}).\nLikely causes: Wrong device name or missing permissions.\nHow to fix: Set serial.port in the config (e.g. /dev/ttyUSB0 or COM4) and check access rights."
        );
    }

    if lower.contains("must be") || lower.contains("parse config") {
        return format!(
            "What happened: Configuration is invalid ({msg}).\nLikely causes: A missing or out-of-range value.\nHow to fix: Edit the TOML config and try again."
        );
    }

    // Generic fallback
    format!("Something went wrong: {msg}\nHow to fix: Re-run with --log-level=debug for details.")
}

/// Stable exit codes: 3 when no pumps answer, 4 for serial failures, 1 otherwise.
pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    match err.downcast_ref::<PumpError>() {
        Some(PumpError::NoPumps) => 3,
        Some(PumpError::Timeout | PumpError::Transport(_)) => 4,
        _ => 1,
    }
}

fn reason_name(err: &eyre::Report) -> &'static str {
    if let Some(pe) = err.downcast_ref::<PumpError>() {
        return match pe {
            PumpError::NoPumps => "NoPumps",
            PumpError::Timeout => "Timeout",
            PumpError::Transport(_) => "Transport",
            PumpError::IdleWaitExceeded { .. } => "IdleWaitExceeded",
            _ => "PumpRejected",
        };
    }
    if err.downcast_ref::<ControlError>().is_some() {
        return "ControlRejected";
    }
    if err.downcast_ref::<SpectrumError>().is_some() {
        return "Spectrum";
    }
    if err.downcast_ref::<BuildError>().is_some() {
        return "Config";
    }
    "Error"
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    use serde_json::json;

    let obj = match err.downcast_ref::<PumpError>() {
        Some(PumpError::IdleWaitExceeded { address, waited_ms }) => json!({
            "reason": reason_name(err),
            "details": { "address": address, "waited_ms": waited_ms },
            "message": humanize(err),
        }),
        _ => json!({ "reason": reason_name(err), "message": humanize(err) }),
    };
    obj.to_string()
}
