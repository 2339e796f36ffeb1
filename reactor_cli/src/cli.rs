//! CLI argument definitions and shared statics.

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use reactor_core::Direction;
use std::path::PathBuf;
use std::sync::OnceLock;

pub static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();
/// Whether the user asked for JSON output (controls structured error output).
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();

#[derive(Parser, Debug)]
#[command(name = "reactor", version, about = "Raman-guided bioreactor feed controller")]
pub struct Cli {
    /// Path to config TOML (typed)
    #[arg(long, value_name = "FILE", default_value = "etc/reactor.toml")]
    pub config: PathBuf,

    /// Optional pump calibration CSV (strict header)
    #[arg(long, value_name = "FILE")]
    pub calibration: Option<PathBuf>,

    /// Log as JSON lines instead of pretty
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Log level (error|warn|info|debug|trace); overrides logging.level
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum DirectionArg {
    Cw,
    Ccw,
}

impl From<DirectionArg> for Direction {
    fn from(d: DirectionArg) -> Self {
        match d {
            DirectionArg::Cw => Direction::Cw,
            DirectionArg::Ccw => Direction::Ccw,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Watch spectra and predictions, run the controller, accept console commands
    Run {
        /// Start with the controller enabled regardless of config
        #[arg(long, action = ArgAction::SetTrue)]
        enable: bool,
        /// Pump that receives controller output, e.g. 1 or VP3
        #[arg(long, value_name = "PUMP")]
        dispense_to: Option<String>,
        /// Do not read operator commands from stdin; stop with Ctrl-C
        #[arg(long, action = ArgAction::SetTrue)]
        no_console: bool,
    },
    /// Enumerate the pump chain and print the assigned addresses
    Discover,
    /// Print the status of every pump
    Status,
    /// Set direction and speed of one pump
    Speed {
        address: u8,
        #[arg(value_enum)]
        direction: DirectionArg,
        rpm: f64,
    },
    /// Dispense a volume from a physical or virtual pump
    Dispense {
        /// Pump id, e.g. 1 or VP3
        pump: String,
        /// Volume in mL
        ml: f64,
    },
    /// Run a pump a fixed number of revolutions, or compute vol/rev from a measurement
    Calibrate {
        address: u8,
        #[arg(long, default_value_t = 5.0)]
        revolutions: f64,
        /// Measured volume (mL) from a previous calibration run; no pump I/O
        #[arg(long, value_name = "ML")]
        measured: Option<f64>,
    },
    /// Reformat one raw spectrum for the prediction tool
    ProcessSpectrum {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
    /// Quick health check (config, calibration, pump chain)
    SelfCheck,
}
