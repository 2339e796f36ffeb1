#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::cast_precision_loss
)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Core reactor control logic (hardware-agnostic).
//!
//! All serial traffic goes through `reactor_traits::Transport`; wall-clock
//! time through `reactor_traits::Clock`.
//!
//! ## Architecture
//!
//! - **Protocol**: pump command framing and status decoding (`protocol`, `status`)
//! - **Link**: address discovery, physical and virtual pumps, dispensing (`link`)
//! - **Control**: PID with a cumulative volume ceiling (`pid`, `controller`)
//! - **Inputs**: prediction feed and raw spectrum reformatting (`feed`, `spectrum`)
//! - **Runtime**: single-owner event loop fed by watchers, a timer and the console (`runtime`)
//!
//! Volumes are mL, speeds RPM, times from the prediction timestamps.

pub mod builder;
pub mod command;
pub mod controller;
pub mod conversions;
pub mod error;
pub mod feed;
pub mod hw_error;
pub mod link;
pub mod log;
pub mod mocks;
pub mod pid;
pub mod protocol;
pub mod pump;
pub mod runtime;
pub mod spectrum;
pub mod status;
pub mod util;

pub use builder::ControllerBuilder;
pub use command::OperatorCommand;
pub use controller::{ControlParams, Controller, TickOutcome, Track};
pub use error::{BuildError, ControlError, FeedError, PumpError, Report, Result, SpectrumError};
pub use feed::{AutosaveFeed, PredictionFeed};
pub use link::{LinkSettings, PumpInfo, PumpLink};
pub use log::{FileTickLog, TickLog};
pub use pump::{Direction, PumpId};
pub use runtime::{ControlActor, ControlEvent, RunSummary, Runtime, Signals, WatchPlan};
pub use status::StatusReport;
