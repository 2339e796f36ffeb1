//! Hardware assembly and the subcommand implementations.

use std::path::Path;

use eyre::{Result, WrapErr};
use reactor_config::{Config, PumpCalibration};
use reactor_core::pid::Pid;
use reactor_core::runtime::{apply_pump_config, dispense_target};
use reactor_core::spectrum::{RetryPolicy, SpectrumProcessor};
use reactor_core::{
    AutosaveFeed, ControlActor, ControlEvent, Controller, Direction, FileTickLog, LinkSettings,
    PumpId, PumpLink, RunSummary, Runtime, Track, WatchPlan,
};
use reactor_traits::Transport;

use crate::console;

pub type Link = PumpLink<Box<dyn Transport>>;

/// Serial port with the `hardware` feature, otherwise a simulated chain
/// (`REACTOR_SIM_PUMPS` pumps, default 2).
pub fn open_transport(cfg: &Config) -> Result<Box<dyn Transport>> {
    #[cfg(feature = "hardware")]
    {
        if cfg.serial.port.is_empty() {
            eyre::bail!("serial.port is not set");
        }
        let t = reactor_hardware::SerialPortTransport::open(
            &cfg.serial.port,
            std::time::Duration::from_millis(cfg.serial.timeout_ms),
        )
        .wrap_err_with(|| format!("open serial port {}", cfg.serial.port))?;
        Ok(Box::new(t))
    }
    #[cfg(not(feature = "hardware"))]
    {
        let _ = cfg;
        let pumps = std::env::var("REACTOR_SIM_PUMPS")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(2);
        tracing::info!(pumps, "using simulated pump chain");
        Ok(Box::new(reactor_hardware::SimulatedChain::new(pumps)))
    }
}

/// Discover the chain and push configured speeds, calibrations and virtual
/// pumps. The link is closed again if configuration fails.
pub fn open_link(cfg: &Config, calib: Option<&PumpCalibration>) -> Result<Link> {
    let transport = open_transport(cfg)?;
    let mut link = PumpLink::discover(transport, LinkSettings::from(cfg))?;
    apply_pump_config(&mut link, &cfg.pumps, calib).wrap_err("apply pump configuration")?;
    Ok(link)
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .wrap_err("start async runtime")
}

pub struct RunOpts {
    pub enable: bool,
    pub dispense_to: Option<String>,
    pub console: bool,
}

pub fn run_control(
    cfg: &Config,
    calib: Option<&PumpCalibration>,
    opts: RunOpts,
) -> Result<RunSummary> {
    let link = open_link(cfg, calib)?;
    let target = match opts.dispense_to.as_deref() {
        Some(id) => id.parse::<PumpId>()?,
        None => dispense_target(&cfg.pumps)?,
    };
    if link.get(target).is_none() {
        tracing::warn!(pump = %target, "controller output pump is not connected");
    }

    let log = FileTickLog::create(&cfg.logging.tick_log).wrap_err_with(|| {
        format!("create tick log {}", cfg.logging.tick_log.display())
    })?;
    let controller = Controller::builder()
        .with_pid(Pid::from(&cfg.pid))
        .with_track(Track::from(&cfg.pid.track))
        .with_average_window(cfg.pid.average_window)
        .enabled(cfg.pid.enabled || opts.enable)
        .with_log(log)
        .with_ceiling(cfg.pid.ceiling_ml)
        .build()?;

    let plan = WatchPlan::from(&cfg.watch);
    let feed_path = plan
        .autosave_path()
        .ok_or_else(|| eyre::eyre!("watch.prediction_dir is not set"))?;
    let actor =
        ControlActor::new(link, controller, AutosaveFeed::new(feed_path)).dispense_to(Some(target));

    let rt = runtime()?;
    rt.block_on(async {
        let runtime = Runtime::new();
        let tx = runtime.events();
        ctrlc::set_handler(move || {
            let _ = tx.try_send(ControlEvent::Shutdown);
        })
        .wrap_err("install Ctrl-C handler")?;
        if opts.console {
            console::spawn(runtime.events());
        }
        tracing::info!(pump = %target, "control loop started");
        runtime.run(actor, &plan).await
    })
}

pub fn discover(cfg: &Config) -> Result<Vec<u8>> {
    let link = PumpLink::discover(open_transport(cfg)?, LinkSettings::from(cfg))?;
    Ok(link.physical_addresses())
}

pub fn status(cfg: &Config, calib: Option<&PumpCalibration>) -> Result<Vec<String>> {
    let mut link = open_link(cfg, calib)?;
    let mut lines = Vec::new();
    for address in link.physical_addresses() {
        let info = link.full_info(address)?;
        lines.push(format!("pump {address}: {info}"));
    }
    Ok(lines)
}

pub fn speed(cfg: &Config, address: u8, direction: Direction, rpm: f64) -> Result<()> {
    let mut link = open_link(cfg, None)?;
    link.assign_speed(address, direction, rpm)?;
    Ok(())
}

pub fn dispense(cfg: &Config, calib: Option<&PumpCalibration>, pump: &str, ml: f64) -> Result<()> {
    let id: PumpId = pump.parse()?;
    let mut link = open_link(cfg, calib)?;
    runtime()?.block_on(link.dispense_volume(id, ml))?;
    Ok(())
}

/// vol/rev from a measured calibration run.
pub fn vol_per_rev(revolutions: f64, measured_ml: f64) -> Result<f64> {
    if !(revolutions.is_finite() && revolutions > 0.0) {
        eyre::bail!("revolutions must be > 0");
    }
    if !(measured_ml.is_finite() && measured_ml > 0.0) {
        eyre::bail!("measured volume must be > 0");
    }
    Ok(measured_ml / revolutions)
}

/// Start a calibration run of `revolutions` on `address` at its configured speed.
pub fn calibration_run(cfg: &Config, address: u8, revolutions: f64) -> Result<()> {
    let mut link = open_link(cfg, None)?;
    link.assign_revolutions(address, revolutions, true)
        .wrap_err("calibration run (configure rpm and direction for this pump first)")?;
    Ok(())
}

pub fn process_spectrum(cfg: &Config, file: &Path) -> Result<std::path::PathBuf> {
    let processor = SpectrumProcessor::new(RetryPolicy::from(&cfg.watch));
    let out = runtime()?.block_on(processor.process(file))?;
    Ok(out)
}
