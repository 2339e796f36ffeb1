mod cli;
mod console;
mod control;
mod error_fmt;

use std::path::Path;

use clap::Parser;
use eyre::{Result, WrapErr};
use reactor_config::{Config, Logging, PumpCalibration};
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt, prelude::*};

use crate::cli::{Cli, Commands, FILE_GUARD, JSON_MODE};
use crate::control::RunOpts;
use crate::error_fmt::{exit_code_for_error, format_error_json, humanize};

fn main() {
    let cli = Cli::parse();
    let _ = JSON_MODE.set(cli.json);

    if let Err(e) = real_main(cli) {
        if JSON_MODE.get().copied().unwrap_or(false) {
            eprintln!("{}", format_error_json(&e));
        } else {
            eprintln!("{}", humanize(&e));
        }
        std::process::exit(exit_code_for_error(&e));
    }
}

fn real_main(cli: Cli) -> Result<()> {
    let cfg = load_config(&cli.config)?;
    let level = cli
        .log_level
        .as_deref()
        .or(cfg.logging.level.as_deref())
        .unwrap_or("info");
    init_tracing(cli.json, level, &cfg.logging)?;
    let _ = color_eyre::install();

    let calib = cli
        .calibration
        .as_deref()
        .map(reactor_config::load_calibration_csv)
        .transpose()?;
    if let Some(c) = &calib {
        tracing::info!(pumps = c.vol_per_rev.len(), "loaded pump calibration");
    }

    dispatch(cli.cmd, cli.json, &cfg, calib.as_ref())
}

fn load_config(path: &Path) -> Result<Config> {
    let text = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("read config {}", path.display()))?;
    let cfg: Config = toml::from_str(&text).wrap_err("parse config TOML")?;
    cfg.validate()?;
    Ok(cfg)
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

fn init_tracing(json: bool, level: &str, logging: &Logging) -> Result<()> {
    let filter = EnvFilter::try_new(level).wrap_err_with(|| format!("invalid log level {level:?}"))?;

    let mut layers: Vec<BoxedLayer> = Vec::new();
    // Console output goes to stderr; stdout carries command results.
    if json {
        layers.push(fmt::layer().json().with_writer(std::io::stderr).boxed());
    } else {
        layers.push(
            fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr)
                .boxed(),
        );
    }

    if let Some(file) = logging.file.as_deref() {
        let path = Path::new(file);
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let name = path
            .file_name()
            .ok_or_else(|| eyre::eyre!("logging.file has no file name: {file}"))?;
        let appender = match logging.rotation.as_deref().unwrap_or("never") {
            "daily" => tracing_appender::rolling::daily(dir, name),
            "hourly" => tracing_appender::rolling::hourly(dir, name),
            _ => tracing_appender::rolling::never(dir, name),
        };
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let _ = FILE_GUARD.set(guard);
        layers.push(
            fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(writer)
                .boxed(),
        );
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .wrap_err("install tracing subscriber")
}

fn dispatch(
    cmd: Commands,
    json: bool,
    cfg: &Config,
    calib: Option<&PumpCalibration>,
) -> Result<()> {
    match cmd {
        Commands::Run {
            enable,
            dispense_to,
            no_console,
        } => {
            let summary = control::run_control(
                cfg,
                calib,
                RunOpts {
                    enable,
                    dispense_to,
                    console: !no_console,
                },
            )?;
            if json {
                println!(
                    "{}",
                    serde_json::json!({ "ticks": summary.ticks, "total_ml": summary.total_ml })
                );
            } else {
                println!(
                    "stopped after {} ticks, {:.2} mL dispensed",
                    summary.ticks, summary.total_ml
                );
            }
        }
        Commands::Discover => {
            let addresses = control::discover(cfg)?;
            if json {
                println!("{}", serde_json::json!({ "pumps": addresses }));
            } else {
                for a in addresses {
                    println!("{a}");
                }
            }
        }
        Commands::Status => {
            for line in control::status(cfg, calib)? {
                println!("{line}");
            }
        }
        Commands::Speed {
            address,
            direction,
            rpm,
        } => {
            control::speed(cfg, address, direction.into(), rpm)?;
            println!("pump {address}: {rpm} rpm");
        }
        Commands::Dispense { pump, ml } => {
            control::dispense(cfg, calib, &pump, ml)?;
            println!("{pump}: dispensed {ml} mL");
        }
        Commands::Calibrate {
            address,
            revolutions,
            measured,
        } => match measured {
            Some(ml) => {
                let vpr = control::vol_per_rev(revolutions, ml)?;
                println!("pump {address}: vol/rev = {vpr:.4} mL");
                println!("csv row: {address},{revolutions},{ml}");
            }
            None => {
                control::calibration_run(cfg, address, revolutions)?;
                println!(
                    "pump {address}: running {revolutions} revolutions. Weigh the output, then run \
                     `calibrate {address} --revolutions {revolutions} --measured <ML>`"
                );
            }
        },
        Commands::ProcessSpectrum { file } => {
            let out = control::process_spectrum(cfg, &file)?;
            println!("{}", out.display());
        }
        Commands::SelfCheck => {
            println!("config: ok");
            if calib.is_some() {
                println!("calibration: ok");
            }
            let pumps = control::discover(cfg)?;
            println!("pumps: {}", pumps.len());
            println!("ok");
        }
    }
    Ok(())
}
