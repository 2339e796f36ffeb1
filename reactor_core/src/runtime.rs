//! Event-driven control loop.
//!
//! A single actor owns the pump link, the controller and the prediction feed.
//! Everything else (directory watchers, the status timer, the operator
//! console, Ctrl-C) only sends `ControlEvent`s, so a tick and the dispense it
//! triggers finish before the next event is looked at.
//!
//! Prediction changes and status refreshes are level signals rather than
//! queued events: any number raised while the actor is busy collapse into
//! one, and none is lost to a full channel.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use reactor_config::{PumpCalibration, PumpsCfg, WatchCfg};
use reactor_traits::Transport;
use tokio::sync::{Notify, mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::command::{HELP, OperatorCommand};
use crate::controller::{Controller, TickOutcome};
use crate::error::{PumpError, Result};
use crate::feed::PredictionFeed;
use crate::link::{PumpInfo, PumpLink};
use crate::pump::PumpId;
use crate::spectrum::{RetryPolicy, SpectrumProcessor};

const EVENT_CAPACITY: usize = 64;

#[derive(Debug)]
pub enum ControlEvent {
    /// The autosave file changed.
    PredictionChanged,
    Command {
        command: OperatorCommand,
        reply: Option<oneshot::Sender<String>>,
    },
    RefreshStatus,
    Shutdown,
}

/// Coalescing wake-ups for the control actor.
#[derive(Debug, Clone, Default)]
pub struct Signals {
    prediction: Arc<Notify>,
    refresh: Arc<Notify>,
}

impl Signals {
    /// The autosave file changed; the actor ticks once it is free.
    pub fn prediction_changed(&self) {
        self.prediction.notify_one();
    }

    pub fn refresh_due(&self) {
        self.refresh.notify_one();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub ticks: usize,
    pub total_ml: f64,
}

/// Push configured speeds, calibrations and virtual pumps onto a freshly
/// discovered link. Calibration fits win over `vol_per_rev` from the config.
pub fn apply_pump_config<T: Transport>(
    link: &mut PumpLink<T>,
    cfg: &PumpsCfg,
    calibration: Option<&PumpCalibration>,
) -> std::result::Result<Vec<PumpId>, PumpError> {
    for entry in &cfg.pumps {
        if let Some(v) = entry.vol_per_rev {
            link.set_vol_per_rev(entry.address, v)?;
        }
        if let (Some(rpm), Some(dir)) = (entry.rpm, entry.direction) {
            link.assign_speed(entry.address, dir.into(), rpm)?;
        }
    }
    if let Some(cal) = calibration {
        for (&address, &v) in &cal.vol_per_rev {
            link.set_vol_per_rev(address, v)?;
        }
    }
    cfg.virtuals
        .iter()
        .map(|v| link.add_virtual(v.pump_1, v.pump_2, v.ratio))
        .collect()
}

/// Pump the controller output goes to; pump 1 unless configured.
pub fn dispense_target(cfg: &PumpsCfg) -> std::result::Result<PumpId, PumpError> {
    cfg.dispense_to
        .as_deref()
        .map_or(Ok(PumpId::Physical(1)), str::parse)
}

pub struct ControlActor<T: Transport, F: PredictionFeed> {
    link: PumpLink<T>,
    controller: Controller,
    feed: F,
    dispense_to: Option<PumpId>,
    snapshot: BTreeMap<u8, PumpInfo>,
}

impl<T: Transport, F: PredictionFeed> ControlActor<T, F> {
    pub fn new(link: PumpLink<T>, controller: Controller, feed: F) -> Self {
        Self {
            link,
            controller,
            feed,
            dispense_to: None,
            snapshot: BTreeMap::new(),
        }
    }

    /// Send each non-zero controller output to `pump`.
    pub fn dispense_to(mut self, pump: Option<PumpId>) -> Self {
        self.dispense_to = pump;
        self
    }

    pub fn link(&self) -> &PumpLink<T> {
        &self.link
    }

    pub fn controller(&self) -> &Controller {
        &self.controller
    }

    pub fn feed(&self) -> &F {
        &self.feed
    }

    /// Last status snapshot per physical pump.
    pub fn snapshot(&self) -> &BTreeMap<u8, PumpInfo> {
        &self.snapshot
    }

    /// Pull the new prediction, tick, and dispense the output.
    pub async fn on_prediction(&mut self) -> Option<TickOutcome> {
        if let Err(e) = self.feed.refresh() {
            tracing::warn!(error = %e, "prediction feed refresh failed");
        }
        let outcome = self.controller.tick(&self.feed)?;
        if outcome.output > 0.0
            && let Some(pump) = self.dispense_to
            && let Err(e) = self.link.dispense_volume(pump, outcome.output).await
        {
            tracing::warn!(%pump, volume = outcome.output, error = %e, "controller dispense failed");
        }
        Some(outcome)
    }

    pub fn refresh_status(&mut self) {
        for address in self.link.physical_addresses() {
            match self.link.full_info(address) {
                Ok(info) => {
                    tracing::debug!(address, %info, "pump status");
                    self.snapshot.insert(address, info);
                }
                Err(e) => tracing::warn!(address, error = %e, "pump status unavailable"),
            }
        }
    }

    pub fn status_text(&mut self) -> String {
        self.refresh_status();
        let mut out = format!(
            "controller: {}\n",
            self.controller.status(self.feed.labels())
        );
        let _ = writeln!(
            out,
            "dispensed: {:.2} mL over {} ticks",
            self.controller.total(),
            self.controller.outputs().len()
        );
        for (address, info) in &self.snapshot {
            let _ = writeln!(out, "pump {address}: {info}");
        }
        for (id, pump) in self.link.pumps() {
            if let crate::pump::Pump::Virtual(vp) = pump {
                let _ = writeln!(
                    out,
                    "{id}: pumps {} + {} ratio {}",
                    vp.pump_1, vp.pump_2, vp.ratio
                );
            }
        }
        out
    }

    /// Carry out one operator command and describe the result.
    pub async fn execute(&mut self, command: OperatorCommand) -> Result<String> {
        let labels = self.feed.labels();
        Ok(match command {
            OperatorCommand::Enable => {
                self.controller.enable();
                "controller enabled".into()
            }
            OperatorCommand::Disable => {
                self.controller.disable();
                "controller disabled".into()
            }
            OperatorCommand::ProportionalOnMeasurement(on) => {
                self.controller.set_proportional_on_measurement(on);
                format!("proportional on measurement {}", if on { "on" } else { "off" })
            }
            OperatorCommand::Update(params) => {
                self.controller.update_all(&params, labels)?;
                format!("updated: {}", self.controller.status(labels))
            }
            OperatorCommand::Speed {
                address,
                direction,
                rpm,
            } => {
                self.link.assign_speed(address, direction, rpm)?;
                format!("pump {address}: {direction} at {rpm} rpm")
            }
            OperatorCommand::VolPerRev { address, ml } => {
                self.link.set_vol_per_rev(address, ml)?;
                format!("pump {address}: {ml} mL/rev")
            }
            OperatorCommand::Dispense { pump, ml } => {
                self.link.dispense_volume(pump, ml).await?;
                format!("{pump}: dispensing {ml} mL")
            }
            OperatorCommand::Halt { address } => {
                self.link.halt(address)?;
                format!("pump {address}: halted")
            }
            OperatorCommand::AddVirtual {
                pump_1,
                pump_2,
                ratio,
            } => {
                let id = self.link.add_virtual(pump_1, pump_2, ratio)?;
                format!("{id}: pumps {pump_1} + {pump_2} ratio {ratio}")
            }
            OperatorCommand::SetVirtual {
                id,
                pump_1,
                pump_2,
                ratio,
            } => {
                self.link.set_virtual(id, pump_1, pump_2, ratio)?;
                format!("{id}: pumps {pump_1} + {pump_2} ratio {ratio}")
            }
            OperatorCommand::Status => self.status_text(),
            OperatorCommand::Mark => {
                let at = self.controller.mark()?;
                format!("experiment start marked at {at}")
            }
            OperatorCommand::ResetMark { acknowledged } => {
                let at = self.controller.reset_mark(acknowledged)?;
                format!("experiment start moved to {at}")
            }
            OperatorCommand::Help => HELP.to_string(),
            OperatorCommand::Quit => "bye".into(),
        })
    }

    async fn handle(&mut self, event: ControlEvent) -> Flow {
        match event {
            ControlEvent::PredictionChanged => {
                self.on_prediction().await;
                Flow::Continue
            }
            ControlEvent::RefreshStatus => {
                self.refresh_status();
                Flow::Continue
            }
            ControlEvent::Command { command, reply } => {
                let flow = if command == OperatorCommand::Quit {
                    Flow::Stop
                } else {
                    Flow::Continue
                };
                let text = match self.execute(command).await {
                    Ok(t) => t,
                    Err(e) => {
                        tracing::warn!(error = %e, "operator command failed");
                        format!("error: {e}")
                    }
                };
                if let Some(tx) = reply {
                    let _ = tx.send(text);
                }
                flow
            }
            ControlEvent::Shutdown => Flow::Stop,
        }
    }

    /// Process events and signals until a quit, a shutdown, or every sender
    /// is gone. The link is returned to local control on the way out.
    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<ControlEvent>,
        signals: Signals,
    ) -> RunSummary {
        loop {
            let event = tokio::select! {
                ev = events.recv() => match ev {
                    Some(ev) => ev,
                    None => break,
                },
                () = signals.prediction.notified() => ControlEvent::PredictionChanged,
                () = signals.refresh.notified() => ControlEvent::RefreshStatus,
            };
            if self.handle(event).await == Flow::Stop {
                break;
            }
        }
        if let Err(e) = self.link.close() {
            tracing::warn!(error = %e, "closing pump link");
        }
        let summary = RunSummary {
            ticks: self.controller.outputs().len(),
            total_ml: self.controller.total(),
        };
        tracing::info!(ticks = summary.ticks, total_ml = summary.total_ml, "control loop stopped");
        summary
    }
}

/// Where to watch and how often to refresh pump status.
#[derive(Debug, Clone)]
pub struct WatchPlan {
    pub raw_dir: Option<PathBuf>,
    pub prediction_dir: Option<PathBuf>,
    pub autosave_pattern: String,
    pub retry: RetryPolicy,
    pub status_refresh: Duration,
}

impl WatchPlan {
    /// Full path of the autosave file inside the prediction directory.
    pub fn autosave_path(&self) -> Option<PathBuf> {
        self.prediction_dir
            .as_ref()
            .map(|d| d.join(&self.autosave_pattern))
    }
}

impl From<&WatchCfg> for WatchPlan {
    fn from(c: &WatchCfg) -> Self {
        Self {
            raw_dir: Some(c.raw_dir.clone()),
            prediction_dir: Some(c.prediction_dir.clone()),
            autosave_pattern: c.autosave_pattern.clone(),
            retry: RetryPolicy::from(c),
            status_refresh: Duration::from_millis(c.status_refresh_ms),
        }
    }
}

/// Owns the event channel and the shutdown signal for background tasks.
pub struct Runtime {
    events: mpsc::Sender<ControlEvent>,
    inbox: mpsc::Receiver<ControlEvent>,
    signals: Signals,
    shutdown: watch::Sender<bool>,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime {
    pub fn new() -> Self {
        let (events, inbox) = mpsc::channel(EVENT_CAPACITY);
        let (shutdown, _) = watch::channel(false);
        Self {
            events,
            inbox,
            signals: Signals::default(),
            shutdown,
        }
    }

    /// Sender for the console, signal handlers and tests.
    pub fn events(&self) -> mpsc::Sender<ControlEvent> {
        self.events.clone()
    }

    pub fn signals(&self) -> Signals {
        self.signals.clone()
    }

    /// Start the watchers and the status timer, run the actor, then stop
    /// the background tasks.
    pub async fn run<T: Transport, F: PredictionFeed>(
        self,
        actor: ControlActor<T, F>,
        plan: &WatchPlan,
    ) -> Result<RunSummary> {
        let Self {
            events,
            inbox,
            signals,
            shutdown,
        } = self;
        let mut tasks = vec![spawn_status_refresh(
            signals.clone(),
            plan.status_refresh,
            shutdown.subscribe(),
        )];

        if let Some(dir) = &plan.raw_dir {
            let processor = SpectrumProcessor::new(plan.retry);
            tasks.push(watch_dir(
                dir,
                |ev: &Event| ev.kind.is_create(),
                move |path| {
                    if path.is_file() {
                        tokio::spawn(async move {
                            // failures are logged by the processor
                            let _ = processor.process(&path).await;
                        });
                    }
                },
                shutdown.subscribe(),
            )?);
        }

        if let Some(dir) = &plan.prediction_dir {
            let pattern = plan.autosave_pattern.clone();
            let prediction = signals.clone();
            tasks.push(watch_dir(
                dir,
                |ev: &Event| ev.kind.is_modify() || ev.kind.is_create(),
                move |path| {
                    let matches = path
                        .file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|n| n.ends_with(&pattern));
                    if matches {
                        prediction.prediction_changed();
                    }
                },
                shutdown.subscribe(),
            )?);
        }
        drop(events);

        let summary = actor.run(inbox, signals).await;
        shutdown.send_replace(true);
        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "background task ended abnormally");
            }
        }
        Ok(summary)
    }
}

fn spawn_status_refresh(
    signals: Signals,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => signals.refresh_due(),
                _ = shutdown.changed() => break,
            }
        }
    })
}

/// Watch `dir` (non-recursively) and hand every path of a matching event to
/// `on_path`. The directory is created if missing.
fn watch_dir(
    dir: &Path,
    wanted: fn(&Event) -> bool,
    mut on_path: impl FnMut(PathBuf) + Send + 'static,
    mut shutdown: watch::Receiver<bool>,
) -> Result<JoinHandle<()>> {
    std::fs::create_dir_all(dir)?;
    let (tx, mut rx) = mpsc::channel::<Event>(EVENT_CAPACITY);
    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| match res {
            Ok(event) => {
                let _ = tx.blocking_send(event);
            }
            Err(e) => tracing::warn!(error = %e, "file watch error"),
        },
        notify::Config::default(),
    )?;
    watcher.watch(dir, RecursiveMode::NonRecursive)?;
    tracing::info!(dir = %dir.display(), "watching");

    Ok(tokio::spawn(async move {
        // the watcher stops when dropped
        let _watcher = watcher;
        loop {
            tokio::select! {
                ev = rx.recv() => match ev {
                    Some(event) if wanted(&event) => event.paths.into_iter().for_each(&mut on_path),
                    Some(_) => {}
                    None => break,
                },
                _ = shutdown.changed() => break,
            }
        }
    }))
}
