use std::time::Duration;

use chrono::NaiveDate;
use reactor_config::{DirectionCfg, PumpEntry, PumpsCfg, VirtualEntry};
use reactor_core::log::MemoryTickLog;
use reactor_core::mocks::StaticFeed;
use reactor_core::pid::{Pid, Tunings};
use reactor_core::runtime::{apply_pump_config, dispense_target};
use reactor_core::spectrum::RetryPolicy;
use reactor_core::{
    AutosaveFeed, ControlActor, ControlEvent, Controller, LinkSettings, OperatorCommand,
    PumpError, PumpId, PumpLink, Runtime, WatchPlan,
};
use reactor_hardware::SimulatedChain;
use tokio::sync::oneshot;

fn pumps_cfg() -> PumpsCfg {
    PumpsCfg {
        pumps: vec![
            PumpEntry {
                address: 1,
                vol_per_rev: Some(0.5),
                rpm: Some(100.0),
                direction: Some(DirectionCfg::Cw),
            },
            PumpEntry {
                address: 2,
                vol_per_rev: Some(1.0),
                rpm: None,
                direction: None,
            },
        ],
        virtuals: vec![VirtualEntry {
            pump_1: 1,
            pump_2: 2,
            ratio: 0.5,
        }],
        ..PumpsCfg::default()
    }
}

fn controller(log: &MemoryTickLog) -> Controller {
    Controller::builder()
        .with_pid(Pid::new(
            Tunings {
                kp: 1.0,
                ki: 0.0,
                kd: 0.0,
            },
            10.0,
            (0.0, 20.0),
        ))
        .with_average_window(1)
        .enabled(true)
        .with_log(log.clone())
        .with_ceiling(100.0)
        .build()
        .unwrap()
}

fn frame(s: &str) -> Vec<u8> {
    let mut v = vec![0x02];
    v.extend_from_slice(s.as_bytes());
    v.push(0x0D);
    v
}

#[test]
fn pump_config_is_applied_after_discovery() {
    let chain = SimulatedChain::new(2);
    let mut link = PumpLink::discover(chain.clone(), LinkSettings::default()).unwrap();
    let virtuals = apply_pump_config(&mut link, &pumps_cfg(), None).unwrap();

    assert_eq!(virtuals, vec![PumpId::Virtual(3)]);
    let p1 = link.physical(1).unwrap();
    assert_eq!((p1.rpm, p1.vol_per_rev), (100.0, Some(0.5)));
    assert!(chain.frames().contains(&frame("P01S+100.0")));
    assert_eq!(dispense_target(&PumpsCfg::default()), Ok(PumpId::Physical(1)));
}

#[test]
fn unknown_dispense_target_is_rejected() {
    let cfg = PumpsCfg {
        dispense_to: Some("pump one".into()),
        ..PumpsCfg::default()
    };
    assert!(matches!(
        dispense_target(&cfg),
        Err(PumpError::UnknownPump(_))
    ));
}

#[tokio::test]
async fn operator_commands_reach_the_link() {
    let chain = SimulatedChain::new(2);
    let link = PumpLink::discover(chain.clone(), LinkSettings::default()).unwrap();
    let log = MemoryTickLog::new();
    let mut actor = ControlActor::new(link, controller(&log), StaticFeed::with_labels(["Glucose"]));

    let run = |s: &str| s.parse::<OperatorCommand>().unwrap();
    actor.execute(run("speed 1 cw 120")).await.unwrap();
    actor.execute(run("volrev 1 0.5")).await.unwrap();
    let reply = actor.execute(run("dispense 1 1.0")).await.unwrap();
    assert_eq!(reply, "1: dispensing 1 mL");
    assert!(chain.frames().contains(&frame("P01V000002.0")));

    let err = actor.execute(run("speed 1 cw 5")).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<PumpError>(),
        Some(PumpError::RpmOutOfRange(_))
    ));

    let status = actor.execute(run("status")).await.unwrap();
    assert!(status.contains("pump 1:"), "{status}");
    assert!(status.contains("pump 2:"), "{status}");
    assert_eq!(actor.snapshot().len(), 2);

    actor.execute(run("disable")).await.unwrap();
    assert!(!actor.controller().is_enabled());
}

#[tokio::test]
async fn prediction_event_ticks_and_dispenses_until_quit() {
    let chain = SimulatedChain::new(2);
    let mut link = PumpLink::discover(chain.clone(), LinkSettings::default()).unwrap();
    apply_pump_config(&mut link, &pumps_cfg(), None).unwrap();

    let mut feed = StaticFeed::with_labels(["Glucose"]);
    let at = NaiveDate::from_ymd_opt(2019, 8, 27)
        .and_then(|d| d.and_hms_opt(8, 0, 0))
        .unwrap();
    feed.push(at, vec![1.0]).unwrap();

    let log = MemoryTickLog::new();
    let actor =
        ControlActor::new(link, controller(&log), feed).dispense_to(Some(PumpId::Physical(1)));

    let runtime = Runtime::new();
    let events = runtime.events();
    let (tx, rx) = oneshot::channel();
    events.send(ControlEvent::PredictionChanged).await.unwrap();
    // nothing new: no second tick
    events.send(ControlEvent::PredictionChanged).await.unwrap();
    events
        .send(ControlEvent::Command {
            command: OperatorCommand::Quit,
            reply: Some(tx),
        })
        .await
        .unwrap();

    let plan = WatchPlan {
        raw_dir: None,
        prediction_dir: None,
        autosave_pattern: "autosave.txt".into(),
        retry: RetryPolicy::default(),
        status_refresh: Duration::from_secs(3600),
    };
    let summary = runtime.run(actor, &plan).await.unwrap();

    assert_eq!(rx.await.unwrap(), "bye");
    assert_eq!(summary.ticks, 1);
    assert_eq!(summary.total_ml, 9.0);
    // 9 mL at 0.5 mL/rev
    let frames = chain.frames();
    assert!(frames.contains(&frame("P01V000018.0")));
    assert!(frames.contains(&frame("P01G")));
    assert!(frames.contains(&frame("P01L")));
    assert!(chain.is_closed());
    assert_eq!(log.lines().len(), 2);
}

fn autosave_record(time: &str, glucose: f64) -> String {
    format!("scan.txt\t08/27/2019\t{time}\t{glucose}, 1.5\n")
}

async fn wait_for_lines(log: &MemoryTickLog, n: usize) {
    let started = tokio::time::Instant::now();
    while log.lines().len() < n {
        assert!(
            started.elapsed() < Duration::from_secs(600),
            "tick log stuck at {} lines",
            log.lines().len()
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test(start_paused = true)]
async fn prediction_during_a_long_paired_dispense_still_ticks() {
    let dir = tempfile::tempdir().unwrap();
    let autosave = dir.path().join("autosave.txt");
    std::fs::write(
        &autosave,
        format!("Glucose, Lactate\n{}", autosave_record("08:00:00 AM", 1.0)),
    )
    .unwrap();

    // real-time runs: 4.5 mL through pump 1 takes 5.4 s
    let chain = SimulatedChain::new(2).with_speedup(1.0);
    let settings = LinkSettings {
        idle_poll: Duration::from_millis(100),
        ..LinkSettings::default()
    };
    let mut link = PumpLink::discover(chain.clone(), settings).unwrap();
    let cfg = PumpsCfg {
        pumps: Vec::from([1, 2].map(|address| PumpEntry {
            address,
            vol_per_rev: Some(0.5),
            rpm: Some(100.0),
            direction: Some(DirectionCfg::Cw),
        })),
        ..pumps_cfg()
    };
    let virtuals = apply_pump_config(&mut link, &cfg, None).unwrap();

    let log = MemoryTickLog::new();
    let actor = ControlActor::new(link, controller(&log), AutosaveFeed::new(&autosave))
        .dispense_to(Some(virtuals[0]));

    let runtime = Runtime::new();
    let events = runtime.events();
    let signals = runtime.signals();
    let plan = WatchPlan {
        raw_dir: None,
        prediction_dir: None,
        autosave_pattern: "autosave.txt".into(),
        retry: RetryPolicy::default(),
        // hundreds of refreshes fall due during the dispense
        status_refresh: Duration::from_millis(10),
    };

    let driver = async {
        signals.prediction_changed();
        wait_for_lines(&log, 2).await;
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(chain.frames().contains(&frame("P01G")));
        assert!(!chain.frames().contains(&frame("P02G")));

        let mut f = std::fs::OpenOptions::new()
            .append(true)
            .open(&autosave)
            .unwrap();
        std::io::Write::write_all(&mut f, autosave_record("08:10:00 AM", 4.0).as_bytes())
            .unwrap();
        for _ in 0..3 {
            signals.prediction_changed();
        }

        wait_for_lines(&log, 3).await;
        events
            .send(ControlEvent::Command {
                command: OperatorCommand::Quit,
                reply: None,
            })
            .await
            .unwrap();
    };
    let (summary, ()) = tokio::join!(runtime.run(actor, &plan), driver);
    let summary = summary.unwrap();

    // both predictions ticked once: 9 mL then 6 mL
    assert_eq!(summary.ticks, 2);
    assert_eq!(summary.total_ml, 15.0);
    assert!(chain.frames().contains(&frame("P02G")));
}
