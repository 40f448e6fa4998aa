//! End-to-end sequencer scenarios with scripted launchers and listener tables

mod common;

use common::{RecordingLauncher, ScriptedTable, INTERVAL};
use sim_launch::cli::progress_line;
use sim_launch::{
    DetachedLauncher, ProbeOutcome, ProcessSpec, ReadinessProbe, ReadinessSpec, SequencerConfig,
    SequencerError, SequencerEvent, SequencerPlan, SequencerState, Stage, StartupSequencer,
    Transport,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

fn process(name: &str) -> ProcessSpec {
    ProcessSpec::new(format!("bin/{}", name), Vec::<String>::new())
}

fn udp(port: u16, retries: u32) -> ReadinessSpec {
    ReadinessSpec::udp(port)
        .with_max_retries(retries)
        .with_poll_interval(INTERVAL)
}

fn tcp(port: u16, retries: u32) -> ReadinessSpec {
    ReadinessSpec::tcp(port)
        .with_max_retries(retries)
        .with_poll_interval(INTERVAL)
}

fn drain(rx: &mut mpsc::UnboundedReceiver<SequencerEvent>) -> Vec<SequencerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test(start_paused = true)]
async fn port_appearing_after_three_intervals_is_ready() {
    let launcher = RecordingLauncher::new();
    let table = ScriptedTable::with_ports(&[(Transport::Udp, 3001, Duration::from_millis(300))]);
    let mut sequencer = StartupSequencer::new(launcher.clone(), ReadinessProbe::new(table.clone()));

    let plan = SequencerPlan::new("single").stage(
        Stage::new("world")
            .launch(process("grid-world"))
            .launch(process("metro-world"))
            .gate_on(udp(3001, 10)),
    );

    let started = Instant::now();
    let report = sequencer.run(&plan).await.unwrap();

    assert_eq!(started.elapsed(), Duration::from_millis(300));
    assert_eq!(sequencer.state(), SequencerState::Done);
    assert_eq!(launcher.launched(), vec!["grid-world", "metro-world"]);
    assert_eq!(
        report.stages[0].probes,
        vec![(udp(3001, 10), ProbeOutcome::Ready { attempts: 4 })]
    );
    assert_eq!(table.polls(), 4);
}

#[tokio::test(start_paused = true)]
async fn port_never_listening_warns_and_still_finishes() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut sequencer = StartupSequencer::new(
        RecordingLauncher::new(),
        ReadinessProbe::new(ScriptedTable::silent()),
    )
    .with_event_sender(tx);

    let plan = SequencerPlan::new("silent").stage(Stage::new("rtu").gate_on(tcp(102, 5)));

    let started = Instant::now();
    let report = sequencer.run(&plan).await.unwrap();

    assert_eq!(started.elapsed(), Duration::from_millis(500));
    assert_eq!(sequencer.state(), SequencerState::Done);
    assert_eq!(report.timed_out().collect::<Vec<_>>(), vec![&tcp(102, 5)]);

    let events = drain(&mut rx);
    assert!(events.contains(&SequencerEvent::ProbeFinished {
        stage: 0,
        spec: tcp(102, 5),
        outcome: ProbeOutcome::TimedOut { attempts: 5 },
    }));
    assert_eq!(events.last(), Some(&SequencerEvent::Done));
}

#[tokio::test(start_paused = true)]
async fn timed_out_run_prints_warning_naming_the_port() {
    let table = ScriptedTable::with_ports(&[(Transport::Udp, 3001, Duration::from_millis(100))]);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut sequencer = StartupSequencer::new(RecordingLauncher::new(), ReadinessProbe::new(table))
        .with_event_sender(tx);

    let plan = SequencerPlan::new("grid").stage(
        Stage::new("physical-world")
            .launch(process("grid-world"))
            .gate_on(udp(3001, 5))
            .gate_on(udp(3002, 5)),
    );
    sequencer.run(&plan).await.unwrap();

    let lines: Vec<String> = drain(&mut rx).iter().filter_map(progress_line).collect();
    assert_eq!(
        lines,
        vec![
            "[1/1] physical-world".to_string(),
            "    launched grid-world".to_string(),
            "    udp port 3001 (5 x 100ms) ready".to_string(),
            "    WARNING: no listener on udp port 3002 (5 x 100ms) after 5 attempts, continuing"
                .to_string(),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn every_stage_runs_even_when_all_probes_time_out() {
    let launcher = RecordingLauncher::new();
    let mut sequencer =
        StartupSequencer::new(launcher.clone(), ReadinessProbe::new(ScriptedTable::silent()));

    let plan = SequencerPlan::new("three")
        .stage(Stage::new("world").launch(process("world")).gate_on(udp(3001, 2)))
        .stage(Stage::new("plc").launch(process("plc")).gate_on(tcp(502, 2)))
        .stage(Stage::new("hmi").launch(process("hmi")));

    let report = sequencer.run(&plan).await.unwrap();

    assert_eq!(sequencer.state(), SequencerState::Done);
    assert_eq!(launcher.launched(), vec!["world", "plc", "hmi"]);
    assert_eq!(report.stages.len(), 3);
    assert_eq!(report.ready_count(), 0);
    assert_eq!(report.timed_out().count(), 2);
}

fn positions(events: &[SequencerEvent], pred: impl Fn(&SequencerEvent) -> bool) -> Vec<usize> {
    events
        .iter()
        .enumerate()
        .filter(|(_, e)| pred(e))
        .map(|(i, _)| i)
        .collect()
}

/// No launch of stage i+1 before every probe of stage i finished, and every
/// launch of a stage before its first probe result.
fn assert_stage_ordering(events: &[SequencerEvent], stages: usize) {
    for stage in 0..stages {
        let launches = positions(events, |e| {
            matches!(e, SequencerEvent::ProcessLaunched { stage: s, .. } if *s == stage)
        });
        let probes = positions(events, |e| {
            matches!(e, SequencerEvent::ProbeFinished { stage: s, .. } if *s == stage)
        });
        let next_launches = positions(events, |e| {
            matches!(e, SequencerEvent::ProcessLaunched { stage: s, .. } if *s == stage + 1)
        });

        if let (Some(last_launch), Some(first_probe)) = (launches.last(), probes.first()) {
            assert!(last_launch < first_probe, "stage {} probed before launching", stage);
        }
        if let (Some(last_probe), Some(first_next)) = (probes.last(), next_launches.first()) {
            assert!(
                last_probe < first_next,
                "stage {} launched before stage {} probes finished",
                stage + 1,
                stage
            );
        }
    }
}

fn ordering_plan() -> SequencerPlan {
    SequencerPlan::new("ordering")
        .stage(
            Stage::new("world")
                .launch(process("grid-world"))
                .launch(process("metro-world"))
                .gate_on(udp(3001, 5))
                .gate_on(udp(3002, 5)),
        )
        .stage(
            Stage::new("controllers")
                .launch(process("rtu"))
                .launch(process("plc"))
                .gate_on(tcp(102, 5))
                .gate_on(tcp(502, 3)),
        )
        .stage(Stage::new("hmi").launch(process("scada")))
}

#[tokio::test(start_paused = true)]
async fn stage_ordering_holds_in_recorded_trace() {
    let table = ScriptedTable::with_ports(&[
        (Transport::Udp, 3001, Duration::from_millis(100)),
        (Transport::Tcp, 102, Duration::from_millis(700)),
    ]);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut sequencer = StartupSequencer::new(RecordingLauncher::new(), ReadinessProbe::new(table))
        .with_event_sender(tx);

    sequencer.run(&ordering_plan()).await.unwrap();

    let events = drain(&mut rx);
    assert_stage_ordering(&events, 3);
    assert_eq!(
        events.first(),
        Some(&SequencerEvent::StageStarted {
            index: 0,
            total: 3,
            name: "world".to_string()
        })
    );
}

#[tokio::test(start_paused = true)]
async fn concurrent_probes_keep_ordering_and_declaration_order() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut sequencer = StartupSequencer::new(
        RecordingLauncher::new(),
        ReadinessProbe::new(ScriptedTable::silent()),
    )
    .with_config(SequencerConfig {
        concurrent_probes: true,
    })
    .with_event_sender(tx);

    let started = Instant::now();
    let report = sequencer.run(&ordering_plan()).await.unwrap();

    // Probes of a stage overlap: 5 intervals per stage instead of 10 and 8
    assert_eq!(started.elapsed(), Duration::from_millis(1000));
    assert_eq!(
        report.stages[1]
            .probes
            .iter()
            .map(|(spec, _)| spec.port)
            .collect::<Vec<_>>(),
        vec![102, 502]
    );
    assert_stage_ordering(&drain(&mut rx), 3);
}

#[tokio::test(start_paused = true)]
async fn launch_failure_aborts_remaining_stages() {
    let launcher = RecordingLauncher::failing_on(&["rtu"]);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut sequencer =
        StartupSequencer::new(launcher.clone(), ReadinessProbe::new(ScriptedTable::silent()))
            .with_event_sender(tx);

    let result = sequencer.run(&ordering_plan()).await;

    match result {
        Err(SequencerError::LaunchFailed { stage, .. }) => assert_eq!(stage, "controllers"),
        other => panic!("expected launch failure, got {:?}", other),
    }
    assert_eq!(sequencer.state(), SequencerState::Pending(1));
    assert_eq!(launcher.launched(), vec!["grid-world", "metro-world"]);

    let events = drain(&mut rx);
    assert!(!events
        .iter()
        .any(|e| matches!(e, SequencerEvent::StageStarted { index: 2, .. })));
    assert!(!events.contains(&SequencerEvent::Done));
}

#[tokio::test]
async fn missing_executable_stops_the_plan() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut sequencer = StartupSequencer::new(
        Arc::new(DetachedLauncher::new()),
        ReadinessProbe::new(ScriptedTable::silent()),
    )
    .with_event_sender(tx);

    let plan = SequencerPlan::new("broken")
        .stage(
            Stage::new("world")
                .launch(ProcessSpec::new("/nonexistent/sim/grid_world", ["--udp", "3001"])),
        )
        .stage(Stage::new("hmi").launch(ProcessSpec::new("true", Vec::<String>::new())));

    let err = sequencer.run(&plan).await.unwrap_err();

    assert!(err.to_string().contains("grid_world"));
    assert_eq!(sequencer.state(), SequencerState::Pending(0));
    assert!(!drain(&mut rx)
        .iter()
        .any(|e| matches!(e, SequencerEvent::StageStarted { index: 1, .. })));
}

#[tokio::test]
async fn empty_plan_is_done_immediately() {
    let mut sequencer = StartupSequencer::new(
        RecordingLauncher::new(),
        ReadinessProbe::new(ScriptedTable::silent()),
    );

    let report = sequencer.run(&SequencerPlan::new("empty")).await.unwrap();

    assert_eq!(sequencer.state(), SequencerState::Done);
    assert!(report.stages.is_empty());
}
