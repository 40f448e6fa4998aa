//! Startup sequencer - drives a plan stage by stage
//!
//! For every stage the sequencer launches the stage's processes in
//! declaration order, then evaluates its readiness specs. A timed-out spec is
//! reported as a warning and the sequencer moves on regardless; only a failure
//! to start a process stops the plan.

use crate::plan::{ReadinessSpec, SequencerPlan, Stage};
use crate::runtime::probe::{ProbeOutcome, ReadinessProbe};
use crate::runtime::process::{LaunchError, Launcher};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Sequencer configuration
#[derive(Debug, Clone, Default)]
pub struct SequencerConfig {
    /// Evaluate a stage's readiness specs concurrently instead of one by one
    pub concurrent_probes: bool,
}

/// Position of the sequencer in its plan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequencerState {
    /// Stage `i` is next (or running)
    Pending(usize),
    /// Every stage has run
    Done,
}

impl SequencerState {
    /// State following stage `index` in a plan of `total` stages
    pub fn after(index: usize, total: usize) -> Self {
        if index + 1 < total {
            SequencerState::Pending(index + 1)
        } else {
            SequencerState::Done
        }
    }
}

/// What to do with a probe outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Proceed,
}

/// Readiness gates are advisory: every outcome lets the plan proceed.
pub fn gate_policy(_outcome: &ProbeOutcome) -> GateDecision {
    GateDecision::Proceed
}

/// Event emitted while the plan runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SequencerEvent {
    StageStarted {
        index: usize,
        total: usize,
        name: String,
    },
    ProcessLaunched {
        stage: usize,
        process: String,
    },
    ProbeFinished {
        stage: usize,
        spec: ReadinessSpec,
        outcome: ProbeOutcome,
    },
    StageFinished {
        index: usize,
    },
    Done,
}

/// Per-stage summary
#[derive(Debug, Clone)]
pub struct StageReport {
    pub name: String,
    pub launched: Vec<String>,
    pub probes: Vec<(ReadinessSpec, ProbeOutcome)>,
}

impl StageReport {
    pub fn timed_out(&self) -> impl Iterator<Item = &ReadinessSpec> {
        self.probes
            .iter()
            .filter(|(_, outcome)| !outcome.is_ready())
            .map(|(spec, _)| spec)
    }
}

/// Summary of a completed plan
#[derive(Debug, Clone)]
pub struct SequenceReport {
    pub plan: String,
    pub stages: Vec<StageReport>,
}

impl SequenceReport {
    pub fn launched_count(&self) -> usize {
        self.stages.iter().map(|s| s.launched.len()).sum()
    }

    pub fn ready_count(&self) -> usize {
        self.stages
            .iter()
            .flat_map(|s| &s.probes)
            .filter(|(_, outcome)| outcome.is_ready())
            .count()
    }

    pub fn timed_out(&self) -> impl Iterator<Item = &ReadinessSpec> {
        self.stages.iter().flat_map(|s| s.timed_out())
    }
}

impl fmt::Display for SequenceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let probes: usize = self.stages.iter().map(|s| s.probes.len()).sum();
        write!(
            f,
            "{}: {} stage(s), {} process(es) launched, {}/{} port(s) ready",
            self.plan,
            self.stages.len(),
            self.launched_count(),
            self.ready_count(),
            probes
        )?;

        let timed_out: Vec<String> = self.timed_out().map(|s| s.to_string()).collect();
        if !timed_out.is_empty() {
            write!(f, "; not observed: {}", timed_out.join(", "))?;
        }
        Ok(())
    }
}

/// Drives a [`SequencerPlan`] from its first stage to [`SequencerState::Done`]
pub struct StartupSequencer {
    launcher: Arc<dyn Launcher>,
    probe: ReadinessProbe,
    config: SequencerConfig,
    state: SequencerState,
    event_tx: Option<mpsc::UnboundedSender<SequencerEvent>>,
}

impl StartupSequencer {
    pub fn new(launcher: Arc<dyn Launcher>, probe: ReadinessProbe) -> Self {
        Self {
            launcher,
            probe,
            config: SequencerConfig::default(),
            state: SequencerState::Pending(0),
            event_tx: None,
        }
    }

    pub fn with_config(mut self, config: SequencerConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the event sender for progress reporting
    pub fn with_event_sender(mut self, tx: mpsc::UnboundedSender<SequencerEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn state(&self) -> SequencerState {
        self.state
    }

    /// Run every stage of `plan` in order
    ///
    /// Returns once the plan is [`SequencerState::Done`]. The only error is a
    /// process that could not be started; the stages after it are not run.
    pub async fn run(&mut self, plan: &SequencerPlan) -> Result<SequenceReport, SequencerError> {
        let total = plan.stages.len();
        let mut report = SequenceReport {
            plan: plan.name.clone(),
            stages: Vec::with_capacity(total),
        };

        log::info!("Starting plan '{}' ({} stages)", plan.name, total);
        self.state = if total == 0 {
            SequencerState::Done
        } else {
            SequencerState::Pending(0)
        };

        while let SequencerState::Pending(index) = self.state {
            let stage = &plan.stages[index];
            report.stages.push(self.run_stage(index, total, stage).await?);
            self.state = SequencerState::after(index, total);
        }

        log::info!("Plan '{}' complete", plan.name);
        self.emit(SequencerEvent::Done);
        Ok(report)
    }

    async fn run_stage(
        &self,
        index: usize,
        total: usize,
        stage: &Stage,
    ) -> Result<StageReport, SequencerError> {
        log::info!("Stage {}/{}: {}", index + 1, total, stage.name);
        self.emit(SequencerEvent::StageStarted {
            index,
            total,
            name: stage.name.clone(),
        });

        let mut launched = Vec::with_capacity(stage.processes.len());
        for process in &stage.processes {
            self.launcher
                .launch(process)
                .map_err(|source| SequencerError::LaunchFailed {
                    stage: stage.name.clone(),
                    source,
                })?;
            launched.push(process.name.clone());
            self.emit(SequencerEvent::ProcessLaunched {
                stage: index,
                process: process.name.clone(),
            });
        }

        let outcomes = if self.config.concurrent_probes {
            futures::future::join_all(stage.readiness.iter().map(|spec| self.probe.wait_for(spec)))
                .await
        } else {
            let mut outcomes = Vec::with_capacity(stage.readiness.len());
            for spec in &stage.readiness {
                outcomes.push(self.probe.wait_for(spec).await);
            }
            outcomes
        };

        let mut probes = Vec::with_capacity(outcomes.len());
        for (spec, outcome) in stage.readiness.iter().zip(outcomes) {
            if let ProbeOutcome::TimedOut { attempts } = outcome {
                log::warn!("{}", timeout_warning(&stage.name, spec, attempts));
            }
            self.emit(SequencerEvent::ProbeFinished {
                stage: index,
                spec: *spec,
                outcome,
            });

            match gate_policy(&outcome) {
                GateDecision::Proceed => probes.push((*spec, outcome)),
            }
        }

        self.emit(SequencerEvent::StageFinished { index });
        Ok(StageReport {
            name: stage.name.clone(),
            launched,
            probes,
        })
    }

    fn emit(&self, event: SequencerEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(event);
        }
    }
}

/// Warning logged when a stage's port never showed up
pub fn timeout_warning(stage: &str, spec: &ReadinessSpec, attempts: u32) -> String {
    format!(
        "Stage '{}': no listener on {} after {} attempts, continuing",
        stage, spec, attempts
    )
}

/// Errors that stop the sequencer
#[derive(Debug, thiserror::Error)]
pub enum SequencerError {
    #[error("Stage '{stage}' aborted: {source}")]
    LaunchFailed {
        stage: String,
        #[source]
        source: LaunchError,
    },
}
