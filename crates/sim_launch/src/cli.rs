//! Command-line interface shared by the launcher binaries

use crate::builtin::BuiltinPlan;
use crate::config::{PlanFile, PlanFileError};
use crate::runtime::{
    install_interrupt_handler, DetachedLauncher, Inspector, ProbeOutcome, ReadinessProbe,
    SequencerConfig, SequencerError, SequencerEvent, ShutdownGate, StartupSequencer,
};
use argh::FromArgs;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Readiness-gated startup launcher for simulation subsystems
#[derive(FromArgs, Debug)]
pub struct LaunchArgs {
    /// built-in plan (full-sim, power-grid) or path to a plan YAML file
    #[argh(positional)]
    pub plan: Option<String>,

    /// override plan arguments (format: key:=value)
    #[argh(option, short = 'a', from_str_fn(parse_arg_override))]
    pub arg: Vec<(String, String)>,

    /// listener table source: auto, ss or procfs (default: auto)
    #[argh(option, default = "Inspector::Auto")]
    pub inspector: Inspector,

    /// evaluate a stage's readiness checks concurrently
    #[argh(switch)]
    pub concurrent_probes: bool,

    /// exit after the last stage instead of waiting for operator input
    #[argh(switch)]
    pub no_wait: bool,

    /// show the resolved plan without launching anything
    #[argh(switch)]
    pub dry_run: bool,

    /// print the dry-run plan as JSON
    #[argh(switch)]
    pub json: bool,

    /// validate the plan and exit
    #[argh(switch)]
    pub validate: bool,

    /// log level (error, warn, info, debug, trace)
    #[argh(option, short = 'l', default = "String::from(\"info\")")]
    pub log_level: String,
}

/// Parse argument override in format "key:=value"
fn parse_arg_override(s: &str) -> Result<(String, String), String> {
    match s.split_once(":=") {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!(
            "Invalid argument format '{}'. Expected 'key:=value'",
            s
        )),
    }
}

/// Where the plan comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanSource {
    Builtin(BuiltinPlan),
    File(PathBuf),
}

impl PlanSource {
    /// Built-in plan names win over file paths
    pub fn from_arg(arg: &str) -> Self {
        match arg.parse::<BuiltinPlan>() {
            Ok(builtin) => PlanSource::Builtin(builtin),
            Err(_) => PlanSource::File(PathBuf::from(arg)),
        }
    }

    /// Load the plan file and the directory `$(dir)` refers to
    pub fn load(&self) -> Result<(PlanFile, Option<PathBuf>), PlanFileError> {
        match self {
            PlanSource::Builtin(builtin) => Ok((builtin.load()?, None)),
            PlanSource::File(path) => {
                let plan = PlanFile::from_file(path)?;
                let dir = path
                    .parent()
                    .filter(|p| !p.as_os_str().is_empty())
                    .map(PathBuf::from);
                Ok((plan, dir))
            }
        }
    }
}

impl fmt::Display for PlanSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanSource::Builtin(builtin) => write!(f, "built-in plan '{}'", builtin),
            PlanSource::File(path) => write!(f, "{}", path.display()),
        }
    }
}

impl LaunchArgs {
    /// Convert argument overrides to a HashMap
    pub fn arg_overrides(&self) -> HashMap<String, String> {
        self.arg.iter().cloned().collect()
    }

    /// Initialize env_logger from `--log-level`, letting `RUST_LOG` win
    pub fn init_logging(&self) {
        let log_level = match self.log_level.to_lowercase().as_str() {
            "error" => "error",
            "warn" => "warn",
            "info" => "info",
            "debug" => "debug",
            "trace" => "trace",
            _ => "info",
        };
        let env = env_logger::Env::default().default_filter_or(log_level);
        env_logger::init_from_env(env);
    }

    pub fn plan_source(&self, default: BuiltinPlan) -> PlanSource {
        self.plan
            .as_deref()
            .map(PlanSource::from_arg)
            .unwrap_or(PlanSource::Builtin(default))
    }

    /// Run the selected plan, then wait on the shutdown gate
    pub async fn run(self, default: BuiltinPlan) -> Result<(), CliError> {
        let source = self.plan_source(default);
        log::info!("Loading {}", source);
        let (plan_file, plan_dir) = source.load()?;

        if self.validate {
            println!("Plan '{}' is valid", plan_file.name);
            println!("  Version: {}", plan_file.version);
            println!("  Args: {}", plan_file.args.len());
            println!("  Stages: {}", plan_file.stages.len());
            println!("  Processes: {}", plan_file.process_count());
            return Ok(());
        }

        let plan = plan_file.resolve(&self.arg_overrides(), plan_dir.as_deref())?;

        if self.dry_run {
            if self.json {
                println!("{}", serde_json::to_string_pretty(&plan)?);
            } else {
                println!("{}", plan);
            }
            return Ok(());
        }

        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let printer = tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                if let Some(line) = progress_line(&event) {
                    println!("{}", line);
                }
            }
        });

        let mut sequencer = StartupSequencer::new(
            Arc::new(DetachedLauncher::new()),
            ReadinessProbe::new(self.inspector.table()),
        )
        .with_config(SequencerConfig {
            concurrent_probes: self.concurrent_probes,
        })
        .with_event_sender(event_tx);

        let result = sequencer.run(&plan).await;
        // Closing the channel lets the printer drain and finish
        drop(sequencer);
        let _ = printer.await;
        let report = result?;

        println!();
        println!("{}", report);
        println!("{}", plan.completion_message);

        if self.no_wait {
            return Ok(());
        }

        let interrupt = install_interrupt_handler()?;
        let signal = ShutdownGate::stdin()
            .with_interrupt(interrupt)
            .await_shutdown_signal()
            .await;
        log::info!(
            "Shutdown gate released ({:?}); launched processes keep running",
            signal
        );
        Ok(())
    }
}

/// Human-readable progress line for a sequencer event
pub fn progress_line(event: &SequencerEvent) -> Option<String> {
    match event {
        SequencerEvent::StageStarted { index, total, name } => {
            Some(format!("[{}/{}] {}", index + 1, total, name))
        }
        SequencerEvent::ProcessLaunched { process, .. } => {
            Some(format!("    launched {}", process))
        }
        SequencerEvent::ProbeFinished { spec, outcome, .. } => match outcome {
            ProbeOutcome::Ready { .. } => Some(format!("    {} ready", spec)),
            ProbeOutcome::TimedOut { attempts } => Some(format!(
                "    WARNING: no listener on {} after {} attempts, continuing",
                spec, attempts
            )),
        },
        SequencerEvent::StageFinished { .. } | SequencerEvent::Done => None,
    }
}

/// Errors surfaced by the launcher binaries
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error(transparent)]
    Plan(#[from] PlanFileError),

    #[error("Launch failed: {0}")]
    Sequencer(#[from] SequencerError),

    #[error("Failed to render plan as JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to install Ctrl+C handler: {0}")]
    Signal(#[from] ctrlc::Error),
}
