//! Simulation Launch System
//!
//! A readiness-gated startup sequencer for simulations built from
//! independently running subsystem processes (physical-world models,
//! protocol-speaking controllers, operator HMIs).
//!
//! # Overview
//!
//! A plan is an ordered list of stages. For every stage the launcher:
//! - starts the stage's processes in the background, keeping no handle
//! - polls the host's listening-socket table for the stage's ports
//! - warns about ports that never showed up and moves on regardless
//!
//! After the last stage the launcher waits for the operator before exiting.
//! Launched processes keep running after it exits.
//!
//! # Example Plan File
//!
//! ```yaml
//! name: power-grid
//!
//! args:
//!   grid_root:
//!     default: "Power_Grid_Simulation_System/src"
//!
//! stages:
//!   - name: physical-world
//!     processes:
//!       - name: power-grid-world
//!         executable: python3
//!         args: ["powerGridWorldRun.py"]
//!         working_dir: "$(arg grid_root)/powerGridWorld"
//!     readiness:
//!       - port: 3001
//!         transport: udp
//!
//!   - name: controllers
//!     processes:
//!       - executable: "$(arg grid_root)/bin/rtu"
//!     readiness:
//!       - port: 102
//!         transport: tcp
//!         max_retries: 50
//! ```

pub mod builtin;
pub mod cli;
pub mod config;
pub mod plan;
pub mod runtime;

pub use builtin::BuiltinPlan;
pub use cli::{LaunchArgs, PlanSource};
pub use config::{PlanFile, PlanFileError, SubstitutionError, Substitutions};
pub use plan::{ProcessSpec, ReadinessSpec, SequencerPlan, Stage, Transport};
pub use runtime::{
    DetachedLauncher, InspectionError, Inspector, LaunchError, Launcher, ListenerEntry,
    ListenerTable, ProbeOutcome, ReadinessProbe, SequenceReport, SequencerConfig, SequencerError,
    SequencerEvent, SequencerState, ShutdownGate, ShutdownSignal, StartupSequencer,
};
