//! Simulation launcher CLI
//!
//! Usage:
//!   sim_launch                      # full simulation
//!   sim_launch power-grid
//!   sim_launch plans/lab.plan.yaml -a python:=python3.11
//!   sim_launch full-sim --dry-run

use sim_launch::{BuiltinPlan, LaunchArgs};

#[tokio::main]
async fn main() {
    let args: LaunchArgs = argh::from_env();
    args.init_logging();

    if let Err(e) = args.run(BuiltinPlan::FullSim).await {
        log::error!("{}", e);
        std::process::exit(1);
    }
}
