//! Plans shipped with the launcher
//!
//! Both plans are ordinary plan files embedded at compile time, so they run
//! through the same code path as a plan loaded from disk.

use crate::config::{PlanFile, PlanFileError};
use std::fmt;
use std::str::FromStr;

const FULL_SIM: &str = include_str!("../plans/full_sim.plan.yaml");
const POWER_GRID: &str = include_str!("../plans/power_grid.plan.yaml");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinPlan {
    /// Power grid and metro together
    FullSim,
    /// Power grid only
    PowerGrid,
}

impl BuiltinPlan {
    pub const ALL: [BuiltinPlan; 2] = [BuiltinPlan::FullSim, BuiltinPlan::PowerGrid];

    pub fn name(&self) -> &'static str {
        match self {
            BuiltinPlan::FullSim => "full-sim",
            BuiltinPlan::PowerGrid => "power-grid",
        }
    }

    /// YAML source of the plan
    pub fn source(&self) -> &'static str {
        match self {
            BuiltinPlan::FullSim => FULL_SIM,
            BuiltinPlan::PowerGrid => POWER_GRID,
        }
    }

    pub fn load(&self) -> Result<PlanFile, PlanFileError> {
        PlanFile::from_yaml(self.source())
    }
}

impl fmt::Display for BuiltinPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BuiltinPlan {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BuiltinPlan::ALL
            .into_iter()
            .find(|plan| plan.name() == s || plan.name().replace('-', "_") == s)
            .ok_or_else(|| format!("Unknown built-in plan '{}'", s))
    }
}
