//! Plan file YAML schema definitions

use crate::config::{SubstitutionError, Substitutions};
use crate::plan::{ProcessSpec, ReadinessSpec, SequencerPlan, Stage, Transport};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root plan file configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanFile {
    /// Plan file format version
    #[serde(default = "default_version")]
    pub version: String,

    /// Plan name shown in progress output
    pub name: String,

    /// Message printed once every stage has run
    #[serde(default = "default_completion_message")]
    pub completion_message: String,

    /// Argument definitions with defaults
    #[serde(default)]
    pub args: IndexMap<String, ArgDefinition>,

    /// Environment variables (applied to all processes)
    #[serde(default)]
    pub env: IndexMap<String, String>,

    /// Stages, launched in order
    pub stages: Vec<StageConfig>,
}

fn default_version() -> String {
    "1.0".to_string()
}

fn default_completion_message() -> String {
    "All stages started. Press Enter to exit.".to_string()
}

/// Argument definition with default value
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArgDefinition {
    pub default: ArgValue,
    #[serde(default)]
    pub description: Option<String>,
}

/// Argument values can be strings, booleans, or numbers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArgValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl ArgValue {
    /// String form used during substitution
    pub fn to_arg_string(&self) -> String {
        match self {
            ArgValue::Bool(b) => b.to_string(),
            ArgValue::Int(i) => i.to_string(),
            ArgValue::Float(f) => f.to_string(),
            ArgValue::String(s) => s.clone(),
        }
    }
}

/// Stage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageConfig {
    pub name: String,

    #[serde(default)]
    pub processes: Vec<ProcessConfig>,

    /// Readiness checks evaluated after this stage's launches
    #[serde(default)]
    pub readiness: Vec<ReadinessConfig>,
}

/// Process configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessConfig {
    /// Display name (defaults to the executable's file name)
    #[serde(default)]
    pub name: Option<String>,

    pub executable: String,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default)]
    pub working_dir: Option<String>,

    /// Environment variables specific to this process
    #[serde(default)]
    pub env: IndexMap<String, String>,
}

/// Readiness check configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessConfig {
    pub port: u16,

    pub transport: Transport,

    /// Defaults to 100ms
    #[serde(default)]
    pub poll_interval_ms: Option<u64>,

    /// Defaults to 100 for udp, 200 for tcp
    #[serde(default)]
    pub max_retries: Option<u32>,
}

impl ReadinessConfig {
    fn to_spec(&self) -> ReadinessSpec {
        let mut spec = ReadinessSpec::new(self.port, self.transport);
        if let Some(ms) = self.poll_interval_ms {
            spec = spec.with_poll_interval(Duration::from_millis(ms));
        }
        if let Some(retries) = self.max_retries {
            spec = spec.with_max_retries(retries);
        }
        spec
    }
}

impl PlanFile {
    /// Load plan file from a YAML file
    pub fn from_file(path: &Path) -> Result<Self, PlanFileError> {
        let content = std::fs::read_to_string(path).map_err(|e| PlanFileError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_yaml(&content)
    }

    /// Parse plan file from YAML string
    pub fn from_yaml(content: &str) -> Result<Self, PlanFileError> {
        let plan: PlanFile = serde_yaml::from_str(content)?;
        plan.validate()?;
        Ok(plan)
    }

    /// Validate the plan file configuration
    pub fn validate(&self) -> Result<(), PlanFileError> {
        if self.name.trim().is_empty() {
            return Err(PlanFileError::Validation(
                "plan must have a non-empty 'name'".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for stage in &self.stages {
            if !seen.insert(stage.name.as_str()) {
                return Err(PlanFileError::Validation(format!(
                    "Stage '{}' is defined more than once",
                    stage.name
                )));
            }

            if stage.processes.is_empty() && stage.readiness.is_empty() {
                return Err(PlanFileError::Validation(format!(
                    "Stage '{}': must launch a process or wait for a port",
                    stage.name
                )));
            }

            for process in &stage.processes {
                if process.executable.trim().is_empty() {
                    return Err(PlanFileError::Validation(format!(
                        "Stage '{}': process has an empty 'executable'",
                        stage.name
                    )));
                }
            }

            for readiness in &stage.readiness {
                if readiness.port == 0 {
                    return Err(PlanFileError::Validation(format!(
                        "Stage '{}': readiness port must be non-zero",
                        stage.name
                    )));
                }
                if readiness.poll_interval_ms == Some(0) {
                    return Err(PlanFileError::Validation(format!(
                        "Stage '{}': poll_interval_ms for port {} must be non-zero",
                        stage.name, readiness.port
                    )));
                }
            }
        }

        Ok(())
    }

    /// Total number of processes across all stages
    pub fn process_count(&self) -> usize {
        self.stages.iter().map(|s| s.processes.len()).sum()
    }

    /// Build the substitution values from argument defaults plus overrides
    pub fn substitutions(
        &self,
        overrides: &HashMap<String, String>,
        plan_dir: Option<&Path>,
    ) -> Result<Substitutions, PlanFileError> {
        let mut args: HashMap<String, String> = self
            .args
            .iter()
            .map(|(name, def)| (name.clone(), def.default.to_arg_string()))
            .collect();

        for (name, value) in overrides {
            if !self.args.contains_key(name) {
                return Err(PlanFileError::UnknownArgument(name.clone()));
            }
            args.insert(name.clone(), value.clone());
        }

        let mut subs = Substitutions::new()
            .with_args(args)
            .with_envs(self.env.clone());
        if let Some(dir) = plan_dir {
            subs = subs.with_plan_dir(dir);
        }
        Ok(subs)
    }

    /// Resolve the plan file into an immutable [`SequencerPlan`]
    pub fn resolve(
        &self,
        overrides: &HashMap<String, String>,
        plan_dir: Option<&Path>,
    ) -> Result<SequencerPlan, PlanFileError> {
        let subs = self.substitutions(overrides, plan_dir)?;

        let mut global_env = IndexMap::new();
        for (key, value) in &self.env {
            global_env.insert(key.clone(), expand(&subs, value, || format!("env '{}'", key))?);
        }

        let mut plan = SequencerPlan::new(self.name.clone())
            .with_completion_message(expand(&subs, &self.completion_message, || {
                "completion_message".to_string()
            })?);

        for stage_config in &self.stages {
            let mut stage = Stage::new(stage_config.name.clone());

            for process in &stage_config.processes {
                let process = resolve_process(&subs, &stage_config.name, process, &global_env)?;
                stage = stage.launch(process);
            }

            for readiness in &stage_config.readiness {
                stage = stage.gate_on(readiness.to_spec());
            }

            plan = plan.stage(stage);
        }

        Ok(plan)
    }
}

fn resolve_process(
    subs: &Substitutions,
    stage: &str,
    process: &ProcessConfig,
    global_env: &IndexMap<String, String>,
) -> Result<ProcessSpec, PlanFileError> {
    let executable = expand(subs, &process.executable, || {
        format!("stage '{}' executable", stage)
    })?;

    let mut args = Vec::with_capacity(process.args.len());
    for arg in &process.args {
        args.push(expand(subs, arg, || format!("stage '{}' args", stage))?);
    }

    let mut spec = ProcessSpec::new(executable, args);
    if let Some(name) = &process.name {
        spec = spec.with_name(name.clone());
    }

    if let Some(dir) = &process.working_dir {
        let dir = expand(subs, dir, || format!("process '{}' working_dir", spec.name))?;
        spec = spec.with_working_dir(PathBuf::from(dir));
    }

    // Process-level env overrides plan-level env
    for (key, value) in global_env {
        spec = spec.with_env(key.clone(), value.clone());
    }
    for (key, value) in &process.env {
        let value = expand(subs, value, || format!("process '{}' env '{}'", spec.name, key))?;
        spec = spec.with_env(key.clone(), value);
    }

    Ok(spec)
}

fn expand(
    subs: &Substitutions,
    input: &str,
    context: impl FnOnce() -> String,
) -> Result<String, PlanFileError> {
    subs.expand(input)
        .map_err(|source| PlanFileError::Substitution {
            context: context(),
            source,
        })
}

/// Errors that can occur when loading or resolving a plan file
#[derive(Debug, thiserror::Error)]
pub enum PlanFileError {
    #[error("Failed to read plan file '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse plan file: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unknown argument: {0}")]
    UnknownArgument(String),

    #[error("Substitution failed in {context}: {source}")]
    Substitution {
        context: String,
        #[source]
        source: SubstitutionError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    const GRID_PLAN: &str = r#"
name: grid
args:
  prefix:
    default: "src"
  rtu_port:
    default: 102
env:
  SIM_MODE: "lab"
stages:
  - name: world
    processes:
      - name: grid-world
        executable: python3
        args: ["$(arg prefix)/world.py"]
        working_dir: "$(arg prefix)"
    readiness:
      - port: 3001
        transport: udp
  - name: rtu
    processes:
      - executable: "$(arg prefix)/bin/rtu"
        args: ["--port", "$(arg rtu_port)"]
        env:
          SIM_MODE: "field"
    readiness:
      - port: 102
        transport: tcp
        max_retries: 5
        poll_interval_ms: 50
"#;

    #[test]
    fn test_parse_plan_file() {
        let plan = PlanFile::from_yaml(GRID_PLAN).unwrap();
        assert_eq!(plan.version, "1.0");
        assert_eq!(plan.stages.len(), 2);
        assert_eq!(plan.process_count(), 2);
        assert_eq!(plan.stages[1].readiness[0].max_retries, Some(5));
    }

    #[test]
    fn test_resolve_applies_defaults_and_overrides() {
        let file = PlanFile::from_yaml(GRID_PLAN).unwrap();
        let overrides = HashMap::from([("prefix".to_string(), "/opt/grid".to_string())]);
        let plan = file.resolve(&overrides, None).unwrap();

        let world = &plan.stages[0].processes[0];
        assert_eq!(world.name, "grid-world");
        assert_eq!(world.args, vec!["/opt/grid/world.py"]);
        assert_eq!(world.working_dir.as_deref(), Some(Path::new("/opt/grid")));
        assert_eq!(world.env.get("SIM_MODE").map(String::as_str), Some("lab"));

        let rtu = &plan.stages[1].processes[0];
        assert_eq!(rtu.name, "rtu");
        assert_eq!(rtu.args, vec!["--port", "102"]);
        assert_eq!(rtu.env.get("SIM_MODE").map(String::as_str), Some("field"));

        let udp = plan.stages[0].readiness[0];
        assert_eq!(udp, ReadinessSpec::udp(3001));
        let tcp = plan.stages[1].readiness[0];
        assert_eq!(tcp.max_retries, 5);
        assert_eq!(tcp.poll_interval, Duration::from_millis(50));
    }

    #[test]
    fn test_unknown_override_rejected() {
        let file = PlanFile::from_yaml(GRID_PLAN).unwrap();
        let overrides = HashMap::from([("nope".to_string(), "1".to_string())]);
        assert!(matches!(
            file.resolve(&overrides, None),
            Err(PlanFileError::UnknownArgument(name)) if name == "nope"
        ));
    }

    #[test]
    fn test_invalid_timestamp_in_plan_is_substitution_error() {
        let yaml = r#"
name: logs
stages:
  - name: world
    processes:
      - executable: "log_$(timestamp %Q)"
"#;
        let file = PlanFile::from_yaml(yaml).unwrap();
        assert!(matches!(
            file.resolve(&HashMap::new(), None),
            Err(PlanFileError::Substitution {
                source: SubstitutionError::InvalidTimestampFormat(_),
                ..
            })
        ));

        let file = PlanFile::from_yaml(GRID_PLAN).unwrap();
        let overrides = HashMap::from([("prefix".to_string(), "$(timestamp %!)".to_string())]);
        assert!(matches!(
            file.resolve(&overrides, None),
            Err(PlanFileError::Substitution { .. })
        ));
    }

    #[test]
    fn test_validation_rejects_zero_port() {
        let yaml = r#"
name: bad
stages:
  - name: world
    readiness:
      - port: 0
        transport: tcp
"#;
        assert!(matches!(
            PlanFile::from_yaml(yaml),
            Err(PlanFileError::Validation(_))
        ));
    }

    #[test]
    fn test_validation_rejects_duplicate_stage() {
        let yaml = r#"
name: bad
stages:
  - name: world
    processes:
      - executable: a
  - name: world
    processes:
      - executable: b
"#;
        assert!(PlanFile::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_validation_rejects_empty_stage() {
        let yaml = r#"
name: bad
stages:
  - name: nothing
"#;
        assert!(PlanFile::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_unknown_transport_is_parse_error() {
        let yaml = r#"
name: bad
stages:
  - name: world
    readiness:
      - port: 1
        transport: sctp
"#;
        assert!(matches!(
            PlanFile::from_yaml(yaml),
            Err(PlanFileError::Parse(_))
        ));
    }

    #[test]
    fn test_from_file_reports_path() {
        let err = PlanFile::from_file(Path::new("/nonexistent/plan.yaml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/plan.yaml"));
    }
}
