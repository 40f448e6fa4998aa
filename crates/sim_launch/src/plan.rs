//! Startup plan data model
//!
//! A [`SequencerPlan`] is an ordered list of [`Stage`]s. Each stage names the
//! processes to launch and the readiness specs that gate the next stage.
//! Plans are built once (from a plan file or in code) and only read afterwards.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default interval between two listener-table polls
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Default retry budget for UDP readiness probes (~10s at the default interval)
pub const DEFAULT_UDP_RETRIES: u32 = 100;

/// Default retry budget for TCP readiness probes (~20s at the default interval)
pub const DEFAULT_TCP_RETRIES: u32 = 200;

/// Transport kind of a listening socket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// Connectionless
    Udp,
    /// Connection-oriented
    Tcp,
}

impl Transport {
    /// Retry budget used when a spec does not set one
    pub fn default_max_retries(&self) -> u32 {
        match self {
            Transport::Udp => DEFAULT_UDP_RETRIES,
            Transport::Tcp => DEFAULT_TCP_RETRIES,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Transport::Udp => "udp",
            Transport::Tcp => "tcp",
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One subsystem process to launch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessSpec {
    /// Display name used in logs and progress output
    pub name: String,
    /// Executable path (or a name resolved through `PATH`)
    pub executable: String,
    /// Command line arguments
    pub args: Vec<String>,
    /// Working directory for the child
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
    /// Extra environment variables
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub env: IndexMap<String, String>,
}

impl ProcessSpec {
    /// Create a spec named after the executable's file name
    pub fn new<I, S>(executable: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let executable = executable.into();
        let name = Path::new(&executable)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| executable.clone());

        Self {
            name,
            executable,
            args: args.into_iter().map(Into::into).collect(),
            working_dir: None,
            env: IndexMap::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Command line as a single display string
    pub fn command_line(&self) -> String {
        if self.args.is_empty() {
            self.executable.clone()
        } else {
            format!("{} {}", self.executable, self.args.join(" "))
        }
    }
}

/// One observation to make against the local listener table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReadinessSpec {
    pub port: u16,
    pub transport: Transport,
    #[serde(rename = "poll_interval_ms", serialize_with = "serialize_millis")]
    pub poll_interval: Duration,
    pub max_retries: u32,
}

impl ReadinessSpec {
    /// Spec with the transport's default budget and interval
    pub fn new(port: u16, transport: Transport) -> Self {
        Self {
            port,
            transport,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_retries: transport.default_max_retries(),
        }
    }

    pub fn udp(port: u16) -> Self {
        Self::new(port, Transport::Udp)
    }

    pub fn tcp(port: u16) -> Self {
        Self::new(port, Transport::Tcp)
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Upper bound of the time spent waiting on this spec
    pub fn budget(&self) -> Duration {
        self.poll_interval.saturating_mul(self.max_retries)
    }
}

impl fmt::Display for ReadinessSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} port {} ({} x {}ms)",
            self.transport,
            self.port,
            self.max_retries,
            self.poll_interval.as_millis()
        )
    }
}

fn serialize_millis<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
}

/// An ordered unit of the startup plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Stage {
    pub name: String,
    pub processes: Vec<ProcessSpec>,
    pub readiness: Vec<ReadinessSpec>,
}

impl Stage {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            processes: Vec::new(),
            readiness: Vec::new(),
        }
    }

    /// Add a process to launch
    pub fn launch(mut self, process: ProcessSpec) -> Self {
        self.processes.push(process);
        self
    }

    /// Add a readiness spec evaluated after this stage's launches
    pub fn gate_on(mut self, readiness: ReadinessSpec) -> Self {
        self.readiness.push(readiness);
        self
    }
}

/// The complete startup plan for one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SequencerPlan {
    pub name: String,
    pub stages: Vec<Stage>,
    /// Shown to the operator once every stage has run
    pub completion_message: String,
}

impl SequencerPlan {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
            completion_message: String::from("All stages started."),
        }
    }

    pub fn stage(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn with_completion_message(mut self, message: impl Into<String>) -> Self {
        self.completion_message = message.into();
        self
    }

    pub fn process_count(&self) -> usize {
        self.stages.iter().map(|s| s.processes.len()).sum()
    }
}

/// Display the plan in a human-readable format (dry-run output)
impl fmt::Display for SequencerPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Startup Plan: {}", self.name)?;
        writeln!(f, "=============={}", "=".repeat(self.name.chars().count()))?;

        for (i, stage) in self.stages.iter().enumerate() {
            writeln!(f)?;
            writeln!(f, "  Stage {}/{}: {}", i + 1, self.stages.len(), stage.name)?;

            for process in &stage.processes {
                writeln!(f, "     Launch {}: {}", process.name, process.command_line())?;
                if let Some(dir) = &process.working_dir {
                    writeln!(f, "       Working dir: {}", dir.display())?;
                }
                for (key, value) in &process.env {
                    writeln!(f, "       {}={}", key, value)?;
                }
            }

            for readiness in &stage.readiness {
                writeln!(f, "     Wait for {}", readiness)?;
            }
        }

        Ok(())
    }
}
