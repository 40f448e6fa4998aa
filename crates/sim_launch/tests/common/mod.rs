//! Test doubles for sequencer scenarios

#![allow(dead_code)]

use async_trait::async_trait;
use sim_launch::{
    InspectionError, LaunchError, Launcher, ListenerEntry, ListenerTable, ProcessSpec, Transport,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// Launcher that records launches instead of spawning anything
#[derive(Default)]
pub struct RecordingLauncher {
    launched: Mutex<Vec<String>>,
    failing: HashSet<String>,
}

impl RecordingLauncher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Launcher whose launches of `names` fail as if the executable were missing
    pub fn failing_on(names: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            launched: Mutex::new(Vec::new()),
            failing: names.iter().map(|n| n.to_string()).collect(),
        })
    }

    pub fn launched(&self) -> Vec<String> {
        self.launched.lock().unwrap().clone()
    }
}

impl Launcher for RecordingLauncher {
    fn launch(&self, spec: &ProcessSpec) -> Result<(), LaunchError> {
        if self.failing.contains(&spec.name) {
            return Err(LaunchError::SpawnFailed {
                name: spec.name.clone(),
                executable: spec.executable.clone(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "No such file"),
            });
        }
        self.launched.lock().unwrap().push(spec.name.clone());
        Ok(())
    }
}

/// Listener table whose ports start listening at fixed times
pub struct ScriptedTable {
    started: Instant,
    listening_after: HashMap<(Transport, u16), Duration>,
    polls: AtomicU32,
}

impl ScriptedTable {
    /// Table where nothing ever listens
    pub fn silent() -> Arc<Self> {
        Self::with_ports(&[])
    }

    /// Table where each `(transport, port)` listens once `after` has elapsed
    pub fn with_ports(ports: &[(Transport, u16, Duration)]) -> Arc<Self> {
        Arc::new(Self {
            started: Instant::now(),
            listening_after: ports
                .iter()
                .map(|(transport, port, after)| ((*transport, *port), *after))
                .collect(),
            polls: AtomicU32::new(0),
        })
    }

    pub fn polls(&self) -> u32 {
        self.polls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ListenerTable for ScriptedTable {
    async fn listeners(&self, transport: Transport) -> Result<Vec<ListenerEntry>, InspectionError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        let elapsed = self.started.elapsed();

        Ok(self
            .listening_after
            .iter()
            .filter(|((t, _), after)| *t == transport && elapsed >= **after)
            .map(|((_, port), _)| ListenerEntry::new(format!("0.0.0.0:{}", port)))
            .collect())
    }
}

/// Interval used by every scenario
pub const INTERVAL: Duration = Duration::from_millis(100);
