//! Fire-and-forget process launching
//!
//! A launch hands the child's lifetime over to the operating environment: no
//! handle is kept, the child is never signalled or waited on, and it keeps
//! running after the launcher exits.

use crate::plan::ProcessSpec;
use std::process::Stdio;
use tokio::process::Command;

/// Starts one external process without waiting for it
pub trait Launcher: Send + Sync {
    /// Start `spec` in the background
    ///
    /// Returns once the process has been spawned. An error means the process
    /// could not be started at all.
    fn launch(&self, spec: &ProcessSpec) -> Result<(), LaunchError>;
}

/// Launcher that spawns detached children
///
/// On Unix the child is placed in its own process group so that a Ctrl+C
/// aimed at the orchestrator's foreground job does not reach it.
#[derive(Debug, Clone, Default)]
pub struct DetachedLauncher;

impl DetachedLauncher {
    pub fn new() -> Self {
        Self
    }
}

impl Launcher for DetachedLauncher {
    fn launch(&self, spec: &ProcessSpec) -> Result<(), LaunchError> {
        log::info!("[{}] Starting: {}", spec.name, spec.command_line());

        let mut cmd = Command::new(&spec.executable);
        cmd.args(&spec.args)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(false);

        if let Some(dir) = &spec.working_dir {
            cmd.current_dir(dir);
        }

        #[cfg(unix)]
        cmd.process_group(0);

        match cmd.spawn() {
            Ok(child) => {
                log::info!(
                    "[{}] Process started with PID: {}",
                    spec.name,
                    child.id().unwrap_or(0)
                );
                // Dropping the handle leaves the child running; tokio reaps it
                // in the background once it exits.
                drop(child);
                Ok(())
            }
            Err(source) => {
                log::error!("[{}] Failed to spawn process: {}", spec.name, source);
                Err(LaunchError::SpawnFailed {
                    name: spec.name.clone(),
                    executable: spec.executable.clone(),
                    source,
                })
            }
        }
    }
}

/// Errors that can occur when launching a process
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("Failed to spawn process '{name}' ({executable}): {source}")]
    SpawnFailed {
        name: String,
        executable: String,
        #[source]
        source: std::io::Error,
    },
}
