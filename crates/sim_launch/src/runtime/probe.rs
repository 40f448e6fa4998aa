//! Readiness probe: bounded polling for a listener on a port
//!
//! This is a liveness heuristic, not a handshake. It only tells that something
//! listens on the port, not that the subsystem behind it works.

use crate::plan::ReadinessSpec;
use crate::runtime::listeners::ListenerTable;
use std::sync::Arc;

/// Result of a readiness probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// A listener was observed on the given poll (1-based)
    Ready { attempts: u32 },
    /// The retry budget ran out without observing the port
    TimedOut { attempts: u32 },
}

impl ProbeOutcome {
    pub fn is_ready(&self) -> bool {
        matches!(self, ProbeOutcome::Ready { .. })
    }

    /// Number of polls performed
    pub fn attempts(&self) -> u32 {
        match self {
            ProbeOutcome::Ready { attempts } | ProbeOutcome::TimedOut { attempts } => *attempts,
        }
    }
}

/// Polls a [`ListenerTable`] until a port shows up or the budget is spent
#[derive(Clone)]
pub struct ReadinessProbe {
    table: Arc<dyn ListenerTable>,
}

impl ReadinessProbe {
    pub fn new(table: Arc<dyn ListenerTable>) -> Self {
        Self { table }
    }

    /// Wait for a listener matching `spec`
    ///
    /// Polls at most `max_retries` times, sleeping `poll_interval` after every
    /// unsuccessful poll, so a timeout takes about `max_retries * poll_interval`.
    /// An inspection error counts as an unsuccessful poll.
    pub async fn wait_for(&self, spec: &ReadinessSpec) -> ProbeOutcome {
        for attempt in 1..=spec.max_retries {
            match self.table.listeners(spec.transport).await {
                Ok(entries) => {
                    if entries.iter().any(|e| e.listens_on(spec.port)) {
                        log::debug!("{} ready after {} poll(s)", spec, attempt);
                        return ProbeOutcome::Ready { attempts: attempt };
                    }
                }
                Err(e) => {
                    log::debug!("{}: listener inspection failed on poll {}: {}", spec, attempt, e);
                }
            }

            tokio::time::sleep(spec.poll_interval).await;
        }

        ProbeOutcome::TimedOut {
            attempts: spec.max_retries,
        }
    }
}
