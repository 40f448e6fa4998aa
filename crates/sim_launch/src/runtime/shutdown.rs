//! Shutdown gate - keeps the orchestrator alive until the operator says so
//!
//! Launched processes are not owned by the gate and keep running after the
//! orchestrator exits.

use std::io::BufRead;
use tokio::sync::{oneshot, watch};

/// What released the gate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// The operator entered a line
    OperatorInput,
    /// Ctrl+C
    Interrupted,
    /// Standard input was closed or unreadable
    InputClosed,
}

/// Blocks on a single operator signal
pub struct ShutdownGate {
    input: oneshot::Receiver<ShutdownSignal>,
    interrupt: Option<watch::Receiver<()>>,
}

impl ShutdownGate {
    /// Gate released by a line on standard input
    pub fn stdin() -> Self {
        Self::from_reader(std::io::BufReader::new(std::io::stdin()))
    }

    /// Gate released by a line read from `reader`
    ///
    /// The read happens on a dedicated thread so a pending read never holds
    /// up runtime shutdown.
    pub fn from_reader<R>(reader: R) -> Self
    where
        R: BufRead + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        std::thread::spawn(move || {
            let _ = tx.send(read_signal(reader));
        });
        Self {
            input: rx,
            interrupt: None,
        }
    }

    /// Also release the gate when `rx` fires
    pub fn with_interrupt(mut self, rx: watch::Receiver<()>) -> Self {
        self.interrupt = Some(rx);
        self
    }

    /// Wait for the operator's signal
    pub async fn await_shutdown_signal(self) -> ShutdownSignal {
        let Self { input, interrupt } = self;
        let input = async move {
            // A dropped sender means the reader thread died
            input.await.unwrap_or(ShutdownSignal::InputClosed)
        };

        match interrupt {
            Some(mut rx) => {
                let interrupted = async move {
                    if rx.changed().await.is_err() {
                        // Handler gone: only the input can release the gate
                        std::future::pending::<()>().await;
                    }
                };
                tokio::select! {
                    signal = input => signal,
                    _ = interrupted => ShutdownSignal::Interrupted,
                }
            }
            None => input.await,
        }
    }
}

fn read_signal<R: BufRead>(mut reader: R) -> ShutdownSignal {
    let mut line = String::new();
    match reader.read_line(&mut line) {
        Ok(0) => ShutdownSignal::InputClosed,
        Ok(_) => ShutdownSignal::OperatorInput,
        Err(e) => {
            log::warn!("Failed to read operator input: {}", e);
            ShutdownSignal::InputClosed
        }
    }
}

/// Route Ctrl+C into a watch channel
///
/// Returns the receiver to hand to [`ShutdownGate::with_interrupt`].
pub fn install_interrupt_handler() -> Result<watch::Receiver<()>, ctrlc::Error> {
    let (tx, rx) = watch::channel(());
    ctrlc::set_handler(move || {
        log::info!("Received Ctrl+C");
        let _ = tx.send(());
    })?;
    Ok(rx)
}
