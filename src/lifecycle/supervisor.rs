//! Fatal error handling.
//!
//! Components decide that the process must stop by sending a [`FatalError`]
//! through an [`AbortHandle`]. The [`Supervisor`] owns the exit: it logs, gives
//! the log pipeline a moment to flush and fires the shutdown broadcast. `main`
//! then runs the graceful shutdown steps and exits with a non-zero status.

use std::fmt;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::lifecycle::Shutdown;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FatalError {
    pub component: &'static str,
    pub message: String,
}

impl FatalError {
    pub fn new(component: &'static str, message: impl Into<String>) -> Self {
        Self {
            component,
            message: message.into(),
        }
    }
}

impl fmt::Display for FatalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.component, self.message)
    }
}

#[derive(Clone)]
pub struct AbortHandle {
    tx: mpsc::UnboundedSender<FatalError>,
}

impl AbortHandle {
    pub fn abort(&self, error: FatalError) {
        tracing::error!(component = error.component, error = %error.message, "Fatal error, aborting");
        let _ = self.tx.send(error);
    }
}

pub struct Supervisor {
    rx: mpsc::UnboundedReceiver<FatalError>,
    shutdown: Shutdown,
    flush_grace: Duration,
}

/// Create a connected abort handle and supervisor.
pub fn channel(shutdown: Shutdown, flush_grace: Duration) -> (AbortHandle, Supervisor) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        AbortHandle { tx },
        Supervisor {
            rx,
            shutdown,
            flush_grace,
        },
    )
}

impl Supervisor {
    /// Wait for a fatal error or an ordinary shutdown.
    ///
    /// Returns the fatal error, if any, after the shutdown broadcast has fired.
    pub async fn supervise(mut self) -> Option<FatalError> {
        tokio::select! {
            fatal = self.rx.recv() => match fatal {
                Some(fatal) => {
                    tracing::error!(error = %fatal, "Shutting down after fatal error");
                    tokio::time::sleep(self.flush_grace).await;
                    self.shutdown.trigger();
                    Some(fatal)
                }
                // every handle dropped
                None => {
                    self.shutdown.wait().await;
                    None
                }
            },
            _ = self.shutdown.wait() => None,
        }
    }
}
