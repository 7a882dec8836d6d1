//! Startup and shutdown notifications to the coordinator.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::broadcast;

use crate::agent::client::{ClientError, CoordinatorClient};
use crate::models::{AgentMetadata, CheckInResponse, TrafficSourceState};
use crate::observability::metrics;
use crate::resilience::{RetryError, RetryPolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckInAction {
    Startup,
    Shutdown,
}

impl CheckInAction {
    pub fn as_str(self) -> &'static str {
        match self {
            CheckInAction::Startup => "startup",
            CheckInAction::Shutdown => "shutdown",
        }
    }
}

/// How a check-in loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckInOutcome {
    /// Check-in rounds, not counting retries within a round.
    pub rounds: u32,
    /// Last state reported by the coordinator. `None` if a reply could not be decoded.
    pub final_state: Option<TrafficSourceState>,
    pub interrupted: bool,
    pub timed_out: bool,
}

pub struct CheckInLoop {
    client: Arc<CoordinatorClient>,
    metadata: AgentMetadata,
    group: String,
    retry: RetryPolicy,
    timeout: Duration,
}

impl CheckInLoop {
    pub fn new(
        client: Arc<CoordinatorClient>,
        metadata: AgentMetadata,
        group: &str,
        retry: RetryPolicy,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            metadata,
            group: group.to_string(),
            retry,
            timeout,
        }
    }

    /// Check in and keep polling until the coordinator answers DONE.
    ///
    /// The loop stops early, without error, when the deadline passes or the
    /// `interrupt` channel fires.
    #[tracing::instrument(skip(self, interrupt), fields(action = action.as_str(), group = %self.group))]
    pub async fn notify_service(
        &self,
        action: CheckInAction,
        mut interrupt: Option<broadcast::Receiver<()>>,
    ) -> Result<CheckInOutcome, RetryError<ClientError>> {
        let started = Instant::now();
        let mut outcome = CheckInOutcome {
            rounds: 0,
            final_state: None,
            interrupted: false,
            timed_out: false,
        };
        let mut status = false;

        loop {
            outcome.rounds += 1;
            let result = self.check_in_once(action, status).await;
            metrics::record_checkin(action.as_str(), result.is_ok());
            let Some(response) = result? else {
                outcome.final_state = None;
                return Ok(outcome);
            };
            outcome.final_state = Some(response.state);
            if let Some(message) = &response.exception_message {
                tracing::warn!(message = %message, "Coordinator reported a check-in problem");
            }
            if response.state == TrafficSourceState::Done {
                tracing::info!(rounds = outcome.rounds, "Check-in complete");
                return Ok(outcome);
            }

            let elapsed = started.elapsed();
            if elapsed >= self.timeout {
                tracing::warn!(rounds = outcome.rounds, "Check-in deadline passed, giving up");
                outcome.timed_out = true;
                return Ok(outcome);
            }
            let wait = Duration::from_millis(response.wait_time).min(self.timeout - elapsed);
            tracing::debug!(wait = ?wait, "Coordinator asked to wait");

            let interrupted = match interrupt.as_mut() {
                Some(rx) => tokio::select! {
                    _ = tokio::time::sleep(wait) => false,
                    _ = rx.recv() => true,
                },
                None => {
                    tokio::time::sleep(wait).await;
                    false
                }
            };
            if interrupted {
                tracing::info!("Check-in interrupted by shutdown");
                outcome.interrupted = true;
                return Ok(outcome);
            }
            status = true;
        }
    }

    async fn check_in_once(
        &self,
        action: CheckInAction,
        status: bool,
    ) -> Result<Option<CheckInResponse>, RetryError<ClientError>> {
        let what = format!("{} check-in", action.as_str());
        self.retry
            .run(&what, move |_| async move {
                match self
                    .client
                    .check_in(&self.group, action.as_str(), status, &self.metadata)
                    .await
                {
                    Ok(response) => Ok(Some(response)),
                    Err(ClientError::Decode(e)) => {
                        tracing::warn!(error = %e, "Undecodable check-in reply, not waiting further");
                        Ok(None)
                    }
                    Err(e) => Err(e),
                }
            })
            .await
    }
}
