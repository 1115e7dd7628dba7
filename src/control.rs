use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::types::StopReason;

/// Cooperative stop check consulted at phase and work-unit boundaries.
///
/// Combines the abort token with the scan's duration budget. Neither
/// interrupts a tool call that is already running.
#[derive(Clone, Debug)]
pub struct Checkpoint {
    cancel: CancellationToken,
    started: Instant,
    budget: Duration,
}

impl Checkpoint {
    pub fn new(cancel: CancellationToken, budget: Duration) -> Self {
        Self {
            cancel,
            started: Instant::now(),
            budget,
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn check(&self) -> Option<StopReason> {
        if self.cancel.is_cancelled() {
            Some(StopReason::Aborted)
        } else if self.elapsed() >= self.budget {
            Some(StopReason::DeadlineExceeded)
        } else {
            None
        }
    }
}
