use serde::Deserialize;
use std::time::Duration;

/// How the delay between batches grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    /// Always wait the base delay.
    Fixed,
    /// Double the base delay for every consecutive batch with a failure.
    Exponential,
}

/// Restart policy for the supervise loop.
///
/// Decides how long to wait after a batch completes before launching the next
/// one. A zero base delay restarts immediately regardless of kind.
#[derive(Debug, Clone)]
pub struct RestartPolicy {
    kind: BackoffKind,
    base_delay: Duration,
    max_delay: Duration,
    consecutive_failures: u32,
}

impl RestartPolicy {
    pub fn new(kind: BackoffKind, base_delay_secs: u64, max_delay_secs: u64) -> Self {
        Self {
            kind,
            base_delay: Duration::from_secs(base_delay_secs),
            max_delay: Duration::from_secs(max_delay_secs.max(base_delay_secs)),
            consecutive_failures: 0,
        }
    }

    /// Restart as soon as the previous batch finishes.
    pub fn immediate() -> Self {
        Self::new(BackoffKind::Fixed, 0, 0)
    }

    /// Record the outcome of a batch and return the delay before the next one.
    pub fn next_delay(&mut self, batch_succeeded: bool) -> Duration {
        match self.kind {
            BackoffKind::Fixed => self.base_delay,
            BackoffKind::Exponential => {
                if batch_succeeded {
                    self.consecutive_failures = 0;
                    return self.base_delay;
                }
                let delay = backoff_delay(self.base_delay, self.consecutive_failures, self.max_delay);
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                tracing::debug!(
                    consecutive_failures = self.consecutive_failures,
                    delay_secs = delay.as_secs(),
                    "backing off before restart"
                );
                delay
            }
        }
    }

    /// Failed batches in a row (exponential policy only).
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }
}

/// `base * 2^count`, capped at `max`.
fn backoff_delay(base: Duration, count: u32, max: Duration) -> Duration {
    let shift = 1u32.checked_shl(count).unwrap_or(u32::MAX);
    base.saturating_mul(shift).min(max)
}
