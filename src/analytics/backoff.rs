use std::thread;
use std::time::Duration;

use rand::Rng;

/// Limits of the exponential backoff a report worker applies when rate limited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BackoffPolicy {
    /// Exponent every worker starts with, and the floor successes decay back to.
    pub initial_exponent: u32,
    /// Highest exponent a worker may still sleep with; beyond it the worker gives up.
    pub max_exponent: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_exponent: 6,
            max_exponent: 12,
        }
    }
}

/// Backoff and credential-retry state owned by a single worker for its whole lifetime.
#[derive(Debug, Clone)]
pub(crate) struct WorkerBackoffState {
    policy: BackoffPolicy,
    backoff_exponent: u32,
    credential_retry_available: bool,
}

impl WorkerBackoffState {
    pub(crate) fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            backoff_exponent: policy.initial_exponent,
            credential_retry_available: true,
        }
    }

    pub(crate) fn backoff_exponent(&self) -> u32 {
        self.backoff_exponent
    }

    #[cfg(test)]
    pub(crate) fn credential_retry_available(&self) -> bool {
        self.credential_retry_available
    }

    /// Whether the current exponent has gone past the policy ceiling.
    pub(crate) fn exhausted(&self) -> bool {
        self.backoff_exponent > self.policy.max_exponent
    }

    /// Sleep for the current exponent: `2^exponent` seconds plus up to one second of jitter.
    pub(crate) fn delay(&self) -> Duration {
        let jitter: f64 = rand::rng().random_range(0.0..1.0);
        Self::delay_with_jitter(self.backoff_exponent, jitter)
    }

    pub(crate) fn delay_with_jitter(exponent: u32, jitter: f64) -> Duration {
        let base = 2f64.powi(exponent as i32);
        Duration::from_secs_f64(base + jitter.clamp(0.0, 1.0))
    }

    /// Called after sleeping on a rate limit.
    pub(crate) fn escalate(&mut self) {
        self.backoff_exponent += 1;
    }

    /// Called after a successful report: shrink an inflated backoff by one step
    /// without going below the initial exponent, and allow a credential retry again.
    pub(crate) fn record_success(&mut self) {
        if self.backoff_exponent > self.policy.initial_exponent {
            self.backoff_exponent -= 1;
        }
        self.credential_retry_available = true;
    }

    /// Consumes the credential retry. Returns `false` if it was already used.
    pub(crate) fn take_credential_retry(&mut self) -> bool {
        std::mem::replace(&mut self.credential_retry_available, false)
    }
}

/// Where a worker goes to wait out a rate limit.
pub(crate) trait Pause: Sync {
    fn pause(&self, duration: Duration);
}

/// Blocks the calling worker thread only.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct ThreadSleep;

impl Pause for ThreadSleep {
    fn pause(&self, duration: Duration) {
        thread::sleep(duration);
    }
}
