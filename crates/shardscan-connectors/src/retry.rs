//! Retry tunables and per-attempt outcomes of the restart protocol.

use std::time::Duration;

use crate::error::ReaderError;

pub const DEFAULT_RETRY_BUDGET: Duration = Duration::from_secs(2 * 60 * 60);
pub const DEFAULT_BACKOFF_INTERVAL: Duration = Duration::from_secs(30);

/// Bounds of the restart protocol a reader runs after a stream fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// Maximum wall-clock time spent restarting one failed stream.
    pub retry_budget: Duration,
    /// Pause between two attempts.
    pub backoff_interval: Duration,
}

impl RetryConfig {
    pub fn new(retry_budget: Duration, backoff_interval: Duration) -> Self {
        Self {
            retry_budget,
            backoff_interval,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(DEFAULT_RETRY_BUDGET, DEFAULT_BACKOFF_INTERVAL)
    }
}

/// How one restart attempt ended.
#[derive(Debug)]
pub enum AttemptOutcome<T> {
    Succeeded(T),
    RetryableFailure(ReaderError),
    FatalFailure(ReaderError),
}

impl<T> AttemptOutcome<T> {
    /// Classify a failed step by the error's own retryability.
    pub fn from_error(err: ReaderError) -> Self {
        if err.is_retryable() {
            AttemptOutcome::RetryableFailure(err)
        } else {
            AttemptOutcome::FatalFailure(err)
        }
    }
}

/// What the reader does on a given attempt of the restart protocol.
///
/// Attempt 1 is the failed receive that started the protocol. Attempt 2
/// restarts the stream on the same tablet, later attempts fail over first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartStep {
    SameTablet,
    Failover,
}

impl RestartStep {
    pub fn for_attempt(attempt: u32) -> Self {
        if attempt > 2 {
            RestartStep::Failover
        } else {
            RestartStep::SameTablet
        }
    }
}
