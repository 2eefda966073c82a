//! Retry with exponential backoff over transient failures.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::JobError;

/// How a single operation is retried: up to `max_attempts` tries, sleeping
/// `base * 2^attempt` between consecutive tries.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_attempts: u32,
    base: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base: Duration) -> Self {
        Self { max_attempts, base }
    }

    /// Policy for database reads and status updates.
    pub fn store() -> Self {
        Self::default()
    }

    /// Policy for large writes (content persistence), with a longer base so
    /// an overloaded database gets room to recover.
    pub fn bulk() -> Self {
        Self::new(4, Duration::from_secs(10))
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// The sleep before attempt `attempt + 1`.
    pub fn backoff_interval(&self, attempt: u32) -> Duration {
        self.base * 2u32.pow(attempt)
    }

    /// Drive `op` until it succeeds, fails non-retryably, or the attempt
    /// budget runs out. The backoff sleep races `shutdown`, so a cancelled
    /// scope wakes the caller immediately with [`JobError::Cancelled`].
    /// There is no sleep after the final attempt; budget exhaustion returns
    /// the last observed error annotated with the attempt count.
    pub async fn retry<T, F, Fut>(
        &self,
        shutdown: &CancellationToken,
        mut op: F,
    ) -> Result<T, JobError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, JobError>>,
    {
        let mut last = JobError::transient("no attempts were made");

        for attempt in 0..self.max_attempts {
            match op().await {
                Ok(value) => return Ok(value),
                Err(error) if !error.is_retryable() => return Err(error),
                Err(error) => last = error,
            }

            if attempt + 1 < self.max_attempts {
                tokio::select! {
                    _ = shutdown.cancelled() => return Err(JobError::Cancelled),
                    _ = tokio::time::sleep(self.backoff_interval(attempt)) => {}
                }
            }
        }

        Err(last.after_attempts(self.max_attempts))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base: Duration::from_secs(1),
        }
    }
}
