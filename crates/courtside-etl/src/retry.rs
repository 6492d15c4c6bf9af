//! Bounded retry with exponential backoff for batch transactions

use crate::store::{StoreError, StoreErrorKind, StoreResult};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Default number of extra attempts after the first failure
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default base delay; attempt `n` waits `base * 2^n` plus jitter
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Transient,
    Fatal,
}

/// Contention and dropped connections are worth retrying; nothing else is.
pub fn classify(err: &StoreError) -> ErrorClass {
    match err.kind {
        StoreErrorKind::Deadlock
        | StoreErrorKind::LockTimeout
        | StoreErrorKind::SerializationFailure
        | StoreErrorKind::ConnectionLost => ErrorClass::Transient,
        StoreErrorKind::Other => ErrorClass::Fatal,
    }
}

/// Result of a retried operation plus how many retries it took
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: StoreResult<T>,
    pub retries: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// Delay before retry number `attempt` (0-based), including jitter in [0, 1) s
    pub fn backoff(&self, attempt: u32) -> Duration {
        let jitter = rand::thread_rng().gen_range(0.0..1.0);
        self.backoff_with_jitter(attempt, jitter)
    }

    fn backoff_with_jitter(&self, attempt: u32, jitter_secs: f64) -> Duration {
        // 2^32 seconds of base delay is already far past any sane schedule
        let factor = 2f64.powi(attempt.min(32) as i32);
        Duration::try_from_secs_f64(self.base_delay.as_secs_f64() * factor + jitter_secs)
            .unwrap_or(Duration::MAX)
    }

    /// Run `op` until it succeeds, fails fatally, or retries run out
    ///
    /// Fatal errors are returned immediately without using a retry. The last
    /// error is returned unchanged once `max_retries` retries have failed.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> RetryOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StoreResult<T>>,
    {
        let mut attempt = 0u32;
        loop {
            match op().await {
                Ok(value) => {
                    return RetryOutcome {
                        result: Ok(value),
                        retries: attempt,
                    }
                },
                Err(err) if attempt < self.max_retries && classify(&err) == ErrorClass::Transient => {
                    let delay = self.backoff(attempt);
                    warn!(
                        attempt = attempt + 1,
                        max_attempts = self.max_retries + 1,
                        delay_secs = format_args!("{:.2}", delay.as_secs_f64()),
                        error = %err,
                        "Retryable error, retrying batch"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                },
                Err(err) => {
                    debug!(attempt, error = %err, "Giving up on operation");
                    return RetryOutcome {
                        result: Err(err),
                        retries: attempt,
                    };
                },
            }
        }
    }
}
