//! Bounded exponential-backoff retry driver.
//!
//! A [`RetryOperation`] re-invokes an async operation until a caller supplied
//! check passes or the retry budget runs out. The check is evaluated after
//! every attempt whether the attempt failed or not, because the operation's
//! own result says nothing about whether the caller's goal was reached (a
//! fetch can succeed and still return a stale version).
//!
//! The first attempt runs immediately; attempt `n` (zero based) is followed by
//! a wait of `min_timeout * factor^n`. At most `1 + retries` attempts run.
use std::{future::Future, time::Duration};

use eyre::Result;
use tokio_util::sync::CancellationToken;

/// Upper bound on a single backoff wait.
const MAX_DELAY: Duration = Duration::from_secs(60 * 60);

/// Backoff parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub factor: f64,
    pub min_timeout: Duration,
    pub retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            factor: 2.0,
            min_timeout: Duration::from_secs(1),
            retries: 5,
        }
    }
}

impl RetryPolicy {
    pub fn new(factor: f64, min_timeout: Duration, retries: u32) -> Self {
        Self {
            factor,
            min_timeout,
            retries,
        }
    }

    /// Wait that follows the zero based attempt `attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.min_timeout.as_secs_f64() * self.factor.powi(exponent);
        if !secs.is_finite() || secs < 0.0 {
            return MAX_DELAY;
        }
        Duration::try_from_secs_f64(secs)
            .map(|d| d.min(MAX_DELAY))
            .unwrap_or(MAX_DELAY)
    }

    /// Largest number of attempts a single operation may run.
    pub fn max_attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }
}

/// How a retry operation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOutcome {
    /// The check passed after `attempts` attempts.
    Succeeded { attempts: u32 },
    /// The budget ran out without the check passing.
    Exhausted { attempts: u32 },
    /// [`RetryOperation::stop`] was called before the check passed.
    Cancelled { attempts: u32 },
}

impl RetryOutcome {
    /// Mirrors the stop notification flag: true only when the budget ran out.
    pub fn retries_exceeded(&self) -> bool {
        matches!(self, RetryOutcome::Exhausted { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            RetryOutcome::Succeeded { attempts }
            | RetryOutcome::Exhausted { attempts }
            | RetryOutcome::Cancelled { attempts } => *attempts,
        }
    }
}

/// A single retry loop. The engine does not deduplicate; callers keep at most
/// one live operation per key.
#[derive(Debug, Clone)]
pub struct RetryOperation {
    tag: String,
    policy: RetryPolicy,
    cancel: CancellationToken,
}

impl RetryOperation {
    pub fn new(tag: impl Into<String>, policy: RetryPolicy) -> Self {
        Self {
            tag: tag.into(),
            policy,
            cancel: CancellationToken::new(),
        }
    }

    /// Cancel any scheduled attempt. An attempt already in flight runs to
    /// completion but its result is discarded. Idempotent.
    pub fn stop(&self) {
        if !self.cancel.is_cancelled() {
            tracing::debug!(tag = %self.tag, "Stopping retry operation");
        }
        self.cancel.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Drive the loop to completion.
    ///
    /// `operation` receives the zero based attempt index. `check` runs after
    /// every attempt.
    pub async fn run<Op, Fut, Check>(&self, mut operation: Op, mut check: Check) -> RetryOutcome
    where
        Op: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<()>>,
        Check: FnMut() -> bool,
    {
        let mut attempts = 0;
        loop {
            if self.cancel.is_cancelled() {
                return RetryOutcome::Cancelled { attempts };
            }

            let result = operation(attempts).await;
            attempts += 1;
            if self.cancel.is_cancelled() {
                return RetryOutcome::Cancelled { attempts };
            }
            if let Err(e) = result {
                tracing::warn!(tag = %self.tag, attempt = attempts, "Retry attempt failed: {e:?}");
            }

            if check() {
                tracing::info!(tag = %self.tag, attempts, "Retry operation succeeded");
                return RetryOutcome::Succeeded { attempts };
            }

            if attempts > self.policy.retries {
                tracing::warn!(tag = %self.tag, attempts, "Retry budget exhausted");
                return RetryOutcome::Exhausted { attempts };
            }

            let delay = self.policy.delay_for(attempts - 1);
            tracing::debug!(tag = %self.tag, attempt = attempts, ?delay, "Scheduling next attempt");
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    return RetryOutcome::Cancelled { attempts };
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
