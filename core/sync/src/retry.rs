//! Backoff for remote calls that fail transiently.
//!
//! Only idempotent remote calls go through here: tree and blob reads, blob
//! and tree creation (both content-addressed) and the branch head lookup.
//! `create_commit` and `update_branch_head` are never retried, since a lost
//! response does not mean the mutation did not happen.

use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use gitvault_common::{Error, Result};

/// How often and how patiently to retry a remote call.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt. Zero disables retrying.
    pub max_retries: u32,
    /// Delay before the first retry; doubled for each one after.
    pub initial_delay: Duration,
    /// Ceiling for the doubled delay.
    pub max_delay: Duration,
    /// Fraction of the delay randomly added or removed, in `0.0..=1.0`.
    pub jitter: f64,
    /// Minimum wait after the remote reports a rate limit.
    pub rate_limit_delay: Duration,
}

impl RetryConfig {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: 0.25,
            rate_limit_delay: Duration::from_secs(60),
        }
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    pub fn with_rate_limit_delay(mut self, delay: Duration) -> Self {
        self.rate_limit_delay = delay;
        self
    }

    /// Wait before retry number `retry` (zero-based) after `err`.
    pub fn delay_after(&self, err: &Error, retry: u32) -> Duration {
        let doubled = self
            .initial_delay
            .saturating_mul(1u32 << retry.min(16))
            .min(self.max_delay);

        let delay = if self.jitter > 0.0 {
            let spread = 1.0 - self.jitter + rand::random::<f64>() * 2.0 * self.jitter;
            doubled.mul_f64(spread)
        } else {
            doubled
        };

        match err {
            Error::RateLimited(_) => delay.max(self.rate_limit_delay),
            _ => delay,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}

/// Runs remote calls, retrying transient failures with backoff.
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Run `call`, labelled `what` in logs.
    ///
    /// Errors that are not [`Error::is_transient`] return immediately. Once
    /// the retries are spent, the last error is returned.
    pub async fn execute<F, Fut, T>(&self, what: &str, call: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut retries = 0;
        loop {
            let err = match call().await {
                Ok(value) => {
                    if retries > 0 {
                        debug!("{} succeeded after {} retries", what, retries);
                    }
                    return Ok(value);
                }
                Err(err) if !err.is_transient() => return Err(err),
                Err(err) => err,
            };

            if retries >= self.config.max_retries {
                warn!("{} gave up after {} attempts: {}", what, retries + 1, err);
                return Err(err);
            }

            let delay = self.config.delay_after(&err, retries);
            warn!("{} failed ({}), retrying in {:?}", what, err, delay);
            tokio::time::sleep(delay).await;
            retries += 1;
        }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}
