use std::future::Future;
use std::time::Duration;

use crate::config::RetryPolicyConfig;
use crate::error::{Error, Result};
use crate::runtime::ShutdownToken;

/// How a retried action ended, cancellation aside.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RetryOutcome {
    /// The action succeeded on attempt `attempts`.
    Succeeded { attempts: u32 },
    /// Every attempt failed; the last error was passed to `on_error`.
    Exhausted { attempts: u32 },
}

/// Bounded retry with a fixed, cancellable backoff.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RetryPolicy {
    max_retry_count: u32,
    backoff_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryPolicyConfig::default())
    }
}

impl From<&RetryPolicyConfig> for RetryPolicy {
    fn from(config: &RetryPolicyConfig) -> Self {
        Self::new(config.max_retry_count, config.backoff_interval)
    }
}

impl RetryPolicy {
    pub fn new(max_retry_count: u32, backoff_interval: Duration) -> Self {
        Self {
            max_retry_count,
            backoff_interval,
        }
    }

    pub fn max_retry_count(&self) -> u32 {
        self.max_retry_count
    }

    pub fn backoff_interval(&self) -> Duration {
        self.backoff_interval
    }

    /// Run `action` until it succeeds or `max_retry_count` attempts fail.
    ///
    /// `on_error` sees every non-cancellation failure together with its
    /// 1-based attempt number. Cancellation, whether returned by the action
    /// or observed on `shutdown` during an attempt or a backoff, aborts with
    /// [`Error::Cancelled`] without calling `on_error`. Exhausting the
    /// attempts is not an error.
    pub async fn execute<F, Fut, E>(
        &self,
        shutdown: &ShutdownToken,
        mut action: F,
        mut on_error: E,
    ) -> Result<RetryOutcome>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = anyhow::Result<()>>,
        E: FnMut(u32, &anyhow::Error),
    {
        let mut attempt = 0;
        while attempt < self.max_retry_count {
            attempt += 1;
            if shutdown.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let result = tokio::select! {
                _ = shutdown.cancelled() => return Err(Error::Cancelled),
                result = action(attempt) => result,
            };

            match result {
                Ok(()) => return Ok(RetryOutcome::Succeeded { attempts: attempt }),
                Err(err) if Error::is_cancellation(&err) || shutdown.is_cancelled() => {
                    return Err(Error::Cancelled);
                }
                Err(err) => {
                    on_error(attempt, &err);
                    if attempt < self.max_retry_count {
                        shutdown.sleep(self.backoff_interval).await?;
                    }
                }
            }
        }

        Ok(RetryOutcome::Exhausted { attempts: attempt })
    }
}
