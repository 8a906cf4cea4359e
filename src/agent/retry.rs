//! Bounded retries with an explicit outcome.
//!
//! [`retry`] never swallows a failure: callers get either the value or a
//! [`RetryFailure`] saying why no value was produced.

use crate::db::executor::CancellationToken;
use crate::error::{AppError, AppResult};
use std::future::Future;
use tracing::{debug, warn};

/// Default attempts for every model-backed stage.
pub const DEFAULT_RETRIES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Also retry transient hard errors (timeouts, 429, 5xx). Soft failures
    /// are always retried; other errors abort at once.
    pub retry_hard_errors: bool,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            retry_hard_errors: false,
        }
    }

    pub fn retry_hard_errors(mut self, retry: bool) -> Self {
        self.retry_hard_errors = retry;
        self
    }

    fn should_retry(&self, error: &AppError) -> bool {
        error.is_soft() || (self.retry_hard_errors && error.is_retryable())
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_RETRIES)
    }
}

/// Why [`retry`] produced no value.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryFailure {
    /// Every attempt failed with a retryable error; holds the last one.
    Exhausted { attempts: u32, last: AppError },
    /// An attempt failed with an error that is not retried.
    Aborted(AppError),
    /// Cancellation was observed before an attempt.
    Cancelled,
}

impl RetryFailure {
    /// True when every attempt came back without a usable answer.
    pub fn is_soft_exhaustion(&self) -> bool {
        matches!(self, Self::Exhausted { last, .. } if last.is_soft())
    }

    pub fn into_error(self, stage: &str) -> AppError {
        match self {
            Self::Exhausted { attempts, last } if last.is_soft() => AppError::pipeline(
                stage,
                format!("no usable model answer after {} attempts", attempts),
            ),
            Self::Exhausted { last, .. } => last,
            Self::Aborted(e) => e,
            Self::Cancelled => AppError::cancelled(stage),
        }
    }
}

/// Run `attempt` up to `policy.max_attempts` times, checking `cancel` first
/// each time. The attempt number (from 1) is passed in.
pub async fn retry<T, F, Fut>(
    stage: &str,
    policy: RetryPolicy,
    cancel: &CancellationToken,
    mut attempt: F,
) -> Result<T, RetryFailure>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = AppResult<T>>,
{
    let mut last = None;
    for n in 1..=policy.max_attempts {
        if cancel.is_cancelled() {
            debug!(stage = %stage, attempt = n, "Cancelled before attempt");
            return Err(RetryFailure::Cancelled);
        }
        match attempt(n).await {
            Ok(value) => return Ok(value),
            Err(e) if policy.should_retry(&e) => {
                warn!(
                    stage = %stage,
                    attempt = n,
                    max_attempts = policy.max_attempts,
                    error = %e,
                    "Attempt failed, retrying"
                );
                last = Some(e);
            }
            Err(e) => return Err(RetryFailure::Aborted(e)),
        }
    }
    Err(RetryFailure::Exhausted {
        attempts: policy.max_attempts,
        last: last.unwrap_or_else(|| AppError::empty_response(stage)),
    })
}
