//! Bounded retry with exponential backoff, independent of any transport.

use std::thread;
use std::time::Duration;

pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            thread::sleep(duration);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub backoff_factor: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(10),
            backoff_factor: 2,
        }
    }
}

impl RetryPolicy {
    /// Wait applied after the `failed_attempt`-th (1-based) retryable failure.
    pub fn delay_after(&self, failed_attempt: u32) -> Duration {
        let exponent = failed_attempt.saturating_sub(1);
        let multiplier = self.backoff_factor.max(1).saturating_pow(exponent);
        self.base_delay.saturating_mul(multiplier)
    }
}

#[derive(Debug)]
pub enum RetryOutcome<T, E> {
    Success { value: T, attempts: u32 },
    Exhausted { attempts: u32, last_error: E },
    Aborted { attempts: u32, error: E },
}

impl<T, E> RetryOutcome<T, E> {
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Success { attempts, .. }
            | Self::Exhausted { attempts, .. }
            | Self::Aborted { attempts, .. } => *attempts,
        }
    }
}

/// Runs `operation` (given the 1-based attempt number) until it succeeds,
/// fails with an error `is_retryable` rejects, or `policy.max_attempts` is
/// reached.
///
/// Every retryable failure is followed by its backoff wait, the last one
/// included; `on_retry` sees the error, the failed attempt number and the
/// wait before it is slept.
pub fn retry_with_backoff<T, E, Op, Check, Notify>(
    policy: &RetryPolicy,
    sleeper: &dyn Sleeper,
    is_retryable: Check,
    mut on_retry: Notify,
    mut operation: Op,
) -> RetryOutcome<T, E>
where
    Op: FnMut(u32) -> Result<T, E>,
    Check: Fn(&E) -> bool,
    Notify: FnMut(&E, u32, Duration),
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match operation(attempt) {
            Ok(value) => {
                return RetryOutcome::Success {
                    value,
                    attempts: attempt,
                }
            }
            Err(error) if !is_retryable(&error) => {
                return RetryOutcome::Aborted {
                    attempts: attempt,
                    error,
                }
            }
            Err(error) => {
                let wait = policy.delay_after(attempt);
                on_retry(&error, attempt, wait);
                sleeper.sleep(wait);
                if attempt >= max_attempts {
                    return RetryOutcome::Exhausted {
                        attempts: attempt,
                        last_error: error,
                    };
                }
                attempt += 1;
            }
        }
    }
}
