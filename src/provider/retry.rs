use log::warn;
use std::{thread, time::Duration};

use super::Result;

pub const DEFAULT_MAX_ATTEMPTS: usize = 3;
pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_millis(200);
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(5);

/// Bounded retry budget with exponential backoff, applied to
/// retryable provider errors only.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
        }
    }
}

impl RetryPolicy {
    /// Computes the delay following the given failed attempt,
    /// starting at 1.
    pub fn backoff(&self, attempt: usize) -> Duration {
        let exp = attempt.saturating_sub(1).min(16) as u32;
        self.initial_backoff
            .saturating_mul(2u32.pow(exp))
            .min(self.max_backoff)
    }

    pub fn run<T, F>(&self, what: &str, mut f: F) -> Result<T>
    where
        F: FnMut() -> Result<T>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match f() {
                Err(err) if err.is_retryable() && attempt < max_attempts => {
                    let backoff = self.backoff(attempt);
                    warn!(
                        "{} failed (attempt {}/{}), retrying in {:?}: {}",
                        what, attempt, max_attempts, backoff, err
                    );
                    thread::sleep(backoff);
                    attempt += 1;
                }
                res => return res,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use crate::provider::Error;

    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            initial_backoff: Duration::from_millis(1),
            ..RetryPolicy::default()
        }
    }

    #[test]
    fn backoff_is_exponential_and_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_millis(200));
        assert_eq!(policy.backoff(2), Duration::from_millis(400));
        assert_eq!(policy.backoff(3), Duration::from_millis(800));
        assert_eq!(policy.backoff(10), Duration::from_secs(5));
    }

    #[test]
    fn transient_errors_are_retried() {
        let calls = Cell::new(0);
        let res = policy().run("listing", || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(Error::TransientError("503".into()))
            } else {
                Ok(42)
            }
        });

        assert_eq!(res, Ok(42));
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn budget_is_bounded() {
        let calls = Cell::new(0);
        let res: Result<()> = policy().run("listing", || {
            calls.set(calls.get() + 1);
            Err(Error::TimeoutError("slow".into()))
        });

        assert_eq!(res, Err(Error::TimeoutError("slow".into())));
        assert_eq!(calls.get(), DEFAULT_MAX_ATTEMPTS);
    }

    #[test]
    fn other_errors_are_not_retried() {
        let calls = Cell::new(0);
        let res: Result<()> = policy().run("listing", || {
            calls.set(calls.get() + 1);
            Err(Error::RateLimitedError(None))
        });

        assert!(res.unwrap_err().is_rate_limited());
        assert_eq!(calls.get(), 1);
    }
}
