//! Automatic error recovery strategies.
//!
//! Implements the retry/backoff policy referenced throughout §4 and §7: a
//! failed SPI transaction is retried a bounded number of times with a fixed
//! backoff before being escalated to a `DeviceError` and surfaced to the
//! supervisor.

use crate::error::DropError;
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::sleep;

/// Defines a policy for retrying an operation.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    /// The maximum number of retry attempts.
    pub max_attempts: u32,
    /// The delay between retry attempts.
    pub backoff_delay: Duration,
}

impl Default for RetryPolicy {
    /// 3 attempts with 20 ms backoff, matching the transport retry budget in §7.
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_delay: Duration::from_millis(20),
        }
    }
}

/// An asynchronous operation that can be retried.
#[async_trait]
pub trait Recoverable<E> {
    async fn recover(&mut self) -> Result<(), E>;
}

/// Retries `recoverable` up to `policy.max_attempts` times, sleeping
/// `policy.backoff_delay` between attempts. Returns the last error once the
/// budget is exhausted.
pub async fn handle_recoverable_error<T: Recoverable<DropError>>(
    recoverable: &mut T,
    policy: &RetryPolicy,
) -> Result<(), DropError> {
    let mut last_err = None;
    for attempt in 0..policy.max_attempts {
        match recoverable.recover().await {
            Ok(()) => return Ok(()),
            Err(err) => {
                last_err = Some(err);
                if attempt + 1 < policy.max_attempts {
                    sleep(policy.backoff_delay).await;
                }
            }
        }
    }
    Err(last_err.unwrap_or(DropError::Bus("retry budget exhausted".into())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    struct MockRecoverable {
        attempts: RefCell<u32>,
        succeed_on_attempt: u32,
    }

    #[async_trait]
    impl Recoverable<DropError> for MockRecoverable {
        async fn recover(&mut self) -> Result<(), DropError> {
            let mut attempts = self.attempts.borrow_mut();
            *attempts += 1;
            if *attempts >= self.succeed_on_attempt {
                Ok(())
            } else {
                Err(DropError::Bus("not yet".to_string()))
            }
        }
    }

    #[tokio::test]
    async fn test_retry_logic_succeeds() {
        let mut recoverable = MockRecoverable {
            attempts: RefCell::new(0),
            succeed_on_attempt: 2,
        };
        let policy = RetryPolicy {
            max_attempts: 3,
            backoff_delay: Duration::from_millis(1),
        };
        let result = handle_recoverable_error(&mut recoverable, &policy).await;
        assert!(result.is_ok());
        assert_eq!(*recoverable.attempts.borrow(), 2);
    }

    #[tokio::test]
    async fn test_retry_logic_fails_after_budget() {
        let mut recoverable = MockRecoverable {
            attempts: RefCell::new(0),
            succeed_on_attempt: 10,
        };
        let policy = RetryPolicy {
            max_attempts: 3,
            backoff_delay: Duration::from_millis(1),
        };
        let result = handle_recoverable_error(&mut recoverable, &policy).await;
        assert!(result.is_err());
        assert_eq!(*recoverable.attempts.borrow(), 3);
    }
}
