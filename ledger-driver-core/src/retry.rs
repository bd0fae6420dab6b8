use rand::thread_rng;
use rand::Rng;
use std::{cmp::min, time::Duration};

use crate::error::ServiceError;

pub fn default_retry_policy() -> impl TransactionRetryPolicy {
    ExponentialBackoffJitterTransactionRetryPolicy::default()
}

pub fn never() -> impl TransactionRetryPolicy {
    NeverRetryPolicy {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryInstructions {
    pub should_retry: bool,
    pub delay: Option<Duration>,
}

impl RetryInstructions {
    pub fn dont() -> RetryInstructions {
        RetryInstructions {
            should_retry: false,
            delay: None,
        }
    }

    pub fn after(delay: Duration) -> RetryInstructions {
        RetryInstructions {
            should_retry: true,
            delay: Some(delay),
        }
    }
}

/// Whether `error` is worth retrying at all. Conflicts, broken sessions,
/// throttling and communication failures are transient; a retried attempt
/// starts from scratch on a (possibly new) session. Rejected requests and
/// malformed responses would fail the same way again.
pub fn is_retriable(error: &ServiceError) -> bool {
    match error {
        ServiceError::TransactionConflict(_) => true,
        ServiceError::InvalidSession(_) => true,
        ServiceError::Throttled(_) => true,
        // We retry transport failures even though the request *may* have
        // been received. The commit digest protects against a statement
        // being applied twice.
        ServiceError::Transport { .. } => true,
        ServiceError::BadRequest(_) => false,
        ServiceError::MalformedResponse(_) => false,
    }
}

/// A retry policy receives an `error` and the `attempt_number` (starting at 1
/// for the attempt that just failed) and decides whether the driver should
/// run the transaction again, and after how long.
///
/// Policies are shared by every clone of a driver, so a policy can base its
/// decision on all transactions in flight (e.g. a circuit breaker).
pub trait TransactionRetryPolicy {
    fn on_err(&self, error: &ServiceError, attempt_number: u32) -> RetryInstructions;
}

/// Don't try this at home.
pub struct NeverRetryPolicy {}

impl TransactionRetryPolicy for NeverRetryPolicy {
    fn on_err(&self, _error: &ServiceError, _attempt_number: u32) -> RetryInstructions {
        RetryInstructions::dont()
    }
}

/// https://aws.amazon.com/blogs/architecture/exponential-backoff-and-jitter/
///
/// Sleeps a random duration in `[0, min(cap, base * 2^attempt))`
/// milliseconds, and gives up after `max_retries` retries (so at most
/// `max_retries + 1` attempts are made).
pub struct ExponentialBackoffJitterTransactionRetryPolicy {
    base: u32,
    cap: u32,
    max_retries: u32,
}

impl ExponentialBackoffJitterTransactionRetryPolicy {
    pub fn new(
        base: u32,
        cap: u32,
        max_retries: u32,
    ) -> ExponentialBackoffJitterTransactionRetryPolicy {
        ExponentialBackoffJitterTransactionRetryPolicy {
            base,
            cap,
            max_retries,
        }
    }
}

impl Default for ExponentialBackoffJitterTransactionRetryPolicy {
    fn default() -> ExponentialBackoffJitterTransactionRetryPolicy {
        ExponentialBackoffJitterTransactionRetryPolicy::new(10, 5000, 4)
    }
}

impl TransactionRetryPolicy for ExponentialBackoffJitterTransactionRetryPolicy {
    fn on_err(&self, error: &ServiceError, attempt_number: u32) -> RetryInstructions {
        if !is_retriable(error) || attempt_number > self.max_retries {
            RetryInstructions::dont()
        } else {
            let delay = exponential_backoff_with_jitter(self.base, self.cap, attempt_number);
            RetryInstructions::after(Duration::from_millis(delay as u64))
        }
    }
}

fn exponential_backoff_with_jitter(base: u32, cap: u32, attempt_number: u32) -> u32 {
    let exponential = base.saturating_mul(2u32.saturating_pow(attempt_number));
    let max = min(cap, exponential);
    if max == 0 {
        return 0;
    }
    thread_rng().gen_range(0..max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_backoff_with_jitter_seq() {
        let ExponentialBackoffJitterTransactionRetryPolicy {
            base,
            cap,
            max_retries,
        } = ExponentialBackoffJitterTransactionRetryPolicy::default();

        let mut seq = vec![0..20, 0..40, 0..80, 0..160]; // not super tight
        seq.reverse();

        for attempt_number in 1..=max_retries {
            let sleep = exponential_backoff_with_jitter(base, cap, attempt_number);
            let expected = seq.pop().unwrap();
            assert!(
                expected.contains(&sleep),
                "on attempt {} we should be sleeping in the range {:?} but we calculated {}",
                attempt_number,
                expected,
                sleep
            );
        }

        assert!(seq.is_empty());
    }

    #[test]
    fn backoff_is_capped() {
        for _ in 0..100 {
            assert!(exponential_backoff_with_jitter(10, 5000, 30) < 5000);
        }
        assert_eq!(0, exponential_backoff_with_jitter(0, 5000, 3));
    }

    #[test]
    fn gives_up_after_max_retries() {
        let policy = ExponentialBackoffJitterTransactionRetryPolicy::new(1, 10, 2);
        let conflict = ServiceError::TransactionConflict("occ".into());

        assert!(policy.on_err(&conflict, 1).should_retry);
        assert!(policy.on_err(&conflict, 2).should_retry);
        assert_eq!(RetryInstructions::dont(), policy.on_err(&conflict, 3));
    }

    #[test]
    fn bad_requests_are_not_retried() {
        let policy = ExponentialBackoffJitterTransactionRetryPolicy::default();
        let bad = ServiceError::BadRequest("no such table".into());
        assert!(!policy.on_err(&bad, 1).should_retry);
        assert!(!is_retriable(&ServiceError::MalformedResponse("?".into())));
        assert!(is_retriable(&ServiceError::InvalidSession("gone".into())));
        assert!(is_retriable(&ServiceError::Throttled("slow down".into())));
    }

    #[test]
    fn transport_failures_are_retried() {
        let policy = ExponentialBackoffJitterTransactionRetryPolicy::default();
        let reset = crate::error::transport_err(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "connection reset",
        ));
        assert!(is_retriable(&reset));
        assert!(policy.on_err(&reset, 1).should_retry);
        assert!(!policy.on_err(&reset, 5).should_retry);
    }

    #[test]
    fn policies_are_send_and_sync() {
        fn is_send_and_sync<T: Send + Sync>() {}

        is_send_and_sync::<NeverRetryPolicy>();
        is_send_and_sync::<ExponentialBackoffJitterTransactionRetryPolicy>();
    }
}
