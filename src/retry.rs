//! Retry policy: backoff computation, error classification, and the global
//! retry budget.
//!
//! The budget is the key invariant: `is_budget_exhausted` accounts for the
//! next backoff delay *before* it is slept, so no attempt ever starts past
//! the per-assignment deadline.

use crate::core::{ErrorCode, StepRequest};
use crate::flags;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Base delay for exponential backoff.
    pub base_delay_ms: i64,
    /// Maximum delay between retries.
    pub max_delay_ms: i64,
    /// Wall-clock ceiling across all attempts, including backoff sleeps.
    pub total_timeout_ms: i64,
    /// Maximum attempts excluding the first.
    pub max_retries: i32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 100,
            max_delay_ms: 5_000,
            total_timeout_ms: 30_000,
            max_retries: 3,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Policy for one assignment: the request's total deadline becomes the
    /// retry budget and its retry count the attempt cap.
    pub fn for_request(req: &StepRequest) -> Self {
        Self::new(RetryConfig {
            total_timeout_ms: req.timeout_ms,
            max_retries: req.retry_count,
            ..RetryConfig::default()
        })
    }

    pub fn max_retries(&self) -> i32 {
        self.config.max_retries
    }

    pub fn total_timeout_ms(&self) -> i64 {
        self.config.total_timeout_ms
    }

    /// Delay before the retry following `attempt` (0-based).
    ///
    /// Baseline behavior is linear `100 * (attempt + 1)`. With the
    /// advanced-retry flag on, strict exponential `base * 2^attempt` capped
    /// at `max_delay_ms`.
    pub fn backoff_delay_ms(&self, attempt: i32) -> i64 {
        if !flags::advanced_retry_enabled() {
            return 100 * (i64::from(attempt) + 1);
        }

        if attempt >= 62 {
            return self.config.max_delay_ms;
        }
        let delay = self
            .config
            .base_delay_ms
            .saturating_mul(1i64 << attempt.max(0));
        delay.min(self.config.max_delay_ms)
    }

    /// Classify an error as retryable.
    ///
    /// Baseline behavior retries everything. With the advanced-retry flag
    /// on: HTTP 4xx is terminal and 5xx retryable; validation errors,
    /// permission denials and cancellations are terminal; network, system
    /// and generic execution failures are retryable; unknown codes fail
    /// open as retryable.
    pub fn is_retryable(&self, error_code: ErrorCode, http_status_code: u16) -> bool {
        if !flags::advanced_retry_enabled() {
            return true;
        }

        if (400..500).contains(&http_status_code) {
            return false;
        }
        if http_status_code >= 500 {
            return true;
        }

        match error_code {
            ErrorCode::NetworkError | ErrorCode::ConnectionTimeout => true,
            ErrorCode::InvalidInput | ErrorCode::MissingRequiredField | ErrorCode::InvalidFormat => {
                false
            }
            ErrorCode::PermissionDenied => false,
            ErrorCode::ExecutionFailed | ErrorCode::ResourceUnavailable => true,
            ErrorCode::InternalError | ErrorCode::SystemOverload => true,
            ErrorCode::CancelledByUser | ErrorCode::CancelledByTimeout => false,
            _ => true,
        }
    }

    /// True when the budget is spent, or when the next backoff sleep alone
    /// would cross the deadline.
    pub fn is_budget_exhausted(&self, total_elapsed_ms: i64, attempt: i32) -> bool {
        if !flags::advanced_retry_enabled() {
            return false;
        }

        if total_elapsed_ms >= self.config.total_timeout_ms {
            return true;
        }
        total_elapsed_ms + self.backoff_delay_ms(attempt) >= self.config.total_timeout_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::ADVANCED_RETRY_ENV;
    use serial_test::serial;

    fn policy(total_timeout_ms: i64, max_retries: i32) -> RetryPolicy {
        RetryPolicy::new(RetryConfig {
            total_timeout_ms,
            max_retries,
            ..RetryConfig::default()
        })
    }

    #[test]
    #[serial]
    fn baseline_backoff_is_linear() {
        std::env::remove_var(ADVANCED_RETRY_ENV);
        let p = policy(30_000, 3);
        assert_eq!(p.backoff_delay_ms(0), 100);
        assert_eq!(p.backoff_delay_ms(1), 200);
        assert_eq!(p.backoff_delay_ms(4), 500);
    }

    #[test]
    #[serial]
    fn baseline_retries_everything_without_budget() {
        std::env::remove_var(ADVANCED_RETRY_ENV);
        let p = policy(100, 3);
        assert!(p.is_retryable(ErrorCode::PermissionDenied, 404));
        assert!(!p.is_budget_exhausted(1_000_000, 0));
    }

    #[test]
    #[serial]
    fn advanced_backoff_is_exponential_and_capped() {
        std::env::set_var(ADVANCED_RETRY_ENV, "true");
        let p = policy(30_000, 10);
        assert_eq!(p.backoff_delay_ms(0), 100);
        assert_eq!(p.backoff_delay_ms(1), 200);
        assert_eq!(p.backoff_delay_ms(2), 400);
        assert_eq!(p.backoff_delay_ms(5), 3_200);
        assert_eq!(p.backoff_delay_ms(6), 5_000);
        assert_eq!(p.backoff_delay_ms(100), 5_000);
        std::env::remove_var(ADVANCED_RETRY_ENV);
    }

    #[test]
    #[serial]
    fn advanced_backoff_is_monotonic_and_bounded() {
        std::env::set_var(ADVANCED_RETRY_ENV, "true");
        let p = policy(30_000, 10);
        let mut previous = 0;
        for attempt in 0..80 {
            let delay = p.backoff_delay_ms(attempt);
            assert!(delay >= previous, "backoff must be non-decreasing");
            assert!(delay <= 5_000, "backoff must respect the cap");
            previous = delay;
        }
        std::env::remove_var(ADVANCED_RETRY_ENV);
    }

    #[test]
    #[serial]
    fn advanced_classification_follows_http_status() {
        std::env::set_var(ADVANCED_RETRY_ENV, "true");
        let p = policy(30_000, 3);
        assert!(!p.is_retryable(ErrorCode::HttpError, 404));
        assert!(!p.is_retryable(ErrorCode::HttpError, 422));
        assert!(p.is_retryable(ErrorCode::HttpError, 500));
        assert!(p.is_retryable(ErrorCode::HttpError, 503));
        std::env::remove_var(ADVANCED_RETRY_ENV);
    }

    #[test]
    #[serial]
    fn advanced_classification_follows_error_code() {
        std::env::set_var(ADVANCED_RETRY_ENV, "true");
        let p = policy(30_000, 3);
        assert!(p.is_retryable(ErrorCode::NetworkError, 0));
        assert!(p.is_retryable(ErrorCode::ConnectionTimeout, 0));
        assert!(p.is_retryable(ErrorCode::ExecutionFailed, 0));
        assert!(p.is_retryable(ErrorCode::ResourceUnavailable, 0));
        assert!(p.is_retryable(ErrorCode::InternalError, 0));
        assert!(p.is_retryable(ErrorCode::SystemOverload, 0));
        assert!(p.is_retryable(ErrorCode::QuotaExceeded, 0));
        assert!(!p.is_retryable(ErrorCode::InvalidInput, 0));
        assert!(!p.is_retryable(ErrorCode::MissingRequiredField, 0));
        assert!(!p.is_retryable(ErrorCode::InvalidFormat, 0));
        assert!(!p.is_retryable(ErrorCode::PermissionDenied, 0));
        assert!(!p.is_retryable(ErrorCode::CancelledByUser, 0));
        assert!(!p.is_retryable(ErrorCode::CancelledByTimeout, 0));
        std::env::remove_var(ADVANCED_RETRY_ENV);
    }

    #[test]
    #[serial]
    fn budget_accounts_for_next_backoff_before_sleeping() {
        std::env::set_var(ADVANCED_RETRY_ENV, "true");
        let p = policy(300, 10);
        // 100ms elapsed + 200ms backoff for attempt 1 hits the 300ms budget.
        assert!(!p.is_budget_exhausted(100, 0));
        assert!(p.is_budget_exhausted(100, 1));
        assert!(p.is_budget_exhausted(300, 0));
        assert!(p.is_budget_exhausted(301, 0));
        std::env::remove_var(ADVANCED_RETRY_ENV);
    }

    #[test]
    #[serial]
    fn budget_exhaustion_is_monotonic_in_elapsed_time() {
        std::env::set_var(ADVANCED_RETRY_ENV, "true");
        let p = policy(1_000, 10);
        for attempt in 0..5 {
            let mut exhausted_at = None;
            for elapsed in 0..1_200 {
                if p.is_budget_exhausted(elapsed, attempt) {
                    exhausted_at = Some(elapsed);
                    break;
                }
            }
            let first = exhausted_at.expect("budget must eventually exhaust");
            for elapsed in first..1_200 {
                assert!(p.is_budget_exhausted(elapsed, attempt));
            }
        }
        std::env::remove_var(ADVANCED_RETRY_ENV);
    }

    #[test]
    fn for_request_adopts_request_limits() {
        let req = StepRequest {
            timeout_ms: 777,
            retry_count: 9,
            ..Default::default()
        };
        let p = RetryPolicy::for_request(&req);
        assert_eq!(p.total_timeout_ms(), 777);
        assert_eq!(p.max_retries(), 9);
    }
}
