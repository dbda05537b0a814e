//! Capped exponential backoff with jitter, honoring `Retry-After` when the
//! underlying error carries one.

use std::thread;
use std::time::Duration;

use rand::Rng;

/// Tuning knobs for [`execute`]. Defaults mirror the original tool's
/// tuning for platform API calls.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub init_delay: Duration,
    pub backoff: f64,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            init_delay: Duration::from_secs(10),
            backoff: 2.0,
            max_delay: Duration::from_secs(900),
        }
    }
}

/// Run `call`, retrying with backoff while `is_rate_limited` classifies the
/// error as transient-and-retryable. `retry_after_of` lets the caller honor
/// a platform-supplied `Retry-After`/`RateLimit-Reset` hint in preference to
/// the computed exponential delay. Non-rate-limited errors propagate on the
/// first attempt; retries are exhausted after `max_retries` attempts, at
/// which point the last error is returned.
pub fn execute<T, E>(
    mut call: impl FnMut(u32) -> Result<T, E>,
    is_rate_limited: impl Fn(&E) -> bool,
    retry_after_of: impl Fn(&E) -> Option<Duration>,
    cfg: RetryConfig,
) -> Result<T, E> {
    let mut attempt = 0;
    loop {
        match call(attempt) {
            Ok(v) => return Ok(v),
            Err(e) => {
                if !is_rate_limited(&e) || attempt >= cfg.max_retries {
                    return Err(e);
                }
                let base = retry_after_of(&e).unwrap_or_else(|| {
                    let exp = cfg.init_delay.as_secs_f64() * cfg.backoff.powi(attempt as i32);
                    Duration::from_secs_f64(exp)
                });
                let capped = base.min(cfg.max_delay);
                let sleep_for = jittered(capped);
                tracing::warn!(
                    attempt,
                    sleep_secs = sleep_for.as_secs_f64(),
                    "rate limited, backing off"
                );
                thread::sleep(sleep_for);
                attempt += 1;
            }
        }
    }
}

/// Apply ±10% jitter to a computed delay.
fn jittered(d: Duration) -> Duration {
    let factor = rand::rng().random_range(0.9..=1.1);
    Duration::from_secs_f64((d.as_secs_f64() * factor).max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[derive(Debug)]
    struct RateLimited;
    #[derive(Debug)]
    struct Fatal;

    #[test]
    fn succeeds_without_retry() {
        let result: Result<u32, RateLimited> = execute(
            |_attempt| Ok(42),
            |_e| true,
            |_e| None,
            RetryConfig::default(),
        );
        assert_eq!(result.unwrap(), 42);
    }

    #[test]
    fn non_rate_limited_error_propagates_immediately() {
        let calls = Cell::new(0);
        let result: Result<u32, Fatal> = execute(
            |_attempt| {
                calls.set(calls.get() + 1);
                Err(Fatal)
            },
            |_e| false,
            |_e| None,
            RetryConfig::default(),
        );
        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn retries_until_max_then_propagates() {
        let calls = Cell::new(0);
        let cfg = RetryConfig {
            max_retries: 2,
            init_delay: Duration::from_millis(1),
            backoff: 1.0,
            max_delay: Duration::from_millis(5),
        };
        let result: Result<u32, RateLimited> = execute(
            |_attempt| {
                calls.set(calls.get() + 1);
                Err(RateLimited)
            },
            |_e| true,
            |_e| Some(Duration::from_millis(1)),
            cfg,
        );
        assert!(result.is_err());
        // Initial attempt + 2 retries = 3 calls.
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn retry_after_hint_is_honored_over_backoff() {
        let attempts = Cell::new(0);
        let cfg = RetryConfig {
            max_retries: 1,
            init_delay: Duration::from_secs(900),
            backoff: 2.0,
            max_delay: Duration::from_secs(900),
        };
        let result: Result<u32, RateLimited> = execute(
            |attempt| {
                attempts.set(attempts.get() + 1);
                if attempt == 0 { Err(RateLimited) } else { Ok(1) }
            },
            |_e| true,
            |_e| Some(Duration::from_millis(1)),
            cfg,
        );
        assert_eq!(result.unwrap(), 1);
    }
}
