//! Submission-pacing math: how long the orchestrator's producer thread
//! should sleep before handing the next repository to the worker pool, and
//! how much workers should additionally pace their own platform API calls
//! once a target grows large.

use chrono::Utc;
use codecat_types::RateLimitStatus;

/// Compute the delay the producer thread should sleep before submitting the
/// next repository to the worker pool, given the most recent rate-limit
/// probe and an a-priori estimate of how many API calls the whole target
/// will need.
///
/// Mirrors the original tool's `delay_calculator`/rate-limit-handler math:
/// spread the estimated calls evenly across the time remaining until the
/// rate-limit window resets, accounting for `workers` issuing calls in
/// parallel, then clamp to `[min_delay, max_delay]`.
pub fn calculate_inter_submission_delay(
    status: Option<RateLimitStatus>,
    estimated_calls: i64,
    workers: u32,
    safety_factor: f64,
    min_delay: f64,
    max_delay: f64,
) -> f64 {
    let workers = workers.max(1) as f64;

    let Some(status) = status else {
        return max_delay;
    };
    if estimated_calls <= 0 {
        return max_delay;
    }

    let now = Utc::now();
    let seconds_to_reset = (status.reset_at - now).num_milliseconds() as f64 / 1000.0;
    let permissible = status.remaining as f64 * safety_factor;

    let raw = if permissible <= 0.0 && seconds_to_reset <= 0.0 {
        // Quota exhausted but the reset window has already elapsed — the
        // next probe should see a fresh quota, so there's nothing to wait
        // out beyond the floor delay.
        min_delay
    } else if permissible <= 0.0 {
        (seconds_to_reset / workers + min_delay).min(2.0 * max_delay)
    } else if (estimated_calls as f64) <= permissible {
        // Spread the estimated calls evenly over the window remaining,
        // divided by how many of those calls run concurrently.
        seconds_to_reset / (estimated_calls as f64 / workers).max(f64::MIN_POSITIVE)
    } else {
        let effective_rate = permissible / seconds_to_reset.max(f64::MIN_POSITIVE);
        let total_seconds_needed = estimated_calls as f64 / effective_rate.max(f64::MIN_POSITIVE);
        total_seconds_needed / (estimated_calls as f64 / workers).max(f64::MIN_POSITIVE)
    };

    raw.clamp(min_delay, max_delay)
}

/// Compute the additional per-call delay workers should apply once a
/// target's repository count exceeds `threshold`, scaling with both excess
/// size and worker count, capped at `max_delay * min(2, worker_factor)`.
pub fn calculate_dynamic_post_call_delay(
    base_delay: f64,
    num_items: Option<i64>,
    threshold: i64,
    scale_factor: f64,
    max_delay: f64,
    workers: u32,
) -> f64 {
    let Some(num_items) = num_items else {
        return base_delay;
    };
    if num_items <= 0 || threshold <= 0 {
        return base_delay;
    }

    let calculated = if num_items <= threshold {
        base_delay
    } else {
        let excess = (num_items - threshold) as f64;
        base_delay * (1.0 + (excess / threshold as f64) * scale_factor)
    };

    let worker_factor = 1.0 + 0.2 * (workers.max(1) as f64 - 1.0);
    let worker_adjusted = calculated * worker_factor;
    let max_with_workers = max_delay * worker_factor.min(2.0);
    worker_adjusted.min(max_with_workers)
}

/// Peek-ahead rule: when the planned inter-submission delay exceeds
/// `threshold` and the repository's current commit SHA matches the cached
/// SHA, the caller should replace the planned delay with `cache_hit_delay`
/// instead of sleeping the full planned duration.
pub fn should_use_cache_hit_delay(
    planned_delay: f64,
    threshold: f64,
    current_sha: Option<&str>,
    cached_sha: Option<&str>,
) -> bool {
    planned_delay > threshold && current_sha.is_some() && current_sha == cached_sha
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn no_status_yields_max_delay() {
        let d = calculate_inter_submission_delay(None, 100, 5, 0.8, 0.1, 30.0);
        assert_eq!(d, 30.0);
    }

    #[test]
    fn zero_estimated_calls_yields_max_delay() {
        let status = RateLimitStatus {
            remaining: 5000,
            limit: 5000,
            reset_at: Utc::now() + ChronoDuration::hours(1),
        };
        let d = calculate_inter_submission_delay(Some(status), 0, 5, 0.8, 0.1, 30.0);
        assert_eq!(d, 30.0);
    }

    #[test]
    fn zero_remaining_with_past_reset_sleeps_min_delay() {
        let status = RateLimitStatus {
            remaining: 0,
            limit: 5000,
            reset_at: Utc::now() - ChronoDuration::seconds(5),
        };
        let d = calculate_inter_submission_delay(Some(status), 100, 5, 0.8, 0.1, 30.0);
        assert_eq!(d, 0.1);
    }

    #[test]
    fn result_is_always_clamped() {
        let status = RateLimitStatus {
            remaining: 1,
            limit: 5000,
            reset_at: Utc::now() + ChronoDuration::seconds(1),
        };
        let d = calculate_inter_submission_delay(Some(status), 10_000, 5, 0.8, 0.1, 30.0);
        assert!((0.1..=30.0).contains(&d));
    }

    #[test]
    fn dynamic_delay_below_threshold_is_base() {
        let d = calculate_dynamic_post_call_delay(0.5, Some(50), 100, 1.5, 1.0, 1);
        assert_eq!(d, 0.5);
    }

    #[test]
    fn dynamic_delay_scales_past_threshold() {
        let d = calculate_dynamic_post_call_delay(0.5, Some(200), 100, 1.5, 10.0, 1);
        // excess=100, ratio=1.0 -> base*(1+1.5) = 1.25
        assert!((d - 1.25).abs() < 1e-9);
    }

    #[test]
    fn dynamic_delay_caps_at_worker_scaled_max() {
        let d = calculate_dynamic_post_call_delay(1.0, Some(10_000), 100, 1.5, 1.0, 10);
        // worker_factor = 1 + 0.2*9 = 2.8, capped by max_delay * min(2, 2.8) = 2.0
        assert!(d <= 2.0 + 1e-9);
    }

    #[test]
    fn peek_ahead_prefers_cache_hit_only_past_threshold_and_on_match() {
        assert!(should_use_cache_hit_delay(1.0, 0.5, Some("abc"), Some("abc")));
        assert!(!should_use_cache_hit_delay(0.2, 0.5, Some("abc"), Some("abc")));
        assert!(!should_use_cache_hit_delay(1.0, 0.5, Some("abc"), Some("def")));
        assert!(!should_use_cache_hit_delay(1.0, 0.5, None, Some("abc")));
    }
}
