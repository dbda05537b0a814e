//! Per-platform rate-limit probe (§4.2): normalizes each platform's
//! remaining/limit/reset-at into a common [`RateLimitStatus`].

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::blocking::Response;

use codecat_types::RateLimitStatus;

/// GitHub REST: read `X-RateLimit-Remaining`/`X-RateLimit-Limit`/
/// `X-RateLimit-Reset` off the most recent response. Returns `None` if any
/// header is missing or unparseable, forcing the planner's conservative
/// no-status branch.
pub fn github_status_from_response(resp: &Response) -> Option<RateLimitStatus> {
    let headers = resp.headers();
    let remaining: u64 = headers.get("x-ratelimit-remaining")?.to_str().ok()?.parse().ok()?;
    let limit: u64 = headers.get("x-ratelimit-limit")?.to_str().ok()?.parse().ok()?;
    let reset_epoch: i64 = headers.get("x-ratelimit-reset")?.to_str().ok()?.parse().ok()?;
    let reset_at = DateTime::from_timestamp(reset_epoch, 0)?;
    Some(RateLimitStatus {
        remaining,
        limit,
        reset_at,
    })
}

/// GitLab REST: the caller is expected to have already forced a
/// lightweight request (e.g. "current user") so `RateLimit-*` headers are
/// populated on the response being inspected here.
pub fn gitlab_status_from_response(resp: &Response) -> Option<RateLimitStatus> {
    let headers = resp.headers();
    let remaining: u64 = headers.get("ratelimit-remaining")?.to_str().ok()?.parse().ok()?;
    let limit: u64 = headers.get("ratelimit-limit")?.to_str().ok()?.parse().ok()?;
    let reset_epoch: i64 = headers.get("ratelimit-reset")?.to_str().ok()?.parse().ok()?;
    let reset_at = DateTime::from_timestamp(reset_epoch, 0)?;
    Some(RateLimitStatus {
        remaining,
        limit,
        reset_at,
    })
}

/// Azure DevOps: attempt the last response's `X-RateLimit-*` headers (not
/// consistently emitted by the service); when absent, fall back to a
/// single conservative placeholder per §9 Open Question (b)'s resolution.
pub fn azure_status_from_response(resp: Option<&Response>) -> RateLimitStatus {
    if let Some(resp) = resp {
        let headers = resp.headers();
        if let (Some(remaining), Some(limit), Some(reset)) = (
            headers.get("x-ratelimit-remaining"),
            headers.get("x-ratelimit-limit"),
            headers.get("x-ratelimit-reset"),
        ) {
            if let (Ok(remaining), Ok(limit), Ok(reset)) = (
                remaining.to_str().unwrap_or("").parse::<u64>(),
                limit.to_str().unwrap_or("").parse::<u64>(),
                reset.to_str().unwrap_or("").parse::<i64>(),
            ) {
                if let Some(reset_at) = DateTime::from_timestamp(reset, 0) {
                    return RateLimitStatus {
                        remaining,
                        limit,
                        reset_at,
                    };
                }
            }
        }
    }
    azure_placeholder()
}

fn azure_placeholder() -> RateLimitStatus {
    RateLimitStatus {
        remaining: 5000,
        limit: 5000,
        reset_at: Utc::now() + ChronoDuration::minutes(5),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn azure_placeholder_is_conservative_five_minute_window() {
        let before = Utc::now();
        let status = azure_status_from_response(None);
        assert_eq!(status.remaining, 5000);
        assert_eq!(status.limit, 5000);
        assert!(status.reset_at > before + ChronoDuration::minutes(4));
        assert!(status.reset_at <= before + ChronoDuration::minutes(6));
    }
}
