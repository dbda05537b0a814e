//! Optional-content fetcher (§4.4): tries a list of candidate paths with a
//! bounded quick-retry on `FORBIDDEN`, stopping early on `EMPTY_REPO_API`
//! and giving up the whole fetch on forbidden-exhaustion or a hard API
//! error.

use std::thread;
use std::time::Duration;

use codecat_types::FetchError;

/// Outcome of trying every candidate path for one optional piece of
/// content (a README, a CODEOWNERS file, ...).
#[derive(Debug, Clone)]
pub struct OptionalFetchResult<T> {
    pub content: Option<T>,
    pub is_empty_repo: bool,
}

impl<T> Default for OptionalFetchResult<T> {
    fn default() -> Self {
        Self {
            content: None,
            is_empty_repo: false,
        }
    }
}

/// Try each of `paths` in order via `fetch_one`, applying `pre_delay`
/// before every attempt (the orchestrator's dynamic post-call delay hook).
/// `quick_retry_count`/`quick_retry_delay` bound the number of immediate
/// retries on a `Forbidden` response for a single path before moving on —
/// once every path has exhausted its forbidden retries, the whole fetch
/// gives up rather than looping forever.
pub fn fetch_optional<T>(
    paths: &[&str],
    quick_retry_count: u32,
    quick_retry_delay: Duration,
    mut pre_delay: impl FnMut(),
    mut fetch_one: impl FnMut(&str) -> Result<T, FetchError>,
) -> OptionalFetchResult<T> {
    for path in paths {
        let mut attempt = 0;
        loop {
            pre_delay();
            match fetch_one(path) {
                Ok(content) => {
                    return OptionalFetchResult {
                        content: Some(content),
                        is_empty_repo: false,
                    };
                }
                Err(FetchError::NotFound) => break, // try next path
                Err(FetchError::EmptyRepo) => {
                    return OptionalFetchResult {
                        content: None,
                        is_empty_repo: true,
                    };
                }
                Err(FetchError::Forbidden) => {
                    attempt += 1;
                    if attempt > quick_retry_count {
                        return OptionalFetchResult::default();
                    }
                    thread::sleep(quick_retry_delay);
                    continue;
                }
                Err(FetchError::RateLimited { .. })
                | Err(FetchError::ApiError { .. })
                | Err(FetchError::Unexpected(_)) => {
                    return OptionalFetchResult::default();
                }
            }
        }
    }
    OptionalFetchResult::default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn first_path_success_short_circuits() {
        let calls = RefCell::new(Vec::new());
        let result = fetch_optional(
            &["a", "b"],
            2,
            Duration::from_millis(0),
            || {},
            |p| {
                calls.borrow_mut().push(p.to_string());
                Ok::<_, FetchError>(format!("content-of-{p}"))
            },
        );
        assert_eq!(result.content.as_deref(), Some("content-of-a"));
        assert_eq!(*calls.borrow(), vec!["a"]);
    }

    #[test]
    fn not_found_tries_next_path() {
        let result = fetch_optional(
            &["a", "b"],
            2,
            Duration::from_millis(0),
            || {},
            |p| {
                if p == "a" {
                    Err(FetchError::NotFound)
                } else {
                    Ok("found-b".to_string())
                }
            },
        );
        assert_eq!(result.content.as_deref(), Some("found-b"));
    }

    #[test]
    fn empty_repo_stops_immediately_and_flags_empty() {
        let result: OptionalFetchResult<String> = fetch_optional(
            &["a", "b"],
            2,
            Duration::from_millis(0),
            || {},
            |_| Err(FetchError::EmptyRepo),
        );
        assert!(result.content.is_none());
        assert!(result.is_empty_repo);
    }

    #[test]
    fn forbidden_retries_then_gives_up_whole_fetch() {
        let attempts = RefCell::new(0);
        let result: OptionalFetchResult<String> = fetch_optional(
            &["a", "b"],
            2,
            Duration::from_millis(0),
            || {},
            |_| {
                *attempts.borrow_mut() += 1;
                Err(FetchError::Forbidden)
            },
        );
        assert!(result.content.is_none());
        assert_eq!(*attempts.borrow(), 3); // initial + 2 quick retries
    }

    #[test]
    fn api_error_stops_the_fetch_without_trying_other_paths() {
        let calls = RefCell::new(Vec::new());
        let result: OptionalFetchResult<String> = fetch_optional(
            &["a", "b"],
            2,
            Duration::from_millis(0),
            || {},
            |p| {
                calls.borrow_mut().push(p.to_string());
                Err(FetchError::ApiError {
                    status: 500,
                    body: "boom".into(),
                })
            },
        );
        assert!(result.content.is_none());
        assert_eq!(*calls.borrow(), vec!["a"]);
    }
}
