//! Platform adapter contract (§4.5): the one trait every per-platform REST
//! client implements, plus the shared types and helpers all three adapters
//! need regardless of which platform they talk to.

mod azure;
mod github;
mod gitlab;

pub use azure::{AzureAdapter, AzureAuth};
pub use github::GithubAdapter;
pub use gitlab::GitlabAdapter;

use chrono::{DateTime, Utc};

use codecat_types::{FetchError, License, RateLimitStatus, RepoStub, Visibility};

use crate::fetch::OptionalFetchResult;
use crate::labor::CommitRecord;

/// Enumeration-time policy knobs, applied uniformly by every adapter.
#[derive(Debug, Clone)]
pub struct EnumerationFilters {
    pub private_filter_date: DateTime<Utc>,
    pub created_after: Option<DateTime<Utc>>,
    pub repo_limit: Option<u64>,
}

/// What `enumerate_stubs` hands back: the stub list plus the call-budget
/// estimate the delay planner consumes.
#[derive(Debug, Clone)]
pub struct EnumerationResult {
    pub stubs: Vec<RepoStub>,
    pub estimated_calls: i64,
}

/// Everything `fetch_metadata` reports about one repository.
#[derive(Debug, Clone)]
pub struct RepoMeta {
    pub visibility: Visibility,
    pub default_branch: String,
    pub created_at: Option<DateTime<Utc>>,
    pub last_modified: Option<DateTime<Utc>>,
    pub languages: Vec<String>,
    pub license: Option<License>,
    pub tags: Vec<String>,
    pub topics: Vec<String>,
    pub archived: bool,
    pub description: Option<String>,
    pub homepage_url: Option<String>,
}

/// A repository's current commit, as returned by `fetch_current_commit` —
/// the cheapest call an adapter makes, used for the peek-ahead cache check.
#[derive(Debug, Clone)]
pub struct CommitPointer {
    pub sha: String,
    pub committed_at: DateTime<Utc>,
}

/// The per-platform contract. Each of GitHub, GitLab, and Azure DevOps
/// implements this once, against plain REST (§4.5's resolution of the
/// REST-vs-GraphQL open question), so the orchestrator never branches on
/// platform beyond picking which adapter to construct.
pub trait PlatformAdapter: Send + Sync {
    fn platform(&self) -> codecat_types::Platform;

    /// Enumerate every non-forked repository stub under `target`, applying
    /// the private/internal activity-date filter and any repo-count limit.
    fn enumerate_stubs(&self, target: &str, filters: &EnumerationFilters) -> anyhow::Result<EnumerationResult>;

    /// Cheapest possible call: the repository's current commit SHA, used to
    /// decide cache-hit vs. cache-miss before any other fetch is made.
    fn fetch_current_commit(&self, stub: &RepoStub) -> anyhow::Result<Option<CommitPointer>>;

    fn fetch_metadata(&self, stub: &RepoStub) -> anyhow::Result<RepoMeta>;

    fn fetch_readme(
        &self,
        stub: &RepoStub,
        branch: &str,
        pre_delay: &mut dyn FnMut(),
    ) -> OptionalFetchResult<(String, Option<String>)>;

    fn fetch_codeowners(&self, stub: &RepoStub, branch: &str, pre_delay: &mut dyn FnMut()) -> OptionalFetchResult<String>;

    /// Paginate commit history up to `cap` commits, newest first.
    fn fetch_commit_history(&self, stub: &RepoStub, branch: &str, cap: u32) -> anyhow::Result<Vec<CommitRecord>>;

    /// Normalize this platform's current rate-limit headers (§4.2), forcing
    /// a lightweight request first if the platform needs one to populate
    /// them. `None` means the planner should fall back to its conservative
    /// no-status branch.
    fn probe_rate_limit(&self) -> Option<RateLimitStatus>;
}

/// License the original tool assumes when a platform reports none at all,
/// rather than leaving the field empty.
pub fn default_license() -> License {
    License {
        name: "Apache License 2.0".to_string(),
        url: Some("https://www.apache.org/licenses/LICENSE-2.0".to_string()),
    }
}

/// Estimated API-call budget per repository (§4.5): 1 for the SHA peek, 5
/// for metadata/README/CODEOWNERS/tags/buffer, +3 more when labor-hours
/// estimation is requested (it paginates commit history separately).
pub fn estimated_calls_per_repo(want_labor_hours: bool) -> i64 {
    1 + 5 + if want_labor_hours { 3 } else { 0 }
}

/// Decode file content fetched from a platform's "contents"-style API,
/// which all three platforms return base64-encoded.
pub fn decode_base64_content(encoded: &str) -> anyhow::Result<Vec<u8>> {
    use base64::Engine;
    let cleaned: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
    base64::engine::general_purpose::STANDARD
        .decode(cleaned)
        .map_err(|e| anyhow::anyhow!("invalid base64 content: {e}"))
}

/// Decode raw file bytes to text (§7 "parse/decode failures"): try UTF-8,
/// then a Latin-1 byte-to-char mapping. The original's third tier (UTF-8
/// with lossy replacement) is unreachable here because Latin-1 decoding is
/// a total function over arbitrary bytes — it never fails, so control never
/// falls through to a third branch.
pub fn decode_text_content(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    }
}

/// Classify a candidate error as an `EmptyRepo` signal based on response
/// body text, matching the original tool's substring sniffing of platform
/// error messages ("empty repository", "repository is empty", ...) for
/// platforms whose API returns a generic 409/422 for an empty repo rather
/// than a dedicated status code.
pub fn body_signals_empty_repo(body: &str) -> bool {
    let lower = body.to_ascii_lowercase();
    lower.contains("empty repository") || lower.contains("repository is empty") || lower.contains("git repository is empty")
}

/// Shared classification of an HTTP status + body into a [`FetchError`],
/// used by every adapter's content-fetching calls.
pub fn classify_http_error(status: reqwest::StatusCode, body: &str) -> FetchError {
    match status {
        reqwest::StatusCode::NOT_FOUND => FetchError::NotFound,
        reqwest::StatusCode::FORBIDDEN => {
            if body_signals_empty_repo(body) {
                FetchError::EmptyRepo
            } else {
                FetchError::Forbidden
            }
        }
        reqwest::StatusCode::CONFLICT | reqwest::StatusCode::UNPROCESSABLE_ENTITY if body_signals_empty_repo(body) => {
            FetchError::EmptyRepo
        }
        reqwest::StatusCode::TOO_MANY_REQUESTS => FetchError::RateLimited { retry_after: None },
        status => FetchError::ApiError {
            status: status.as_u16(),
            body: body.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_text_content_prefers_utf8() {
        assert_eq!(decode_text_content("héllo".as_bytes()), "héllo");
    }

    #[test]
    fn decode_text_content_falls_back_to_latin1_on_invalid_utf8() {
        let bytes = [0x80, 0x41];
        let decoded = decode_text_content(&bytes);
        assert_eq!(decoded.chars().next(), Some('\u{80}'));
        assert_eq!(decoded.chars().nth(1), Some('A'));
    }

    #[test]
    fn base64_content_round_trips() {
        use base64::Engine;
        let encoded = base64::engine::general_purpose::STANDARD.encode(b"hello world");
        let decoded = decode_base64_content(&encoded).unwrap();
        assert_eq!(decoded, b"hello world");
    }

    #[test]
    fn base64_content_tolerates_embedded_newlines() {
        use base64::Engine;
        let raw = base64::engine::general_purpose::STANDARD.encode(b"some file contents here");
        let mut chunked = String::new();
        for (i, c) in raw.chars().enumerate() {
            if i > 0 && i % 10 == 0 {
                chunked.push('\n');
            }
            chunked.push(c);
        }
        let decoded = decode_base64_content(&chunked).unwrap();
        assert_eq!(decoded, b"some file contents here");
    }

    #[test]
    fn estimated_calls_without_labor() {
        assert_eq!(estimated_calls_per_repo(false), 6);
    }

    #[test]
    fn estimated_calls_with_labor() {
        assert_eq!(estimated_calls_per_repo(true), 9);
    }

    #[test]
    fn classify_http_error_maps_conflict_with_empty_body_to_empty_repo() {
        let err = classify_http_error(reqwest::StatusCode::CONFLICT, "Git Repository is empty.");
        assert!(matches!(err, FetchError::EmptyRepo));
    }

    #[test]
    fn classify_http_error_maps_plain_forbidden_to_forbidden() {
        let err = classify_http_error(reqwest::StatusCode::FORBIDDEN, "access denied");
        assert!(matches!(err, FetchError::Forbidden));
    }

    #[test]
    fn classify_http_error_maps_not_found() {
        let err = classify_http_error(reqwest::StatusCode::NOT_FOUND, "");
        assert!(matches!(err, FetchError::NotFound));
    }
}
