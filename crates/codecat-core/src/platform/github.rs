//! GitHub REST adapter. Grounded on `original_source/clients/github_connector.py`:
//! same candidate CODEOWNERS/README paths, same fork-skip and pagination
//! shape, same exception→control-flow mapping (404 → try next path,
//! 403/5xx → stop the whole fetch, anything else → try next path), now
//! expressed as a typed `FetchError` match instead of a chain of `except`
//! clauses.

use chrono::{DateTime, Utc};
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{ACCEPT, AUTHORIZATION, USER_AGENT};
use serde::Deserialize;

use codecat_types::{FetchError, License, Platform, RepoStub, Visibility};

use super::{CommitPointer, EnumerationFilters, EnumerationResult, PlatformAdapter, RepoMeta, decode_base64_content, decode_text_content, default_license, estimated_calls_per_repo};
use crate::fetch::{OptionalFetchResult, fetch_optional};
use crate::labor::CommitRecord;

const DEFAULT_PER_PAGE: u32 = 100;
const CODEOWNERS_PATHS: &[&str] = &[".github/CODEOWNERS", "docs/CODEOWNERS", "CODEOWNERS"];
const README_PATHS: &[&str] = &["README.md", "README", "Readme.md", "readme.md"];
const QUICK_RETRY_COUNT: u32 = 2;
const QUICK_RETRY_DELAY: std::time::Duration = std::time::Duration::from_millis(500);

fn repo_full_name(stub: &RepoStub) -> String {
    format!("{}/{}", stub.organization_hint, stub.name)
}

pub struct GithubAdapter {
    http: Client,
    api_base: String,
    token: String,
    want_labor_hours: bool,
}

impl GithubAdapter {
    /// `api_base` is the REST root (`https://api.github.com` for github.com,
    /// or a GitHub Enterprise Server's `https://ghes.example.gov/api/v3`).
    pub fn new(token: &str, api_base: &str, want_labor_hours: bool) -> anyhow::Result<Self> {
        let http = Client::builder().timeout(std::time::Duration::from_secs(30)).build()?;
        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            token: token.to_string(),
            want_labor_hours,
        })
    }

    fn request(&self, url: &str) -> RequestBuilder {
        self.http
            .get(url)
            .header(AUTHORIZATION, format!("Bearer {}", self.token))
            .header(ACCEPT, "application/vnd.github+json")
            .header(USER_AGENT, "codecat")
    }

    fn get(&self, url: &str) -> anyhow::Result<Response> {
        Ok(self.request(url).send()?)
    }

    fn get_json<T: for<'de> Deserialize<'de>>(&self, url: &str) -> anyhow::Result<T> {
        let resp = self.get(url)?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().unwrap_or_default();
            anyhow::bail!("GitHub API error {status}: {body}");
        }
        Ok(resp.json()?)
    }
}

#[derive(Debug, Deserialize)]
struct GhRepo {
    id: u64,
    name: String,
    html_url: String,
    fork: bool,
    private: bool,
    pushed_at: Option<DateTime<Utc>>,
    created_at: Option<DateTime<Utc>>,
    size: u64,
    default_branch: String,
    archived: bool,
    description: Option<String>,
    homepage: Option<String>,
    license: Option<GhLicense>,
}

#[derive(Debug, Deserialize)]
struct GhLicense {
    name: String,
}

#[derive(Debug, Deserialize)]
struct GhContentFile {
    content: String,
    html_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GhCommitEntry {
    sha: String,
    commit: GhCommitDetail,
}

#[derive(Debug, Deserialize)]
struct GhCommitDetail {
    author: Option<GhCommitAuthor>,
    committer: Option<GhCommitAuthor>,
}

#[derive(Debug, Deserialize)]
struct GhCommitAuthor {
    name: Option<String>,
    email: Option<String>,
    date: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize, Default)]
struct GhTopics {
    #[serde(default)]
    names: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct GhTag {
    name: String,
}

impl PlatformAdapter for GithubAdapter {
    fn platform(&self) -> Platform {
        Platform::Github
    }

    fn enumerate_stubs(&self, target: &str, filters: &EnumerationFilters) -> anyhow::Result<EnumerationResult> {
        let org = target;
        let mut stubs = Vec::new();
        let mut page = 1;
        loop {
            let url = format!("{}/orgs/{org}/repos?type=all&per_page={DEFAULT_PER_PAGE}&page={page}", self.api_base);
            let repos: Vec<GhRepo> = self.get_json(&url)?;
            if repos.is_empty() {
                break;
            }
            let got = repos.len();
            for repo in repos {
                if repo.fork {
                    continue;
                }
                let visibility = if repo.private { Visibility::Private } else { Visibility::Public };
                if visibility.is_private_or_internal() {
                    if let Some(last) = repo.pushed_at {
                        if last < filters.private_filter_date {
                            continue;
                        }
                    }
                }
                if let Some(created_after) = filters.created_after {
                    if let Some(created) = repo.created_at {
                        if created < created_after {
                            continue;
                        }
                    }
                }
                stubs.push(RepoStub {
                    name: repo.name,
                    platform_repo_id: Some(repo.id.to_string()),
                    repository_url: repo.html_url,
                    organization_hint: org.to_string(),
                    visibility,
                    fork: repo.fork,
                    size_zero: repo.size == 0,
                    last_activity: repo.pushed_at,
                });
                if let Some(limit) = filters.repo_limit {
                    if stubs.len() as u64 >= limit {
                        let estimated_calls = stubs.len() as i64 * estimated_calls_per_repo(self.want_labor_hours);
                        return Ok(EnumerationResult { stubs, estimated_calls });
                    }
                }
            }
            if got < DEFAULT_PER_PAGE as usize {
                break;
            }
            page += 1;
        }
        let estimated_calls = stubs.len() as i64 * estimated_calls_per_repo(self.want_labor_hours);
        Ok(EnumerationResult { stubs, estimated_calls })
    }

    fn fetch_current_commit(&self, stub: &RepoStub) -> anyhow::Result<Option<CommitPointer>> {
        let full_name = repo_full_name(stub);
        let url = format!("{}/repos/{full_name}/commits?per_page=1", self.api_base);
        let resp = self.get(&url)?;
        if !resp.status().is_success() {
            return Ok(None);
        }
        let entries: Vec<GhCommitEntry> = resp.json()?;
        Ok(entries.into_iter().next().map(|c| CommitPointer {
            sha: c.sha,
            committed_at: c
                .commit
                .committer
                .as_ref()
                .and_then(|a| a.date)
                .or_else(|| c.commit.author.as_ref().and_then(|a| a.date))
                .unwrap_or_else(Utc::now),
        }))
    }

    fn fetch_metadata(&self, stub: &RepoStub) -> anyhow::Result<RepoMeta> {
        let full_name = repo_full_name(stub);
        let repo: GhRepo = self.get_json(&format!("{}/repos/{full_name}", self.api_base))?;
        let languages_map: std::collections::BTreeMap<String, u64> =
            self.get_json(&format!("{}/repos/{full_name}/languages", self.api_base)).unwrap_or_default();
        let topics: GhTopics = self.get_json(&format!("{}/repos/{full_name}/topics", self.api_base)).unwrap_or_default();
        let tags: Vec<String> = self
            .get_json::<Vec<GhTag>>(&format!("{}/repos/{full_name}/tags?per_page=100", self.api_base))
            .unwrap_or_default()
            .into_iter()
            .map(|t| t.name)
            .collect();

        Ok(RepoMeta {
            visibility: if repo.private { Visibility::Private } else { Visibility::Public },
            default_branch: repo.default_branch,
            created_at: repo.created_at,
            last_modified: repo.pushed_at,
            languages: languages_map.into_keys().collect(),
            license: Some(
                repo.license
                    .map(|l| License { name: l.name, url: None })
                    .unwrap_or_else(default_license),
            ),
            tags,
            topics: topics.names,
            archived: repo.archived,
            description: repo.description,
            homepage_url: repo.homepage,
        })
    }

    fn fetch_readme(&self, stub: &RepoStub, branch: &str, pre_delay: &mut dyn FnMut()) -> OptionalFetchResult<(String, Option<String>)> {
        let full_name = repo_full_name(stub);
        fetch_optional(README_PATHS, QUICK_RETRY_COUNT, QUICK_RETRY_DELAY, pre_delay, |path| {
            self.fetch_content_file(&full_name, path, branch)
        })
    }

    fn fetch_codeowners(&self, stub: &RepoStub, branch: &str, pre_delay: &mut dyn FnMut()) -> OptionalFetchResult<String> {
        let full_name = repo_full_name(stub);
        fetch_optional(CODEOWNERS_PATHS, QUICK_RETRY_COUNT, QUICK_RETRY_DELAY, pre_delay, |path| {
            self.fetch_content_file(&full_name, path, branch).map(|(text, _)| text)
        })
    }

    fn fetch_commit_history(&self, stub: &RepoStub, branch: &str, cap: u32) -> anyhow::Result<Vec<CommitRecord>> {
        let full_name = repo_full_name(stub);
        let mut out = Vec::new();
        let mut page = 1;
        while (out.len() as u32) < cap {
            let per_page = DEFAULT_PER_PAGE.min(cap - out.len() as u32);
            let url = format!("{}/repos/{full_name}/commits?sha={branch}&per_page={per_page}&page={page}", self.api_base);
            let entries: Vec<GhCommitEntry> = self.get_json(&url)?;
            if entries.is_empty() {
                break;
            }
            let got = entries.len();
            for entry in entries {
                let author = entry.commit.author.unwrap_or(GhCommitAuthor {
                    name: None,
                    email: None,
                    date: None,
                });
                out.push(CommitRecord {
                    author_name: author.name.unwrap_or_else(|| "unknown".to_string()),
                    author_email: author.email.unwrap_or_default(),
                    committed_at: author.date.unwrap_or_else(Utc::now),
                });
            }
            if got < per_page as usize {
                break;
            }
            page += 1;
        }
        out.truncate(cap as usize);
        Ok(out)
    }

    fn probe_rate_limit(&self) -> Option<codecat_types::RateLimitStatus> {
        let resp = self.get(&format!("{}/rate_limit", self.api_base)).ok()?;
        crate::ratelimit::github_status_from_response(&resp)
    }
}

impl GithubAdapter {
    fn fetch_content_file(&self, full_name: &str, path: &str, branch: &str) -> Result<(String, Option<String>), FetchError> {
        let url = format!("{}/repos/{full_name}/contents/{path}?ref={branch}", self.api_base);
        let resp = self.request(&url).send().map_err(|e| FetchError::Unexpected(e.to_string()))?;
        if resp.status().is_success() {
            let file: GhContentFile = resp.json().map_err(|e| FetchError::Unexpected(e.to_string()))?;
            let bytes = decode_base64_content(&file.content).map_err(|e| FetchError::Unexpected(e.to_string()))?;
            return Ok((decode_text_content(&bytes), file.html_url));
        }
        let status = resp.status();
        let body = resp.text().unwrap_or_default();
        Err(super::classify_http_error(status, &body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repo_full_name_joins_org_and_name() {
        let stub = RepoStub {
            name: "widget".into(),
            platform_repo_id: Some("1".into()),
            repository_url: "https://example.com".into(),
            organization_hint: "cdc".into(),
            visibility: Visibility::Public,
            fork: false,
            size_zero: false,
            last_activity: None,
        };
        assert_eq!(repo_full_name(&stub), "cdc/widget");
    }

    #[test]
    fn content_fetch_classifies_not_found_as_not_found() {
        let err = super::super::classify_http_error(reqwest::StatusCode::NOT_FOUND, "");
        assert!(matches!(err, FetchError::NotFound));
    }

    #[test]
    fn content_fetch_classifies_empty_repo_conflict() {
        let err = super::super::classify_http_error(reqwest::StatusCode::CONFLICT, "This repository is empty.");
        assert!(matches!(err, FetchError::EmptyRepo));
    }

    #[test]
    fn content_fetch_classifies_forbidden_without_empty_signal_as_forbidden() {
        let err = super::super::classify_http_error(reqwest::StatusCode::FORBIDDEN, "rate limit exceeded");
        assert!(matches!(err, FetchError::Forbidden));
    }
}
