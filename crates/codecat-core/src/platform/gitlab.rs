//! GitLab REST adapter (API v4). Grounded on
//! `original_source/clients/gitlab_connector.py`: subgroup-inclusive project
//! listing, `tag_list` as topics vs. git tags as `_api_tags`, the same
//! README/CODEOWNERS candidate-path ordering, and GitLab's own `empty_repo`
//! project flag used directly instead of sniffing a generic API error.

use chrono::{DateTime, Utc};
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::AUTHORIZATION;
use serde::Deserialize;
use urlencoding::encode;

use codecat_types::{FetchError, License, Platform, RepoStub, Visibility};

use super::{CommitPointer, EnumerationFilters, EnumerationResult, PlatformAdapter, RepoMeta, decode_base64_content, decode_text_content, default_license, estimated_calls_per_repo};
use crate::fetch::{OptionalFetchResult, fetch_optional};
use crate::labor::CommitRecord;

const DEFAULT_PER_PAGE: u32 = 100;
const CODEOWNERS_PATHS: &[&str] = &["CODEOWNERS", ".gitlab/CODEOWNERS", "docs/CODEOWNERS"];
const README_PATHS: &[&str] = &["README.md", "README.txt", "README"];
const QUICK_RETRY_COUNT: u32 = 2;
const QUICK_RETRY_DELAY: std::time::Duration = std::time::Duration::from_millis(500);

pub struct GitlabAdapter {
    http: Client,
    base_url: String,
    token: String,
    want_labor_hours: bool,
}

impl GitlabAdapter {
    pub fn new(token: &str, base_url: &str, want_labor_hours: bool) -> anyhow::Result<Self> {
        let http = Client::builder().timeout(std::time::Duration::from_secs(30)).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            want_labor_hours,
        })
    }

    fn request(&self, url: &str) -> RequestBuilder {
        self.http.get(url).header(AUTHORIZATION, format!("Bearer {}", self.token))
    }

    fn get(&self, url: &str) -> anyhow::Result<Response> {
        Ok(self.request(url).send()?)
    }

    fn get_json<T: for<'de> Deserialize<'de>>(&self, url: &str) -> anyhow::Result<T> {
        let resp = self.get(url)?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().unwrap_or_default();
            anyhow::bail!("GitLab API error {status}: {body}");
        }
        Ok(resp.json()?)
    }

    /// Force a lightweight `/user` call so a `RateLimit-*`-bearing response
    /// is available to the rate-limit probe (§4.2).
    pub fn probe_response(&self) -> anyhow::Result<Response> {
        Ok(self.get(&format!("{}/api/v4/user", self.base_url))?)
    }
}

#[derive(Debug, Deserialize)]
struct GlProject {
    id: u64,
    path: String,
    web_url: String,
    visibility: String,
    default_branch: Option<String>,
    created_at: Option<DateTime<Utc>>,
    last_activity_at: Option<DateTime<Utc>>,
    description: Option<String>,
    archived: bool,
    empty_repo: Option<bool>,
    #[serde(default)]
    tag_list: Vec<String>,
    forked_from_project: Option<serde_json::Value>,
    license: Option<GlLicense>,
}

#[derive(Debug, Deserialize)]
struct GlLicense {
    name: Option<String>,
    key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GlCommit {
    id: String,
    authored_date: Option<DateTime<Utc>>,
    author_name: Option<String>,
    author_email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GlTag {
    name: String,
}

fn project_path(encoded_group: &str, repo_name: &str) -> String {
    format!("{encoded_group}%2F{}", encode(repo_name))
}

impl PlatformAdapter for GitlabAdapter {
    fn platform(&self) -> Platform {
        Platform::Gitlab
    }

    fn enumerate_stubs(&self, target: &str, filters: &EnumerationFilters) -> anyhow::Result<EnumerationResult> {
        let encoded_group = encode(target).into_owned();
        let mut stubs = Vec::new();
        let mut page = 1;
        loop {
            let url = format!(
                "{}/api/v4/groups/{encoded_group}/projects?include_subgroups=true&per_page={DEFAULT_PER_PAGE}&page={page}",
                self.base_url
            );
            let projects: Vec<GlProject> = self.get_json(&url)?;
            if projects.is_empty() {
                break;
            }
            let got = projects.len();
            for project in projects {
                if project.forked_from_project.is_some() {
                    continue;
                }
                let visibility = match project.visibility.as_str() {
                    "private" => Visibility::Private,
                    "internal" => Visibility::Internal,
                    _ => Visibility::Public,
                };
                if visibility.is_private_or_internal() {
                    if let Some(last) = project.last_activity_at {
                        if last < filters.private_filter_date {
                            continue;
                        }
                    }
                }
                if let Some(created_after) = filters.created_after {
                    if let Some(created) = project.created_at {
                        if created < created_after {
                            continue;
                        }
                    }
                }
                stubs.push(RepoStub {
                    name: project.path,
                    platform_repo_id: Some(project.id.to_string()),
                    repository_url: project.web_url,
                    organization_hint: target.to_string(),
                    visibility,
                    fork: false,
                    size_zero: project.empty_repo.unwrap_or(false),
                    last_activity: project.last_activity_at,
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
        let Some(id) = &stub.platform_repo_id else {
            return Ok(None);
        };
        let url = format!("{}/api/v4/projects/{id}/repository/commits?per_page=1", self.base_url);
        let resp = self.get(&url)?;
        if !resp.status().is_success() {
            return Ok(None);
        }
        let commits: Vec<GlCommit> = resp.json()?;
        Ok(commits.into_iter().next().map(|c| CommitPointer {
            sha: c.id,
            committed_at: c.authored_date.unwrap_or_else(Utc::now),
        }))
    }

    fn fetch_metadata(&self, stub: &RepoStub) -> anyhow::Result<RepoMeta> {
        let id = stub.platform_repo_id.as_deref().unwrap_or_default();
        let project: GlProject = self.get_json(&format!("{}/api/v4/projects/{id}", self.base_url))?;
        let languages_map: std::collections::BTreeMap<String, f64> =
            self.get_json(&format!("{}/api/v4/projects/{id}/languages", self.base_url)).unwrap_or_default();
        let tags: Vec<String> = self
            .get_json::<Vec<GlTag>>(&format!("{}/api/v4/projects/{id}/repository/tags?per_page=100", self.base_url))
            .unwrap_or_default()
            .into_iter()
            .map(|t| t.name)
            .collect();

        Ok(RepoMeta {
            visibility: match project.visibility.as_str() {
                "private" => Visibility::Private,
                "internal" => Visibility::Internal,
                _ => Visibility::Public,
            },
            default_branch: project.default_branch.unwrap_or_default(),
            created_at: project.created_at,
            last_modified: project.last_activity_at,
            languages: languages_map.into_keys().collect(),
            license: Some(
                project
                    .license
                    .and_then(|l| l.name.or(l.key))
                    .map(|name| License { name, url: None })
                    .unwrap_or_else(default_license),
            ),
            tags,
            topics: project.tag_list,
            archived: project.archived,
            description: project.description,
            homepage_url: Some(project.web_url),
        })
    }

    fn fetch_readme(&self, stub: &RepoStub, branch: &str, pre_delay: &mut dyn FnMut()) -> OptionalFetchResult<(String, Option<String>)> {
        if branch.is_empty() {
            return OptionalFetchResult::default();
        }
        let Some(id) = stub.platform_repo_id.clone() else {
            return OptionalFetchResult::default();
        };
        fetch_optional(README_PATHS, QUICK_RETRY_COUNT, QUICK_RETRY_DELAY, pre_delay, |path| {
            self.fetch_file(&id, path, branch).map(|text| {
                let url = format!("{}/-/blob/{branch}/{path}", stub.repository_url);
                (text, Some(url))
            })
        })
    }

    fn fetch_codeowners(&self, stub: &RepoStub, branch: &str, pre_delay: &mut dyn FnMut()) -> OptionalFetchResult<String> {
        if branch.is_empty() {
            return OptionalFetchResult::default();
        }
        let Some(id) = stub.platform_repo_id.clone() else {
            return OptionalFetchResult::default();
        };
        fetch_optional(CODEOWNERS_PATHS, QUICK_RETRY_COUNT, QUICK_RETRY_DELAY, pre_delay, |path| {
            self.fetch_file(&id, path, branch)
        })
    }

    fn fetch_commit_history(&self, stub: &RepoStub, branch: &str, cap: u32) -> anyhow::Result<Vec<CommitRecord>> {
        let Some(id) = &stub.platform_repo_id else {
            return Ok(Vec::new());
        };
        let mut out = Vec::new();
        let mut page = 1;
        while (out.len() as u32) < cap {
            let per_page = DEFAULT_PER_PAGE.min(cap - out.len() as u32);
            let url = format!(
                "{}/api/v4/projects/{id}/repository/commits?ref_name={branch}&per_page={per_page}&page={page}",
                self.base_url
            );
            let commits: Vec<GlCommit> = self.get_json(&url)?;
            if commits.is_empty() {
                break;
            }
            let got = commits.len();
            for c in commits {
                out.push(CommitRecord {
                    author_name: c.author_name.unwrap_or_else(|| "unknown".to_string()),
                    author_email: c.author_email.unwrap_or_default(),
                    committed_at: c.authored_date.unwrap_or_else(Utc::now),
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
        let resp = self.probe_response().ok()?;
        crate::ratelimit::gitlab_status_from_response(&resp)
    }
}

impl GitlabAdapter {
    fn fetch_file(&self, project_id: &str, path: &str, branch: &str) -> Result<String, FetchError> {
        let encoded_path = encode(path);
        let url = format!(
            "{}/api/v4/projects/{project_id}/repository/files/{encoded_path}/raw?ref={branch}",
            self.base_url
        );
        let resp = self.request(&url).send().map_err(|e| FetchError::Unexpected(e.to_string()))?;
        if resp.status().is_success() {
            let bytes = resp.bytes().map_err(|e| FetchError::Unexpected(e.to_string()))?;
            return Ok(decode_text_content(&bytes));
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
    fn project_path_percent_encodes_group_and_repo() {
        assert_eq!(project_path("csels%2Fteam", "my repo"), "csels%2Fteam%2Fmy%20repo");
    }

    #[test]
    fn base64_contents_still_used_for_contents_endpoints_by_decode_helper() {
        let bytes = decode_base64_content(&base64::Engine::encode(
            &base64::engine::general_purpose::STANDARD,
            b"x",
        ))
        .unwrap();
        assert_eq!(bytes, b"x");
    }
}
