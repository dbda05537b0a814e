//! Azure DevOps REST adapter. Grounded on
//! `original_source/clients/azure_devops_connector.py`: README/CODEOWNERS
//! candidate paths, the project-level (not repo-level) visibility lookup,
//! `_is_empty_repo` derived straight from `repo.size == 0`, and — per
//! `azure_devops_connector.py` line ~394 — languages and tags are always
//! reported empty because Azure DevOps exposes no language-detection or
//! lightweight tags-list API the original ever calls.

use chrono::{DateTime, Utc};
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{ACCEPT, AUTHORIZATION};
use serde::Deserialize;
use urlencoding::encode;

use codecat_types::{FetchError, Platform, RepoStub, Visibility};

use super::{CommitPointer, EnumerationFilters, EnumerationResult, PlatformAdapter, RepoMeta, decode_text_content, default_license, estimated_calls_per_repo};
use crate::fetch::{OptionalFetchResult, fetch_optional};
use crate::labor::CommitRecord;

const API_VERSION: &str = "7.1";
const DEFAULT_PER_PAGE: u32 = 100;
const CODEOWNERS_PATHS: &[&str] = &["CODEOWNERS", ".azuredevops/CODEOWNERS", "docs/CODEOWNERS", ".vsts/CODEOWNERS"];
const README_PATHS: &[&str] = &["README.md", "README.txt", "README"];
const QUICK_RETRY_COUNT: u32 = 2;
const QUICK_RETRY_DELAY: std::time::Duration = std::time::Duration::from_secs(3);

/// How the adapter authenticates to the Azure DevOps REST API. A PAT is
/// sent as HTTP Basic with an empty username; a service-principal bearer
/// token is produced upstream by a client-credentials exchange the CLI
/// layer performs before constructing the adapter.
pub enum AzureAuth {
    Pat(String),
    Bearer(String),
}

impl AzureAuth {
    fn header_value(&self) -> String {
        match self {
            AzureAuth::Pat(pat) => {
                use base64::Engine;
                let basic = base64::engine::general_purpose::STANDARD.encode(format!(":{pat}"));
                format!("Basic {basic}")
            }
            AzureAuth::Bearer(token) => format!("Bearer {token}"),
        }
    }
}

pub struct AzureAdapter {
    http: Client,
    organization: String,
    project: String,
    auth: AzureAuth,
    want_labor_hours: bool,
}

impl AzureAdapter {
    /// `target` is `"Organization/Project"` (§4.5's Azure target syntax).
    pub fn new(target: &str, auth: AzureAuth, want_labor_hours: bool) -> anyhow::Result<Self> {
        let (organization, project) = target
            .split_once('/')
            .ok_or_else(|| anyhow::anyhow!("Azure DevOps target must be \"Organization/Project\", got {target:?}"))?;
        let http = Client::builder().timeout(std::time::Duration::from_secs(30)).build()?;
        Ok(Self {
            http,
            organization: organization.to_string(),
            project: project.to_string(),
            auth,
            want_labor_hours,
        })
    }

    fn base(&self) -> String {
        format!("https://dev.azure.com/{}", encode(&self.organization))
    }

    fn request(&self, url: &str) -> RequestBuilder {
        self.http.get(url).header(AUTHORIZATION, self.auth.header_value())
    }

    fn get(&self, url: &str) -> anyhow::Result<Response> {
        Ok(self.request(url).send()?)
    }

    fn get_json<T: for<'de> Deserialize<'de>>(&self, url: &str) -> anyhow::Result<T> {
        let resp = self.get(url)?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().unwrap_or_default();
            anyhow::bail!("Azure DevOps API error {status}: {body}");
        }
        Ok(resp.json()?)
    }

    /// Azure DevOps exposes visibility and last-activity at the project
    /// level, not per repository, so the private-repo activity filter
    /// (§4.5) is evaluated once for the whole target rather than per stub.
    fn project_details(&self) -> (Visibility, Option<DateTime<Utc>>) {
        let url = format!("{}/_apis/projects/{}?api-version={API_VERSION}", self.base(), encode(&self.project));
        match self.get_json::<AdoProject>(&url) {
            Ok(project) => {
                let visibility = match project.visibility.to_ascii_lowercase().as_str() {
                    "public" => Visibility::Public,
                    _ => Visibility::Private,
                };
                (visibility, project.last_update_time)
            }
            Err(_) => (Visibility::Private, None),
        }
    }
}

#[derive(Debug, Deserialize)]
struct AdoProject {
    #[serde(default = "default_visibility")]
    visibility: String,
    #[serde(rename = "lastUpdateTime", default)]
    last_update_time: Option<DateTime<Utc>>,
}

fn default_visibility() -> String {
    "private".to_string()
}

#[derive(Debug, Deserialize)]
struct AdoRepoList {
    value: Vec<AdoRepo>,
}

#[derive(Debug, Deserialize)]
struct AdoRepo {
    id: String,
    name: String,
    #[serde(rename = "webUrl")]
    web_url: String,
    #[serde(rename = "defaultBranch")]
    default_branch: Option<String>,
    size: Option<u64>,
    #[serde(rename = "isDisabled", default)]
    is_disabled: bool,
}

#[derive(Debug, Deserialize)]
struct AdoCommitList {
    value: Vec<AdoCommit>,
}

#[derive(Debug, Deserialize)]
struct AdoCommit {
    #[serde(rename = "commitId")]
    commit_id: String,
    author: Option<AdoCommitAuthor>,
}

#[derive(Debug, Deserialize)]
struct AdoCommitAuthor {
    name: Option<String>,
    email: Option<String>,
    date: Option<DateTime<Utc>>,
}

fn branch_ref(branch: &str) -> String {
    branch.trim_start_matches("refs/heads/").to_string()
}

impl PlatformAdapter for AzureAdapter {
    fn platform(&self) -> Platform {
        Platform::Azure
    }

    fn enumerate_stubs(&self, _target: &str, filters: &EnumerationFilters) -> anyhow::Result<EnumerationResult> {
        let (visibility, last_update) = self.project_details();
        if visibility.is_private_or_internal() {
            if let Some(last) = last_update {
                if last < filters.private_filter_date {
                    return Ok(EnumerationResult { stubs: Vec::new(), estimated_calls: 0 });
                }
            }
        }

        let url = format!(
            "{}/{}/_apis/git/repositories?api-version={API_VERSION}",
            self.base(),
            encode(&self.project)
        );
        let list: AdoRepoList = self.get_json(&url)?;

        let mut stubs = Vec::new();
        for repo in list.value {
            if repo.is_disabled {
                continue;
            }
            stubs.push(RepoStub {
                name: repo.name,
                platform_repo_id: Some(repo.id),
                repository_url: repo.web_url,
                organization_hint: format!("{}/{}", self.organization, self.project),
                visibility,
                fork: false,
                size_zero: repo.size.unwrap_or(0) == 0,
                last_activity: last_update,
            });
            if let Some(limit) = filters.repo_limit {
                if stubs.len() as u64 >= limit {
                    break;
                }
            }
        }
        let estimated_calls = stubs.len() as i64 * estimated_calls_per_repo(self.want_labor_hours);
        Ok(EnumerationResult { stubs, estimated_calls })
    }

    fn fetch_current_commit(&self, stub: &RepoStub) -> anyhow::Result<Option<CommitPointer>> {
        let Some(id) = &stub.platform_repo_id else {
            return Ok(None);
        };
        let url = format!(
            "{}/{}/_apis/git/repositories/{id}/commits?api-version={API_VERSION}&$top=1",
            self.base(),
            encode(&self.project)
        );
        let resp = self.get(&url)?;
        if !resp.status().is_success() {
            return Ok(None);
        }
        let commits: AdoCommitList = resp.json()?;
        Ok(commits.value.into_iter().next().map(|c| CommitPointer {
            sha: c.commit_id,
            committed_at: c.author.and_then(|a| a.date).unwrap_or_else(Utc::now),
        }))
    }

    fn fetch_metadata(&self, stub: &RepoStub) -> anyhow::Result<RepoMeta> {
        let id = stub.platform_repo_id.as_deref().unwrap_or_default();
        let url = format!(
            "{}/{}/_apis/git/repositories/{id}?api-version={API_VERSION}",
            self.base(),
            encode(&self.project)
        );
        let repo: AdoRepo = self.get_json(&url)?;
        Ok(RepoMeta {
            visibility: stub.visibility,
            default_branch: repo.default_branch.map(|b| branch_ref(&b)).unwrap_or_default(),
            created_at: stub.last_activity,
            last_modified: stub.last_activity,
            // Azure DevOps never reports per-repo languages or a lightweight
            // tags list; the original tool hardcodes both to empty.
            languages: Vec::new(),
            license: Some(default_license()),
            tags: Vec::new(),
            topics: Vec::new(),
            archived: false,
            description: None,
            homepage_url: Some(repo.web_url),
        })
    }

    fn fetch_readme(&self, stub: &RepoStub, branch: &str, pre_delay: &mut dyn FnMut()) -> OptionalFetchResult<(String, Option<String>)> {
        if branch.is_empty() {
            return OptionalFetchResult::default();
        }
        let Some(id) = stub.platform_repo_id.clone() else {
            return OptionalFetchResult::default();
        };
        let web_url = stub.repository_url.clone();
        fetch_optional(README_PATHS, QUICK_RETRY_COUNT, QUICK_RETRY_DELAY, pre_delay, |path| {
            self.fetch_item(&id, path, branch).map(|text| {
                let url = format!("{web_url}?path=/{path}&version=GB{branch}&_a=contents");
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
        fetch_optional(CODEOWNERS_PATHS, QUICK_RETRY_COUNT, QUICK_RETRY_DELAY, pre_delay, |path| self.fetch_item(&id, path, branch))
    }

    fn fetch_commit_history(&self, stub: &RepoStub, branch: &str, cap: u32) -> anyhow::Result<Vec<CommitRecord>> {
        let Some(id) = &stub.platform_repo_id else {
            return Ok(Vec::new());
        };
        let mut out = Vec::new();
        let mut skip = 0u32;
        while (out.len() as u32) < cap {
            let top = DEFAULT_PER_PAGE.min(cap - out.len() as u32);
            let url = format!(
                "{}/{}/_apis/git/repositories/{id}/commits?api-version={API_VERSION}&searchCriteria.itemVersion.version={branch}&$top={top}&$skip={skip}",
                self.base(),
                encode(&self.project)
            );
            let commits: AdoCommitList = self.get_json(&url)?;
            if commits.value.is_empty() {
                break;
            }
            let got = commits.value.len();
            for c in commits.value {
                let author = c.author.unwrap_or(AdoCommitAuthor { name: None, email: None, date: None });
                out.push(CommitRecord {
                    author_name: author.name.unwrap_or_else(|| "unknown".to_string()),
                    author_email: author.email.unwrap_or_default(),
                    committed_at: author.date.unwrap_or_else(Utc::now),
                });
            }
            if got < top as usize {
                break;
            }
            skip += top;
        }
        out.truncate(cap as usize);
        Ok(out)
    }

    fn probe_rate_limit(&self) -> Option<codecat_types::RateLimitStatus> {
        let url = format!("{}/_apis/projects/{}?api-version={API_VERSION}", self.base(), encode(&self.project));
        let resp = self.get(&url).ok();
        Some(crate::ratelimit::azure_status_from_response(resp.as_ref()))
    }
}

impl AzureAdapter {
    fn fetch_item(&self, repo_id: &str, path: &str, branch: &str) -> Result<String, FetchError> {
        let url = format!(
            "{}/{}/_apis/git/repositories/{repo_id}/items?path={}&versionDescriptor.version={}&api-version={API_VERSION}",
            self.base(),
            encode(&self.project),
            encode(path),
            encode(branch),
        );
        let resp = self
            .request(&url)
            .header(ACCEPT, "text/plain")
            .send()
            .map_err(|e| FetchError::Unexpected(e.to_string()))?;
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
    fn branch_ref_strips_refs_heads_prefix() {
        assert_eq!(branch_ref("refs/heads/main"), "main");
        assert_eq!(branch_ref("main"), "main");
    }

    #[test]
    fn azure_auth_pat_encodes_basic_header() {
        let auth = AzureAuth::Pat("secret".to_string());
        assert!(auth.header_value().starts_with("Basic "));
    }

    #[test]
    fn azure_auth_bearer_passes_through() {
        let auth = AzureAuth::Bearer("tok".to_string());
        assert_eq!(auth.header_value(), "Bearer tok");
    }

    #[test]
    fn new_rejects_target_without_slash() {
        let result = AzureAdapter::new("nogroup", AzureAuth::Pat("x".into()), false);
        assert!(result.is_err());
    }
}
