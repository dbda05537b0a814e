//! Cache store (loads a target's prior intermediate JSON into an
//! id→record map, §3 "Cache entry"). Read-only after load; safe for
//! concurrent reads across worker threads.

use std::collections::HashMap;
use std::path::Path;

use codecat_types::{CatalogEntry, Platform, RepoRecord};

/// A prior scan's records, keyed the way §3 describes: `platformRepoId`
/// when present, else a platform-specific fallback derived from the
/// intermediate filename (GitHub: `"<org>/<name>"`).
#[derive(Debug, Clone, Default)]
pub struct CacheStore {
    by_key: HashMap<String, RepoRecord>,
}

impl CacheStore {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load `path` (an `intermediate_<platform>_<target>.json` file) into a
    /// cache store, if it exists. A missing file means "no prior scan" and
    /// yields an empty store rather than an error — this is the normal case
    /// for a target's first run.
    pub fn load(path: &Path, platform: Platform) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::empty());
        }
        let raw = std::fs::read_to_string(path)?;
        let entries: Vec<CatalogEntry> = serde_json::from_str(&raw)?;
        let org_slug = org_slug_from_filename(path, platform);

        let mut by_key = HashMap::new();
        for entry in entries {
            let CatalogEntry::Record(record) = entry else {
                continue;
            };
            if record.last_commit_sha.is_none() {
                continue;
            }
            let key = cache_key(&record, platform, org_slug.as_deref());
            if let Some(key) = key {
                by_key.insert(key, *record);
            }
        }
        Ok(Self { by_key })
    }

    /// Look up a cached record by its canonical key.
    pub fn get(&self, key: &str) -> Option<&RepoRecord> {
        self.by_key.get(key)
    }

    /// A cache hit requires the cached `lastCommitSHA` to equal the
    /// repository's current SHA (Invariant 6).
    pub fn matches_current_sha(&self, key: &str, current_sha: &str) -> bool {
        self.by_key
            .get(key)
            .and_then(|r| r.last_commit_sha.as_deref())
            .map(|cached| cached == current_sha)
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}

/// Parse `intermediate_<platform>_<org_slug>.json` out of a file path,
/// mirroring the original tool's filename-derived fallback-key context.
fn org_slug_from_filename(path: &Path, platform: Platform) -> Option<String> {
    let basename = path.file_name()?.to_str()?;
    let prefix = format!("intermediate_{}_", platform.as_str());
    let slug = basename.strip_prefix(prefix.as_str())?.strip_suffix(".json")?;
    if slug.is_empty() || slug.contains('/') || slug.contains('\\') {
        None
    } else {
        Some(slug.to_string())
    }
}

/// The canonical cache key for a record: `platformRepoId` when present;
/// for GitHub, `"<org_slug>/<name>"` as a fallback when the id is absent.
fn cache_key(record: &RepoRecord, platform: Platform, org_slug: Option<&str>) -> Option<String> {
    if let Some(id) = &record.platform_repo_id {
        return Some(id.clone());
    }
    if platform == Platform::Github {
        if let Some(org) = org_slug {
            return Some(format!("{org}/{}", record.name));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use codecat_types::{Contact, Dates, Permissions, UsageType, Visibility};
    use tempfile::tempdir;

    fn sample_record(id: Option<&str>, name: &str, sha: Option<&str>) -> RepoRecord {
        RepoRecord {
            name: name.to_string(),
            organization: "cdc".into(),
            platform: Platform::Github,
            platform_repo_id: id.map(|s| s.to_string()),
            repository_url: "https://example.com/repo".into(),
            private_id: None,
            description: None,
            homepage_url: None,
            vcs: vec![],
            languages: vec![],
            tags: vec![],
            readme_url: None,
            contract_number: None,
            license_url: None,
            permissions: Permissions {
                usage_type: UsageType::OpenSource,
                exemption_text: None,
                licenses: vec![],
            },
            date: Dates::default(),
            contact: Contact::default(),
            status: codecat_types::RepoStatus::Maintained,
            version: "1.0.0".into(),
            labor_hours: 0.0,
            visibility: Visibility::Public,
            fork: false,
            readme_content: None,
            codeowners_content: None,
            status_from_readme: None,
            is_empty_repo: false,
            private_contact_emails: vec![],
            is_generic_organization: false,
            last_commit_sha: sha.map(|s| s.to_string()),
            archived: false,
        }
    }

    #[test]
    fn missing_file_yields_empty_store() {
        let store = CacheStore::load(Path::new("/nonexistent/intermediate_github_foo.json"), Platform::Github).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn loads_entries_keyed_by_platform_repo_id() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("intermediate_github_myorg.json");
        let record = sample_record(Some("42"), "repo-a", Some("abc123"));
        let entries = vec![CatalogEntry::Record(Box::new(record))];
        std::fs::write(&path, serde_json::to_string(&entries).unwrap()).unwrap();

        let store = CacheStore::load(&path, Platform::Github).unwrap();
        assert_eq!(store.len(), 1);
        assert!(store.matches_current_sha("42", "abc123"));
        assert!(!store.matches_current_sha("42", "def456"));
    }

    #[test]
    fn github_fallback_key_derived_from_filename_and_name() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("intermediate_github_myorg.json");
        let record = sample_record(None, "repo-a", Some("abc123"));
        let entries = vec![CatalogEntry::Record(Box::new(record))];
        std::fs::write(&path, serde_json::to_string(&entries).unwrap()).unwrap();

        let store = CacheStore::load(&path, Platform::Github).unwrap();
        assert!(store.get("myorg/repo-a").is_some());
    }

    #[test]
    fn entries_without_commit_sha_are_not_cached() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("intermediate_github_myorg.json");
        let record = sample_record(Some("42"), "repo-a", None);
        let entries = vec![CatalogEntry::Record(Box::new(record))];
        std::fs::write(&path, serde_json::to_string(&entries).unwrap()).unwrap();

        let store = CacheStore::load(&path, Platform::Github).unwrap();
        assert!(store.is_empty());
    }
}
