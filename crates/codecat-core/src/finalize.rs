//! Finalizer (§4.10): the ten-step per-record pass that assigns private
//! IDs, rewrites URLs for private/internal repositories, logs exemptions,
//! infers status and version, and drops transient fields.

use std::collections::BTreeMap;
use std::sync::Mutex;

use chrono::{DateTime, Datelike, Utc};

use codecat_config::Config;
use codecat_types::{
    Dates, ExemptionLogRow, Platform, PrivateIdRow, RepoRecord, RepoStatus, UsageType, Visibility,
};

const INACTIVITY_THRESHOLD_YEARS: i32 = 2;

/// One entry the mapping manager tracks in memory, mirroring the
/// original's `{private_id, repo, url, org, emails, date}` shape.
#[derive(Debug, Clone)]
struct MappingEntry {
    repository_name: String,
    repository_url: String,
    organization: String,
    emails: Vec<String>,
    date_added: DateTime<Utc>,
}

/// Stable `platformRepoId → PrivateID` map, loaded at orchestration start
/// and mutated (under a single lock) by every finalizer call across every
/// worker thread in every target.
pub struct PrivateIdManager {
    mappings: Mutex<BTreeMap<String, MappingEntry>>,
}

impl PrivateIdManager {
    pub fn new() -> Self {
        Self {
            mappings: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn load_from_rows(rows: impl IntoIterator<Item = PrivateIdRow>) -> Self {
        let mut mappings = BTreeMap::new();
        for row in rows {
            let emails = parse_emails(&row.contact_emails);
            mappings.insert(
                row.private_id,
                MappingEntry {
                    repository_name: row.repository_name,
                    repository_url: row.repository_url,
                    organization: row.organization,
                    emails,
                    date_added: row.date_added,
                },
            );
        }
        Self {
            mappings: Mutex::new(mappings),
        }
    }

    /// Get the PrivateID for a repository, creating or updating its
    /// mapping entry in place. Falls back to a random suffix when no
    /// platform repository id is available.
    pub fn get_or_create(
        &self,
        platform: Platform,
        platform_repo_id: Option<&str>,
        organization: &str,
        repo_name: &str,
        repository_url: &str,
        contact_emails: &[String],
    ) -> String {
        let private_id = match platform_repo_id {
            Some(id) => format!("{}_{}", platform.as_str(), id),
            None => format!("{}_random_{}", platform.as_str(), random_suffix(6)),
        };

        let incoming_emails = normalize_emails(contact_emails);

        let mut mappings = self.mappings.lock().unwrap();
        match mappings.get_mut(&private_id) {
            Some(entry) => {
                let mut updated = false;
                if entry.organization != organization {
                    entry.organization = organization.to_string();
                    updated = true;
                }
                if entry.repository_url != repository_url {
                    entry.repository_url = repository_url.to_string();
                    updated = true;
                }
                if entry.repository_name != repo_name {
                    entry.repository_name = repo_name.to_string();
                    updated = true;
                }
                if entry.emails != incoming_emails {
                    entry.emails = incoming_emails;
                    updated = true;
                }
                if updated {
                    entry.date_added = Utc::now();
                }
            }
            None => {
                mappings.insert(
                    private_id.clone(),
                    MappingEntry {
                        repository_name: repo_name.to_string(),
                        repository_url: repository_url.to_string(),
                        organization: organization.to_string(),
                        emails: incoming_emails,
                        date_added: Utc::now(),
                    },
                );
            }
        }
        private_id
    }

    pub fn to_rows(&self) -> Vec<PrivateIdRow> {
        let mappings = self.mappings.lock().unwrap();
        mappings
            .iter()
            .map(|(id, entry)| PrivateIdRow {
                private_id: id.clone(),
                repository_name: entry.repository_name.clone(),
                repository_url: entry.repository_url.clone(),
                organization: entry.organization.clone(),
                contact_emails: entry.emails.join(";"),
                date_added: entry.date_added,
            })
            .collect()
    }
}

impl Default for PrivateIdManager {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_emails(semicolon_separated: &str) -> Vec<String> {
    normalize_emails(
        &semicolon_separated
            .split(';')
            .map(|s| s.to_string())
            .collect::<Vec<_>>(),
    )
}

fn normalize_emails(emails: &[String]) -> Vec<String> {
    let mut set: std::collections::BTreeSet<String> = std::collections::BTreeSet::new();
    for e in emails {
        let trimmed = e.trim().to_ascii_lowercase();
        if !trimmed.is_empty() {
            set.insert(trimmed);
        }
    }
    set.into_iter().collect()
}

fn random_suffix(length: usize) -> String {
    use rand::Rng;
    const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::rng();
    (0..length)
        .map(|_| CHARSET[rng.random_range(0..CHARSET.len())] as char)
        .collect()
}

/// Append-only, de-duplicated (by repository name) exemption log.
#[derive(Debug, Default)]
pub struct ExemptionLog {
    seen: Mutex<std::collections::BTreeSet<String>>,
    rows: Mutex<Vec<ExemptionLogRow>>,
}

impl ExemptionLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the log from a previously written exemption CSV so dedup and
    /// the eventual rewrite cover both old and newly appended rows.
    pub fn load_from_rows(rows: impl IntoIterator<Item = ExemptionLogRow>) -> Self {
        let log = Self::default();
        for row in rows {
            log.append(row);
        }
        log
    }

    pub fn append(&self, row: ExemptionLogRow) {
        let mut seen = self.seen.lock().unwrap();
        if !seen.insert(row.repository_name.clone()) {
            return;
        }
        self.rows.lock().unwrap().push(row);
    }

    pub fn into_rows(self) -> Vec<ExemptionLogRow> {
        self.rows.into_inner().unwrap()
    }
}

/// Status inference: API-reported archived flag wins outright, then a
/// README status marker (if it names an author-declarable status), then
/// the inactivity threshold, else the `development` default.
pub fn resolve_status(
    archived: bool,
    readme_status: Option<RepoStatus>,
    last_modified: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> RepoStatus {
    if archived {
        return RepoStatus::Archived;
    }
    if let Some(status) = readme_status {
        return status;
    }
    if let Some(last_modified) = last_modified {
        if years_between(last_modified, now) > INACTIVITY_THRESHOLD_YEARS {
            return RepoStatus::Inactive;
        }
    }
    RepoStatus::Development
}

fn years_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> i32 {
    let mut years = later.year() - earlier.year();
    let anniversary_passed = (later.month(), later.day()) >= (earlier.month(), earlier.day());
    if !anniversary_passed {
        years -= 1;
    }
    years
}

/// Version inference (§4.10 step 5): when the platform-reported version is
/// `"N/A"`, pick the largest semver-parseable tag after stripping common
/// prefixes, preferring non-prereleases over prereleases.
pub fn resolve_version(current: &str, tags: &[String]) -> String {
    if current != "N/A" && !current.is_empty() {
        return current.to_string();
    }
    let mut parsed: Vec<(semver::Version, String)> = tags
        .iter()
        .filter_map(|tag| strip_version_prefix(tag).map(|stripped| (stripped, tag.clone())))
        .filter_map(|(stripped, original)| semver::Version::parse(&stripped).ok().map(|v| (v, original)))
        .collect();

    if parsed.is_empty() {
        return "N/A".to_string();
    }

    parsed.sort_by(|(a, _), (b, _)| {
        let a_pre = !a.pre.is_empty();
        let b_pre = !b.pre.is_empty();
        a_pre.cmp(&b_pre).then(b.cmp(a))
    });
    parsed[0].0.to_string()
}

fn strip_version_prefix(tag: &str) -> Option<String> {
    for prefix in ["v", "release-", "Release-"] {
        if let Some(rest) = tag.strip_prefix(prefix) {
            return Some(rest.to_string());
        }
    }
    if let Some(idx) = tag.find("jenkins-") {
        if let Some(rest) = tag[idx + "jenkins-".len()..].rsplit_once('-') {
            return Some(rest.1.to_string());
        }
    }
    Some(tag.to_string())
}

/// URL rewriting for private/internal records (Invariant 4): exempt
/// records get the exempted-notice URL, everything else gets the
/// instructions URL. Both must be configured — this crate treats their
/// absence as a hard configuration error rather than leaking the real
/// repository URL (see DESIGN.md for the deliberate deviation from the
/// original tool's fall-back-with-warning behavior).
pub fn rewrite_private_url(cfg: &Config, usage_type: UsageType) -> anyhow::Result<String> {
    if usage_type.is_exempt() {
        cfg.exempted_notice_url
            .clone()
            .ok_or_else(|| anyhow::anyhow!("EXEMPTED_NOTICE_PDF_URL must be configured to scan private/internal targets"))
    } else {
        cfg.instructions_url
            .clone()
            .ok_or_else(|| anyhow::anyhow!("INSTRUCTIONS_PDF_URL must be configured to scan private/internal targets"))
    }
}

/// Contact-email resolution (§4.10 step 9 / §9 design note): private and
/// internal records always emit the configured private-repo contact;
/// public records prefer a README `Contact(s):` marker, then CODEOWNERS
/// content, then a full README scan for an agency-domain address, falling
/// back to the default contact.
pub fn resolve_contact_email(
    cfg: &Config,
    visibility: Visibility,
    readme_contacts: &[String],
    codeowners_content: Option<&str>,
    readme_content: Option<&str>,
) -> String {
    if visibility.is_private_or_internal() {
        return cfg.private_repo_contact_email.clone();
    }

    let domain = agency_email_domain(&cfg.default_contact_email);

    if let Some(email) = readme_contacts.iter().find(|e| matches_domain(e, &domain)) {
        return email.to_ascii_lowercase();
    }
    if let Some(content) = codeowners_content {
        if let Some(email) = first_email_on_domain(content, &domain) {
            return email;
        }
    }
    if let Some(content) = readme_content {
        if let Some(email) = first_email_on_domain(content, &domain) {
            return email;
        }
    }
    cfg.default_contact_email.clone()
}

fn agency_email_domain(default_contact_email: &str) -> String {
    default_contact_email
        .split('@')
        .nth(1)
        .unwrap_or("")
        .to_ascii_lowercase()
}

fn matches_domain(email: &str, domain: &str) -> bool {
    !domain.is_empty() && email.to_ascii_lowercase().ends_with(&format!("@{domain}"))
}

fn first_email_on_domain(text: &str, domain: &str) -> Option<String> {
    if domain.is_empty() {
        return None;
    }
    static EMAIL_PATTERN: std::sync::LazyLock<regex::Regex> = std::sync::LazyLock::new(|| {
        regex::Regex::new(r"[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}").unwrap()
    });
    EMAIL_PATTERN
        .find_iter(text)
        .map(|m| m.as_str().to_ascii_lowercase())
        .find(|e| matches_domain(e, domain))
}

/// License-URL derivation (§4.10 step 10): substitute the README URL's
/// filename component with `LICENSE`.
pub fn derive_license_url(readme_url: &str) -> Option<String> {
    let (base, filename) = readme_url.rsplit_once('/')?;
    let _ = filename;
    Some(format!("{base}/LICENSE"))
}

/// Drop the record's `date` object when every field is absent, matching
/// the recursive null/empty-container cleanup of §4.10 step 8.
pub fn clean_dates(dates: Dates) -> Dates {
    if dates.is_empty() {
        Dates::default()
    } else {
        dates
    }
}

/// Replace a still-generic organization with the configured agency name
/// (§4.10 step 7).
pub fn resolve_final_organization(organization: &str, is_generic: bool, agency_name: &str) -> String {
    if is_generic {
        agency_name.to_string()
    } else {
        organization.to_string()
    }
}

/// Build an exemption-log row for a record whose usage type starts with
/// `exempt` (§4.10 step 3).
pub fn build_exemption_row(record: &RepoRecord) -> Option<ExemptionLogRow> {
    if !record.permissions.usage_type.is_exempt() {
        return None;
    }
    Some(ExemptionLogRow {
        private_id: record.private_id.clone().unwrap_or_default(),
        repository_name: record.name.clone(),
        reason: "automated exemption classification".to_string(),
        usage_type: record.permissions.usage_type.as_code().to_string(),
        exemption_text: record.permissions.exemption_text.clone().unwrap_or_default(),
        timestamp: Utc::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn private_id_is_stable_across_repeated_calls() {
        let mgr = PrivateIdManager::new();
        let first = mgr.get_or_create(Platform::Github, Some("42"), "cdc", "repo", "https://x", &[]);
        let second = mgr.get_or_create(Platform::Github, Some("42"), "cdc", "repo", "https://x", &[]);
        assert_eq!(first, second);
        assert_eq!(first, "github_42");
    }

    #[test]
    fn missing_platform_id_falls_back_to_random_suffix() {
        let mgr = PrivateIdManager::new();
        let id = mgr.get_or_create(Platform::Gitlab, None, "cdc", "repo", "https://x", &[]);
        assert!(id.starts_with("gitlab_random_"));
    }

    #[test]
    fn mapping_entry_updates_url_when_changed() {
        let mgr = PrivateIdManager::new();
        mgr.get_or_create(Platform::Github, Some("1"), "cdc", "repo", "https://old", &[]);
        mgr.get_or_create(Platform::Github, Some("1"), "cdc", "repo", "https://new", &[]);
        let rows = mgr.to_rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].repository_url, "https://new");
    }

    #[test]
    fn exemption_log_deduplicates_by_repository_name() {
        let log = ExemptionLog::new();
        log.append(ExemptionLogRow {
            private_id: "github_1".into(),
            repository_name: "repo".into(),
            reason: "r".into(),
            usage_type: "exemptByLaw".into(),
            exemption_text: "t".into(),
            timestamp: Utc::now(),
        });
        log.append(ExemptionLogRow {
            private_id: "github_1".into(),
            repository_name: "repo".into(),
            reason: "r2".into(),
            usage_type: "exemptByLaw".into(),
            exemption_text: "t2".into(),
            timestamp: Utc::now(),
        });
        assert_eq!(log.into_rows().len(), 1);
    }

    #[test]
    fn status_exactly_two_years_ago_is_development_not_inactive() {
        let now = Utc::now();
        let exactly_two_years_ago = now - ChronoDuration::days(730);
        let status = resolve_status(false, None, Some(exactly_two_years_ago), now);
        assert_ne!(status, RepoStatus::Inactive);
    }

    #[test]
    fn status_over_two_years_ago_is_inactive() {
        let now = Utc::now();
        let over_two_years_ago = now - ChronoDuration::days(800);
        let status = resolve_status(false, None, Some(over_two_years_ago), now);
        assert_eq!(status, RepoStatus::Inactive);
    }

    #[test]
    fn archived_flag_always_wins() {
        let now = Utc::now();
        let status = resolve_status(true, Some(RepoStatus::Maintained), Some(now), now);
        assert_eq!(status, RepoStatus::Archived);
    }

    #[test]
    fn version_na_picks_largest_semver_tag_preferring_stable() {
        let tags = vec![
            "v1.0.0".to_string(),
            "v2.0.0-beta".to_string(),
            "v1.5.0".to_string(),
        ];
        assert_eq!(resolve_version("N/A", &tags), "1.5.0");
    }

    #[test]
    fn version_falls_back_to_na_with_no_parseable_tags() {
        let tags = vec!["latest".to_string(), "nightly".to_string()];
        assert_eq!(resolve_version("N/A", &tags), "N/A");
    }

    #[test]
    fn non_na_version_is_passed_through() {
        assert_eq!(resolve_version("3.2.1", &[]), "3.2.1");
    }

    #[test]
    fn license_url_substitutes_filename_with_license() {
        let url = derive_license_url("https://example.com/org/repo/blob/main/README.md");
        assert_eq!(
            url.as_deref(),
            Some("https://example.com/org/repo/blob/main/LICENSE")
        );
    }

    #[test]
    fn private_repo_always_uses_configured_contact() {
        let cfg = test_config();
        let email = resolve_contact_email(&cfg, Visibility::Private, &[], None, None);
        assert_eq!(email, cfg.private_repo_contact_email);
    }

    #[test]
    fn public_repo_prefers_readme_contact_marker_on_agency_domain() {
        let cfg = test_config();
        let email = resolve_contact_email(
            &cfg,
            Visibility::Public,
            &["someone@cdc.gov".to_string()],
            None,
            None,
        );
        assert_eq!(email, "someone@cdc.gov");
    }

    #[test]
    fn public_repo_falls_back_to_default_when_nothing_matches() {
        let cfg = test_config();
        let email = resolve_contact_email(&cfg, Visibility::Public, &[], None, None);
        assert_eq!(email, cfg.default_contact_email);
    }

    fn test_config() -> Config {
        temp_env::with_vars(
            [
                ("PRIVATE_REPO_CONTACT_EMAIL", Some("shareit@cdc.gov")),
                ("DEFAULT_CONTACT_EMAIL", Some("shareit@cdc.gov")),
            ],
            || Config::load().expect("config loads"),
        )
    }
}
