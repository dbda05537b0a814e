//! # Types
//!
//! Core domain types shared by every stage of a catalog scan: the
//! [`RepoRecord`] produced by platform adapters and mutated by the
//! classifier, organization resolver, and finalizer; the enums that
//! constrain its `usageType` and `status` fields; and the row shapes for
//! the two side-car CSV tables (private-ID mapping, exemption log).
//!
//! ## Serialization
//!
//! [`RepoRecord`] serializes to the exact JSON shape expected in an
//! intermediate file and in the final `code.json` catalog. Transient
//! fields (prefixed with `_` in the original tool, represented here as
//! `#[serde(skip)]` fields) never reach the wire.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A repository's usage-type classification, as emitted in `permissions.usageType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UsageType {
    OpenSource,
    GovernmentWideReuse,
    ExemptByLaw,
    ExemptByNationalSecurity,
    ExemptByAgencySystem,
    ExemptByMissionSystem,
    ExemptByCio,
    ExemptNonCode,
}

impl UsageType {
    /// Valid AI-assignable exemption codes (excludes `exemptNonCode`, which is
    /// only ever assigned by the non-code heuristic, never by the model).
    pub const VALID_AI_EXEMPTION_CODES: &'static [UsageType] = &[
        UsageType::ExemptByLaw,
        UsageType::ExemptByNationalSecurity,
        UsageType::ExemptByAgencySystem,
        UsageType::ExemptByMissionSystem,
        UsageType::ExemptByCio,
    ];

    pub fn is_exempt(&self) -> bool {
        !matches!(self, UsageType::OpenSource | UsageType::GovernmentWideReuse)
    }

    /// Parse the wire string form (`"exemptByLaw"`, ...), as used in AI
    /// responses and README `Exemption:` markers.
    pub fn from_code(code: &str) -> Option<Self> {
        Some(match code {
            "openSource" => UsageType::OpenSource,
            "governmentWideReuse" => UsageType::GovernmentWideReuse,
            "exemptByLaw" => UsageType::ExemptByLaw,
            "exemptByNationalSecurity" => UsageType::ExemptByNationalSecurity,
            "exemptByAgencySystem" => UsageType::ExemptByAgencySystem,
            "exemptByMissionSystem" => UsageType::ExemptByMissionSystem,
            "exemptByCIO" => UsageType::ExemptByCio,
            "exemptNonCode" => UsageType::ExemptNonCode,
            _ => return None,
        })
    }

    pub fn as_code(&self) -> &'static str {
        match self {
            UsageType::OpenSource => "openSource",
            UsageType::GovernmentWideReuse => "governmentWideReuse",
            UsageType::ExemptByLaw => "exemptByLaw",
            UsageType::ExemptByNationalSecurity => "exemptByNationalSecurity",
            UsageType::ExemptByAgencySystem => "exemptByAgencySystem",
            UsageType::ExemptByMissionSystem => "exemptByMissionSystem",
            UsageType::ExemptByCio => "exemptByCIO",
            UsageType::ExemptNonCode => "exemptNonCode",
        }
    }
}

/// Operational lifecycle status, as emitted in `status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepoStatus {
    Development,
    Maintained,
    Deprecated,
    Experimental,
    Inactive,
    Archived,
}

impl RepoStatus {
    /// Statuses a README `Status:`/`Project Status:` marker may legally claim.
    /// Deliberately excludes `archived`/`development`, which are API-derived
    /// or the fallback default rather than author-declared.
    pub fn from_readme_marker(s: &str) -> Option<Self> {
        Some(match s.to_ascii_lowercase().as_str() {
            "maintained" => RepoStatus::Maintained,
            "deprecated" => RepoStatus::Deprecated,
            "experimental" => RepoStatus::Experimental,
            "active" => RepoStatus::Maintained,
            "inactive" => RepoStatus::Inactive,
            _ => return None,
        })
    }
}

/// Which hosting platform a repository came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Github,
    Gitlab,
    Azure,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Github => "github",
            Platform::Gitlab => "gitlab",
            Platform::Azure => "azure",
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Repository visibility as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    Private,
    Internal,
}

impl Visibility {
    pub fn is_private_or_internal(&self) -> bool {
        matches!(self, Visibility::Private | Visibility::Internal)
    }
}

/// License information detected on a repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct License {
    pub name: String,
    #[serde(rename = "URL", skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// `permissions` sub-object of a [`RepoRecord`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Permissions {
    pub usage_type: UsageType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exemption_text: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub licenses: Vec<License>,
}

/// `date` sub-object of a [`RepoRecord`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dates {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata_last_updated: Option<DateTime<Utc>>,
}

impl Dates {
    pub fn is_empty(&self) -> bool {
        self.created.is_none() && self.last_modified.is_none() && self.metadata_last_updated.is_none()
    }
}

/// `contact` sub-object of a [`RepoRecord`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// The central entity of the whole system: one repository's catalog
/// record, as produced by a platform adapter and progressively mutated by
/// the classifier, organization resolver, labor estimator, and finalizer.
///
/// Fields prefixed `_transient_` in this struct are Rust's analogue of the
/// original tool's underscore-prefixed keys: carried through in-memory
/// processing, dropped before anything is written to disk. They're kept
/// out of (de)serialization entirely via `#[serde(skip)]` rather than
/// dropped in a cleanup pass, since Rust's type system can enforce "never
/// emitted" statically instead of relying on a recursive null-stripping
/// step the way the dict-based original does.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoRecord {
    pub name: String,
    pub organization: String,
    pub platform: Platform,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform_repo_id: Option<String>,
    #[serde(rename = "repositoryURL")]
    pub repository_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "homepageURL", skip_serializing_if = "Option::is_none")]
    pub homepage_url: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub vcs: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub languages: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(rename = "readmeURL", skip_serializing_if = "Option::is_none")]
    pub readme_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contract_number: Option<String>,
    #[serde(rename = "licenseURL", skip_serializing_if = "Option::is_none")]
    pub license_url: Option<String>,

    pub permissions: Permissions,

    #[serde(default, skip_serializing_if = "Dates::is_empty")]
    pub date: Dates,

    #[serde(default)]
    pub contact: Contact,

    pub status: RepoStatus,
    pub version: String,
    pub labor_hours: f64,

    /// Never serialized. Visibility drives the private/internal branches in
    /// the org resolver and finalizer but is not itself a catalog field.
    #[serde(skip)]
    pub visibility: Visibility,
    #[serde(skip)]
    pub fork: bool,
    #[serde(skip)]
    pub readme_content: Option<String>,
    #[serde(skip)]
    pub codeowners_content: Option<String>,

    /// Carried in an intermediate file so a later cache-hit run can replay
    /// the finalizer's status step without re-fetching; stripped by the
    /// merge phase so it never reaches the final catalog.
    #[serde(rename = "_statusFromReadme", skip_serializing_if = "Option::is_none", default)]
    pub status_from_readme: Option<RepoStatus>,
    #[serde(skip)]
    pub is_empty_repo: bool,
    #[serde(skip)]
    pub private_contact_emails: Vec<String>,
    #[serde(skip)]
    pub is_generic_organization: bool,

    /// Carried in an intermediate file as the cache key's freshness check
    /// (Invariant 6); stripped by the merge phase so it never reaches the
    /// final catalog.
    #[serde(rename = "_lastCommitSHA", skip_serializing_if = "Option::is_none", default)]
    pub last_commit_sha: Option<String>,

    /// Carried in an intermediate file so a cache-hit run can replay the
    /// finalizer's archived-wins-outright status rule without re-fetching;
    /// stripped by the merge phase so it never reaches the final catalog.
    #[serde(rename = "_archived", default)]
    pub archived: bool,
}

/// A lightweight entry emitted for a repository that failed processing, so
/// downstream tooling still sees it instead of silently losing a record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingErrorEntry {
    pub name: String,
    pub organization: String,
    pub processing_error: String,
}

/// Either a fully processed record or an error placeholder — the unit of
/// output for a target's intermediate file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CatalogEntry {
    Record(Box<RepoRecord>),
    Error(ProcessingErrorEntry),
}

/// `measurementType` sub-object of the final catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeasurementType {
    pub method: String,
}

impl Default for MeasurementType {
    fn default() -> Self {
        Self {
            method: "projects".to_string(),
        }
    }
}

/// The final merged `code.json` catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Catalog {
    pub version: String,
    pub agency: String,
    pub measurement_type: MeasurementType,
    pub projects: Vec<CatalogEntry>,
}

pub const CODE_JSON_SCHEMA_VERSION: &str = "2.0";

/// One row of the private-ID mapping CSV.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrivateIdRow {
    #[serde(rename = "PrivateID")]
    pub private_id: String,
    #[serde(rename = "RepositoryName")]
    pub repository_name: String,
    #[serde(rename = "RepositoryURL")]
    pub repository_url: String,
    #[serde(rename = "Organization")]
    pub organization: String,
    #[serde(rename = "ContactEmails")]
    pub contact_emails: String,
    #[serde(rename = "DateAdded")]
    pub date_added: DateTime<Utc>,
}

/// One row of the exemption log CSV.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExemptionLogRow {
    #[serde(rename = "privateID")]
    pub private_id: String,
    #[serde(rename = "repositoryName")]
    pub repository_name: String,
    pub reason: String,
    #[serde(rename = "usageType")]
    pub usage_type: String,
    #[serde(rename = "exemptionText")]
    pub exemption_text: String,
    pub timestamp: DateTime<Utc>,
}

/// Rate-limit status normalized across platforms by the rate-limit probe.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitStatus {
    pub remaining: u64,
    pub limit: u64,
    pub reset_at: DateTime<Utc>,
}

/// Typed fetch-failure taxonomy, replacing exception-as-control-flow:
/// the optional-content fetcher and retry helper match on these variants
/// directly rather than string-sniffing an error message.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("forbidden")]
    Forbidden,
    #[error("not found")]
    NotFound,
    #[error("empty repository")]
    EmptyRepo,
    #[error("rate limited")]
    RateLimited { retry_after: Option<std::time::Duration> },
    #[error("api error: {status} {body}")]
    ApiError { status: u16, body: String },
    #[error("unexpected: {0}")]
    Unexpected(String),
}

impl FetchError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, FetchError::RateLimited { .. })
    }

    pub fn retry_after(&self) -> Option<std::time::Duration> {
        match self {
            FetchError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// A lightweight repository descriptor returned by enumeration — enough to
/// make a peek-ahead decision before committing to a full metadata fetch.
#[derive(Debug, Clone)]
pub struct RepoStub {
    pub name: String,
    pub platform_repo_id: Option<String>,
    pub repository_url: String,
    pub organization_hint: String,
    pub visibility: Visibility,
    pub fork: bool,
    pub size_zero: bool,
    pub last_activity: Option<DateTime<Utc>>,
}

/// Per-author commit aggregation produced by the labor estimator.
#[derive(Debug, Clone, Default)]
pub struct AuthorSummary {
    pub commits: u64,
    pub first_commit: Option<DateTime<Utc>>,
    pub last_commit: Option<DateTime<Utc>>,
    pub estimated_hours: f64,
}

/// Map of `(author, email)` to aggregated commit stats, plus the derived
/// total used as the record's `laborHours`.
#[derive(Debug, Clone, Default)]
pub struct LaborSummary {
    pub by_author: BTreeMap<(String, String), AuthorSummary>,
}

impl LaborSummary {
    pub fn total_hours(&self) -> f64 {
        self.by_author.values().map(|a| a.estimated_hours).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_type_code_round_trips() {
        for ut in [
            UsageType::OpenSource,
            UsageType::GovernmentWideReuse,
            UsageType::ExemptByLaw,
            UsageType::ExemptByNationalSecurity,
            UsageType::ExemptByAgencySystem,
            UsageType::ExemptByMissionSystem,
            UsageType::ExemptByCio,
            UsageType::ExemptNonCode,
        ] {
            assert_eq!(UsageType::from_code(ut.as_code()), Some(ut));
        }
    }

    #[test]
    fn exempt_detection() {
        assert!(UsageType::ExemptByLaw.is_exempt());
        assert!(UsageType::ExemptNonCode.is_exempt());
        assert!(!UsageType::OpenSource.is_exempt());
        assert!(!UsageType::GovernmentWideReuse.is_exempt());
    }

    #[test]
    fn readme_status_marker_maps_active_to_maintained() {
        assert_eq!(
            RepoStatus::from_readme_marker("Active"),
            Some(RepoStatus::Maintained)
        );
        assert_eq!(RepoStatus::from_readme_marker("bogus"), None);
    }

    #[test]
    fn catalog_entry_error_variant_serializes_flat() {
        let entry = CatalogEntry::Error(ProcessingErrorEntry {
            name: "repo".into(),
            organization: "cdc".into(),
            processing_error: "boom".into(),
        });
        let v = serde_json::to_value(&entry).unwrap();
        assert_eq!(v["processing_error"], "boom");
    }
}
