//! Per-target orchestrator (§4.11): enumerates one target, peeks the cache
//! to decide submission pacing and whether a repository needs any network
//! calls at all, fans work out across a bounded `std::thread` worker pool,
//! and writes the target's `intermediate_<platform>_<target>.json` file.
//!
//! The producer (this module's main loop) paces submissions one repository
//! at a time; workers run in chunks of `scanner_max_workers`, spawned with
//! [`std::thread::scope`] so they can borrow the adapter and shared services
//! directly instead of needing `Arc` clones.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use chrono::Utc;

use codecat_config::Config;
use codecat_retry::{calculate_dynamic_post_call_delay, calculate_inter_submission_delay, delay::should_use_cache_hit_delay};
use codecat_types::{
    CatalogEntry, Contact, Dates, LaborSummary, Permissions, Platform, ProcessingErrorEntry,
    RepoRecord, RepoStatus, RepoStub,
};

use crate::ai::{AiClassifier, AiInput};
use crate::cache::CacheStore;
use crate::classify::{self, ClassificationInput};
use crate::finalize::{
    build_exemption_row, clean_dates, derive_license_url, resolve_contact_email,
    resolve_final_organization, resolve_status, resolve_version, rewrite_private_url, ExemptionLog,
    PrivateIdManager,
};
use crate::labor::{self, CommitRecord};
use crate::org;
use crate::platform::{EnumerationFilters, PlatformAdapter};

/// How many commits the labor estimator pages through per repository.
const LABOR_COMMIT_CAP: u32 = 500;

/// Shared "stop after N repositories" counter (§5's debug/limit counter),
/// applied across every target a single CLI invocation scans. `None` means
/// unlimited.
#[derive(Debug)]
pub struct DebugLimiter {
    processed: AtomicU64,
    limit: Option<u64>,
}

impl DebugLimiter {
    pub fn new(limit: Option<u64>) -> Self {
        Self { processed: AtomicU64::new(0), limit }
    }

    /// Reserve one submission slot. `false` means the limit has already
    /// been reached; the caller should stop enumerating further repositories.
    fn try_acquire(&self) -> bool {
        let Some(limit) = self.limit else {
            self.processed.fetch_add(1, Ordering::Relaxed);
            return true;
        };
        let prev = self.processed.fetch_add(1, Ordering::Relaxed);
        if prev < limit {
            true
        } else {
            self.processed.fetch_sub(1, Ordering::Relaxed);
            false
        }
    }
}

/// Process-wide services shared across every target scanned in one run.
pub struct ScanServices<'a> {
    pub cfg: &'a Config,
    pub ai: &'a dyn AiClassifier,
    pub private_ids: &'a PrivateIdManager,
    pub exemptions: &'a ExemptionLog,
    pub want_labor_hours: bool,
    pub debug_limiter: &'a DebugLimiter,
}

/// Run one target end to end (§4.11 steps 1-7) and write its intermediate
/// file, returning the path written.
pub fn run_target(
    services: &ScanServices<'_>,
    adapter: &dyn PlatformAdapter,
    target: &str,
    output_dir: &Path,
) -> anyhow::Result<PathBuf> {
    let cfg = services.cfg;
    let platform = adapter.platform();

    let intermediate_path = output_dir.join(format!(
        "intermediate_{}_{}.json",
        platform.as_str(),
        sanitize_target(target)
    ));

    let cache = CacheStore::load(&intermediate_path, platform)?;

    let filters = EnumerationFilters {
        private_filter_date: cfg.fixed_private_repo_filter_date,
        created_after: cfg.repos_created_after_date,
        repo_limit: cfg.limit_number_of_repos,
    };
    let enumeration = adapter.enumerate_stubs(target, &filters)?;
    tracing::info!(platform = %platform, target, repos = enumeration.stubs.len(), "enumerated target");

    let status = adapter.probe_rate_limit();
    let base_delay = calculate_inter_submission_delay(
        status,
        enumeration.estimated_calls,
        cfg.scanner_max_workers,
        cfg.api_safety_factor,
        cfg.min_inter_repo_delay_seconds,
        cfg.max_inter_repo_delay_seconds,
    );
    let per_call_delay = calculate_dynamic_post_call_delay(
        cfg.post_api_call_delay_seconds(platform),
        Some(enumeration.stubs.len() as i64),
        cfg.dynamic_delay_threshold_repos,
        cfg.dynamic_delay_scale_factor,
        cfg.dynamic_delay_max_seconds,
        cfg.scanner_max_workers,
    );

    let mut entries: Vec<CatalogEntry> = Vec::new();
    let mut batch: Vec<(RepoStub, Option<String>, bool)> = Vec::new();

    for stub in enumeration.stubs {
        if !services.debug_limiter.try_acquire() {
            break;
        }

        let current = adapter.fetch_current_commit(&stub).unwrap_or(None);
        let current_sha = current.map(|c| c.sha);
        let is_empty = stub.size_zero || current_sha.is_none();

        let cache_key = cache_key_for(&stub, platform);
        let use_cache_hit_delay = !is_empty
            && cache_key
                .as_deref()
                .zip(current_sha.as_deref())
                .map(|(key, sha)| cache.matches_current_sha(key, sha))
                .unwrap_or(false)
            && should_use_cache_hit_delay(
                base_delay,
                cfg.peek_ahead_threshold_delay_seconds,
                current_sha.as_deref(),
                cache_key.as_deref().and_then(|k| cache.get(k)).and_then(|r| r.last_commit_sha.as_deref()),
            );
        let sleep_for = if use_cache_hit_delay { cfg.cache_hit_submission_delay_seconds } else { base_delay };
        if sleep_for > 0.0 {
            thread::sleep(Duration::from_secs_f64(sleep_for));
        }

        batch.push((stub, current_sha, is_empty));
        if batch.len() >= cfg.scanner_max_workers as usize {
            run_batch(&mut entries, std::mem::take(&mut batch), adapter, &cache, services, platform, per_call_delay);
        }
    }
    if !batch.is_empty() {
        run_batch(&mut entries, batch, adapter, &cache, services, platform, per_call_delay);
    }

    write_intermediate(&intermediate_path, &entries)?;
    tracing::info!(platform = %platform, target, written = entries.len(), path = %intermediate_path.display(), "wrote intermediate catalog");
    Ok(intermediate_path)
}

/// Run one chunk of at most `scanner_max_workers` repositories concurrently,
/// joining every thread before the producer resumes pacing submissions.
fn run_batch(
    entries: &mut Vec<CatalogEntry>,
    batch: Vec<(RepoStub, Option<String>, bool)>,
    adapter: &dyn PlatformAdapter,
    cache: &CacheStore,
    services: &ScanServices<'_>,
    platform: Platform,
    per_call_delay: f64,
) {
    let results: Vec<CatalogEntry> = thread::scope(|scope| {
        let handles: Vec<_> = batch
            .into_iter()
            .map(|(stub, current_sha, is_empty)| {
                scope.spawn(move || {
                    let cache_key = cache_key_for(&stub, platform);
                    let cached = cache_key
                        .as_deref()
                        .zip(current_sha.as_deref())
                        .filter(|(key, sha)| cache.matches_current_sha(key, sha))
                        .and_then(|(key, _)| cache.get(key));
                    process_one(stub, current_sha, is_empty, adapter, cached, services, platform, per_call_delay)
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| {
                h.join().unwrap_or_else(|_| {
                    CatalogEntry::Error(ProcessingErrorEntry {
                        name: "unknown".to_string(),
                        organization: "unknown".to_string(),
                        processing_error: "worker thread panicked".to_string(),
                    })
                })
            })
            .collect()
    });
    entries.extend(results);
}

fn process_one(
    stub: RepoStub,
    current_sha: Option<String>,
    is_empty: bool,
    adapter: &dyn PlatformAdapter,
    cached: Option<&RepoRecord>,
    services: &ScanServices<'_>,
    platform: Platform,
    per_call_delay: f64,
) -> CatalogEntry {
    let repo_name = stub.name.clone();
    let organization_hint = stub.organization_hint.clone();
    match process_repository(stub, current_sha, is_empty, adapter, cached, services, platform, per_call_delay) {
        Ok(record) => CatalogEntry::Record(Box::new(record)),
        Err(err) => {
            tracing::warn!(repo = %repo_name, error = %err, "repository processing failed");
            CatalogEntry::Error(ProcessingErrorEntry {
                name: repo_name,
                organization: organization_hint,
                processing_error: err.to_string(),
            })
        }
    }
}

/// §4.11 step 6: the worker body. A cache hit replays the finalizer on the
/// previously emitted record without any new network calls; a cache miss
/// fetches full metadata and runs the whole classification pipeline.
fn process_repository(
    stub: RepoStub,
    current_sha: Option<String>,
    is_empty: bool,
    adapter: &dyn PlatformAdapter,
    cached: Option<&RepoRecord>,
    services: &ScanServices<'_>,
    platform: Platform,
    per_call_delay: f64,
) -> anyhow::Result<RepoRecord> {
    if let Some(cached) = cached {
        return finalize_record(build_cache_hit_record(&stub, cached, current_sha), services, platform);
    }

    let cfg = services.cfg;
    let mut pre_delay = || {
        if per_call_delay > 0.0 {
            thread::sleep(Duration::from_secs_f64(per_call_delay));
        }
    };

    let meta = adapter.fetch_metadata(&stub)?;

    let (readme_text, readme_url, readme_empty) = if is_empty {
        (None, None, true)
    } else {
        let result = adapter.fetch_readme(&stub, &meta.default_branch, &mut pre_delay);
        match result.content {
            Some((text, url)) => (Some(text), url, result.is_empty_repo),
            None => (None, None, result.is_empty_repo),
        }
    };

    let (codeowners_text, codeowners_empty) = if is_empty {
        (None, true)
    } else {
        let result = adapter.fetch_codeowners(&stub, &meta.default_branch, &mut pre_delay);
        (result.content, result.is_empty_repo)
    };

    let is_empty_repo = is_empty || readme_empty || codeowners_empty;

    let markers = readme_text.as_deref().map(classify::parse_readme_markers).unwrap_or_default();

    let labor_summary = if services.want_labor_hours && !is_empty_repo {
        let commits = adapter.fetch_commit_history(&stub, &meta.default_branch, LABOR_COMMIT_CAP)?;
        labor::estimate_labor(&commits, cfg.hours_per_commit.unwrap_or(labor::DEFAULT_HOURS_PER_COMMIT))
    } else {
        LaborSummary::default()
    };
    let labor_hours = labor::resolve_labor_hours(markers.labor_hours, &labor_summary);

    let has_license = meta.license.is_some();
    let classification_input = ClassificationInput {
        repo_name: &stub.name,
        description: meta.description.as_deref().unwrap_or_default(),
        languages: &meta.languages,
        readme: readme_text.as_deref(),
        markers: &markers,
        visibility: meta.visibility,
        has_license,
        is_empty_repo,
    };
    let classification = classify::classify(&classification_input, services.ai, None);

    let default_identifiers = vec!["unknownorg".to_string(), stub.organization_hint.to_ascii_lowercase()];
    let ai_org = if cfg.ai_organization_enabled {
        let known: Vec<&str> = org::KNOWN_ORGANIZATIONS.iter().map(|(_, full)| *full).collect();
        let ai_input = AiInput {
            repo_name: stub.name.clone(),
            description: meta.description.clone().unwrap_or_default(),
            languages: meta.languages.clone(),
            readme: readme_text.clone().unwrap_or_default(),
        };
        services.ai.infer_organization(&ai_input, &known)
    } else {
        None
    };
    let org_resolution = org::resolve(
        &stub.name,
        &stub.organization_hint,
        readme_text.as_deref(),
        ai_org.as_deref(),
        &default_identifiers,
    );

    let license_url = readme_url.as_deref().and_then(|url| if has_license { derive_license_url(url) } else { None });

    let private_contact_emails = markers.contacts.clone();
    let contact_email = resolve_contact_email(cfg, meta.visibility, &private_contact_emails, codeowners_text.as_deref(), readme_text.as_deref());

    let record = RepoRecord {
        name: stub.name.clone(),
        organization: org_resolution.organization,
        platform,
        platform_repo_id: stub.platform_repo_id.clone(),
        repository_url: stub.repository_url.clone(),
        private_id: None,
        description: meta.description.clone(),
        homepage_url: meta.homepage_url.clone(),
        vcs: vec!["git".to_string()],
        languages: meta.languages.clone(),
        tags: meta.tags.clone(),
        readme_url,
        contract_number: markers.contract_number.clone(),
        license_url,
        permissions: Permissions {
            usage_type: classification.usage_type,
            exemption_text: if classification.exemption_text.is_empty() { None } else { Some(classification.exemption_text) },
            licenses: meta.license.clone().into_iter().collect(),
        },
        date: Dates {
            created: meta.created_at,
            last_modified: meta.last_modified,
            metadata_last_updated: None,
        },
        contact: Contact { email: Some(contact_email), name: None },
        status: RepoStatus::Development,
        version: markers.version.clone().unwrap_or_else(|| "N/A".to_string()),
        labor_hours,
        visibility: meta.visibility,
        fork: stub.fork,
        readme_content: readme_text,
        codeowners_content: codeowners_text,
        status_from_readme: markers.status.as_deref().and_then(RepoStatus::from_readme_marker),
        is_empty_repo,
        private_contact_emails,
        is_generic_organization: org_resolution.is_generic_organization,
        last_commit_sha: current_sha,
        archived: meta.archived,
    };

    finalize_record(record, services, platform)
}

/// A cache hit needs no new fetches: every catalog field is reused from the
/// previously emitted record, re-pointed at the current enumeration's stub
/// (name/URL/visibility can change without the repository's content
/// changing) and the freshly observed commit SHA.
fn build_cache_hit_record(stub: &RepoStub, cached: &RepoRecord, current_sha: Option<String>) -> RepoRecord {
    let mut record = cached.clone();
    record.name = stub.name.clone();
    record.repository_url = stub.repository_url.clone();
    if stub.platform_repo_id.is_some() {
        record.platform_repo_id = stub.platform_repo_id.clone();
    }
    record.visibility = stub.visibility;
    record.fork = stub.fork;
    record.last_commit_sha = current_sha;
    record.private_id = None;
    record
}

/// §4.10 steps 1-4, 6-8: the part of the finalizer that runs regardless of
/// whether the record came from a fresh fetch or a cache hit. Steps 9-10
/// (contact/license resolution) already ran when the record was built,
/// since a cache hit has no new README/CODEOWNERS content to resolve them
/// against.
fn finalize_record(mut record: RepoRecord, services: &ScanServices<'_>, platform: Platform) -> anyhow::Result<RepoRecord> {
    let cfg = services.cfg;

    if record.visibility.is_private_or_internal() {
        let private_id = services.private_ids.get_or_create(
            platform,
            record.platform_repo_id.as_deref(),
            &record.organization,
            &record.name,
            &record.repository_url,
            &record.private_contact_emails,
        );
        record.private_id = Some(private_id);
        record.repository_url = rewrite_private_url(cfg, record.permissions.usage_type)?;
        record.contact.email = Some(cfg.private_repo_contact_email.clone());
    }

    if let Some(row) = build_exemption_row(&record) {
        services.exemptions.append(row);
    }

    record.status = resolve_status(record.archived, record.status_from_readme, record.date.last_modified, Utc::now());
    record.version = resolve_version(&record.version, &record.tags);
    record.date = clean_dates(record.date);
    record.organization = resolve_final_organization(&record.organization, record.is_generic_organization, &cfg.agency_name);

    Ok(record)
}

/// The cache key an orchestrated stub resolves to, mirroring [`cache`]'s own
/// key derivation from a loaded record: `platformRepoId` when present, else
/// `"<org>/<name>"` on GitHub (the only platform whose enumeration ever
/// omits a stable numeric id).
fn cache_key_for(stub: &RepoStub, platform: Platform) -> Option<String> {
    if let Some(id) = &stub.platform_repo_id {
        return Some(id.clone());
    }
    if platform == Platform::Github {
        return Some(format!("{}/{}", stub.organization_hint, stub.name));
    }
    None
}

/// Turn a target string into a filesystem-safe intermediate-file component,
/// replacing anything that isn't alphanumeric/`-`/`_` (notably Azure DevOps's
/// `Org/Project` slash) with an underscore.
fn sanitize_target(target: &str) -> String {
    target
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

fn write_intermediate(path: &Path, entries: &[CatalogEntry]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(entries)?;
    std::fs::write(path, json)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use codecat_types::Visibility;

    #[test]
    fn debug_limiter_unlimited_always_acquires() {
        let limiter = DebugLimiter::new(None);
        for _ in 0..50 {
            assert!(limiter.try_acquire());
        }
    }

    #[test]
    fn debug_limiter_stops_at_limit() {
        let limiter = DebugLimiter::new(Some(2));
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }

    #[test]
    fn sanitize_target_replaces_azure_slash() {
        assert_eq!(sanitize_target("MyOrg/MyProject"), "MyOrg_MyProject");
    }

    #[test]
    fn sanitize_target_leaves_plain_org_unchanged() {
        assert_eq!(sanitize_target("cdcent"), "cdcent");
    }

    #[test]
    fn cache_key_prefers_platform_repo_id() {
        let stub = RepoStub {
            name: "repo".into(),
            platform_repo_id: Some("42".into()),
            repository_url: "https://example.com/repo".into(),
            organization_hint: "org".into(),
            visibility: Visibility::Public,
            fork: false,
            size_zero: false,
            last_activity: None,
        };
        assert_eq!(cache_key_for(&stub, Platform::Gitlab), Some("42".to_string()));
    }

    #[test]
    fn cache_key_falls_back_for_github_without_id() {
        let stub = RepoStub {
            name: "repo".into(),
            platform_repo_id: None,
            repository_url: "https://example.com/repo".into(),
            organization_hint: "org".into(),
            visibility: Visibility::Public,
            fork: false,
            size_zero: false,
            last_activity: None,
        };
        assert_eq!(cache_key_for(&stub, Platform::Github), Some("org/repo".to_string()));
        assert_eq!(cache_key_for(&stub, Platform::Gitlab), None);
    }
}
