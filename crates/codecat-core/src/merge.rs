//! Merge phase (§4.12): unions every target's intermediate file in the
//! output directory into the final `code.json` catalog, stamps
//! `date.metadataLastUpdated` on every successfully processed project,
//! strips the transient fields intermediates carry for cache round-tripping,
//! and backs up whatever catalog and side-cars existed before this run.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use codecat_config::Config;
use codecat_types::{Catalog, CatalogEntry, ExemptionLogRow, MeasurementType, PrivateIdRow, CODE_JSON_SCHEMA_VERSION};

/// Glob the output directory's `intermediate_*.json` files, union their
/// contents into the final catalog, and write `code.json` plus the two
/// side-car CSVs, backing up whatever was there before.
pub fn run(cfg: &Config, private_id_rows: Vec<PrivateIdRow>, exemption_rows: Vec<ExemptionLogRow>, now: DateTime<Utc>) -> anyhow::Result<PathBuf> {
    let output_dir = Path::new(&cfg.output_dir);
    std::fs::create_dir_all(output_dir)?;

    let mut projects = Vec::new();
    for path in intermediate_files(output_dir)? {
        let raw = std::fs::read_to_string(&path)?;
        let parsed: Vec<CatalogEntry> = serde_json::from_str(&raw)
            .map_err(|e| anyhow::anyhow!("failed to parse intermediate {}: {e}", path.display()))?;
        tracing::info!(path = %path.display(), projects = parsed.len(), "merged intermediate catalog");
        projects.extend(parsed);
    }

    for project in &mut projects {
        if let CatalogEntry::Record(record) = project {
            record.date.metadata_last_updated = Some(now);
            // Never emitted in the final catalog: cache-round-trip-only fields.
            record.last_commit_sha = None;
            record.status_from_readme = None;
            record.archived = false;
        }
    }

    let catalog = Catalog {
        version: CODE_JSON_SCHEMA_VERSION.to_string(),
        agency: cfg.agency_name.clone(),
        measurement_type: MeasurementType::default(),
        projects,
    };

    let catalog_path = output_dir.join(&cfg.catalog_json_file);
    backup_by_rename(&catalog_path, now)?;
    std::fs::write(&catalog_path, serde_json::to_string_pretty(&catalog)?)?;

    let private_id_path = output_dir.join(&cfg.private_id_csv_file);
    backup_by_copy(&private_id_path, now)?;
    write_csv(&private_id_path, &private_id_rows)?;

    let exempted_path = output_dir.join(&cfg.exempted_csv_file);
    backup_by_copy(&exempted_path, now)?;
    write_csv(&exempted_path, &exemption_rows)?;

    tracing::info!(path = %catalog_path.display(), projects = catalog.projects.len(), "wrote final catalog");
    Ok(catalog_path)
}

fn intermediate_files(output_dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    if !output_dir.exists() {
        return Ok(files);
    }
    for entry in std::fs::read_dir(output_dir)? {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else { continue };
        if name.starts_with("intermediate_") && name.ends_with(".json") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Back up the prior final catalog by renaming it aside with a timestamp —
/// the catalog is wholly regenerated each run, so there's nothing to
/// preserve in place.
fn backup_by_rename(path: &Path, now: DateTime<Utc>) -> anyhow::Result<()> {
    if path.exists() {
        std::fs::rename(path, timestamped_path(path, now))?;
    }
    Ok(())
}

/// Back up a side-car CSV by copying it aside — the side-car is accumulated
/// (not wholly regenerated) across runs, so the original must survive the
/// backup, not merely the pre-run snapshot.
fn backup_by_copy(path: &Path, now: DateTime<Utc>) -> anyhow::Result<()> {
    if path.exists() {
        std::fs::copy(path, timestamped_path(path, now))?;
    }
    Ok(())
}

fn timestamped_path(path: &Path, now: DateTime<Utc>) -> PathBuf {
    let stamp = now.format("%Y%m%dT%H%M%SZ");
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("backup");
    let ext = path.extension().and_then(|s| s.to_str());
    let file_name = match ext {
        Some(ext) => format!("{stem}.{stamp}.{ext}"),
        None => format!("{stem}.{stamp}"),
    };
    path.with_file_name(file_name)
}

fn write_csv<T: serde::Serialize>(path: &Path, rows: &[T]) -> anyhow::Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use codecat_types::{Contact, Dates, Permissions, Platform, ProcessingErrorEntry, RepoRecord, RepoStatus, UsageType, Visibility};
    use tempfile::tempdir;

    fn test_config(output_dir: &Path) -> Config {
        temp_env::with_vars(
            [
                ("OUTPUT_DIR", Some(output_dir.to_str().unwrap())),
                ("AGENCY_NAME", Some("CDC")),
            ],
            || Config::load().expect("config loads"),
        )
    }

    fn sample_record(name: &str) -> RepoRecord {
        RepoRecord {
            name: name.to_string(),
            organization: "cdc".into(),
            platform: Platform::Github,
            platform_repo_id: Some("1".into()),
            repository_url: "https://example.com/repo".into(),
            private_id: None,
            description: None,
            homepage_url: None,
            vcs: vec!["git".into()],
            languages: vec!["Rust".into()],
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
            status: RepoStatus::Maintained,
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
            last_commit_sha: Some("abc123".into()),
            archived: false,
        }
    }

    #[test]
    #[serial_test::serial]
    fn merges_intermediates_and_stamps_metadata_last_updated() {
        let dir = tempdir().unwrap();
        let cfg = test_config(dir.path());
        std::fs::create_dir_all(dir.path()).unwrap();

        let entries_a = vec![CatalogEntry::Record(Box::new(sample_record("repo-a")))];
        std::fs::write(dir.path().join("intermediate_github_org1.json"), serde_json::to_string(&entries_a).unwrap()).unwrap();
        let entries_b = vec![CatalogEntry::Error(ProcessingErrorEntry {
            name: "repo-b".into(),
            organization: "cdc".into(),
            processing_error: "boom".into(),
        })];
        std::fs::write(dir.path().join("intermediate_gitlab_org2.json"), serde_json::to_string(&entries_b).unwrap()).unwrap();

        let now = Utc.with_ymd_and_hms(2026, 7, 30, 12, 0, 0).unwrap();
        let catalog_path = run(&cfg, vec![], vec![], now).unwrap();

        let written = std::fs::read_to_string(&catalog_path).unwrap();
        let catalog: Catalog = serde_json::from_str(&written).unwrap();
        assert_eq!(catalog.version, CODE_JSON_SCHEMA_VERSION);
        assert_eq!(catalog.projects.len(), 2);

        let record_json = serde_json::to_value(&catalog.projects[0]).unwrap();
        assert!(!record_json.as_object().unwrap().contains_key("_lastCommitSHA"));
        assert!(!record_json.as_object().unwrap().contains_key("_archived"));
    }

    #[test]
    #[serial_test::serial]
    fn prior_catalog_is_backed_up_by_rename() {
        let dir = tempdir().unwrap();
        let cfg = test_config(dir.path());
        std::fs::create_dir_all(dir.path()).unwrap();
        std::fs::write(dir.path().join("code.json"), "{}").unwrap();

        let now = Utc.with_ymd_and_hms(2026, 7, 30, 12, 0, 0).unwrap();
        run(&cfg, vec![], vec![], now).unwrap();

        let backup = dir.path().join("code.20260730T120000Z.json");
        assert!(backup.exists());
    }

    #[test]
    #[serial_test::serial]
    fn prior_side_car_is_backed_up_by_copy_not_rename() {
        let dir = tempdir().unwrap();
        let cfg = test_config(dir.path());
        std::fs::create_dir_all(dir.path()).unwrap();
        let private_id_path = dir.path().join("privateid_mapping.csv");
        std::fs::write(&private_id_path, "PrivateID,RepositoryName,RepositoryURL,Organization,ContactEmails,DateAdded\n").unwrap();

        let now = Utc.with_ymd_and_hms(2026, 7, 30, 12, 0, 0).unwrap();
        run(&cfg, vec![], vec![], now).unwrap();

        let backup = dir.path().join("privateid_mapping.20260730T120000Z.csv");
        assert!(backup.exists());
        assert!(private_id_path.exists());
    }
}
