//! # Layered environment configuration
//!
//! [`Config`] assembles every tunable knob the orchestrator, classifier,
//! and finalizer read at runtime, following the original tool's
//! CLI-flag > `.env` > built-in-default precedence: [`Config::load`] loads
//! a `.env` file from the working directory via `dotenvy` (silently
//! ignoring a missing file, matching `dotenvy::dotenv().ok()`), then reads
//! every variable with [`std::env::var`], falling back to the documented
//! default. CLI flags win by being applied as `Option` overrides on top of
//! the loaded `Config` — see `codecat-cli` for the override glue.

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use codecat_types::Platform;

/// Every environment-driven setting the core crate consults. Fields are
/// grouped the way §6 of the spec groups them: output paths, URLs, target
/// lists, pacing knobs, AI knobs, labor/filter knobs, and worker count.
#[derive(Debug, Clone)]
pub struct Config {
    // --- Output ---
    pub output_dir: String,
    pub catalog_json_file: String,
    pub exempted_csv_file: String,
    pub private_id_csv_file: String,
    pub agency_name: String,

    // --- URLs / contacts ---
    pub instructions_url: Option<String>,
    pub exempted_notice_url: Option<String>,
    pub private_repo_contact_email: String,
    pub default_contact_email: String,

    // --- Targets (only used when a CLI subcommand omits its own flag) ---
    pub github_orgs: Vec<String>,
    pub gitlab_url: String,
    pub gitlab_groups: Vec<String>,
    pub azure_devops_org: Option<String>,
    pub azure_devops_api_url: String,
    pub azure_devops_targets: Vec<String>,

    // --- Pacing ---
    pub api_safety_factor: f64,
    pub min_inter_repo_delay_seconds: f64,
    pub max_inter_repo_delay_seconds: f64,
    pub peek_ahead_threshold_delay_seconds: f64,
    pub cache_hit_submission_delay_seconds: f64,
    pub dynamic_delay_threshold_repos: i64,
    pub dynamic_delay_scale_factor: f64,
    pub dynamic_delay_max_seconds: f64,
    pub github_post_api_call_delay_seconds: f64,
    pub gitlab_post_api_call_delay_seconds: f64,
    pub azure_post_api_call_delay_seconds: f64,

    // --- AI ---
    pub ai_enabled: bool,
    pub ai_model_name: String,
    pub ai_temperature: f64,
    pub ai_max_output_tokens: u32,
    pub max_tokens: u32,
    pub ai_delay_enabled: f64,
    pub ai_organization_enabled: bool,
    pub google_api_key: Option<String>,

    // --- Labor ---
    pub hours_per_commit: Option<f64>,
    pub estimated_labor_calls_per_repo: u32,

    // --- Filters ---
    pub fixed_private_repo_filter_date: DateTime<Utc>,
    pub repos_created_after_date: Option<DateTime<Utc>>,

    // --- Workers ---
    pub scanner_max_workers: u32,

    pub limit_number_of_repos: Option<u64>,
    pub disable_ssl_verification: bool,
}

const DEFAULT_FILTER_DATE: &str = "2021-04-21";

impl Config {
    /// Load a `.env` file (if present) then read every variable, falling
    /// back to the documented default. A malformed numeric/date value is a
    /// configuration error (distinct from the original Python tool's
    /// swallow-and-warn-then-default behavior): a catalog with a silently
    /// wrong safety factor is worse than a crash at startup.
    pub fn load() -> Result<Self> {
        let _ = dotenvy::dotenv();
        Self::from_env()
    }

    fn from_env() -> Result<Self> {
        Ok(Self {
            output_dir: env_or("OUTPUT_DIR", "output"),
            catalog_json_file: env_or("CATALOG_JSON_FILE", "code.json"),
            exempted_csv_file: env_or("EXEMPTED_CSV_FILE", "exempted_log.csv"),
            private_id_csv_file: env_or("PRIVATE_ID_CSV_FILE", "privateid_mapping.csv"),
            agency_name: env_or("AGENCY_NAME", "CDC"),

            instructions_url: env_opt("INSTRUCTIONS_PDF_URL"),
            exempted_notice_url: env_opt("EXEMPTED_NOTICE_PDF_URL"),
            private_repo_contact_email: env_or("PRIVATE_REPO_CONTACT_EMAIL", "shareit@cdc.gov"),
            default_contact_email: env_or("DEFAULT_CONTACT_EMAIL", "shareit@cdc.gov"),

            github_orgs: env_csv("GITHUB_ORGS"),
            gitlab_url: env_or("GITLAB_URL", "https://gitlab.com"),
            gitlab_groups: env_csv("GITLAB_GROUPS"),
            azure_devops_org: env_opt("AZURE_DEVOPS_ORG"),
            azure_devops_api_url: env_or("AZURE_DEVOPS_API_URL", "https://dev.azure.com"),
            azure_devops_targets: env_csv("AZURE_DEVOPS_TARGETS"),

            api_safety_factor: env_f64("API_SAFETY_FACTOR", 0.8)?,
            min_inter_repo_delay_seconds: env_f64("MIN_INTER_REPO_DELAY_SECONDS", 0.1)?,
            max_inter_repo_delay_seconds: env_f64("MAX_INTER_REPO_DELAY_SECONDS", 30.0)?,
            peek_ahead_threshold_delay_seconds: env_f64(
                "PEEK_AHEAD_THRESHOLD_DELAY_SECONDS",
                0.5,
            )?,
            cache_hit_submission_delay_seconds: env_f64(
                "CACHE_HIT_SUBMISSION_DELAY_SECONDS",
                0.05,
            )?,
            dynamic_delay_threshold_repos: env_i64("DYNAMIC_DELAY_THRESHOLD_REPOS", 100)?,
            dynamic_delay_scale_factor: env_f64("DYNAMIC_DELAY_SCALE_FACTOR", 1.5)?,
            dynamic_delay_max_seconds: env_f64("DYNAMIC_DELAY_MAX_SECONDS", 1.0)?,
            github_post_api_call_delay_seconds: env_f64(
                "GITHUB_POST_API_CALL_DELAY_SECONDS",
                0.1,
            )?,
            gitlab_post_api_call_delay_seconds: env_f64(
                "GITLAB_POST_API_CALL_DELAY_SECONDS",
                0.1,
            )?,
            azure_post_api_call_delay_seconds: env_f64(
                "AZURE_POST_API_CALL_DELAY_SECONDS",
                0.1,
            )?,

            ai_enabled: env_bool("AI_ENABLED", false),
            ai_model_name: env_or("AI_MODEL_NAME", "gemini-1.0-pro-latest"),
            ai_temperature: env_f64("AI_TEMPERATURE", 0.2)?,
            ai_max_output_tokens: env_u32("AI_MAX_OUTPUT_TOKENS", 2048)?,
            max_tokens: env_u32("MAX_TOKENS", 15000)?,
            ai_delay_enabled: env_f64("AI_DELAY_ENABLED", 0.0)?,
            ai_organization_enabled: env_bool("AI_ORGANIZATION_ENABLED", false),
            google_api_key: env_opt("GOOGLE_API_KEY"),

            hours_per_commit: match env_opt("HOURS_PER_COMMIT") {
                Some(s) => Some(
                    s.parse::<f64>()
                        .with_context(|| format!("invalid HOURS_PER_COMMIT value: '{s}'"))?,
                ),
                None => None,
            },
            estimated_labor_calls_per_repo: env_u32("ESTIMATED_LABOR_CALLS_PER_REPO", 3)?,

            fixed_private_repo_filter_date: parse_filter_date(&env_or(
                "FIXED_PRIVATE_REPO_FILTER_DATE",
                DEFAULT_FILTER_DATE,
            ))?,
            repos_created_after_date: match env_opt("REPOS_CREATED_AFTER_DATE") {
                Some(s) if !s.is_empty() => Some(parse_filter_date(&s)?),
                _ => None,
            },

            scanner_max_workers: {
                let w = env_u32("SCANNER_MAX_WORKERS", 5)?;
                if w == 0 { 5 } else { w }
            },

            limit_number_of_repos: {
                let n = env_i64("LIMIT_NUMBER_OF_REPOS", 0)?;
                if n <= 0 { None } else { Some(n as u64) }
            },
            disable_ssl_verification: env_bool("DISABLE_SSL_VERIFICATION", false),
        })
    }

    pub fn min_inter_repo_delay(&self) -> Duration {
        Duration::from_secs_f64(self.min_inter_repo_delay_seconds.max(0.0))
    }

    pub fn max_inter_repo_delay(&self) -> Duration {
        Duration::from_secs_f64(self.max_inter_repo_delay_seconds.max(0.0))
    }

    /// Per-platform post-call pacing delay (`<PLATFORM>_POST_API_CALL_DELAY_SECONDS`).
    pub fn post_api_call_delay_seconds(&self, platform: Platform) -> f64 {
        match platform {
            Platform::Github => self.github_post_api_call_delay_seconds,
            Platform::Gitlab => self.gitlab_post_api_call_delay_seconds,
            Platform::Azure => self.azure_post_api_call_delay_seconds,
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|s| !s.is_empty())
}

fn env_csv(key: &str) -> Vec<String> {
    std::env::var(key)
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(v) => v.eq_ignore_ascii_case("true"),
        Err(_) => default,
    }
}

fn env_f64(key: &str, default: f64) -> Result<f64> {
    match std::env::var(key) {
        Ok(v) => v
            .trim()
            .parse()
            .with_context(|| format!("invalid {key} value: '{v}'")),
        Err(_) => Ok(default),
    }
}

fn env_i64(key: &str, default: i64) -> Result<i64> {
    match std::env::var(key) {
        Ok(v) => v
            .trim()
            .parse()
            .with_context(|| format!("invalid {key} value: '{v}'")),
        Err(_) => Ok(default),
    }
}

fn env_u32(key: &str, default: u32) -> Result<u32> {
    match std::env::var(key) {
        Ok(v) => v
            .trim()
            .parse()
            .with_context(|| format!("invalid {key} value: '{v}'")),
        Err(_) => Ok(default),
    }
}

fn parse_filter_date(s: &str) -> Result<DateTime<Utc>> {
    let d = NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .with_context(|| format!("invalid date '{s}', expected YYYY-MM-DD"))?;
    let naive = d
        .and_hms_opt(0, 0, 0)
        .context("impossible midnight time")?;
    Ok(Utc.from_utc_datetime(&naive))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn defaults_load_without_any_env_set() {
        temp_env::with_vars_unset(
            [
                "OUTPUT_DIR",
                "AGENCY_NAME",
                "SCANNER_MAX_WORKERS",
                "API_SAFETY_FACTOR",
            ],
            || {
                let cfg = Config::from_env().unwrap();
                assert_eq!(cfg.output_dir, "output");
                assert_eq!(cfg.agency_name, "CDC");
                assert_eq!(cfg.scanner_max_workers, 5);
                assert_eq!(cfg.api_safety_factor, 0.8);
            },
        );
    }

    #[test]
    #[serial]
    fn env_vars_override_defaults() {
        temp_env::with_vars(
            [
                ("AGENCY_NAME", Some("HHS")),
                ("SCANNER_MAX_WORKERS", Some("12")),
                ("GITHUB_ORGS", Some("foo, bar ,baz")),
            ],
            || {
                let cfg = Config::from_env().unwrap();
                assert_eq!(cfg.agency_name, "HHS");
                assert_eq!(cfg.scanner_max_workers, 12);
                assert_eq!(cfg.github_orgs, vec!["foo", "bar", "baz"]);
            },
        );
    }

    #[test]
    #[serial]
    fn zero_scanner_workers_falls_back_to_five() {
        temp_env::with_var("SCANNER_MAX_WORKERS", Some("0"), || {
            let cfg = Config::from_env().unwrap();
            assert_eq!(cfg.scanner_max_workers, 5);
        });
    }

    #[test]
    #[serial]
    fn non_positive_repo_limit_means_no_limit() {
        temp_env::with_var("LIMIT_NUMBER_OF_REPOS", Some("-5"), || {
            let cfg = Config::from_env().unwrap();
            assert_eq!(cfg.limit_number_of_repos, None);
        });
    }

    #[test]
    #[serial]
    fn fixed_private_filter_date_defaults_to_spec_constant() {
        temp_env::with_var_unset("FIXED_PRIVATE_REPO_FILTER_DATE", || {
            let cfg = Config::from_env().unwrap();
            assert_eq!(
                cfg.fixed_private_repo_filter_date,
                parse_filter_date("2021-04-21").unwrap()
            );
        });
    }

    #[test]
    #[serial]
    fn malformed_numeric_env_is_a_config_error() {
        temp_env::with_var("API_SAFETY_FACTOR", Some("not-a-number"), || {
            assert!(Config::from_env().is_err());
        });
    }

    #[test]
    #[serial]
    fn post_api_call_delay_is_looked_up_per_platform() {
        temp_env::with_var("GITLAB_POST_API_CALL_DELAY_SECONDS", Some("0.5"), || {
            let cfg = Config::from_env().unwrap();
            assert_eq!(cfg.post_api_call_delay_seconds(Platform::Gitlab), 0.5);
            assert_eq!(cfg.post_api_call_delay_seconds(Platform::Github), 0.1);
        });
    }
}
