mod progress;

use std::path::Path;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use codecat_config::Config;
use codecat_core::ai::{AiAutoDisabled, AiClassifier, GeminiAiClassifier, NoopAiClassifier};
use codecat_core::finalize::{ExemptionLog, PrivateIdManager};
use codecat_core::merge;
use codecat_core::orchestrate::{self, DebugLimiter, ScanServices};
use codecat_core::platform::{AzureAdapter, AzureAuth, GithubAdapter, GitlabAdapter};
use codecat_core::PlatformAdapter;
use codecat_types::{ExemptionLogRow, PrivateIdRow};

use crate::progress::ScanProgress;

#[derive(Parser, Debug)]
#[command(name = "codecat", version)]
#[command(about = "Inventories GitHub/GitLab/Azure DevOps repositories into a code.json compliance catalog")]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Scan one or more GitHub organizations.
    Github(GithubArgs),
    /// Scan one or more GitLab groups (subgroup-inclusive).
    Gitlab(GitlabArgs),
    /// Scan one or more Azure DevOps `Organization/Project` targets.
    Azure(AzureArgs),
    /// Merge every target's intermediate file into the final catalog.
    Merge,
}

#[derive(Args, Debug)]
struct GithubArgs {
    /// Comma-separated GitHub organizations to scan.
    #[arg(long, value_delimiter = ',')]
    orgs: Vec<String>,

    /// GitHub Enterprise Server API root (defaults to https://api.github.com).
    #[arg(long = "github-ghes-url")]
    github_ghes_url: Option<String>,

    /// GitHub personal access token / installation token.
    #[arg(long = "gh-tk")]
    gh_tk: String,

    /// Stop after this many repositories across all targets in this invocation. N <= 0 means no limit.
    #[arg(long)]
    limit: Option<i64>,
}

#[derive(Args, Debug)]
struct GitlabArgs {
    /// Comma-separated GitLab groups to scan (subgroup-inclusive).
    #[arg(long, value_delimiter = ',')]
    groups: Vec<String>,

    /// GitLab base URL (defaults to https://gitlab.com).
    #[arg(long = "gitlab-url")]
    gitlab_url: Option<String>,

    /// GitLab personal access token.
    #[arg(long = "gl-tk")]
    gl_tk: String,

    #[arg(long)]
    limit: Option<i64>,
}

#[derive(Args, Debug)]
struct AzureArgs {
    /// Comma-separated `Organization/Project` targets.
    #[arg(long, value_delimiter = ',')]
    targets: Vec<String>,

    /// Personal access token (mutually exclusive with the service-principal flags).
    #[arg(long = "az-tk")]
    az_tk: Option<String>,

    /// Service-principal client ID.
    #[arg(long = "az-cid")]
    az_cid: Option<String>,

    /// Service-principal client secret.
    #[arg(long = "az-cs")]
    az_cs: Option<String>,

    /// Service-principal tenant ID.
    #[arg(long = "az-tid")]
    az_tid: Option<String>,

    #[arg(long)]
    limit: Option<i64>,
}

/// Azure DevOps' fixed application ID resource, requested as the OAuth2
/// client-credentials scope when authenticating with a service principal.
const AZURE_DEVOPS_RESOURCE_SCOPE: &str = "499b84ac-1321-427f-aa17-267ca6975798/.default";

fn main() -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let cfg = Config::load().context("loading configuration")?;

    let had_errors = match cli.cmd {
        Commands::Github(args) => run_github(&cfg, args)?,
        Commands::Gitlab(args) => run_gitlab(&cfg, args)?,
        Commands::Azure(args) => run_azure(&cfg, args)?,
        Commands::Merge => {
            run_merge(&cfg)?;
            false
        }
    };

    if had_errors {
        std::process::exit(1);
    }
    Ok(())
}

/// `N <= 0` means "no limit", per the CLI's shared `--limit` convention.
fn resolve_limit(flag: Option<i64>, cfg: &Config) -> Option<u64> {
    match flag {
        Some(n) if n > 0 => Some(n as u64),
        Some(_) => None,
        None => cfg.limit_number_of_repos,
    }
}

fn build_ai_classifier<'a>(cfg: &'a Config, auto_disabled: &'a AiAutoDisabled) -> Result<Box<dyn AiClassifier + 'a>> {
    if cfg.disable_ssl_verification {
        tracing::warn!("DISABLE_SSL_VERIFICATION is set; disabling the AI classifier for this run");
        auto_disabled.disable();
    }
    if !cfg.ai_enabled {
        return Ok(Box::new(NoopAiClassifier));
    }
    Ok(Box::new(GeminiAiClassifier::new(cfg, auto_disabled)?))
}

fn load_private_id_rows(path: &Path) -> Result<Vec<PrivateIdRow>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let mut reader = csv::Reader::from_path(path).with_context(|| format!("reading {}", path.display()))?;
    reader.deserialize().collect::<Result<Vec<PrivateIdRow>, _>>().context("parsing private-ID mapping CSV")
}

fn load_exemption_rows(path: &Path) -> Result<Vec<ExemptionLogRow>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let mut reader = csv::Reader::from_path(path).with_context(|| format!("reading {}", path.display()))?;
    reader.deserialize().collect::<Result<Vec<ExemptionLogRow>, _>>().context("parsing exemption log CSV")
}

fn write_csv<T: serde::Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = csv::Writer::from_path(path)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

/// Shared end-of-run bookkeeping for every scan subcommand: persist the
/// accumulated private-ID mapping and exemption log back to disk. Both
/// side-cars hold the full accumulated state (old rows loaded at startup
/// plus anything appended this run), so this is a plain overwrite, not an
/// append.
fn persist_side_cars(cfg: &Config, private_ids: PrivateIdManager, exemptions: ExemptionLog) -> Result<()> {
    let private_id_path = Path::new(&cfg.output_dir).join(&cfg.private_id_csv_file);
    write_csv(&private_id_path, &private_ids.to_rows())?;

    let exempted_path = Path::new(&cfg.output_dir).join(&cfg.exempted_csv_file);
    write_csv(&exempted_path, &exemptions.into_rows())?;
    Ok(())
}

fn run_github(cfg: &Config, args: GithubArgs) -> Result<bool> {
    if args.orgs.is_empty() {
        anyhow::bail!("github subcommand requires --orgs");
    }
    let api_base = args.github_ghes_url.as_deref().unwrap_or("https://api.github.com");
    let adapter = GithubAdapter::new(&args.gh_tk, api_base, true)?;
    let limit = resolve_limit(args.limit, cfg);
    run_targets(cfg, &adapter, &args.orgs, limit)
}

fn run_gitlab(cfg: &Config, args: GitlabArgs) -> Result<bool> {
    if args.groups.is_empty() {
        anyhow::bail!("gitlab subcommand requires --groups");
    }
    let base_url = args.gitlab_url.as_deref().unwrap_or(&cfg.gitlab_url);
    let adapter = GitlabAdapter::new(&args.gl_tk, base_url, true)?;
    let limit = resolve_limit(args.limit, cfg);
    run_targets(cfg, &adapter, &args.groups, limit)
}

fn run_azure(cfg: &Config, args: AzureArgs) -> Result<bool> {
    if args.targets.is_empty() {
        anyhow::bail!("azure subcommand requires --targets");
    }
    let auth_token = resolve_azure_token(&args)?;

    let output_dir = Path::new(&cfg.output_dir);
    std::fs::create_dir_all(output_dir)?;

    let auto_disabled = AiAutoDisabled::new();
    let ai = build_ai_classifier(cfg, &auto_disabled)?;
    let private_id_path = output_dir.join(&cfg.private_id_csv_file);
    let exempted_path = output_dir.join(&cfg.exempted_csv_file);
    let private_ids = PrivateIdManager::load_from_rows(load_private_id_rows(&private_id_path)?);
    let exemptions = ExemptionLog::load_from_rows(load_exemption_rows(&exempted_path)?);
    let debug_limiter = DebugLimiter::new(resolve_limit(args.limit, cfg));

    let services = ScanServices {
        cfg,
        ai: ai.as_ref(),
        private_ids: &private_ids,
        exemptions: &exemptions,
        want_labor_hours: true,
        debug_limiter: &debug_limiter,
    };

    let mut had_errors = false;
    let mut progress = ScanProgress::new(args.targets.len());
    for target in &args.targets {
        progress.start_target("azure", target);
        let auth = auth_token.to_auth();
        let adapter = match AzureAdapter::new(target, auth, true) {
            Ok(a) => a,
            Err(e) => {
                tracing::error!(platform = "azure", target, error = %e, "failed to construct adapter for target");
                had_errors = true;
                continue;
            }
        };
        let span = tracing::info_span!("scan_target", platform = "azure", target = %target);
        let _guard = span.enter();
        if let Err(e) = orchestrate::run_target(&services, &adapter, target, output_dir) {
            tracing::error!(platform = "azure", target, error = %e, "target scan failed");
            had_errors = true;
        }
    }
    progress.finish();

    persist_side_cars(cfg, private_ids, exemptions)?;
    Ok(had_errors)
}

/// Holds the resolved Azure credential so a fresh [`AzureAuth`] can be
/// constructed per target without re-running the OAuth2 exchange.
enum AzureToken {
    Pat(String),
    Bearer(String),
}

impl AzureToken {
    fn to_auth(&self) -> AzureAuth {
        match self {
            AzureToken::Pat(t) => AzureAuth::Pat(t.clone()),
            AzureToken::Bearer(t) => AzureAuth::Bearer(t.clone()),
        }
    }
}

fn resolve_azure_token(args: &AzureArgs) -> Result<AzureToken> {
    if let Some(pat) = &args.az_tk {
        return Ok(AzureToken::Pat(pat.clone()));
    }
    let (Some(client_id), Some(client_secret), Some(tenant_id)) = (&args.az_cid, &args.az_cs, &args.az_tid) else {
        anyhow::bail!("azure subcommand requires either --az-tk, or --az-cid/--az-cs/--az-tid together");
    };
    let token = fetch_service_principal_token(client_id, client_secret, tenant_id)?;
    Ok(AzureToken::Bearer(token))
}

#[derive(serde::Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// OAuth2 client-credentials exchange against Azure AD, trading a service
/// principal's secret for a bearer token scoped to the Azure DevOps resource.
fn fetch_service_principal_token(client_id: &str, client_secret: &str, tenant_id: &str) -> Result<String> {
    let url = format!("https://login.microsoftonline.com/{tenant_id}/oauth2/v2.0/token");
    let http = reqwest::blocking::Client::builder().timeout(std::time::Duration::from_secs(30)).build()?;
    let resp = http
        .post(&url)
        .form(&[
            ("client_id", client_id),
            ("client_secret", client_secret),
            ("scope", &AZURE_DEVOPS_RESOURCE_SCOPE.to_string()),
            ("grant_type", &"client_credentials".to_string()),
        ])
        .send()
        .context("requesting Azure AD service-principal token")?;
    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().unwrap_or_default();
        anyhow::bail!("Azure AD token request failed ({status}): {body}");
    }
    let parsed: TokenResponse = resp.json().context("parsing Azure AD token response")?;
    Ok(parsed.access_token)
}

fn run_targets(cfg: &Config, adapter: &dyn PlatformAdapter, targets: &[String], limit: Option<u64>) -> Result<bool> {
    let output_dir = Path::new(&cfg.output_dir);
    std::fs::create_dir_all(output_dir)?;

    let auto_disabled = AiAutoDisabled::new();
    let ai = build_ai_classifier(cfg, &auto_disabled)?;
    let private_id_path = output_dir.join(&cfg.private_id_csv_file);
    let exempted_path = output_dir.join(&cfg.exempted_csv_file);
    let private_ids = PrivateIdManager::load_from_rows(load_private_id_rows(&private_id_path)?);
    let exemptions = ExemptionLog::load_from_rows(load_exemption_rows(&exempted_path)?);
    let debug_limiter = DebugLimiter::new(limit);

    let services = ScanServices {
        cfg,
        ai: ai.as_ref(),
        private_ids: &private_ids,
        exemptions: &exemptions,
        want_labor_hours: true,
        debug_limiter: &debug_limiter,
    };

    let platform = adapter.platform();
    let mut had_errors = false;
    let mut progress = ScanProgress::new(targets.len());
    for target in targets {
        progress.start_target(platform.as_str(), target);
        let span = tracing::info_span!("scan_target", platform = %platform, target = %target);
        let _guard = span.enter();
        if let Err(e) = orchestrate::run_target(&services, adapter, target, output_dir) {
            tracing::error!(platform = %platform, target, error = %e, "target scan failed");
            had_errors = true;
        }
    }
    progress.finish();

    persist_side_cars(cfg, private_ids, exemptions)?;
    Ok(had_errors)
}

fn run_merge(cfg: &Config) -> Result<()> {
    let output_dir = Path::new(&cfg.output_dir);
    let private_id_path = output_dir.join(&cfg.private_id_csv_file);
    let exempted_path = output_dir.join(&cfg.exempted_csv_file);
    let private_id_rows = load_private_id_rows(&private_id_path)?;
    let exemption_rows = load_exemption_rows(&exempted_path)?;

    let catalog_path = merge::run(cfg, private_id_rows, exemption_rows, chrono::Utc::now())?;
    println!("wrote {}", catalog_path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_limit_treats_non_positive_flag_as_unlimited() {
        let cfg = test_config();
        assert_eq!(resolve_limit(Some(0), &cfg), None);
        assert_eq!(resolve_limit(Some(-5), &cfg), None);
        assert_eq!(resolve_limit(Some(7), &cfg), Some(7));
    }

    #[test]
    #[serial_test::serial]
    fn resolve_limit_falls_back_to_config_when_flag_absent() {
        let cfg = test_config();
        assert_eq!(resolve_limit(None, &cfg), cfg.limit_number_of_repos);
    }

    fn test_config() -> Config {
        temp_env::with_vars([("LIMIT_NUMBER_OF_REPOS", Some("42"))], || Config::load().expect("config loads"))
    }

    #[test]
    fn load_private_id_rows_returns_empty_for_missing_file() {
        let rows = load_private_id_rows(Path::new("/nonexistent/privateid_mapping.csv")).expect("missing file is not an error");
        assert!(rows.is_empty());
    }

    #[test]
    fn load_exemption_rows_returns_empty_for_missing_file() {
        let rows = load_exemption_rows(Path::new("/nonexistent/exempted_log.csv")).expect("missing file is not an error");
        assert!(rows.is_empty());
    }
}
