//! Organization resolver: programmatic acronym match → README marker → AI
//! inference → canonicalization → generic-organization flag.
//!
//! Grounded on the source agency's real acronym table (see
//! `utils/exemption_processor.py::KNOWN_CDC_ORGANIZATIONS` in
//! `original_source/`), kept verbatim rather than genericized per
//! DESIGN.md. The programmatic match and the full-name reverse lookup also
//! replicate that file's tie-break rules — longest-acronym-wins and
//! last-declared-duplicate-wins respectively — see `programmatic_match` and
//! `acronym_for_full_name`.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

/// Acronym (lowercase) → canonical full organization name. `cdc` is
/// deliberately last so org-specific acronyms win reverse lookups before
/// falling back to the blanket agency name.
pub static KNOWN_ORGANIZATIONS: LazyLock<Vec<(&'static str, &'static str)>> = LazyLock::new(|| {
    vec![
        ("od", "Office of the Director"),
        ("om", "Office of Mission Support"),
        ("ocoo", "Office of the Chief Operating Officer"),
        ("oadc", "Office of the Associate Directory of Communications"),
        ("ocio", "Office of the Chief Information Officer"),
        (
            "oed",
            "Office of Equal Employment Opportunity and Workplace Equity",
        ),
        ("oga", "Office of Global Affairs"),
        ("ohs", "Office of Health Equity"),
        ("opa", "Office of Policy, Performance, and Evaluation"),
        (
            "ostlts",
            "Office of State, Tribal, Local and Territorial Support",
        ),
        ("owcd", "Office of Women's Health and Health Equity"),
        (
            "csels",
            "Center for Surveillance, Epidemiology, and Laboratory Services",
        ),
        (
            "ddphss",
            "Deputy Director for Public Health Science and Surveillance",
        ),
        ("cgh", "Center for Global Health"),
        ("cid", "Center for Preparedness and Response"),
        ("cpr", "Center for Preparedness and Response"),
        (
            "ncezid",
            "National Center for Emerging and Zoonotic Infectious Diseases",
        ),
        (
            "ncird",
            "National Center for Immunization and Respiratory Diseases",
        ),
        (
            "nchhstp",
            "National Center for HIV, Viral Hepatitis, STD, and TB Prevention",
        ),
        (
            "nccdphp",
            "National Center for Chronic Disease Prevention and Health Promotion",
        ),
        ("nceh", "National Center for Environmental Health"),
        ("atsdr", "Agency for Toxic Substances and Disease Registry"),
        (
            "ncipc",
            "National Center for Injury Prevention and Control",
        ),
        (
            "ncbddd",
            "National Center on Birth Defects and Developmental Disabilities",
        ),
        ("nchs", "National Center for Health Statistics"),
        (
            "niosh",
            "National Institute for Occupational Safety and Health",
        ),
        ("ddid", "Deputy Director for Infectious Diseases"),
        ("ddnidd", "Deputy Director for Non-Infectious Diseases"),
        ("cfa", "Center for Forecasting and Outbreak Analytics"),
        (
            "ophdst",
            "Office of Public Health Data, Surveillance, and Technology",
        ),
        ("amd", "Office of Advanced Molecular Detection"),
        ("oamd", "Office of Advanced Molecular Detection"),
        ("cdc", "Centers for Disease Control and Prevention"),
    ]
});

fn full_name_for_acronym(acronym: &str) -> Option<&'static str> {
    KNOWN_ORGANIZATIONS
        .iter()
        .find(|(a, _)| *a == acronym.to_ascii_lowercase())
        .map(|(_, full)| *full)
}

/// Reverse lookup: full name (case-insensitive) → acronym. For a full name
/// declared under more than one acronym (`cid`/`cpr`, `amd`/`oamd`), the
/// **last**-declared acronym wins — mirroring the source tool's
/// `{v.lower(): k for k, v in KNOWN_CDC_ORGANIZATIONS.items()}` reverse-map
/// dict comprehension, where a later key overwrites an earlier one mapped to
/// the same value.
fn acronym_for_full_name(full_name: &str) -> Option<&'static str> {
    let needle = full_name.to_ascii_lowercase();
    KNOWN_ORGANIZATIONS
        .iter()
        .rev()
        .find(|(_, full)| full.to_ascii_lowercase() == needle)
        .map(|(acronym, _)| *acronym)
}

static ORGANIZATION_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?im)^\s*Organization:\s*(.+)$").unwrap());

fn parse_readme_for_organization(readme: &str) -> Option<String> {
    ORGANIZATION_MARKER
        .captures(readme)
        .map(|c| c[1].trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Whether `value` should be treated as a generic/unresolved organization
/// placeholder rather than a real assignment.
pub fn is_generic(value: &str, default_identifiers: &[String]) -> bool {
    let lower = value.to_ascii_lowercase();
    lower == "unknownorg" || default_identifiers.iter().any(|d| d.to_ascii_lowercase() == lower)
}

/// Acronyms paired with a compiled word-boundary pattern, sorted
/// longest-acronym-first (ties keep the table's declared order, since
/// `sort_by_key` is stable) — mirroring
/// `sorted(KNOWN_CDC_ORGANIZATIONS.items(), key=lambda item: len(item[0]),
/// reverse=True)` so the longest matching acronym in a repo name wins
/// regardless of where it appears, not just the leftmost token.
static ACRONYMS_BY_LENGTH_DESC: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    let mut table = KNOWN_ORGANIZATIONS.clone();
    table.sort_by_key(|(acronym, _)| std::cmp::Reverse(acronym.len()));
    table
        .into_iter()
        .map(|(acronym, full)| {
            let pattern = format!(r"(?:^|[^a-z0-9]){}(?:[^a-z0-9]|$)", regex::escape(acronym));
            (Regex::new(&pattern).unwrap(), full)
        })
        .collect()
});

/// Scan a repository name for the longest known acronym it contains,
/// word-boundary-anchored against the lowercased name.
fn programmatic_match(repo_name: &str) -> Option<&'static str> {
    let lower = repo_name.to_ascii_lowercase();
    ACRONYMS_BY_LENGTH_DESC
        .iter()
        .find(|(pattern, _)| pattern.is_match(&lower))
        .map(|(_, full)| *full)
}

/// Optional AI inference hook: given the current (generic) organization
/// value, repository context, and a free-text model response, accept the
/// response only if it maps back to a known acronym.
pub fn accept_ai_organization(ai_response: &str) -> Option<&'static str> {
    if ai_response.eq_ignore_ascii_case("none") {
        return None;
    }
    full_name_for_acronym(ai_response).or_else(|| acronym_for_full_name(ai_response))
}

/// Run the full resolver cascade (programmatic → README marker → optional
/// AI, supplied by the caller) and canonicalize the result to an acronym.
/// Returns `(organization, is_generic)`.
pub struct OrgResolution {
    pub organization: String,
    pub is_generic_organization: bool,
}

pub fn resolve(
    repo_name: &str,
    initial_organization: &str,
    readme_content: Option<&str>,
    ai_inference: Option<&str>,
    default_identifiers: &[String],
) -> OrgResolution {
    let mut current = initial_organization.to_string();

    if is_generic(&current, default_identifiers) {
        if let Some(full) = programmatic_match(repo_name) {
            current = full.to_string();
        }
    }

    if let Some(readme) = readme_content {
        if let Some(marker_org) = parse_readme_for_organization(readme) {
            if !marker_org.eq_ignore_ascii_case(&current) {
                current = marker_org;
            }
        }
    }

    if is_generic(&current, default_identifiers) {
        if let Some(ai) = ai_inference {
            if let Some(accepted) = accept_ai_organization(ai) {
                current = accepted.to_string();
            }
        }
    }

    // Canonicalize full name -> acronym; leave unchanged if unmapped.
    if let Some(acronym) = acronym_for_full_name(&current) {
        current = acronym.to_string();
    }

    let still_generic =
        is_generic(&current, default_identifiers) || current.eq_ignore_ascii_case("unknownorg");

    OrgResolution {
        organization: current,
        is_generic_organization: still_generic,
    }
}
