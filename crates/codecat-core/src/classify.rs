//! README marker grammar and the classification cascade (§4.7): manual
//! marker → non-code heuristic → AI exploratory → AI general exemption →
//! default.

use std::sync::LazyLock;

use regex::Regex;

use codecat_types::{UsageType, Visibility};

use crate::ai::{AiClassifier, AiInput};

/// Languages treated as "not really code" for the non-code exemption.
pub const NON_CODE_LANGUAGES: &[&str] = &[
    "None",
    "Markdown",
    "Text",
    "HTML",
    "CSS",
    "XML",
    "YAML",
    "JSON",
    "Shell",
    "Batchfile",
    "PowerShell",
    "Dockerfile",
    "Makefile",
    "CMake",
    "TeX",
    "Roff",
    "CSV",
    "TSV",
];

fn is_non_code_language(lang: &str) -> bool {
    NON_CODE_LANGUAGES.iter().any(|l| l.eq_ignore_ascii_case(lang))
}

/// True when every detected language is in the non-code set, or the
/// language list is empty — an empty list is treated as "purely non-code
/// too" (no code-bearing language was ever detected), matching the
/// original tool.
pub fn is_non_code_repository(languages: &[String]) -> bool {
    languages.iter().all(|l| is_non_code_language(l))
}

macro_rules! marker_regex {
    ($name:ident, $pat:expr) => {
        static $name: LazyLock<Regex> = LazyLock::new(|| Regex::new($pat).unwrap());
    };
}

marker_regex!(VERSION_MARKER, r"(?im)^\s*Version:\s*(.+)$");
marker_regex!(KEYWORDS_MARKER, r"(?im)^\s*(?:Keywords|Tags|Topics):\s*(.+)$");
marker_regex!(CONTACT_MARKER, r"(?im)^\s*Contacts?:\s*(.+)$");
marker_regex!(CONTRACT_MARKER, r"(?im)^\s*Contract#:\s*(.+)$");
marker_regex!(STATUS_MARKER, r"(?im)^\s*(?:Project\s+)?Status:\s*(.+)$");
marker_regex!(EXEMPTION_MARKER, r"(?im)^\s*Exemption:\s*(\S+)\s*$");
marker_regex!(
    EXEMPTION_JUSTIFICATION_MARKER,
    r"(?im)^\s*Exemption justification:\s*(.+)$"
);
marker_regex!(LABOR_HOURS_MARKER, r"(?im)^\s*(?:Estimated Labor Hours|Labor Hours):\s*([\d.]+)$");

/// The subset of README markers the classifier and finalizer read, parsed
/// once per repository up front.
#[derive(Debug, Clone, Default)]
pub struct ReadmeMarkers {
    pub version: Option<String>,
    pub keywords: Vec<String>,
    pub contacts: Vec<String>,
    pub contract_number: Option<String>,
    pub status: Option<String>,
    pub manual_exemption: Option<(String, String)>,
    pub labor_hours: Option<f64>,
}

pub fn parse_readme_markers(readme: &str) -> ReadmeMarkers {
    let version = VERSION_MARKER.captures(readme).map(|c| c[1].trim().to_string());
    let keywords = KEYWORDS_MARKER
        .captures(readme)
        .map(|c| {
            c[1].split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default();
    let contacts = CONTACT_MARKER
        .captures(readme)
        .map(|c| {
            c[1].split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default();
    let contract_number = CONTRACT_MARKER.captures(readme).map(|c| c[1].trim().to_string());
    let status = STATUS_MARKER.captures(readme).map(|c| c[1].trim().to_string());

    let manual_exemption = EXEMPTION_MARKER.captures(readme).and_then(|c| {
        let code = c[1].trim().to_string();
        EXEMPTION_JUSTIFICATION_MARKER
            .captures(readme)
            .map(|j| (code, j[1].trim().to_string()))
    });

    let labor_hours = LABOR_HOURS_MARKER
        .captures(readme)
        .and_then(|c| c[1].trim().parse::<f64>().ok());

    ReadmeMarkers {
        version,
        keywords,
        contacts,
        contract_number,
        status,
        manual_exemption,
        labor_hours,
    }
}

/// Everything the classification cascade needs about one repository.
#[derive(Debug, Clone)]
pub struct ClassificationInput<'a> {
    pub repo_name: &'a str,
    pub description: &'a str,
    pub languages: &'a [String],
    pub readme: Option<&'a str>,
    pub markers: &'a ReadmeMarkers,
    pub visibility: Visibility,
    pub has_license: bool,
    pub is_empty_repo: bool,
}

/// Cascade result: usage type plus exemption justification (empty when not exempt).
#[derive(Debug, Clone)]
pub struct Classification {
    pub usage_type: UsageType,
    pub exemption_text: String,
}

/// Run the cascade. `ai` is consulted only for stages 3 and 4 and may be
/// the no-op backend; `cached` short-circuits the whole cascade when a
/// prior cached classification exists (cache-hit path never re-runs it).
pub fn classify(input: &ClassificationInput, ai: &dyn AiClassifier, cached: Option<&Classification>) -> Classification {
    if let Some(c) = cached {
        return c.clone();
    }

    // 1. Manual marker.
    if let Some((code, justification)) = &input.markers.manual_exemption {
        if let Some(usage_type) = UsageType::from_code(code) {
            if usage_type.is_exempt() && !justification.is_empty() {
                return Classification {
                    usage_type,
                    exemption_text: justification.clone(),
                };
            }
        }
    }

    // 2. Non-code heuristic.
    if is_non_code_repository(input.languages) {
        let langs = if input.languages.is_empty() {
            "no code-bearing language detected".to_string()
        } else {
            input.languages.join(", ")
        };
        return Classification {
            usage_type: UsageType::ExemptNonCode,
            exemption_text: format!("Repository contains only non-code content ({langs})."),
        };
    }

    let ai_input = AiInput {
        repo_name: input.repo_name.to_string(),
        description: input.description.to_string(),
        languages: input.languages.to_vec(),
        readme: input.readme.unwrap_or_default().to_string(),
    };

    // 3. AI exploratory.
    if !input.is_empty_repo {
        if let Some((true, reason)) = ai.is_exploratory(&ai_input) {
            return Classification {
                usage_type: UsageType::ExemptByCio,
                exemption_text: reason.unwrap_or_else(|| {
                    "Repository identified as experimental/exploratory by automated review.".to_string()
                }),
            };
        }
    }

    // 4. AI general exemption.
    if let Some((usage_type, justification)) = ai.infer_exemption(&ai_input) {
        if UsageType::VALID_AI_EXEMPTION_CODES.contains(&usage_type) && !justification.is_empty() {
            return Classification {
                usage_type,
                exemption_text: justification,
            };
        }
    }

    // 5. Default.
    let usage_type = if input.visibility.is_private_or_internal() {
        UsageType::GovernmentWideReuse
    } else if input.has_license {
        UsageType::OpenSource
    } else {
        UsageType::GovernmentWideReuse
    };

    Classification {
        usage_type,
        exemption_text: String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::NoopAiClassifier;

    fn base_input<'a>(languages: &'a [String], readme: Option<&'a str>, markers: &'a ReadmeMarkers) -> ClassificationInput<'a> {
        ClassificationInput {
            repo_name: "repo",
            description: "",
            languages,
            readme,
            markers,
            visibility: Visibility::Public,
            has_license: true,
            is_empty_repo: false,
        }
    }

    #[test]
    fn manual_exemption_wins_and_ai_never_consulted() {
        let readme = "Exemption: exemptByLaw\nExemption justification: HIPAA PHI";
        let markers = parse_readme_markers(readme);
        let langs = vec!["Rust".to_string()];
        let input = base_input(&langs, Some(readme), &markers);
        let c = classify(&input, &NoopAiClassifier, None);
        assert_eq!(c.usage_type, UsageType::ExemptByLaw);
        assert_eq!(c.exemption_text, "HIPAA PHI");
    }

    #[test]
    fn non_code_detection_cites_languages() {
        let markers = ReadmeMarkers::default();
        let langs = vec!["Markdown".to_string(), "HTML".to_string()];
        let mut input = base_input(&langs, None, &markers);
        input.visibility = Visibility::Private;
        let c = classify(&input, &NoopAiClassifier, None);
        assert_eq!(c.usage_type, UsageType::ExemptNonCode);
        assert!(c.exemption_text.contains("Markdown"));
        assert!(c.exemption_text.contains("HTML"));
    }

    #[test]
    fn empty_language_list_counts_as_non_code() {
        let markers = ReadmeMarkers::default();
        let langs: Vec<String> = vec![];
        let input = base_input(&langs, None, &markers);
        let c = classify(&input, &NoopAiClassifier, None);
        assert_eq!(c.usage_type, UsageType::ExemptNonCode);
    }

    #[test]
    fn default_public_with_license_is_open_source() {
        let markers = ReadmeMarkers::default();
        let langs = vec!["Rust".to_string()];
        let input = base_input(&langs, None, &markers);
        let c = classify(&input, &NoopAiClassifier, None);
        assert_eq!(c.usage_type, UsageType::OpenSource);
    }

    #[test]
    fn default_public_without_license_is_government_wide_reuse() {
        let markers = ReadmeMarkers::default();
        let langs = vec!["Rust".to_string()];
        let mut input = base_input(&langs, None, &markers);
        input.has_license = false;
        let c = classify(&input, &NoopAiClassifier, None);
        assert_eq!(c.usage_type, UsageType::GovernmentWideReuse);
    }

    #[test]
    fn default_private_is_government_wide_reuse_regardless_of_license() {
        let markers = ReadmeMarkers::default();
        let langs = vec!["Rust".to_string()];
        let mut input = base_input(&langs, None, &markers);
        input.visibility = Visibility::Private;
        let c = classify(&input, &NoopAiClassifier, None);
        assert_eq!(c.usage_type, UsageType::GovernmentWideReuse);
    }

    #[test]
    fn cached_classification_short_circuits_everything() {
        let markers = ReadmeMarkers::default();
        let langs = vec!["Markdown".to_string()];
        let input = base_input(&langs, None, &markers);
        let cached = Classification {
            usage_type: UsageType::OpenSource,
            exemption_text: String::new(),
        };
        let c = classify(&input, &NoopAiClassifier, Some(&cached));
        assert_eq!(c.usage_type, UsageType::OpenSource);
    }

    #[test]
    fn readme_markers_parse_version_keywords_status_contract() {
        let readme = "\
Version: 2.3.1
Keywords: health, surveillance
Contract#: 75D301-21-C-00001
Status: Maintained
Labor Hours: 120.5
";
        let m = parse_readme_markers(readme);
        assert_eq!(m.version.as_deref(), Some("2.3.1"));
        assert_eq!(m.keywords, vec!["health", "surveillance"]);
        assert_eq!(m.contract_number.as_deref(), Some("75D301-21-C-00001"));
        assert_eq!(m.status.as_deref(), Some("Maintained"));
        assert_eq!(m.labor_hours, Some(120.5));
    }
}
