//! AI classifier: a narrow injected-service trait plus a Gemini-style HTTP
//! backend and a deterministic no-op backend for tests and AI-disabled
//! runs. The core never depends on a concrete AI SDK — see
//! [`AiClassifier`].

use std::sync::atomic::{AtomicBool, Ordering};

use codecat_config::Config;
use codecat_types::UsageType;

/// Process-wide, set-once flag: once flipped (on an SSL or permission
/// failure from the AI backend), AI calls are skipped for the remainder of
/// the run. Reads are racy-but-tolerable — a false negative harmlessly runs
/// one extra call before the flip is observed.
#[derive(Debug, Default)]
pub struct AiAutoDisabled(AtomicBool);

impl AiAutoDisabled {
    pub fn new() -> Self {
        Self(AtomicBool::new(false))
    }

    pub fn is_disabled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn disable(&self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

/// Per-call-kind truncation reserves, subtracted from `MAX_TOKENS` before
/// truncating the combined prompt body. Matches the original tool's
/// per-prompt budgets.
pub mod reserve {
    pub const DESCRIPTION: u32 = 1500;
    pub const EXPLORATORY: u32 = 1000;
    pub const EXEMPTION: u32 = 1000;
    pub const ORGANIZATION: u32 = 500;
}

/// Truncate `input` to fit within `max_tokens - reserve`, treating one
/// token as roughly 4 characters the way the original tool treats the
/// character budget directly as its token proxy.
pub fn truncate_for_budget(input: &str, max_tokens: u32, reserve: u32) -> String {
    let budget_chars = max_tokens.saturating_sub(reserve).max(0) as usize;
    if input.len() <= budget_chars {
        input.to_string()
    } else {
        let mut truncated: String = input.chars().take(budget_chars).collect();
        truncated.push_str("\n... [Content Truncated]");
        truncated
    }
}

/// The narrow interface the classification cascade and org resolver call
/// through. A Gemini-style HTTP backend and a deterministic no-op backend
/// (used in tests and whenever `AI_ENABLED=false`) both implement this.
pub trait AiClassifier: Send + Sync {
    /// Infer a one-line description from name/description/languages/README.
    /// Returns `Some("N/A")` when the model declares information
    /// insufficient (an explicit placeholder the finalizer keeps), `None`
    /// on any error or when AI is unavailable.
    fn infer_description(&self, input: &AiInput) -> Option<String>;

    /// Infer an exemption `(usage_type, justification)` pair, or `None` if
    /// no exemption clearly applies (or AI is unavailable).
    fn infer_exemption(&self, input: &AiInput) -> Option<(UsageType, String)>;

    /// Infer a full organization name from a known-organization list, or
    /// `None` if no match / AI unavailable.
    fn infer_organization(&self, input: &AiInput, known_orgs: &[&str]) -> Option<String>;

    /// Determine whether a repository is primarily experimental, a demo,
    /// or a proof-of-concept. Returns `(is_exploratory, reason)`.
    fn is_exploratory(&self, input: &AiInput) -> Option<(bool, Option<String>)>;
}

/// Everything an AI call needs from a repository record, gathered once per
/// call site so the trait stays free of a dependency on `RepoRecord`.
#[derive(Debug, Clone, Default)]
pub struct AiInput {
    pub repo_name: String,
    pub description: String,
    pub languages: Vec<String>,
    pub readme: String,
}

/// A deterministic backend used whenever AI is disabled (the default) or in
/// tests: every call returns `None`, meaning "defer to the next cascade
/// stage / default", without making any network call.
#[derive(Debug, Default)]
pub struct NoopAiClassifier;

impl AiClassifier for NoopAiClassifier {
    fn infer_description(&self, _input: &AiInput) -> Option<String> {
        None
    }

    fn infer_exemption(&self, _input: &AiInput) -> Option<(UsageType, String)> {
        None
    }

    fn infer_organization(&self, _input: &AiInput, _known_orgs: &[&str]) -> Option<String> {
        None
    }

    fn is_exploratory(&self, _input: &AiInput) -> Option<(bool, Option<String>)> {
        None
    }
}

/// Gemini-style HTTP backend. Talks to the Generative Language API's
/// `generateContent` REST endpoint directly (no SDK dependency, matching
/// §1's "AI classifier is an injected service" framing) and degrades
/// gracefully: SSL and permission/API-key errors flip `auto_disabled` for
/// the remainder of the run; any other error just returns `None` for that
/// one call.
pub struct GeminiAiClassifier<'a> {
    http: reqwest::blocking::Client,
    cfg: &'a Config,
    auto_disabled: &'a AiAutoDisabled,
}

impl<'a> GeminiAiClassifier<'a> {
    pub fn new(cfg: &'a Config, auto_disabled: &'a AiAutoDisabled) -> anyhow::Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .danger_accept_invalid_certs(cfg.disable_ssl_verification)
            .timeout(std::time::Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            cfg,
            auto_disabled,
        })
    }

    fn enabled(&self) -> bool {
        self.cfg.ai_enabled && !self.auto_disabled.is_disabled() && self.cfg.google_api_key.is_some()
    }

    fn generate(&self, prompt: &str) -> Option<String> {
        if !self.enabled() {
            return None;
        }
        let api_key = self.cfg.google_api_key.as_deref()?;
        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent?key={}",
            self.cfg.ai_model_name, api_key
        );
        let body = serde_json::json!({
            "contents": [{"parts": [{"text": prompt}]}],
            "generationConfig": {
                "temperature": self.cfg.ai_temperature,
                "maxOutputTokens": self.cfg.ai_max_output_tokens,
            },
        });

        let result = self.http.post(&url).json(&body).send();
        let resp = match result {
            Ok(r) => r,
            Err(e) => {
                if e.is_connect() || e.to_string().to_ascii_lowercase().contains("ssl") {
                    tracing::warn!(error = %e, "AI backend SSL/connection error, disabling AI for the run");
                    self.auto_disabled.disable();
                } else {
                    tracing::warn!(error = %e, "AI call failed, skipping this call");
                }
                return None;
            }
        };

        if resp.status() == reqwest::StatusCode::FORBIDDEN || resp.status() == reqwest::StatusCode::UNAUTHORIZED {
            tracing::warn!(status = %resp.status(), "AI backend permission/auth error, disabling AI for the run");
            self.auto_disabled.disable();
            return None;
        }
        if !resp.status().is_success() {
            tracing::warn!(status = %resp.status(), "AI call returned non-success status");
            return None;
        }

        let parsed: serde_json::Value = match resp.json() {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "failed to parse AI response JSON");
                return None;
            }
        };

        parsed["candidates"][0]["content"]["parts"][0]["text"]
            .as_str()
            .map(|s| s.trim().to_string())
    }

    fn maybe_delay(&self) {
        if self.cfg.ai_delay_enabled > 0.0 {
            std::thread::sleep(std::time::Duration::from_secs_f64(self.cfg.ai_delay_enabled));
        }
    }
}

impl<'a> AiClassifier for GeminiAiClassifier<'a> {
    fn infer_description(&self, input: &AiInput) -> Option<String> {
        let body = truncate_for_budget(
            &format!(
                "Repository Name: {}\nDescription: {}\nLanguages: {}\nREADME:\n{}",
                input.repo_name,
                input.description,
                input.languages.join(", "),
                input.readme
            ),
            self.cfg.max_tokens,
            reserve::DESCRIPTION,
        );
        let prompt = format!(
            "Summarize this repository's purpose in one sentence. If there is insufficient information, respond exactly with N/A.\n\n{body}"
        );
        let out = self.generate(&prompt);
        self.maybe_delay();
        out
    }

    fn infer_exemption(&self, input: &AiInput) -> Option<(UsageType, String)> {
        let body = truncate_for_budget(
            &format!(
                "Repository Name: {}\nDescription: {}\n\nREADME:\n{}",
                input.repo_name, input.description, input.readme
            ),
            self.cfg.max_tokens,
            reserve::EXEMPTION,
        );
        let prompt = format!(
            "Decide whether this repository should be exempted from code sharing requirements. \
             Respond `None` if no exemption clearly applies, otherwise respond `CODE|justification` \
             where CODE is one of exemptByLaw, exemptByNationalSecurity, exemptByAgencySystem, \
             exemptByMissionSystem, exemptByCIO.\n\n{body}"
        );
        let raw = self.generate(&prompt)?;
        self.maybe_delay();
        if raw.trim().eq_ignore_ascii_case("none") {
            return None;
        }
        let (code, justification) = raw.split_once('|')?;
        let usage_type = UsageType::from_code(code.trim())?;
        if !UsageType::VALID_AI_EXEMPTION_CODES.contains(&usage_type) {
            tracing::warn!(code = %code, "AI returned an invalid exemption code, discarding");
            return None;
        }
        Some((usage_type, justification.trim().to_string()))
    }

    fn infer_organization(&self, input: &AiInput, known_orgs: &[&str]) -> Option<String> {
        let body = truncate_for_budget(
            &format!(
                "Repository Name: {}\nDescription: {}\n",
                input.repo_name, input.description
            ),
            self.cfg.max_tokens,
            reserve::ORGANIZATION,
        );
        let prompt = format!(
            "Which of these known organizations owns this repository? Respond with exactly one full \
             name from the list, or None if unclear.\nKnown organizations: {}\n\n{body}",
            known_orgs.join("; ")
        );
        let out = self.generate(&prompt);
        self.maybe_delay();
        out.filter(|s| !s.eq_ignore_ascii_case("none"))
    }

    fn is_exploratory(&self, input: &AiInput) -> Option<(bool, Option<String>)> {
        let body = truncate_for_budget(
            &format!(
                "Repository Name: {}\nDescription: {}\n\nREADME:\n{}",
                input.repo_name, input.description, input.readme
            ),
            self.cfg.max_tokens,
            reserve::EXPLORATORY,
        );
        let prompt = format!(
            "Is this repository primarily experimental, a demo, or a proof-of-concept (not \
             production custom-developed code)? Respond `IS_EXPLORATORY|reason` or \
             `NOT_EXPLORATORY|reason`.\n\n{body}"
        );
        let raw = self.generate(&prompt)?;
        self.maybe_delay();
        let (verdict, reason) = raw.split_once('|').unwrap_or((raw.as_str(), ""));
        let reason = if reason.trim().is_empty() {
            None
        } else {
            Some(reason.trim().to_string())
        };
        Some((verdict.trim().eq_ignore_ascii_case("IS_EXPLORATORY"), reason))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_classifier_always_defers() {
        let c = NoopAiClassifier;
        let input = AiInput::default();
        assert!(c.infer_description(&input).is_none());
        assert!(c.infer_exemption(&input).is_none());
        assert!(c.infer_organization(&input, &[]).is_none());
        assert!(c.is_exploratory(&input).is_none());
    }

    #[test]
    fn truncation_respects_budget_and_reserve() {
        let long = "x".repeat(200);
        let out = truncate_for_budget(&long, 100, 50);
        assert!(out.len() <= 50 + "\n... [Content Truncated]".len());
        assert!(out.ends_with("[Content Truncated]"));
    }

    #[test]
    fn short_input_is_not_truncated() {
        let out = truncate_for_budget("hello", 1000, 500);
        assert_eq!(out, "hello");
    }

    #[test]
    fn auto_disabled_flag_is_set_once_and_sticky() {
        let flag = AiAutoDisabled::new();
        assert!(!flag.is_disabled());
        flag.disable();
        assert!(flag.is_disabled());
        flag.disable();
        assert!(flag.is_disabled());
    }
}
