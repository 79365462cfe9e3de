//! Profile text analysis.
//!
//! Concatenates display name, canonical name, and description (translated to
//! English where possible) and asks the model for violations under a strict
//! schema. Flagged content is validated against the submitted text before a
//! reason is recorded: at least half of the flagged words must actually occur
//! in the profile.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use thornwall_common::{
    contains_normalized, normalize_name, Reason, Translator, User, UserReasonType,
};

use super::{AnalysisBackend, Analyzer, SharedReasons};

pub const PROFILE_SYSTEM_PROMPT: &str = "\
You are a moderation analyst reviewing social-platform profiles for content \
that sexualizes minors or solicits them. Flag explicit sexual terms, \
innuendo, coded language (number substitutions, deliberate misspellings), \
solicitation to move to private channels, requests for photos or personal \
information, age-gap grooming patterns, gift or compensation offers, and \
adult-industry references. Do not flag orientation or identity statements, \
ordinary friendship language, non-sexual profanity, or trading talk.

For every submitted user, report violations only when present. Quote the \
exact offending fragments. Confidence reflects severity and accumulation: \
explicit content or several independent signals score high (0.8-1.0), clear \
patterns or coded language score mid (0.4-0.7), single ambiguous hints score \
low (0.0-0.3).";

/// One violation found in a profile.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ProfileViolation {
    /// Exact offending fragment or pattern.
    pub violation: String,
    pub confidence: f64,
}

/// Analysis result for one user.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ProfileAnalysis {
    /// Exact username of the analyzed account.
    pub username: String,
    pub evidence: Vec<ProfileViolation>,
    /// Overall confidence across all violations.
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ProfileBatchAnalysis {
    pub users: Vec<ProfileAnalysis>,
}

#[derive(Debug, Serialize)]
struct UserSummary<'a> {
    name: &'a str,
    display_name: &'a str,
    description: &'a str,
}

pub struct ProfileAnalyzer {
    backend: Arc<dyn AnalysisBackend>,
    translator: Arc<Translator>,
}

impl ProfileAnalyzer {
    pub fn new(backend: Arc<dyn AnalysisBackend>, translator: Arc<Translator>) -> Self {
        Self {
            backend,
            translator,
        }
    }

    /// Translate descriptions to English, falling back to the original text
    /// when translation fails. Keyed by normalized username.
    async fn translated_descriptions(&self, subjects: &[User]) -> HashMap<String, String> {
        let mut translated = HashMap::new();
        for subject in subjects {
            let description = if subject.description.trim().is_empty() {
                String::new()
            } else {
                match self
                    .translator
                    .translate(&subject.description, "auto", "en")
                    .await
                {
                    Ok(text) => text,
                    Err(e) => {
                        debug!(user_id = subject.id, error = %e, "Translation failed, using original description");
                        subject.description.clone()
                    }
                }
            };
            translated.insert(normalize_name(&subject.name), description);
        }
        translated
    }

    fn record_results(
        &self,
        results: ProfileBatchAnalysis,
        subjects: &[User],
        translated: &HashMap<String, String>,
        reasons: &SharedReasons,
    ) {
        let by_name: HashMap<String, &User> = subjects
            .iter()
            .map(|s| (normalize_name(&s.name), s))
            .collect();

        for analysis in results.users {
            let key = normalize_name(&analysis.username);
            let Some(subject) = by_name.get(&key) else {
                warn!(username = %analysis.username, "Model flagged a user not in the batch");
                continue;
            };
            if analysis.evidence.is_empty() || analysis.confidence <= 0.0 {
                continue;
            }

            let haystack = format!(
                "{} {} {}",
                subject.display_name,
                subject.name,
                translated.get(&key).map(String::as_str).unwrap_or_default(),
            );
            if !validates_against_content(&analysis, &haystack) {
                warn!(
                    user_id = subject.id,
                    username = %subject.name,
                    "Flagged content did not validate against profile text"
                );
                continue;
            }

            let evidence: Vec<String> = analysis
                .evidence
                .iter()
                .map(|v| format!("{} ({:.2})", v.violation, v.confidence))
                .collect();
            reasons.add(
                subject.id,
                UserReasonType::Profile,
                Reason::new(
                    "User profile contains inappropriate content.",
                    analysis.confidence,
                )
                .with_evidence(evidence),
            );
        }
    }
}

#[async_trait]
impl Analyzer for ProfileAnalyzer {
    fn name(&self) -> &'static str {
        "profile"
    }

    async fn analyze(
        &self,
        ctx: &CancellationToken,
        subjects: &[User],
        reasons: &SharedReasons,
    ) -> anyhow::Result<()> {
        if subjects.is_empty() {
            return Ok(());
        }

        let translated = self.translated_descriptions(subjects).await;

        let summaries: Vec<UserSummary<'_>> = subjects
            .iter()
            .map(|s| UserSummary {
                name: &s.name,
                display_name: &s.display_name,
                description: translated
                    .get(&normalize_name(&s.name))
                    .map(String::as_str)
                    .unwrap_or_default(),
            })
            .collect();
        let payload = serde_json::to_string(&summaries)?;

        match self.backend.analyze_profiles(ctx, payload).await {
            Ok(results) => {
                info!(
                    total = subjects.len(),
                    flagged = results.users.len(),
                    "Received profile analysis"
                );
                self.record_results(results, subjects, &translated, reasons);
            }
            Err(ai_client::AiError::ContentBlocked) => {
                // The batch as a whole was refused. Re-run per subject so only
                // the profiles that actually trip the filter are flagged.
                for subject in subjects {
                    let single = serde_json::to_string(&[UserSummary {
                        name: &subject.name,
                        display_name: &subject.display_name,
                        description: translated
                            .get(&normalize_name(&subject.name))
                            .map(String::as_str)
                            .unwrap_or_default(),
                    }])?;
                    match self.backend.analyze_profiles(ctx, single).await {
                        Ok(results) => {
                            self.record_results(results, subjects, &translated, reasons)
                        }
                        Err(ai_client::AiError::ContentBlocked) => {
                            info!(user_id = subject.id, "Profile analysis blocked");
                            reasons.add(
                                subject.id,
                                UserReasonType::Profile,
                                Reason::new("User profile contains inappropriate content.", 1.0)
                                    .with_evidence(vec![
                                        "Content was blocked by AI safety filters.".to_string(),
                                    ]),
                            );
                        }
                        Err(e) => warn!(user_id = subject.id, error = %e, "Profile analysis failed"),
                    }
                }
            }
            Err(e) => return Err(e.into()),
        }

        Ok(())
    }
}

/// At least half of the flagged words must occur in the submitted text.
fn validates_against_content(analysis: &ProfileAnalysis, haystack: &str) -> bool {
    let flagged_words: Vec<&str> = analysis
        .evidence
        .iter()
        .flat_map(|v| v.violation.split_whitespace())
        .collect();
    if flagged_words.is_empty() {
        return false;
    }

    let found = flagged_words
        .iter()
        .filter(|word| contains_normalized(haystack, word))
        .count();
    (found as f64) >= 0.5 * (flagged_words.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analysis(violations: &[&str]) -> ProfileAnalysis {
        ProfileAnalysis {
            username: "subject".to_string(),
            evidence: violations
                .iter()
                .map(|v| ProfileViolation {
                    violation: v.to_string(),
                    confidence: 0.8,
                })
                .collect(),
            confidence: 0.8,
        }
    }

    #[test]
    fn validation_passes_when_words_occur() {
        let a = analysis(&["trade pics"]);
        assert!(validates_against_content(&a, "dm me to trade pics"));
    }

    #[test]
    fn validation_fails_on_hallucinated_content() {
        let a = analysis(&["explicit phrase that never appears"]);
        assert!(!validates_against_content(&a, "a perfectly ordinary bio"));
    }

    #[test]
    fn validation_uses_half_threshold() {
        // Two of four flagged words appear: exactly 50%, passes.
        let a = analysis(&["hidden words", "real content"]);
        assert!(validates_against_content(&a, "profile with real content"));
    }

    #[test]
    fn validation_survives_normalization() {
        let a = analysis(&["secret"]);
        assert!(validates_against_content(&a, "my $3cr3t club"));
    }
}
