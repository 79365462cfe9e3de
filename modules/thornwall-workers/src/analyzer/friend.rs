//! Friend-network analysis.
//!
//! A subject's friends are looked up in the store and partitioned into
//! confirmed and flagged sets. Confidence combines the inappropriate ratio
//! over the first 200 friends with an absolute-count weight tiered by network
//! size. Subjects over the threshold get an AI-written one-sentence reason,
//! generated in one batched request.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use thornwall_common::{
    normalize_name, round2, Reason, SubjectId, SubjectStatus, User, UserReasonType,
};
use thornwall_store::PipelineStore;

use super::{AnalysisBackend, Analyzer, SharedReasons};

pub const FRIEND_REASON_SYSTEM_PROMPT: &str = "\
You are a moderation assistant summarizing why a user's friend network is \
concerning. You receive, per user, the confirmed and flagged friends with \
their recorded violation messages. Write one short factual sentence per user \
naming the dominant violation themes and the network concentration. No \
speculation, no lists, one sentence.";

const FALLBACK_FRIEND_REASON: &str = "User has flagged friends in their friend network.";

/// Flagging threshold for the combined friend confidence.
const FRIEND_FLAG_THRESHOLD: f64 = 0.50;

/// Only the first 200 friends count toward the ratio factor.
const RATIO_FRIEND_CAP: f64 = 200.0;

/// Friends included per user in the reason-generation payload.
const MAX_FRIENDS_IN_PAYLOAD: usize = 10;

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FriendReasonEntry {
    /// Exact username the reason belongs to.
    pub username: String,
    /// One-sentence explanation of the network pattern.
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FriendReasonBatch {
    pub reasons: Vec<FriendReasonEntry>,
}

#[derive(Debug, Serialize)]
struct FriendSummary<'a> {
    name: &'a str,
    status: &'a str,
    reasons: Vec<String>,
}

#[derive(Debug, Serialize)]
struct NetworkSummary<'a> {
    username: &'a str,
    friends: Vec<FriendSummary<'a>>,
}

pub struct FriendAnalyzer {
    store: Arc<dyn PipelineStore>,
    backend: Arc<dyn AnalysisBackend>,
}

impl FriendAnalyzer {
    pub fn new(store: Arc<dyn PipelineStore>, backend: Arc<dyn AnalysisBackend>) -> Self {
        Self { store, backend }
    }
}

#[async_trait]
impl Analyzer for FriendAnalyzer {
    fn name(&self) -> &'static str {
        "friend"
    }

    async fn analyze(
        &self,
        ctx: &CancellationToken,
        subjects: &[User],
        reasons: &SharedReasons,
    ) -> anyhow::Result<()> {
        let existing_flags = reasons.len();

        // One store round-trip for every friend mentioned in the batch.
        let unique_friend_ids: Vec<SubjectId> = subjects
            .iter()
            .flat_map(|s| s.friend_ids.iter().copied())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let known_friends = self.store.get_users_by_ids(&unique_friend_ids, true).await?;

        // Partition per subject and score.
        let mut qualifying: Vec<(&User, Vec<&User>, Vec<&User>, f64)> = Vec::new();
        for subject in subjects {
            let mut confirmed = Vec::new();
            let mut flagged = Vec::new();
            for friend_id in &subject.friend_ids {
                match known_friends.get(friend_id) {
                    Some(friend) if friend.status == SubjectStatus::Confirmed => {
                        confirmed.push(friend)
                    }
                    Some(friend) if friend.status == SubjectStatus::Flagged => {
                        flagged.push(friend)
                    }
                    _ => {}
                }
            }

            let confidence = calculate_confidence(
                confirmed.len(),
                flagged.len(),
                subject.friend_ids.len(),
            );
            if confidence >= FRIEND_FLAG_THRESHOLD {
                qualifying.push((subject, confirmed, flagged, confidence));
            }
        }

        if qualifying.is_empty() {
            debug!(total = subjects.len(), "No subjects over friend threshold");
            return Ok(());
        }

        // One batched reason-generation request for every qualifying subject.
        let summaries: Vec<NetworkSummary<'_>> = qualifying
            .iter()
            .map(|(subject, confirmed, flagged, _)| NetworkSummary {
                username: &subject.name,
                friends: confirmed
                    .iter()
                    .map(|f| (f, "confirmed"))
                    .chain(flagged.iter().map(|f| (f, "flagged")))
                    .take(MAX_FRIENDS_IN_PAYLOAD)
                    .map(|(friend, status)| FriendSummary {
                        name: &friend.name,
                        status,
                        reasons: friend.reasons.messages(),
                    })
                    .collect(),
            })
            .collect();

        let generated: HashMap<String, String> = match self
            .backend
            .generate_friend_reasons(ctx, serde_json::to_string(&summaries)?)
            .await
        {
            Ok(batch) => batch
                .reasons
                .into_iter()
                .map(|entry| (normalize_name(&entry.username), entry.reason))
                .collect(),
            Err(e) => {
                warn!(error = %e, "Friend reason generation failed, using fallback");
                HashMap::new()
            }
        };

        for (subject, confirmed, flagged, confidence) in &qualifying {
            let message = generated
                .get(&normalize_name(&subject.name))
                .filter(|m| !m.trim().is_empty())
                .cloned()
                .unwrap_or_else(|| FALLBACK_FRIEND_REASON.to_string());

            let evidence: Vec<String> = confirmed
                .iter()
                .map(|f| format!("confirmed friend: {}", f.name))
                .chain(flagged.iter().map(|f| format!("flagged friend: {}", f.name)))
                .collect();

            reasons.add(
                subject.id,
                UserReasonType::Friend,
                Reason::new(message, round2(*confidence)).with_evidence(evidence),
            );

            debug!(
                user_id = subject.id,
                confirmed = confirmed.len(),
                flagged = flagged.len(),
                confidence,
                "User flagged for friend network"
            );
        }

        info!(
            total = subjects.len(),
            analyzed = qualifying.len(),
            new_flags = reasons.len() - existing_flags,
            "Finished processing friends"
        );
        Ok(())
    }
}

/// Combined confidence: ratio factor (50%) plus tiered absolute-count weight
/// (50%).
pub fn calculate_confidence(
    confirmed_count: usize,
    flagged_count: usize,
    total_friends: usize,
) -> f64 {
    let mut confidence = 0.0;

    if total_friends > 0 {
        let inappropriate = confirmed_count as f64 + flagged_count as f64 * 0.5;
        let effective_total = (total_friends as f64).min(RATIO_FRIEND_CAP);
        confidence += (inappropriate / effective_total).min(1.0) * 0.50;
    }

    confidence += inappropriate_weight(confirmed_count, flagged_count, total_friends) * 0.50;
    confidence
}

/// Absolute-count weight tiered by network size. Percentage thresholds grow
/// with the network (2% at 500+, 3% at 200+, 4% below) with hard minimums,
/// and an unconditional ceiling for saturated networks.
fn inappropriate_weight(confirmed_count: usize, flagged_count: usize, total_friends: usize) -> f64 {
    let total_weight = confirmed_count as f64 + flagged_count as f64 * 0.5;

    let base_threshold = if total_friends >= 500 {
        0.02
    } else if total_friends >= 200 {
        0.03
    } else {
        0.04
    };

    let threshold_confirmed = (3.0f64).max(base_threshold * total_friends as f64);
    let threshold_weighted = (5.0f64).max(base_threshold * 1.5 * total_friends as f64);

    if confirmed_count >= 15 || total_weight >= 25.0 {
        return 1.0;
    }

    let confirmed = confirmed_count as f64;
    if confirmed >= threshold_confirmed * 1.5 || total_weight >= threshold_weighted * 1.5 {
        1.0
    } else if confirmed >= threshold_confirmed * 1.2 || total_weight >= threshold_weighted * 1.2 {
        0.8
    } else if confirmed >= threshold_confirmed || total_weight >= threshold_weighted {
        0.6
    } else if confirmed >= threshold_confirmed * 0.7 || total_weight >= threshold_weighted * 0.7 {
        0.4
    } else if confirmed >= threshold_confirmed * 0.4 || total_weight >= threshold_weighted * 0.4 {
        0.2
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_network_scores_zero() {
        assert_eq!(calculate_confidence(0, 0, 0), 0.0);
        assert_eq!(calculate_confidence(0, 0, 100), 0.0);
    }

    #[test]
    fn hard_ceiling_on_confirmed_count() {
        // 15 confirmed maxes the count weight regardless of network size.
        let confidence = calculate_confidence(15, 0, 10_000);
        assert!(confidence >= 0.50);
    }

    #[test]
    fn hard_ceiling_on_total_weight() {
        // 50 flagged = weight 25 hits the ceiling.
        let confidence = calculate_confidence(0, 50, 10_000);
        assert!(confidence >= 0.50);
    }

    #[test]
    fn saturated_small_network_maxes_out() {
        // 20 confirmed out of 20 friends: ratio 1.0 and ceiling weight.
        let confidence = calculate_confidence(20, 0, 20);
        assert_eq!(confidence, 1.0);
    }

    #[test]
    fn ratio_caps_at_200_friends() {
        // 100 confirmed in a 10k network: ratio uses min(total, 200).
        let capped = calculate_confidence(100, 0, 10_000);
        let exact = calculate_confidence(100, 0, 200);
        assert_eq!(capped, exact);
    }

    #[test]
    fn small_clean_network_stays_below_threshold() {
        let confidence = calculate_confidence(1, 1, 150);
        assert!(confidence < FRIEND_FLAG_THRESHOLD);
    }

    #[test]
    fn flagged_friends_count_half() {
        let only_flagged = calculate_confidence(0, 4, 100);
        let confirmed = calculate_confidence(4, 0, 100);
        assert!(confirmed > only_flagged);
    }

    #[test]
    fn stepped_weights_are_monotonic() {
        let mut last = 0.0;
        for confirmed in [0, 2, 3, 4, 5, 8, 15] {
            let confidence = calculate_confidence(confirmed, 0, 100);
            assert!(
                confidence >= last,
                "confidence regressed at {confirmed} confirmed"
            );
            last = confidence;
        }
    }
}
