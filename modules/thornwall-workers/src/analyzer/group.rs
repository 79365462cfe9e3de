//! Group-membership analysis.
//!
//! Counts confirmed and flagged groups among a subject's memberships.
//! Subjects with fewer than two groups are skipped outright to suppress
//! false positives. The separate percentage policy drives the periodic
//! group-tracking sweep in the maintenance worker.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use thornwall_common::{round2, Reason, SubjectId, SubjectStatus, User, UserReasonType};
use thornwall_store::PipelineStore;

use super::{Analyzer, SharedReasons};

/// Subjects with fewer groups than this are never group-flagged.
const MIN_GROUPS_FOR_ANALYSIS: usize = 2;

pub struct GroupAnalyzer {
    store: Arc<dyn PipelineStore>,
    flag_threshold: f64,
}

impl GroupAnalyzer {
    pub fn new(store: Arc<dyn PipelineStore>, flag_threshold: f64) -> Self {
        Self {
            store,
            flag_threshold,
        }
    }
}

#[async_trait]
impl Analyzer for GroupAnalyzer {
    fn name(&self) -> &'static str {
        "group"
    }

    async fn analyze(
        &self,
        ctx: &CancellationToken,
        subjects: &[User],
        reasons: &SharedReasons,
    ) -> anyhow::Result<()> {
        if ctx.is_cancelled() {
            return Ok(());
        }

        let existing_flags = reasons.len();

        // One bulk lookup for every group mentioned in the batch.
        let unique_group_ids: Vec<SubjectId> = subjects
            .iter()
            .flat_map(|s| s.groups.iter().map(|g| g.group_id))
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let known_groups = self.store.get_groups_by_ids(&unique_group_ids).await?;

        for subject in subjects {
            if subject.groups.len() < MIN_GROUPS_FOR_ANALYSIS {
                continue;
            }

            let mut confirmed = 0usize;
            let mut flagged = 0usize;
            let mut evidence = Vec::new();
            for membership in &subject.groups {
                match known_groups.get(&membership.group_id) {
                    Some(group) if group.status == SubjectStatus::Confirmed => {
                        confirmed += 1;
                        evidence.push(format!("confirmed group: {}", membership.group_name));
                    }
                    Some(group) if group.status == SubjectStatus::Flagged => {
                        flagged += 1;
                        evidence.push(format!("flagged group: {}", membership.group_name));
                    }
                    _ => {}
                }
            }

            let confidence = group_confidence(confirmed, flagged, subject.groups.len());
            if confidence >= self.flag_threshold {
                debug!(
                    user_id = subject.id,
                    confirmed_groups = confirmed,
                    flagged_groups = flagged,
                    confidence,
                    "User flagged for group memberships"
                );
                reasons.add(
                    subject.id,
                    UserReasonType::Group,
                    Reason::new(
                        "Member of multiple inappropriate groups.",
                        round2(confidence),
                    )
                    .with_evidence(evidence),
                );
            }
        }

        info!(
            total = subjects.len(),
            new_flags = reasons.len() - existing_flags,
            "Finished processing groups"
        );
        Ok(())
    }
}

/// Combined confidence: absolute-count weight (60%) plus membership ratio
/// (40%).
pub fn group_confidence(confirmed_count: usize, flagged_count: usize, total_groups: usize) -> f64 {
    let mut confidence = inappropriate_weight(confirmed_count, flagged_count) * 0.60;

    if total_groups > 0 {
        let inappropriate = confirmed_count as f64 + flagged_count as f64 * 0.5;
        confidence += (inappropriate / total_groups as f64).min(1.0) * 0.40;
    }

    confidence
}

fn inappropriate_weight(confirmed_count: usize, flagged_count: usize) -> f64 {
    let total_weight = confirmed_count as f64 + flagged_count as f64 * 0.5;

    if confirmed_count >= 4 || total_weight >= 6.0 {
        1.0
    } else if confirmed_count >= 3 || total_weight >= 4.0 {
        0.8
    } else if confirmed_count >= 2 || total_weight >= 3.0 {
        0.6
    } else if confirmed_count >= 1 || total_weight >= 1.0 {
        0.4
    } else {
        0.0
    }
}

/// Thresholds for the periodic group-tracking sweep: a group is flagged when
/// its flagged-member count passes the absolute override or the percentage of
/// its member base.
#[derive(Debug, Clone, Copy)]
pub struct GroupPercentagePolicy {
    pub min_flagged_override: usize,
    pub min_flagged_percentage: f64,
}

impl GroupPercentagePolicy {
    /// Whether a group with `flagged_members` out of `member_count` should be
    /// flagged, and why.
    pub fn should_flag(&self, flagged_members: usize, member_count: u64) -> Option<&'static str> {
        if flagged_members >= self.min_flagged_override {
            return Some("Group has a large number of flagged members.");
        }
        if member_count > 0 {
            let percentage = flagged_members as f64 / member_count as f64 * 100.0;
            if percentage >= self.min_flagged_percentage {
                return Some("Group has a large percentage of flagged members.");
            }
        }
        None
    }

    /// Group confidence: mean confidence of its flagged members, boosted 20%
    /// when the absolute override was hit, clamped and rounded.
    pub fn confidence(&self, flagged_members: usize, member_confidences: &[f64]) -> f64 {
        if member_confidences.is_empty() {
            return 0.0;
        }
        let mut avg =
            member_confidences.iter().sum::<f64>() / member_confidences.len() as f64;
        if flagged_members >= self.min_flagged_override {
            avg *= 1.2;
        }
        round2(avg.min(1.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn four_confirmed_maxes_count_weight() {
        // 4 confirmed in 4 groups: 0.6 * 1.0 + 0.4 * 1.0.
        assert_eq!(group_confidence(4, 0, 4), 1.0);
    }

    #[test]
    fn count_table_steps() {
        assert_eq!(inappropriate_weight(4, 0), 1.0);
        assert_eq!(inappropriate_weight(0, 12), 1.0);
        assert_eq!(inappropriate_weight(3, 0), 0.8);
        assert_eq!(inappropriate_weight(0, 8), 0.8);
        assert_eq!(inappropriate_weight(2, 0), 0.6);
        assert_eq!(inappropriate_weight(0, 6), 0.6);
        assert_eq!(inappropriate_weight(1, 0), 0.4);
        assert_eq!(inappropriate_weight(0, 2), 0.4);
        // A single flagged group only carries half a point of weight.
        assert_eq!(inappropriate_weight(0, 1), 0.0);
        assert_eq!(inappropriate_weight(0, 0), 0.0);
    }

    #[test]
    fn one_flagged_group_in_many_stays_low() {
        let confidence = group_confidence(0, 1, 30);
        assert!(confidence < 0.40);
    }

    #[test]
    fn two_confirmed_of_four_crosses_threshold() {
        let confidence = group_confidence(2, 0, 4);
        assert!(confidence >= 0.40);
    }

    #[test]
    fn percentage_policy_override() {
        let policy = GroupPercentagePolicy {
            min_flagged_override: 10,
            min_flagged_percentage: 5.0,
        };
        assert!(policy.should_flag(10, 1_000_000).is_some());
        assert!(policy.should_flag(9, 1_000_000).is_none());
    }

    #[test]
    fn percentage_policy_ratio() {
        let policy = GroupPercentagePolicy {
            min_flagged_override: 100,
            min_flagged_percentage: 5.0,
        };
        assert!(policy.should_flag(5, 100).is_some()); // 5%
        assert!(policy.should_flag(4, 100).is_none()); // 4%
        assert!(policy.should_flag(3, 0).is_none()); // empty groups never ratio-flag
    }

    #[test]
    fn sweep_confidence_is_mean_with_override_boost() {
        let policy = GroupPercentagePolicy {
            min_flagged_override: 3,
            min_flagged_percentage: 5.0,
        };
        // Below override: plain mean.
        assert_eq!(policy.confidence(2, &[0.4, 0.6]), 0.5);
        // Override hit: boosted 20%.
        assert_eq!(policy.confidence(3, &[0.5, 0.5, 0.5]), 0.6);
        // Boost clamps at 1.0.
        assert_eq!(policy.confidence(3, &[0.95, 0.95, 0.95]), 1.0);
        // No members, no confidence.
        assert_eq!(policy.confidence(5, &[]), 0.0);
    }
}
