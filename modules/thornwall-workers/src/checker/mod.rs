//! The user checker orchestrates analyzers over a batch and persists the
//! outcome.

mod threshold;

pub use threshold::ThresholdChecker;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use thornwall_common::{
    ActivityLog, ActivityTarget, ActivityType, SubjectId, SubjectStatus, User,
};
use thornwall_store::{PipelineStore, ProcessingCache};

use crate::analyzer::{Analyzer, SharedReasons};

/// Hard ceiling on one batch check.
const BATCH_TIMEOUT: Duration = Duration::from_secs(180);

/// Externally supplied analyzer-level switches.
#[derive(Debug, Clone, Copy, Default)]
pub struct CheckOptions {
    pub skip_outfit_analysis: bool,
}

#[derive(Debug, Default)]
pub struct CheckOutcome {
    pub total: usize,
    pub flagged: usize,
    /// Subjects flagged for the first time by this batch.
    pub newly_flagged: Vec<SubjectId>,
}

pub struct UserChecker {
    store: Arc<dyn PipelineStore>,
    cache: Arc<ProcessingCache>,
    analyzers: Vec<Arc<dyn Analyzer>>,
}

impl UserChecker {
    pub fn new(
        store: Arc<dyn PipelineStore>,
        cache: Arc<ProcessingCache>,
        analyzers: Vec<Arc<dyn Analyzer>>,
    ) -> Self {
        Self {
            store,
            cache,
            analyzers,
        }
    }

    /// Run every analyzer over the batch, merge the resulting reasons, and
    /// persist flagged subjects. Analyzer faults never abort the batch; a
    /// batch that outlives the timeout is persisted from whatever reasons
    /// accumulated.
    pub async fn process_users(
        &self,
        ctx: &CancellationToken,
        subjects: Vec<User>,
        options: CheckOptions,
    ) -> anyhow::Result<CheckOutcome> {
        if subjects.is_empty() {
            return Ok(CheckOutcome::default());
        }
        let total = subjects.len();

        let reasons = SharedReasons::new();
        let child_ctx = ctx.child_token();

        // Fan out across analyzers; each failure costs only its reason type.
        let runs = self
            .analyzers
            .iter()
            .filter(|a| !(options.skip_outfit_analysis && a.name() == "outfit"))
            .map(|analyzer| {
                let reasons = reasons.clone();
                let ctx = child_ctx.clone();
                let subjects = &subjects;
                async move {
                    if let Err(e) = analyzer.analyze(&ctx, subjects, &reasons).await {
                        error!(analyzer = analyzer.name(), error = %e, "Analyzer failed");
                    }
                }
            });

        if tokio::time::timeout(BATCH_TIMEOUT, join_all(runs))
            .await
            .is_err()
        {
            warn!(total, "Batch check timed out; persisting partial results");
            child_ctx.cancel();
        }

        let reason_map = reasons.snapshot();

        // Merge reasons into subjects and collect what changed.
        let mut to_save = Vec::new();
        let mut newly_flagged = Vec::new();
        let mut group_flags: HashMap<SubjectId, Vec<SubjectId>> = HashMap::new();
        let all_ids: Vec<SubjectId> = subjects.iter().map(|s| s.id).collect();

        for mut subject in subjects {
            let Some(new_reasons) = reason_map.get(&subject.id) else {
                continue;
            };

            subject.reasons.merge_from(new_reasons.clone());
            subject.recompute_confidence();
            if subject.status == SubjectStatus::Unflagged {
                subject.status = SubjectStatus::Flagged;
                newly_flagged.push(subject.id);
            }

            for membership in &subject.groups {
                group_flags
                    .entry(membership.group_id)
                    .or_default()
                    .push(subject.id);
            }
            to_save.push(subject);
        }

        let flagged = to_save.len();
        if !to_save.is_empty() {
            self.store.save_users(to_save).await?;
            self.store.add_group_flags(&group_flags).await?;
        }

        for id in &newly_flagged {
            if let Err(e) = self
                .store
                .log_activity(&ActivityLog::new(
                    ActivityTarget::user(*id),
                    ActivityType::UserFlagged,
                ))
                .await
            {
                warn!(user_id = id, error = %e, "Failed to log flag activity");
            }
        }

        if let Err(e) = self.cache.mark_processed(&all_ids).await {
            warn!(error = %e, "Failed to mark subjects processed");
        }

        info!(total, flagged, new = newly_flagged.len(), "Finished checking batch");
        Ok(CheckOutcome {
            total,
            flagged,
            newly_flagged,
        })
    }
}
