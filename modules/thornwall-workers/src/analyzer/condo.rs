//! Condo-player thumbnail matching.
//!
//! Subjects whose avatar thumbnail is in the condo-player table are flagged
//! at full confidence. A thumbnail seen on a second subject is evidence of a
//! shared avatar, not identity: the thumbnail is blacklisted, and the
//! previously bound subject is deleted when the condo match was its only
//! reason.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use thornwall_common::{
    ActivityLog, ActivityTarget, ActivityType, Reason, SubjectStatus, User, UserReasonType,
    THUMBNAIL_PLACEHOLDER,
};
use thornwall_store::{PipelineStore, StoreError};

use super::{Analyzer, SharedReasons};

pub struct CondoAnalyzer {
    store: Arc<dyn PipelineStore>,
}

impl CondoAnalyzer {
    pub fn new(store: Arc<dyn PipelineStore>) -> Self {
        Self { store }
    }

    /// Check one subject. Returns the reason to record, if any.
    async fn process_subject(&self, subject: &User) -> anyhow::Result<Option<Reason>> {
        let player = match self
            .store
            .condo_player_by_thumbnail(&subject.thumbnail_url)
            .await
        {
            Ok(player) => player,
            Err(StoreError::NotFound) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        if player.is_blacklisted {
            return Ok(None);
        }

        match player.user_id {
            Some(bound_id) if bound_id != subject.id => {
                // Shared avatar: blacklist and undo the earlier condo-only flag.
                self.store.condo_blacklist(&player.thumbnail_url).await?;
                self.store
                    .log_activity(
                        &ActivityLog::new(
                            ActivityTarget::user(bound_id),
                            ActivityType::CondoBlacklisted,
                        )
                        .with_details(serde_json::json!({
                            "thumbnail_url": player.thumbnail_url,
                            "new_user_id": subject.id,
                        })),
                    )
                    .await?;

                let bound = self.store.get_users_by_ids(&[bound_id], true).await?;
                if let Some(bound_user) = bound.get(&bound_id) {
                    let condo_only = bound_user.status == SubjectStatus::Flagged
                        && bound_user.reasons.len() == 1
                        && bound_user.reasons.contains(UserReasonType::Condo);
                    if condo_only {
                        self.store.delete_user(bound_id).await?;
                        self.store
                            .log_activity(&ActivityLog::new(
                                ActivityTarget::user(bound_id),
                                ActivityType::UserDeleted,
                            ))
                            .await?;
                        info!(
                            user_id = bound_id,
                            thumbnail_url = %player.thumbnail_url,
                            "Deleted condo-only user after thumbnail blacklist"
                        );
                    }
                }

                Ok(None)
            }
            Some(_) => {
                // Already bound to this subject.
                Ok(Some(Reason::new("User found in condo games.", 1.0)))
            }
            None => {
                self.store
                    .condo_bind_user(&player.thumbnail_url, subject.id)
                    .await?;
                Ok(Some(Reason::new("User found in condo games.", 1.0)))
            }
        }
    }
}

#[async_trait]
impl Analyzer for CondoAnalyzer {
    fn name(&self) -> &'static str {
        "condo"
    }

    async fn analyze(
        &self,
        ctx: &CancellationToken,
        subjects: &[User],
        reasons: &SharedReasons,
    ) -> anyhow::Result<()> {
        let existing_flags = reasons.len();

        for subject in subjects {
            if ctx.is_cancelled() {
                return Ok(());
            }
            if subject.thumbnail_url.is_empty()
                || subject.thumbnail_url == THUMBNAIL_PLACEHOLDER
            {
                continue;
            }

            match self.process_subject(subject).await {
                Ok(Some(reason)) => {
                    reasons.add(subject.id, UserReasonType::Condo, reason);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(user_id = subject.id, error = %e, "Condo check failed");
                }
            }
        }

        info!(
            total = subjects.len(),
            new_flags = reasons.len() - existing_flags,
            "Finished processing condo checks"
        );
        Ok(())
    }
}
