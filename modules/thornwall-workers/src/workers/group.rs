//! Group-member traversal worker.
//!
//! The group analog of the friend worker: pulls flagged/confirmed group seeds
//! and feeds their unseen members through the user checker.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use thornwall_common::{context_sleep, SleepOutcome, SubjectId};
use thornwall_store::{PipelineStore, ProcessingCache, StatusReporter, StoreError};

use crate::checker::{CheckOptions, ThresholdChecker, UserChecker};
use crate::fetcher::{MemberSource, UserInfoSource};
use crate::harness::Worker;
use crate::progress::Bar;

const PAUSE_SLEEP: Duration = Duration::from_secs(5 * 60);
const IDLE_SLEEP: Duration = Duration::from_secs(10);
const ITERATION_PAUSE: Duration = Duration::from_secs(1);

pub struct GroupWorker {
    store: Arc<dyn PipelineStore>,
    members: Arc<dyn MemberSource>,
    users: Arc<dyn UserInfoSource>,
    checker: Arc<UserChecker>,
    cache: Arc<ProcessingCache>,
    threshold: Arc<ThresholdChecker>,
    reporter: StatusReporter,
    bar: Bar,
    batch_size: usize,
    pending_members: Vec<SubjectId>,
}

impl GroupWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn PipelineStore>,
        members: Arc<dyn MemberSource>,
        users: Arc<dyn UserInfoSource>,
        checker: Arc<UserChecker>,
        cache: Arc<ProcessingCache>,
        threshold: Arc<ThresholdChecker>,
        reporter: StatusReporter,
        bar: Bar,
        batch_size: usize,
    ) -> Self {
        Self {
            store,
            members,
            users,
            checker,
            cache,
            threshold,
            reporter,
            bar,
            batch_size,
            pending_members: Vec::new(),
        }
    }

    async fn collect_batch(
        &mut self,
        ctx: &CancellationToken,
    ) -> thornwall_store::Result<Option<Vec<SubjectId>>> {
        let mut pending = std::mem::take(&mut self.pending_members);

        while pending.len() < self.batch_size {
            if ctx.is_cancelled() {
                break;
            }

            let seed = match self.store.get_group_to_scan().await {
                Ok(seed) => seed,
                Err(StoreError::NotFound) => {
                    warn!("No more groups to scan");
                    break;
                }
                Err(e) => {
                    self.pending_members = pending;
                    return Err(e);
                }
            };

            let member_ids = match self.members.member_ids(ctx, seed.id).await {
                Ok(ids) => ids,
                Err(e) => {
                    error!(group_id = seed.id, error = %e, "Error fetching group members");
                    continue;
                }
            };
            if member_ids.is_empty() {
                continue;
            }

            let existing = self.store.get_users_by_ids(&member_ids, false).await?;
            let new_ids: Vec<SubjectId> = member_ids
                .iter()
                .filter(|id| !existing.contains_key(id))
                .copied()
                .collect();
            let unprocessed = self.cache.filter_unprocessed(&new_ids).await?;

            info!(
                group_id = seed.id,
                total_members = member_ids.len(),
                existing_members = existing.len(),
                added = unprocessed.len(),
                "Expanding group seed"
            );
            pending.extend(unprocessed);
        }

        if pending.is_empty() {
            return Ok(None);
        }

        let take = pending.len().min(self.batch_size);
        let batch: Vec<SubjectId> = pending.drain(..take).collect();
        self.pending_members = pending;
        Ok(Some(batch))
    }
}

#[async_trait]
impl Worker for GroupWorker {
    fn kind(&self) -> &'static str {
        "group"
    }

    async fn run(&mut self, ctx: CancellationToken) {
        info!(worker_id = self.reporter.worker_id(), "Group worker started");
        self.reporter.start(&ctx);

        while !ctx.is_cancelled() {
            self.bar.reset();
            self.reporter.set_healthy(true);

            match self.threshold.check().await {
                Ok((true, count)) => {
                    let message = format!(
                        "Paused - {count} flagged users exceeds threshold of {}",
                        self.threshold.limit()
                    );
                    self.bar.set_step_message(&message, 0);
                    self.reporter.update_status(message, 0).await;
                    if context_sleep(&ctx, PAUSE_SLEEP).await == SleepOutcome::Cancelled {
                        break;
                    }
                    continue;
                }
                Ok((false, _)) => {}
                Err(e) => {
                    error!(error = %e, "Error getting flagged users count");
                    self.reporter.set_healthy(false);
                    if context_sleep(&ctx, PAUSE_SLEEP).await == SleepOutcome::Cancelled {
                        break;
                    }
                    continue;
                }
            }

            self.bar.set_step_message("Processing members batch", 20);
            self.reporter
                .update_status("Processing members batch", 20)
                .await;
            let batch = match self.collect_batch(&ctx).await {
                Ok(Some(batch)) => batch,
                Ok(None) => {
                    if context_sleep(&ctx, IDLE_SLEEP).await == SleepOutcome::Cancelled {
                        break;
                    }
                    continue;
                }
                Err(e) => {
                    error!(error = %e, "Error processing members batch");
                    self.reporter.set_healthy(false);
                    if context_sleep(&ctx, PAUSE_SLEEP).await == SleepOutcome::Cancelled {
                        break;
                    }
                    continue;
                }
            };

            self.bar.set_step_message("Fetching user info", 40);
            self.reporter.update_status("Fetching user info", 40).await;
            let infos = self.users.fetch_infos(&ctx, &batch).await;

            self.bar.set_step_message("Processing users", 60);
            self.reporter.update_status("Processing users", 60).await;
            if let Err(e) = self
                .checker
                .process_users(&ctx, infos, CheckOptions::default())
                .await
            {
                error!(error = %e, "Error checking users");
                self.reporter.set_healthy(false);
            }

            self.bar.set_step_message("Completed", 100);
            self.reporter.update_status("Completed", 100).await;

            if context_sleep(&ctx, ITERATION_PAUSE).await == SleepOutcome::Cancelled {
                break;
            }
        }

        self.reporter.stop();
    }
}
