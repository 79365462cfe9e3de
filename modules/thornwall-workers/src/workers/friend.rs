//! Friend-network traversal worker.
//!
//! Pulls flagged/confirmed seeds from the store, walks their friend lists,
//! and feeds unseen friends through the user checker. Flagged seeds must
//! already have a meaningful footprint in the system (ten friends known and
//! at least 30% of the network) before their friends are expanded; confirmed
//! seeds always expand.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use thornwall_common::{context_sleep, SleepOutcome, SubjectId, SubjectStatus};
use thornwall_store::{PipelineStore, ProcessingCache, StatusReporter, StoreError};

use crate::checker::{CheckOptions, ThresholdChecker, UserChecker};
use crate::fetcher::{FriendSource, UserInfoSource};
use crate::harness::Worker;
use crate::progress::Bar;

use super::NotificationSink;

/// Minimum friends already in the system before a flagged seed expands.
const MIN_FRIENDS_IN_SYSTEM: usize = 10;
/// Minimum percentage of the seed's network already in the system.
const MIN_FRIEND_PERCENTAGE: f64 = 30.0;

const PAUSE_SLEEP: Duration = Duration::from_secs(5 * 60);
const IDLE_SLEEP: Duration = Duration::from_secs(10);
const ITERATION_PAUSE: Duration = Duration::from_secs(1);

pub struct FriendWorker {
    store: Arc<dyn PipelineStore>,
    friends: Arc<dyn FriendSource>,
    users: Arc<dyn UserInfoSource>,
    checker: Arc<UserChecker>,
    cache: Arc<ProcessingCache>,
    threshold: Arc<ThresholdChecker>,
    reporter: StatusReporter,
    bar: Bar,
    sink: Option<Arc<dyn NotificationSink>>,
    batch_size: usize,
    pending_friends: Vec<SubjectId>,
}

impl FriendWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn PipelineStore>,
        friends: Arc<dyn FriendSource>,
        users: Arc<dyn UserInfoSource>,
        checker: Arc<UserChecker>,
        cache: Arc<ProcessingCache>,
        threshold: Arc<ThresholdChecker>,
        reporter: StatusReporter,
        bar: Bar,
        sink: Option<Arc<dyn NotificationSink>>,
        batch_size: usize,
    ) -> Self {
        Self {
            store,
            friends,
            users,
            checker,
            cache,
            threshold,
            reporter,
            bar,
            sink,
            batch_size,
            pending_friends: Vec::new(),
        }
    }

    /// Accumulate unseen friend ids from seeds until a batch is filled.
    /// Returns `None` when no seeds are available and nothing is pending.
    pub async fn collect_batch(
        &mut self,
        ctx: &CancellationToken,
    ) -> thornwall_store::Result<Option<Vec<SubjectId>>> {
        let mut pending = std::mem::take(&mut self.pending_friends);

        while pending.len() < self.batch_size {
            if ctx.is_cancelled() {
                break;
            }

            let seed = match self.store.get_user_to_scan().await {
                Ok(seed) => seed,
                Err(StoreError::NotFound) => {
                    warn!("No more users to scan");
                    break;
                }
                Err(e) => {
                    self.pending_friends = pending;
                    return Err(e);
                }
            };

            let friend_ids = match self.friends.friend_ids(ctx, seed.id).await {
                Ok(ids) => ids,
                Err(e) => {
                    error!(user_id = seed.id, error = %e, "Error fetching friends");
                    continue;
                }
            };
            if friend_ids.is_empty() {
                continue;
            }

            let existing = self.store.get_users_by_ids(&friend_ids, false).await?;

            // Flagged seeds only expand once the network is saturated enough
            // to be signal rather than noise.
            if seed.status == SubjectStatus::Flagged {
                let existing_count = existing.len();
                let percentage = existing_count as f64 / friend_ids.len() as f64 * 100.0;
                if existing_count < MIN_FRIENDS_IN_SYSTEM || percentage < MIN_FRIEND_PERCENTAGE {
                    debug!(
                        user_id = seed.id,
                        total_friends = friend_ids.len(),
                        existing_friends = existing_count,
                        friend_percentage = percentage,
                        "Flagged seed does not meet expansion criteria"
                    );
                    continue;
                }
                info!(
                    user_id = seed.id,
                    total_friends = friend_ids.len(),
                    existing_friends = existing_count,
                    friend_percentage = percentage,
                    "Expanding flagged seed"
                );
            } else {
                info!(
                    user_id = seed.id,
                    total_friends = friend_ids.len(),
                    existing_friends = existing.len(),
                    "Expanding confirmed seed"
                );
            }

            let new_ids: Vec<SubjectId> = friend_ids
                .iter()
                .filter(|id| !existing.contains_key(id))
                .copied()
                .collect();
            let unprocessed = self.cache.filter_unprocessed(&new_ids).await?;
            pending.extend(unprocessed);
        }

        if pending.is_empty() {
            return Ok(None);
        }

        let take = pending.len().min(self.batch_size);
        let batch: Vec<SubjectId> = pending.drain(..take).collect();
        self.pending_friends = pending;
        Ok(Some(batch))
    }
}

#[async_trait]
impl Worker for FriendWorker {
    fn kind(&self) -> &'static str {
        "friend"
    }

    async fn run(&mut self, ctx: CancellationToken) {
        info!(worker_id = self.reporter.worker_id(), "Friend worker started");
        self.reporter.start(&ctx);

        while !ctx.is_cancelled() {
            self.bar.reset();
            self.reporter.set_healthy(true);

            // Backpressure: do not add flags faster than reviewers clear them.
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

            self.bar.set_step_message("Processing friends batch", 20);
            self.reporter
                .update_status("Processing friends batch", 20)
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
                    error!(error = %e, "Error processing friends batch");
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
            match self
                .checker
                .process_users(&ctx, infos, CheckOptions::default())
                .await
            {
                Ok(outcome) => {
                    if let (Some(sink), false) = (&self.sink, outcome.newly_flagged.is_empty()) {
                        sink.notify_flagged(&outcome.newly_flagged).await;
                    }
                }
                Err(e) => {
                    error!(error = %e, "Error checking users");
                    self.reporter.set_healthy(false);
                }
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
