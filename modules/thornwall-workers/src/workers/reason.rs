//! Reason worker: regenerates missing profile reasons for flagged users.
//!
//! Always single-instance; it exists to backfill analysis for subjects
//! flagged by cheaper signals (friends, groups) that never went through the
//! profile model.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use thornwall_common::{context_sleep, SleepOutcome, UserReasonType};
use thornwall_store::{PipelineStore, StatusReporter};

use crate::analyzer::{Analyzer, SharedReasons};
use crate::harness::Worker;
use crate::progress::Bar;

const BATCH_SIZE: usize = 50;
const IDLE_SLEEP: Duration = Duration::from_secs(30);
const ITERATION_PAUSE: Duration = Duration::from_secs(1);

pub struct ReasonWorker {
    store: Arc<dyn PipelineStore>,
    profile_analyzer: Arc<dyn Analyzer>,
    reporter: StatusReporter,
    bar: Bar,
}

impl ReasonWorker {
    pub fn new(
        store: Arc<dyn PipelineStore>,
        profile_analyzer: Arc<dyn Analyzer>,
        reporter: StatusReporter,
        bar: Bar,
    ) -> Self {
        Self {
            store,
            profile_analyzer,
            reporter,
            bar,
        }
    }
}

#[async_trait]
impl Worker for ReasonWorker {
    fn kind(&self) -> &'static str {
        "reason"
    }

    async fn run(&mut self, ctx: CancellationToken) {
        info!(worker_id = self.reporter.worker_id(), "Reason worker started");
        self.reporter.start(&ctx);

        while !ctx.is_cancelled() {
            self.bar.reset();
            self.reporter.set_healthy(true);

            self.bar.set_step_message("Finding users without reasons", 20);
            self.reporter
                .update_status("Finding users without reasons", 20)
                .await;
            let users = match self
                .store
                .get_flagged_users_missing_reason(UserReasonType::Profile, BATCH_SIZE)
                .await
            {
                Ok(users) => users,
                Err(e) => {
                    error!(error = %e, "Error finding users without reasons");
                    self.reporter.set_healthy(false);
                    if context_sleep(&ctx, IDLE_SLEEP).await == SleepOutcome::Cancelled {
                        break;
                    }
                    continue;
                }
            };

            if users.is_empty() {
                self.bar.set_step_message("Nothing to regenerate, waiting", 0);
                self.reporter
                    .update_status("Nothing to regenerate, waiting", 0)
                    .await;
                if context_sleep(&ctx, IDLE_SLEEP).await == SleepOutcome::Cancelled {
                    break;
                }
                continue;
            }

            self.bar.set_step_message("Regenerating profile reasons", 60);
            self.reporter
                .update_status("Regenerating profile reasons", 60)
                .await;

            let reasons = SharedReasons::new();
            if let Err(e) = self.profile_analyzer.analyze(&ctx, &users, &reasons).await {
                error!(error = %e, "Profile regeneration failed");
                self.reporter.set_healthy(false);
            }

            let reason_map = reasons.snapshot();
            let mut updated = Vec::new();
            for mut user in users {
                if let Some(new_reasons) = reason_map.get(&user.id) {
                    user.reasons.merge_from(new_reasons.clone());
                    user.recompute_confidence();
                    updated.push(user);
                }
            }

            let regenerated = updated.len();
            if !updated.is_empty() {
                if let Err(e) = self.store.save_users(updated).await {
                    error!(error = %e, "Failed to save regenerated reasons");
                    self.reporter.set_healthy(false);
                }
            }

            self.bar.set_step_message("Completed", 100);
            self.reporter.update_status("Completed", 100).await;
            info!(regenerated, "Finished reason regeneration pass");

            if context_sleep(&ctx, ITERATION_PAUSE).await == SleepOutcome::Cancelled {
                break;
            }
        }

        self.reporter.stop();
    }
}
