//! Queue drain worker.
//!
//! Pulls items from the three priority levels in strict order, enriches the
//! subjects in one round-trip, runs the checker, and finalizes item status.
//! The queue's side index keeps the terminal status after removal.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use thornwall_common::{context_sleep, QueueStatus, SleepOutcome, SubjectId};
use thornwall_store::{PriorityQueue, StatusReporter};

use crate::checker::{CheckOptions, UserChecker};
use crate::fetcher::UserInfoSource;
use crate::harness::Worker;
use crate::progress::Bar;

const ERROR_SLEEP: Duration = Duration::from_secs(5 * 60);
const IDLE_SLEEP: Duration = Duration::from_secs(10);

pub struct QueueWorker {
    queue: Arc<PriorityQueue>,
    users: Arc<dyn UserInfoSource>,
    checker: Arc<UserChecker>,
    reporter: StatusReporter,
    bar: Bar,
    batch_size: usize,
}

impl QueueWorker {
    pub fn new(
        queue: Arc<PriorityQueue>,
        users: Arc<dyn UserInfoSource>,
        checker: Arc<UserChecker>,
        reporter: StatusReporter,
        bar: Bar,
        batch_size: usize,
    ) -> Self {
        Self {
            queue,
            users,
            checker,
            reporter,
            bar,
            batch_size,
        }
    }
}

#[async_trait]
impl Worker for QueueWorker {
    fn kind(&self) -> &'static str {
        "queue"
    }

    async fn run(&mut self, ctx: CancellationToken) {
        info!(worker_id = self.reporter.worker_id(), "Queue worker started");
        self.reporter.start(&ctx);

        while !ctx.is_cancelled() {
            self.bar.reset();
            self.reporter.set_healthy(true);

            self.bar.set_step_message("Getting next batch", 20);
            self.reporter.update_status("Getting next batch", 20).await;
            let items = match self.queue.dequeue(self.batch_size).await {
                Ok(items) => items,
                Err(e) => {
                    error!(error = %e, "Error getting next batch");
                    self.reporter.set_healthy(false);
                    if context_sleep(&ctx, ERROR_SLEEP).await == SleepOutcome::Cancelled {
                        break;
                    }
                    continue;
                }
            };

            if items.is_empty() {
                self.bar.set_step_message("No items to process, waiting", 0);
                self.reporter
                    .update_status("No items to process, waiting", 0)
                    .await;
                if context_sleep(&ctx, IDLE_SLEEP).await == SleepOutcome::Cancelled {
                    break;
                }
                continue;
            }

            let message = format!("Processing batch of {} items", items.len());
            self.bar.set_step_message(&message, 25);
            self.reporter.update_status(message, 25).await;

            for item in &items {
                if let Err(e) = self
                    .queue
                    .set_status(item.subject_id, QueueStatus::Processing)
                    .await
                {
                    warn!(subject_id = item.subject_id, error = %e, "Failed to update queue info");
                    self.reporter.set_healthy(false);
                }
            }

            let ids: Vec<SubjectId> = items.iter().map(|i| i.subject_id).collect();

            self.bar.set_step_message("Fetching user information", 50);
            self.reporter
                .update_status("Fetching user information", 50)
                .await;
            let infos = self.users.fetch_infos(&ctx, &ids).await;

            self.bar.set_step_message("Processing with AI", 75);
            self.reporter.update_status("Processing with AI", 75).await;
            if let Err(e) = self
                .checker
                .process_users(&ctx, infos, CheckOptions::default())
                .await
            {
                error!(error = %e, "Error checking queued users");
                self.reporter.set_healthy(false);
            }

            self.bar.set_step_message("Updating queue status", 100);
            self.reporter
                .update_status("Updating queue status", 100)
                .await;
            for item in &items {
                if let Err(e) = self
                    .queue
                    .set_status(item.subject_id, QueueStatus::Complete)
                    .await
                {
                    warn!(subject_id = item.subject_id, error = %e, "Failed to finalize queue info");
                }
                if let Err(e) = self.queue.remove(item.priority, item).await {
                    warn!(subject_id = item.subject_id, error = %e, "Failed to remove queue item");
                }
            }

            info!(total_items = items.len(), "Finished processing batch");
        }

        self.reporter.stop();
    }
}
