//! Statistics worker: hourly snapshots of bucket counts and queue lengths.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use thornwall_common::{context_sleep, Priority, SleepOutcome};
use thornwall_store::{PipelineStore, PriorityQueue, StatusReporter};

use crate::harness::Worker;
use crate::progress::Bar;

const SNAPSHOT_INTERVAL: chrono::Duration = chrono::Duration::hours(1);
const POLL_SLEEP: Duration = Duration::from_secs(60);

pub struct StatsWorker {
    store: Arc<dyn PipelineStore>,
    queue: Arc<PriorityQueue>,
    reporter: StatusReporter,
    bar: Bar,
}

impl StatsWorker {
    pub fn new(
        store: Arc<dyn PipelineStore>,
        queue: Arc<PriorityQueue>,
        reporter: StatusReporter,
        bar: Bar,
    ) -> Self {
        Self {
            store,
            queue,
            reporter,
            bar,
        }
    }

    async fn snapshot_due(&self) -> thornwall_store::Result<bool> {
        match self.store.last_stats_recorded_at().await? {
            Some(last) => Ok(Utc::now() - last >= SNAPSHOT_INTERVAL),
            None => Ok(true),
        }
    }

    async fn record_snapshot(&self) -> thornwall_store::Result<()> {
        let mut snapshot = self.store.bucket_counts().await?;
        snapshot.queue_high = self.queue.length(Priority::High).await? as i64;
        snapshot.queue_normal = self.queue.length(Priority::Normal).await? as i64;
        snapshot.queue_low = self.queue.length(Priority::Low).await? as i64;

        self.store.save_stats_snapshot(&snapshot).await?;
        info!(
            flagged_users = snapshot.flagged_users,
            confirmed_users = snapshot.confirmed_users,
            flagged_groups = snapshot.flagged_groups,
            "Recorded statistics snapshot"
        );
        Ok(())
    }
}

#[async_trait]
impl Worker for StatsWorker {
    fn kind(&self) -> &'static str {
        "stats"
    }

    async fn run(&mut self, ctx: CancellationToken) {
        info!(worker_id = self.reporter.worker_id(), "Stats worker started");
        self.reporter.start(&ctx);

        while !ctx.is_cancelled() {
            self.bar.reset();
            self.reporter.set_healthy(true);

            match self.snapshot_due().await {
                Ok(true) => {
                    self.bar.set_step_message("Recording snapshot", 50);
                    self.reporter.update_status("Recording snapshot", 50).await;
                    if let Err(e) = self.record_snapshot().await {
                        error!(error = %e, "Failed to record statistics snapshot");
                        self.reporter.set_healthy(false);
                    } else {
                        self.bar.set_step_message("Completed", 100);
                        self.reporter.update_status("Completed", 100).await;
                    }
                }
                Ok(false) => {
                    self.bar.set_step_message("Waiting for next snapshot", 0);
                    self.reporter
                        .update_status("Waiting for next snapshot", 0)
                        .await;
                }
                Err(e) => {
                    error!(error = %e, "Failed to read last snapshot time");
                    self.reporter.set_healthy(false);
                }
            }

            if context_sleep(&ctx, POLL_SLEEP).await == SleepOutcome::Cancelled {
                break;
            }
        }

        self.reporter.stop();
    }
}
