//! Sync worker: refreshes external chat-server rosters and enforces
//! user-data redaction.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use thornwall_common::{context_sleep, SleepOutcome};
use thornwall_store::{PipelineStore, StatusReporter};

use crate::harness::Worker;
use crate::progress::Bar;

use super::MembershipSource;

const SYNC_INTERVAL: Duration = Duration::from_secs(5 * 60);

pub struct SyncWorker {
    store: Arc<dyn PipelineStore>,
    memberships: Option<Arc<dyn MembershipSource>>,
    reporter: StatusReporter,
    bar: Bar,
}

impl SyncWorker {
    pub fn new(
        store: Arc<dyn PipelineStore>,
        memberships: Option<Arc<dyn MembershipSource>>,
        reporter: StatusReporter,
        bar: Bar,
    ) -> Self {
        Self {
            store,
            memberships,
            reporter,
            bar,
        }
    }

    async fn refresh_rosters(&self) {
        let Some(source) = &self.memberships else {
            return;
        };

        self.bar.set_step_message("Refreshing server rosters", 30);
        self.reporter
            .update_status("Refreshing server rosters", 30)
            .await;

        let rosters = match source.server_rosters().await {
            Ok(rosters) => rosters,
            Err(e) => {
                error!(error = %e, "Failed to fetch server rosters");
                self.reporter.set_healthy(false);
                return;
            }
        };

        let mut members: Vec<(u64, u64)> = Vec::new();
        for (server_id, user_ids) in rosters {
            for user_id in user_ids {
                match self.store.is_user_data_redacted(user_id).await {
                    Ok(true) => continue,
                    Ok(false) => members.push((server_id, user_id)),
                    Err(e) => {
                        error!(user_id, error = %e, "Redaction check failed");
                    }
                }
            }
        }

        if let Err(e) = self.store.upsert_server_members(&members).await {
            error!(error = %e, "Failed to upsert server members");
            self.reporter.set_healthy(false);
            return;
        }
        info!(members = members.len(), "Refreshed server rosters");
    }

    async fn enforce_redactions(&self) {
        self.bar.set_step_message("Enforcing redactions", 70);
        self.reporter.update_status("Enforcing redactions", 70).await;

        match self.store.purge_redacted_members().await {
            Ok(affected) if affected > 0 => {
                info!(affected, "Removed member rows for redacted users");
            }
            Ok(_) => {}
            Err(e) => {
                error!(error = %e, "Failed to purge redacted members");
                self.reporter.set_healthy(false);
            }
        }
    }
}

#[async_trait]
impl Worker for SyncWorker {
    fn kind(&self) -> &'static str {
        "sync"
    }

    async fn run(&mut self, ctx: CancellationToken) {
        info!(worker_id = self.reporter.worker_id(), "Sync worker started");
        self.reporter.start(&ctx);

        while !ctx.is_cancelled() {
            self.bar.reset();
            self.reporter.set_healthy(true);

            self.refresh_rosters().await;
            self.enforce_redactions().await;

            self.bar.set_step_message("Completed", 100);
            self.reporter.update_status("Completed", 100).await;

            if context_sleep(&ctx, SYNC_INTERVAL).await == SleepOutcome::Cancelled {
                break;
            }
        }

        self.reporter.stop();
    }
}
