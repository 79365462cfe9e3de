//! Maintenance worker: reconciles platform state, purges stale rows, runs
//! the group-percentage sweep, and refreshes thumbnails.
//!
//! Single instance. Every step catches its own errors, logs, flips the
//! reporter unhealthy, and moves on to the next step.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use thornwall_common::{
    context_sleep, Group, GroupReasonType, Reason, SleepOutcome, SubjectId, SubjectStatus,
};
use thornwall_store::{PipelineStore, StatusReporter};

use crate::analyzer::GroupPercentagePolicy;
use crate::fetcher::{GroupFetcher, ThumbnailFetcher, UserFetcher};
use crate::harness::Worker;
use crate::progress::Bar;

const CYCLE_PAUSE: Duration = Duration::from_secs(10);

const CLEARED_RETENTION_DAYS: i64 = 30;
const SERVER_MEMBER_RETENTION_DAYS: i64 = 7;

pub struct MaintenanceConfig {
    pub purge_users_batch: usize,
    pub purge_groups_batch: usize,
    pub track_groups_batch: usize,
    pub thumbnail_users_batch: usize,
    pub thumbnail_groups_batch: usize,
    pub min_group_flagged_users: usize,
    pub max_group_members_track: u64,
    pub percentage_policy: GroupPercentagePolicy,
}

pub struct MaintenanceWorker {
    store: Arc<dyn PipelineStore>,
    users: Arc<UserFetcher>,
    groups: Arc<GroupFetcher>,
    thumbnails: Arc<ThumbnailFetcher>,
    reporter: StatusReporter,
    bar: Bar,
    config: MaintenanceConfig,
}

impl MaintenanceWorker {
    pub fn new(
        store: Arc<dyn PipelineStore>,
        users: Arc<UserFetcher>,
        groups: Arc<GroupFetcher>,
        thumbnails: Arc<ThumbnailFetcher>,
        reporter: StatusReporter,
        bar: Bar,
        config: MaintenanceConfig,
    ) -> Self {
        Self {
            store,
            users,
            groups,
            thumbnails,
            reporter,
            bar,
            config,
        }
    }

    async fn step(&self, message: &str, percent: u8) {
        self.bar.set_step_message(message, percent);
        self.reporter.update_status(message, percent).await;
    }

    /// Reconcile platform ban state in both directions.
    async fn process_banned_users(&self, ctx: &CancellationToken) {
        self.step("Processing banned users", 12).await;

        let (ids, currently_banned) = match self
            .store
            .get_users_to_check(self.config.purge_users_batch)
            .await
        {
            Ok(result) => result,
            Err(e) => {
                error!(error = %e, "Error getting users to check");
                self.reporter.set_healthy(false);
                return;
            }
        };
        if ids.is_empty() {
            info!("No users to check for bans");
            return;
        }

        let banned_now = match self.users.fetch_banned_users(ctx, &ids).await {
            Ok(banned) => banned,
            Err(e) => {
                error!(error = %e, "Error fetching banned users");
                self.reporter.set_healthy(false);
                return;
            }
        };

        let banned_set: std::collections::HashSet<SubjectId> =
            banned_now.iter().copied().collect();
        let unbanned: Vec<SubjectId> = currently_banned
            .iter()
            .filter(|id| !banned_set.contains(id))
            .copied()
            .collect();

        if !banned_now.is_empty() {
            match self.store.mark_users_ban_status(&banned_now, true).await {
                Ok(()) => info!(count = banned_now.len(), "Marked banned users"),
                Err(e) => {
                    error!(error = %e, "Error marking banned users");
                    self.reporter.set_healthy(false);
                }
            }
        }
        if !unbanned.is_empty() {
            match self.store.mark_users_ban_status(&unbanned, false).await {
                Ok(()) => info!(count = unbanned.len(), "Unmarked banned users"),
                Err(e) => {
                    error!(error = %e, "Error unmarking banned users");
                    self.reporter.set_healthy(false);
                }
            }
        }
    }

    /// Reconcile platform lock state for groups, both directions.
    async fn process_locked_groups(&self, ctx: &CancellationToken) {
        self.step("Processing locked groups", 24).await;

        let (ids, currently_locked) = match self
            .store
            .get_groups_to_check(self.config.purge_groups_batch)
            .await
        {
            Ok(result) => result,
            Err(e) => {
                error!(error = %e, "Error getting groups to check");
                self.reporter.set_healthy(false);
                return;
            }
        };
        if ids.is_empty() {
            info!("No groups to check for locks");
            return;
        }

        let locked_now = match self.groups.fetch_locked_groups(ctx, &ids).await {
            Ok(locked) => locked,
            Err(e) => {
                error!(error = %e, "Error fetching locked groups");
                self.reporter.set_healthy(false);
                return;
            }
        };

        let locked_set: std::collections::HashSet<SubjectId> =
            locked_now.iter().copied().collect();
        let unlocked: Vec<SubjectId> = currently_locked
            .iter()
            .filter(|id| !locked_set.contains(id))
            .copied()
            .collect();

        if !locked_now.is_empty() {
            match self.store.mark_groups_lock_status(&locked_now, true).await {
                Ok(()) => info!(count = locked_now.len(), "Marked locked groups"),
                Err(e) => {
                    error!(error = %e, "Error marking locked groups");
                    self.reporter.set_healthy(false);
                }
            }
        }
        if !unlocked.is_empty() {
            match self.store.mark_groups_lock_status(&unlocked, false).await {
                Ok(()) => info!(count = unlocked.len(), "Unmarked locked groups"),
                Err(e) => {
                    error!(error = %e, "Error unmarking locked groups");
                    self.reporter.set_healthy(false);
                }
            }
        }
    }

    async fn process_cleared_users(&self) {
        self.step("Processing cleared users", 36).await;

        let cutoff = Utc::now() - chrono::Duration::days(CLEARED_RETENTION_DAYS);
        match self.store.purge_old_cleared_users(cutoff).await {
            Ok(affected) if affected > 0 => {
                info!(affected, %cutoff, "Purged old cleared users");
            }
            Ok(_) => {}
            Err(e) => {
                error!(error = %e, "Error purging old cleared users");
                self.reporter.set_healthy(false);
            }
        }
    }

    async fn process_cleared_groups(&self) {
        self.step("Processing cleared groups", 48).await;

        let cutoff = Utc::now() - chrono::Duration::days(CLEARED_RETENTION_DAYS);
        match self.store.purge_old_cleared_groups(cutoff).await {
            Ok(affected) if affected > 0 => {
                info!(affected, %cutoff, "Purged old cleared groups");
            }
            Ok(_) => {}
            Err(e) => {
                error!(error = %e, "Error purging old cleared groups");
                self.reporter.set_healthy(false);
            }
        }
    }

    /// Sweep tracking rows and flag groups past the percentage policy.
    async fn process_group_tracking(&self, ctx: &CancellationToken) {
        self.step("Processing group tracking", 60).await;

        let trackings = match self
            .store
            .get_trackings_to_check(
                self.config.track_groups_batch,
                self.config.min_group_flagged_users,
            )
            .await
        {
            Ok(trackings) => trackings,
            Err(e) => {
                error!(error = %e, "Error checking group trackings");
                self.reporter.set_healthy(false);
                return;
            }
        };
        if trackings.is_empty() {
            info!("No groups to check for tracking");
            return;
        }

        let group_ids: Vec<SubjectId> = trackings.keys().copied().collect();
        let infos = match self.groups.fetch_group_infos(ctx, &group_ids).await {
            Ok(infos) => infos,
            Err(e) => {
                error!(error = %e, "Error fetching group infos");
                self.reporter.set_healthy(false);
                return;
            }
        };
        if infos.is_empty() {
            return;
        }

        let mut flagged_groups: Vec<Group> = Vec::new();
        for info in infos {
            if info.member_count > self.config.max_group_members_track {
                continue;
            }
            let Some(flagged_members) = trackings.get(&info.id) else {
                continue;
            };
            let Some(reason_message) = self
                .config
                .percentage_policy
                .should_flag(flagged_members.len(), info.member_count)
            else {
                continue;
            };

            // Group confidence derives from its flagged members' confidence.
            let members = match self.store.get_users_by_ids(flagged_members, false).await {
                Ok(members) => members,
                Err(e) => {
                    error!(group_id = info.id, error = %e, "Error loading flagged members");
                    continue;
                }
            };
            let confidences: Vec<f64> = members
                .values()
                .filter(|u| u.status != SubjectStatus::Unflagged)
                .map(|u| u.confidence)
                .collect();
            let confidence = self
                .config
                .percentage_policy
                .confidence(flagged_members.len(), &confidences);

            let mut group = Group::new(info.id, info.name, info.description);
            group.owner_id = info.owner.map(|o| o.user_id);
            group.member_count = info.member_count;
            group.is_locked = info.is_locked;
            group.status = SubjectStatus::Flagged;
            group
                .reasons
                .add(GroupReasonType::Member, Reason::new(reason_message, confidence));
            group.recompute_confidence();
            flagged_groups.push(group);
        }

        if flagged_groups.is_empty() {
            return;
        }

        // Attach icons before persisting.
        let icon_urls = self.thumbnails.group_icon_urls(ctx, &flagged_groups).await;
        let now = Utc::now();
        for group in flagged_groups.iter_mut() {
            if let Some(url) = icon_urls.get(&group.id) {
                group.thumbnail_url = url.clone();
                group.last_thumbnail_update = Some(now);
            }
        }

        let flagged_ids: Vec<SubjectId> = flagged_groups.iter().map(|g| g.id).collect();
        let checked = flagged_ids.len();
        if let Err(e) = self.store.save_groups(flagged_groups).await {
            error!(error = %e, "Failed to save flagged groups");
            self.reporter.set_healthy(false);
            return;
        }
        if let Err(e) = self.store.mark_trackings_flagged(&flagged_ids).await {
            error!(error = %e, "Failed to update tracking entries");
            self.reporter.set_healthy(false);
            return;
        }

        info!(
            checked_groups = trackings.len(),
            flagged_groups = checked,
            "Processed group trackings"
        );
    }

    async fn process_user_thumbnails(&self, ctx: &CancellationToken) {
        self.step("Processing user thumbnails", 72).await;

        let users = match self
            .store
            .get_users_for_thumbnail_update(self.config.thumbnail_users_batch)
            .await
        {
            Ok(users) => users,
            Err(e) => {
                error!(error = %e, "Error getting users for thumbnail update");
                self.reporter.set_healthy(false);
                return;
            }
        };
        if users.is_empty() {
            info!("No users need thumbnail updates");
            return;
        }

        let urls: HashMap<SubjectId, String> =
            self.thumbnails.user_avatar_urls(ctx, &users).await;
        if let Err(e) = self.store.update_user_thumbnails(&urls).await {
            error!(error = %e, "Error saving updated user thumbnails");
            self.reporter.set_healthy(false);
            return;
        }

        info!(
            processed = users.len(),
            updated = urls.len(),
            "Updated user thumbnails"
        );
    }

    async fn process_group_thumbnails(&self, ctx: &CancellationToken) {
        self.step("Processing group thumbnails", 84).await;

        let groups = match self
            .store
            .get_groups_for_thumbnail_update(self.config.thumbnail_groups_batch)
            .await
        {
            Ok(groups) => groups,
            Err(e) => {
                error!(error = %e, "Error getting groups for thumbnail update");
                self.reporter.set_healthy(false);
                return;
            }
        };
        if groups.is_empty() {
            info!("No groups need thumbnail updates");
            return;
        }

        let urls: HashMap<SubjectId, String> =
            self.thumbnails.group_icon_urls(ctx, &groups).await;
        if let Err(e) = self.store.update_group_thumbnails(&urls).await {
            error!(error = %e, "Error saving updated group thumbnails");
            self.reporter.set_healthy(false);
            return;
        }

        info!(
            processed = groups.len(),
            updated = urls.len(),
            "Updated group thumbnails"
        );
    }

    async fn process_old_server_members(&self) {
        self.step("Processing old server members", 96).await;

        let cutoff = Utc::now() - chrono::Duration::days(SERVER_MEMBER_RETENTION_DAYS);
        match self.store.purge_old_server_members(cutoff).await {
            Ok(affected) if affected > 0 => {
                info!(affected, %cutoff, "Purged old server members");
            }
            Ok(_) => {}
            Err(e) => {
                error!(error = %e, "Error purging old server members");
                self.reporter.set_healthy(false);
            }
        }
    }
}

#[async_trait]
impl Worker for MaintenanceWorker {
    fn kind(&self) -> &'static str {
        "maintenance"
    }

    async fn run(&mut self, ctx: CancellationToken) {
        info!(
            worker_id = self.reporter.worker_id(),
            "Maintenance worker started"
        );
        self.reporter.start(&ctx);

        while !ctx.is_cancelled() {
            self.bar.reset();
            self.reporter.set_healthy(true);

            self.process_banned_users(&ctx).await;
            self.process_locked_groups(&ctx).await;
            self.process_cleared_users().await;
            self.process_cleared_groups().await;
            self.process_group_tracking(&ctx).await;
            self.process_user_thumbnails(&ctx).await;
            self.process_group_thumbnails(&ctx).await;
            self.process_old_server_members().await;

            self.bar.set_step_message("Completed", 100);
            self.reporter.update_status("Completed", 100).await;

            if context_sleep(&ctx, CYCLE_PAUSE).await == SleepOutcome::Cancelled {
                break;
            }
        }

        self.reporter.stop();
    }
}
