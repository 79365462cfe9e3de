//! The operations the worker pipeline requires from persistence.
//!
//! Workers depend on this trait, not on Postgres: any implementation works.
//! [`Store`](crate::postgres::Store) provides the production implementation;
//! tests provide in-memory fakes.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use thornwall_common::{ActivityLog, Group, SubjectId, User, UserReasonType};

use crate::error::Result;
use crate::postgres::{CondoPlayer, StatsSnapshot, Store};

#[async_trait]
pub trait PipelineStore: Send + Sync {
    // --- Users ---

    async fn get_user_to_scan(&self) -> Result<User>;
    async fn get_users_by_ids(
        &self,
        ids: &[SubjectId],
        with_reasons: bool,
    ) -> Result<HashMap<SubjectId, User>>;
    async fn save_users(&self, users: Vec<User>) -> Result<()>;
    async fn get_flagged_users_count(&self) -> Result<u64>;
    async fn get_users_to_check(&self, limit: usize)
        -> Result<(Vec<SubjectId>, Vec<SubjectId>)>;
    async fn mark_users_ban_status(&self, ids: &[SubjectId], banned: bool) -> Result<()>;
    async fn purge_old_cleared_users(&self, cutoff: DateTime<Utc>) -> Result<u64>;
    async fn get_users_for_thumbnail_update(&self, limit: usize) -> Result<Vec<User>>;
    async fn update_user_thumbnails(
        &self,
        thumbnails: &HashMap<SubjectId, String>,
    ) -> Result<()>;
    async fn delete_user(&self, id: SubjectId) -> Result<bool>;
    async fn get_flagged_users_missing_reason(
        &self,
        kind: UserReasonType,
        limit: usize,
    ) -> Result<Vec<User>>;

    // --- Groups ---

    async fn get_group_to_scan(&self) -> Result<Group>;
    async fn get_groups_by_ids(&self, ids: &[SubjectId])
        -> Result<HashMap<SubjectId, Group>>;
    async fn save_groups(&self, groups: Vec<Group>) -> Result<()>;
    async fn get_groups_to_check(
        &self,
        limit: usize,
    ) -> Result<(Vec<SubjectId>, Vec<SubjectId>)>;
    async fn mark_groups_lock_status(&self, ids: &[SubjectId], locked: bool) -> Result<()>;
    async fn purge_old_cleared_groups(&self, cutoff: DateTime<Utc>) -> Result<u64>;
    async fn get_groups_for_thumbnail_update(&self, limit: usize) -> Result<Vec<Group>>;
    async fn update_group_thumbnails(
        &self,
        thumbnails: &HashMap<SubjectId, String>,
    ) -> Result<()>;

    // --- Group-member tracking ---

    async fn add_group_flags(
        &self,
        group_to_users: &HashMap<SubjectId, Vec<SubjectId>>,
    ) -> Result<()>;
    async fn get_trackings_to_check(
        &self,
        limit: usize,
        min_users: usize,
    ) -> Result<HashMap<SubjectId, Vec<SubjectId>>>;
    async fn mark_trackings_flagged(&self, group_ids: &[SubjectId]) -> Result<()>;

    // --- Condo players ---

    async fn condo_player_by_thumbnail(&self, thumbnail_url: &str) -> Result<CondoPlayer>;
    async fn condo_blacklist(&self, thumbnail_url: &str) -> Result<()>;
    async fn condo_bind_user(&self, thumbnail_url: &str, user_id: SubjectId) -> Result<()>;

    // --- Activity, sync, stats ---

    async fn log_activity(&self, entry: &ActivityLog) -> Result<()>;
    async fn get_user_guilds(&self, user_id: u64) -> Result<Vec<u64>>;
    async fn upsert_server_members(&self, members: &[(u64, u64)]) -> Result<()>;
    async fn is_user_data_redacted(&self, user_id: u64) -> Result<bool>;
    async fn purge_old_server_members(&self, cutoff: DateTime<Utc>) -> Result<u64>;
    async fn purge_redacted_members(&self) -> Result<u64>;
    async fn bucket_counts(&self) -> Result<StatsSnapshot>;
    async fn save_stats_snapshot(&self, snapshot: &StatsSnapshot) -> Result<()>;
    async fn last_stats_recorded_at(&self) -> Result<Option<DateTime<Utc>>>;
}

#[async_trait]
impl PipelineStore for Store {
    async fn get_user_to_scan(&self) -> Result<User> {
        self.users().get_user_to_scan().await
    }

    async fn get_users_by_ids(
        &self,
        ids: &[SubjectId],
        with_reasons: bool,
    ) -> Result<HashMap<SubjectId, User>> {
        self.users().get_users_by_ids(ids, with_reasons).await
    }

    async fn save_users(&self, users: Vec<User>) -> Result<()> {
        self.users().save_users(users).await
    }

    async fn get_flagged_users_count(&self) -> Result<u64> {
        self.users().get_flagged_users_count().await
    }

    async fn get_users_to_check(
        &self,
        limit: usize,
    ) -> Result<(Vec<SubjectId>, Vec<SubjectId>)> {
        self.users().get_users_to_check(limit).await
    }

    async fn mark_users_ban_status(&self, ids: &[SubjectId], banned: bool) -> Result<()> {
        self.users().mark_users_ban_status(ids, banned).await
    }

    async fn purge_old_cleared_users(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        self.users().purge_old_cleared_users(cutoff).await
    }

    async fn get_users_for_thumbnail_update(&self, limit: usize) -> Result<Vec<User>> {
        self.users().get_users_for_thumbnail_update(limit).await
    }

    async fn update_user_thumbnails(
        &self,
        thumbnails: &HashMap<SubjectId, String>,
    ) -> Result<()> {
        self.users().update_user_thumbnails(thumbnails).await
    }

    async fn delete_user(&self, id: SubjectId) -> Result<bool> {
        self.users().delete_user(id).await
    }

    async fn get_flagged_users_missing_reason(
        &self,
        kind: UserReasonType,
        limit: usize,
    ) -> Result<Vec<User>> {
        self.users()
            .get_flagged_users_missing_reason(kind, limit)
            .await
    }

    async fn get_group_to_scan(&self) -> Result<Group> {
        self.groups().get_group_to_scan().await
    }

    async fn get_groups_by_ids(
        &self,
        ids: &[SubjectId],
    ) -> Result<HashMap<SubjectId, Group>> {
        self.groups().get_groups_by_ids(ids).await
    }

    async fn save_groups(&self, groups: Vec<Group>) -> Result<()> {
        self.groups().save_groups(groups).await
    }

    async fn get_groups_to_check(
        &self,
        limit: usize,
    ) -> Result<(Vec<SubjectId>, Vec<SubjectId>)> {
        self.groups().get_groups_to_check(limit).await
    }

    async fn mark_groups_lock_status(&self, ids: &[SubjectId], locked: bool) -> Result<()> {
        self.groups().mark_groups_lock_status(ids, locked).await
    }

    async fn purge_old_cleared_groups(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        self.groups().purge_old_cleared_groups(cutoff).await
    }

    async fn get_groups_for_thumbnail_update(&self, limit: usize) -> Result<Vec<Group>> {
        self.groups().get_groups_for_thumbnail_update(limit).await
    }

    async fn update_group_thumbnails(
        &self,
        thumbnails: &HashMap<SubjectId, String>,
    ) -> Result<()> {
        self.groups().update_group_thumbnails(thumbnails).await
    }

    async fn add_group_flags(
        &self,
        group_to_users: &HashMap<SubjectId, Vec<SubjectId>>,
    ) -> Result<()> {
        self.tracking().add_group_flags(group_to_users).await
    }

    async fn get_trackings_to_check(
        &self,
        limit: usize,
        min_users: usize,
    ) -> Result<HashMap<SubjectId, Vec<SubjectId>>> {
        self.tracking().get_trackings_to_check(limit, min_users).await
    }

    async fn mark_trackings_flagged(&self, group_ids: &[SubjectId]) -> Result<()> {
        self.tracking().mark_trackings_flagged(group_ids).await
    }

    async fn condo_player_by_thumbnail(&self, thumbnail_url: &str) -> Result<CondoPlayer> {
        self.condo().get_player_by_thumbnail(thumbnail_url).await
    }

    async fn condo_blacklist(&self, thumbnail_url: &str) -> Result<()> {
        self.condo().blacklist_player(thumbnail_url).await
    }

    async fn condo_bind_user(&self, thumbnail_url: &str, user_id: SubjectId) -> Result<()> {
        self.condo().set_player_user(thumbnail_url, user_id).await
    }

    async fn log_activity(&self, entry: &ActivityLog) -> Result<()> {
        self.activity().log(entry).await
    }

    async fn get_user_guilds(&self, user_id: u64) -> Result<Vec<u64>> {
        self.sync().get_user_guilds(user_id).await
    }

    async fn upsert_server_members(&self, members: &[(u64, u64)]) -> Result<()> {
        self.sync().upsert_server_members(members).await
    }

    async fn is_user_data_redacted(&self, user_id: u64) -> Result<bool> {
        self.sync().is_user_data_redacted(user_id).await
    }

    async fn purge_old_server_members(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        self.sync().purge_old_server_members(cutoff).await
    }

    async fn purge_redacted_members(&self) -> Result<u64> {
        self.sync().purge_redacted_members().await
    }

    async fn bucket_counts(&self) -> Result<StatsSnapshot> {
        self.stats().bucket_counts().await
    }

    async fn save_stats_snapshot(&self, snapshot: &StatsSnapshot) -> Result<()> {
        self.stats().save_snapshot(snapshot).await
    }

    async fn last_stats_recorded_at(&self) -> Result<Option<DateTime<Utc>>> {
        self.stats().last_recorded_at().await
    }
}
