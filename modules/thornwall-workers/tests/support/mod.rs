//! In-memory fakes for pipeline tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use thornwall_common::{ActivityLog, Group, SubjectId, SubjectStatus, User, UserReasonType};
use thornwall_store::{CondoPlayer, PipelineStore, StatsSnapshot, StoreError};
use thornwall_workers::analyzer::AnalysisBackend;
use thornwall_workers::analyzer::{
    FriendReasonBatch, OutfitAnalysis, OutfitThemeAnalysis, ProfileBatchAnalysis,
};
use thornwall_workers::fetcher::{FriendSource, ImageSource, ThumbnailSource, UserInfoSource};

// =============================================================================
// Store
// =============================================================================

#[derive(Default)]
pub struct FakeStore {
    pub users: Mutex<HashMap<SubjectId, User>>,
    pub groups: Mutex<HashMap<SubjectId, Group>>,
    pub scan_seeds: Mutex<VecDeque<User>>,
    pub condo_players: Mutex<HashMap<String, CondoPlayer>>,
    pub activities: Mutex<Vec<ActivityLog>>,
    pub deleted_users: Mutex<Vec<SubjectId>>,
    pub group_flags: Mutex<HashMap<SubjectId, Vec<SubjectId>>>,
}

impl FakeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_user(&self, user: User) {
        self.users.lock().unwrap().insert(user.id, user);
    }

    pub fn insert_group(&self, group: Group) {
        self.groups.lock().unwrap().insert(group.id, group);
    }

    pub fn push_seed(&self, user: User) {
        self.scan_seeds.lock().unwrap().push_back(user);
    }

    pub fn insert_condo_player(&self, player: CondoPlayer) {
        self.condo_players
            .lock()
            .unwrap()
            .insert(player.thumbnail_url.clone(), player);
    }

    pub fn saved_user(&self, id: SubjectId) -> Option<User> {
        self.users.lock().unwrap().get(&id).cloned()
    }

    pub fn activity_types(&self) -> Vec<thornwall_common::ActivityType> {
        self.activities
            .lock()
            .unwrap()
            .iter()
            .map(|a| a.activity_type)
            .collect()
    }
}

#[async_trait]
impl PipelineStore for FakeStore {
    async fn get_user_to_scan(&self) -> thornwall_store::Result<User> {
        self.scan_seeds
            .lock()
            .unwrap()
            .pop_front()
            .ok_or(StoreError::NotFound)
    }

    async fn get_users_by_ids(
        &self,
        ids: &[SubjectId],
        _with_reasons: bool,
    ) -> thornwall_store::Result<HashMap<SubjectId, User>> {
        let users = self.users.lock().unwrap();
        Ok(ids
            .iter()
            .filter_map(|id| users.get(id).map(|u| (*id, u.clone())))
            .collect())
    }

    async fn save_users(&self, users: Vec<User>) -> thornwall_store::Result<()> {
        let mut stored = self.users.lock().unwrap();
        for mut user in users {
            if let Some(existing) = stored.get(&user.id) {
                // Reviewed subjects keep their bucket; reasons merge per type.
                if existing.status.rank() > user.status.rank() {
                    user.status = existing.status;
                }
                let mut merged = existing.reasons.clone();
                merged.merge_from(user.reasons);
                user.reasons = merged;
                user.recompute_confidence();
            }
            stored.insert(user.id, user);
        }
        Ok(())
    }

    async fn get_flagged_users_count(&self) -> thornwall_store::Result<u64> {
        Ok(self
            .users
            .lock()
            .unwrap()
            .values()
            .filter(|u| u.status == SubjectStatus::Flagged)
            .count() as u64)
    }

    async fn get_users_to_check(
        &self,
        _limit: usize,
    ) -> thornwall_store::Result<(Vec<SubjectId>, Vec<SubjectId>)> {
        Ok((Vec::new(), Vec::new()))
    }

    async fn mark_users_ban_status(
        &self,
        ids: &[SubjectId],
        banned: bool,
    ) -> thornwall_store::Result<()> {
        let mut users = self.users.lock().unwrap();
        for id in ids {
            if let Some(user) = users.get_mut(id) {
                user.is_banned = banned;
            }
        }
        Ok(())
    }

    async fn purge_old_cleared_users(
        &self,
        _cutoff: DateTime<Utc>,
    ) -> thornwall_store::Result<u64> {
        Ok(0)
    }

    async fn get_users_for_thumbnail_update(
        &self,
        _limit: usize,
    ) -> thornwall_store::Result<Vec<User>> {
        Ok(Vec::new())
    }

    async fn update_user_thumbnails(
        &self,
        _thumbnails: &HashMap<SubjectId, String>,
    ) -> thornwall_store::Result<()> {
        Ok(())
    }

    async fn delete_user(&self, id: SubjectId) -> thornwall_store::Result<bool> {
        self.deleted_users.lock().unwrap().push(id);
        Ok(self.users.lock().unwrap().remove(&id).is_some())
    }

    async fn get_flagged_users_missing_reason(
        &self,
        kind: UserReasonType,
        limit: usize,
    ) -> thornwall_store::Result<Vec<User>> {
        Ok(self
            .users
            .lock()
            .unwrap()
            .values()
            .filter(|u| u.status == SubjectStatus::Flagged && !u.reasons.contains(kind))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn get_group_to_scan(&self) -> thornwall_store::Result<Group> {
        Err(StoreError::NotFound)
    }

    async fn get_groups_by_ids(
        &self,
        ids: &[SubjectId],
    ) -> thornwall_store::Result<HashMap<SubjectId, Group>> {
        let groups = self.groups.lock().unwrap();
        Ok(ids
            .iter()
            .filter_map(|id| groups.get(id).map(|g| (*id, g.clone())))
            .collect())
    }

    async fn save_groups(&self, groups: Vec<Group>) -> thornwall_store::Result<()> {
        let mut stored = self.groups.lock().unwrap();
        for group in groups {
            stored.insert(group.id, group);
        }
        Ok(())
    }

    async fn get_groups_to_check(
        &self,
        _limit: usize,
    ) -> thornwall_store::Result<(Vec<SubjectId>, Vec<SubjectId>)> {
        Ok((Vec::new(), Vec::new()))
    }

    async fn mark_groups_lock_status(
        &self,
        _ids: &[SubjectId],
        _locked: bool,
    ) -> thornwall_store::Result<()> {
        Ok(())
    }

    async fn purge_old_cleared_groups(
        &self,
        _cutoff: DateTime<Utc>,
    ) -> thornwall_store::Result<u64> {
        Ok(0)
    }

    async fn get_groups_for_thumbnail_update(
        &self,
        _limit: usize,
    ) -> thornwall_store::Result<Vec<Group>> {
        Ok(Vec::new())
    }

    async fn update_group_thumbnails(
        &self,
        _thumbnails: &HashMap<SubjectId, String>,
    ) -> thornwall_store::Result<()> {
        Ok(())
    }

    async fn add_group_flags(
        &self,
        group_to_users: &HashMap<SubjectId, Vec<SubjectId>>,
    ) -> thornwall_store::Result<()> {
        let mut flags = self.group_flags.lock().unwrap();
        for (group_id, user_ids) in group_to_users {
            flags.entry(*group_id).or_default().extend(user_ids);
        }
        Ok(())
    }

    async fn get_trackings_to_check(
        &self,
        _limit: usize,
        _min_users: usize,
    ) -> thornwall_store::Result<HashMap<SubjectId, Vec<SubjectId>>> {
        Ok(HashMap::new())
    }

    async fn mark_trackings_flagged(
        &self,
        _group_ids: &[SubjectId],
    ) -> thornwall_store::Result<()> {
        Ok(())
    }

    async fn condo_player_by_thumbnail(
        &self,
        thumbnail_url: &str,
    ) -> thornwall_store::Result<CondoPlayer> {
        self.condo_players
            .lock()
            .unwrap()
            .get(thumbnail_url)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn condo_blacklist(&self, thumbnail_url: &str) -> thornwall_store::Result<()> {
        if let Some(player) = self.condo_players.lock().unwrap().get_mut(thumbnail_url) {
            player.is_blacklisted = true;
        }
        Ok(())
    }

    async fn condo_bind_user(
        &self,
        thumbnail_url: &str,
        user_id: SubjectId,
    ) -> thornwall_store::Result<()> {
        if let Some(player) = self.condo_players.lock().unwrap().get_mut(thumbnail_url) {
            player.user_id = Some(user_id);
        }
        Ok(())
    }

    async fn log_activity(&self, entry: &ActivityLog) -> thornwall_store::Result<()> {
        self.activities.lock().unwrap().push(entry.clone());
        Ok(())
    }

    async fn get_user_guilds(&self, _user_id: u64) -> thornwall_store::Result<Vec<u64>> {
        Ok(Vec::new())
    }

    async fn upsert_server_members(
        &self,
        _members: &[(u64, u64)],
    ) -> thornwall_store::Result<()> {
        Ok(())
    }

    async fn is_user_data_redacted(&self, _user_id: u64) -> thornwall_store::Result<bool> {
        Ok(false)
    }

    async fn purge_old_server_members(
        &self,
        _cutoff: DateTime<Utc>,
    ) -> thornwall_store::Result<u64> {
        Ok(0)
    }

    async fn purge_redacted_members(&self) -> thornwall_store::Result<u64> {
        Ok(0)
    }

    async fn bucket_counts(&self) -> thornwall_store::Result<StatsSnapshot> {
        Ok(StatsSnapshot::default())
    }

    async fn save_stats_snapshot(
        &self,
        _snapshot: &StatsSnapshot,
    ) -> thornwall_store::Result<()> {
        Ok(())
    }

    async fn last_stats_recorded_at(
        &self,
    ) -> thornwall_store::Result<Option<DateTime<Utc>>> {
        Ok(None)
    }
}

// =============================================================================
// Sources
// =============================================================================

/// Friend lists keyed by user id.
#[derive(Default)]
pub struct FakeFriendSource {
    pub friends: HashMap<SubjectId, Vec<SubjectId>>,
}

#[async_trait]
impl FriendSource for FakeFriendSource {
    async fn friend_ids(
        &self,
        _ctx: &CancellationToken,
        user_id: SubjectId,
    ) -> anyhow::Result<Vec<SubjectId>> {
        Ok(self.friends.get(&user_id).cloned().unwrap_or_default())
    }
}

/// Enriched records keyed by id; unknown ids resolve to bare records.
#[derive(Default)]
pub struct FakeUserInfoSource {
    pub records: HashMap<SubjectId, User>,
}

#[async_trait]
impl UserInfoSource for FakeUserInfoSource {
    async fn fetch_infos(&self, _ctx: &CancellationToken, ids: &[SubjectId]) -> Vec<User> {
        ids.iter()
            .map(|id| {
                self.records.get(id).cloned().unwrap_or_else(|| {
                    User::new(*id, format!("user_{id}"), "", "", Utc::now())
                })
            })
            .collect()
    }
}

pub struct FakeThumbnailSource {
    pub urls: HashMap<u64, String>,
}

#[async_trait]
impl ThumbnailSource for FakeThumbnailSource {
    async fn process_batch(
        &self,
        _ctx: &CancellationToken,
        requests: Vec<platform_client::ThumbnailRequest>,
        _batch_size: usize,
    ) -> HashMap<u64, String> {
        requests
            .iter()
            .filter_map(|r| self.urls.get(&r.target_id).map(|u| (r.target_id, u.clone())))
            .collect()
    }
}

pub struct FakeImageSource;

#[async_trait]
impl ImageSource for FakeImageSource {
    async fn fetch_image(
        &self,
        _ctx: &CancellationToken,
        _url: &str,
    ) -> anyhow::Result<Vec<u8>> {
        Ok(vec![0u8; 16])
    }
}

// =============================================================================
// AI backend
// =============================================================================

/// Canned responses per call; errors model blocked content and transport
/// failures.
pub struct FakeBackend {
    pub profiles: Mutex<VecDeque<ai_client::Result<ProfileBatchAnalysis>>>,
    pub friend_reasons: Mutex<VecDeque<ai_client::Result<FriendReasonBatch>>>,
    pub outfit_violations: Mutex<VecDeque<ai_client::Result<OutfitAnalysis>>>,
    pub outfit_themes: Mutex<VecDeque<ai_client::Result<OutfitThemeAnalysis>>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            profiles: Mutex::new(VecDeque::new()),
            friend_reasons: Mutex::new(VecDeque::new()),
            outfit_violations: Mutex::new(VecDeque::new()),
            outfit_themes: Mutex::new(VecDeque::new()),
        }
    }
}

fn next<T>(queue: &Mutex<VecDeque<ai_client::Result<T>>>) -> ai_client::Result<T> {
    queue
        .lock()
        .unwrap()
        .pop_front()
        .unwrap_or(Err(ai_client::AiError::EmptyResponse))
}

#[async_trait]
impl AnalysisBackend for FakeBackend {
    async fn analyze_profiles(
        &self,
        _ctx: &CancellationToken,
        _payload: String,
    ) -> ai_client::Result<ProfileBatchAnalysis> {
        next(&self.profiles)
    }

    async fn generate_friend_reasons(
        &self,
        _ctx: &CancellationToken,
        _payload: String,
    ) -> ai_client::Result<FriendReasonBatch> {
        next(&self.friend_reasons)
    }

    async fn analyze_outfit_violations(
        &self,
        _ctx: &CancellationToken,
        _username: &str,
        _images: Vec<String>,
        _outfit_names: &[String],
    ) -> ai_client::Result<OutfitAnalysis> {
        next(&self.outfit_violations)
    }

    async fn analyze_outfit_themes(
        &self,
        _ctx: &CancellationToken,
        _username: &str,
        _images: Vec<String>,
        _outfit_names: &[String],
    ) -> ai_client::Result<OutfitThemeAnalysis> {
        next(&self.outfit_themes)
    }
}
