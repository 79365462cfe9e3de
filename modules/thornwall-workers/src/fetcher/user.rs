//! User enrichment: profile, friends, groups, outfits in one record.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use platform_client::PlatformClient;
use thornwall_common::{
    with_retry, GroupMembershipRecord, OutfitRecord, RetryOptions, SubjectId, User,
};

use super::{FriendFetcher, FriendSource, ImageSource, UserInfoSource};

/// How many users are enriched concurrently.
const ENRICH_CONCURRENCY: usize = 8;

pub struct UserFetcher {
    platform: Arc<PlatformClient>,
    friends: FriendFetcher,
}

impl UserFetcher {
    pub fn new(platform: Arc<PlatformClient>) -> Self {
        Self {
            friends: FriendFetcher::new(platform.clone()),
            platform,
        }
    }

    async fn enrich(&self, ctx: &CancellationToken, details: platform_client::UserDetails) -> Option<User> {
        let mut user = User::new(
            details.id,
            details.name,
            details.display_name,
            details.description,
            details.created_at,
        );
        user.is_banned = details.is_banned;

        match self.friends.friend_ids(ctx, user.id).await {
            Ok(ids) => user.friend_ids = ids,
            Err(e) => {
                warn!(user_id = user.id, error = %e, "Failed to fetch friends");
            }
        }

        match self.platform.user_groups(user.id).await {
            Ok(memberships) => {
                user.groups = memberships
                    .into_iter()
                    .map(|m| GroupMembershipRecord {
                        group_id: m.group.id,
                        group_name: m.group.name,
                        role: m.role.map(|r| r.name).unwrap_or_default(),
                        member_count: m.group.member_count,
                    })
                    .collect();
            }
            Err(e) => {
                warn!(user_id = user.id, error = %e, "Failed to fetch groups");
            }
        }

        match self.platform.user_outfits(user.id).await {
            Ok(outfits) => {
                user.outfits = outfits
                    .into_iter()
                    .map(|o| OutfitRecord {
                        outfit_id: o.id,
                        name: o.name,
                    })
                    .collect();
            }
            Err(e) => {
                warn!(user_id = user.id, error = %e, "Failed to fetch outfits");
            }
        }

        Some(user)
    }

    /// Which of the given users are banned on the platform.
    pub async fn fetch_banned_users(
        &self,
        ctx: &CancellationToken,
        ids: &[SubjectId],
    ) -> anyhow::Result<Vec<SubjectId>> {
        let banned = with_retry(
            ctx,
            RetryOptions::transport(),
            platform_client::PlatformError::is_retryable,
            || self.platform.are_banned(ids),
        )
        .await?;
        Ok(banned)
    }
}

#[async_trait]
impl UserInfoSource for UserFetcher {
    async fn fetch_infos(&self, ctx: &CancellationToken, ids: &[SubjectId]) -> Vec<User> {
        if ids.is_empty() {
            return Vec::new();
        }

        let details = match with_retry(
            ctx,
            RetryOptions::transport(),
            platform_client::PlatformError::is_retryable,
            || self.platform.get_users(ids),
        )
        .await
        {
            Ok(details) => details,
            Err(e) => {
                warn!(count = ids.len(), error = %e, "Failed to fetch user details");
                return Vec::new();
            }
        };

        let users: Vec<User> = stream::iter(details)
            .map(|d| self.enrich(ctx, d))
            .buffer_unordered(ENRICH_CONCURRENCY)
            .filter_map(|user| async move { user })
            .collect()
            .await;

        debug!(
            requested = ids.len(),
            fetched = users.len(),
            "Fetched user infos"
        );
        users
    }
}

/// Image downloads routed through the platform client.
pub struct PlatformImageSource {
    platform: Arc<PlatformClient>,
}

impl PlatformImageSource {
    pub fn new(platform: Arc<PlatformClient>) -> Self {
        Self { platform }
    }
}

#[async_trait]
impl ImageSource for PlatformImageSource {
    async fn fetch_image(&self, ctx: &CancellationToken, url: &str) -> anyhow::Result<Vec<u8>> {
        let bytes = with_retry(
            ctx,
            RetryOptions::transport(),
            platform_client::PlatformError::is_retryable,
            || self.platform.download_image(url),
        )
        .await?;
        Ok(bytes)
    }
}
