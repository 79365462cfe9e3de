//! Fetchers resolve platform identifiers into enriched records.
//!
//! Batching and pagination policy live here; the platform client underneath
//! stays one-call-per-endpoint. Worker loops and analyzers depend on the
//! trait seams so tests can substitute canned data.

mod friend;
mod group;
mod thumbnail;
mod user;

pub use friend::FriendFetcher;
pub use group::GroupFetcher;
pub use thumbnail::ThumbnailFetcher;
pub use user::{PlatformImageSource, UserFetcher};

use std::collections::HashMap;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use platform_client::ThumbnailRequest;
use thornwall_common::{SubjectId, User};

/// Resolve subject ids into enriched user records (profile, friends, groups,
/// outfits). Unresolvable ids are skipped.
#[async_trait]
pub trait UserInfoSource: Send + Sync {
    async fn fetch_infos(&self, ctx: &CancellationToken, ids: &[SubjectId]) -> Vec<User>;
}

/// Enumerate a user's friends, fully paginated.
#[async_trait]
pub trait FriendSource: Send + Sync {
    async fn friend_ids(
        &self,
        ctx: &CancellationToken,
        user_id: SubjectId,
    ) -> anyhow::Result<Vec<SubjectId>>;
}

/// Enumerate a group's members, fully paginated.
#[async_trait]
pub trait MemberSource: Send + Sync {
    async fn member_ids(
        &self,
        ctx: &CancellationToken,
        group_id: SubjectId,
    ) -> anyhow::Result<Vec<SubjectId>>;
}

/// Resolve thumbnail requests into URLs. Unresolvable targets map to the
/// sentinel `"-"`.
#[async_trait]
pub trait ThumbnailSource: Send + Sync {
    async fn process_batch(
        &self,
        ctx: &CancellationToken,
        requests: Vec<ThumbnailRequest>,
        batch_size: usize,
    ) -> HashMap<u64, String>;
}

/// Download raw image bytes.
#[async_trait]
pub trait ImageSource: Send + Sync {
    async fn fetch_image(&self, ctx: &CancellationToken, url: &str) -> anyhow::Result<Vec<u8>>;
}
