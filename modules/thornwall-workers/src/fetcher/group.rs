//! Group lookups and paginated member enumeration.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use platform_client::{GroupDetails, PlatformClient};
use thornwall_common::{with_retry, RetryOptions, SubjectId};

use super::MemberSource;

/// Upper bound on member pages per group; enormous groups are sampled from
/// the front rather than walked to the end.
const MAX_MEMBER_PAGES: usize = 100;

pub struct GroupFetcher {
    platform: Arc<PlatformClient>,
}

impl GroupFetcher {
    pub fn new(platform: Arc<PlatformClient>) -> Self {
        Self { platform }
    }

    /// Bulk group records; unknown ids are absent.
    pub async fn fetch_group_infos(
        &self,
        ctx: &CancellationToken,
        ids: &[SubjectId],
    ) -> anyhow::Result<Vec<GroupDetails>> {
        let groups = with_retry(
            ctx,
            RetryOptions::transport(),
            platform_client::PlatformError::is_retryable,
            || self.platform.get_groups(ids),
        )
        .await?;
        Ok(groups)
    }

    /// Which of the given groups are locked on the platform.
    pub async fn fetch_locked_groups(
        &self,
        ctx: &CancellationToken,
        ids: &[SubjectId],
    ) -> anyhow::Result<Vec<SubjectId>> {
        let groups = self.fetch_group_infos(ctx, ids).await?;
        Ok(groups
            .into_iter()
            .filter(|g| g.is_locked)
            .map(|g| g.id)
            .collect())
    }
}

#[async_trait]
impl MemberSource for GroupFetcher {
    async fn member_ids(
        &self,
        ctx: &CancellationToken,
        group_id: SubjectId,
    ) -> anyhow::Result<Vec<SubjectId>> {
        let mut ids = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_MEMBER_PAGES {
            if ctx.is_cancelled() {
                break;
            }

            let page = with_retry(
                ctx,
                RetryOptions::transport(),
                platform_client::PlatformError::is_retryable,
                || self.platform.group_members_page(group_id, cursor.as_deref()),
            )
            .await?;

            ids.extend(page.data.iter().map(|m| m.user_id));
            match page.next_page_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }

        Ok(ids)
    }
}
