//! Paginated friend enumeration.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use platform_client::PlatformClient;
use thornwall_common::{with_retry, RetryOptions, SubjectId};

use super::FriendSource;

/// Upper bound on pages per user; beyond this the network is saturated enough
/// for any analysis that follows.
const MAX_FRIEND_PAGES: usize = 50;

#[derive(Clone)]
pub struct FriendFetcher {
    platform: Arc<PlatformClient>,
}

impl FriendFetcher {
    pub fn new(platform: Arc<PlatformClient>) -> Self {
        Self { platform }
    }
}

#[async_trait]
impl FriendSource for FriendFetcher {
    async fn friend_ids(
        &self,
        ctx: &CancellationToken,
        user_id: SubjectId,
    ) -> anyhow::Result<Vec<SubjectId>> {
        let mut ids = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_FRIEND_PAGES {
            if ctx.is_cancelled() {
                break;
            }

            let page = with_retry(
                ctx,
                RetryOptions::transport(),
                platform_client::PlatformError::is_retryable,
                || self.platform.friends_page(user_id, cursor.as_deref()),
            )
            .await?;

            ids.extend(page.data.iter().map(|f| f.id));
            match page.next_page_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }

        Ok(ids)
    }
}
