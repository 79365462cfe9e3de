//! Batched thumbnail resolution.
//!
//! The platform's batch endpoint takes up to 100 requests. Larger request
//! sets are split into sub-batches and issued concurrently through a bounded
//! pool; a failing sub-batch is logged and never fails its siblings.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use platform_client::{PlatformClient, ThumbnailRequest, ThumbnailState};
use thornwall_common::{
    with_retry, Group, RetryOptions, SubjectId, User, THUMBNAIL_PLACEHOLDER,
};

use super::ThumbnailSource;

/// Concurrent sub-batches in flight.
const SUB_BATCH_CONCURRENCY: usize = 4;

pub struct ThumbnailFetcher {
    platform: Arc<PlatformClient>,
}

impl ThumbnailFetcher {
    pub fn new(platform: Arc<PlatformClient>) -> Self {
        Self { platform }
    }

    /// Avatar thumbnails for a set of users.
    pub async fn user_avatar_urls(
        &self,
        ctx: &CancellationToken,
        users: &[User],
    ) -> HashMap<SubjectId, String> {
        let requests = users
            .iter()
            .map(|u| ThumbnailRequest::avatar(u.id))
            .collect();
        self.process_batch(ctx, requests, 100).await
    }

    /// Icon thumbnails for a set of groups.
    pub async fn group_icon_urls(
        &self,
        ctx: &CancellationToken,
        groups: &[Group],
    ) -> HashMap<SubjectId, String> {
        let requests = groups
            .iter()
            .map(|g| ThumbnailRequest::group_icon(g.id))
            .collect();
        self.process_batch(ctx, requests, 100).await
    }
}

#[async_trait]
impl ThumbnailSource for ThumbnailFetcher {
    async fn process_batch(
        &self,
        ctx: &CancellationToken,
        requests: Vec<ThumbnailRequest>,
        batch_size: usize,
    ) -> HashMap<u64, String> {
        if requests.is_empty() {
            return HashMap::new();
        }
        let total = requests.len();
        let chunks: Vec<Vec<ThumbnailRequest>> = requests
            .chunks(batch_size.max(1))
            .map(|c| c.to_vec())
            .collect();

        let results: Vec<HashMap<u64, String>> = stream::iter(chunks)
            .map(|chunk| async move {
                let mut urls = HashMap::new();
                let responses = with_retry(
                    ctx,
                    RetryOptions::transport(),
                    platform_client::PlatformError::is_retryable,
                    || self.platform.batch_thumbnails(&chunk),
                )
                .await;

                match responses {
                    Ok(responses) => {
                        for response in responses {
                            let url = match (response.state, response.image_url) {
                                (ThumbnailState::Completed, Some(url)) => url,
                                _ => THUMBNAIL_PLACEHOLDER.to_string(),
                            };
                            urls.insert(response.target_id, url);
                        }
                    }
                    Err(e) => {
                        warn!(batch = chunk.len(), error = %e, "Thumbnail sub-batch failed");
                    }
                }
                urls
            })
            .buffer_unordered(SUB_BATCH_CONCURRENCY)
            .collect()
            .await;

        let mut merged = HashMap::new();
        for partial in results {
            merged.extend(partial);
        }

        debug!(
            requested = total,
            resolved = merged.len(),
            "Processed batch thumbnails"
        );
        merged
    }
}
