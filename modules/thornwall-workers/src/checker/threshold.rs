//! Backpressure against reviewer saturation.

use std::sync::Arc;

use tracing::info;

use thornwall_store::PipelineStore;

/// Pauses traversal workers while the flagged bucket is larger than reviewers
/// can clear.
pub struct ThresholdChecker {
    store: Arc<dyn PipelineStore>,
    flagged_limit: u64,
}

impl ThresholdChecker {
    pub fn new(store: Arc<dyn PipelineStore>, flagged_limit: u64) -> Self {
        Self {
            store,
            flagged_limit,
        }
    }

    pub fn limit(&self) -> u64 {
        self.flagged_limit
    }

    /// Returns `(exceeded, current_count)`.
    pub async fn check(&self) -> thornwall_store::Result<(bool, u64)> {
        let count = self.store.get_flagged_users_count().await?;
        let exceeded = count >= self.flagged_limit;
        if exceeded {
            info!(
                flagged = count,
                limit = self.flagged_limit,
                "Flagged-user threshold exceeded"
            );
        }
        Ok((exceeded, count))
    }
}
