//! Per-feature throttles on in-flight AI requests.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::{AiError, Result};

/// Weighted semaphores bounding concurrent AI calls per feature. Permits are
/// acquired before each call and released when the guard drops, error paths
/// included.
#[derive(Clone)]
pub struct RequestLimits {
    outfit_analysis: Arc<Semaphore>,
}

impl RequestLimits {
    pub fn new(outfit_analysis_permits: usize) -> Self {
        Self {
            outfit_analysis: Arc::new(Semaphore::new(outfit_analysis_permits.max(1))),
        }
    }

    /// Acquire a permit for one outfit-analysis request.
    pub async fn acquire_outfit_analysis(&self) -> Result<OwnedSemaphorePermit> {
        self.outfit_analysis
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| AiError::LimiterClosed)
    }

    pub fn available_outfit_permits(&self) -> usize {
        self.outfit_analysis.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn permits_bound_concurrency() {
        let limits = RequestLimits::new(2);
        let a = limits.acquire_outfit_analysis().await.unwrap();
        let _b = limits.acquire_outfit_analysis().await.unwrap();
        assert_eq!(limits.available_outfit_permits(), 0);

        drop(a);
        assert_eq!(limits.available_outfit_permits(), 1);
    }

    #[tokio::test]
    async fn zero_permit_config_still_allows_progress() {
        let limits = RequestLimits::new(0);
        let _permit = limits.acquire_outfit_analysis().await.unwrap();
    }
}
