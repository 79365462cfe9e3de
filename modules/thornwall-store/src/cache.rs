//! Short-TTL dedupe markers for recently processed subjects.
//!
//! Hint-only: a missing marker means "go ahead", a present marker means a
//! worker finished this subject recently and re-processing would be wasted
//! effort. Never used for correctness.

use std::sync::Arc;
use std::time::Duration;

use thornwall_common::SubjectId;

use crate::error::Result;
use crate::kv::KvStore;

fn marker_key(subject_id: SubjectId) -> String {
    format!("processed:{subject_id}")
}

pub struct ProcessingCache {
    kv: Arc<dyn KvStore>,
    ttl: Duration,
}

impl ProcessingCache {
    pub fn new(kv: Arc<dyn KvStore>, ttl: Duration) -> Self {
        Self { kv, ttl }
    }

    /// Mark subjects as just processed.
    pub async fn mark_processed(&self, ids: &[SubjectId]) -> Result<()> {
        for id in ids {
            self.kv.set(&marker_key(*id), "1", Some(self.ttl)).await?;
        }
        Ok(())
    }

    pub async fn is_processed(&self, id: SubjectId) -> Result<bool> {
        self.kv.exists(&marker_key(id)).await
    }

    /// Filter out subjects processed within the TTL, preserving order.
    pub async fn filter_unprocessed(&self, ids: &[SubjectId]) -> Result<Vec<SubjectId>> {
        let mut unprocessed = Vec::with_capacity(ids.len());
        for id in ids {
            if !self.is_processed(*id).await? {
                unprocessed.push(*id);
            }
        }
        Ok(unprocessed)
    }
}
