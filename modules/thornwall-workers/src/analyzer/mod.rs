//! Analyzers contribute typed reasons for a batch of subjects.
//!
//! All analyzers share one capability: given enriched subject records, append
//! entries to the shared reason map. They never mutate subjects directly, and
//! a failing analyzer only costs its own reason type.

mod backend;
pub mod condo;
pub mod friend;
pub mod group;
pub mod outfit;
pub mod profile;

pub use backend::{AiBackend, AnalysisBackend};
pub use condo::CondoAnalyzer;
pub use friend::{FriendAnalyzer, FriendReasonBatch, FriendReasonEntry};
pub use group::{GroupAnalyzer, GroupPercentagePolicy};
pub use outfit::{
    OutfitAnalysis, OutfitAnalyzer, OutfitConfig, OutfitTheme, OutfitThemeAnalysis,
    OutfitViolation,
};
pub use profile::{ProfileAnalysis, ProfileAnalyzer, ProfileBatchAnalysis, ProfileViolation};

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use thornwall_common::{Reason, Reasons, SubjectId, User, UserReasonType};

pub type ReasonsMap = HashMap<SubjectId, Reasons<UserReasonType>>;

/// Mutex-guarded reason map shared by the analyzers of one batch. The lock is
/// held only around individual reads and writes.
#[derive(Clone, Default)]
pub struct SharedReasons {
    inner: Arc<Mutex<ReasonsMap>>,
}

impl SharedReasons {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, subject_id: SubjectId, kind: UserReasonType, reason: Reason) {
        let mut map = self.inner.lock().expect("reasons lock poisoned");
        map.entry(subject_id).or_default().add(kind, reason);
    }

    pub fn contains(&self, subject_id: SubjectId) -> bool {
        let map = self.inner.lock().expect("reasons lock poisoned");
        map.contains_key(&subject_id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("reasons lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> ReasonsMap {
        self.inner.lock().expect("reasons lock poisoned").clone()
    }
}

/// One analyzer in the orchestrator's ordered list.
#[async_trait]
pub trait Analyzer: Send + Sync {
    fn name(&self) -> &'static str;

    /// Inspect the batch and append reasons. Errors abort only this
    /// analyzer's contribution, never the batch.
    async fn analyze(
        &self,
        ctx: &CancellationToken,
        subjects: &[User],
        reasons: &SharedReasons,
    ) -> anyhow::Result<()>;
}
