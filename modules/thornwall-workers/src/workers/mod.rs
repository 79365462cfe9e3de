//! The worker loops that drive the pipeline.

pub mod friend;
pub mod group;
pub mod maintenance;
pub mod queue;
pub mod reason;
pub mod stats;
pub mod sync;

pub use friend::FriendWorker;
pub use group::GroupWorker;
pub use maintenance::MaintenanceWorker;
pub use queue::QueueWorker;
pub use reason::ReasonWorker;
pub use stats::StatsWorker;
pub use sync::SyncWorker;

use async_trait::async_trait;

use thornwall_common::SubjectId;

/// External sink notified when subjects become flagged (e.g. a remote review
/// feed). Optional; failures are the sink's problem.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify_flagged(&self, ids: &[SubjectId]);
}

/// External source of current chat-server rosters consumed by the sync
/// worker.
#[async_trait]
pub trait MembershipSource: Send + Sync {
    async fn server_rosters(&self) -> anyhow::Result<Vec<(u64, Vec<u64>)>>;
}
