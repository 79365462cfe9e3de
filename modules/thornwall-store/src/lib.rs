//! Persistence for the moderation pipeline: the Postgres store adapter, the
//! shared KV keyspace (queues, processing markers, worker status, sessions),
//! and the contract the workers program against.

pub mod adapter;
pub mod cache;
pub mod error;
pub mod kv;
pub mod postgres;
pub mod queue;
pub mod session;
pub mod status;

pub use adapter::PipelineStore;
pub use cache::ProcessingCache;
pub use error::{Result, StoreError};
pub use kv::{KvStore, MemoryKv, RedisKv};
pub use postgres::{
    ActivityCursor, ActivityFilter, Appeal, AppealMessage, AppealStatus, CommentPolicy,
    CondoPlayer, StatsSnapshot, Store, UserComment,
};
pub use queue::{PriorityQueue, QueueInfo};
pub use session::{Session, SessionKey};
pub use status::{StatusReporter, WorkerStatus};
